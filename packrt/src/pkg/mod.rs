//! Package archive format and lookup.
//!
//! A `PackageModule` owns one mounted namespace (an archive file, or a raw
//! filesystem fallthrough). `Registry` holds the ordered list consulted by
//! longest-prefix-first match, mirroring the source's static module table.

pub mod backend;
pub mod format;

pub use backend::{FileInfo, FsFallthrough, PackageModule, PkgArchive};

use std::sync::Arc;

use packrt_common::error::Error;
use packrt_common::Result;

/// Ordered list of mounted package modules, matched by longest registered
/// prefix so a more specific mount (e.g. a per-subtree fallthrough) wins
/// over a broader archive covering the same path.
#[derive(Default)]
pub struct Registry {
    modules: Vec<Arc<dyn PackageModule>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { modules: Vec::new() }
    }

    pub fn register(&mut self, module: Arc<dyn PackageModule>) {
        self.modules.push(module);
        self.modules
            .sort_by(|a, b| b.prefix().len().cmp(&a.prefix().len()));
    }

    /// Resolve `path` to the file it ultimately names. A module matching by
    /// prefix whose `has_path` returns `false` defers to the filesystem
    /// rather than reporting `NotFound`.
    pub fn find(&self, path: &str) -> Result<FileInfo> {
        for module in &self.modules {
            if path.starts_with(module.prefix()) {
                if !module.has_path(path) {
                    break;
                }
                return module.file_info(path);
            }
        }
        Err(Error::NotFound(path.to_string()))
    }

    /// Enumerate every packaged name (across all mounted modules) starting
    /// with `prefix`. Used by `ResourceManager::list_files_start`.
    pub fn list_names_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut out = Vec::new();
        for module in &self.modules {
            module.list_start();
            while let Some(name) = module.list_next() {
                let full = format!("{}{}", module.prefix(), name);
                if full.starts_with(prefix) {
                    out.push(full);
                }
            }
        }
        out
    }
}
