//! Shared types for `ResourceManager`: the per-slot state
//! machine, resource kind, and the wrap-safe counter arithmetic used for
//! both `mark` values and `alloc_order`.

use std::ptr::NonNull;

use crate::ioq::RequestId;

/// What kind of payload a slot holds. `Texture` carries no pixel-format
/// opinion here — finalize just validates the buffer is nonempty, since the
/// substrate has no texture format of its own (documented in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Data,
    Texture,
    Str,
}

/// Load state machine: `Registered → Submitted → Finished → Live`, or
/// `Failed` if finalize ever comes back empty-handed.
pub(crate) enum SlotState {
    Unused,
    Registered,
    Submitted(PendingLoad),
    Live,
    Failed,
}

pub(crate) struct PendingLoad {
    pub request_id: RequestId,
    pub deflated: bool,
    pub stored_len: u32,
    pub original_len: u32,
}

pub(crate) struct ResourceInfo {
    pub state: SlotState,
    pub ty: ResourceType,
    pub ptr: Option<NonNull<u8>>,
    pub size: usize,
    pub alloc_order: u32,
    pub submitted_mark: u32,
    /// Index of the next member of this alias ring; a solo resource points
    /// to itself.
    pub link_next: usize,
}

impl ResourceInfo {
    pub(crate) fn unused() -> Self {
        ResourceInfo {
            state: SlotState::Unused,
            ty: ResourceType::Data,
            ptr: None,
            size: 0,
            alloc_order: 0,
            submitted_mark: 0,
            link_next: 0,
        }
    }
}

/// `a` happened strictly before `b` under wraparound-tolerant comparison:
/// treats the difference as a signed 32-bit value so a counter rollover
/// doesn't flip the ordering.
pub(crate) fn wrapping_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}
