//! PKG archive wire format: header, index entries, name table, and the
//! fixed 32-bit name hash used to sort and binary-search the index.

pub const MAGIC: &[u8; 4] = b"PAK1";
pub const HEADER_SIZE: u32 = 16;
/// Byte size of one on-disk index entry: five little-endian `u32` fields
/// (see DESIGN.md for why this is 20 bytes rather than 16).
pub const ENTRY_SIZE: u16 = 20;

const NAMEOFS_MASK: u32 = 0x0FFF_FFFF;
const DEFLATED_BIT: u32 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub header_size: u32,
    pub entry_size: u16,
    pub entry_count: u16,
    pub name_table_size: u32,
}

impl Header {
    pub const ENCODED_LEN: usize = 16;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.header_size.to_le_bytes());
        buf[8..10].copy_from_slice(&self.entry_size.to_le_bytes());
        buf[10..12].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.name_table_size.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Header> {
        if buf.len() < Self::ENCODED_LEN {
            return None;
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        Some(Header {
            magic,
            header_size: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            entry_size: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            entry_count: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
            name_table_size: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub hash: u32,
    pub name_offset: u32,
    pub deflated: bool,
    pub offset: u32,
    pub stored_len: u32,
    pub original_len: u32,
}

impl IndexEntry {
    pub const ENCODED_LEN: usize = ENTRY_SIZE as usize;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut nameofs_flags = self.name_offset & NAMEOFS_MASK;
        if self.deflated {
            nameofs_flags |= DEFLATED_BIT;
        }
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..4].copy_from_slice(&self.hash.to_le_bytes());
        buf[4..8].copy_from_slice(&nameofs_flags.to_le_bytes());
        buf[8..12].copy_from_slice(&self.offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.stored_len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.original_len.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<IndexEntry> {
        if buf.len() < Self::ENCODED_LEN {
            return None;
        }
        let hash = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let nameofs_flags = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let offset = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let stored_len = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let original_len = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        Some(IndexEntry {
            hash,
            name_offset: nameofs_flags & NAMEOFS_MASK,
            deflated: nameofs_flags & DEFLATED_BIT != 0,
            offset,
            stored_len,
            original_len,
        })
    }
}

/// Lowercase-ASCII FNV-1a over the archive-producer-normalized name; the
/// index was built with this same function and stored on disk, so a
/// lookup just has to reproduce it exactly. Non-ASCII bytes pass through
/// unchanged — left as the archive producer's responsibility.
pub fn hash_name(name: &str) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut h = FNV_OFFSET;
    for b in name.bytes() {
        let lower = if b.is_ascii_uppercase() { b.to_ascii_lowercase() } else { b };
        h ^= lower as u32;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// ASCII-only case-insensitive comparison, used as the binary-search
/// tiebreaker among entries sharing a hash.
pub fn ci_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}
