//! Binary metadata record persisted by every store.
//!
//! Layout (little-endian, 128-byte fixed header followed by attributes):
//!
//! ```text
//! off  size  field
//!   0     4  content_id
//!   4     4  reserved (v1/v2 content id)
//!   8     4  size
//!  12     2  mode
//!  14     4  link_count
//!  18     4  uid
//!  22     4  gid
//!  26     8  access_ms   (f64)
//!  34     8  birth_ms    (f64)
//!  42     8  modify_ms   (f64)
//!  50     8  change_ms   (f64)
//!  58     4  id
//!  62     4  reserved (v2 64-bit id high word)
//!  66     4  flags
//!  70     2  reserved
//!  72     4  format_version
//!  76    48  padding
//! 124     4  attribute_count
//! 128     …  attributes: key_len:u32, value_len:u32, key, value
//! ```
//!
//! Format history:
//! 1. 58 bytes. The first member was the record id but used as the content id.
//! 2. 66 bytes. Split into separate content id and record id.
//! 3. 72 bytes. Ids narrowed from 64 to 32 bits, `flags` added.
//! 4. Extended attributes; header padded to 128 bytes.

use super::attributes::Attributes;
use super::flags::InodeFlags;
use super::ids::IdAllocator;
use super::permission::{Access, Credentials, has_access};
use crate::error::{StoreError, StoreResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Record id of the filesystem root.
pub const ROOT_ID: u32 = 0;

/// Current record layout generation.
pub const FORMAT_VERSION: u32 = 4;

/// Size of the fixed header, attribute count included.
pub const HEADER_SIZE: usize = 128;

const PADDING: usize = 48;

pub const S_IFMT: u16 = 0o170000;
pub const S_IFSOCK: u16 = 0o140000;
pub const S_IFLNK: u16 = 0o120000;
pub const S_IFREG: u16 = 0o100000;
pub const S_IFBLK: u16 = 0o060000;
pub const S_IFDIR: u16 = 0o040000;
pub const S_IFCHR: u16 = 0o020000;
pub const S_IFIFO: u16 = 0o010000;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataRecord {
    /// Key under which the entry's content bytes are stored.
    pub content_id: u32,
    /// Identity of the entry itself.
    pub id: u32,
    pub size: u32,
    pub mode: u16,
    pub link_count: u32,
    pub uid: u32,
    pub gid: u32,
    pub access_ms: f64,
    pub birth_ms: f64,
    pub modify_ms: f64,
    /// Bumped by [`MetadataRecord::merge`] whenever another field changes.
    pub change_ms: f64,
    pub flags: u32,
    pub format_version: u32,
    pub attributes: Attributes,
}

impl Default for MetadataRecord {
    fn default() -> Self {
        Self {
            content_id: 0,
            id: 0,
            size: 0,
            mode: 0,
            link_count: 1,
            uid: 0,
            gid: 0,
            access_ms: 0.0,
            birth_ms: 0.0,
            modify_ms: 0.0,
            change_ms: 0.0,
            flags: 0,
            format_version: FORMAT_VERSION,
            attributes: Attributes::new(),
        }
    }
}

/// Partial record used by [`MetadataRecord::merge`]; `None` fields are left alone.
///
/// `id` and `content_id` are accepted so callers can pass a whole record's
/// worth of fields, but merge never copies them: stacked stores may disagree
/// on both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub id: Option<u32>,
    pub content_id: Option<u32>,
    pub size: Option<u32>,
    pub mode: Option<u16>,
    pub flags: Option<u32>,
    pub link_count: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub access_ms: Option<f64>,
    pub birth_ms: Option<f64>,
    pub modify_ms: Option<f64>,
    pub change_ms: Option<f64>,
    pub format_version: Option<u32>,
    pub attributes: Option<Attributes>,
}

impl From<&MetadataRecord> for RecordUpdate {
    fn from(r: &MetadataRecord) -> Self {
        Self {
            id: Some(r.id),
            content_id: Some(r.content_id),
            size: Some(r.size),
            mode: Some(r.mode),
            flags: Some(r.flags),
            link_count: Some(r.link_count),
            uid: Some(r.uid),
            gid: Some(r.gid),
            access_ms: Some(r.access_ms),
            birth_ms: Some(r.birth_ms),
            modify_ms: Some(r.modify_ms),
            change_ms: Some(r.change_ms),
            format_version: Some(r.format_version),
            attributes: Some(r.attributes.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Size,
    Mode,
    Flags,
    LinkCount,
    Uid,
    Gid,
    Access,
    Birth,
    Modify,
    Change,
    FormatVersion,
}

/// Order in which [`MetadataRecord::merge`] visits fields. `Flags` precedes
/// `Access` so a payload that sets no-atime also suppresses its own atime.
const MERGED_FIELDS: [Field; 11] = [
    Field::Size,
    Field::Mode,
    Field::Flags,
    Field::LinkCount,
    Field::Uid,
    Field::Gid,
    Field::Access,
    Field::Birth,
    Field::Modify,
    Field::Change,
    Field::FormatVersion,
];

fn assign<T: PartialEq + Copy>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) if *slot != v => {
            *slot = v;
            true
        }
        _ => false,
    }
}

impl MetadataRecord {
    /// New record with allocated ids and all timestamps set to now.
    pub fn new(ids: &dyn IdAllocator) -> Self {
        let now = now_ms();
        Self {
            content_id: ids.next_id(),
            id: ids.next_id(),
            access_ms: now,
            birth_ms: now,
            modify_ms: now,
            change_ms: now,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: u16) -> Self {
        self.mode = mode;
        self
    }

    pub fn inode_flags(&self) -> InodeFlags {
        InodeFlags::from_bits_retain(self.flags)
    }

    /// Copy every present field of `update` into `self`.
    ///
    /// Returns whether anything changed; when it did, `change_ms` is set to
    /// now. Access time updates are dropped while no-atime is set.
    pub fn merge(&mut self, update: &RecordUpdate) -> bool {
        let mut changed = false;

        for field in MERGED_FIELDS {
            changed |= match field {
                Field::Size => assign(&mut self.size, update.size),
                Field::Mode => assign(&mut self.mode, update.mode),
                Field::Flags => assign(&mut self.flags, update.flags),
                Field::LinkCount => assign(&mut self.link_count, update.link_count),
                Field::Uid => assign(&mut self.uid, update.uid),
                Field::Gid => assign(&mut self.gid, update.gid),
                Field::Access => {
                    if self.inode_flags().contains(InodeFlags::NO_ATIME) {
                        false
                    } else {
                        assign(&mut self.access_ms, update.access_ms)
                    }
                }
                Field::Birth => assign(&mut self.birth_ms, update.birth_ms),
                Field::Modify => assign(&mut self.modify_ms, update.modify_ms),
                Field::Change => assign(&mut self.change_ms, update.change_ms),
                Field::FormatVersion => assign(&mut self.format_version, update.format_version),
            };
        }

        if let Some(attributes) = &update.attributes
            && *attributes != self.attributes
        {
            self.attributes = attributes.clone();
            changed = true;
        }

        if changed {
            self.change_ms = now_ms();
        }
        changed
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE - 4 + self.attributes.encoded_len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32_le(self.content_id);
        buf.put_u32_le(0);
        buf.put_u32_le(self.size);
        buf.put_u16_le(self.mode);
        buf.put_u32_le(self.link_count);
        buf.put_u32_le(self.uid);
        buf.put_u32_le(self.gid);
        buf.put_f64_le(self.access_ms);
        buf.put_f64_le(self.birth_ms);
        buf.put_f64_le(self.modify_ms);
        buf.put_f64_le(self.change_ms);
        buf.put_u32_le(self.id);
        buf.put_u32_le(0);
        buf.put_u32_le(self.flags);
        buf.put_u16_le(0);
        buf.put_u32_le(self.format_version);
        buf.put_bytes(0, PADDING);
        self.attributes.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode a record; trailing bytes past the attribute block are ignored.
    pub fn decode(data: &[u8]) -> StoreResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(StoreError::io(format!(
                "buffer is too small to decode a metadata record ({} < {HEADER_SIZE} bytes)",
                data.len()
            )));
        }
        let mut buf = data;
        let content_id = buf.get_u32_le();
        buf.advance(4);
        let size = buf.get_u32_le();
        let mode = buf.get_u16_le();
        let link_count = buf.get_u32_le();
        let uid = buf.get_u32_le();
        let gid = buf.get_u32_le();
        let access_ms = buf.get_f64_le();
        let birth_ms = buf.get_f64_le();
        let modify_ms = buf.get_f64_le();
        let change_ms = buf.get_f64_le();
        let id = buf.get_u32_le();
        buf.advance(4);
        let flags = buf.get_u32_le();
        buf.advance(2);
        let format_version = buf.get_u32_le();
        buf.advance(PADDING);
        let attributes = Attributes::decode_from(&mut buf)?;

        Ok(Self {
            content_id,
            id,
            size,
            mode,
            link_count,
            uid,
            gid,
            access_ms,
            birth_ms,
            modify_ms,
            change_ms,
            flags,
            format_version,
            attributes,
        })
    }

    pub fn has_access(&self, credentials: &Credentials, access: Access) -> bool {
        has_access(credentials, self.mode, self.uid, self.gid, access)
    }

    pub fn is_file(&self) -> bool {
        is_file(self.mode)
    }

    pub fn is_directory(&self) -> bool {
        is_directory(self.mode)
    }

    pub fn is_symlink(&self) -> bool {
        is_symlink(self.mode)
    }
}

impl fmt::Display for MetadataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Inode {}>", self.id)
    }
}

pub fn is_file(mode: u16) -> bool {
    mode & S_IFMT == S_IFREG
}

pub fn is_directory(mode: u16) -> bool {
    mode & S_IFMT == S_IFDIR
}

pub fn is_symlink(mode: u16) -> bool {
    mode & S_IFMT == S_IFLNK
}

pub fn is_socket(mode: u16) -> bool {
    mode & S_IFMT == S_IFSOCK
}

pub fn is_block_device(mode: u16) -> bool {
    mode & S_IFMT == S_IFBLK
}

pub fn is_character_device(mode: u16) -> bool {
    mode & S_IFMT == S_IFCHR
}

pub fn is_fifo(mode: u16) -> bool {
    mode & S_IFMT == S_IFIFO
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ids::SequentialIds;

    fn sample() -> MetadataRecord {
        let mut record = MetadataRecord {
            content_id: 7,
            id: 42,
            size: 4096,
            mode: S_IFREG | 0o644,
            link_count: 2,
            uid: 1000,
            gid: 100,
            access_ms: 1_700_000_000_000.5,
            birth_ms: 1_600_000_000_000.0,
            modify_ms: 1_700_000_000_123.25,
            change_ms: 1_700_000_000_999.0,
            flags: InodeFlags::NO_DUMP.bits(),
            format_version: FORMAT_VERSION,
            attributes: Attributes::new(),
        };
        record
            .attributes
            .set("user.mime", Bytes::from_static(b"text/plain"))
            .unwrap();
        record.attributes.set("user.big", vec![0xAB; 1024]).unwrap();
        record
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let record = sample();
        let bytes = record.encode();
        assert_eq!(bytes.len(), record.encoded_len());
        assert_eq!(MetadataRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_header_layout() {
        let record = MetadataRecord::default();
        let bytes = record.encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        // format_version sits at offset 72, attribute count at 124
        assert_eq!(&bytes[72..76], &FORMAT_VERSION.to_le_bytes());
        assert_eq!(&bytes[124..128], &0u32.to_le_bytes());
        // link_count at 14
        assert_eq!(&bytes[14..18], &1u32.to_le_bytes());
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let bytes = MetadataRecord::default().encode();
        let err = MetadataRecord::decode(&bytes[..HEADER_SIZE - 1]).unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let record = sample();
        let mut bytes = record.encode().to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        assert_eq!(MetadataRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_new_uses_allocator() {
        let ids = SequentialIds::starting_at(10);
        let record = MetadataRecord::new(&ids);
        assert_eq!(record.content_id, 10);
        assert_eq!(record.id, 11);
        assert!(record.birth_ms > 0.0);
        assert_eq!(record.format_version, FORMAT_VERSION);
        assert_eq!(record.to_string(), "<Inode 11>");
    }

    #[test]
    fn test_merge_identical_is_unchanged() {
        let mut record = sample();
        let before = record.clone();
        let update = RecordUpdate::from(&before);
        assert!(!record.merge(&update));
        assert_eq!(record, before);
        assert_eq!(record.encode(), before.encode());
    }

    #[test]
    fn test_merge_never_copies_ids() {
        let mut record = sample();
        let update = RecordUpdate {
            id: Some(9999),
            content_id: Some(8888),
            ..Default::default()
        };
        assert!(!record.merge(&update));
        assert_eq!(record.id, 42);
        assert_eq!(record.content_id, 7);
    }

    #[test]
    fn test_merge_updates_change_time() {
        let mut record = sample();
        let old_change = record.change_ms;
        let update = RecordUpdate {
            size: Some(1),
            ..Default::default()
        };
        assert!(record.merge(&update));
        assert_eq!(record.size, 1);
        assert!(record.change_ms > old_change);
    }

    #[test]
    fn test_merge_respects_no_atime() {
        let mut record = sample();
        record.flags |= InodeFlags::NO_ATIME.bits();
        let before = record.clone();
        let update = RecordUpdate {
            access_ms: Some(before.access_ms + 5000.0),
            ..Default::default()
        };
        assert!(!record.merge(&update));
        assert_eq!(record, before);
    }

    #[test]
    fn test_merge_attributes() {
        let mut record = sample();
        let mut attrs = record.attributes.clone();
        assert!(!record.merge(&RecordUpdate {
            attributes: Some(attrs.clone()),
            ..Default::default()
        }));

        attrs.set("user.mime", Bytes::from_static(b"text/html")).unwrap();
        assert!(record.merge(&RecordUpdate {
            attributes: Some(attrs),
            ..Default::default()
        }));
        assert_eq!(
            record.attributes.get("user.mime").unwrap().as_ref(),
            b"text/html"
        );
    }

    #[test]
    fn test_file_type_predicates() {
        assert!(is_file(S_IFREG | 0o755));
        assert!(is_directory(S_IFDIR | 0o755));
        assert!(is_symlink(S_IFLNK | 0o777));
        assert!(is_fifo(S_IFIFO));
        assert!(is_socket(S_IFSOCK));
        assert!(is_block_device(S_IFBLK));
        assert!(is_character_device(S_IFCHR));
        // S_IFREG bits are a subset of S_IFSOCK; masking must not confuse them
        assert!(!is_file(S_IFSOCK));
    }
}
