//! Metadata records and access checks
//!
//! Submodules:
//! - `record`: binary record layout, codec and field merge
//! - `attributes`: extended attributes carried inline by a record
//! - `flags`: inode flag bits and the user-visible/modifiable masks
//! - `permission`: credentials and the access predicate
//! - `ids`: id allocation for new records
pub mod attributes;
pub mod flags;
pub mod ids;
pub mod permission;
pub mod record;

pub use attributes::{Attribute, Attributes, MAX_ATTRIBUTE_VALUE_SIZE};
pub use flags::{InodeFlags, USER_MODIFIABLE_FLAGS, USER_VISIBLE_FLAGS};
pub use ids::{IdAllocator, RandomIds, SequentialIds};
pub use permission::{Access, Credentials, PRIVILEGED_ID, has_access};
pub use record::{FORMAT_VERSION, HEADER_SIZE, MetadataRecord, ROOT_ID, RecordUpdate};
