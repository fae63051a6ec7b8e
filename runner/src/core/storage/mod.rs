pub mod memory;
pub mod persistent;

pub use memory::{AffectedTags, TaggedStorage};
pub use persistent::{HeadersTree, VersionedTree};
