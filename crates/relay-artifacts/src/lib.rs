//! Run-scoped, content-addressed artifact handoff between jobs.

pub mod backend;
pub mod digest;
pub mod lineage;
pub mod store;

pub use backend::{BlobBackend, FsBackend, MemoryBackend};
pub use digest::hash_content;
pub use lineage::Lineage;
pub use store::{ArchiveSummary, ArtifactStore, StagedWriter};
