//! Pooled buffers and their metadata

pub mod metadata;
pub mod pool;

pub use metadata::{CodedFrameParameters, MetadataType, ParsedFrameParameters, SequenceNumber};
pub use pool::{Buffer, BufferKind, BufferPool, OwnerTag, PoolUsage};
