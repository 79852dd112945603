pub mod memory;
pub mod qdrant;

pub use memory::MemoryBackend;
pub use qdrant::QdrantBackend;
