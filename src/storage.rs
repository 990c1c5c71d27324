pub mod file_storage;
pub mod memory_storage;
pub mod storage_trait;

pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
pub use storage_trait::Storage;
