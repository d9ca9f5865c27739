//! Test support shared by unit and integration tests

mod memory_backend;

pub use memory_backend::MemoryBackend;
