//! Storage backends handed to modules as their [`linna_core::Database`].

pub mod memory;

pub use memory::MemoryDatabase;
