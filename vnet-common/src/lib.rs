//! Collaborator interfaces shared by the vnet crates.

mod cache;
pub use cache::{Cache, MemoryCache};
