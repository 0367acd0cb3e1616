//! In-memory [`Repository`] backend. Suitable for development and tests.

mod repository;

pub use repository::MemoryRepository;

use vigil_store::Repository;

/// Build the memory backend behind the trait object used by the pipeline.
#[must_use]
pub fn repository() -> std::sync::Arc<dyn Repository> {
    std::sync::Arc::new(MemoryRepository::new())
}
