pub mod catalog;
pub mod llm;
pub mod sync;
pub mod vector_index;

// Re-export public types
pub use catalog::{CatalogStore, PgCatalogStore};
pub use llm::{ChatModel, OpenAiChat};
pub use sync::{CatalogSyncService, SyncReport};
pub use vector_index::{PineconeIndex, VectorIndex};
