pub mod embedder;

pub use embedder::{EmbedError, Embedder, HuggingFaceEmbedder, EMBEDDING_DIM};
