use anyhow::{Context, Result};
use std::env;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_HUGGINGFACE_BASE_URL: &str = "https://api-inference.huggingface.co";
const DEFAULT_HUGGINGFACE_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub database_url: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub huggingface_api_key: String,
    pub huggingface_base_url: String,
    pub huggingface_model: String,
    pub pinecone_api_key: String,
    pub pinecone_host: String,
    /// Budget for each pipeline stage before it is failed with a timeout
    pub stage_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            openai_api_key: env::var("APP_OPENAI_API_KEY")
                .context("APP_OPENAI_API_KEY must be set")?,
            openai_base_url: env::var("APP_OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string()),
            openai_model: env::var("APP_OPENAI_MODEL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string()),
            huggingface_api_key: env::var("APP_HUGGINGFACE_API_KEY")
                .context("APP_HUGGINGFACE_API_KEY must be set")?,
            huggingface_base_url: env::var("APP_HUGGINGFACE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_HUGGINGFACE_BASE_URL.to_string()),
            huggingface_model: env::var("APP_HUGGINGFACE_MODEL_NAME")
                .unwrap_or_else(|_| DEFAULT_HUGGINGFACE_MODEL.to_string()),
            pinecone_api_key: env::var("APP_PINECONE_API_KEY")
                .context("APP_PINECONE_API_KEY must be set")?,
            pinecone_host: env::var("APP_PINECONE_HOST")
                .context("APP_PINECONE_HOST must be set")?,
            stage_timeout_secs: env::var("APP_STAGE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STAGE_TIMEOUT_SECS),
        })
    }
}
