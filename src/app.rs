use crate::{
    config::Config,
    error::Result,
    handlers,
    ml::HuggingFaceEmbedder,
    models,
    pipeline::RecommendationPipeline,
    routes::{api_routes, swagger_routes},
    services::{OpenAiChat, PgCatalogStore, PineconeIndex},
};
use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use log::info;
use std::net::TcpListener;
use std::time::Duration;
use utoipa::OpenApi;

/// The pipeline as wired against the real collaborators.
pub type AppPipeline =
    RecommendationPipeline<OpenAiChat, HuggingFaceEmbedder, PineconeIndex, PgCatalogStore>;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::recommendations::get_recommendations,
        handlers::health::health_check,
    ),
    components(schemas(
        models::RecommendationRequest,
        models::RecommendationResponse,
        models::RecommendedItem,
        models::RequirementFilter,
        models::HealthResponse,
        models::ErrorResponse,
        models::Market,
        models::Audience,
    )),
    tags(
        (name = "Recommendations", description = "AI product recommendations"),
        (name = "Health", description = "Dependency health"),
    )
)]
pub struct ApiDoc;

pub struct Application {
    port: u16,
    host: String,
    config: Config,
}

impl Application {
    /// Create a new application instance
    pub fn new(config: &Config) -> Self {
        Self {
            port: config.port,
            host: config.host.clone(),
            config: config.clone(),
        }
    }

    /// Build and run the server
    pub async fn run(&self) -> Result<()> {
        // Always bind to 0.0.0.0 for container compatibility
        let bind_address = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&bind_address)?;
        info!("Starting server at http://{}:{}", self.host, self.port);

        self.run_with_listener(listener).await
    }

    /// Run the server with a specific TCP listener
    /// This is useful for testing where we want to use a random port
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        let config = &self.config;

        let catalog = PgCatalogStore::connect(&config.database_url)
            .await
            .context("Failed to connect to the catalog database")?;

        let embedder = HuggingFaceEmbedder::new(
            &config.huggingface_api_key,
            &config.huggingface_base_url,
            &config.huggingface_model,
        )
        .context("Failed to initialize sentence encoder")?;

        let index = PineconeIndex::new(&config.pinecone_api_key, &config.pinecone_host)
            .context("Failed to initialize vector index client")?;

        let chat = OpenAiChat::new(
            &config.openai_api_key,
            &config.openai_base_url,
            &config.openai_model,
        )
        .context("Failed to initialize chat client")?;

        let pipeline = web::Data::new(RecommendationPipeline::new(
            chat.clone(),
            embedder,
            index.clone(),
            catalog,
            Duration::from_secs(config.stage_timeout_secs),
        ));
        let chat = web::Data::new(chat);
        let index = web::Data::new(index);

        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header();

            App::new()
                .wrap(cors)
                .wrap(Logger::default())
                .app_data(pipeline.clone())
                .app_data(chat.clone())
                .app_data(index.clone())
                .service(api_routes())
                .service(swagger_routes())
        })
        .listen(listener)?
        .run()
        .await?;

        Ok(())
    }
}
