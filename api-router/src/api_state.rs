use std::sync::Arc;

use common::{
    llm::LlmClient,
    storage::{cache::CacheProvider, db::SurrealDbClient, store::StorageManager},
    utils::config::AppConfig,
};
use ingestion_pipeline::{SourcePipeline, UploadService};
use retrieval_pipeline::{ChatService, GenerationService};

/// The per-process composition. Everything in here is cheap to clone;
/// background tasks receive their own clone, never request-borrowed state.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub cache: CacheProvider,
    pub llm: LlmClient,
    pub pipeline: Arc<SourcePipeline>,
}

impl ApiState {
    pub async fn new(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );
        db.ensure_initialized(config.embedding_dimension).await?;

        let storage = StorageManager::new(config).await?;
        let cache = CacheProvider::from_config(config).await?;
        let llm = LlmClient::from_config(config, cache.clone())?;

        Ok(Self::with_resources(
            db,
            config.clone(),
            storage,
            cache,
            llm,
        ))
    }

    /// Assemble from already-built infrastructure (used by tests and main).
    pub fn with_resources(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        storage: StorageManager,
        cache: CacheProvider,
        llm: LlmClient,
    ) -> Self {
        let pipeline = Arc::new(SourcePipeline::new(
            db.clone(),
            storage.clone(),
            llm.clone(),
            config.clone(),
        ));

        Self {
            db,
            config,
            storage,
            cache,
            llm,
            pipeline,
        }
    }

    pub fn upload_service(&self) -> UploadService {
        UploadService::new(
            self.db.clone(),
            self.storage.clone(),
            self.config.max_upload_bytes,
        )
    }

    pub fn chat_service(&self) -> ChatService {
        ChatService::new(self.db.clone(), self.llm.clone(), self.config.clone())
    }

    pub fn generation_service(&self) -> GenerationService {
        GenerationService::new(self.db.clone(), self.llm.clone())
    }
}
