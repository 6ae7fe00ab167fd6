use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    S3,
    Local,
    Memory,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,

    // Cache. When no redis_url is configured the in-memory provider is used.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_redis_pool_size")]
    pub redis_pool_size: u32,

    // Object storage. All four S3 values must be present for the real backend.
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub s3_access_key: Option<String>,
    #[serde(default)]
    pub s3_secret_key: Option<String>,
    #[serde(default)]
    pub s3_bucket: Option<String>,
    #[serde(default)]
    pub storage: Option<StorageKind>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    // LLM gateway. Absent api key selects the deterministic mock backend.
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default = "default_embedding_max_concurrent_batches")]
    pub embedding_max_concurrent_batches: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_cache_ttl_chat_seconds")]
    pub cache_ttl_chat_seconds: u64,
    #[serde(default = "default_cache_ttl_embedding_seconds")]
    pub cache_ttl_embedding_seconds: u64,

    // Ingestion and retrieval tuning.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_vector_search_threshold")]
    pub vector_search_threshold: f32,
    #[serde(default = "default_max_similarity_results")]
    pub max_similarity_results: usize,

    // Request envelope and edge limits.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_default: String,
    #[serde(default = "default_rate_limit_document_upload")]
    pub rate_limit_document_upload: String,
}

fn default_redis_pool_size() -> u32 {
    20
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> usize {
    1536
}

fn default_embedding_max_concurrent_batches() -> usize {
    3
}

fn default_embedding_batch_size() -> usize {
    20
}

fn default_cache_ttl_chat_seconds() -> u64 {
    600
}

fn default_cache_ttl_embedding_seconds() -> u64 {
    86_400
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_vector_search_threshold() -> f32 {
    0.7
}

fn default_max_similarity_results() -> usize {
    5
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_rate_limit() -> String {
    "100/hour".to_string()
}

fn default_rate_limit_document_upload() -> String {
    "10/day".to_string()
}

impl AppConfig {
    /// True when every S3 credential needed for the real backend is present.
    pub fn has_s3_credentials(&self) -> bool {
        [
            &self.s3_endpoint,
            &self.s3_access_key,
            &self.s3_secret_key,
            &self.s3_bucket,
        ]
        .iter()
        .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "memory".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "test".to_string(),
            surrealdb_database: "test".to_string(),
            http_port: 0,
            redis_url: None,
            redis_pool_size: default_redis_pool_size(),
            s3_endpoint: None,
            s3_access_key: None,
            s3_secret_key: None,
            s3_bucket: None,
            storage: Some(StorageKind::Memory),
            data_dir: default_data_dir(),
            llm_api_key: None,
            llm_base_url: default_llm_base_url(),
            llm_model: default_llm_model(),
            embedding_model: default_embedding_model(),
            embedding_dimension: default_embedding_dimension(),
            embedding_max_concurrent_batches: default_embedding_max_concurrent_batches(),
            embedding_batch_size: default_embedding_batch_size(),
            cache_ttl_chat_seconds: default_cache_ttl_chat_seconds(),
            cache_ttl_embedding_seconds: default_cache_ttl_embedding_seconds(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_upload_bytes: default_max_upload_bytes(),
            vector_search_threshold: default_vector_search_threshold(),
            max_similarity_results: default_max_similarity_results(),
            request_timeout_seconds: default_request_timeout_seconds(),
            rate_limit_default: default_rate_limit(),
            rate_limit_document_upload: default_rate_limit_document_upload(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_credentials_require_all_four_values() {
        let mut config = AppConfig::default();
        assert!(!config.has_s3_credentials());

        config.s3_endpoint = Some("http://localhost:9000".into());
        config.s3_access_key = Some("key".into());
        config.s3_secret_key = Some("secret".into());
        assert!(!config.has_s3_credentials());

        config.s3_bucket = Some("bucket".into());
        assert!(config.has_s3_credentials());

        config.s3_access_key = Some(String::new());
        assert!(!config.has_s3_credentials());
    }

    #[test]
    fn defaults_match_tuning_contract() {
        let config = AppConfig::default();
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.chunk_overlap, 100);
        assert_eq!(config.embedding_dimension, 1536);
        assert_eq!(config.embedding_max_concurrent_batches, 3);
        assert_eq!(config.cache_ttl_chat_seconds, 600);
        assert_eq!(config.cache_ttl_embedding_seconds, 86_400);
        assert_eq!(config.rate_limit_default, "100/hour");
        assert_eq!(config.rate_limit_document_upload, "10/day");
        assert_eq!(config.request_timeout_seconds, 30);
        assert!((config.vector_search_threshold - 0.7).abs() < f32::EPSILON);
    }
}
