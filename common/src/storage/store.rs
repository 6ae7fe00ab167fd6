use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::signer::Signer;
use object_store::{path::Path as ObjPath, ObjectStore};
use tracing::warn;
use url::Url;

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Default lifetime of presigned GET URLs handed to the ingestion pipeline.
pub const SIGNED_URL_TTL_SECS: u64 = 600;

/// Object storage facade shared by the upload service and the ingestion
/// pipeline. The S3 backend signs GET URLs; the local and memory backends
/// cannot, so callers fall back to direct reads.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    signer: Option<Arc<dyn Signer>>,
    backend_kind: StorageKind,
}

impl StorageManager {
    /// Select a backend from configuration. The real S3 backend requires all
    /// credentials; anything less degrades to the in-memory store.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let kind = match &cfg.storage {
            Some(kind) => kind.clone(),
            None if cfg.has_s3_credentials() => StorageKind::S3,
            None => {
                warn!("object storage credentials incomplete, using in-memory store");
                StorageKind::Memory
            }
        };

        match kind {
            StorageKind::S3 => {
                let s3 = AmazonS3Builder::new()
                    .with_endpoint(cfg.s3_endpoint.clone().unwrap_or_default())
                    .with_access_key_id(cfg.s3_access_key.clone().unwrap_or_default())
                    .with_secret_access_key(cfg.s3_secret_key.clone().unwrap_or_default())
                    .with_bucket_name(cfg.s3_bucket.clone().unwrap_or_default())
                    .with_region("us-east-1")
                    // Path-style addressing is required by Ceph-style gateways.
                    .with_virtual_hosted_style_request(false)
                    .with_allow_http(true)
                    .build()?;
                let s3 = Arc::new(s3);
                Ok(Self {
                    store: s3.clone(),
                    signer: Some(s3),
                    backend_kind: StorageKind::S3,
                })
            }
            StorageKind::Local => {
                let base = resolve_base_dir(cfg);
                if !base.exists() {
                    tokio::fs::create_dir_all(&base).await.map_err(|e| {
                        object_store::Error::Generic {
                            store: "LocalFileSystem",
                            source: e.into(),
                        }
                    })?;
                }
                let store = LocalFileSystem::new_with_prefix(base)?;
                Ok(Self {
                    store: Arc::new(store),
                    signer: None,
                    backend_kind: StorageKind::Local,
                })
            }
            StorageKind::Memory => Ok(Self {
                store: Arc::new(InMemory::new()),
                signer: None,
                backend_kind: StorageKind::Memory,
            }),
        }
    }

    /// Inject a specific backend, used by tests.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            signer: None,
            backend_kind,
        }
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    /// Streaming handle for large objects.
    pub async fn get_stream(
        &self,
        location: &str,
    ) -> object_store::Result<BoxStream<'static, object_store::Result<Bytes>>> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        Ok(result.into_stream())
    }

    pub async fn delete(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        match self.store.delete(&path).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    pub async fn list(
        &self,
        prefix: Option<&str>,
    ) -> object_store::Result<Vec<object_store::ObjectMeta>> {
        let prefix_path = prefix.map(ObjPath::from);
        self.store.list(prefix_path.as_ref()).try_collect().await
    }

    /// Presigned GET URL when the backend supports signing, `None` otherwise.
    pub async fn signed_url(
        &self,
        location: &str,
        ttl: Duration,
    ) -> object_store::Result<Option<Url>> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };
        let path = ObjPath::from(location);
        let url = signer.signed_url(reqwest::Method::GET, &path, ttl).await?;
        Ok(Some(url))
    }
}

/// Storage key for an uploaded source file, scoped by tenant and notebook.
pub fn source_object_key(
    user_id: &str,
    notebook_id: &str,
    timestamp_millis: i64,
    file_name: &str,
) -> String {
    format!("{user_id}/notebooks/{notebook_id}/sources/{timestamp_millis}-{file_name}")
}

/// Resolve the absolute base directory used for local storage from config.
fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}
