use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define schema-level indexes. Runs at startup and is idempotent.
    pub async fn ensure_initialized(&self, embedding_dimension: usize) -> Result<(), AppError> {
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_user_email ON TABLE user FIELDS email UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_user_api_key ON TABLE user FIELDS api_key")
            .await?;
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_chunk_source_index ON TABLE chunk FIELDS source_id, chunk_index UNIQUE",
            )
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_source_status ON TABLE source FIELDS status")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_source_notebook ON TABLE source FIELDS notebook_id")
            .await?;

        self.ensure_vector_index(embedding_dimension).await?;

        Ok(())
    }

    /// (Re)define the HNSW index over chunk embeddings for the configured
    /// dimension. Kept separate so tests and re-embedding flows can resize it.
    pub async fn ensure_vector_index(&self, dimension: usize) -> Result<(), AppError> {
        self.client
            .query(format!(
                "DEFINE INDEX OVERWRITE idx_chunk_embedding ON TABLE chunk FIELDS embedding_vector HNSW DIMENSION {dimension}"
            ))
            .await?
            .check()?;
        Ok(())
    }

    /// Store an object in its table under its own id.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::chunk::Chunk;
    use crate::storage::types::source::{Source, SourceKind, SourceStatus};
    use uuid::Uuid;

    async fn initialized_db() -> SurrealDbClient {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3)
            .await
            .expect("Failed to initialize schema");
        db
    }

    #[tokio::test]
    async fn test_generic_crud_round_trips_a_source_row() {
        let db = initialized_db().await;

        let source = Source::new(
            "nb-db".to_string(),
            SourceKind::Text,
            "Lecture notes".to_string(),
            None,
            None,
            serde_json::json!({ "file_type": "txt" }),
        );

        let stored = db.store_item(source.clone()).await.expect("store source");
        assert!(stored.is_some());

        let fetched: Source = db
            .get_item(&source.id)
            .await
            .expect("fetch source")
            .expect("source present");
        assert_eq!(fetched.title, "Lecture notes");
        assert_eq!(fetched.status, SourceStatus::Processing);
        assert_eq!(
            fetched.metadata.get("file_type").and_then(|v| v.as_str()),
            Some("txt")
        );

        let all: Vec<Source> = db.get_all_stored_items().await.expect("list sources");
        assert_eq!(all.len(), 1);

        let removed = db
            .delete_item::<Source>(&source.id)
            .await
            .expect("delete source");
        assert_eq!(removed.map(|s| s.id), Some(source.id.clone()));
        assert!(db
            .get_item::<Source>(&source.id)
            .await
            .expect("refetch source")
            .is_none());
    }

    #[tokio::test]
    async fn test_schema_enforces_chunk_index_uniqueness() {
        let db = initialized_db().await;

        let chunk = Chunk::new(
            "src-db".to_string(),
            "nb-db".to_string(),
            "first span".to_string(),
            0,
            0,
            10,
            vec![1.0, 0.0, 0.0],
            serde_json::json!({}),
        );
        db.store_item(chunk)
            .await
            .expect("store first chunk")
            .expect("created");

        // Same (source_id, chunk_index) pair must be rejected by the index
        // defined in ensure_initialized.
        let duplicate = Chunk::new(
            "src-db".to_string(),
            "nb-db".to_string(),
            "competing span".to_string(),
            0,
            10,
            20,
            vec![0.0, 1.0, 0.0],
            serde_json::json!({}),
        );
        assert!(db.store_item(duplicate).await.is_err());
    }

    #[tokio::test]
    async fn test_vector_index_resize() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ensure_vector_index(3)
            .await
            .expect("Failed to define index");
        // Redefining with a different dimension must not fail.
        db.ensure_vector_index(5)
            .await
            .expect("Failed to redefine index");
    }
}
