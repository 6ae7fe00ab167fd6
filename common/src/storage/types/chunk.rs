use tracing::debug;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Extra KNN candidates fetched per requested result so that app-side
/// similarity thresholding stays accurate.
pub const CANDIDATE_OVERFETCH: usize = 3;

/// Search width for the HNSW scan.
const KNN_EF: usize = 100;

stored_object!(Chunk, "chunk", {
    source_id: String,
    notebook_id: String,
    plain_text: String,
    chunk_index: u32,
    start_offset: Option<u64>,
    end_offset: Option<u64>,
    embedding_json: Option<Vec<f32>>,
    embedding_vector: Option<Vec<f32>>,
    metadata: serde_json::Value
});

impl Chunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_id: String,
        notebook_id: String,
        plain_text: String,
        chunk_index: u32,
        start_offset: u64,
        end_offset: u64,
        embedding: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_id,
            notebook_id,
            plain_text,
            chunk_index,
            start_offset: Some(start_offset),
            end_offset: Some(end_offset),
            // The vector is kept in both columns: the indexed one drives
            // search, the JSON copy remains for older readers.
            embedding_json: Some(embedding.clone()),
            embedding_vector: Some(embedding),
            metadata,
        }
    }

    /// Insert all chunks atomically. A constraint violation on any row rolls
    /// the whole batch back.
    pub async fn bulk_create(chunks: Vec<Chunk>, db: &SurrealDbClient) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "FOR $chunk IN $chunks {{ CREATE type::thing('{table}', $chunk.id) CONTENT $chunk; }};",
                table = Self::table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("chunks", chunks))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn list_by_source(
        source_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM chunk WHERE source_id = $source_id ORDER BY chunk_index ASC",
            )
            .bind(("source_id", source_id.to_string()))
            .await?
            .take(0)?;
        Ok(chunks)
    }

    /// All chunks in a notebook, grouped by source in insertion order.
    pub async fn list_by_notebook(
        notebook_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM chunk WHERE notebook_id = $notebook_id ORDER BY source_id, chunk_index ASC",
            )
            .bind(("notebook_id", notebook_id.to_string()))
            .await?
            .take(0)?;
        Ok(chunks)
    }

    pub async fn delete_by_source(source_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("DELETE chunk WHERE source_id = $source_id")
            .bind(("source_id", source_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    /// Fetch KNN candidates ordered by cosine distance, over-fetching
    /// `top_k * CANDIDATE_OVERFETCH` rows. Uses the HNSW index when it can
    /// serve the query and falls back to an exact scan otherwise, so
    /// correctness survives dimensions the index cannot hold.
    pub async fn knn_candidates(
        query_embedding: Vec<f32>,
        notebook_id: Option<&str>,
        source_id: Option<&str>,
        top_k: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let fetch = top_k.saturating_mul(CANDIDATE_OVERFETCH).max(1);

        let mut filters = String::from("embedding_vector != NONE");
        if notebook_id.is_some() {
            filters.push_str(" AND notebook_id = $notebook_id");
        }
        if source_id.is_some() {
            filters.push_str(" AND source_id = $source_id");
        }

        let knn_sql = format!(
            "SELECT *, vector::similarity::cosine(embedding_vector, $embedding) AS similarity \
             FROM {table} WHERE {filters} AND embedding_vector <|{fetch},{ef}|> $embedding \
             ORDER BY similarity DESC LIMIT {fetch}",
            table = Self::table_name(),
            ef = KNN_EF,
        );
        let exact_sql = format!(
            "SELECT *, vector::similarity::cosine(embedding_vector, $embedding) AS similarity \
             FROM {table} WHERE {filters} ORDER BY similarity DESC LIMIT {fetch}",
            table = Self::table_name(),
        );

        match Self::run_candidate_query(&knn_sql, &query_embedding, notebook_id, source_id, db)
            .await
        {
            Ok(chunks) => Ok(chunks),
            Err(err) => {
                debug!(error = %err, "knn query failed, falling back to exact scan");
                Self::run_candidate_query(&exact_sql, &query_embedding, notebook_id, source_id, db)
                    .await
            }
        }
    }

    async fn run_candidate_query(
        sql: &str,
        query_embedding: &[f32],
        notebook_id: Option<&str>,
        source_id: Option<&str>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut query = db
            .client
            .query(sql)
            .bind(("embedding", query_embedding.to_vec()));
        if let Some(notebook_id) = notebook_id {
            query = query.bind(("notebook_id", notebook_id.to_string()));
        }
        if let Some(source_id) = source_id {
            query = query.bind(("source_id", source_id.to_string()));
        }

        let mut response = query.await.map_err(AppError::Database)?;
        response = response.check().map_err(AppError::Database)?;
        let chunks: Vec<Self> = response.take(0).map_err(AppError::Database)?;
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3).await.expect("initialize schema");
        db
    }

    fn chunk_at(source_id: &str, notebook_id: &str, index: u32, embedding: Vec<f32>) -> Chunk {
        Chunk::new(
            source_id.to_string(),
            notebook_id.to_string(),
            format!("chunk body {index}"),
            index,
            u64::from(index) * 10,
            u64::from(index) * 10 + 10,
            embedding,
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn test_bulk_create_stores_contiguous_indices() {
        let db = test_db().await;

        let chunks = vec![
            chunk_at("src", "nb", 0, vec![1.0, 0.0, 0.0]),
            chunk_at("src", "nb", 1, vec![0.0, 1.0, 0.0]),
            chunk_at("src", "nb", 2, vec![0.0, 0.0, 1.0]),
        ];
        Chunk::bulk_create(chunks, &db).await.expect("bulk create");

        let stored = Chunk::list_by_source("src", &db).await.expect("list");
        assert_eq!(stored.len(), 3);
        let indices: Vec<u32> = stored.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        // Both embedding columns carry the vector.
        assert!(stored
            .iter()
            .all(|c| c.embedding_vector.is_some() && c.embedding_json.is_some()));
    }

    #[tokio::test]
    async fn test_bulk_create_is_atomic_on_duplicate_index() {
        let db = test_db().await;

        Chunk::bulk_create(vec![chunk_at("src", "nb", 0, vec![1.0, 0.0, 0.0])], &db)
            .await
            .expect("first batch");

        // Second batch repeats chunk_index 0 for the same source; the unique
        // index rejects it and the valid sibling row must roll back with it.
        let result = Chunk::bulk_create(
            vec![
                chunk_at("src", "nb", 1, vec![0.0, 1.0, 0.0]),
                chunk_at("src", "nb", 0, vec![0.0, 0.0, 1.0]),
            ],
            &db,
        )
        .await;
        assert!(result.is_err());

        let stored = Chunk::list_by_source("src", &db).await.expect("list");
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_create_empty_is_noop() {
        let db = test_db().await;
        Chunk::bulk_create(Vec::new(), &db).await.expect("no-op");
    }

    #[tokio::test]
    async fn test_knn_candidates_order_by_similarity() {
        let db = test_db().await;

        Chunk::bulk_create(
            vec![
                chunk_at("src", "nb", 0, vec![1.0, 0.0, 0.0]),
                chunk_at("src", "nb", 1, vec![0.0, 1.0, 0.0]),
            ],
            &db,
        )
        .await
        .expect("bulk create");

        let candidates = Chunk::knn_candidates(vec![0.0, 1.0, 0.0], Some("nb"), None, 2, &db)
            .await
            .expect("search");

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].chunk_index, 1);
        assert_eq!(candidates[1].chunk_index, 0);
    }

    #[tokio::test]
    async fn test_knn_candidates_filter_by_notebook_and_source() {
        let db = test_db().await;

        Chunk::bulk_create(
            vec![
                chunk_at("src_a", "nb_a", 0, vec![1.0, 0.0, 0.0]),
                chunk_at("src_b", "nb_b", 0, vec![1.0, 0.0, 0.0]),
            ],
            &db,
        )
        .await
        .expect("bulk create");

        let scoped = Chunk::knn_candidates(vec![1.0, 0.0, 0.0], Some("nb_a"), None, 5, &db)
            .await
            .expect("search");
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].notebook_id, "nb_a");

        let by_source =
            Chunk::knn_candidates(vec![1.0, 0.0, 0.0], Some("nb_b"), Some("src_b"), 5, &db)
                .await
                .expect("search");
        assert_eq!(by_source.len(), 1);
        assert_eq!(by_source[0].source_id, "src_b");

        let wrong_source =
            Chunk::knn_candidates(vec![1.0, 0.0, 0.0], Some("nb_b"), Some("src_a"), 5, &db)
                .await
                .expect("search");
        assert!(wrong_source.is_empty());
    }

    #[tokio::test]
    async fn test_exact_scan_fallback_without_index() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        // No ensure_initialized: the KNN operator has no index to use.
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        Chunk::bulk_create(vec![chunk_at("src", "nb", 0, vec![0.5, 0.5, 0.0])], &db)
            .await
            .expect("bulk create");

        let candidates = Chunk::knn_candidates(vec![0.5, 0.5, 0.0], Some("nb"), None, 3, &db)
            .await
            .expect("search with fallback");
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_source_leaves_other_sources() {
        let db = test_db().await;

        Chunk::bulk_create(
            vec![
                chunk_at("src_del", "nb", 0, vec![1.0, 0.0, 0.0]),
                chunk_at("src_keep", "nb", 0, vec![0.0, 1.0, 0.0]),
            ],
            &db,
        )
        .await
        .expect("bulk create");

        Chunk::delete_by_source("src_del", &db).await.expect("delete");

        assert!(Chunk::list_by_source("src_del", &db)
            .await
            .expect("list")
            .is_empty());
        assert_eq!(
            Chunk::list_by_source("src_keep", &db)
                .await
                .expect("list")
                .len(),
            1
        );
    }
}
