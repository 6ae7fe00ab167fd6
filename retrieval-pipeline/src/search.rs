use common::{
    error::AppError,
    llm::LlmClient,
    storage::{db::SurrealDbClient, types::chunk::Chunk},
};
use tracing::debug;

use crate::scoring::cosine_similarity;

/// Two-stage semantic search: the database orders candidates by cosine
/// distance (over-fetched), then similarity is recomputed here and used for
/// thresholding. Each surviving chunk carries its score in
/// `metadata.similarity_score`; at most `top_k` are returned, in the
/// database's distance order.
pub async fn search_by_embedding(
    db: &SurrealDbClient,
    query_embedding: &[f32],
    notebook_id: Option<&str>,
    source_id: Option<&str>,
    top_k: usize,
    threshold: f32,
) -> Result<Vec<Chunk>, AppError> {
    let candidates =
        Chunk::knn_candidates(query_embedding.to_vec(), notebook_id, source_id, top_k, db).await?;
    let candidate_count = candidates.len();

    let mut kept = Vec::new();
    for mut chunk in candidates {
        let Some(vector) = chunk.embedding_vector.as_deref() else {
            continue;
        };
        let similarity = cosine_similarity(query_embedding, vector);
        if similarity < threshold {
            continue;
        }

        match chunk.metadata.as_object_mut() {
            Some(map) => {
                map.insert(
                    "similarity_score".to_string(),
                    serde_json::Value::from(similarity),
                );
            }
            None => {
                chunk.metadata = serde_json::json!({ "similarity_score": similarity });
            }
        }
        kept.push(chunk);
        if kept.len() == top_k {
            break;
        }
    }

    debug!(
        candidates = candidate_count,
        kept = kept.len(),
        threshold,
        "vector search finished"
    );
    Ok(kept)
}

/// Embed the query (cache-aware) and delegate to `search_by_embedding`.
pub async fn search_by_text(
    llm: &LlmClient,
    db: &SurrealDbClient,
    query: &str,
    notebook_id: Option<&str>,
    source_id: Option<&str>,
    top_k: usize,
    threshold: f32,
) -> Result<Vec<Chunk>, AppError> {
    let embeddings = llm
        .generate_embeddings(&[query.to_string()], None, None)
        .await?;
    let query_embedding = embeddings
        .into_iter()
        .next()
        .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))?;

    search_by_embedding(db, &query_embedding, notebook_id, source_id, top_k, threshold).await
}
