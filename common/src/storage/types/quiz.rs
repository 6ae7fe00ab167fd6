use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// One multiple-choice question as produced by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
}

stored_object!(Quiz, "quiz", {
    notebook_id: String,
    user_id: String,
    source_id: Option<String>,
    title: String,
    questions: Vec<QuizQuestion>,
    model: String,
    version: u32,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<DateTime<Utc>>
});

impl Quiz {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        notebook_id: String,
        user_id: String,
        source_id: Option<String>,
        title: String,
        questions: Vec<QuizQuestion>,
        model: String,
        version: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            notebook_id,
            user_id,
            source_id,
            title,
            questions,
            model,
            version,
            deleted_at: None,
        }
    }

    /// Monotonically increasing per-notebook version for newly persisted quizzes.
    pub async fn next_version(notebook_id: &str, db: &SurrealDbClient) -> Result<u32, AppError> {
        let max: Option<u32> = db
            .client
            .query("RETURN math::max((SELECT VALUE version FROM quiz WHERE notebook_id = $notebook_id))")
            .bind(("notebook_id", notebook_id.to_string()))
            .await?
            .take(0)?;
        Ok(max.unwrap_or(0) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> QuizQuestion {
        QuizQuestion {
            question: "What is A?".into(),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            correct_answer: "B".into(),
            explanation: "A is B.".into(),
        }
    }

    #[tokio::test]
    async fn test_version_increments_per_notebook() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let first_version = Quiz::next_version("nb", &db).await.expect("version");
        assert_eq!(first_version, 1);

        let quiz = Quiz::new(
            "nb".into(),
            "u".into(),
            None,
            "Quiz 1".into(),
            vec![question()],
            "gpt-4".into(),
            first_version,
        );
        db.store_item(quiz).await.expect("store");

        let second_version = Quiz::next_version("nb", &db).await.expect("version");
        assert_eq!(second_version, 2);

        // Other notebooks keep their own counter.
        let other = Quiz::next_version("nb_other", &db).await.expect("version");
        assert_eq!(other, 1);
    }
}
