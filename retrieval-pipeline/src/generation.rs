use std::sync::Arc;

use common::{
    error::AppError,
    llm::{LlmClient, MindmapArtifact, MindmapFormat},
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::Chunk,
            generation_history::GenerationHistory,
            notebook::Notebook,
            quiz::Quiz,
            source::{Source, SourceStatus},
            study_guide::StudyGuide,
        },
    },
};
use tracing::info;

/// What a derived artifact is generated from.
#[derive(Debug, Clone)]
pub enum GenerationTarget {
    Source(String),
    Notebook(String),
}

struct ResolvedTarget {
    notebook_id: String,
    source_id: Option<String>,
    title: String,
    content: String,
}

/// Derived artifacts (summary, quiz, study guide, mindmap) built from the
/// chunks of a source or a whole notebook, persisted with a model tag and
/// an incrementing version, and recorded in the generation history.
pub struct GenerationService {
    db: Arc<SurrealDbClient>,
    llm: LlmClient,
}

impl GenerationService {
    pub fn new(db: Arc<SurrealDbClient>, llm: LlmClient) -> Self {
        Self { db, llm }
    }

    pub async fn generate_summary(
        &self,
        target: GenerationTarget,
        user_id: &str,
        max_length: usize,
        style: &str,
    ) -> Result<String, AppError> {
        let resolved = self.resolve(&target, user_id).await?;
        let summary = self
            .llm
            .generate_summary(&resolved.content, max_length, style)
            .await?;

        self.record(
            &resolved,
            user_id,
            "summary",
            format!("Summary: {}", resolved.title),
            summary.clone(),
            serde_json::json!({ "style": style, "max_length": max_length }),
        )
        .await?;

        Ok(summary)
    }

    pub async fn generate_quiz(
        &self,
        target: GenerationTarget,
        user_id: &str,
        num_questions: u32,
        difficulty: &str,
    ) -> Result<Quiz, AppError> {
        let resolved = self.resolve(&target, user_id).await?;
        let questions = self
            .llm
            .generate_quiz(&resolved.content, num_questions, difficulty)
            .await?;

        let version = Quiz::next_version(&resolved.notebook_id, &self.db).await?;
        let quiz = Quiz::new(
            resolved.notebook_id.clone(),
            user_id.to_string(),
            resolved.source_id.clone(),
            format!("Quiz: {}", resolved.title),
            questions,
            self.llm.model().to_string(),
            version,
        );
        self.db.store_item(quiz.clone()).await?;
        info!(quiz_id = %quiz.id, version, "quiz persisted");

        self.record(
            &resolved,
            user_id,
            "quiz",
            quiz.title.clone(),
            serde_json::to_string(&quiz.questions).unwrap_or_default(),
            serde_json::json!({ "difficulty": difficulty, "num_questions": num_questions }),
        )
        .await?;

        Ok(quiz)
    }

    pub async fn generate_study_guide(
        &self,
        target: GenerationTarget,
        user_id: &str,
        topic: Option<&str>,
        format: &str,
    ) -> Result<StudyGuide, AppError> {
        let resolved = self.resolve(&target, user_id).await?;
        let content = self
            .llm
            .generate_study_guide(&resolved.content, topic, format)
            .await?;

        let version = StudyGuide::next_version(&resolved.notebook_id, &self.db).await?;
        let guide = StudyGuide::new(
            resolved.notebook_id.clone(),
            user_id.to_string(),
            resolved.source_id.clone(),
            format!("Study guide: {}", resolved.title),
            content,
            format.to_string(),
            self.llm.model().to_string(),
            version,
        );
        self.db.store_item(guide.clone()).await?;

        self.record(
            &resolved,
            user_id,
            "study_guide",
            guide.title.clone(),
            guide.content.clone(),
            serde_json::json!({ "format": format, "topic": topic }),
        )
        .await?;

        Ok(guide)
    }

    pub async fn generate_mindmap(
        &self,
        target: GenerationTarget,
        user_id: &str,
        format: MindmapFormat,
    ) -> Result<MindmapArtifact, AppError> {
        let resolved = self.resolve(&target, user_id).await?;
        let artifact = self.llm.generate_mindmap(&resolved.content, format).await?;

        self.record(
            &resolved,
            user_id,
            "mindmap",
            format!("Mindmap: {}", resolved.title),
            serde_json::to_string(&artifact).unwrap_or_default(),
            serde_json::json!({ "format": format }),
        )
        .await?;

        Ok(artifact)
    }

    /// Mindmap from free text, not tied to any notebook.
    pub async fn generate_mindmap_from_text(
        &self,
        user_id: &str,
        text: &str,
        format: MindmapFormat,
    ) -> Result<MindmapArtifact, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("Text must not be empty".to_string()));
        }

        let artifact = self.llm.generate_mindmap(text, format).await?;

        GenerationHistory::new(
            user_id.to_string(),
            None,
            "mindmap".to_string(),
            "Mindmap from text".to_string(),
            serde_json::to_string(&artifact).unwrap_or_default(),
            None,
            serde_json::json!({ "format": format }),
        )
        .record(&self.db)
        .await?;

        Ok(artifact)
    }

    /// Authorize the target and gather its text: the ordered chunk bodies of
    /// one source, or of every completed source in the notebook.
    async fn resolve(
        &self,
        target: &GenerationTarget,
        user_id: &str,
    ) -> Result<ResolvedTarget, AppError> {
        match target {
            GenerationTarget::Source(source_id) => {
                let source = Source::get(source_id, &self.db)
                    .await?
                    .filter(|s| s.deleted_at.is_none())
                    .ok_or_else(|| {
                        AppError::NotFound(format!("Source {source_id} not found"))
                    })?;
                // Ownership goes through the notebook.
                Notebook::get_owned(&source.notebook_id, user_id, &self.db, false).await?;

                if source.status != SourceStatus::Completed {
                    return Err(AppError::Validation(
                        "Source has not finished processing".to_string(),
                    ));
                }

                let chunks = Chunk::list_by_source(source_id, &self.db).await?;
                let content = join_chunks(&chunks);
                if content.trim().is_empty() {
                    return Err(AppError::Validation(
                        "Source has no extracted content".to_string(),
                    ));
                }

                Ok(ResolvedTarget {
                    notebook_id: source.notebook_id,
                    source_id: Some(source.id),
                    title: source.title,
                    content,
                })
            }
            GenerationTarget::Notebook(notebook_id) => {
                let notebook = Notebook::get_owned(notebook_id, user_id, &self.db, false).await?;

                let sources = Source::list_by_notebook(notebook_id, &self.db).await?;
                let mut content = String::new();
                for source in sources
                    .iter()
                    .filter(|s| s.status == SourceStatus::Completed)
                {
                    let chunks = Chunk::list_by_source(&source.id, &self.db).await?;
                    if !content.is_empty() {
                        content.push_str("\n\n");
                    }
                    content.push_str(&join_chunks(&chunks));
                }

                if content.trim().is_empty() {
                    return Err(AppError::Validation(
                        "Notebook has no processed sources".to_string(),
                    ));
                }

                Ok(ResolvedTarget {
                    notebook_id: notebook.id,
                    source_id: None,
                    title: notebook.title,
                    content,
                })
            }
        }
    }

    async fn record(
        &self,
        resolved: &ResolvedTarget,
        user_id: &str,
        history_type: &str,
        title: String,
        content: String,
        metadata: serde_json::Value,
    ) -> Result<(), AppError> {
        GenerationHistory::new(
            user_id.to_string(),
            Some(resolved.notebook_id.clone()),
            history_type.to_string(),
            title,
            content,
            resolved.source_id.clone(),
            metadata,
        )
        .record(&self.db)
        .await
    }
}

fn join_chunks(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.plain_text.as_str())
        .collect::<Vec<&str>>()
        .join("\n")
}
