use std::sync::Arc;

use common::{
    error::AppError,
    llm::{ChatMessage, LlmClient},
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::Chunk,
            conversation::{ChatMode, Conversation},
            message::{Message, MessageRole},
            notebook::Notebook,
        },
    },
    utils::config::AppConfig,
};
use tracing::{error, warn};

use crate::search;

/// Substituted for the assistant reply when the LLM call fails; the caller
/// never sees an error status for a chat turn.
const APOLOGY: &str = "I apologize, but I'm having trouble generating a response right now.";

/// Messages loaded from the conversation for context assembly.
const HISTORY_LOAD_LIMIT: usize = 10;
/// Prior messages actually forwarded to the model.
const HISTORY_PROMPT_LIMIT: usize = 5;

/// Rough chars-per-token estimate used for the notebook context budget.
const CHARS_PER_TOKEN: usize = 4;

fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    }
}

fn mode_system_prompt(mode: ChatMode) -> &'static str {
    match mode {
        ChatMode::Tutor => {
            "You are a study tutor. Break down complex topics step by step, use analogies and \
             relatable examples, and guide the user toward understanding with questions. \
             Celebrate progress and encourage critical thinking."
        }
        ChatMode::FactChecker => {
            "You are a fact checker. Verify claims rigorously, clearly separate confirmed facts \
             from opinions or uncertain claims, flag anything unverifiable and always note the \
             basis for your assessment."
        }
        ChatMode::Brainstormer => {
            "You are a brainstorming partner. Generate creative ideas, alternatives and \
             unexpected angles on the topic. Think laterally, challenge assumptions and \
             encourage the user to explore bold possibilities."
        }
        ChatMode::Chat => {
            "You are a helpful and intelligent learning assistant. Help the user learn and \
             understand complex topics: explain concepts clearly, provide examples and be \
             encouraging."
        }
    }
}

/// Conversation orchestration: retrieval-grounded and history-only chat.
pub struct ChatService {
    db: Arc<SurrealDbClient>,
    llm: LlmClient,
    config: AppConfig,
}

impl ChatService {
    pub fn new(db: Arc<SurrealDbClient>, llm: LlmClient, config: AppConfig) -> Self {
        Self { db, llm, config }
    }

    pub async fn create_conversation(
        &self,
        notebook_id: &str,
        user_id: &str,
        title: Option<String>,
        mode: ChatMode,
        source_id: Option<String>,
    ) -> Result<Conversation, AppError> {
        Notebook::get_owned(notebook_id, user_id, &self.db, false).await?;

        let conversation = Conversation::new(
            notebook_id.to_string(),
            user_id.to_string(),
            title,
            mode,
            source_id,
        );
        self.db.store_item(conversation.clone()).await?;
        Ok(conversation)
    }

    /// The RAG turn: retrieve grounding chunks for the query, generate a
    /// grounded reply and persist both messages with the chunk ids used.
    /// Retrieval failures degrade to a context-free answer; LLM failures
    /// degrade to a canned apology.
    #[tracing::instrument(skip_all, fields(conversation_id = %conversation_id))]
    pub async fn send_message_with_rag(
        &self,
        conversation_id: &str,
        user_id: &str,
        user_message: &str,
    ) -> Result<Message, AppError> {
        let (conversation, previous_messages) = tokio::try_join!(
            Conversation::get_for_user(conversation_id, user_id, &self.db),
            Message::recent_for_conversation(conversation_id, HISTORY_LOAD_LIMIT, &self.db),
        )?;

        let mut context_chunks: Vec<String> = Vec::new();
        let mut chunk_ids: Vec<String> = Vec::new();
        match search::search_by_text(
            &self.llm,
            &self.db,
            user_message,
            Some(&conversation.notebook_id),
            conversation.source_id.as_deref(),
            self.config.max_similarity_results,
            self.config.vector_search_threshold,
        )
        .await
        {
            Ok(chunks) => {
                let budget = self
                    .context_char_budget(&conversation.notebook_id, user_id)
                    .await;
                let kept = apply_context_budget(chunks, budget);
                chunk_ids = kept.iter().map(|c| c.id.clone()).collect();
                context_chunks = kept.into_iter().map(|c| c.plain_text).collect();
            }
            Err(err) => {
                warn!(error = %err, "retrieval failed, continuing without context");
            }
        }

        let context = context_chunks
            .iter()
            .enumerate()
            .map(|(i, text)| format!("[Chunk {}]: {}", i + 1, text))
            .collect::<Vec<String>>()
            .join("\n\n");

        let system_prompt = if context.is_empty() {
            "You are a helpful assistant. Answer questions clearly and concisely.".to_string()
        } else {
            format!(
                "You are a helpful assistant answering questions about the following content:\n\n\
                 {context}\n\n\
                 Answer based on the provided context. If the answer is not in the context, say \
                 so. Cite which chunk(s) you used when relevant."
            )
        };

        let mut messages_for_llm: Vec<ChatMessage> = Vec::new();
        let start = previous_messages.len().saturating_sub(HISTORY_PROMPT_LIMIT);
        for message in &previous_messages[start..] {
            messages_for_llm.push(ChatMessage {
                role: role_name(message.role).to_string(),
                content: message.content.clone(),
            });
        }
        messages_for_llm.push(ChatMessage::user(user_message));

        let assistant_response = match self
            .llm
            .generate_chat(&messages_for_llm, Some(&system_prompt), 0.7, 2_048)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                error!(error = %err, "chat generation failed, substituting apology");
                APOLOGY.to_string()
            }
        };

        let user_row = Message::new(
            conversation_id.to_string(),
            MessageRole::User,
            user_message.to_string(),
            chunk_ids.clone(),
            serde_json::json!({}),
        );
        let assistant_row = Message::new(
            conversation_id.to_string(),
            MessageRole::Assistant,
            assistant_response,
            chunk_ids,
            serde_json::json!({}),
        );

        Message::store_turn(user_row, assistant_row.clone(), &self.db).await?;

        Ok(assistant_row)
    }

    /// History-only turn with a system prompt chosen by conversation mode.
    #[tracing::instrument(skip_all, fields(conversation_id = %conversation_id))]
    pub async fn send_message_with_context(
        &self,
        conversation_id: &str,
        user_id: &str,
        user_message: &str,
    ) -> Result<Message, AppError> {
        let (conversation, previous_messages) = tokio::try_join!(
            Conversation::get_for_user(conversation_id, user_id, &self.db),
            Message::recent_for_conversation(conversation_id, HISTORY_LOAD_LIMIT, &self.db),
        )?;

        let system_prompt = mode_system_prompt(conversation.mode);

        let mut messages_for_llm: Vec<ChatMessage> = previous_messages
            .iter()
            .map(|message| ChatMessage {
                role: role_name(message.role).to_string(),
                content: message.content.clone(),
            })
            .collect();
        messages_for_llm.push(ChatMessage::user(user_message));

        let assistant_response = match self
            .llm
            .generate_chat(&messages_for_llm, Some(system_prompt), 0.7, 2_048)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                error!(error = %err, "chat generation failed, substituting apology");
                APOLOGY.to_string()
            }
        };

        let user_row = Message::new(
            conversation_id.to_string(),
            MessageRole::User,
            user_message.to_string(),
            Vec::new(),
            serde_json::json!({}),
        );
        let assistant_row = Message::new(
            conversation_id.to_string(),
            MessageRole::Assistant,
            assistant_response,
            Vec::new(),
            serde_json::json!({ "mode": conversation.mode }),
        );

        Message::store_turn(user_row, assistant_row.clone(), &self.db).await?;

        Ok(assistant_row)
    }

    pub async fn list_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Vec<Message>, AppError> {
        Conversation::get_for_user(conversation_id, user_id, &self.db).await?;
        Message::list_by_conversation(conversation_id, &self.db).await
    }

    /// Character budget for retrieved context, from the notebook's
    /// `max_context_tokens`. Falls back to an effectively unlimited budget
    /// when the notebook cannot be loaded.
    async fn context_char_budget(&self, notebook_id: &str, user_id: &str) -> usize {
        match Notebook::get_owned(notebook_id, user_id, &self.db, false).await {
            Ok(notebook) => (notebook.max_context_tokens as usize).saturating_mul(CHARS_PER_TOKEN),
            Err(_) => usize::MAX,
        }
    }
}

/// Stop appending chunks once the character budget is exceeded; the top
/// chunk is always kept so retrieval is never silently empty.
fn apply_context_budget(chunks: Vec<Chunk>, budget_chars: usize) -> Vec<Chunk> {
    let mut kept = Vec::new();
    let mut used = 0usize;
    for chunk in chunks {
        let cost = chunk.plain_text.len();
        if !kept.is_empty() && used.saturating_add(cost) > budget_chars {
            break;
        }
        used = used.saturating_add(cost);
        kept.push(chunk);
    }
    kept
}
