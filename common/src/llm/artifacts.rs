use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::types::quiz::QuizQuestion;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MindmapFormat {
    Json,
    Mermaid,
    Markdown,
}

impl std::str::FromStr for MindmapFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "mermaid" => Ok(Self::Mermaid),
            "markdown" => Ok(Self::Markdown),
            other => Err(format!("Unknown mindmap format: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MindmapNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub children: Vec<MindmapNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mindmap {
    pub root: MindmapNode,
}

impl Mindmap {
    /// The structure returned when the model output cannot be parsed.
    pub fn fallback() -> Self {
        Self {
            root: MindmapNode {
                id: "root".to_string(),
                label: "Content Analysis".to_string(),
                children: Vec::new(),
            },
        }
    }
}

/// A generated mindmap: a tree for the json format, raw text otherwise.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MindmapArtifact {
    Tree(Mindmap),
    Text { content: String },
}

/// Strip a markdown code fence wrapper if present, preferring ```json.
pub fn extract_json_block(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(rest) = trimmed.split_once("```json").map(|(_, rest)| rest) {
        if let Some((inner, _)) = rest.split_once("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.split_once("```").map(|(_, rest)| rest) {
        if let Some((inner, _)) = rest.split_once("```") {
            return inner.trim();
        }
    }
    trimmed
}

/// Parse quiz questions; malformed output degrades to an empty list rather
/// than an error. A single object is accepted and wrapped.
pub fn parse_quiz_questions(raw: &str) -> Vec<QuizQuestion> {
    let block = extract_json_block(raw);

    if let Ok(questions) = serde_json::from_str::<Vec<QuizQuestion>>(block) {
        return questions;
    }
    if let Ok(single) = serde_json::from_str::<QuizQuestion>(block) {
        return vec![single];
    }

    let preview: String = raw.chars().take(120).collect();
    warn!(%preview, "quiz response was not valid JSON, returning empty quiz");
    Vec::new()
}

/// Parse a mindmap tree; malformed output degrades to the fallback root.
pub fn parse_mindmap(raw: &str) -> Mindmap {
    let block = extract_json_block(raw);
    serde_json::from_str::<Mindmap>(block).unwrap_or_else(|e| {
        warn!(error = %e, "mindmap response was not valid JSON, using fallback");
        Mindmap::fallback()
    })
}

/// Map a user-facing difficulty label to the phrase fed to the model.
/// Supports the current vocabulary and legacy aliases.
pub fn resolve_difficulty(difficulty: &str) -> &'static str {
    match difficulty.to_ascii_lowercase().as_str() {
        "novice" => "easy (introductory, core definitions and broad concepts)",
        "intermediate" | "medium" => "intermediate (relationships between ideas, process-based questions)",
        "master" | "hard" => "advanced (deep inference, complex synthesis, expert-level reasoning)",
        "easy" => "easy (introductory)",
        _ => "intermediate (relationships between ideas, process-based questions)",
    }
}

pub fn quiz_prompt(content: &str, num_questions: u32, difficulty: &str) -> String {
    let difficulty_label = resolve_difficulty(difficulty);
    format!(
        r#"Generate {num_questions} quiz questions at {difficulty_label} difficulty based on the following content.

Content:
{content}

Format each question as JSON with:
- question: The question text
- options: Array of 4 options [A, B, C, D]
- correct_answer: The correct option letter (A, B, C, or D)
- explanation: Brief explanation of the correct answer

Return only a JSON array of questions, no other text."#
    )
}

pub fn summary_prompt(content: &str, max_length: usize, style: &str) -> String {
    let style_instruction = match style {
        "detailed" => "Provide a comprehensive, detailed summary covering all major points",
        "bullet_points" => "Provide a summary in bullet point format with key points",
        _ => "Provide a brief, concise summary",
    };
    format!(
        "{style_instruction} of the following content in approximately {max_length} characters.\n\nContent:\n{content}\n\nSummary:"
    )
}

pub fn study_guide_prompt(content: &str, topic: Option<&str>, format: &str) -> String {
    let format_instruction = match format {
        "outline" => {
            "Create a detailed outline format with hierarchical structure using headings and subheadings."
        }
        "detailed" => {
            "Create a comprehensive, detailed study guide with in-depth explanations and examples."
        }
        _ => {
            "Create a well-structured study guide with clear sections, headings, key concepts and definitions."
        }
    };
    let topic_part = topic.map(|t| format!(" about '{t}'")).unwrap_or_default();
    format!("{format_instruction} Build the study guide{topic_part} from the following content.\n\nContent:\n{content}\n\nStudy Guide:")
}

pub fn mindmap_prompt(content: &str, format: MindmapFormat) -> String {
    let format_instruction = match format {
        MindmapFormat::Json => {
            r#"Return a JSON object with hierarchical structure:
{"root": {"id": "root", "label": "Main Topic", "children": [{"id": "node1", "label": "Subtopic", "children": []}]}}"#
        }
        MindmapFormat::Mermaid => {
            "Return Mermaid diagram syntax for a mindmap. Use 'graph TD' or 'mindmap' format."
        }
        MindmapFormat::Markdown => {
            "Return a markdown-formatted hierarchical list with proper indentation."
        }
    };
    format!(
        "Analyze the following content and create a mindmap.\n\nContent:\n{content}\n\n{format_instruction}\n\nReturn only the requested output, no additional explanation."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_fenced_block() {
        let raw = "Here you go:\n```json\n[{\"a\": 1}]\n```\nEnjoy!";
        assert_eq!(extract_json_block(raw), "[{\"a\": 1}]");
    }

    #[test]
    fn extracts_json_from_anonymous_fence() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_block(raw), "{\"a\": 1}");
    }

    #[test]
    fn passes_through_unfenced_text() {
        assert_eq!(extract_json_block("  [1, 2]  "), "[1, 2]");
    }

    #[test]
    fn quiz_parse_accepts_array_and_single_object() {
        let array = r#"[{"question":"Q?","options":["a","b","c","d"],"correct_answer":"A"}]"#;
        assert_eq!(parse_quiz_questions(array).len(), 1);

        let single = r#"{"question":"Q?","options":["a","b","c","d"],"correct_answer":"B"}"#;
        let parsed = parse_quiz_questions(single);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].correct_answer, "B");
    }

    #[test]
    fn quiz_parse_degrades_to_empty_on_garbage() {
        assert!(parse_quiz_questions("the model rambled instead").is_empty());
    }

    #[test]
    fn mindmap_parse_degrades_to_fallback() {
        let parsed = parse_mindmap("not json at all");
        assert_eq!(parsed, Mindmap::fallback());

        let fenced = r#"```json
{"root":{"id":"root","label":"Topic","children":[{"id":"n1","label":"Sub"}]}}
```"#;
        let tree = parse_mindmap(fenced);
        assert_eq!(tree.root.children.len(), 1);
        assert_eq!(tree.root.children[0].label, "Sub");
    }

    #[test]
    fn difficulty_map_handles_current_and_legacy_names() {
        assert!(resolve_difficulty("novice").starts_with("easy"));
        assert!(resolve_difficulty("master").starts_with("advanced"));
        assert!(resolve_difficulty("HARD").starts_with("advanced"));
        assert!(resolve_difficulty("medium").starts_with("intermediate"));
        assert!(resolve_difficulty("unknown").starts_with("intermediate"));
    }
}
