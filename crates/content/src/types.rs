//! Typed outputs of the generation endpoints

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::parse::{lenient_optional_string, lenient_string, lenient_u32};

/// Study notes: a markdown analysis plus the topics it covers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notes {
    #[serde(default)]
    pub analysis: String,
    #[serde(default, alias = "keyTopics")]
    pub key_topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    #[serde(
        alias = "term",
        alias = "question",
        deserialize_with = "lenient_string"
    )]
    pub front: String,
    #[serde(
        alias = "definition",
        alias = "answer",
        deserialize_with = "lenient_string"
    )]
    pub back: String,
}

/// Requested mix of quiz question formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizKind {
    #[default]
    Mixed,
    Mcq,
    TrueFalse,
    FillBlank,
}

impl QuizKind {
    /// Name used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mixed => "mixed",
            Self::Mcq => "MCQ",
            Self::TrueFalse => "TRUE_FALSE",
            Self::FillBlank => "FILL_BLANK",
        }
    }
}

impl fmt::Display for QuizKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    #[serde(alias = "question", deserialize_with = "lenient_string")]
    pub question_text: String,
    /// `MCQ`, `TRUE_FALSE` or `FILL_BLANK`, as the model reported it
    #[serde(default, alias = "type", deserialize_with = "lenient_string")]
    pub question_type: String,
    /// Choices for multiple-choice questions
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default, alias = "answer", deserialize_with = "lenient_string")]
    pub correct_answer: String,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub difficulty: Option<String>,
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMap {
    #[serde(default, alias = "centralTopic")]
    pub central_topic: String,
    #[serde(default)]
    pub nodes: Vec<MindMapNode>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl MindMap {
    pub fn is_empty(&self) -> bool {
        self.central_topic.is_empty() && self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMapNode {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub label: String,
    /// 1 for top-level branches, increasing with depth
    #[serde(default, deserialize_with = "lenient_u32")]
    pub level: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_optional_string"
    )]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(deserialize_with = "lenient_string")]
    pub from: String,
    #[serde(deserialize_with = "lenient_string")]
    pub to: String,
}

/// Timed plan for one lecture. Durations are minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LectureOutline {
    pub topic: String,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    pub sections: Vec<OutlineSection>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub summary_duration: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub qa_duration: u32,
}

impl LectureOutline {
    /// Sum of section, summary and Q&A durations, saturating at `u32::MAX`.
    pub fn total_minutes(&self) -> u32 {
        self.sections
            .iter()
            .map(|s| s.duration)
            .fold(self.summary_duration, u32::saturating_add)
            .saturating_add(self.qa_duration)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub title: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub duration: u32,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub activities: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}
