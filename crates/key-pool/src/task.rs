//! Task-type tags used for key affinity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Feature a request belongs to. Tags with a configured affinity key make the
/// pool try that key first, keeping features from starving each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Notes,
    Flashcards,
    Quiz,
    #[serde(alias = "mind_map")]
    MindMap,
    Outline,
    Upload,
    /// No preference; always drawn from the shared pool
    General,
}

impl TaskType {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            TaskType::Notes => "notes",
            TaskType::Flashcards => "flashcards",
            TaskType::Quiz => "quiz",
            TaskType::MindMap => "mindmap",
            TaskType::Outline => "outline",
            TaskType::Upload => "upload",
            TaskType::General => "general",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
