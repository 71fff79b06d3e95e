//! Domain requests to one dispatch each
//!
//! Every endpoint builds a prompt, issues exactly one dispatcher call
//! (rotating for inline text, sticky for an uploaded document) and decodes the
//! reply. Flashcards, quizzes and mind maps degrade to an empty result when the
//! reply is unreadable. Notes and lecture outlines fail with `Error::Parse`.

use std::path::Path;
use std::sync::Arc;

use key_pool::{Dispatcher, StickyHandle, StickySession, TaskType};
use provider::{GenerativeClient, Payload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::parse::{parse_lenient, strip_code_fence};
use crate::prompt::{self, CONTENT_LIMIT, Material, NOTES_CONTENT_LIMIT, Prompt};
use crate::types::{Flashcard, LectureOutline, MindMap, Notes, QuizKind, QuizQuestion};

pub const DEFAULT_FLASHCARD_COUNT: usize = 10;
pub const DEFAULT_QUIZ_COUNT: usize = 10;
pub const DEFAULT_LECTURE_MINUTES: u32 = 60;
pub const DEFAULT_LECTURE_LEVEL: &str = "intermediate";

/// Model parameters sent with every request.
///
/// Deserializes from the `[generation]` table of the service config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    2000
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Where the material for a request comes from.
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    /// Extracted text
    Text(&'a str),
    /// Per-page extracted text, joined into one prompt
    Chunks(&'a [String]),
    /// A document uploaded through `ContentGenerator::upload`
    Upload(&'a StickyHandle),
}

pub struct ContentGenerator {
    dispatcher: Arc<Dispatcher>,
    client: Arc<dyn GenerativeClient>,
    sessions: StickySession,
    settings: GenerationSettings,
}

impl ContentGenerator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        client: Arc<dyn GenerativeClient>,
        settings: GenerationSettings,
    ) -> Self {
        let sessions = StickySession::new(dispatcher.clone(), client.clone());
        Self {
            dispatcher,
            client,
            sessions,
            settings,
        }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Upload a document and wait until it can be referenced by `Source::Upload`.
    pub async fn upload(&self, document: &Path) -> Result<StickyHandle> {
        Ok(self.sessions.open(document).await?)
    }

    /// Study notes. Plain-text replies are kept as the analysis.
    pub async fn notes(&self, source: Source<'_>, topic: Option<&str>) -> Result<Notes> {
        let raw = self
            .run(TaskType::Notes, source, NOTES_CONTENT_LIMIT, |m| {
                prompt::notes(m, topic)
            })
            .await?;

        if let Some(value) = parse_lenient(&raw).filter(Value::is_object)
            && let Ok(notes) = serde_json::from_value::<Notes>(value)
            && !notes.analysis.trim().is_empty()
        {
            return Ok(notes);
        }

        let text = strip_code_fence(&raw);
        if text.is_empty() {
            warn!(task = "notes", "empty model response");
            return Err(Error::Parse("notes".into()));
        }
        debug!(
            task = "notes",
            "response is not JSON, using it as the analysis"
        );
        Ok(Notes {
            analysis: text.to_string(),
            key_topics: Vec::new(),
        })
    }

    pub async fn flashcards(&self, source: Source<'_>, count: usize) -> Result<Vec<Flashcard>> {
        let raw = self
            .run(TaskType::Flashcards, source, CONTENT_LIMIT, |m| {
                prompt::flashcards(m, count)
            })
            .await?;
        Ok(decode_list(&raw, "flashcards", &["flashcards", "cards"]))
    }

    pub async fn quiz(
        &self,
        source: Source<'_>,
        count: usize,
        kind: QuizKind,
    ) -> Result<Vec<QuizQuestion>> {
        let raw = self
            .run(TaskType::Quiz, source, CONTENT_LIMIT, |m| {
                prompt::quiz(m, count, kind)
            })
            .await?;
        Ok(decode_list(&raw, "quiz", &["questions"]))
    }

    pub async fn mind_map(&self, source: Source<'_>, topic: Option<&str>) -> Result<MindMap> {
        let raw = self
            .run(TaskType::MindMap, source, CONTENT_LIMIT, |m| {
                prompt::mind_map(m, topic)
            })
            .await?;
        Ok(decode::<MindMap>(&raw).unwrap_or_else(|| {
            warn!(
                task = "mindmap",
                response_len = raw.len(),
                "unreadable response, returning empty mind map"
            );
            MindMap::default()
        }))
    }

    /// Lecture plan for a topic. No source material; the model works from the topic.
    pub async fn lecture_outline(
        &self,
        topic: &str,
        duration_minutes: u32,
        level: &str,
    ) -> Result<LectureOutline> {
        let prompt = prompt::lecture_outline(topic, duration_minutes, level);
        let raw = self.rotating(TaskType::Outline, prompt).await?;
        decode::<LectureOutline>(&raw).ok_or_else(|| {
            warn!(
                task = "outline",
                response_len = raw.len(),
                "unreadable response"
            );
            Error::Parse("lecture outline".into())
        })
    }

    /// Build the prompt for `source` and issue the single dispatcher call.
    async fn run(
        &self,
        task: TaskType,
        source: Source<'_>,
        limit: usize,
        build: impl FnOnce(Material<'_>) -> Prompt,
    ) -> Result<String> {
        match source {
            Source::Text(text) => {
                let prompt = build(Material::Inline(prompt::truncate_chars(text, limit)));
                self.rotating(task, prompt).await
            }
            Source::Chunks(chunks) => {
                let joined = prompt::join_chunks(chunks);
                let prompt = build(Material::Inline(prompt::truncate_chars(&joined, limit)));
                self.rotating(task, prompt).await
            }
            Source::Upload(handle) => {
                let payload = self.payload(build(Material::Attached));
                Ok(self.sessions.call(handle, &payload).await?)
            }
        }
    }

    async fn rotating(&self, task: TaskType, prompt: Prompt) -> Result<String> {
        let payload = self.payload(prompt);
        let payload = &payload;
        let client = &self.client;
        Ok(self
            .dispatcher
            .dispatch(task, |key| async move { client.call(&key, payload).await })
            .await?)
    }

    fn payload(&self, prompt: Prompt) -> Payload {
        Payload {
            model: self.settings.model.clone(),
            system_instruction: Some(prompt.system),
            prompt: prompt.text,
            attachment: None,
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        }
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(parse_lenient(raw)?).ok()
}

/// Items of a list reply: a bare array, an array under one of `keys`, or the
/// first array field of an object. Items that do not decode are skipped.
fn decode_list<T: DeserializeOwned>(raw: &str, task: &str, keys: &[&str]) -> Vec<T> {
    let items = match parse_lenient(raw) {
        Some(Value::Array(items)) => items,
        Some(Value::Object(mut fields)) => keys
            .iter()
            .find_map(|key| match fields.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .or_else(|| {
                fields.into_iter().find_map(|(_, value)| match value {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
            })
            .unwrap_or_default(),
        _ => {
            warn!(
                task,
                response_len = raw.len(),
                "unreadable response, returning empty list"
            );
            return Vec::new();
        }
    };

    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if decoded.len() < total {
        debug!(
            task,
            skipped = total - decoded.len(),
            "dropped malformed items"
        );
    }
    decoded
}
