//! Study-material generation on top of the key-pool dispatcher
//!
//! `ContentGenerator` turns a request (notes, flashcards, quiz, mind map,
//! lecture outline) into one dispatcher call and decodes the model's reply
//! with a tolerant parser.

pub mod error;
pub mod generator;
pub mod parse;
pub mod prompt;
pub mod types;

pub use error::{Error, Result};
pub use generator::{
    ContentGenerator, DEFAULT_FLASHCARD_COUNT, DEFAULT_LECTURE_LEVEL, DEFAULT_LECTURE_MINUTES,
    DEFAULT_QUIZ_COUNT, GenerationSettings, Source,
};
pub use parse::{parse_lenient, strip_code_fence};
pub use types::{
    Connection, Flashcard, LectureOutline, MindMap, MindMapNode, Notes, OutlineSection, QuizKind,
    QuizQuestion,
};
