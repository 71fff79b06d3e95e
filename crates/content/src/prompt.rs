//! Prompt text for each endpoint

use crate::types::QuizKind;

/// Characters of source material sent for notes.
pub const NOTES_CONTENT_LIMIT: usize = 8000;

/// Characters of source material sent for flashcards, quizzes and mind maps.
pub const CONTENT_LIMIT: usize = 6000;

const EDUCATOR: &str = "You are an expert educator.";

/// Source material as it appears in a prompt.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Material<'a> {
    Inline(&'a str),
    /// Content lives in the attached uploaded document
    Attached,
}

impl Material<'_> {
    fn section(&self) -> String {
        match self {
            Self::Inline(text) => format!("Content:\n{text}"),
            Self::Attached => "Content: the attached document.".to_string(),
        }
    }
}

/// A prompt and the system instruction that goes with it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Prompt {
    pub system: String,
    pub text: String,
}

/// At most `max` characters of `text`, cut on a character boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Join extracted page texts into one body with page markers.
pub fn join_chunks(chunks: &[String]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| (i + 1, chunk.trim()))
        .filter(|(_, chunk)| !chunk.is_empty())
        .map(|(page, chunk)| format!("--- Page {page} ---\n{chunk}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn topic_line(topic: Option<&str>) -> String {
    topic
        .filter(|t| !t.trim().is_empty())
        .map(|t| format!("Topic: {}\n\n", t.trim()))
        .unwrap_or_default()
}

pub(crate) fn notes(material: Material<'_>, topic: Option<&str>) -> Prompt {
    Prompt {
        system: format!(
            "{EDUCATOR} You create clear, concise study notes. Return only valid JSON."
        ),
        text: format!(
            "Create concise, well-structured short notes from the following content.\n\n\
             {topic}{material}\n\n\
             Instructions:\n\
             1. Use markdown headings and bullet points\n\
             2. Highlight key concepts and definitions\n\
             3. Organize information logically\n\
             4. Keep it comprehensive but brief\n\n\
             Return ONLY a valid JSON object in this format:\n\
             {{\"analysis\": \"markdown notes\", \"keyTopics\": [\"topic\", ...]}}",
            topic = topic_line(topic),
            material = material.section(),
        ),
    }
}

pub(crate) fn flashcards(material: Material<'_>, count: usize) -> Prompt {
    Prompt {
        system: format!(
            "{EDUCATOR} Return only valid JSON with a 'flashcards' array."
        ),
        text: format!(
            "Create {count} flashcards from the following content.\n\n\
             {material}\n\n\
             Instructions:\n\
             1. Create question-answer pairs\n\
             2. Questions should test understanding, not just recall\n\
             3. Answers should be concise but complete\n\
             4. Cover key concepts and important details\n\n\
             Return ONLY a valid JSON object in this format:\n\
             {{\"flashcards\": [{{\"front\": \"question\", \"back\": \"answer\"}}, ...]}}",
            material = material.section(),
        ),
    }
}

pub(crate) fn quiz(material: Material<'_>, count: usize, kind: QuizKind) -> Prompt {
    Prompt {
        system: format!("{EDUCATOR} Return only valid JSON."),
        text: format!(
            "Create {count} quiz questions from the following content.\n\n\
             {material}\n\n\
             Question Type: {kind} (MCQ, TRUE_FALSE, FILL_BLANK, or mixed)\n\n\
             Instructions:\n\
             1. For MCQ provide 4 options with one correct answer\n\
             2. For TRUE_FALSE provide a statement and the answer\n\
             3. For FILL_BLANK provide a sentence with a blank and the answer\n\
             4. Include a difficulty level (EASY, MEDIUM, HARD)\n\n\
             Return ONLY a valid JSON object with a \"questions\" array. Each question has:\n\
             question_text, question_type, options (array or null), correct_answer, \
             difficulty, explanation (optional)",
            material = material.section(),
        ),
    }
}

pub(crate) fn mind_map(material: Material<'_>, topic: Option<&str>) -> Prompt {
    Prompt {
        system: format!("{EDUCATOR} Return only valid JSON."),
        text: format!(
            "Create a mind map structure from the following content.\n\n\
             {topic}{material}\n\n\
             Instructions:\n\
             1. Identify main topics and subtopics\n\
             2. Create a hierarchical structure\n\
             3. Show relationships between concepts\n\n\
             Return ONLY a valid JSON object with this structure:\n\
             {{\"central_topic\": \"main topic\", \
             \"nodes\": [{{\"id\": \"1\", \"label\": \"topic\", \"level\": 1}}, \
             {{\"id\": \"2\", \"label\": \"subtopic\", \"level\": 2, \"parent\": \"1\"}}], \
             \"connections\": [{{\"from\": \"1\", \"to\": \"2\"}}]}}",
            topic = topic_line(topic),
            material = material.section(),
        ),
    }
}

pub(crate) fn lecture_outline(topic: &str, duration_minutes: u32, level: &str) -> Prompt {
    Prompt {
        system: format!("{EDUCATOR} Return only valid JSON."),
        text: format!(
            "Create a comprehensive lecture outline.\n\n\
             Topic: {topic}\n\
             Duration: {duration_minutes} minutes\n\
             Level: {level}\n\n\
             Instructions:\n\
             1. Include learning objectives\n\
             2. Break the lecture into sections with time allocation\n\
             3. List key points, activities and examples per section\n\
             4. Reserve time for a summary and Q&A\n\n\
             Return ONLY a valid JSON object with this structure:\n\
             {{\"topic\": \"topic name\", \"learning_objectives\": [\"objective\"], \
             \"sections\": [{{\"title\": \"section title\", \"duration\": 10, \
             \"key_points\": [\"point\"], \"activities\": [\"activity\"], \
             \"examples\": [\"example\"]}}], \"summary_duration\": 5, \"qa_duration\": 5}}"
        ),
    }
}
