//! Content Model
//!
//! This module defines the generated learning content (a short story plus a
//! comprehension quiz), the parameters that produce it, and the parser that
//! turns the generator's accumulated text into a validated [`ContentItem`].
//! Content is either parsed and validated as a whole or rejected as a whole.

use crate::error::{ParameterError, ParseError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Target difficulty of the generated story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DifficultyLevel {
    #[serde(rename = "Primary School")]
    PrimarySchool,
    #[serde(rename = "KET")]
    Ket,
    #[serde(rename = "PET")]
    Pet,
    #[serde(rename = "Junior High")]
    JuniorHigh,
    #[serde(rename = "Senior High")]
    SeniorHigh,
    #[serde(rename = "Postgraduate")]
    Postgraduate,
}

impl DifficultyLevel {
    pub const ALL: [DifficultyLevel; 6] = [
        Self::PrimarySchool,
        Self::Ket,
        Self::Pet,
        Self::JuniorHigh,
        Self::SeniorHigh,
        Self::Postgraduate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimarySchool => "Primary School",
            Self::Ket => "KET",
            Self::Pet => "PET",
            Self::JuniorHigh => "Junior High",
            Self::SeniorHigh => "Senior High",
            Self::Postgraduate => "Postgraduate",
        }
    }
}

impl Default for DifficultyLevel {
    fn default() -> Self {
        Self::JuniorHigh
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DifficultyLevel {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParameterError::UnknownLevel(wanted.to_string()))
    }
}

/// What the caller currently wants generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub words: Vec<String>,
    pub topic: String,
    pub level: DifficultyLevel,
}

impl GenerationParameters {
    /// Builds a validated parameter set. The word set must be non-empty and unique.
    pub fn new(
        words: Vec<String>,
        topic: impl Into<String>,
        level: DifficultyLevel,
    ) -> Result<Self, ParameterError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(ParameterError::EmptyTopic);
        }
        if words.is_empty() {
            return Err(ParameterError::EmptyWords);
        }
        let mut seen = HashSet::new();
        for word in &words {
            if !seen.insert(word.as_str()) {
                return Err(ParameterError::DuplicateWord(word.clone()));
            }
        }
        Ok(Self {
            words,
            topic,
            level,
        })
    }

    /// Two parameter sets are consistent when topic and level match.
    /// Word sets are allowed to differ between randomized picks.
    pub fn is_consistent_with(&self, other: &GenerationParameters) -> bool {
        self.topic == other.topic && self.level == other.level
    }
}

/// An immutable request handed to a streaming source for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub topic: String,
    pub level: DifficultyLevel,
    pub words: Vec<String>,
    /// Distinguishes otherwise identical requests so upstream caches never replay a story.
    pub cache_key: Uuid,
}

impl GenerationRequest {
    pub fn from_parameters(params: &GenerationParameters) -> Self {
        Self {
            topic: params.topic.clone(),
            level: params.level,
            words: params.words.clone(),
            cache_key: Uuid::new_v4(),
        }
    }
}

/// Builds the concrete request for each generation attempt.
///
/// Implementations may re-pick the word set on every call so that background
/// refills do not keep producing stories around the same words.
pub trait RequestFactory: Send + Sync {
    fn build(&self, params: &GenerationParameters) -> GenerationRequest;
}

/// A `RequestFactory` that always uses the caller's own word set.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedWords;

impl RequestFactory for FixedWords {
    fn build(&self, params: &GenerationParameters) -> GenerationRequest {
        GenerationRequest::from_parameters(params)
    }
}

/// One multiple-choice comprehension question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

impl QuizQuestion {
    pub fn is_correct(&self, option: &str) -> bool {
        self.answer == option
    }

    pub fn offers(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    fn validate(&self, index: usize) -> Result<(), ParseError> {
        let invalid = |reason: &str| ParseError::InvalidQuestion {
            index,
            reason: reason.to_string(),
        };
        if self.question.trim().is_empty() {
            return Err(invalid("question text is empty"));
        }
        if self.options.len() < 2 {
            return Err(invalid("fewer than two options"));
        }
        if !self.offers(&self.answer) {
            return Err(invalid("answer is not one of the options"));
        }
        Ok(())
    }
}

/// A story plus quiz, ready for a session to consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Narrative text; target words are emphasized as `**word**`.
    pub content: String,
    pub translation: String,
    pub translation_map: BTreeMap<String, String>,
    pub quiz: Vec<QuizQuestion>,
}

/// Wire shape of the generator's document. `content` and `quiz` are required.
#[derive(Deserialize)]
struct RawDocument {
    content: Option<String>,
    #[serde(default)]
    translation: String,
    #[serde(default)]
    translation_map: BTreeMap<String, String>,
    quiz: Option<Vec<QuizQuestion>>,
    #[serde(default)]
    error: Option<String>,
}

impl ContentItem {
    /// Parses the complete accumulated generator output.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let body = strip_code_fences(raw);
        if body.is_empty() {
            return Err(ParseError::Empty);
        }
        let doc: RawDocument = serde_json::from_str(body)?;
        if let Some(message) = doc.error {
            return Err(ParseError::Reported(message));
        }
        let content = doc
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(ParseError::MissingField("content"))?;
        let quiz = doc
            .quiz
            .filter(|q| !q.is_empty())
            .ok_or(ParseError::MissingField("quiz"))?;
        for (index, question) in quiz.iter().enumerate() {
            question.validate(index)?;
        }
        Ok(Self {
            content,
            translation: doc.translation,
            translation_map: doc.translation_map,
            quiz,
        })
    }
}

/// Removes a leading ```` ```json ```` fence and a trailing ```` ``` ```` fence, if present.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}
