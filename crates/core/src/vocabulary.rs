//! Vocabulary
//!
//! Word lists per [`DifficultyLevel`] and the random word picks that feed
//! story generation. [`Vocabulary`] is also the production
//! [`RequestFactory`]: each attempt, background refills included, gets a
//! fresh word set for the caller's topic and level.

use crate::content::{DifficultyLevel, GenerationParameters, GenerationRequest, RequestFactory};
use crate::error::ParameterError;
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

const PRIMARY_SCHOOL: &[&str] = &[
    "apple", "banana", "cat", "dog", "elephant", "fish", "girl", "house", "ice", "juice", "kite",
    "lion", "monkey", "nose", "orange", "pencil", "queen", "rabbit", "snake", "tiger", "umbrella",
    "van", "water", "box", "yellow", "zoo", "book", "pen", "desk", "chair", "teacher", "student",
    "school", "bus", "car", "bike", "red", "blue", "green", "white",
];

const KET: &[&str] = &[
    "activity", "address", "afraid", "apartment", "appointment", "art", "assistant", "attractive",
    "aunt", "autumn", "available", "balloon", "barbecue", "baseball", "battery", "beach",
    "beginner", "believe", "bicycle", "biology", "biscuit", "blanket", "board", "boil", "bookshelf",
    "borrow", "boss", "bottle", "bowl", "bracelet",
];

const PET: &[&str] = &[
    "access", "accommodation", "accompany", "according", "account", "accurate", "accuse", "achieve",
    "achievement", "acid", "acknowledge", "acquire", "across", "act", "action", "active",
    "activist", "activity", "actor", "actress", "actual", "actually", "ad", "adapt", "add",
    "addition", "additional", "address", "administration", "admire",
];

const JUNIOR_HIGH: &[&str] = &[
    "ability", "abroad", "accept", "accident", "advantage", "advertisement", "advice", "afford",
    "afternoon", "agree", "aircraft", "airport", "alive", "allow", "alone", "although", "amazing",
    "among", "angry", "animal", "answer", "apologize", "area", "army", "arrive", "artist",
    "article", "asleep", "attack", "attend", "attention", "attract", "awake", "awful", "bamboo",
    "basket", "beautiful", "beginning", "birthday", "blackboard", "borrow", "brain", "breakfast",
    "breathe", "bridge", "bright", "broadcast", "building", "butterfly", "cabbage", "camera",
    "candle", "captain", "careful", "celebrate", "century", "challenge", "channel", "chemistry",
    "chocolate", "classmate", "clever", "comfortable", "competition", "computer", "concert",
    "confident", "conversation", "countryside", "culture", "customer", "dangerous", "decision",
    "delicious", "describe", "desert", "destroy", "detective", "dialogue", "dictionary",
    "difficult", "discover", "disease", "dragon", "drought", "dumpling", "dynasty",
];

const SENIOR_HIGH: &[&str] = &[
    "abandon", "ability", "abnormal", "aboard", "abolish", "abortion", "abrupt", "absence",
    "absent", "absolute", "absorb", "abstract", "absurd", "abundance", "abuse", "academic",
    "academy", "accelerate", "accent", "accept", "access", "accessible", "accommodation",
    "accompany", "accomplish", "account", "accountant", "accumulate", "accuracy", "accurate",
];

const POSTGRADUATE: &[&str] = &[
    "aberration", "abhor", "abide", "abject", "abjure", "ablution", "abnegate", "abode", "abolish",
    "abominable", "aboriginal", "abortive", "abound", "abrasive", "abridge", "abrogate",
    "abscission", "abscond", "absenteeism", "absolute",
];

#[derive(Debug, Clone)]
pub struct Vocabulary {
    lists: HashMap<DifficultyLevel, Vec<String>>,
    words_per_story: usize,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::builtin(5)
    }
}

impl Vocabulary {
    /// The bundled word lists.
    pub fn builtin(words_per_story: usize) -> Self {
        let lists = [
            (DifficultyLevel::PrimarySchool, PRIMARY_SCHOOL),
            (DifficultyLevel::Ket, KET),
            (DifficultyLevel::Pet, PET),
            (DifficultyLevel::JuniorHigh, JUNIOR_HIGH),
            (DifficultyLevel::SeniorHigh, SENIOR_HIGH),
            (DifficultyLevel::Postgraduate, POSTGRADUATE),
        ]
        .into_iter()
        .map(|(level, words)| (level, words.iter().map(|w| w.to_string()).collect()))
        .collect();
        Self {
            lists,
            words_per_story: words_per_story.max(1),
        }
    }

    /// Parses a `{ "<level name>": ["word", ...] }` document.
    pub fn from_json(json: &str, words_per_story: usize) -> Result<Self> {
        let raw: HashMap<String, Vec<String>> =
            serde_json::from_str(json).context("Vocabulary must be a map of level to word list")?;
        let mut lists = HashMap::new();
        for (name, words) in raw {
            let level: DifficultyLevel = name.parse()?;
            lists.insert(level, words);
        }
        Ok(Self {
            lists,
            words_per_story: words_per_story.max(1),
        })
    }

    /// Reads a vocabulary file in the [`Vocabulary::from_json`] format.
    pub fn load(path: &Path, words_per_story: usize) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vocabulary file {}", path.display()))?;
        Self::from_json(&json, words_per_story)
            .with_context(|| format!("Invalid vocabulary file {}", path.display()))
    }

    pub fn words_per_story(&self) -> usize {
        self.words_per_story
    }

    /// The list for `level`, falling back to Junior High when it is missing or empty.
    pub fn words(&self, level: DifficultyLevel) -> &[String] {
        match self.lists.get(&level) {
            Some(words) if !words.is_empty() => words,
            _ => self
                .lists
                .get(&DifficultyLevel::JuniorHigh)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        }
    }

    /// Up to `n` distinct words for `level`, in random order.
    pub fn pick(&self, level: DifficultyLevel, n: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut words: Vec<String> = self
            .words(level)
            .iter()
            .filter(|word| seen.insert(word.as_str()))
            .cloned()
            .collect();
        words.shuffle(&mut rand::rng());
        words.truncate(n);
        words
    }

    /// Parameters for a new round with a fresh word pick.
    pub fn parameters(
        &self,
        topic: impl Into<String>,
        level: DifficultyLevel,
    ) -> Result<GenerationParameters, ParameterError> {
        GenerationParameters::new(self.pick(level, self.words_per_story), topic, level)
    }
}

impl RequestFactory for Vocabulary {
    fn build(&self, params: &GenerationParameters) -> GenerationRequest {
        let mut words = self.pick(params.level, self.words_per_story);
        if words.is_empty() {
            words = params.words.clone();
        }
        debug!(level = %params.level, words = ?words, "Picked words for generation.");
        GenerationRequest {
            topic: params.topic.clone(),
            level: params.level,
            words,
            cache_key: Uuid::new_v4(),
        }
    }
}
