//! Prompt Templates
//!
//! Story prompts are plain Markdown templates loaded from a directory, keyed
//! by file stem. Only their parameters matter to the pipeline: `{words}`,
//! `{topic}` and `{level}` are substituted from the [`GenerationRequest`].

use crate::content::GenerationRequest;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// Template key for the user prompt that asks for a story and quiz.
pub const STORY_PROMPT: &str = "generate_story";
/// Template key for the system prompt.
pub const SYSTEM_PROMPT: &str = "system";

const DEFAULT_SYSTEM: &str =
    "You are a helpful assistant that outputs raw JSON without markdown formatting.";

const DEFAULT_STORY: &str = "Write a short story for an English learner at the {level} level \
about {topic}. Naturally use these words and highlight each one in Markdown bold: {words}. \
Return a JSON object with the keys \"content\" (the story), \"translation\" (a Chinese \
translation), \"translation_map\" (each target word mapped to its meaning) and \"quiz\" \
(three questions, each with \"question\", \"options\" and an \"answer\" copied verbatim \
from the options).";

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: HashMap<String, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        let mut templates = HashMap::new();
        templates.insert(SYSTEM_PROMPT.to_string(), DEFAULT_SYSTEM.to_string());
        templates.insert(STORY_PROMPT.to_string(), DEFAULT_STORY.to_string());
        Self { templates }
    }
}

impl PromptTemplates {
    /// Loads every `*.md` file in `dir`. Missing templates keep their built-in defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut prompts = Self::default();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read prompts directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
                let key = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .context("Could not get file stem")?
                    .to_string();
                let content = std::fs::read_to_string(&path)?;
                prompts.templates.insert(key, content);
            }
        }
        Ok(prompts)
    }

    pub fn system(&self) -> &str {
        self.templates
            .get(SYSTEM_PROMPT)
            .map(String::as_str)
            .unwrap_or(DEFAULT_SYSTEM)
    }

    pub fn story(&self, request: &GenerationRequest) -> String {
        let template = self
            .templates
            .get(STORY_PROMPT)
            .map(String::as_str)
            .unwrap_or(DEFAULT_STORY);
        template
            .replace("{words}", &request.words.join(", "))
            .replace("{topic}", &request.topic)
            .replace("{level}", request.level.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{DifficultyLevel, GenerationParameters};

    fn request() -> GenerationRequest {
        let params = GenerationParameters::new(
            vec!["orbit".into(), "comet".into()],
            "Astronomy",
            DifficultyLevel::Pet,
        )
        .unwrap();
        GenerationRequest::from_parameters(&params)
    }

    #[test]
    fn test_default_story_prompt_substitutes_parameters() {
        let prompt = PromptTemplates::default().story(&request());
        assert!(prompt.contains("orbit, comet"));
        assert!(prompt.contains("Astronomy"));
        assert!(prompt.contains("PET"));
        assert!(!prompt.contains("{words}"));
    }

    #[test]
    fn test_load_overrides_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("generate_story.md"), "{topic}|{level}|{words}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let prompts = PromptTemplates::load(dir.path()).unwrap();
        assert_eq!(prompts.story(&request()), "Astronomy|PET|orbit, comet");
        assert_eq!(prompts.system(), DEFAULT_SYSTEM);
    }

    #[test]
    fn test_load_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PromptTemplates::load(&dir.path().join("absent")).is_err());
    }
}
