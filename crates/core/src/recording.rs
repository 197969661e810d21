//! Recording Interface
//!
//! Learning records and quiz scores are persisted by an external backend.
//! Calls are fire-and-forget: [`dispatch`] runs them on a background task,
//! logs failures and never retries. Quiz flow does not depend on the outcome.

use crate::content::DifficultyLevel;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A target word together with its meaning, as shown to the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedWord {
    pub word: String,
    pub meaning: String,
}

/// The persistence backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn record_learning(
        &self,
        words: Vec<LearnedWord>,
        level: DifficultyLevel,
        topic: String,
    ) -> Result<()>;

    async fn submit_score(&self, points: u32, level: DifficultyLevel, topic: String) -> Result<()>;
}

/// The persistence calls a completed round asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistencePlan {
    pub record: Option<Vec<LearnedWord>>,
    pub score: Option<u32>,
    pub level: DifficultyLevel,
    pub topic: String,
}

impl PersistencePlan {
    pub fn is_empty(&self) -> bool {
        self.record.is_none() && self.score.is_none()
    }
}

/// Runs the calls in `plan` on a background task.
pub fn dispatch(recorder: Arc<dyn Recorder>, plan: PersistencePlan) -> JoinHandle<()> {
    tokio::spawn(async move {
        let PersistencePlan {
            record,
            score,
            level,
            topic,
        } = plan;
        if let Some(words) = record {
            let count = words.len();
            match recorder.record_learning(words, level, topic.clone()).await {
                Ok(()) => info!(words = count, %level, %topic, "Learning record saved."),
                Err(e) => warn!(error = %e, %level, %topic, "Failed to save learning record."),
            }
        }
        if let Some(points) = score {
            match recorder.submit_score(points, level, topic.clone()).await {
                Ok(()) => info!(points, %level, %topic, "Score submitted."),
                Err(e) => warn!(error = %e, points, %level, %topic, "Failed to submit score."),
            }
        }
    })
}

/// Posts `{action, data}` documents to a backend endpoint.
#[derive(Debug, Clone)]
pub struct HttpRecorder {
    client: reqwest::Client,
    url: String,
}

impl HttpRecorder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn post(&self, body: Value) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach recording backend at {}", self.url))?
            .error_for_status()
            .context("Recording backend rejected the request")?;
        Ok(())
    }
}

fn learning_payload(words: &[LearnedWord], level: DifficultyLevel, topic: &str) -> Value {
    json!({
        "action": "record_learning",
        "data": {
            "words": words,
            "source_level": level,
            "topic": topic,
        }
    })
}

fn score_payload(points: u32, level: DifficultyLevel, topic: &str) -> Value {
    json!({
        "action": "submit_quiz",
        "data": {
            "score": points,
            "level": level,
            "topic": topic,
        }
    })
}

#[async_trait]
impl Recorder for HttpRecorder {
    async fn record_learning(
        &self,
        words: Vec<LearnedWord>,
        level: DifficultyLevel,
        topic: String,
    ) -> Result<()> {
        self.post(learning_payload(&words, level, &topic)).await
    }

    async fn submit_score(&self, points: u32, level: DifficultyLevel, topic: String) -> Result<()> {
        self.post(score_payload(points, level, &topic)).await
    }
}

/// Used when no backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

#[async_trait]
impl Recorder for LogRecorder {
    async fn record_learning(
        &self,
        words: Vec<LearnedWord>,
        level: DifficultyLevel,
        topic: String,
    ) -> Result<()> {
        info!(words = words.len(), %level, %topic, "No recording backend; skipping learning record.");
        Ok(())
    }

    async fn submit_score(&self, points: u32, level: DifficultyLevel, topic: String) -> Result<()> {
        info!(points, %level, %topic, "No recording backend; skipping score.");
        Ok(())
    }
}
