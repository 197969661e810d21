//! Scripted collaborators shared by the unit tests.

use crate::content::{ContentItem, GenerationRequest};
use crate::error::SourceError;
use crate::source::{FragmentStream, StreamingSource};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Builds a valid document whose narrative is `label`.
pub(crate) fn document(label: &str) -> String {
    serde_json::json!({
        "content": label,
        "translation": "",
        "translation_map": {"alpha": "a", "beta": "b"},
        "quiz": [
            {"question": "first?", "options": ["yes", "no"], "answer": "yes"},
            {"question": "second?", "options": ["left", "right"], "answer": "right"},
            {"question": "third?", "options": ["up", "down"], "answer": "up"}
        ]
    })
    .to_string()
}

pub(crate) fn item(label: &str) -> ContentItem {
    ContentItem::parse(&document(label)).unwrap()
}

/// What one call to `open` produces.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Streams the text in three fragments.
    Text(String),
    Fail(SourceError),
}

impl Step {
    pub(crate) fn story(label: &str) -> Self {
        Self::Text(document(label))
    }

    pub(crate) fn rate_limited() -> Self {
        Self::Fail(SourceError::RateLimited("429 Too Many Requests".into()))
    }

    pub(crate) fn transport() -> Self {
        Self::Fail(SourceError::Transport("connection reset".into()))
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Replays scripted steps and records how it was called.
pub(crate) struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    latency: Duration,
    active: Arc<AtomicUsize>,
    max_active: AtomicUsize,
    opened: Mutex<Vec<(Instant, GenerationRequest)>>,
}

impl ScriptedSource {
    pub(crate) fn new(steps: Vec<Step>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            latency,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: AtomicUsize::new(0),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
        self.opened.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub(crate) fn open_times(&self) -> Vec<Instant> {
        self.opened.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }
}

#[async_trait]
impl StreamingSource for ScriptedSource {
    async fn open(&self, request: &GenerationRequest) -> Result<FragmentStream, SourceError> {
        self.opened.lock().unwrap().push((Instant::now(), request.clone()));
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let guard = ActiveGuard(self.active.clone());

        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::story("default"));
        let items: Vec<Result<String, SourceError>> = match step {
            Step::Text(text) => {
                let chars: Vec<char> = text.chars().collect();
                let third = (chars.len() / 3).max(1);
                chars.chunks(third).map(|c| Ok(c.iter().collect())).collect()
            }
            Step::Fail(err) => vec![Err(err)],
        };

        let stream = futures::stream::unfold(
            (items.into_iter(), guard, self.latency),
            |(mut items, guard, latency)| async move {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                items
                    .next()
                    .map(|item| (item, (items, guard, Duration::ZERO)))
            },
        );
        Ok(Box::pin(stream))
    }
}
