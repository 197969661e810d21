//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the shared,
//! clonable collaborators every WebSocket connection builds its pipeline from.

use crate::config::Config;
use std::sync::Arc;
use wordweaver_core::{
    PrefetchConfig, Recorder, SessionConfig, StreamingSource, Vocabulary,
};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn StreamingSource>,
    pub vocabulary: Arc<Vocabulary>,
    pub recorder: Arc<dyn Recorder>,
    /// Settings for the pipeline each connection spawns.
    pub prefetch: PrefetchConfig,
    pub session: SessionConfig,
}

impl AppState {
    pub fn new(
        config: &Config,
        source: Arc<dyn StreamingSource>,
        vocabulary: Vocabulary,
        recorder: Arc<dyn Recorder>,
    ) -> Self {
        Self {
            source,
            vocabulary: Arc::new(vocabulary),
            recorder,
            prefetch: prefetch_config(config),
            session: SessionConfig::default(),
        }
    }
}

/// The configured word lists, or the built-in ones when no file is set.
pub fn load_vocabulary(config: &Config) -> anyhow::Result<Vocabulary> {
    match &config.vocabulary_path {
        Some(path) => Vocabulary::load(path, config.words_per_story),
        None => Ok(Vocabulary::builtin(config.words_per_story)),
    }
}

/// Pipeline settings from the environment. Retry timing keeps its defaults.
pub fn prefetch_config(config: &Config) -> PrefetchConfig {
    PrefetchConfig {
        capacity: config.buffer_capacity,
        session_ceiling: config.session_ceiling,
        refill_delay: config.refill_delay,
        breaker_threshold: config.breaker_threshold,
        ..PrefetchConfig::default()
    }
}
