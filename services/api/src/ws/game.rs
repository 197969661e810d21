//! Per-connection game logic.
//!
//! A [`Game`] owns one prefetch pipeline and one quiz session and turns
//! client messages into server messages. It never touches the socket, so the
//! connection loop in `session` stays a thin transport shell.

use super::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use wordweaver_core::{
    ContentItem, DifficultyLevel, GenerationParameters, PendingItem, PipelineCounters,
    PipelineError, PrefetchEngine, PrefetchHandle, QuizSession, RoundStart, SessionError,
    SessionPhase, Vocabulary,
};

pub struct Game {
    vocabulary: Arc<Vocabulary>,
    engine: PrefetchHandle,
    session: QuizSession,
    topic: String,
    level: DifficultyLevel,
    pending: Option<PendingItem>,
}

impl Game {
    /// Spawns a fresh pipeline for the connection. It stops when the game is dropped.
    pub fn new(state: &AppState, topic: String, level: DifficultyLevel) -> Self {
        let (engine, _task) = PrefetchEngine::spawn(
            state.prefetch.clone(),
            state.source.clone(),
            state.vocabulary.clone(),
        );
        Self {
            vocabulary: state.vocabulary.clone(),
            engine,
            session: QuizSession::new(state.session.clone(), state.recorder.clone()),
            topic,
            level,
            pending: None,
        }
    }

    pub fn counters(&self) -> watch::Receiver<PipelineCounters> {
        self.engine.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    /// Starts filling the buffer so the first round is likely ready on demand.
    pub async fn warm_up(&mut self) -> Vec<ServerMessage> {
        match self.params() {
            Ok(params) => match self.engine.ensure(params).await {
                Ok(()) => vec![],
                Err(e) => self.pipeline_error(e).into_iter().collect(),
            },
            Err(e) => vec![invalid_request(e)],
        }
    }

    /// Resolves when the pending round's item arrives. Never resolves without one.
    pub async fn delivered(&mut self) -> Result<ContentItem, PipelineError> {
        match self.pending.as_mut() {
            Some(pending) => pending.await,
            None => std::future::pending().await,
        }
    }

    pub async fn handle(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::Init { .. } => vec![ServerMessage::Error {
                message: "Session is already initialized.".to_string(),
                recoverable: true,
            }],
            ClientMessage::SetParameters { topic, level } => self.set_parameters(topic, level).await,
            ClientMessage::StartRound => self.start_round().await,
            ClientMessage::Select { option } => match self.session.select(&option) {
                Ok(true) => vec![ServerMessage::Selection {
                    index: self.session.question_index(),
                    option,
                }],
                Ok(false) => vec![],
                Err(e) => self.session_error(e),
            },
            ClientMessage::Answer { option } => match self.session.answer(&option) {
                Ok(outcome) if outcome.accepted => vec![ServerMessage::AnswerResult {
                    index: outcome.index,
                    correct: outcome.correct,
                    answer: outcome.answer,
                }],
                Ok(_) => {
                    debug!("Ignoring repeated answer.");
                    vec![]
                }
                Err(e) => self.session_error(e),
            },
            ClientMessage::Next => match self.session.advance() {
                Ok(phase) => self.phase_changed(phase).await,
                Err(e) => self.session_error(e),
            },
            ClientMessage::Skip => match self.session.skip() {
                Ok(phase) => self.phase_changed(phase).await,
                Err(e) => self.session_error(e),
            },
            ClientMessage::Reset => self.reset().await,
        }
    }

    /// Applies the outcome of a pending round.
    pub fn deliver(&mut self, result: Result<ContentItem, PipelineError>) -> Vec<ServerMessage> {
        self.pending = None;
        match self.session.deliver(result) {
            Ok(()) => self.ready_message().into_iter().collect(),
            Err(e) => self.session_error(e),
        }
    }

    /// Waits for persistence calls of the last round before the connection closes.
    pub async fn close(&mut self) {
        self.session.flush_persistence().await;
    }

    fn params(&self) -> Result<GenerationParameters, wordweaver_core::ParameterError> {
        self.vocabulary.parameters(self.topic.clone(), self.level)
    }

    async fn set_parameters(&mut self, topic: String, level: DifficultyLevel) -> Vec<ServerMessage> {
        info!(%topic, %level, "Client changed parameters.");
        self.topic = topic;
        self.level = level;
        match self.params() {
            Ok(params) => match self.engine.set_parameters(params).await {
                Ok(()) => vec![],
                Err(e) => self.pipeline_error(e).into_iter().collect(),
            },
            Err(e) => vec![invalid_request(e)],
        }
    }

    async fn start_round(&mut self) -> Vec<ServerMessage> {
        if self.session.phase() == SessionPhase::Generating {
            debug!("Round already generating; ignoring start.");
            return vec![];
        }
        let params = match self.params() {
            Ok(params) => params,
            Err(e) => return vec![invalid_request(e)],
        };
        match self.session.start_round(&self.engine, params).await {
            Ok(RoundStart::Ready) => self.ready_message().into_iter().collect(),
            Ok(RoundStart::Pending(pending)) => {
                self.pending = Some(pending);
                vec![ServerMessage::Generating]
            }
            Err(e) => self.session_error(e),
        }
    }

    async fn phase_changed(&mut self, phase: SessionPhase) -> Vec<ServerMessage> {
        match phase {
            SessionPhase::Answering(index) => vec![ServerMessage::Question { index }],
            SessionPhase::Completed => {
                let mut messages: Vec<ServerMessage> = self
                    .session
                    .report()
                    .cloned()
                    .map(|report| ServerMessage::Completed { report })
                    .into_iter()
                    .collect();
                // Keep the next round warm while the learner reads the summary.
                messages.extend(self.warm_up().await);
                messages
            }
            _ => vec![],
        }
    }

    async fn reset(&mut self) -> Vec<ServerMessage> {
        info!("Client requested a reset.");
        self.pending = None;
        self.session.reset();
        if let Err(e) = self.engine.reset().await {
            return self.pipeline_error(e).into_iter().collect();
        }
        self.warm_up().await
    }

    fn ready_message(&self) -> Option<ServerMessage> {
        self.session
            .item()
            .filter(|_| self.session.phase() == SessionPhase::Ready)
            .cloned()
            .map(|item| ServerMessage::Ready { item })
    }

    fn session_error(&self, err: SessionError) -> Vec<ServerMessage> {
        match err {
            SessionError::Pipeline(e) => self.pipeline_error(e).into_iter().collect(),
            other => vec![ServerMessage::Error {
                message: other.to_string(),
                recoverable: true,
            }],
        }
    }

    fn pipeline_error(&self, err: PipelineError) -> Option<ServerMessage> {
        match err {
            e if e.is_silent() => {
                debug!(reason = %e, "No new round right now.");
                None
            }
            e if e.is_terminal() => {
                warn!(error = %e, "Generation service unavailable.");
                Some(ServerMessage::ServiceUnavailable {
                    message: e.to_string(),
                })
            }
            e => {
                warn!(error = %e, "Round could not be generated.");
                Some(ServerMessage::Error {
                    message: e.to_string(),
                    recoverable: true,
                })
            }
        }
    }
}

fn invalid_request(err: wordweaver_core::ParameterError) -> ServerMessage {
    ServerMessage::Error {
        message: err.to_string(),
        recoverable: true,
    }
}
