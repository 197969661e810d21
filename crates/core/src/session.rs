//! Quiz Session State Machine
//!
//! A [`QuizSession`] consumes one [`ContentItem`] at a time and walks the
//! learner through its questions:
//!
//! `Idle -> Generating -> Ready -> Answering(i) -> Completed`
//!
//! The first answer to a question is final. Skipping never counts a question
//! as correct. Completion decides what to persist and dispatches it at most
//! once per round.

use crate::content::{ContentItem, GenerationParameters, QuizQuestion};
use crate::engine::{Delivery, PendingItem, PrefetchHandle};
use crate::error::{PipelineError, SessionError};
use crate::recording::{self, LearnedWord, PersistencePlan, Recorder};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Generating,
    Ready,
    Answering(usize),
    Completed,
}

/// Per-question answer state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionProgress {
    pub selected: Option<String>,
    pub answered: bool,
    pub correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Points submitted for a round where every answer was correct.
    pub perfect_score_points: u32,
    /// Local feedback points per correct answer. Never persisted.
    pub feedback_points_per_correct: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            perfect_score_points: 5,
            feedback_points_per_correct: 10,
        }
    }
}

/// Summary of a completed round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionReport {
    pub correct: usize,
    pub total: usize,
    /// Points submitted to the backend; zero unless the round was perfect.
    pub points: u32,
    pub feedback_score: u32,
    pub recorded: bool,
    pub scored: bool,
}

/// How a call to [`QuizSession::start_round`] went.
#[derive(Debug)]
pub enum RoundStart {
    /// A buffered item was activated; the session is `Ready`.
    Ready,
    /// The session is `Generating`; pass the item's outcome to [`QuizSession::deliver`].
    Pending(PendingItem),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub index: usize,
    pub correct: bool,
    /// The correct option.
    pub answer: String,
    /// False when the question had already been answered and this submission was ignored.
    pub accepted: bool,
}

pub struct QuizSession {
    config: SessionConfig,
    recorder: Arc<dyn Recorder>,
    phase: SessionPhase,
    params: Option<GenerationParameters>,
    item: Option<ContentItem>,
    index: usize,
    correct_count: usize,
    progress: Vec<QuestionProgress>,
    submitted: bool,
    report: Option<CompletionReport>,
    persistence: Option<JoinHandle<()>>,
}

impl QuizSession {
    pub fn new(config: SessionConfig, recorder: Arc<dyn Recorder>) -> Self {
        Self {
            config,
            recorder,
            phase: SessionPhase::Idle,
            params: None,
            item: None,
            index: 0,
            correct_count: 0,
            progress: Vec::new(),
            submitted: false,
            report: None,
            persistence: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn item(&self) -> Option<&ContentItem> {
        self.item.as_ref()
    }

    pub fn question_index(&self) -> usize {
        self.index
    }

    pub fn progress(&self) -> &[QuestionProgress] {
        &self.progress
    }

    pub fn correct_count(&self) -> usize {
        self.correct_count
    }

    pub fn report(&self) -> Option<&CompletionReport> {
        self.report.as_ref()
    }

    /// Local feedback score for the active round.
    pub fn feedback_score(&self) -> u32 {
        self.correct_count as u32 * self.config.feedback_points_per_correct
    }

    /// Asks the pipeline for the next item.
    ///
    /// A buffered item is activated at once. Otherwise the session enters
    /// `Generating` and the caller awaits the returned [`PendingItem`].
    pub async fn start_round(
        &mut self,
        engine: &PrefetchHandle,
        params: GenerationParameters,
    ) -> Result<RoundStart, SessionError> {
        if self.phase == SessionPhase::Generating {
            return Err(SessionError::AlreadyGenerating);
        }
        self.params = Some(params.clone());
        match engine.request(params).await? {
            Delivery::Ready(item) => {
                self.activate(item);
                Ok(RoundStart::Ready)
            }
            Delivery::Pending(pending) => {
                debug!("No buffered content; session is generating.");
                self.phase = SessionPhase::Generating;
                Ok(RoundStart::Pending(pending))
            }
        }
    }

    /// Accepts the outcome of a pending delivery.
    ///
    /// An item that arrives when the session is no longer generating is dropped.
    pub fn deliver(&mut self, result: Result<ContentItem, PipelineError>) -> Result<(), SessionError> {
        match result {
            Ok(item) if self.phase == SessionPhase::Generating => {
                self.activate(item);
                Ok(())
            }
            Ok(_) => {
                debug!(phase = ?self.phase, "Dropping late delivery.");
                Ok(())
            }
            Err(err) => {
                if self.phase == SessionPhase::Generating {
                    self.phase = SessionPhase::Idle;
                }
                Err(err.into())
            }
        }
    }

    /// Makes `item` the active content and clears all round state.
    pub fn activate(&mut self, item: ContentItem) {
        self.progress = vec![QuestionProgress::default(); item.quiz.len()];
        self.item = Some(item);
        self.index = 0;
        self.correct_count = 0;
        self.submitted = false;
        self.report = None;
        self.phase = SessionPhase::Ready;
    }

    /// Updates the selection for the current question. Ignored once it has been answered.
    pub fn select(&mut self, option: &str) -> Result<bool, SessionError> {
        let index = self.current_index()?;
        Self::ensure_offered(self.question(index)?, option)?;
        let progress = &mut self.progress[index];
        if progress.answered {
            return Ok(false);
        }
        progress.selected = Some(option.to_string());
        self.phase = SessionPhase::Answering(index);
        Ok(true)
    }

    /// Submits an answer for the current question. Only the first submission counts.
    pub fn answer(&mut self, option: &str) -> Result<AnswerOutcome, SessionError> {
        let index = self.current_index()?;
        let question = self.question(index)?;
        Self::ensure_offered(question, option)?;
        let correct_option = question.answer.clone();
        let correct = question.is_correct(option);

        let progress = &mut self.progress[index];
        if progress.answered {
            return Ok(AnswerOutcome {
                index,
                correct: progress.correct,
                answer: correct_option,
                accepted: false,
            });
        }
        progress.selected = Some(option.to_string());
        progress.answered = true;
        progress.correct = correct;
        if correct {
            self.correct_count += 1;
        }
        self.phase = SessionPhase::Answering(index);
        Ok(AnswerOutcome {
            index,
            correct,
            answer: correct_option,
            accepted: true,
        })
    }

    /// Moves past an answered question. Completes the round after the last one.
    pub fn advance(&mut self) -> Result<SessionPhase, SessionError> {
        let index = self.current_index()?;
        if !self.progress[index].answered {
            return Err(SessionError::NotAnswered(index));
        }
        Ok(self.move_on(index))
    }

    /// Moves past the current question without counting it.
    pub fn skip(&mut self) -> Result<SessionPhase, SessionError> {
        let index = self.current_index()?;
        debug!(index, "Question skipped.");
        Ok(self.move_on(index))
    }

    /// Completes the round early. Returns `None` if it had already completed.
    pub fn finish(&mut self) -> Result<Option<CompletionReport>, SessionError> {
        if self.item.is_none() {
            return Err(SessionError::NoContent);
        }
        Ok(self.complete())
    }

    /// Awaits any outstanding persistence calls.
    pub async fn flush_persistence(&mut self) {
        if let Some(task) = self.persistence.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Persistence task did not finish cleanly.");
            }
        }
    }

    /// Returns to `Idle` and forgets the active round.
    pub fn reset(&mut self) {
        self.phase = SessionPhase::Idle;
        self.params = None;
        self.item = None;
        self.index = 0;
        self.correct_count = 0;
        self.progress.clear();
        self.submitted = false;
        self.report = None;
    }

    fn move_on(&mut self, index: usize) -> SessionPhase {
        if index + 1 < self.progress.len() {
            self.index = index + 1;
            self.phase = SessionPhase::Answering(self.index);
        } else {
            self.complete();
        }
        self.phase
    }

    fn complete(&mut self) -> Option<CompletionReport> {
        if self.submitted {
            debug!("Round already completed; ignoring duplicate finish.");
            return None;
        }
        self.submitted = true;
        self.phase = SessionPhase::Completed;

        let total = self.progress.len();
        let perfect = total > 0 && self.correct_count == total;
        let plan = match (&self.item, &self.params) {
            (Some(item), Some(params)) => Some(PersistencePlan {
                record: (self.correct_count >= 1).then(|| learned_words(item)),
                score: perfect.then_some(self.config.perfect_score_points),
                level: params.level,
                topic: params.topic.clone(),
            }),
            _ => None,
        };

        let report = CompletionReport {
            correct: self.correct_count,
            total,
            points: if perfect {
                self.config.perfect_score_points
            } else {
                0
            },
            feedback_score: self.feedback_score(),
            recorded: plan.as_ref().is_some_and(|p| p.record.is_some()),
            scored: plan.as_ref().is_some_and(|p| p.score.is_some()),
        };
        info!(
            correct = report.correct,
            total = report.total,
            points = report.points,
            "Round completed."
        );

        match plan {
            Some(plan) if !plan.is_empty() => {
                self.persistence = Some(recording::dispatch(self.recorder.clone(), plan));
            }
            Some(_) => debug!("No correct answers; nothing to persist."),
            None => warn!("Round has no generation parameters; skipping persistence."),
        }
        self.report = Some(report.clone());
        Some(report)
    }

    fn current_index(&self) -> Result<usize, SessionError> {
        match self.phase {
            SessionPhase::Ready | SessionPhase::Answering(_) => Ok(self.index),
            SessionPhase::Completed => Err(SessionError::Completed),
            SessionPhase::Idle | SessionPhase::Generating => Err(SessionError::NoContent),
        }
    }

    fn question(&self, index: usize) -> Result<&QuizQuestion, SessionError> {
        self.item
            .as_ref()
            .and_then(|item| item.quiz.get(index))
            .ok_or(SessionError::NoContent)
    }

    fn ensure_offered(question: &QuizQuestion, option: &str) -> Result<(), SessionError> {
        if question.offers(option) {
            Ok(())
        } else {
            Err(SessionError::UnknownOption(option.to_string()))
        }
    }
}

fn learned_words(item: &ContentItem) -> Vec<LearnedWord> {
    item.translation_map
        .iter()
        .map(|(word, meaning)| LearnedWord {
            word: word.clone(),
            meaning: meaning.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{DifficultyLevel, FixedWords};
    use crate::engine::{PrefetchConfig, PrefetchEngine};
    use crate::recording::MockRecorder;
    use crate::testing::{ScriptedSource, Step, item};
    use mockall::predicate::eq;
    use std::time::Duration;

    fn params() -> GenerationParameters {
        GenerationParameters::new(vec!["alpha".into()], "Space", DifficultyLevel::Pet).unwrap()
    }

    fn session(recorder: MockRecorder) -> QuizSession {
        let mut session = QuizSession::new(SessionConfig::default(), Arc::new(recorder));
        session.params = Some(params());
        session.activate(item("story"));
        session
    }

    /// Answers the three questions of `testing::document`, correctly where `pattern` says so.
    fn play(session: &mut QuizSession, pattern: [bool; 3]) {
        let answers = [("yes", "no"), ("right", "left"), ("up", "down")];
        for (correct, (right, wrong)) in pattern.into_iter().zip(answers) {
            session.answer(if correct { right } else { wrong }).unwrap();
            session.advance().unwrap();
        }
    }

    #[tokio::test]
    async fn test_perfect_round_submits_score_once() {
        let mut recorder = MockRecorder::new();
        recorder
            .expect_submit_score()
            .with(eq(5), eq(DifficultyLevel::Pet), eq("Space".to_string()))
            .times(1)
            .returning(|_, _, _| Ok(()));
        recorder
            .expect_record_learning()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut session = session(recorder);

        play(&mut session, [true, true, true]);
        assert_eq!(session.phase(), SessionPhase::Completed);
        let report = session.report().cloned().unwrap();
        assert_eq!(report.points, 5);
        assert_eq!(report.feedback_score, 30);
        assert!(report.scored && report.recorded);

        assert_eq!(session.finish().unwrap(), None);
        session.flush_persistence().await;
    }

    #[tokio::test]
    async fn test_partial_round_records_learning_without_score() {
        let mut recorder = MockRecorder::new();
        recorder
            .expect_record_learning()
            .withf(|words, level, topic| {
                words.len() == 2 && *level == DifficultyLevel::Pet && topic == "Space"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        recorder.expect_submit_score().never();
        let mut session = session(recorder);

        play(&mut session, [true, false, false]);
        let report = session.report().cloned().unwrap();
        assert_eq!(report.correct, 1);
        assert_eq!(report.points, 0);
        assert!(report.recorded && !report.scored);
        session.flush_persistence().await;
    }

    #[tokio::test]
    async fn test_no_correct_answers_persists_nothing() {
        let mut recorder = MockRecorder::new();
        recorder.expect_record_learning().never();
        recorder.expect_submit_score().never();
        let mut session = session(recorder);

        play(&mut session, [false, false, false]);
        assert_eq!(session.phase(), SessionPhase::Completed);
        assert!(!session.report().unwrap().recorded);
        session.flush_persistence().await;
    }

    #[test]
    fn test_first_answer_is_final() {
        let mut session = session(MockRecorder::new());
        let first = session.answer("no").unwrap();
        assert!(first.accepted && !first.correct);
        assert_eq!(first.answer, "yes");

        let second = session.answer("yes").unwrap();
        assert!(!second.accepted);
        assert!(!second.correct);
        assert_eq!(session.correct_count(), 0);
        assert!(!session.select("yes").unwrap());
        assert_eq!(session.progress()[0].selected.as_deref(), Some("no"));
    }

    #[test]
    fn test_select_only_updates_selection() {
        let mut session = session(MockRecorder::new());
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert!(session.select("no").unwrap());
        assert!(session.select("yes").unwrap());
        assert_eq!(session.phase(), SessionPhase::Answering(0));
        assert!(!session.progress()[0].answered);
        assert_eq!(session.correct_count(), 0);
        assert_eq!(
            session.select("maybe").unwrap_err(),
            SessionError::UnknownOption("maybe".into())
        );
    }

    #[test]
    fn test_advance_requires_an_answer() {
        let mut session = session(MockRecorder::new());
        assert_eq!(session.advance().unwrap_err(), SessionError::NotAnswered(0));
        session.answer("yes").unwrap();
        assert_eq!(session.advance().unwrap(), SessionPhase::Answering(1));
    }

    #[tokio::test]
    async fn test_skip_never_counts_and_completes_after_last() {
        let mut recorder = MockRecorder::new();
        recorder.expect_record_learning().never();
        recorder.expect_submit_score().never();
        let mut session = session(recorder);

        session.select("yes").unwrap();
        assert_eq!(session.skip().unwrap(), SessionPhase::Answering(1));
        assert_eq!(session.skip().unwrap(), SessionPhase::Answering(2));
        assert_eq!(session.skip().unwrap(), SessionPhase::Completed);
        assert_eq!(session.correct_count(), 0);
        assert_eq!(session.skip().unwrap_err(), SessionError::Completed);
        session.flush_persistence().await;
    }

    #[test]
    fn test_operations_without_content_fail() {
        let mut session = QuizSession::new(SessionConfig::default(), Arc::new(MockRecorder::new()));
        assert_eq!(session.answer("yes").unwrap_err(), SessionError::NoContent);
        assert_eq!(session.skip().unwrap_err(), SessionError::NoContent);
        assert_eq!(session.finish().unwrap_err(), SessionError::NoContent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generating_session_becomes_ready_after_rate_limits() {
        let source = ScriptedSource::new(
            vec![Step::rate_limited(), Step::rate_limited(), Step::story("third")],
            Duration::from_millis(100),
        );
        let (engine, _task) =
            PrefetchEngine::spawn(PrefetchConfig::default(), source.clone(), Arc::new(FixedWords));
        let mut session = QuizSession::new(SessionConfig::default(), Arc::new(MockRecorder::new()));

        let pending = match session.start_round(&engine, params()).await.unwrap() {
            RoundStart::Pending(pending) => pending,
            RoundStart::Ready => panic!("nothing should be buffered yet"),
        };
        assert_eq!(session.phase(), SessionPhase::Generating);
        assert!(matches!(
            session.start_round(&engine, params()).await,
            Err(SessionError::AlreadyGenerating)
        ));

        session.deliver(pending.await).unwrap();
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.item().unwrap().content, "third");
        assert_eq!(source.open_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_returns_to_idle() {
        let source = ScriptedSource::new(vec![Step::transport()], Duration::from_millis(100));
        let (engine, _task) =
            PrefetchEngine::spawn(PrefetchConfig::default(), source, Arc::new(FixedWords));
        let mut session = QuizSession::new(SessionConfig::default(), Arc::new(MockRecorder::new()));

        let RoundStart::Pending(pending) = session.start_round(&engine, params()).await.unwrap() else {
            panic!("expected a pending round");
        };
        let err = session.deliver(pending.await).unwrap_err();
        assert!(matches!(err, SessionError::Pipeline(PipelineError::Transient(_))));
        assert_eq!(session.phase(), SessionPhase::Idle);
    }
}
