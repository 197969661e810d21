//! Prefetch Engine
//!
//! The engine generates content ahead of demand and keeps a small buffer of
//! ready items so that a session rarely waits on the generation service.
//!
//! All pipeline state (buffer, single-flight lock, counters, breaker) lives in
//! one [`PrefetchEngine`] owned by a single tokio task. Callers talk to it
//! through a cloneable [`PrefetchHandle`]. Generation attempts and timers run
//! as separate tasks that report back as events, so every state change
//! happens on the engine task, one event at a time. The lock is taken before
//! an attempt is spawned and released only when its completion event is
//! handled.

use crate::buffer::ContentBuffer;
use crate::content::{ContentItem, GenerationParameters, GenerationRequest, RequestFactory};
use crate::error::{GenerationError, PipelineError};
use crate::policy::{ErrorPolicy, FailureClass, RetryDecision, RetryPolicy};
use crate::source::StreamingSource;
use futures::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tunables for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchConfig {
    /// Maximum number of ready items held in the buffer.
    pub capacity: usize,
    /// A successful generation schedules another one while the buffer holds fewer items than this.
    pub low_water_mark: usize,
    /// Maximum successful generations per session.
    pub session_ceiling: u32,
    /// Delay before a background refill or a retry after a stale result.
    pub refill_delay: Duration,
    /// Consecutive failures that open the circuit breaker.
    pub breaker_threshold: u32,
    pub retry: RetryPolicy,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            low_water_mark: 1,
            session_ceiling: 5,
            refill_delay: Duration::from_secs(5),
            breaker_threshold: 5,
            retry: RetryPolicy::default(),
        }
    }
}

/// Snapshot of the pipeline, published after every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineCounters {
    pub buffered: usize,
    pub in_flight: bool,
    pub generated: u32,
    pub consecutive_failures: u32,
    pub retry_attempts: u32,
    pub breaker_open: bool,
    pub waiting: bool,
    /// Total attempts handed to the streaming source.
    pub attempts_started: u32,
}

/// Result of [`PrefetchHandle::request`].
#[derive(Debug)]
pub enum Delivery {
    /// A buffered item was available immediately.
    Ready(ContentItem),
    /// Nothing was buffered; await the item.
    Pending(PendingItem),
}

/// An item that is still being generated for a waiting caller.
#[derive(Debug)]
pub struct PendingItem {
    rx: oneshot::Receiver<Result<ContentItem, PipelineError>>,
}

impl PendingItem {
    pub async fn wait(self) -> Result<ContentItem, PipelineError> {
        self.await
    }
}

impl Future for PendingItem {
    type Output = Result<ContentItem, PipelineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PipelineError::EngineClosed)))
    }
}

type Reply<T> = oneshot::Sender<Result<T, PipelineError>>;

enum Command {
    Ensure {
        params: GenerationParameters,
        reply: Reply<()>,
    },
    Request {
        params: GenerationParameters,
        reply: Reply<Delivery>,
    },
    SetParameters(GenerationParameters),
    Reset,
}

enum Event {
    AttemptFinished {
        epoch: u64,
        captured: GenerationParameters,
        outcome: Result<ContentItem, GenerationError>,
    },
    TimerFired {
        seq: u64,
    },
}

/// Cloneable client side of a running [`PrefetchEngine`].
#[derive(Clone)]
pub struct PrefetchHandle {
    commands: mpsc::Sender<Command>,
    counters: watch::Receiver<PipelineCounters>,
}

impl PrefetchHandle {
    /// Starts filling the buffer for `params` if nothing prevents it.
    ///
    /// Returns `CircuitOpen` once the breaker has tripped; every other reason
    /// for not starting work is silent.
    pub async fn ensure(&self, params: GenerationParameters) -> Result<(), PipelineError> {
        self.call(|reply| Command::Ensure { params, reply }).await
    }

    /// Takes the next item, either straight from the buffer or as a pending delivery.
    pub async fn request(&self, params: GenerationParameters) -> Result<Delivery, PipelineError> {
        self.call(|reply| Command::Request { params, reply }).await
    }

    /// Records the caller's current parameters. A change of topic or level
    /// discards buffered items and makes in-flight work stale.
    pub async fn set_parameters(&self, params: GenerationParameters) -> Result<(), PipelineError> {
        self.commands
            .send(Command::SetParameters(params))
            .await
            .map_err(|_| PipelineError::EngineClosed)
    }

    /// Clears all pipeline state for a fresh session, including an open breaker.
    pub async fn reset(&self) -> Result<(), PipelineError> {
        self.commands
            .send(Command::Reset)
            .await
            .map_err(|_| PipelineError::EngineClosed)
    }

    pub fn counters(&self) -> PipelineCounters {
        self.counters.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineCounters> {
        self.counters.clone()
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| PipelineError::EngineClosed)?;
        rx.await.unwrap_or(Err(PipelineError::EngineClosed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Rate-limit backoff; always honoured.
    Backoff,
    /// Background refill or stale retry; a waiting caller may preempt it.
    Refill,
}

struct PendingTimer {
    seq: u64,
    kind: TimerKind,
    handle: JoinHandle<()>,
}

/// Epoch in which the attempt holding the lock was started.
struct InFlight {
    epoch: u64,
}

/// Owns all prefetch state. Runs on its own task; see [`PrefetchEngine::spawn`].
pub struct PrefetchEngine {
    config: PrefetchConfig,
    source: Arc<dyn StreamingSource>,
    factory: Arc<dyn RequestFactory>,
    buffer: ContentBuffer,
    policy: ErrorPolicy,
    current: Option<GenerationParameters>,
    /// The single-flight lock.
    in_flight: Option<InFlight>,
    waiter: Option<Reply<ContentItem>>,
    timer: Option<PendingTimer>,
    timer_seq: u64,
    /// Bumped on reset so results from a previous session are ignored.
    epoch: u64,
    generated: u32,
    retry_attempts: u32,
    attempts_started: u32,
    events: mpsc::UnboundedSender<Event>,
    counters: watch::Sender<PipelineCounters>,
}

impl PrefetchEngine {
    /// Spawns the engine task and returns its handle.
    ///
    /// The engine stops when every handle has been dropped.
    pub fn spawn(
        config: PrefetchConfig,
        source: Arc<dyn StreamingSource>,
        factory: Arc<dyn RequestFactory>,
    ) -> (PrefetchHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (counters_tx, counters_rx) = watch::channel(PipelineCounters::default());

        let engine = Self {
            buffer: ContentBuffer::new(config.capacity),
            policy: ErrorPolicy::new(config.retry.clone(), config.breaker_threshold),
            config,
            source,
            factory,
            current: None,
            in_flight: None,
            waiter: None,
            timer: None,
            timer_seq: 0,
            epoch: 0,
            generated: 0,
            retry_attempts: 0,
            attempts_started: 0,
            events: events_tx,
            counters: counters_tx,
        };
        let task = tokio::spawn(engine.run(commands_rx, events_rx));
        (
            PrefetchHandle {
                commands: commands_tx,
                counters: counters_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
            self.publish();
        }
        self.cancel_timer();
        debug!("Prefetch engine stopped: all handles dropped.");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Ensure { params, reply } => {
                self.observe_parameters(params);
                let _ = reply.send(self.pump());
            }
            Command::Request { params, reply } => {
                self.observe_parameters(params);
                let result = self.request();
                if let Err(Ok(Delivery::Ready(item))) = reply.send(result) {
                    // The caller went away; keep the item for the next request.
                    self.buffer_item(item);
                }
            }
            Command::SetParameters(params) => self.observe_parameters(params),
            Command::Reset => self.reset(),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::AttemptFinished {
                epoch,
                captured,
                outcome,
            } => self.on_attempt_finished(epoch, captured, outcome),
            Event::TimerFired { seq } => {
                if self.timer.as_ref().is_some_and(|timer| timer.seq == seq) {
                    self.timer = None;
                    let _ = self.pump();
                }
            }
        }
    }

    fn observe_parameters(&mut self, params: GenerationParameters) {
        let superseded = self
            .current
            .as_ref()
            .is_some_and(|current| !current.is_consistent_with(&params));
        if superseded {
            let dropped = self.buffer.clear();
            self.retry_attempts = 0;
            info!(
                dropped,
                topic = %params.topic,
                level = %params.level,
                "Parameters changed; discarding buffered content."
            );
        }
        self.current = Some(params);
    }

    fn request(&mut self) -> Result<Delivery, PipelineError> {
        if let Some(item) = self.buffer.pop() {
            debug!(remaining = self.buffer.len(), "Serving buffered content.");
            let _ = self.pump();
            return Ok(Delivery::Ready(item));
        }
        self.policy.admit()?;
        if self.generated >= self.config.session_ceiling && self.in_flight.is_none() {
            return Err(PipelineError::SessionCeilingReached);
        }

        let (tx, rx) = oneshot::channel();
        if self.waiter.replace(tx).is_some() {
            warn!("A second request replaced the waiting caller.");
        }
        // A waiting caller does not sit out a background refill delay.
        if self
            .timer
            .as_ref()
            .is_some_and(|timer| timer.kind == TimerKind::Refill)
        {
            self.cancel_timer();
        }
        self.pump()?;
        Ok(Delivery::Pending(PendingItem { rx }))
    }

    /// Starts one attempt unless the breaker, the lock, a pending timer,
    /// the ceiling or a full buffer prevents it.
    fn pump(&mut self) -> Result<(), PipelineError> {
        if let Err(err) = self.policy.admit() {
            self.fail_waiter(err.clone());
            return Err(err);
        }
        if self.in_flight.is_some() {
            debug!("Generation already in flight; skipping duplicate trigger.");
            return Ok(());
        }
        if self.timer.is_some() {
            debug!("An attempt is already scheduled; skipping trigger.");
            return Ok(());
        }
        if self.generated >= self.config.session_ceiling {
            info!(
                ceiling = self.config.session_ceiling,
                "Session generation limit reached; not starting new work."
            );
            self.fail_waiter(PipelineError::SessionCeilingReached);
            return Ok(());
        }
        if self.buffer.is_full() {
            return Ok(());
        }
        self.start_attempt();
        Ok(())
    }

    fn start_attempt(&mut self) {
        let Some(params) = self.current.clone() else {
            return;
        };
        let request = self.factory.build(&params);
        self.in_flight = Some(InFlight { epoch: self.epoch });
        self.attempts_started += 1;
        info!(
            cache_key = %request.cache_key,
            topic = %request.topic,
            level = %request.level,
            retry = self.retry_attempts,
            "Starting generation."
        );

        let source = self.source.clone();
        let events = self.events.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let outcome = generate(source.as_ref(), &request).await;
            let _ = events.send(Event::AttemptFinished {
                epoch,
                captured: params,
                outcome,
            });
        });
    }

    fn on_attempt_finished(
        &mut self,
        epoch: u64,
        captured: GenerationParameters,
        outcome: Result<ContentItem, GenerationError>,
    ) {
        self.in_flight = None;
        if epoch != self.epoch {
            debug!("Dropping result of an attempt from before the last reset.");
            let _ = self.pump();
            return;
        }

        let stale = self
            .current
            .as_ref()
            .is_some_and(|current| !current.is_consistent_with(&captured));
        match outcome {
            Err(GenerationError::Source(err)) => {
                self.on_failure(FailureClass::from(&err), &err.to_string())
            }
            _ if stale => self.on_stale(&captured),
            Ok(item) => self.on_success(item),
            Err(err) => self.on_failure(FailureClass::from(&err), &err.to_string()),
        }
    }

    fn on_stale(&mut self, captured: &GenerationParameters) {
        info!(
            topic = %captured.topic,
            level = %captured.level,
            "Discarding stale result; parameters changed during generation."
        );
        self.retry_attempts = 0;
        if !self.buffer.is_full() {
            self.schedule(TimerKind::Refill, self.config.refill_delay);
        }
    }

    fn on_success(&mut self, item: ContentItem) {
        self.policy.on_success();
        self.retry_attempts = 0;
        self.generated += 1;

        match self.waiter.take() {
            Some(waiter) => match waiter.send(Ok(item)) {
                Ok(()) => info!("Delivered fresh content directly to the waiting session."),
                Err(returned) => {
                    if let Ok(item) = returned {
                        self.buffer_item(item);
                    }
                }
            },
            None => self.buffer_item(item),
        }
        info!(
            buffered = self.buffer.len(),
            generated = self.generated,
            "Generation succeeded."
        );

        if self.buffer.len() < self.config.low_water_mark
            && self.generated < self.config.session_ceiling
        {
            debug!(
                delay_ms = self.config.refill_delay.as_millis() as u64,
                "Scheduling background refill."
            );
            self.schedule(TimerKind::Refill, self.config.refill_delay);
        }
    }

    fn on_failure(&mut self, class: FailureClass, detail: &str) {
        match self.policy.on_failure(class, self.retry_attempts, detail) {
            RetryDecision::RetryAfter { attempt, delay } => {
                self.retry_attempts = attempt;
                warn!(
                    attempt,
                    max_attempts = self.policy.retry().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited; retrying after backoff."
                );
                self.schedule(TimerKind::Backoff, delay);
            }
            RetryDecision::GiveUp(err) => {
                self.retry_attempts = 0;
                error!(
                    error = %err,
                    consecutive_failures = self.policy.breaker().consecutive_failures(),
                    "Generation failed."
                );
                self.fail_waiter(err);
            }
            RetryDecision::Ignore => {}
        }
    }

    fn buffer_item(&mut self, item: ContentItem) {
        if self.buffer.push(item).is_err() {
            warn!("Buffer is full; dropping generated content.");
        }
    }

    fn fail_waiter(&mut self, err: PipelineError) {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Err(err));
        }
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel_timer();
        self.timer_seq += 1;
        let seq = self.timer_seq;
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::TimerFired { seq });
        });
        self.timer = Some(PendingTimer { seq, kind, handle });
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }

    fn reset(&mut self) {
        info!("Resetting prefetch pipeline for a fresh session.");
        self.epoch += 1;
        self.cancel_timer();
        self.buffer.clear();
        self.policy.reset();
        self.generated = 0;
        self.retry_attempts = 0;
        self.fail_waiter(PipelineError::Stale);
        if let Some(in_flight) = &self.in_flight {
            debug!(
                started_in = in_flight.epoch,
                "An attempt from the previous session keeps the lock until it reports back."
            );
        }
    }

    fn publish(&self) {
        let snapshot = PipelineCounters {
            buffered: self.buffer.len(),
            in_flight: self.in_flight.is_some(),
            generated: self.generated,
            consecutive_failures: self.policy.breaker().consecutive_failures(),
            retry_attempts: self.retry_attempts,
            breaker_open: self.policy.breaker().is_open(),
            waiting: self.waiter.is_some(),
            attempts_started: self.attempts_started,
        };
        self.counters.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

/// Drains the source completely, then parses the accumulated text once.
async fn generate(
    source: &dyn StreamingSource,
    request: &GenerationRequest,
) -> Result<ContentItem, GenerationError> {
    let mut fragments = source.open(request).await?;
    let mut text = String::new();
    while let Some(fragment) = fragments.next().await {
        text.push_str(&fragment?);
    }
    Ok(ContentItem::parse(&text)?)
}
