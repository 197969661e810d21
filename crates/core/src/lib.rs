pub mod buffer;
pub mod content;
pub mod engine;
pub mod error;
pub mod policy;
pub mod prompt;
pub mod recording;
pub mod session;
pub mod source;
pub mod vocabulary;

#[cfg(test)]
mod testing;

pub use buffer::ContentBuffer;
pub use content::{
    ContentItem, DifficultyLevel, FixedWords, GenerationParameters, GenerationRequest,
    QuizQuestion, RequestFactory,
};
pub use engine::{
    Delivery, PendingItem, PipelineCounters, PrefetchConfig, PrefetchEngine, PrefetchHandle,
};
pub use error::{GenerationError, ParameterError, ParseError, PipelineError, SessionError, SourceError};
pub use policy::{CircuitBreaker, ErrorPolicy, FailureClass, RetryDecision, RetryPolicy};
pub use prompt::PromptTemplates;
pub use recording::{HttpRecorder, LearnedWord, LogRecorder, PersistencePlan, Recorder};
pub use session::{
    AnswerOutcome, CompletionReport, QuestionProgress, QuizSession, RoundStart, SessionConfig,
    SessionPhase,
};
pub use source::{FragmentStream, MockStreamingSource, OpenAICompatibleSource, StreamingSource};
pub use vocabulary::Vocabulary;
