//! Defines the WebSocket message protocol between the client and the API server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wordweaver_core::{CompletionReport, ContentItem, DifficultyLevel, PipelineCounters};

/// Messages sent from the client to the server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts a session. This must be the first message.
    Init {
        topic: String,
        #[serde(default)]
        level: DifficultyLevel,
    },
    /// Changes topic or level. Buffered stories for the old settings are dropped.
    SetParameters {
        topic: String,
        level: DifficultyLevel,
    },
    /// Asks for the next story and quiz.
    StartRound,
    /// Highlights an option without answering.
    Select { option: String },
    /// Submits the answer for the current question.
    Answer { option: String },
    /// Moves to the next question after answering.
    Next,
    /// Moves to the next question without answering.
    Skip,
    /// Starts over with a fresh pipeline.
    Reset,
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Initialized {
        session_id: Uuid,
    },
    /// No story was buffered; one is being generated.
    Generating,
    Ready {
        item: ContentItem,
    },
    Selection {
        index: usize,
        option: String,
    },
    AnswerResult {
        index: usize,
        correct: bool,
        answer: String,
    },
    /// The active question changed.
    Question {
        index: usize,
    },
    Completed {
        report: CompletionReport,
    },
    Counters {
        counters: PipelineCounters,
    },
    /// A failure the client may retry from.
    Error {
        message: String,
        recoverable: bool,
    },
    /// The generation service failed too often; the client should leave the game.
    ServiceUnavailable {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_messages_are_type_tagged() {
        let init: ClientMessage =
            serde_json::from_value(json!({"type": "init", "topic": "Space", "level": "KET"}))
                .unwrap();
        assert_eq!(
            init,
            ClientMessage::Init {
                topic: "Space".into(),
                level: DifficultyLevel::Ket
            }
        );

        let answer: ClientMessage =
            serde_json::from_value(json!({"type": "answer", "option": "yes"})).unwrap();
        assert_eq!(answer, ClientMessage::Answer { option: "yes".into() });

        let start: ClientMessage = serde_json::from_str(r#"{"type":"start_round"}"#).unwrap();
        assert_eq!(start, ClientMessage::StartRound);
    }

    #[test]
    fn test_init_level_defaults_to_junior_high() {
        let init: ClientMessage =
            serde_json::from_value(json!({"type": "init", "topic": "Food"})).unwrap();
        assert_eq!(
            init,
            ClientMessage::Init {
                topic: "Food".into(),
                level: DifficultyLevel::JuniorHigh
            }
        );
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        let parsed = serde_json::from_value::<ClientMessage>(
            json!({"type": "set_parameters", "topic": "Food", "level": "Kindergarten"}),
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_server_messages_serialize_snake_case() {
        let msg = ServerMessage::AnswerResult {
            index: 1,
            correct: false,
            answer: "right".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "answer_result");
        assert_eq!(value["answer"], "right");

        let value = serde_json::to_value(ServerMessage::ServiceUnavailable {
            message: "down".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "service_unavailable");

        let value = serde_json::to_value(ServerMessage::Generating).unwrap();
        assert_eq!(value, json!({"type": "generating"}));
    }

    #[test]
    fn test_completed_carries_the_round_report() {
        let report = CompletionReport {
            correct: 3,
            total: 3,
            points: 5,
            feedback_score: 30,
            recorded: true,
            scored: true,
        };
        let value = serde_json::to_value(ServerMessage::Completed { report }).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "completed",
                "report": {
                    "correct": 3,
                    "total": 3,
                    "points": 5,
                    "feedback_score": 30,
                    "recorded": true,
                    "scored": true
                }
            })
        );
    }
}
