//! Event surface of a runtime request.
//!
//! Consumers either poll the returned stream or register an `on_event`
//! callback. When both are present the callback takes precedence and the
//! stream stays silent, so no event is delivered twice.

use chrono::Utc;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Milliseconds since the epoch; monotonic within a request.
fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Token {
        content: String,
        timestamp: i64,
    },
    SkillCall {
        skill: String,
        timestamp: i64,
    },
    SkillResult {
        skill: String,
        duration_ms: u64,
        timestamp: i64,
    },
    SkillValidationRetry {
        skill: String,
        attempt: u32,
        feedback: String,
        timestamp: i64,
    },
    Error {
        message: String,
        timestamp: i64,
    },
    Done {
        response: String,
        timestamp: i64,
    },
}

impl AgentEvent {
    pub fn token(content: impl Into<String>) -> Self {
        AgentEvent::Token {
            content: content.into(),
            timestamp: now_ms(),
        }
    }

    pub fn skill_call(skill: impl Into<String>) -> Self {
        AgentEvent::SkillCall {
            skill: skill.into(),
            timestamp: now_ms(),
        }
    }

    pub fn skill_result(skill: impl Into<String>, duration_ms: u64) -> Self {
        AgentEvent::SkillResult {
            skill: skill.into(),
            duration_ms,
            timestamp: now_ms(),
        }
    }

    pub fn validation_retry(skill: impl Into<String>, attempt: u32, feedback: String) -> Self {
        AgentEvent::SkillValidationRetry {
            skill: skill.into(),
            attempt,
            feedback,
            timestamp: now_ms(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        AgentEvent::Error {
            message: message.into(),
            timestamp: now_ms(),
        }
    }

    pub fn done(response: impl Into<String>) -> Self {
        AgentEvent::Done {
            response: response.into(),
            timestamp: now_ms(),
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Shared emitter handed to every call frame of a request.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
    on_event: Option<EventCallback>,
}

impl EventSink {
    pub fn channel(on_event: Option<EventCallback>) -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            EventSink {
                tx: Some(tx),
                on_event,
            },
            EventStream { rx },
        )
    }

    /// Sink that drops everything; used by detached skill invocations.
    pub fn null() -> Self {
        EventSink::default()
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(cb) = &self.on_event {
            cb(&event);
            return;
        }
        if let Some(tx) = &self.tx {
            // The receiver being gone just means nobody is listening.
            let _ = tx.send(event);
        }
    }
}

/// Stream of [`AgentEvent`]s for one request.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<AgentEvent>,
}

impl futures::Stream for EventStream {
    type Item = AgentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
