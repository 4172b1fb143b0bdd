use serde::Serialize;
use std::sync::Arc;

use super::backend::ChatBackend;
use super::transcript::Transcript;
use crate::logging;

/// Prefix of the assistant turn recorded when a completion call fails.
pub const ERROR_PLACEHOLDER: &str = "⚠️ API error";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    #[default]
    Idle,
    AwaitingReply,
}

/// Chat state owned by one session.
#[derive(Debug, Default)]
pub struct ChatSession {
    transcript: Transcript,
    state: RelayState,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> RelayState {
        self.state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Empty text, transcript untouched.
    Ignored,
    /// The session was still awaiting a reply. The HTTP layer serializes each
    /// session's submissions behind its chat lock and `InFlight` resets the
    /// state on every exit, so only library callers that manage
    /// `ChatSession` state themselves can observe this.
    Busy,
    Replied,
    /// The error placeholder was appended.
    Failed,
}

/// Returns the session to idle even if the in-flight future is dropped.
struct InFlight<'a> {
    state: &'a mut RelayState,
}

impl<'a> InFlight<'a> {
    fn begin(state: &'a mut RelayState) -> Self {
        *state = RelayState::AwaitingReply;
        Self { state }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.state = RelayState::Idle;
    }
}

pub struct ChatRelay {
    backend: Arc<dyn ChatBackend>,
    system_prompt: String,
}

impl ChatRelay {
    pub fn new(backend: Arc<dyn ChatBackend>, system_prompt: &str) -> Self {
        Self {
            backend,
            system_prompt: system_prompt.to_string(),
        }
    }

    /// Append the user turn, send the whole transcript, append the reply or
    /// the error placeholder. The transcript is sent in full on every turn.
    pub async fn submit(&self, session_id: &str, chat: &mut ChatSession, text: &str) -> SubmitOutcome {
        if text.is_empty() {
            return SubmitOutcome::Ignored;
        }
        if chat.state == RelayState::AwaitingReply {
            return SubmitOutcome::Busy;
        }

        chat.transcript.push_user(text);
        let messages = chat.transcript.request_messages(&self.system_prompt);

        let reply = {
            let _in_flight = InFlight::begin(&mut chat.state);
            let _scope = logging::ProfileScope::with_context(
                "chat_completion",
                &[("session_id", logging::v_str(session_id))],
            );
            self.backend.complete(&messages).await
        };

        match reply {
            Ok(content) => {
                logging::log_chat_turn(session_id, self.backend.name(), messages.len(), true, "");
                chat.transcript.push_assistant(&content);
                SubmitOutcome::Replied
            }
            Err(err) => {
                logging::log_chat_turn(session_id, self.backend.name(), messages.len(), false, &err.to_string());
                chat.transcript.push_assistant(&format!("{}: {}", ERROR_PLACEHOLDER, err));
                SubmitOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::transcript::{Role, Turn};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies with a fixed string and records every request.
    struct Scripted {
        reply: &'static str,
        seen: Mutex<Vec<Vec<Turn>>>,
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, messages: &[Turn]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(self.reply.to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl ChatBackend for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn complete(&self, _messages: &[Turn]) -> Result<String> {
            Err(anyhow!("connection reset by peer"))
        }
    }

    fn scripted(reply: &'static str) -> Arc<Scripted> {
        Arc::new(Scripted {
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn reply_is_appended_after_user_turn() {
        let backend = scripted("Try Texas.");
        let relay = ChatRelay::new(backend.clone(), "sys");
        let mut chat = ChatSession::new();

        let outcome = relay.submit("s1", &mut chat, "Cheap schools?").await;

        assert_eq!(outcome, SubmitOutcome::Replied);
        let turns = chat.transcript().turns();
        assert_eq!(turns, &[Turn::user("Cheap schools?"), Turn::assistant("Try Texas.")]);
        assert_eq!(chat.state(), RelayState::Idle);
    }

    #[tokio::test]
    async fn full_transcript_sent_with_system_prompt() {
        let backend = scripted("ok");
        let relay = ChatRelay::new(backend.clone(), "sys");
        let mut chat = ChatSession::new();

        relay.submit("s1", &mut chat, "first").await;
        relay.submit("s1", &mut chat, "second").await;

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let last = &seen[1];
        assert_eq!(last.len(), 4);
        assert_eq!(last[0], Turn::system("sys"));
        assert_eq!(last[3], Turn::user("second"));
    }

    #[tokio::test]
    async fn transport_error_becomes_placeholder_turn() {
        let relay = ChatRelay::new(Arc::new(Broken), "sys");
        let mut chat = ChatSession::new();

        let outcome = relay.submit("s1", &mut chat, "hello?").await;

        assert_eq!(outcome, SubmitOutcome::Failed);
        let turns = chat.transcript().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], Turn::user("hello?"));
        assert_eq!(turns[1].role, Role::Assistant);
        assert!(turns[1].content.starts_with(ERROR_PLACEHOLDER));
        assert_eq!(chat.state(), RelayState::Idle);
    }

    #[tokio::test]
    async fn empty_text_is_ignored() {
        let backend = scripted("unused");
        let relay = ChatRelay::new(backend.clone(), "sys");
        let mut chat = ChatSession::new();

        assert_eq!(relay.submit("s1", &mut chat, "").await, SubmitOutcome::Ignored);
        assert!(chat.transcript().is_empty());
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn awaiting_session_rejects_new_text() {
        let relay = ChatRelay::new(scripted("x"), "sys");
        let mut chat = ChatSession::new();
        chat.state = RelayState::AwaitingReply;

        assert_eq!(relay.submit("s1", &mut chat, "again").await, SubmitOutcome::Busy);
        assert!(chat.transcript().is_empty());
    }

    #[test]
    fn in_flight_guard_restores_idle() {
        let mut state = RelayState::Idle;
        {
            let guard = InFlight::begin(&mut state);
            assert_eq!(*guard.state, RelayState::AwaitingReply);
        }
        assert_eq!(state, RelayState::Idle);
    }
}
