//! Conversation state and the request/response cycle around it.
//!
//! A cycle appends the user's message optimistically, posts the whole
//! conversation, folds the streamed frames into the assistant's reply and
//! then either commits that reply or rolls the user's message back. Only one
//! cycle runs at a time per [`Reconciler`].

use crate::client::{ByteStream, ChatResponse, ChatTransport};
use crate::decoder::FrameDecoder;
use crate::protocol::{ChatRequest, ErrorBody, Frame, Message};
use futures::StreamExt;
use reqwest::StatusCode;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub const FALLBACK_ERROR: &str = "Something went wrong.";
const NO_BODY_ERROR: &str = "Streaming responses are not supported by this transport.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Network failure, failed status or a body that cannot be streamed.
    #[error("{0}")]
    Transport(String),
    /// The server reported an error inside the stream.
    #[error("{0}")]
    Stream(String),
    #[error("No reply returned from the assistant.")]
    EmptyReply,
    #[error("A reply is already in progress.")]
    Busy,
    #[error("Message is empty.")]
    EmptyMessage,
}

impl ChatError {
    fn transport(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            Self::Transport(FALLBACK_ERROR.to_string())
        } else {
            Self::Transport(message)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sending,
    Streaming,
    Settled,
}

impl Phase {
    pub fn is_busy(self) -> bool {
        matches!(self, Phase::Sending | Phase::Streaming)
    }
}

/// Rendering surface driven by a cycle.
pub trait ChatView {
    fn user_message(&mut self, content: &str);
    fn assistant_started(&mut self);
    /// The running reply text; replaces whatever was shown before.
    fn assistant_text(&mut self, text: &str);
    fn assistant_committed(&mut self, content: &str);
    /// Replaces the in-progress reply with an error annotation.
    fn assistant_failed(&mut self, message: &str);
    fn set_busy(&mut self, busy: bool);
}

/// Reply text and stream error collected during one cycle.
#[derive(Debug, Default)]
pub struct ReplyAccumulator {
    text: String,
    pending_error: Option<String>,
}

impl ReplyAccumulator {
    /// Applies `delta`, then `reply`, then `error`. Returns true when the
    /// running text changed.
    pub fn apply(&mut self, frame: &Frame) -> bool {
        let mut changed = false;

        if let Some(delta) = &frame.delta {
            self.text.push_str(delta);
            changed = true;
        }

        if let Some(reply) = &frame.reply {
            self.text.clone_from(reply);
            changed = true;
        }

        if let Some(error) = &frame.error {
            self.pending_error = Some(error.clone());
        }

        changed
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_reply(self) -> Result<String, ChatError> {
        if let Some(error) = self.pending_error {
            return Err(ChatError::Stream(error));
        }

        if self.text.trim().is_empty() {
            return Err(ChatError::EmptyReply);
        }

        Ok(self.text)
    }
}

struct State {
    phase: Phase,
    conversation: Vec<Message>,
}

pub struct Reconciler<T> {
    transport: T,
    state: Mutex<State>,
}

impl<T: ChatTransport> Reconciler<T> {
    pub fn new(transport: T) -> Self {
        Self::with_history(transport, Vec::new())
    }

    pub fn with_history(transport: T, messages: Vec<Message>) -> Self {
        Self {
            transport,
            state: Mutex::new(State {
                phase: Phase::Idle,
                conversation: messages,
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.state).conversation.clone()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase().is_busy()
    }

    /// Runs one full cycle for `input` and returns the committed reply.
    ///
    /// Blank input and submissions made while another cycle is in flight are
    /// rejected before anything is appended or rendered.
    pub async fn submit<V>(&self, input: &str, view: &mut V) -> Result<String, ChatError>
    where
        V: ChatView + Send + ?Sized,
    {
        let content = input.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (cycle, request) = self.begin(content)?;
        view.user_message(content);
        view.set_busy(true);
        view.assistant_started();

        let result = self.exchange(&request, view).await;

        view.set_busy(false);
        cycle.settle(&result);
        match &result {
            Ok(reply) => view.assistant_committed(reply),
            Err(err) => {
                tracing::warn!(error = %err, "chat cycle failed; user message rolled back");
                view.assistant_failed(&err.to_string());
            }
        }

        result
    }

    fn begin(&self, content: &str) -> Result<(Cycle<'_>, ChatRequest), ChatError> {
        let mut state = lock(&self.state);
        if state.phase.is_busy() {
            return Err(ChatError::Busy);
        }

        state.phase = Phase::Sending;
        state.conversation.push(Message::user(content));
        tracing::debug!(messages = state.conversation.len(), "cycle sending");

        let request = ChatRequest {
            messages: state.conversation.clone(),
        };
        let cycle = Cycle {
            state: &self.state,
            settled: false,
        };
        Ok((cycle, request))
    }

    async fn exchange<V>(&self, request: &ChatRequest, view: &mut V) -> Result<String, ChatError>
    where
        V: ChatView + Send + ?Sized,
    {
        let ChatResponse { status, body } = self
            .transport
            .post_chat(request)
            .await
            .map_err(|err| ChatError::transport(err.to_string()))?;

        if !status.is_success() {
            return Err(failure_from_status(status, body).await);
        }

        let Some(mut body) = body else {
            return Err(ChatError::transport(NO_BODY_ERROR));
        };

        lock(&self.state).phase = Phase::Streaming;
        tracing::debug!(%status, "cycle streaming");

        let mut decoder = FrameDecoder::new();
        let mut reply = ReplyAccumulator::default();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| ChatError::transport(err.to_string()))?;
            for frame in decoder.feed_bytes(&chunk) {
                apply_frame(&mut reply, &frame, view);
            }
        }

        if let Some(frame) = decoder.finish() {
            apply_frame(&mut reply, &frame, view);
        }

        reply.into_reply()
    }
}

/// Ends a cycle: commits or rolls back, and frees the reconciler for the
/// next submission. Dropping it unsettled counts as a failure.
struct Cycle<'a> {
    state: &'a Mutex<State>,
    settled: bool,
}

impl Cycle<'_> {
    fn settle(mut self, result: &Result<String, ChatError>) {
        let mut state = lock(self.state);
        match result {
            Ok(reply) => state.conversation.push(Message::assistant(reply.clone())),
            Err(_) => {
                state.conversation.pop();
            }
        }
        state.phase = Phase::Settled;
        self.settled = true;
    }
}

impl Drop for Cycle<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut state = lock(self.state);
        state.conversation.pop();
        state.phase = Phase::Settled;
        tracing::debug!("cycle abandoned; user message rolled back");
    }
}

fn apply_frame<V>(reply: &mut ReplyAccumulator, frame: &Frame, view: &mut V)
where
    V: ChatView + ?Sized,
{
    if reply.apply(frame) {
        view.assistant_text(reply.text());
    }
}

async fn failure_from_status(status: StatusCode, body: Option<ByteStream>) -> ChatError {
    let payload = match body {
        Some(body) => read_error_body(body).await,
        None => None,
    };

    let message = payload
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| FALLBACK_ERROR.to_string());
    ChatError::transport(message)
}

async fn read_error_body(mut body: ByteStream) -> Option<String> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk.ok()?);
    }

    serde_json::from_slice::<ErrorBody>(&bytes)
        .ok()?
        .error
        .filter(|error| !error.trim().is_empty())
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
