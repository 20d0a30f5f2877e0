//! # Control Messages
//!
//! Version negotiation rides on the same channel as application traffic,
//! under the reserved `RUN` and `RUN_OR_CLOSE_PIPE` message ids.
//!
//! - `ControlMessageProxy` is the asking side. It lives in the
//!   `ChannelSender` and turns typed requests into messages.
//! - `ControlMessageHandler` is the answering side. The channel actor hands it
//!   every reserved-id message addressed to the local receiver.
//!
//! A malformed control message, or a requirement this end cannot meet,
//! closes the channel. There is no error reply.

use std::sync::Arc;

use bondrpc::Error;
use bondrpc::Message;
use bondrpc::MessageId;
use bondrpc::Result;
use bondrpc::RunInput;
use bondrpc::RunMessageParams;
use bondrpc::RunOrClosePipeInput;
use bondrpc::RunOrClosePipeParams;
use bondrpc::RunOutput;
use bondrpc::RunResponseParams;
use bondrpc::SerializationContext;

use crate::endpoint::MessageReceiver;
use crate::endpoint::MessageReceiverWithResponder;

type VersionCallback = Box<dyn FnOnce(u32) + Send>;

/// Sends control requests through a `MessageReceiverWithResponder`.
pub struct ControlMessageProxy {
    receiver: Arc<dyn MessageReceiverWithResponder>,
    context: SerializationContext,
}

impl ControlMessageProxy {
    pub fn new(receiver: Arc<dyn MessageReceiverWithResponder>) -> Self {
        Self { receiver, context: SerializationContext::new() }
    }

    /// Sends `Run(QueryVersion)`. `callback` gets the reported version, or 0
    /// if the answer carries no version.
    pub fn query_version(&mut self, callback: impl FnOnce(u32) + Send + 'static) {
        let params = RunMessageParams { input: RunInput::QueryVersion };
        let payload = match self.context.serialize(&params) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode query");
                return;
            }
        };

        let responder = RunResponseForwardToCallback::new(Box::new(callback));
        // On refusal the responder is dropped inside the call.
        if !self
            .receiver
            .accept_with_responder(Message::request(MessageId::RUN, payload), Box::new(responder))
        {
            tracing::debug!("query dropped, channel closed");
        }
    }

    /// Sends `RunOrClosePipe(RequireVersion(version))`.
    pub fn require_version(&mut self, version: u32) {
        let params = RunOrClosePipeParams {
            input: RunOrClosePipeInput::RequireVersion { version },
        };
        let payload = match self.context.serialize(&params) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode requirement");
                return;
            }
        };

        if !self.receiver.accept(Message::new(MessageId::RUN_OR_CLOSE_PIPE, payload)) {
            tracing::debug!(version, "requirement dropped, channel closed");
        }
    }
}

/// Responder for a `Run` request: decodes `RunResponseParams` and hands the
/// version to the caller's callback.
pub(crate) struct RunResponseForwardToCallback {
    callback: Option<VersionCallback>,
    context: SerializationContext,
}

impl RunResponseForwardToCallback {
    pub(crate) fn new(callback: VersionCallback) -> Self {
        Self { callback: Some(callback), context: SerializationContext::new() }
    }
}

impl MessageReceiver for RunResponseForwardToCallback {
    fn accept(&mut self, message: Message) -> bool {
        let params: RunResponseParams = match self.context.deserialize(&message.payload) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable control response");
                return false;
            }
        };
        if let Some(callback) = self.callback.take() {
            callback(params.queried_version());
        }
        true
    }
}

/// Answers control messages on behalf of the local receiver.
pub(crate) struct ControlMessageHandler {
    version: u32,
    context: SerializationContext,
}

impl ControlMessageHandler {
    pub(crate) fn new(version: u32) -> Self {
        Self { version, context: SerializationContext::new() }
    }

    /// Returns the response to send, if any. An error means the channel
    /// must close.
    pub(crate) fn handle(&mut self, message: &Message) -> Result<Option<Message>> {
        match message.name() {
            MessageId::RUN => self.run(message).map(Some),
            MessageId::RUN_OR_CLOSE_PIPE => self.run_or_close_pipe(message).map(|()| None),
            other => Err(Error::ReservedMessageId(other.raw())),
        }
    }

    fn run(&mut self, message: &Message) -> Result<Message> {
        if !message.expects_response() {
            return Err(Error::ProtocolViolation("run sent without a response slot".into()));
        }
        let params: RunMessageParams = self.context.deserialize(&message.payload)?;
        let output = match params.input {
            RunInput::QueryVersion => Some(RunOutput::QueryVersionResult { version: self.version }),
            RunInput::RequireVersion { version } => {
                self.require(version)?;
                None
            }
        };
        let payload = self.context.serialize(&RunResponseParams { output })?;
        Ok(Message::response_to(&message.header, payload))
    }

    fn run_or_close_pipe(&mut self, message: &Message) -> Result<()> {
        let params: RunOrClosePipeParams = self.context.deserialize(&message.payload)?;
        match params.input {
            RunOrClosePipeInput::RequireVersion { version } => self.require(version),
        }
    }

    fn require(&self, version: u32) -> Result<()> {
        if version > self.version {
            return Err(Error::ProtocolViolation(format!(
                "peer requires version {}, this end implements {}",
                version, self.version
            )));
        }
        Ok(())
    }
}
