//! Request/reply plumbing between ranks.
//!
//! A service is hosted by exactly one rank (see [`crate::Universe::serve`])
//! and addressed by name. Requests and replies are [`Message`] envelopes;
//! every reply must echo the request's correlation id. [`ReplyToken`] is an
//! opaque handle carrying the route back to the requesting rank — the
//! server must pass it to [`RequestHandler::send_reply`] unchanged.

use std::sync::mpsc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::CommError;
use crate::message::Message;

/// Opaque token carrying the reply route for one request.
pub struct ReplyToken {
    tx: mpsc::Sender<Message>,
}

/// One in-flight request: the envelope plus its reply route.
pub(crate) struct RpcEnvelope {
    pub(crate) message: Message,
    pub(crate) reply: mpsc::Sender<Message>,
}

/// Sends a request and waits for the matching reply.
pub trait RequestSender {
    /// Send a request and wait for a single reply within `timeout`.
    fn request(&self, message: Message, timeout: Duration) -> Result<Message, CommError>;
}

/// Receives requests and sends replies routed by [`ReplyToken`].
pub trait RequestHandler {
    /// Receive the next request from any connected client.
    fn recv_request(&self) -> Result<(ReplyToken, Message), CommError>;

    /// Send a reply to the client identified by the token.
    fn send_reply(&self, token: ReplyToken, reply: Message) -> Result<(), CommError>;
}

/// Client half of an in-process request/reply channel.
pub struct ChannelRequestClient {
    tx: mpsc::Sender<RpcEnvelope>,
}

impl ChannelRequestClient {
    pub(crate) fn new(tx: mpsc::Sender<RpcEnvelope>) -> Self {
        Self { tx }
    }
}

impl RequestSender for ChannelRequestClient {
    fn request(&self, message: Message, timeout: Duration) -> Result<Message, CommError> {
        let cid = message.correlation_id;
        let topic = message.topic.clone();
        let (reply_tx, reply_rx) = mpsc::channel();

        self.tx
            .send(RpcEnvelope {
                message,
                reply: reply_tx,
            })
            .map_err(|_| CommError::Transport("request service closed".into()))?;
        debug!(correlation_id = %cid, topic = %topic, "sent request");

        let reply = match reply_rx.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(CommError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(CommError::Transport(
                    "reply channel closed before a reply was sent".into(),
                ))
            }
        };

        if reply.correlation_id != cid {
            warn!(
                expected = %cid,
                got = %reply.correlation_id,
                "reply correlation id mismatch"
            );
            return Err(CommError::Transport(
                "reply correlation id mismatch".into(),
            ));
        }
        Ok(reply)
    }
}

/// Server half of an in-process request/reply channel.
pub struct ChannelRequestServer {
    rx: mpsc::Receiver<RpcEnvelope>,
}

impl ChannelRequestServer {
    pub(crate) fn new(rx: mpsc::Receiver<RpcEnvelope>) -> Self {
        Self { rx }
    }
}

impl RequestHandler for ChannelRequestServer {
    fn recv_request(&self) -> Result<(ReplyToken, Message), CommError> {
        let envelope = self
            .rx
            .recv()
            .map_err(|_| CommError::Transport("all request clients disconnected".into()))?;
        debug!(
            correlation_id = %envelope.message.correlation_id,
            topic = %envelope.message.topic,
            "received request"
        );
        Ok((
            ReplyToken {
                tx: envelope.reply,
            },
            envelope.message,
        ))
    }

    fn send_reply(&self, token: ReplyToken, reply: Message) -> Result<(), CommError> {
        // A client that timed out has dropped its reply channel; that is
        // not the server's error.
        if token.tx.send(reply).is_err() {
            debug!("reply dropped: requesting client is gone");
        }
        Ok(())
    }
}
