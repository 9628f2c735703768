//! Push-style reply producer for async streaming handlers.
//!
//! A handler that prefers pushing replies over returning a stream creates a
//! bounded channel, hands the [`ReplyReceiver`] back as its reply stream and
//! pushes through the [`ReplySender`] from a task it owns. `send` suspends
//! while the channel is full, so a slow transport applies backpressure to
//! the producer.
//!
//! # Example
//!
//! ```ignore
//! service.method("SayHelloGroup")?.server_streaming_async(|args, _ctx| async move {
//!     let (tx, rx) = reply_channel(4);
//!     tokio::spawn(async move {
//!         for name in ["a", "b"] {
//!             if tx.send(json!({ "message": format!("Hello {name}!") })).await.is_err() {
//!                 break;
//!             }
//!         }
//!     });
//!     Ok(rx)
//! })?;
//! ```

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::stream::Stream;
use tokio::sync::mpsc;
use tonic::Status;

use super::Reply;

/// Default channel capacity used by [`reply_channel`] callers that have no
/// better estimate.
pub const DEFAULT_REPLY_CAPACITY: usize = 16;

/// Create a bounded reply channel.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn reply_channel(capacity: usize) -> (ReplySender, ReplyReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (ReplySender { tx }, ReplyReceiver { rx })
}

/// Pushing half of a reply channel.
#[derive(Debug, Clone)]
pub struct ReplySender {
    tx: mpsc::Sender<Result<Reply, Status>>,
}

impl ReplySender {
    /// Push one reply, waiting for room in the channel.
    ///
    /// Fails with `Cancelled` once the receiving side is gone (the call
    /// finished or was cancelled); producers should stop at that point.
    pub async fn send(&self, reply: impl Into<Reply>) -> Result<(), Status> {
        self.tx
            .send(Ok(reply.into()))
            .await
            .map_err(|_| Status::cancelled("reply stream closed"))
    }

    /// Terminate the stream with an error status.
    pub async fn fail(&self, status: Status) -> Result<(), Status> {
        self.tx
            .send(Err(status))
            .await
            .map_err(|_| Status::cancelled("reply stream closed"))
    }

    /// True once the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a reply channel; a stream of replies.
#[derive(Debug)]
pub struct ReplyReceiver {
    rx: mpsc::Receiver<Result<Reply, Status>>,
}

impl Stream for ReplyReceiver {
    type Item = Result<Reply, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
