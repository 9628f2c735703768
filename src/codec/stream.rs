//! Lazy, single-pass record sequences.
//!
//! Input sequences are decoded one element at a time as the handler pulls
//! them; output sequences are encoded one element at a time as the
//! transport pulls them. Nothing is buffered, so unbounded producers work.
//!
//! Both directions watch the call [`Context`]: once the call is cancelled
//! (or its deadline passes) a sequence yields a single cancellation status
//! and then ends.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{BoxStream, Stream, StreamExt};
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::Status;

use super::{Decoded, MessageCodec, Reply};
use crate::handler::Context;

/// Blocking sequence of raw records, as supplied to or returned from a transport.
pub type RecordIter = Box<dyn Iterator<Item = Result<DynamicMessage, Status>> + Send>;

/// Async sequence of raw records, as supplied to or returned from a transport.
pub type RecordStream = BoxStream<'static, Result<DynamicMessage, Status>>;

fn panicked() -> Status {
    tracing::error!("Handler panicked while producing a reply stream");
    Status::internal("handler panicked")
}

/// Blocking sequence of decoded input records.
///
/// Every element carries its raw record; see [`Decoded::raw`].
pub struct RequestIter {
    records: RecordIter,
    ctx: Context,
    done: bool,
}

impl RequestIter {
    /// Wrap a raw record iterator.
    pub fn new(records: RecordIter, ctx: Context) -> Self {
        Self {
            records,
            ctx,
            done: false,
        }
    }
}

impl Iterator for RequestIter {
    type Item = Result<Decoded, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.ctx.is_cancelled() {
            self.done = true;
            return Some(Err(self.ctx.cancellation_status()));
        }

        match self.records.next() {
            Some(Ok(record)) => Some(MessageCodec::decode(record).map_err(Status::from)),
            Some(Err(status)) => {
                self.done = true;
                Some(Err(status))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Blocking sequence of encoded output records.
///
/// Pulls one reply from the handler per `next` call and encodes it into the
/// output record type. Stops after the first error. When the handler's
/// sequence ends, a status set on the context is reported as a final error.
pub struct ReplyIter<I> {
    output_type: MessageDescriptor,
    replies: I,
    ctx: Context,
    done: bool,
}

impl<I> ReplyIter<I>
where
    I: Iterator<Item = Result<Reply, Status>>,
{
    /// Wrap a handler's reply iterator.
    pub fn new(output_type: MessageDescriptor, replies: I, ctx: Context) -> Self {
        Self {
            output_type,
            replies,
            ctx,
            done: false,
        }
    }
}

impl<I> Iterator for ReplyIter<I>
where
    I: Iterator<Item = Result<Reply, Status>>,
{
    type Item = Result<DynamicMessage, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.ctx.is_cancelled() {
            self.done = true;
            return Some(Err(self.ctx.cancellation_status()));
        }

        let next = catch_unwind(AssertUnwindSafe(|| self.replies.next()))
            .unwrap_or_else(|_| Some(Err(panicked())));

        let item = match next {
            Some(Ok(reply)) => MessageCodec::encode(&self.output_type, reply).map_err(Status::from),
            Some(Err(status)) => Err(status),
            None => {
                self.done = true;
                return self.ctx.take_status().map(Err);
            }
        };
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

fn cancellation(ctx: &Context) -> BoxFuture<'static, ()> {
    let ctx = ctx.clone();
    Box::pin(async move { ctx.cancelled().await })
}

/// Async sequence of decoded input records.
///
/// Each poll either yields the next decoded element or suspends until the
/// transport produces one; cancellation wakes a pending poll.
pub struct RequestStream {
    records: RecordStream,
    ctx: Context,
    cancelled: BoxFuture<'static, ()>,
    done: bool,
}

impl RequestStream {
    /// Wrap a raw record stream.
    pub fn new(records: RecordStream, ctx: Context) -> Self {
        Self {
            records,
            cancelled: cancellation(&ctx),
            ctx,
            done: false,
        }
    }
}

impl Stream for RequestStream {
    type Item = Result<Decoded, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if this.ctx.is_cancelled() || this.cancelled.poll_unpin(cx).is_ready() {
            this.done = true;
            return Poll::Ready(Some(Err(this.ctx.cancellation_status())));
        }

        match this.records.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(record))) => {
                Poll::Ready(Some(MessageCodec::decode(record).map_err(Status::from)))
            }
            Poll::Ready(Some(Err(status))) => {
                this.done = true;
                Poll::Ready(Some(Err(status)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Async sequence of encoded output records.
///
/// The async counterpart of [`ReplyIter`], with the same end-of-stream and
/// error semantics.
pub struct ReplyStream {
    output_type: MessageDescriptor,
    replies: BoxStream<'static, Result<Reply, Status>>,
    ctx: Context,
    cancelled: BoxFuture<'static, ()>,
    done: bool,
}

impl ReplyStream {
    /// Wrap a handler's reply stream.
    pub fn new(
        output_type: MessageDescriptor,
        replies: BoxStream<'static, Result<Reply, Status>>,
        ctx: Context,
    ) -> Self {
        Self {
            output_type,
            replies,
            cancelled: cancellation(&ctx),
            ctx,
            done: false,
        }
    }
}

impl Stream for ReplyStream {
    type Item = Result<DynamicMessage, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if this.ctx.is_cancelled() || this.cancelled.poll_unpin(cx).is_ready() {
            this.done = true;
            return Poll::Ready(Some(Err(this.ctx.cancellation_status())));
        }

        let polled = catch_unwind(AssertUnwindSafe(|| this.replies.poll_next_unpin(cx)))
            .unwrap_or_else(|_| Poll::Ready(Some(Err(panicked()))));

        let item = match polled {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Some(Ok(reply))) => {
                MessageCodec::encode(&this.output_type, reply).map_err(Status::from)
            }
            Poll::Ready(Some(Err(status))) => Err(status),
            Poll::Ready(None) => {
                this.done = true;
                return Poll::Ready(this.ctx.take_status().map(Err));
            }
        };
        if item.is_err() {
            this.done = true;
        }
        Poll::Ready(Some(item))
    }
}
