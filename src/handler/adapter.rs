//! Call adapters.
//!
//! An adapter turns a plain handler function into a transport-facing entry
//! point for one method. Every adapter follows the same steps: decode the
//! input, bind arguments, invoke the handler, encode the output (element by
//! element for sequence outputs).
//!
//! There is one constructor per call shape and execution style:
//!
//! | Shape | blocking | async |
//! |---|---|---|
//! | `SingleSingle` | [`unary`] | [`unary_async`] |
//! | `SingleSequence` | [`server_streaming`] | [`server_streaming_async`] |
//! | `SequenceSingle` | [`client_streaming`] | [`client_streaming_async`] |
//! | `SequenceSequence` | [`streaming`] | [`streaming_async`] |
//!
//! The type-erased result is stored in a [`MethodHandler`] and exposed to the
//! transport through [`CallAdapter`].

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{Stream, StreamExt};
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::Status;

use super::{Args, Binder, Context};
use crate::codec::{
    MessageCodec, RecordIter, RecordStream, Reply, ReplyIter, ReplyStream, RequestIter,
    RequestStream,
};
use crate::contract::{CallShape, MethodMetadata};

/// One record or a lazy sequence of records.
pub enum Payload<S> {
    /// A single record.
    Single(DynamicMessage),
    /// A lazy, single-pass sequence of records.
    Sequence(S),
}

/// Payload exchanged with blocking adapters.
pub type BlockingPayload = Payload<RecordIter>;

/// Payload exchanged with async adapters.
pub type AsyncPayload = Payload<RecordStream>;

impl<S> Payload<S> {
    /// True for the sequence variant.
    pub fn is_sequence(&self) -> bool {
        matches!(self, Payload::Sequence(_))
    }

    /// Take the single record.
    pub fn into_single(self) -> Result<DynamicMessage, Status> {
        match self {
            Payload::Single(record) => Ok(record),
            Payload::Sequence(_) => Err(Status::internal("expected a single record")),
        }
    }

    /// Take the record sequence.
    pub fn into_sequence(self) -> Result<S, Status> {
        match self {
            Payload::Sequence(records) => Ok(records),
            Payload::Single(_) => Err(Status::internal("expected a record sequence")),
        }
    }
}

impl<S> fmt::Debug for Payload<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Single(record) => f.debug_tuple("Single").field(record).finish(),
            Payload::Sequence(_) => f.write_str("Sequence(..)"),
        }
    }
}

/// Type-erased blocking entry point.
pub trait BlockingHandler: Send + Sync + 'static {
    /// Run the call on the current thread.
    fn call(&self, request: BlockingPayload, ctx: Context) -> Result<BlockingPayload, Status>;
}

impl<F> BlockingHandler for F
where
    F: Fn(BlockingPayload, Context) -> Result<BlockingPayload, Status> + Send + Sync + 'static,
{
    fn call(&self, request: BlockingPayload, ctx: Context) -> Result<BlockingPayload, Status> {
        self(request, ctx)
    }
}

/// Type-erased async entry point.
pub trait AsyncHandler: Send + Sync + 'static {
    /// Start the call; the future suspends instead of blocking.
    fn call(&self, request: AsyncPayload, ctx: Context)
        -> BoxFuture<'static, Result<AsyncPayload, Status>>;
}

impl<F> AsyncHandler for F
where
    F: Fn(AsyncPayload, Context) -> BoxFuture<'static, Result<AsyncPayload, Status>>
        + Send
        + Sync
        + 'static,
{
    fn call(
        &self,
        request: AsyncPayload,
        ctx: Context,
    ) -> BoxFuture<'static, Result<AsyncPayload, Status>> {
        self(request, ctx)
    }
}

fn into_reply<R: Into<Reply>>(item: Result<R, Status>) -> Result<Reply, Status> {
    item.map(Into::into)
}

fn bind_single<S>(binder: &Binder, request: Payload<S>) -> Result<Args, Status> {
    let record = request.into_single()?;
    Ok(binder.bind(MessageCodec::decode(record)?))
}

fn finish_single<S>(output_type: &MessageDescriptor, reply: Reply, ctx: &Context) -> Result<Payload<S>, Status> {
    if let Some(status) = ctx.take_status() {
        return Err(status);
    }
    Ok(Payload::Single(MessageCodec::encode(output_type, reply)?))
}

/// Blocking adapter for a `SingleSingle` method.
pub fn unary<F, R>(binder: Binder, output_type: MessageDescriptor, handler: F) -> Arc<dyn BlockingHandler>
where
    F: Fn(Args, Context) -> Result<R, Status> + Send + Sync + 'static,
    R: Into<Reply>,
{
    Arc::new(
        move |request: BlockingPayload, ctx: Context| -> Result<BlockingPayload, Status> {
            let args = bind_single(&binder, request)?;
            let reply = handler(args, ctx.clone())?;
            finish_single(&output_type, reply.into(), &ctx)
        },
    )
}

/// Blocking adapter for a `SingleSequence` method.
///
/// The handler returns an iterator; its elements are encoded as the
/// transport pulls them.
pub fn server_streaming<F, I, R>(
    binder: Binder,
    output_type: MessageDescriptor,
    handler: F,
) -> Arc<dyn BlockingHandler>
where
    F: Fn(Args, Context) -> Result<I, Status> + Send + Sync + 'static,
    I: IntoIterator<Item = Result<R, Status>>,
    I::IntoIter: Send + 'static,
    R: Into<Reply> + 'static,
{
    Arc::new(
        move |request: BlockingPayload, ctx: Context| -> Result<BlockingPayload, Status> {
            let args = bind_single(&binder, request)?;
            let replies = handler(args, ctx.clone())?
                .into_iter()
                .map(into_reply);
            Ok(Payload::Sequence(Box::new(ReplyIter::new(
                output_type.clone(),
                replies,
                ctx,
            ))))
        },
    )
}

/// Blocking adapter for a `SequenceSingle` method.
pub fn client_streaming<F, R>(output_type: MessageDescriptor, handler: F) -> Arc<dyn BlockingHandler>
where
    F: Fn(RequestIter, Context) -> Result<R, Status> + Send + Sync + 'static,
    R: Into<Reply>,
{
    Arc::new(
        move |request: BlockingPayload, ctx: Context| -> Result<BlockingPayload, Status> {
            let requests = RequestIter::new(request.into_sequence()?, ctx.clone());
            let reply = handler(requests, ctx.clone())?;
            finish_single(&output_type, reply.into(), &ctx)
        },
    )
}

/// Blocking adapter for a `SequenceSequence` method.
pub fn streaming<F, I, R>(output_type: MessageDescriptor, handler: F) -> Arc<dyn BlockingHandler>
where
    F: Fn(RequestIter, Context) -> Result<I, Status> + Send + Sync + 'static,
    I: IntoIterator<Item = Result<R, Status>>,
    I::IntoIter: Send + 'static,
    R: Into<Reply> + 'static,
{
    Arc::new(
        move |request: BlockingPayload, ctx: Context| -> Result<BlockingPayload, Status> {
            let requests = RequestIter::new(request.into_sequence()?, ctx.clone());
            let replies = handler(requests, ctx.clone())?
                .into_iter()
                .map(into_reply);
            Ok(Payload::Sequence(Box::new(ReplyIter::new(
                output_type.clone(),
                replies,
                ctx,
            ))))
        },
    )
}

fn reply_stream<S, R>(output_type: MessageDescriptor, replies: S, ctx: Context) -> RecordStream
where
    S: Stream<Item = Result<R, Status>> + Send + 'static,
    R: Into<Reply> + 'static,
{
    let replies = replies.map(into_reply).boxed();
    ReplyStream::new(output_type, replies, ctx).boxed()
}

/// Async adapter for a `SingleSingle` method.
pub fn unary_async<F, Fut, R>(
    binder: Binder,
    output_type: MessageDescriptor,
    handler: F,
) -> Arc<dyn AsyncHandler>
where
    F: Fn(Args, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Status>> + Send + 'static,
    R: Into<Reply> + Send + 'static,
{
    Arc::new(
        move |request: AsyncPayload, ctx: Context| -> BoxFuture<'static, Result<AsyncPayload, Status>> {
            let args = match bind_single(&binder, request) {
                Ok(args) => args,
                Err(status) => return future::ready(Err(status)).boxed(),
            };
            let call = handler(args, ctx.clone());
            let output_type = output_type.clone();
            async move {
                let reply = call.await?;
                finish_single::<RecordStream>(&output_type, reply.into(), &ctx)
            }
            .boxed()
        },
    )
}

/// Async adapter for a `SingleSequence` method.
///
/// The handler resolves to a stream (for instance a [`ReplyReceiver`]); its
/// elements are encoded as the transport polls them.
///
/// [`ReplyReceiver`]: crate::codec::ReplyReceiver
pub fn server_streaming_async<F, Fut, S, R>(
    binder: Binder,
    output_type: MessageDescriptor,
    handler: F,
) -> Arc<dyn AsyncHandler>
where
    F: Fn(Args, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S, Status>> + Send + 'static,
    S: Stream<Item = Result<R, Status>> + Send + 'static,
    R: Into<Reply> + 'static,
{
    Arc::new(
        move |request: AsyncPayload, ctx: Context| -> BoxFuture<'static, Result<AsyncPayload, Status>> {
            let args = match bind_single(&binder, request) {
                Ok(args) => args,
                Err(status) => return future::ready(Err(status)).boxed(),
            };
            let call = handler(args, ctx.clone());
            let output_type = output_type.clone();
            async move {
                let replies = call.await?;
                Ok::<_, Status>(Payload::Sequence(reply_stream(output_type, replies, ctx)))
            }
            .boxed()
        },
    )
}

/// Async adapter for a `SequenceSingle` method.
pub fn client_streaming_async<F, Fut, R>(output_type: MessageDescriptor, handler: F) -> Arc<dyn AsyncHandler>
where
    F: Fn(RequestStream, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Status>> + Send + 'static,
    R: Into<Reply> + Send + 'static,
{
    Arc::new(
        move |request: AsyncPayload, ctx: Context| -> BoxFuture<'static, Result<AsyncPayload, Status>> {
            let records = match request.into_sequence() {
                Ok(records) => records,
                Err(status) => return future::ready(Err(status)).boxed(),
            };
            let call = handler(RequestStream::new(records, ctx.clone()), ctx.clone());
            let output_type = output_type.clone();
            async move {
                let reply = call.await?;
                finish_single::<RecordStream>(&output_type, reply.into(), &ctx)
            }
            .boxed()
        },
    )
}

/// Async adapter for a `SequenceSequence` method.
pub fn streaming_async<F, Fut, S, R>(output_type: MessageDescriptor, handler: F) -> Arc<dyn AsyncHandler>
where
    F: Fn(RequestStream, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S, Status>> + Send + 'static,
    S: Stream<Item = Result<R, Status>> + Send + 'static,
    R: Into<Reply> + 'static,
{
    Arc::new(
        move |request: AsyncPayload, ctx: Context| -> BoxFuture<'static, Result<AsyncPayload, Status>> {
            let records = match request.into_sequence() {
                Ok(records) => records,
                Err(status) => return future::ready(Err(status)).boxed(),
            };
            let call = handler(RequestStream::new(records, ctx.clone()), ctx.clone());
            let output_type = output_type.clone();
            async move {
                let replies = call.await?;
                Ok::<_, Status>(Payload::Sequence(reply_stream(output_type, replies, ctx)))
            }
            .boxed()
        },
    )
}

/// Execution style of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Runs to completion on the calling thread.
    Blocking,
    /// Suspends at element boundaries instead of blocking.
    Async,
}

/// A type-erased handler, or the unimplemented fallback.
#[derive(Clone)]
pub enum MethodHandler {
    /// Blocking adapter.
    Blocking(Arc<dyn BlockingHandler>),
    /// Async adapter.
    Async(Arc<dyn AsyncHandler>),
    /// No handler registered; every call answers `Unimplemented`.
    Unimplemented,
}

impl MethodHandler {
    /// Execution style, `None` for the unimplemented fallback.
    pub fn execution(&self) -> Option<Execution> {
        match self {
            MethodHandler::Blocking(_) => Some(Execution::Blocking),
            MethodHandler::Async(_) => Some(Execution::Async),
            MethodHandler::Unimplemented => None,
        }
    }
}

impl fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodHandler::Blocking(_) => f.write_str("Blocking(..)"),
            MethodHandler::Async(_) => f.write_str("Async(..)"),
            MethodHandler::Unimplemented => f.write_str("Unimplemented"),
        }
    }
}

/// Transport-facing entry point for one method.
///
/// Cheap to clone; transports typically clone it into each call task.
#[derive(Debug, Clone)]
pub struct CallAdapter {
    method: MethodMetadata,
    handler: MethodHandler,
}

impl CallAdapter {
    /// Create an adapter for `method` backed by `handler`.
    pub fn new(method: MethodMetadata, handler: MethodHandler) -> Self {
        Self { method, handler }
    }

    /// Create an adapter that answers every call with `Unimplemented`.
    pub fn unimplemented(method: MethodMetadata) -> Self {
        Self::new(method, MethodHandler::Unimplemented)
    }

    /// Metadata of the adapted method.
    #[inline]
    pub fn metadata(&self) -> &MethodMetadata {
        &self.method
    }

    /// Call shape of the adapted method.
    #[inline]
    pub fn shape(&self) -> CallShape {
        self.method.shape()
    }

    /// Execution style, `None` when unimplemented.
    #[inline]
    pub fn execution(&self) -> Option<Execution> {
        self.handler.execution()
    }

    /// True when the transport should use [`call`](Self::call).
    pub fn is_async(&self) -> bool {
        self.execution() == Some(Execution::Async)
    }

    /// True when a handler was registered.
    pub fn is_implemented(&self) -> bool {
        !matches!(self.handler, MethodHandler::Unimplemented)
    }

    fn unimplemented_status(&self) -> Status {
        tracing::debug!("No handler registered for {}", self.method.path());
        Status::unimplemented("Method not implemented!")
    }

    fn panicked(&self) -> Status {
        tracing::error!("Handler for {} panicked", self.method.path());
        Status::internal("handler panicked")
    }

    fn check_input<S>(&self, request: &Payload<S>) -> Result<(), Status> {
        if request.is_sequence() == self.shape().is_sequence_input() {
            return Ok(());
        }
        Err(Status::internal(format!(
            "{} is {} but the transport supplied a {} input",
            self.method.path(),
            self.shape(),
            if request.is_sequence() { "sequence" } else { "single" }
        )))
    }

    fn log_failure(&self, status: &Status) {
        tracing::debug!(
            "Call to {} failed: {:?} {}",
            self.method.path(),
            status.code(),
            status.message()
        );
    }

    /// Invoke a blocking handler on the calling thread.
    ///
    /// Handler errors and panics become a failed-call status; they never
    /// unwind into the transport.
    pub fn call_blocking(&self, request: BlockingPayload, ctx: Context) -> Result<BlockingPayload, Status> {
        self.check_input(&request)?;
        let result = match &self.handler {
            MethodHandler::Blocking(handler) => {
                catch_unwind(AssertUnwindSafe(|| handler.call(request, ctx)))
                    .unwrap_or_else(|_| Err(self.panicked()))
            }
            MethodHandler::Async(_) => Err(Status::internal(format!(
                "{} has an async handler; use the async entry point",
                self.method.path()
            ))),
            MethodHandler::Unimplemented => return Err(self.unimplemented_status()),
        };
        if let Err(status) = &result {
            self.log_failure(status);
        }
        result
    }

    /// Invoke an async handler.
    ///
    /// Handler errors and panics become a failed-call status; they never
    /// unwind into the transport.
    pub async fn call(&self, request: AsyncPayload, ctx: Context) -> Result<AsyncPayload, Status> {
        self.check_input(&request)?;
        let result = match &self.handler {
            MethodHandler::Async(handler) => {
                match catch_unwind(AssertUnwindSafe(|| handler.call(request, ctx))) {
                    Ok(call) => AssertUnwindSafe(call)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(self.panicked())),
                    Err(_) => Err(self.panicked()),
                }
            }
            MethodHandler::Blocking(_) => Err(Status::internal(format!(
                "{} has a blocking handler; use the blocking entry point",
                self.method.path()
            ))),
            MethodHandler::Unimplemented => return Err(self.unimplemented_status()),
        };
        if let Err(status) = &result {
            self.log_failure(status);
        }
        result
    }
}
