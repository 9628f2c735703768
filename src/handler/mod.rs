//! Handler module - binding and adapting user handlers.
//!
//! Provides:
//! - [`Context`] - cancellation, deadline and status signaling for a call
//! - [`Binder`] / [`Args`] - per-handler parameter binding
//! - [`CallAdapter`] - the transport-facing entry point for one method
//!
//! # Example
//!
//! ```ignore
//! use rpcwire::handler::{unary, Args, Binder, CallAdapter, Context, MethodHandler};
//!
//! let handler = unary(Binder::new(["name"]), method.output_type().clone(), |args: Args, _ctx: Context| {
//!     Ok::<_, Status>(json!({ "message": format!("Hello {}!", args.str("name").unwrap_or_default()) }))
//! });
//! let adapter = CallAdapter::new(method, MethodHandler::Blocking(handler));
//! ```

mod adapter;
mod binder;
mod context;

pub use adapter::{
    client_streaming, client_streaming_async, server_streaming, server_streaming_async, streaming,
    streaming_async, unary, unary_async, AsyncHandler, AsyncPayload, BlockingHandler,
    BlockingPayload, CallAdapter, Execution, MethodHandler, Payload,
};
pub use binder::{Args, Binder, RESERVED_PARAMETERS};
pub use context::Context;
