//! # rpcwire
//!
//! Attach plain handler functions to the methods of a protobuf service
//! contract without hand-writing the glue between wire records and
//! in-memory values.
//!
//! ## Architecture
//!
//! - **Contract** ([`contract`]): service metadata and call shapes extracted
//!   from `prost-reflect` descriptors
//! - **Codec** ([`codec`]): records to JSON mappings and back, lazily for
//!   record sequences
//! - **Handler** ([`handler`]): parameter binding, call context and one
//!   adapter per call shape, blocking or async
//! - **Registry** ([`Service`], [`App`]): which methods have handlers, config
//!   merging, binding to a [`Transport`]
//!
//! ## Example
//!
//! ```ignore
//! use rpcwire::{App, AppConfig};
//! use serde_json::json;
//!
//! let mut app = App::with_config(AppConfig::from_path("rpcwire.json")?);
//! let greeter = app.add_from_pool(&pool, "helloworld.Greeter")?;
//!
//! greeter
//!     .method("SayHello")?
//!     .unary(|args, _ctx| Ok(json!({ "message": format!("Hello {}!", args.str("name").unwrap_or_default()) })))?;
//!
//! greeter
//!     .method("SayHelloGroup")?
//!     .server_streaming(|_args, _ctx| {
//!         Ok(["a", "b", "c", "d"].map(|n| Ok(json!({ "message": format!("Hello {n}!") }))))
//!     })?;
//!
//! app.bind_to_transport(&mut server)?;
//! ```

pub mod codec;
pub mod config;
pub mod contract;
pub mod error;
pub mod handler;
pub mod testing;
pub mod transport;

mod app;
mod service;

pub use app::App;
pub use codec::{Decoded, Mapping, Reply};
pub use config::{AppConfig, ServerConfig, ServiceConfig};
pub use contract::{CallShape, MethodMetadata, ServiceMetadata};
pub use error::{Result, RpcwireError};
pub use handler::{Args, Context};
pub use service::{AfterRegistered, BeforeServerStart, MethodBuilder, Service};
pub use transport::Transport;
