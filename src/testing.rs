//! In-process test harness.
//!
//! - [`greeter_pool`] - the `helloworld` contract used across the test
//!   suite, built from descriptor protos so no `protoc` is needed
//! - [`TestServer`] - an in-memory [`Transport`] that routes calls by path
//!   and drives adapters the way a server runtime would: blocking adapters
//!   on the blocking pool, async adapters on the calling task
//!
//! # Example
//!
//! ```ignore
//! let mut server = TestServer::new();
//! app.bind_to_transport(&mut server)?;
//!
//! let reply = server
//!     .unary("/helloworld.Greeter/SayHello", hello_request(&pool, "tom"))
//!     .await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, Value as FieldValue};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
};
use tokio::sync::Semaphore;
use tonic::Status;

use crate::codec::{RecordIter, RecordStream};
use crate::config::ServerConfig;
use crate::error::{Result, RpcwireError};
use crate::handler::{CallAdapter, Context, Execution, Payload};
use crate::transport::Transport;

/// Full name of the fixture service.
pub const GREETER: &str = "helloworld.Greeter";

/// Full name of the fixture request type.
pub const HELLO_REQUEST: &str = "helloworld.HelloRequest";

/// Full name of the fixture reply type.
pub const HELLO_REPLY: &str = "helloworld.HelloReply";

fn json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn field(name: &str, number: i32, ty: Type, label: Label) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        json_name: Some(json_name(name)),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

fn message_field(name: &str, number: i32, type_name: &str, label: Label) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, Type::Message, label)
    }
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

fn method(name: &str, client_streaming: bool, server_streaming: bool) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(format!(".{HELLO_REQUEST}")),
        output_type: Some(format!(".{HELLO_REPLY}")),
        client_streaming: Some(client_streaming),
        server_streaming: Some(server_streaming),
        ..Default::default()
    }
}

/// The `helloworld.proto` file descriptor set.
///
/// Declares `helloworld.Greeter` with one method per call shape
/// (`SayHello`, `SayHelloGroup`, `HelloEveryone`, `SayHelloOneByOne`), its
/// request/reply types, and a `Profile` record with nested and repeated
/// fields.
pub fn greeter_file_descriptor_set() -> FileDescriptorSet {
    let file = FileDescriptorProto {
        name: Some("helloworld.proto".to_string()),
        package: Some("helloworld".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![
            message("HelloRequest", vec![field("name", 1, Type::String, Label::Optional)]),
            message("HelloReply", vec![field("message", 1, Type::String, Label::Optional)]),
            message(
                "Address",
                vec![
                    field("city", 1, Type::String, Label::Optional),
                    field("zip", 2, Type::Int32, Label::Optional),
                ],
            ),
            message(
                "Profile",
                vec![
                    field("display_name", 1, Type::String, Label::Optional),
                    field("age", 2, Type::Int32, Label::Optional),
                    field("tags", 3, Type::String, Label::Repeated),
                    message_field("address", 4, ".helloworld.Address", Label::Optional),
                    field("active", 5, Type::Bool, Label::Optional),
                    field("score", 6, Type::Double, Label::Optional),
                    field("visits", 7, Type::Int64, Label::Optional),
                    message_field("history", 8, ".helloworld.Address", Label::Repeated),
                ],
            ),
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("Greeter".to_string()),
            method: vec![
                method("SayHello", false, false),
                method("SayHelloGroup", false, true),
                method("HelloEveryone", true, false),
                method("SayHelloOneByOne", true, true),
            ],
            ..Default::default()
        }],
        ..Default::default()
    };

    FileDescriptorSet { file: vec![file] }
}

/// [`greeter_file_descriptor_set`] encoded as bytes.
pub fn greeter_descriptor_bytes() -> Vec<u8> {
    greeter_file_descriptor_set().encode_to_vec()
}

/// A descriptor pool holding the `helloworld` contract.
pub fn greeter_pool() -> Result<DescriptorPool> {
    Ok(DescriptorPool::from_file_descriptor_set(
        greeter_file_descriptor_set(),
    )?)
}

/// Build a `HelloRequest` record.
///
/// # Panics
///
/// Panics if `pool` does not contain the `helloworld` contract.
pub fn hello_request(pool: &DescriptorPool, name: &str) -> DynamicMessage {
    let descriptor = pool
        .get_message_by_name(HELLO_REQUEST)
        .unwrap_or_else(|| panic!("{HELLO_REQUEST} is not in the pool"));
    let mut request = DynamicMessage::new(descriptor);
    request.set_field_by_name("name", FieldValue::String(name.to_string()));
    request
}

/// Read the `message` field of a `HelloReply` record.
pub fn reply_message(reply: &DynamicMessage) -> Option<String> {
    reply
        .get_field_by_name("message")
        .and_then(|v| v.as_str().map(str::to_string))
}

fn payload<S>(
    requests: Vec<DynamicMessage>,
    sequence: bool,
    wrap: impl FnOnce(Vec<DynamicMessage>) -> S,
) -> std::result::Result<Payload<S>, Status> {
    if sequence {
        return Ok(Payload::Sequence(wrap(requests)));
    }
    let count = requests.len();
    let mut requests = requests.into_iter();
    match (requests.next(), requests.next()) {
        (Some(request), None) => Ok(Payload::Single(request)),
        _ => Err(Status::invalid_argument(format!(
            "expected exactly one request, got {count}"
        ))),
    }
}

/// In-memory transport.
///
/// Calls take a permit from a semaphore sized by
/// [`ServerConfig::workers`]; a call waits while all permits are taken.
#[derive(Debug)]
pub struct TestServer {
    routes: HashMap<String, CallAdapter>,
    limit: Arc<Semaphore>,
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TestServer {
    /// Create a server with the default configuration.
    pub fn new() -> Self {
        Self::with_config(&ServerConfig::default())
    }

    /// Create a server that runs at most `config.workers` calls at once.
    pub fn with_config(config: &ServerConfig) -> Self {
        Self {
            routes: HashMap::new(),
            limit: Arc::new(Semaphore::new(config.workers.max(1))),
        }
    }

    /// Bound routes, in no particular order.
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// The adapter bound to `path`.
    pub fn adapter(&self, path: &str) -> Option<&CallAdapter> {
        self.routes.get(path)
    }

    fn route(&self, path: &str) -> std::result::Result<CallAdapter, Status> {
        self.routes
            .get(path)
            .cloned()
            .ok_or_else(|| Status::unimplemented(format!("unknown method {path}")))
    }

    /// Run one call with an explicit context.
    ///
    /// `requests` must hold exactly one record for single-input methods.
    /// Sequence outputs are collected; the first failed element fails the
    /// whole call.
    pub async fn call(
        &self,
        path: &str,
        requests: Vec<DynamicMessage>,
        ctx: Context,
    ) -> std::result::Result<Vec<DynamicMessage>, Status> {
        let adapter = self.route(path)?;
        let _permit = self
            .limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Status::unavailable("server is shutting down"))?;
        let sequence = adapter.shape().is_sequence_input();

        if adapter.execution() == Some(Execution::Blocking) {
            let request = payload(requests, sequence, |records| -> RecordIter {
                Box::new(records.into_iter().map(Ok::<_, Status>))
            })?;
            return tokio::task::spawn_blocking(move || -> std::result::Result<Vec<DynamicMessage>, Status> {
                match adapter.call_blocking(request, ctx)? {
                    Payload::Single(reply) => Ok(vec![reply]),
                    Payload::Sequence(replies) => replies.collect(),
                }
            })
            .await
            .map_err(|e| Status::internal(format!("call task failed: {e}")))?;
        }

        let request = payload(requests, sequence, |records| -> RecordStream {
            stream::iter(records.into_iter().map(Ok::<_, Status>)).boxed()
        })?;
        match adapter.call(request, ctx).await? {
            Payload::Single(reply) => Ok(vec![reply]),
            Payload::Sequence(replies) => replies.try_collect().await,
        }
    }

    /// Call a `SingleSingle` method.
    pub async fn unary(&self, path: &str, request: DynamicMessage) -> std::result::Result<DynamicMessage, Status> {
        let mut replies = self.call(path, vec![request], Context::new(path)).await?;
        replies
            .pop()
            .ok_or_else(|| Status::internal(format!("{path} produced no reply")))
    }

    /// Call a `SingleSequence` method.
    pub async fn server_streaming(
        &self,
        path: &str,
        request: DynamicMessage,
    ) -> std::result::Result<Vec<DynamicMessage>, Status> {
        self.call(path, vec![request], Context::new(path)).await
    }

    /// Call a `SequenceSingle` method.
    pub async fn client_streaming(
        &self,
        path: &str,
        requests: Vec<DynamicMessage>,
    ) -> std::result::Result<DynamicMessage, Status> {
        let mut replies = self.call(path, requests, Context::new(path)).await?;
        replies
            .pop()
            .ok_or_else(|| Status::internal(format!("{path} produced no reply")))
    }

    /// Call a `SequenceSequence` method.
    pub async fn streaming(
        &self,
        path: &str,
        requests: Vec<DynamicMessage>,
    ) -> std::result::Result<Vec<DynamicMessage>, Status> {
        self.call(path, requests, Context::new(path)).await
    }

    /// Run one call on encoded records, as they arrive off the wire.
    pub async fn call_bytes(&self, path: &str, requests: Vec<Bytes>) -> std::result::Result<Vec<Bytes>, Status> {
        let method = self.route(path)?.metadata().clone();
        let requests = requests
            .iter()
            .map(|bytes| method.decode_input(bytes))
            .collect::<Result<Vec<_>>>()?;

        let replies = self.call(path, requests, Context::new(path)).await?;
        Ok(replies.iter().map(|reply| method.encode_output(reply)).collect())
    }
}

impl Transport for TestServer {
    fn add_method(&mut self, service: &str, adapter: CallAdapter) -> Result<()> {
        let path = adapter.metadata().path().to_string();
        if self.routes.contains_key(&path) {
            return Err(RpcwireError::Register(format!("route {path} is already bound")));
        }
        tracing::debug!("Routing {} ({})", path, service);
        self.routes.insert(path, adapter);
        Ok(())
    }
}
