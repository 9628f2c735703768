//! Service registry.
//!
//! A [`Service`] wraps one contract and records which of its methods have a
//! handler. Handlers are registered through a [`MethodBuilder`]:
//!
//! ```ignore
//! let mut greeter = Service::from_pool(&pool, "helloworld.Greeter")?;
//!
//! greeter
//!     .method("SayHello")?
//!     .bind(["name"])?
//!     .unary(|args, _ctx| Ok(json!({ "message": format!("Hello {}!", args.str("name").unwrap_or_default()) })))?;
//!
//! greeter
//!     .method("HelloEveryone")?
//!     .client_streaming(|requests, _ctx| {
//!         let names = requests
//!             .map(|r| r.map(|r| format!("'{}'", r.str("name").unwrap_or_default())))
//!             .collect::<Result<Vec<_>, _>>()?;
//!         Ok(json!({ "message": format!("Hello everyone [{}]!", names.join(",")) }))
//!     })?;
//! ```
//!
//! Methods without a handler stay in the service and answer `Unimplemented`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::stream::Stream;
use prost_reflect::{DescriptorPool, ServiceDescriptor};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tonic::Status;

use crate::codec::{Mapping, Reply, RequestIter, RequestStream};
use crate::config::{AppConfig, ServiceConfig};
use crate::contract::{CallShape, MethodMetadata, ServiceMetadata};
use crate::error::{Result, RpcwireError};
use crate::handler::{self, Args, Binder, CallAdapter, Context, MethodHandler};
use crate::transport::Transport;

/// Hook run once when the service joins an app.
pub type AfterRegistered = Box<dyn FnOnce(&Service) + Send + Sync>;

/// Hook run before the app binds its services to a transport.
pub type BeforeServerStart = Box<dyn Fn(&Service) + Send + Sync>;

/// A registered handler.
#[derive(Debug, Clone)]
struct HandlerEntry {
    /// Parameter names bound from the input record; empty for sequence input.
    bound: Vec<String>,
    handler: MethodHandler,
}

/// Handlers for the methods of one contract, plus the service config.
pub struct Service {
    metadata: Arc<ServiceMetadata>,
    handlers: HashMap<String, HandlerEntry>,
    config: ServiceConfig,
    registered: bool,
    after_registered: Option<AfterRegistered>,
    before_server_start: Option<BeforeServerStart>,
}

impl Service {
    /// Create a service for a contract.
    pub fn new(descriptor: &ServiceDescriptor) -> Self {
        Self::from_metadata(ServiceMetadata::from_descriptor(descriptor))
    }

    /// Create a service from already extracted metadata.
    pub fn from_metadata(metadata: ServiceMetadata) -> Self {
        let config = ServiceConfig::new(metadata.full_name(), Mapping::new());
        Self {
            metadata: Arc::new(metadata),
            handlers: HashMap::new(),
            config,
            registered: false,
            after_registered: None,
            before_server_start: None,
        }
    }

    /// Create a service for the contract `full_name` in `pool`.
    pub fn from_pool(pool: &DescriptorPool, full_name: &str) -> Result<Self> {
        Ok(Self::from_metadata(ServiceMetadata::from_pool(pool, full_name)?))
    }

    /// Set the config defaults.
    pub fn with_defaults(mut self, defaults: Mapping) -> Self {
        self.config = ServiceConfig::new(self.config.name().to_string(), defaults);
        self
    }

    /// Read the app config section `name` instead of the full service name.
    pub fn with_config_name(mut self, name: impl Into<String>) -> Self {
        self.config = ServiceConfig::new(name, self.config.values().clone());
        self
    }

    /// Contract metadata.
    #[inline]
    pub fn metadata(&self) -> &ServiceMetadata {
        &self.metadata
    }

    /// Fully qualified service name.
    #[inline]
    pub fn full_name(&self) -> &str {
        self.metadata.full_name()
    }

    /// Short service name.
    #[inline]
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    /// The contract.
    #[inline]
    pub fn descriptor(&self) -> &ServiceDescriptor {
        self.metadata.descriptor()
    }

    /// Method names declared by the contract, in declaration order.
    pub fn method_names(&self) -> Vec<String> {
        self.metadata.method_names()
    }

    /// Start registering a handler for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcwireError::MethodNotFound`] listing every method of the
    /// contract when `name` is not one of them.
    pub fn method(&mut self, name: &str) -> Result<MethodBuilder<'_>> {
        let method = self
            .metadata
            .method(name)
            .cloned()
            .ok_or_else(|| RpcwireError::MethodNotFound {
                method: name.to_string(),
                service: self.metadata.full_name().to_string(),
                available: self.metadata.method_names(),
            })?;

        Ok(MethodBuilder {
            service: self,
            method,
            binder: None,
        })
    }

    /// True when `method` has a handler.
    pub fn is_implemented(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// The handler registered for `method`.
    pub fn handler(&self, method: &str) -> Option<&MethodHandler> {
        self.handlers.get(method).map(|e| &e.handler)
    }

    /// Parameter names bound for `method`.
    pub fn bound_parameters(&self, method: &str) -> Option<&[String]> {
        self.handlers.get(method).map(|e| e.bound.as_slice())
    }

    /// True once the service joined an app.
    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// The merged configuration.
    ///
    /// Before the service joins an app this logs a warning and returns the
    /// defaults.
    pub fn config(&self) -> &Mapping {
        if !self.registered {
            tracing::warn!(
                "Config of {} read before the service was registered; returning defaults",
                self.full_name()
            );
        }
        self.config.values()
    }

    /// Deserialize the merged configuration.
    pub fn config_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.config().clone()))?)
    }

    /// Run `hook` once when the service joins an app.
    pub fn after_registered<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnOnce(&Service) + Send + Sync + 'static,
    {
        self.after_registered = Some(Box::new(hook));
        self
    }

    /// Run `hook` before the app binds its services to a transport.
    pub fn before_server_start<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&Service) + Send + Sync + 'static,
    {
        self.before_server_start = Some(Box::new(hook));
        self
    }

    pub(crate) fn register(&mut self, app_config: &AppConfig) {
        self.config.merge(app_config);
        self.registered = true;
        tracing::debug!("Registered service {}", self.full_name());

        if let Some(hook) = self.after_registered.take() {
            hook(self);
        }
    }

    pub(crate) fn run_before_server_start(&self) {
        if let Some(hook) = &self.before_server_start {
            hook(self);
        }
    }

    /// One adapter per contract method, in declaration order.
    ///
    /// Methods without a handler get the unimplemented fallback.
    pub fn adapters(&self) -> Vec<CallAdapter> {
        self.metadata
            .methods()
            .map(|method| match self.handlers.get(method.name()) {
                Some(entry) => CallAdapter::new(method.clone(), entry.handler.clone()),
                None => CallAdapter::unimplemented(method.clone()),
            })
            .collect()
    }

    /// Attach every method adapter to `transport`.
    pub fn add_to_transport<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<()> {
        for adapter in self.adapters() {
            if !adapter.is_implemented() {
                tracing::debug!("{} has no handler; serving Unimplemented", adapter.metadata().path());
            }
            transport.add_method(self.full_name(), adapter)?;
        }
        Ok(())
    }

    fn insert(&mut self, method: &MethodMetadata, bound: Vec<String>, handler: MethodHandler) {
        tracing::debug!(
            "Registered {} handler for {} ({})",
            if matches!(handler, MethodHandler::Async(_)) { "async" } else { "blocking" },
            method.path(),
            method.shape()
        );
        if self
            .handlers
            .insert(method.name().to_string(), HandlerEntry { bound, handler })
            .is_some()
        {
            tracing::warn!("Handler for {} replaced", method.path());
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut implemented: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        implemented.sort_unstable();
        f.debug_struct("Service")
            .field("full_name", &self.full_name())
            .field("implemented", &implemented)
            .field("config", &self.config)
            .field("registered", &self.registered)
            .finish()
    }
}

/// Registration handle for one method.
///
/// Returned by [`Service::method`]. Choose the parameter names with
/// [`bind`](Self::bind) (optional; all input fields are bound by default),
/// then finish with the constructor matching the method's call shape.
pub struct MethodBuilder<'a> {
    service: &'a mut Service,
    method: MethodMetadata,
    binder: Option<Binder>,
}

impl<'a> MethodBuilder<'a> {
    /// The method being registered.
    #[inline]
    pub fn metadata(&self) -> &MethodMetadata {
        &self.method
    }

    /// Bind the named input fields, in order.
    ///
    /// Names absent from the input type bind to null; a warning is logged
    /// at registration.
    ///
    /// # Errors
    ///
    /// Returns [`RpcwireError::Register`] for methods whose input is a
    /// sequence (their handlers receive the decoded records directly) or
    /// when names were already bound.
    pub fn bind<I, S>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.method.shape().is_sequence_input() {
            return Err(RpcwireError::Register(format!(
                "{} takes a request sequence; parameters can not be bound",
                self.method.path()
            )));
        }
        if self.binder.is_some() {
            return Err(RpcwireError::Register(format!(
                "parameters of {} are already bound",
                self.method.path()
            )));
        }
        self.binder = Some(Binder::new(names));
        Ok(self)
    }

    fn expect_shape(&self, registered: CallShape) -> Result<()> {
        let expected = self.method.shape();
        if expected == registered {
            return Ok(());
        }
        Err(RpcwireError::ShapeMismatch {
            method: self.method.path().to_string(),
            expected,
            registered,
        })
    }

    fn take_binder(&mut self) -> Binder {
        let binder = self
            .binder
            .take()
            .unwrap_or_else(|| Binder::for_message(self.method.input_type()));
        let unknown = binder.unknown_fields(self.method.input_type());
        if !unknown.is_empty() {
            tracing::warn!(
                "{} binds {:?}, which {} does not declare; they will always be null",
                self.method.path(),
                unknown,
                self.method.input_type().full_name()
            );
        }
        binder
    }

    fn finish(self, bound: Vec<String>, handler: MethodHandler) -> &'a mut Service {
        let MethodBuilder {
            service, method, ..
        } = self;
        service.insert(&method, bound, handler);
        service
    }

    /// Register a blocking handler for a `SingleSingle` method.
    pub fn unary<F, R>(mut self, handler: F) -> Result<&'a mut Service>
    where
        F: Fn(Args, Context) -> std::result::Result<R, Status> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.expect_shape(CallShape::SingleSingle)?;
        let binder = self.take_binder();
        let bound = binder.names().to_vec();
        let output_type = self.method.output_type().clone();
        let handler = handler::unary(binder, output_type, handler);
        Ok(self.finish(bound, MethodHandler::Blocking(handler)))
    }

    /// Register a blocking handler for a `SingleSequence` method.
    pub fn server_streaming<F, I, R>(mut self, handler: F) -> Result<&'a mut Service>
    where
        F: Fn(Args, Context) -> std::result::Result<I, Status> + Send + Sync + 'static,
        I: IntoIterator<Item = std::result::Result<R, Status>>,
        I::IntoIter: Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.expect_shape(CallShape::SingleSequence)?;
        let binder = self.take_binder();
        let bound = binder.names().to_vec();
        let output_type = self.method.output_type().clone();
        let handler = handler::server_streaming(binder, output_type, handler);
        Ok(self.finish(bound, MethodHandler::Blocking(handler)))
    }

    /// Register a blocking handler for a `SequenceSingle` method.
    pub fn client_streaming<F, R>(self, handler: F) -> Result<&'a mut Service>
    where
        F: Fn(RequestIter, Context) -> std::result::Result<R, Status> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.expect_shape(CallShape::SequenceSingle)?;
        let output_type = self.method.output_type().clone();
        let handler = handler::client_streaming(output_type, handler);
        Ok(self.finish(Vec::new(), MethodHandler::Blocking(handler)))
    }

    /// Register a blocking handler for a `SequenceSequence` method.
    pub fn streaming<F, I, R>(self, handler: F) -> Result<&'a mut Service>
    where
        F: Fn(RequestIter, Context) -> std::result::Result<I, Status> + Send + Sync + 'static,
        I: IntoIterator<Item = std::result::Result<R, Status>>,
        I::IntoIter: Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.expect_shape(CallShape::SequenceSequence)?;
        let output_type = self.method.output_type().clone();
        let handler = handler::streaming(output_type, handler);
        Ok(self.finish(Vec::new(), MethodHandler::Blocking(handler)))
    }

    /// Register an async handler for a `SingleSingle` method.
    pub fn unary_async<F, Fut, R>(mut self, handler: F) -> Result<&'a mut Service>
    where
        F: Fn(Args, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, Status>> + Send + 'static,
        R: Into<Reply> + Send + 'static,
    {
        self.expect_shape(CallShape::SingleSingle)?;
        let binder = self.take_binder();
        let bound = binder.names().to_vec();
        let output_type = self.method.output_type().clone();
        let handler = handler::unary_async(binder, output_type, handler);
        Ok(self.finish(bound, MethodHandler::Async(handler)))
    }

    /// Register an async handler for a `SingleSequence` method.
    pub fn server_streaming_async<F, Fut, S, R>(mut self, handler: F) -> Result<&'a mut Service>
    where
        F: Fn(Args, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<S, Status>> + Send + 'static,
        S: Stream<Item = std::result::Result<R, Status>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.expect_shape(CallShape::SingleSequence)?;
        let binder = self.take_binder();
        let bound = binder.names().to_vec();
        let output_type = self.method.output_type().clone();
        let handler = handler::server_streaming_async(binder, output_type, handler);
        Ok(self.finish(bound, MethodHandler::Async(handler)))
    }

    /// Register an async handler for a `SequenceSingle` method.
    pub fn client_streaming_async<F, Fut, R>(self, handler: F) -> Result<&'a mut Service>
    where
        F: Fn(RequestStream, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, Status>> + Send + 'static,
        R: Into<Reply> + Send + 'static,
    {
        self.expect_shape(CallShape::SequenceSingle)?;
        let output_type = self.method.output_type().clone();
        let handler = handler::client_streaming_async(output_type, handler);
        Ok(self.finish(Vec::new(), MethodHandler::Async(handler)))
    }

    /// Register an async handler for a `SequenceSequence` method.
    pub fn streaming_async<F, Fut, S, R>(self, handler: F) -> Result<&'a mut Service>
    where
        F: Fn(RequestStream, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<S, Status>> + Send + 'static,
        S: Stream<Item = std::result::Result<R, Status>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.expect_shape(CallShape::SequenceSequence)?;
        let output_type = self.method.output_type().clone();
        let handler = handler::streaming_async(output_type, handler);
        Ok(self.finish(Vec::new(), MethodHandler::Async(handler)))
    }
}

impl fmt::Debug for MethodBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodBuilder")
            .field("method", &self.method.path())
            .field("binder", &self.binder)
            .finish()
    }
}
