//! Application registry.
//!
//! An [`App`] owns the services of one server process and the raw
//! configuration they read their sections from. Setup is single-threaded:
//! add services, register handlers, then bind once to a transport.
//!
//! # Example
//!
//! ```ignore
//! let mut app = App::with_config(AppConfig::from_path("rpcwire.json")?);
//! app.add_from_pool(&pool, "helloworld.Greeter")?;
//!
//! app.method("helloworld.Greeter", "SayHello")?
//!     .unary(|args, _ctx| Ok(json!({ "message": format!("Hello {}!", args.str("name").unwrap_or_default()) })))?;
//!
//! let mut server = TestServer::new();
//! app.bind_to_transport(&mut server)?;
//! ```

use prost_reflect::{DescriptorPool, ServiceDescriptor};

use crate::config::AppConfig;
use crate::error::{Result, RpcwireError};
use crate::service::{MethodBuilder, Service};
use crate::transport::Transport;

/// Services of one server process.
#[derive(Debug, Default)]
pub struct App {
    config: AppConfig,
    /// Registration order; full names are unique.
    services: Vec<Service>,
    bound: bool,
}

impl App {
    /// Create an app with an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an app with `config`.
    pub fn with_config(config: impl Into<AppConfig>) -> Self {
        Self {
            config: config.into(),
            ..Self::default()
        }
    }

    /// The app configuration.
    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn ensure_unbound(&self, action: &str) -> Result<()> {
        if self.bound {
            return Err(RpcwireError::Register(format!(
                "can not {action} after the app was bound to a transport"
            )));
        }
        Ok(())
    }

    fn position(&self, full_name: &str) -> Option<usize> {
        self.services.iter().position(|s| s.full_name() == full_name)
    }

    fn not_found(&self, full_name: &str) -> RpcwireError {
        RpcwireError::ServiceNotFound {
            service: full_name.to_string(),
            available: self.service_names(),
        }
    }

    /// Register `service`.
    ///
    /// The service config is merged with the app section of the same name
    /// and its `after_registered` hook runs. A service with the same full
    /// name replaces the earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`RpcwireError::Register`] once the app is bound.
    pub fn add_service(&mut self, mut service: Service) -> Result<&mut Service> {
        self.ensure_unbound("add services")?;
        service.register(&self.config);

        let index = match self.position(service.full_name()) {
            Some(index) => {
                tracing::warn!("Service {} registered twice; replacing", service.full_name());
                self.services[index] = service;
                index
            }
            None => {
                self.services.push(service);
                self.services.len() - 1
            }
        };
        Ok(&mut self.services[index])
    }

    /// Register a plain service for `descriptor`.
    pub fn add_descriptor(&mut self, descriptor: &ServiceDescriptor) -> Result<&mut Service> {
        self.add_service(Service::new(descriptor))
    }

    /// Register a plain service for the contract `full_name` in `pool`.
    pub fn add_from_pool(&mut self, pool: &DescriptorPool, full_name: &str) -> Result<&mut Service> {
        self.add_service(Service::from_pool(pool, full_name)?)
    }

    /// Get a service by full name.
    ///
    /// # Errors
    ///
    /// Returns [`RpcwireError::ServiceNotFound`] listing every registered
    /// service when `full_name` is unknown.
    pub fn service(&self, full_name: &str) -> Result<&Service> {
        match self.position(full_name) {
            Some(index) => Ok(&self.services[index]),
            None => Err(self.not_found(full_name)),
        }
    }

    /// Get a service by full name for further registration.
    ///
    /// # Errors
    ///
    /// [`RpcwireError::ServiceNotFound`] as for [`service`](Self::service);
    /// [`RpcwireError::Register`] once the app is bound.
    pub fn service_mut(&mut self, full_name: &str) -> Result<&mut Service> {
        self.ensure_unbound("register handlers")?;
        match self.position(full_name) {
            Some(index) => Ok(&mut self.services[index]),
            None => Err(self.not_found(full_name)),
        }
    }

    /// Start registering a handler for `method` of `service`.
    pub fn method(&mut self, service: &str, method: &str) -> Result<MethodBuilder<'_>> {
        self.service_mut(service)?.method(method)
    }

    /// Full names of the registered services, in registration order.
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.full_name().to_string()).collect()
    }

    /// Registered services, in registration order.
    pub fn services(&self) -> impl ExactSizeIterator<Item = &Service> {
        self.services.iter()
    }

    /// True once [`bind_to_transport`](Self::bind_to_transport) was called,
    /// whether or not it succeeded.
    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Attach every method of every service to `transport`.
    ///
    /// All `before_server_start` hooks run first, then each service adds
    /// its adapters. Methods without a handler answer `Unimplemented`.
    ///
    /// Binding happens once. A transport error leaves the app bound with
    /// some routes attached, so it is fatal for this app.
    ///
    /// # Errors
    ///
    /// Returns [`RpcwireError::Register`] when called twice, and forwards
    /// transport errors.
    pub fn bind_to_transport<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.ensure_unbound("bind twice")?;
        self.bound = true;

        for service in &self.services {
            service.run_before_server_start();
        }
        for service in &self.services {
            service.add_to_transport(transport)?;
        }

        tracing::debug!("Bound {} services to transport", self.services.len());
        Ok(())
    }
}
