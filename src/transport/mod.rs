//! Transport module - the seam between the registry and a server runtime.
//!
//! The crate does not move bytes over a network. A server runtime implements
//! [`Transport`] and receives one [`CallAdapter`] per contract method when
//! [`App::bind_to_transport`](crate::App::bind_to_transport) runs. The
//! in-memory [`TestServer`](crate::testing::TestServer) is the reference
//! implementation.

use crate::error::Result;
use crate::handler::CallAdapter;

/// A server runtime that can route calls to method adapters.
pub trait Transport {
    /// Attach the adapter for one method of `service` (a full name).
    ///
    /// The route is [`MethodMetadata::path`](crate::contract::MethodMetadata::path).
    fn add_method(&mut self, service: &str, adapter: CallAdapter) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn add_method(&mut self, service: &str, adapter: CallAdapter) -> Result<()> {
        (**self).add_method(service, adapter)
    }
}
