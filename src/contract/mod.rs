//! Contract module - structural metadata extracted from a service contract.
//!
//! Provides:
//! - [`CallShape`] - unary/streaming classification of a method
//! - [`MethodMetadata`] - name, record types and shape of one method
//! - [`ServiceMetadata`] - every method of a service, in declaration order
//!
//! Metadata is computed once when a service is created and is read-only
//! afterwards.
//!
//! # Example
//!
//! ```ignore
//! use rpcwire::contract::{CallShape, ServiceMetadata};
//!
//! let meta = ServiceMetadata::from_pool(&pool, "helloworld.Greeter")?;
//! assert_eq!(meta.method("SayHello").unwrap().shape(), CallShape::SingleSingle);
//! ```

mod metadata;
mod shape;

pub use metadata::{encode_record, MethodMetadata, ServiceMetadata};
pub use shape::CallShape;
