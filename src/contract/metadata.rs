//! Method and service metadata extraction.
//!
//! The extractor walks a [`ServiceDescriptor`] in contract-declared order and
//! records, per method, the resolved input/output record types and the call
//! shape. Record types are resolved by the descriptor pool when the contract
//! is loaded, so a malformed contract fails at load time with
//! [`RpcwireError::Contract`].

use std::collections::HashMap;

use bytes::Bytes;
use prost::Message;
use prost_reflect::{
    DescriptorPool, DynamicMessage, MessageDescriptor, MethodDescriptor, ServiceDescriptor,
};

use super::CallShape;
use crate::error::{Result, RpcwireError};

/// Encode a record into wire bytes.
#[inline]
pub fn encode_record(record: &DynamicMessage) -> Bytes {
    Bytes::from(record.encode_to_vec())
}

/// Structural metadata for one contract method.
#[derive(Debug, Clone)]
pub struct MethodMetadata {
    /// Method name as declared in the contract.
    name: String,
    /// Transport route, `/package.Service/Method`.
    path: String,
    /// Record type of each input element.
    input_type: MessageDescriptor,
    /// Record type of each output element.
    output_type: MessageDescriptor,
    /// Call shape derived from the streaming flags.
    shape: CallShape,
}

impl MethodMetadata {
    /// Extract metadata from a method descriptor.
    pub fn from_descriptor(method: &MethodDescriptor) -> Self {
        Self {
            name: method.name().to_string(),
            path: format!("/{}/{}", method.parent_service().full_name(), method.name()),
            input_type: method.input(),
            output_type: method.output(),
            shape: CallShape::of(method),
        }
    }

    /// Method name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport route for this method.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Input record type.
    #[inline]
    pub fn input_type(&self) -> &MessageDescriptor {
        &self.input_type
    }

    /// Output record type.
    #[inline]
    pub fn output_type(&self) -> &MessageDescriptor {
        &self.output_type
    }

    /// Call shape.
    #[inline]
    pub fn shape(&self) -> CallShape {
        self.shape
    }

    /// Decode wire bytes into an input record.
    pub fn decode_input(&self, bytes: &[u8]) -> Result<DynamicMessage> {
        Ok(DynamicMessage::decode(self.input_type.clone(), bytes)?)
    }

    /// Decode wire bytes into an output record (client side of the wire).
    pub fn decode_output(&self, bytes: &[u8]) -> Result<DynamicMessage> {
        Ok(DynamicMessage::decode(self.output_type.clone(), bytes)?)
    }

    /// Encode an output record into wire bytes.
    #[inline]
    pub fn encode_output(&self, record: &DynamicMessage) -> Bytes {
        encode_record(record)
    }
}

/// Structural metadata for a whole service.
#[derive(Debug, Clone)]
pub struct ServiceMetadata {
    full_name: String,
    name: String,
    /// Methods in contract-declared order.
    methods: Vec<MethodMetadata>,
    /// Method name to position in `methods`.
    index: HashMap<String, usize>,
    descriptor: ServiceDescriptor,
}

impl ServiceMetadata {
    /// Extract metadata from a service descriptor.
    pub fn from_descriptor(descriptor: &ServiceDescriptor) -> Self {
        let methods: Vec<MethodMetadata> = descriptor
            .methods()
            .map(|method| MethodMetadata::from_descriptor(&method))
            .collect();
        let index = methods
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), i))
            .collect();

        Self {
            full_name: descriptor.full_name().to_string(),
            name: descriptor.name().to_string(),
            methods,
            index,
            descriptor: descriptor.clone(),
        }
    }

    /// Look up a service by full name in a descriptor pool.
    ///
    /// # Errors
    ///
    /// Returns [`RpcwireError::ContractServiceNotFound`] listing every service
    /// in the pool when `full_name` is absent.
    pub fn from_pool(pool: &DescriptorPool, full_name: &str) -> Result<Self> {
        let descriptor =
            pool.get_service_by_name(full_name)
                .ok_or_else(|| RpcwireError::ContractServiceNotFound {
                    service: full_name.to_string(),
                    available: pool.services().map(|s| s.full_name().to_string()).collect(),
                })?;
        Ok(Self::from_descriptor(&descriptor))
    }

    /// Load a service from an encoded `FileDescriptorSet`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcwireError::Contract`] when the set is malformed or refers
    /// to record types it does not define.
    pub fn from_file_descriptor_set(bytes: &[u8], full_name: &str) -> Result<Self> {
        let pool = DescriptorPool::decode(bytes)?;
        Self::from_pool(&pool, full_name)
    }

    /// Fully qualified service name, e.g. `helloworld.Greeter`.
    #[inline]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Short service name, e.g. `Greeter`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The contract this metadata was extracted from.
    #[inline]
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Get a method by name.
    pub fn method(&self, name: &str) -> Option<&MethodMetadata> {
        self.index.get(name).map(|&i| &self.methods[i])
    }

    /// Check whether the contract declares `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All methods, in contract-declared order.
    pub fn methods(&self) -> impl ExactSizeIterator<Item = &MethodMetadata> {
        self.methods.iter()
    }

    /// All method names, in contract-declared order.
    pub fn method_names(&self) -> Vec<String> {
        self.methods.iter().map(|m| m.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{greeter_pool, GREETER};
    use prost_reflect::Value;

    #[test]
    fn test_extract_greeter() {
        let pool = greeter_pool().unwrap();
        let meta = ServiceMetadata::from_pool(&pool, GREETER).unwrap();

        assert_eq!(meta.full_name(), "helloworld.Greeter");
        assert_eq!(meta.name(), "Greeter");
        assert_eq!(
            meta.method_names(),
            vec!["SayHello", "SayHelloGroup", "HelloEveryone", "SayHelloOneByOne"]
        );
    }

    #[test]
    fn test_method_shapes() {
        let pool = greeter_pool().unwrap();
        let meta = ServiceMetadata::from_pool(&pool, GREETER).unwrap();

        let shape = |name: &str| meta.method(name).unwrap().shape();
        assert_eq!(shape("SayHello"), CallShape::SingleSingle);
        assert_eq!(shape("SayHelloGroup"), CallShape::SingleSequence);
        assert_eq!(shape("HelloEveryone"), CallShape::SequenceSingle);
        assert_eq!(shape("SayHelloOneByOne"), CallShape::SequenceSequence);
    }

    #[test]
    fn test_record_types_resolved() {
        let pool = greeter_pool().unwrap();
        let meta = ServiceMetadata::from_pool(&pool, GREETER).unwrap();
        let say_hello = meta.method("SayHello").unwrap();

        assert_eq!(say_hello.input_type().full_name(), "helloworld.HelloRequest");
        assert_eq!(say_hello.output_type().full_name(), "helloworld.HelloReply");
        assert_eq!(say_hello.path(), "/helloworld.Greeter/SayHello");
    }

    #[test]
    fn test_unknown_service_lists_pool_services() {
        let pool = greeter_pool().unwrap();
        let err = ServiceMetadata::from_pool(&pool, "helloworld.Missing").unwrap_err();

        assert_eq!(
            err.to_string(),
            "Can not find helloworld.Missing in the descriptor pool. Available services: helloworld.Greeter"
        );
        match err {
            RpcwireError::ContractServiceNotFound { service, available } => {
                assert_eq!(service, "helloworld.Missing");
                assert_eq!(available, vec!["helloworld.Greeter".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_descriptor_set() {
        let err = ServiceMetadata::from_file_descriptor_set(b"\xff\xff\xff", GREETER).unwrap_err();
        assert!(matches!(err, RpcwireError::Contract(_)));
    }

    #[test]
    fn test_wire_round_trip() {
        let pool = greeter_pool().unwrap();
        let meta = ServiceMetadata::from_pool(&pool, GREETER).unwrap();
        let method = meta.method("SayHello").unwrap();

        let mut request = DynamicMessage::new(method.input_type().clone());
        request.set_field_by_name("name", Value::String("tom".to_string()));

        let bytes = encode_record(&request);
        let decoded = method.decode_input(&bytes).unwrap();
        assert_eq!(decoded, request);
    }
}
