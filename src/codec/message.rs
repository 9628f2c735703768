//! Record/mapping codec on top of `prost-reflect`'s serde support.
//!
//! Records are flattened into JSON objects keyed by the declared (proto)
//! field name. Nested messages become nested objects and repeated fields
//! become arrays, following the protobuf JSON mapping.
//!
//! # Example
//!
//! ```ignore
//! use rpcwire::codec::{MessageCodec, Reply};
//! use serde_json::json;
//!
//! let decoded = MessageCodec::decode(request)?;
//! assert_eq!(decoded.get("name"), Some(&json!("tom")));
//!
//! let record = MessageCodec::encode(&output_type, json!({"message": "Hello tom!"}).into())?;
//! ```

use prost::Message;
use prost_reflect::{
    DeserializeOptions, DynamicMessage, MessageDescriptor, ReflectMessage, SerializeOptions,
};
use serde_json::Value;

use crate::error::{Result, RpcwireError};

/// Plain field-name to value mapping.
pub type Mapping = serde_json::Map<String, Value>;

/// A decoded input record.
///
/// Holds the flattened mapping together with the untouched typed record, so
/// handlers that need the exact wire value can reach it through [`raw`].
///
/// [`raw`]: Decoded::raw
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    mapping: Mapping,
    raw: DynamicMessage,
}

impl Decoded {
    /// Get a field by declared name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.mapping.get(field)
    }

    /// Get a string field by declared name.
    pub fn str(&self, field: &str) -> Option<&str> {
        self.mapping.get(field).and_then(Value::as_str)
    }

    /// The flattened mapping.
    #[inline]
    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    /// The original typed record.
    #[inline]
    pub fn raw(&self) -> &DynamicMessage {
        &self.raw
    }

    /// Split into mapping and original record.
    pub fn into_parts(self) -> (Mapping, DynamicMessage) {
        (self.mapping, self.raw)
    }
}

/// A value returned by a handler.
///
/// Either a record that is passed through untouched, or a JSON value that
/// must be an object describing the output record field by field.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A typed record, sent without re-encoding.
    Record(DynamicMessage),
    /// A plain value, converted into the output record type.
    Value(Value),
}

impl From<DynamicMessage> for Reply {
    fn from(record: DynamicMessage) -> Self {
        Reply::Record(record)
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

impl From<Mapping> for Reply {
    fn from(mapping: Mapping) -> Self {
        Reply::Value(Value::Object(mapping))
    }
}

/// Codec between typed records and plain mappings.
///
/// Marker struct with static methods.
pub struct MessageCodec;

impl MessageCodec {
    fn serialize_options() -> SerializeOptions {
        SerializeOptions::new().use_proto_field_name(true)
    }

    /// Flatten a record into a mapping without consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`RpcwireError::Codec`] if the record does not map to a JSON
    /// object (well-known wrapper types, for instance).
    pub fn to_mapping(record: &DynamicMessage) -> Result<Mapping> {
        let value = record
            .serialize_with_options(serde_json::value::Serializer, &Self::serialize_options())
            .map_err(|e| RpcwireError::Codec(format!("{}: {e}", record.descriptor().full_name())))?;

        match value {
            Value::Object(mapping) => Ok(mapping),
            other => Err(RpcwireError::Codec(format!(
                "{} does not map to an object (got {other})",
                record.descriptor().full_name()
            ))),
        }
    }

    /// Decode a record into a mapping, keeping the record alongside.
    pub fn decode(record: DynamicMessage) -> Result<Decoded> {
        let mapping = Self::to_mapping(&record)?;
        Ok(Decoded {
            mapping,
            raw: record,
        })
    }

    /// Build a record of `output_type` from a mapping.
    ///
    /// Fields present in the mapping but not declared by the type are
    /// rejected.
    pub fn from_mapping(output_type: &MessageDescriptor, mapping: Mapping) -> Result<DynamicMessage> {
        DynamicMessage::deserialize_with_options(
            output_type.clone(),
            Value::Object(mapping),
            &DeserializeOptions::new().deny_unknown_fields(true),
        )
        .map_err(|e| RpcwireError::Codec(format!("{}: {e}", output_type.full_name())))
    }

    /// Convert a handler reply into a record of `output_type`.
    ///
    /// A record of the expected type is returned as is. A record of the same
    /// type built from another descriptor pool is re-read against
    /// `output_type` through its wire bytes. Any other record type, a
    /// non-object value, or an unknown field is a codec error.
    pub fn encode(output_type: &MessageDescriptor, reply: Reply) -> Result<DynamicMessage> {
        match reply {
            Reply::Record(record) if record.descriptor() == *output_type => Ok(record),
            Reply::Record(record) if record.descriptor().full_name() == output_type.full_name() => {
                Self::transcode(output_type, &record)
            }
            Reply::Record(record) => Err(RpcwireError::Codec(format!(
                "expected a {} record, got {}",
                output_type.full_name(),
                record.descriptor().full_name()
            ))),
            Reply::Value(Value::Object(mapping)) => Self::from_mapping(output_type, mapping),
            Reply::Value(other) => Err(RpcwireError::Codec(format!(
                "{} must be built from an object, got {other}",
                output_type.full_name()
            ))),
        }
    }

    fn transcode(output_type: &MessageDescriptor, record: &DynamicMessage) -> Result<DynamicMessage> {
        DynamicMessage::decode(output_type.clone(), record.encode_to_vec().as_slice())
            .map_err(|e| RpcwireError::Codec(format!("{}: {e}", output_type.full_name())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{greeter_pool, hello_request};
    use prost_reflect::Value as FieldValue;
    use serde_json::json;

    fn descriptor(name: &str) -> MessageDescriptor {
        greeter_pool().unwrap().get_message_by_name(name).unwrap()
    }

    #[test]
    fn test_decode_uses_field_names() {
        let pool = greeter_pool().unwrap();
        let decoded = MessageCodec::decode(hello_request(&pool, "tom")).unwrap();

        assert_eq!(decoded.get("name"), Some(&json!("tom")));
        assert_eq!(decoded.str("name"), Some("tom"));
        assert_eq!(decoded.raw().descriptor().full_name(), "helloworld.HelloRequest");
    }

    #[test]
    fn test_decode_leaves_record_untouched() {
        let pool = greeter_pool().unwrap();
        let request = hello_request(&pool, "sam");
        let decoded = MessageCodec::decode(request.clone()).unwrap();

        assert_eq!(decoded.raw(), &request);
    }

    #[test]
    fn test_decode_nested_and_repeated() {
        let profile = descriptor("helloworld.Profile");
        let record = MessageCodec::from_mapping(
            &profile,
            json!({
                "display_name": "wony",
                "age": 31,
                "tags": ["a", "b"],
                "address": {"city": "Seoul", "zip": 4321},
                "history": [{"city": "Busan"}],
            })
            .as_object()
            .unwrap()
            .clone(),
        )
        .unwrap();

        let decoded = MessageCodec::decode(record).unwrap();
        assert_eq!(decoded.get("display_name"), Some(&json!("wony")));
        assert_eq!(decoded.get("tags"), Some(&json!(["a", "b"])));
        assert_eq!(decoded.get("address"), Some(&json!({"city": "Seoul", "zip": 4321})));
        assert_eq!(decoded.get("history"), Some(&json!([{"city": "Busan"}])));
    }

    #[test]
    fn test_round_trip_reproduces_fields() {
        let profile = descriptor("helloworld.Profile");
        let mut record = DynamicMessage::new(profile.clone());
        record.set_field_by_name("display_name", FieldValue::String("homi".to_string()));
        record.set_field_by_name("age", FieldValue::I32(7));
        record.set_field_by_name("active", FieldValue::Bool(true));
        record.set_field_by_name("score", FieldValue::F64(2.5));
        record.set_field_by_name("visits", FieldValue::I64(9_007_199_254_740_993));
        record.set_field_by_name(
            "tags",
            FieldValue::List(vec![
                FieldValue::String("x".to_string()),
                FieldValue::String("y".to_string()),
            ]),
        );

        let (mapping, _) = MessageCodec::decode(record.clone()).unwrap().into_parts();
        let rebuilt = MessageCodec::encode(&profile, mapping.into()).unwrap();

        assert_eq!(rebuilt, record);
    }

    #[test]
    fn test_encode_passes_matching_record_through() {
        let pool = greeter_pool().unwrap();
        let reply_type = pool.get_message_by_name("helloworld.HelloReply").unwrap();
        let mut reply = DynamicMessage::new(reply_type.clone());
        reply.set_field_by_name("message", FieldValue::String("Hello tom!".to_string()));

        let encoded = MessageCodec::encode(&reply_type, reply.clone().into()).unwrap();
        assert_eq!(encoded, reply);
    }

    #[test]
    fn test_encode_mapping() {
        let reply_type = descriptor("helloworld.HelloReply");
        let record = MessageCodec::encode(&reply_type, json!({"message": "Hello tom!"}).into()).unwrap();

        assert_eq!(
            record.get_field_by_name("message").unwrap().as_str(),
            Some("Hello tom!")
        );
    }

    #[test]
    fn test_encode_rejects_unknown_field() {
        let reply_type = descriptor("helloworld.HelloReply");
        let err = MessageCodec::encode(&reply_type, json!({"message": "hi", "extra": 1}).into())
            .unwrap_err();

        assert!(matches!(err, RpcwireError::Codec(_)));
        assert!(err.to_string().contains("helloworld.HelloReply"));
    }

    #[test]
    fn test_encode_rejects_wrong_value_shape() {
        let reply_type = descriptor("helloworld.HelloReply");

        let err = MessageCodec::encode(&reply_type, json!({"message": 12}).into()).unwrap_err();
        assert!(matches!(err, RpcwireError::Codec(_)));

        let err = MessageCodec::encode(&reply_type, json!("Hello").into()).unwrap_err();
        assert!(matches!(err, RpcwireError::Codec(_)));
    }

    #[test]
    fn test_encode_accepts_same_type_from_another_pool() {
        let service_type = descriptor("helloworld.HelloReply");
        let handler_type = descriptor("helloworld.HelloReply");
        assert_ne!(service_type, handler_type);

        let mut reply = DynamicMessage::new(handler_type);
        reply.set_field_by_name("message", FieldValue::String("Hello tom!".to_string()));

        let encoded = MessageCodec::encode(&service_type, reply.into()).unwrap();
        assert_eq!(encoded.descriptor(), service_type);
        assert_eq!(
            encoded.get_field_by_name("message").unwrap().as_str(),
            Some("Hello tom!")
        );
    }

    #[test]
    fn test_encode_rejects_other_record_type() {
        let pool = greeter_pool().unwrap();
        let reply_type = pool.get_message_by_name("helloworld.HelloReply").unwrap();
        let err = MessageCodec::encode(&reply_type, hello_request(&pool, "tom").into()).unwrap_err();

        assert!(err.to_string().contains("helloworld.HelloRequest"));
    }
}
