//! Parameter binding.
//!
//! A [`Binder`] is computed once when a handler is registered. It holds the
//! ordered list of field names the handler declared; per call it performs
//! one mapping lookup per name and never inspects the handler again.
//!
//! The names `request`, `request_iterator` and `context` are reserved: the
//! raw record and the call context are always supplied to the handler, so
//! those names are never bound to message fields.

use std::sync::Arc;

use prost_reflect::{DynamicMessage, MessageDescriptor};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::{Decoded, Mapping};
use crate::error::Result;

/// Parameter names that always carry the raw record and the call context.
pub const RESERVED_PARAMETERS: [&str; 3] = ["request", "request_iterator", "context"];

/// Precomputed parameter list for one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binder {
    names: Arc<[String]>,
}

impl Binder {
    /// Create a binder from declared parameter names.
    ///
    /// Reserved names are dropped and duplicates collapse onto their first
    /// occurrence, so the binding order is the declaration order.
    pub fn new<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for name in params.into_iter().map(Into::into) {
            if RESERVED_PARAMETERS.contains(&name.as_str()) || names.contains(&name) {
                continue;
            }
            names.push(name);
        }
        Self {
            names: names.into(),
        }
    }

    /// Bind every field declared by `input_type`, in declaration order.
    pub fn for_message(input_type: &MessageDescriptor) -> Self {
        Self::new(input_type.fields().map(|f| f.name().to_string()))
    }

    /// Bound names, in order.
    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Names that `input_type` does not declare; those always bind to null.
    pub fn unknown_fields(&self, input_type: &MessageDescriptor) -> Vec<&str> {
        self.names
            .iter()
            .filter(|n| input_type.get_field_by_name(n).is_none())
            .map(String::as_str)
            .collect()
    }

    /// Bind a decoded record.
    ///
    /// Missing fields resolve to `Value::Null`, never to a lookup failure.
    pub fn bind(&self, decoded: Decoded) -> Args {
        let (mut mapping, raw) = decoded.into_parts();
        let values = self
            .names
            .iter()
            .map(|name| mapping.remove(name).unwrap_or(Value::Null))
            .collect();

        Args {
            names: self.names.clone(),
            values,
            raw,
        }
    }
}

/// Arguments bound for one unary-input call.
#[derive(Debug, Clone)]
pub struct Args {
    names: Arc<[String]>,
    values: Vec<Value>,
    raw: DynamicMessage,
}

impl Args {
    /// Get a bound value by name.
    ///
    /// Returns `None` only for names the handler did not declare; declared
    /// names that were absent from the record yield `Some(&Value::Null)`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.values[i])
    }

    /// Get a bound string value by name.
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Iterate `(name, value)` pairs in binding order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Number of bound parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no parameters are bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Deserialize the bound parameters into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`RpcwireError::Json`](crate::RpcwireError::Json) when the
    /// bound values do not fit `T`.
    pub fn extract<T: DeserializeOwned>(&self) -> Result<T> {
        let mapping: Mapping = self
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        Ok(serde_json::from_value(Value::Object(mapping))?)
    }

    /// The untransformed input record.
    #[inline]
    pub fn raw(&self) -> &DynamicMessage {
        &self.raw
    }

    /// Take the untransformed input record.
    pub fn into_raw(self) -> DynamicMessage {
        self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MessageCodec;
    use crate::testing::{greeter_pool, hello_request};
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_reserved_names_dropped() {
        let binder = Binder::new(["name", "request", "context", "request_iterator", "age"]);
        assert_eq!(binder.names(), &["name".to_string(), "age".to_string()]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let binder = Binder::new(["b", "a", "b"]);
        assert_eq!(binder.names(), &["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_for_message_binds_declared_fields() {
        let pool = greeter_pool().unwrap();
        let profile = pool.get_message_by_name("helloworld.Profile").unwrap();
        let binder = Binder::for_message(&profile);

        assert_eq!(binder.names()[0], "display_name");
        assert_eq!(binder.names().len(), profile.fields().len());
        assert!(binder.unknown_fields(&profile).is_empty());
    }

    #[test]
    fn test_bind_present_and_missing() {
        let pool = greeter_pool().unwrap();
        let decoded = MessageCodec::decode(hello_request(&pool, "tom")).unwrap();
        let args = Binder::new(["name", "nickname"]).bind(decoded);

        assert_eq!(args.str("name"), Some("tom"));
        assert_eq!(args.get("nickname"), Some(&Value::Null));
        assert_eq!(args.get("undeclared"), None);
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_bind_keeps_raw_record() {
        let pool = greeter_pool().unwrap();
        let request = hello_request(&pool, "sam");
        let args = Binder::new(["name"]).bind(MessageCodec::decode(request.clone()).unwrap());

        assert_eq!(args.raw(), &request);
        assert_eq!(args.into_raw(), request);
    }

    #[test]
    fn test_unknown_fields_reported() {
        let pool = greeter_pool().unwrap();
        let input = pool.get_message_by_name("helloworld.HelloRequest").unwrap();

        assert_eq!(Binder::new(["name", "nme"]).unknown_fields(&input), vec!["nme"]);
    }

    #[test]
    fn test_extract_typed() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Hello {
            name: String,
            nickname: Option<String>,
        }

        let pool = greeter_pool().unwrap();
        let args = Binder::new(["name", "nickname"])
            .bind(MessageCodec::decode(hello_request(&pool, "homi")).unwrap());

        let hello: Hello = args.extract().unwrap();
        assert_eq!(
            hello,
            Hello {
                name: "homi".to_string(),
                nickname: None
            }
        );
    }

    #[test]
    fn test_extract_type_mismatch() {
        #[derive(Deserialize, Debug)]
        #[allow(dead_code)]
        struct Numeric {
            name: u32,
        }

        let pool = greeter_pool().unwrap();
        let args = Binder::new(["name"]).bind(MessageCodec::decode(hello_request(&pool, "x")).unwrap());

        assert!(args.extract::<Numeric>().is_err());
        let iterated: Vec<(&str, &Value)> = args.iter().collect();
        assert_eq!(iterated, vec![("name", &json!("x"))]);
    }
}
