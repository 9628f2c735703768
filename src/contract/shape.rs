//! Call shape classification.
//!
//! A method's call shape is fully determined by the two streaming flags of
//! its contract entry. The four shapes partition the 2×2 space, so the
//! classifier is a total table lookup with no failure path.

use std::fmt;

use prost_reflect::MethodDescriptor;

/// Whether each side of a call carries one record or a sequence of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// One record in, one record out.
    SingleSingle,
    /// A sequence of records in, one record out.
    SequenceSingle,
    /// One record in, a sequence of records out.
    SingleSequence,
    /// A sequence of records in, a sequence of records out.
    SequenceSequence,
}

impl CallShape {
    /// Classify a method from its `(client_streaming, server_streaming)` flags.
    pub const fn classify(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => CallShape::SingleSingle,
            (true, false) => CallShape::SequenceSingle,
            (false, true) => CallShape::SingleSequence,
            (true, true) => CallShape::SequenceSequence,
        }
    }

    /// Classify a method straight from its contract descriptor.
    pub fn of(method: &MethodDescriptor) -> Self {
        Self::classify(method.is_client_streaming(), method.is_server_streaming())
    }

    /// True when the caller sends a sequence of records.
    #[inline]
    pub const fn is_sequence_input(self) -> bool {
        matches!(self, CallShape::SequenceSingle | CallShape::SequenceSequence)
    }

    /// True when the handler produces a sequence of records.
    #[inline]
    pub const fn is_sequence_output(self) -> bool {
        matches!(self, CallShape::SingleSequence | CallShape::SequenceSequence)
    }

    /// gRPC-style name of the shape.
    pub const fn as_str(self) -> &'static str {
        match self {
            CallShape::SingleSingle => "unary-unary",
            CallShape::SequenceSingle => "stream-unary",
            CallShape::SingleSequence => "unary-stream",
            CallShape::SequenceSequence => "stream-stream",
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_all_combinations() {
        assert_eq!(CallShape::classify(false, false), CallShape::SingleSingle);
        assert_eq!(CallShape::classify(true, false), CallShape::SequenceSingle);
        assert_eq!(CallShape::classify(false, true), CallShape::SingleSequence);
        assert_eq!(CallShape::classify(true, true), CallShape::SequenceSequence);
    }

    #[test]
    fn test_flags_round_trip_through_shape() {
        for client in [false, true] {
            for server in [false, true] {
                let shape = CallShape::classify(client, server);
                assert_eq!(shape.is_sequence_input(), client);
                assert_eq!(shape.is_sequence_output(), server);
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(CallShape::SingleSequence.to_string(), "unary-stream");
        assert_eq!(CallShape::SequenceSequence.to_string(), "stream-stream");
    }
}
