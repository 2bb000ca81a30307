use thiserror::Error;

/// Errors raised while resolving codecs or encoding/decoding values
///
/// Configuration variants surface when the protocol is assembled at startup.
/// Everything else is a protocol error: the peer sent bytes we cannot accept,
/// and the connection that produced them should be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("no codec applies to type {descriptor}")]
    NoCodec { descriptor: String },

    #[error("schema for {name} is already registered")]
    DuplicateSchema { name: &'static str },

    #[error("expected a {expected} value, found {found}")]
    ValueMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("invalid boolean byte {0}, expected 0 or 1")]
    InvalidBoolean(u8),

    #[error("unknown representation {repr} for enum {name}")]
    UnknownVariant { name: &'static str, repr: i64 },

    #[error("unknown control command discriminant {0}")]
    UnknownCommand(u8),

    #[error("unknown space frame kind {0}")]
    UnknownFrameKind(u8),

    #[error("decoding {0} is not supported")]
    UnsupportedDecode(&'static str),

    #[error("variable-length integer does not fit in 32 bits")]
    VarIntOverflow,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("{what}: {left} entries do not match {right} entries")]
    LengthMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

impl CodecError {
    /// True when the error was caused by peer input rather than by how the
    /// protocol was declared.
    pub fn is_protocol_error(&self) -> bool {
        !matches!(
            self,
            CodecError::NoCodec { .. }
                | CodecError::DuplicateSchema { .. }
                | CodecError::ValueMismatch { .. }
        )
    }
}
