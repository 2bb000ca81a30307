use super::Codec;
use crate::buffer::ProtocolBuffer;
use crate::error::CodecError;
use crate::value::Value;

macro_rules! primitive_codec {
    ($codec:ident, $variant:ident, $write:ident, $read:ident) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $codec;

        impl Codec for $codec {
            fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError> {
                match value {
                    Value::$variant(inner) => {
                        buffer.$write(*inner);
                        Ok(())
                    }
                    other => Err(other.mismatch(stringify!($variant))),
                }
            }

            fn decode(&self, buffer: &mut ProtocolBuffer) -> Result<Value, CodecError> {
                Ok(Value::$variant(buffer.$read()?))
            }
        }
    };
}

primitive_codec!(BoolCodec, Bool, write_bool, read_bool);
primitive_codec!(ByteCodec, Byte, write_i8, read_i8);
primitive_codec!(ShortCodec, Short, write_i16, read_i16);
primitive_codec!(IntCodec, Int, write_i32, read_i32);
primitive_codec!(LongCodec, Long, write_i64, read_i64);
primitive_codec!(FloatCodec, Float, write_f32, read_f32);
primitive_codec!(DoubleCodec, Double, write_f64, read_f64);

#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec for StringCodec {
    fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError> {
        match value {
            Value::String(inner) => buffer.write_string(inner),
            other => Err(other.mismatch("String")),
        }
    }

    fn decode(&self, buffer: &mut ProtocolBuffer) -> Result<Value, CodecError> {
        Ok(Value::String(buffer.read_string()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_codec_rejects_truthy_bytes() {
        let mut buffer = ProtocolBuffer::from_bytes(vec![1, 0, 255]);
        assert_eq!(BoolCodec.decode(&mut buffer).unwrap(), Value::Bool(true));
        assert_eq!(BoolCodec.decode(&mut buffer).unwrap(), Value::Bool(false));
        assert_eq!(
            BoolCodec.decode(&mut buffer),
            Err(CodecError::InvalidBoolean(255))
        );
    }

    #[test]
    fn test_long_codec_layout() {
        let mut buffer = ProtocolBuffer::new();
        LongCodec.encode(&mut buffer, &Value::Long(0x0102)).unwrap();
        assert_eq!(buffer.as_bytes(), &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(LongCodec.decode(&mut buffer).unwrap(), Value::Long(0x0102));
    }

    #[test]
    fn test_string_codec_layout() {
        let mut buffer = ProtocolBuffer::new();
        StringCodec
            .encode(&mut buffer, &Value::String("ru".to_string()))
            .unwrap();
        assert_eq!(buffer.as_bytes(), &[2, b'r', b'u']);
    }

    #[test]
    fn test_primitive_codec_rejects_other_values() {
        let mut buffer = ProtocolBuffer::new();
        assert_eq!(
            ShortCodec.encode(&mut buffer, &Value::Int(1)),
            Err(CodecError::ValueMismatch {
                expected: "Short",
                found: "Int"
            })
        );
        assert!(buffer.as_bytes().is_empty());
    }
}
