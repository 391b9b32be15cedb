use serde_json::Value;

use crate::error::{BufferError, Result};
use crate::registry::JSON_FORMAT;
use crate::{Payload, ReadBuffer, WriteBuffer};

/// Default read buffer: UTF-8 JSON text.
///
/// Binary payloads are accepted and parsed as UTF-8 JSON bytes, so a peer
/// sending JSON over a binary transport still decodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonReadBuffer;

impl ReadBuffer for JsonReadBuffer {
    fn decode(&self, data: &Payload) -> Result<Value> {
        let parsed = match data {
            Payload::Text(text) => serde_json::from_str(text),
            Payload::Binary(bytes) => serde_json::from_slice(bytes.as_ref()),
        };
        parsed.map_err(|source| BufferError::Decode {
            format: JSON_FORMAT,
            source,
        })
    }

    fn format(&self) -> &'static str {
        JSON_FORMAT
    }
}

/// Default write buffer: UTF-8 JSON text.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonWriteBuffer;

impl WriteBuffer for JsonWriteBuffer {
    fn encode(&self, value: &Value) -> Result<Payload> {
        serde_json::to_string(value)
            .map(Payload::Text)
            .map_err(|source| BufferError::Encode {
                format: JSON_FORMAT,
                source,
            })
    }

    fn format(&self) -> &'static str {
        JSON_FORMAT
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;

    #[test]
    fn roundtrips_json_representable_values() {
        let values = vec![
            json!(null),
            json!(true),
            json!(42),
            json!(1.5),
            json!("text"),
            json!([1, "two", null]),
            json!({"nested": {"list": [1, 2, 3], "flag": false}}),
        ];

        let writer = JsonWriteBuffer;
        let reader = JsonReadBuffer;

        for value in values {
            let encoded = writer.encode(&value).unwrap();
            let decoded = reader.decode(&encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn decodes_binary_json_payloads() {
        let reader = JsonReadBuffer;
        let payload = Payload::Binary(Bytes::from_static(b"{\"ok\":true}"));
        assert_eq!(reader.decode(&payload).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        let reader = JsonReadBuffer;
        let payload = Payload::Text("{not-json".to_string());
        assert!(matches!(
            reader.decode(&payload),
            Err(BufferError::Decode { .. })
        ));
    }
}
