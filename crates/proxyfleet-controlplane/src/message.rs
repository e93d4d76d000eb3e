//! Control message decoding.

use proxyfleet_config::MessageFormat;
use serde::Deserialize;
use thiserror::Error;

pub const ACTION_RESTART: &str = "restart";

/// A decoded control message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlMessage {
    pub action: String,
    pub endpoint: String,
}

#[derive(Deserialize)]
struct Envelope {
    message: ControlMessage,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnyShape {
    Envelope(Envelope),
    Flat(ControlMessage),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("payload does not match the {format} message format: {source}")]
    Shape {
        format: MessageFormat,
        #[source]
        source: serde_json::Error,
    },
}

impl ControlMessage {
    pub fn is_restart(&self) -> bool {
        self.action == ACTION_RESTART
    }
}

/// Decodes a UTF-8 JSON payload of the given shape.
pub fn decode(body: &[u8], format: MessageFormat) -> Result<ControlMessage, DecodeError> {
    let text = std::str::from_utf8(body)?;
    let shape_error = |source| DecodeError::Shape { format, source };

    match format {
        MessageFormat::Flat => serde_json::from_str(text).map_err(shape_error),
        MessageFormat::Envelope => serde_json::from_str::<Envelope>(text)
            .map(|e| e.message)
            .map_err(shape_error),
        MessageFormat::Auto => match serde_json::from_str::<AnyShape>(text).map_err(shape_error)? {
            AnyShape::Envelope(envelope) => Ok(envelope.message),
            AnyShape::Flat(message) => Ok(message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAT: &str = r#"{"action":"restart","endpoint":"http://10.0.0.5:8001"}"#;
    const ENVELOPE: &str = r#"{"message":{"action":"restart","endpoint":"http://10.0.0.5:8001"}}"#;

    fn expected() -> ControlMessage {
        ControlMessage {
            action: "restart".to_string(),
            endpoint: "http://10.0.0.5:8001".to_string(),
        }
    }

    #[test]
    fn test_decode_flat() {
        let message = decode(FLAT.as_bytes(), MessageFormat::Flat).unwrap();
        assert_eq!(message, expected());
        assert!(message.is_restart());
    }

    #[test]
    fn test_decode_envelope() {
        assert_eq!(
            decode(ENVELOPE.as_bytes(), MessageFormat::Envelope).unwrap(),
            expected()
        );
    }

    #[test]
    fn test_decode_auto_accepts_both_shapes() {
        assert_eq!(decode(FLAT.as_bytes(), MessageFormat::Auto).unwrap(), expected());
        assert_eq!(
            decode(ENVELOPE.as_bytes(), MessageFormat::Auto).unwrap(),
            expected()
        );
    }

    #[test]
    fn test_strict_formats_reject_the_other_shape() {
        assert!(decode(ENVELOPE.as_bytes(), MessageFormat::Flat).is_err());
        assert!(decode(FLAT.as_bytes(), MessageFormat::Envelope).is_err());
    }

    #[test]
    fn test_decode_extra_fields_are_ignored() {
        let body = r#"{"action":"restart","endpoint":"http://h:1","reason":"banned"}"#;
        assert_eq!(
            decode(body.as_bytes(), MessageFormat::Auto).unwrap().endpoint,
            "http://h:1"
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode(b"\xff\xfe", MessageFormat::Auto),
            Err(DecodeError::NotUtf8(_))
        ));
        assert!(matches!(
            decode(b"not json", MessageFormat::Auto),
            Err(DecodeError::Shape { .. })
        ));
        assert!(decode(br#"{"action":"restart"}"#, MessageFormat::Auto).is_err());
    }
}
