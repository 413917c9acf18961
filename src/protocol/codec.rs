//! Frame codec.
//!
//! Encoding is split into two pure stages: [`fields`] validates a [`Message`]
//! and lays out its ordered text fields, [`frame`] joins them and terminates
//! the frame. [`decode`] reverses both.
use base64::{Engine, engine::general_purpose::STANDARD};
use log::trace;
use thiserror::Error;

use super::{Code, DELIMITER, Direction, EOF, Message, NULL, Params};

/// Prefix marking base64-escaped content.
pub const BASE64_TAG: &[u8] = b"base64:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("code {code} is not valid for a {direction:?} frame")]
    InvalidCode { code: Code, direction: Direction },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Encodes `message` as a complete frame for `direction`.
pub fn encode(message: &Message, direction: Direction) -> Result<Vec<u8>, CodecError> {
    Ok(frame(fields(message, direction)?))
}

/// Validates the message code and builds the ordered frame fields.
pub fn fields(message: &Message, direction: Direction) -> Result<Vec<Vec<u8>>, CodecError> {
    if !message.code.allowed(direction) {
        return Err(CodecError::InvalidCode {
            code: message.code,
            direction,
        });
    }

    let mut fields = Vec::with_capacity(direction.field_count());
    fields.push(vec![message.code.as_byte()]);
    fields.push(encode_content(message.content.as_deref()));

    if direction == Direction::Request {
        fields.push(encode_params(&message.params));
    }

    Ok(fields)
}

/// Joins fields with the delimiter and appends the end-of-frame sentinel.
pub fn frame(fields: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = fields.join(DELIMITER);
    out.extend_from_slice(EOF);
    out
}

/// Decodes a frame. The code byte is returned as-is, membership in the
/// direction's code set is not checked here.
pub fn decode(bytes: &[u8], direction: Direction) -> Result<Message, CodecError> {
    let body = bytes
        .strip_suffix(EOF)
        .ok_or_else(|| CodecError::MalformedFrame("missing end of frame".to_string()))?;

    let parts = split(body, DELIMITER);
    if parts.len() != direction.field_count() {
        return Err(CodecError::MalformedFrame(format!(
            "expected {} fields, found {}",
            direction.field_count(),
            parts.len()
        )));
    }

    let code = match parts[0] {
        [byte] => Code::from_byte(*byte),
        other => {
            return Err(CodecError::MalformedFrame(format!(
                "code field must be one byte, found {}",
                other.len()
            )));
        }
    };

    let content = decode_content(parts[1])?;
    let params = match parts.get(2) {
        Some(field) => decode_params(field)?,
        None => Params::default(),
    };

    trace!("decoded {code:?} frame of {} bytes", bytes.len());
    Ok(Message {
        code,
        content,
        params,
    })
}

fn encode_content(content: Option<&[u8]>) -> Vec<u8> {
    let Some(content) = content else {
        return NULL.to_vec();
    };

    let ambiguous = content == NULL
        || content.starts_with(BASE64_TAG)
        || content.windows(DELIMITER.len()).any(|w| w == DELIMITER);

    if !ambiguous && std::str::from_utf8(content).is_ok() {
        return content.to_vec();
    }

    let mut out = BASE64_TAG.to_vec();
    out.extend_from_slice(STANDARD.encode(content).as_bytes());
    out
}

fn decode_content(field: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
    if field == NULL {
        return Ok(None);
    }

    if let Some(encoded) = field.strip_prefix(BASE64_TAG) {
        return STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| CodecError::MalformedFrame(format!("bad base64 content: {e}")));
    }

    std::str::from_utf8(field)
        .map_err(|e| CodecError::MalformedFrame(format!("content is not text: {e}")))?;
    Ok(Some(field.to_vec()))
}

fn encode_params(params: &Params) -> Vec<u8> {
    if params.is_empty() {
        return NULL.to_vec();
    }

    params
        .pairs()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
        .into_bytes()
}

fn decode_params(field: &[u8]) -> Result<Params, CodecError> {
    let mut params = Params::default();
    if field == NULL || field.is_empty() {
        return Ok(params);
    }

    let query = std::str::from_utf8(field)
        .map_err(|e| CodecError::MalformedFrame(format!("params are not text: {e}")))?;

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            CodecError::MalformedFrame(format!("parameter '{pair}' has no value"))
        })?;
        params.insert(unescape(key)?, unescape(value)?);
    }

    Ok(params)
}

fn unescape(s: &str) -> Result<String, CodecError> {
    urlencoding::decode(s)
        .map(|s| s.into_owned())
        .map_err(|e| CodecError::MalformedFrame(format!("bad parameter encoding: {e}")))
}

fn split<'a>(bytes: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i + delimiter.len() <= bytes.len() {
        if &bytes[i..i + delimiter.len()] == delimiter {
            parts.push(&bytes[start..i]);
            i += delimiter.len();
            start = i;
        } else {
            i += 1;
        }
    }
    parts.push(&bytes[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message, direction: Direction) {
        let bytes = encode(&message, direction).unwrap();
        assert_eq!(decode(&bytes, direction).unwrap(), message);
    }

    #[test]
    fn encode_request_layout() {
        let msg = Message::new(Code::CMD)
            .with_content("Hello World")
            .with_param("python", "True");

        let bytes = encode(&msg, Direction::Request).unwrap();
        assert_eq!(bytes, b"\x07\r\nHello World\r\npython=True\r\n\r\n");
    }

    #[test]
    fn encode_response_layout() {
        let bytes = encode(&Message::new(Code::SUCCESS), Direction::Response).unwrap();
        assert_eq!(bytes, b"2\r\n\x00\r\n\r\n");
    }

    #[test]
    fn request_without_params_uses_null() {
        let bytes = encode(&Message::new(Code::GET_INFO), Direction::Request).unwrap();
        assert_eq!(bytes, b"\x01\r\n\x00\r\n\x00\r\n\r\n");
    }

    #[test]
    fn roundtrip_contents() {
        roundtrip(Message::new(Code::PWD), Direction::Request);
        roundtrip(Message::new(Code::CMD).with_content(""), Direction::Request);
        roundtrip(Message::new(Code::CMD).with_content("ls -la"), Direction::Request);
        roundtrip(
            Message::new(Code::UPLOAD).with_content(vec![0xff, 0x00, 0xfe, 0x80]),
            Direction::Request,
        );
        roundtrip(
            Message::success(vec![0xc3, 0x28, b'\r', b'\n']),
            Direction::Response,
        );
        roundtrip(Message::error("no such file"), Direction::Response);
    }

    #[test]
    fn roundtrip_params() {
        let one = Message::new(Code::DOWNLOAD).with_param("name", "notes.txt");
        let many = Message::new(Code::CMD)
            .with_content("echo")
            .with_param("a", "1")
            .with_param("b", "two words")
            .with_param("a", "x=y&z");

        roundtrip(one, Direction::Request);
        roundtrip(many, Direction::Request);
    }

    #[test]
    fn binary_content_is_base64_tagged() {
        let msg = Message::new(Code::UPLOAD).with_content(vec![0xff, 0xfe]);
        let bytes = encode(&msg, Direction::Request).unwrap();

        assert!(bytes[3..].starts_with(b"base64:"));
    }

    #[test]
    fn null_content_is_distinct_from_null_byte() {
        let absent = Message::new(Code::CMD);
        let null_byte = Message::new(Code::CMD).with_content(NULL);

        let absent_bytes = encode(&absent, Direction::Request).unwrap();
        let null_bytes = encode(&null_byte, Direction::Request).unwrap();
        assert_ne!(absent_bytes, null_bytes);

        assert_eq!(decode(&absent_bytes, Direction::Request).unwrap().content, None);
        assert_eq!(
            decode(&null_bytes, Direction::Request).unwrap().content,
            Some(NULL.to_vec())
        );
    }

    #[test]
    fn text_resembling_a_tag_survives() {
        roundtrip(
            Message::new(Code::CMD).with_content("base64:aGVsbG8="),
            Direction::Request,
        );
    }

    #[test]
    fn delimiter_inside_text_content_is_escaped() {
        let msg = Message::new(Code::CMD).with_content("line one\r\nline two\r\n\r\n");
        let bytes = encode(&msg, Direction::Request).unwrap();

        assert_eq!(split(&bytes[..bytes.len() - EOF.len()], DELIMITER).len(), 3);
        assert_eq!(decode(&bytes, Direction::Request).unwrap(), msg);
    }

    #[test]
    fn invalid_code_for_direction() {
        let err = encode(&Message::new(Code::SUCCESS), Direction::Request).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidCode {
                code: Code::SUCCESS,
                direction: Direction::Request
            }
        );

        let err = encode(&Message::new(Code::CMD), Direction::Response).unwrap_err();
        assert!(matches!(err, CodecError::InvalidCode { .. }));
    }

    #[test]
    fn control_values_cannot_be_encoded() {
        let msg = Message::new(Code::from_byte(crate::protocol::Control::Syn.value() as u8));
        assert!(encode(&msg, Direction::Request).is_err());
        assert!(encode(&msg, Direction::Response).is_err());
    }

    #[test]
    fn decode_does_not_validate_code() {
        let msg = decode(b"\x7f\r\nhi\r\n\x00\r\n\r\n", Direction::Request).unwrap();
        assert_eq!(msg.code, Code::from_byte(0x7f));

        let msg = decode(b"\x07\r\nhi\r\n\r\n", Direction::Response).unwrap();
        assert_eq!(msg.code, Code::CMD);
    }

    #[test]
    fn decode_rejects_missing_eof() {
        let err = decode(b"\x07\r\nhi\r\n\x00", Direction::Request).unwrap_err();
        assert!(matches!(err, CodecError::MalformedFrame(_)));
    }

    #[test]
    fn decode_rejects_wrong_field_count() {
        let request = encode(&Message::new(Code::CMD), Direction::Request).unwrap();
        let response = encode(&Message::new(Code::ERROR), Direction::Response).unwrap();

        assert!(matches!(
            decode(&request, Direction::Response),
            Err(CodecError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode(&response, Direction::Request),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    #[test]
    fn decode_rejects_param_without_value() {
        let err = decode(b"\x07\r\nhi\r\nflag\r\n\r\n", Direction::Request).unwrap_err();
        assert!(matches!(err, CodecError::MalformedFrame(_)));
    }

    #[test]
    fn decode_empty_param_value() {
        let msg = decode(b"\x07\r\nhi\r\nflag=\r\n\r\n", Direction::Request).unwrap();
        assert_eq!(msg.params.first("flag"), Some(""));
    }
}
