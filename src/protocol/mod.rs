//! Controller-agent communication protocol.
//!
//! This module defines the message format exchanged between the controller and its
//! remote agents, the codec that turns messages into frames, and the transport that
//! moves frames over a socket with a confirmed-delivery handshake.
//!
//! # Overview
//!
//! A [`Message`] carries a one-byte [`Code`], optional binary content and
//! query-string style [`Params`]. Requests flow from the controller to an agent and
//! responses flow back; the two directions use disjoint code sets, and the codec
//! refuses to encode a code outside the set for the direction at hand.
//!
//! # Frame Format
//!
//! ```text
//! CODE \r\n CONTENT [\r\n PARAMS] \r\n\r\n
//! ```
//!
//! - `CONTENT` is UTF-8 text, the NULL sentinel (`\x00`) for absent content, or
//!   `base64:` followed by the base64 form of arbitrary bytes.
//! - `PARAMS` (requests only) is a percent-encoded `key=value&...` string, or NULL.
//!
//! # Transport Format
//!
//! ```text
//! [8-byte big-endian length N][N payload bytes]   ->
//!                                                 <-  [8-byte ACK token]
//! ```
//!
//! Control tokens ([`Control`]) use the same length prefix around an 8-byte
//! big-endian value. A [`Control::Syn`] probe is acknowledged and otherwise
//! invisible to callers of [`ProtocolTransport::receive`].
//!
//! # See Also
//!
//! - [`session`](crate::session): Per-connection state built on the transport.
pub mod codec;
mod code;
mod intent;
mod message;
mod transport;

pub use code::{Code, Control, Direction};
pub use codec::CodecError;
pub use intent::{Intent, IntentError, NAME_PARAM, save_download};
pub use message::{Message, Params};
pub use transport::{
    Deadline, HEADER_SIZE, ProtocolTransport, Received, TransportConfig, TransportError,
};

/// Separator between frame fields.
pub const DELIMITER: &[u8] = b"\r\n";

/// End of frame sentinel.
pub const EOF: &[u8] = b"\r\n\r\n";

/// Stand-in for absent content or params.
pub const NULL: &[u8] = b"\x00";
