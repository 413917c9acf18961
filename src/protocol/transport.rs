use std::{
    io::{self, Read, Write},
    net::TcpStream,
    time::Duration,
};

use bincode::{
    config::{BigEndian, Configuration, Fixint},
    decode_from_slice, encode_into_slice,
};
use log::{debug, trace, warn};
use thiserror::Error;

use super::{Control, codec::CodecError};

/// Width in bytes of the length prefix and of every control token.
pub const HEADER_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("peer answered with {0:#x} instead of an acknowledgement")]
    Acknowledgement(u64),
    #[error("failed to encode header: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode header: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Io(e) if is_timeout(e))
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Streams whose blocking operations can be bounded by a deadline.
pub trait Deadline {
    /// Sets the read and write timeout; `None` blocks indefinitely.
    fn set_deadline(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Deadline for TcpStream {
    fn set_deadline(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

/// Outcome of a receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received<T> {
    Data(T),
    /// The deadline passed before a payload arrived.
    Timeout,
    /// The peer sent the close notice.
    Closed,
}

impl<T> Received<T> {
    pub fn map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Received<U>, E> {
        Ok(match self {
            Received::Data(data) => Received::Data(f(data)?),
            Received::Timeout => Received::Timeout,
            Received::Closed => Received::Closed,
        })
    }

    pub fn data(self) -> Option<T> {
        match self {
            Received::Data(data) => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Upper bound for a single read request while collecting a payload.
    pub buffer_size: usize,
    /// How long a liveness probe may wait for its acknowledgement.
    pub probe_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Length-prefixed, acknowledged exchange of payloads over one stream.
///
/// Every payload is preceded by its length as an 8-byte big-endian integer,
/// and every received payload is answered with the [`Control::Ack`] token.
/// A sender is done only once it has read that token back.
pub struct ProtocolTransport<T: Read + Write + Deadline> {
    stream: T,
    config: Configuration<BigEndian, Fixint>,
    settings: TransportConfig,
}

impl<T: Read + Write + Deadline> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self::with_config(stream, TransportConfig::default())
    }

    pub fn with_config(stream: T, settings: TransportConfig) -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding();
        Self {
            stream,
            config,
            settings,
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    pub fn settings(&self) -> &TransportConfig {
        &self.settings
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    /// Sends `payload` and blocks until the peer acknowledges it.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let header = self.header(payload.len() as u64)?;
        self.stream.write_all(&header)?;
        self.stream.write_all(payload)?;
        self.stream.flush()?;
        trace!("sent {} byte payload, awaiting ack", payload.len());

        let ack = self.read_header()?;
        if ack != Control::Ack.value() {
            return Err(TransportError::Acknowledgement(ack));
        }
        Ok(())
    }

    /// Sends a control token as a payload of its own.
    pub fn send_control(&mut self, control: Control) -> Result<(), TransportError> {
        let token = self.header(control.value())?;
        self.send(&token)
    }

    /// Sends the close notice.
    pub fn send_exit(&mut self) -> Result<(), TransportError> {
        self.send_control(Control::Exit)
    }

    /// Receives the next application payload.
    ///
    /// Liveness probes are acknowledged and skipped. With a timeout, expiry
    /// yields [`Received::Timeout`] and the stream deadline is cleared again
    /// before returning, whatever the outcome. A zero timeout has already
    /// expired and leaves the stream untouched.
    pub fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Received<Vec<u8>>, TransportError> {
        let Some(timeout) = timeout else {
            return self.read_payload();
        };
        if timeout.is_zero() {
            return Ok(Received::Timeout);
        }

        self.stream.set_deadline(Some(timeout))?;
        let res = self.read_payload();
        self.stream.set_deadline(None)?;

        match res {
            Err(e) if e.is_timeout() => {
                debug!("receive timed out after {timeout:?}");
                Ok(Received::Timeout)
            }
            res => res,
        }
    }

    /// Probes the peer with a [`Control::Syn`] token.
    ///
    /// Any failure to complete the handshake within the probe timeout counts
    /// as an unreachable peer. A zero probe timeout can never complete, so
    /// nothing is written.
    pub fn is_alive(&mut self) -> bool {
        if self.settings.probe_timeout.is_zero() {
            warn!("liveness probe skipped, probe timeout is zero");
            return false;
        }
        if let Err(e) = self.stream.set_deadline(Some(self.settings.probe_timeout)) {
            debug!("failed to arm probe deadline: {e}");
            return false;
        }
        let res = self.send_control(Control::Syn);
        let restored = self.stream.set_deadline(None);

        match (res, restored) {
            (Ok(()), Ok(())) => true,
            (Err(e), _) => {
                debug!("liveness probe failed: {e}");
                false
            }
            (_, Err(e)) => {
                debug!("failed to clear probe deadline: {e}");
                false
            }
        }
    }

    fn read_payload(&mut self) -> Result<Received<Vec<u8>>, TransportError> {
        let syn = self.header(Control::Syn.value())?;
        let exit = self.header(Control::Exit.value())?;

        loop {
            let len = self.read_header()? as usize;
            let mut data = Vec::with_capacity(len.min(self.settings.buffer_size));
            let mut buf = vec![0; self.settings.buffer_size.max(1)];

            while data.len() < len {
                let want = (len - data.len()).min(buf.len());
                let n = self.stream.read(&mut buf[..want])?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("peer closed after {} of {len} bytes", data.len()),
                    )
                    .into());
                }
                data.extend_from_slice(&buf[..n]);
            }

            let ack = self.header(Control::Ack.value())?;
            self.stream.write_all(&ack)?;
            self.stream.flush()?;

            if data[..] == syn[..] {
                trace!("acknowledged liveness probe");
                continue;
            }
            if data[..] == exit[..] {
                debug!("peer sent close notice");
                return Ok(Received::Closed);
            }

            trace!("received {len} byte payload");
            return Ok(Received::Data(data));
        }
    }

    fn header(&self, value: u64) -> Result<[u8; HEADER_SIZE], TransportError> {
        let mut buf = [0; HEADER_SIZE];
        encode_into_slice(value, &mut buf, self.config)?;
        Ok(buf)
    }

    fn read_header(&mut self) -> Result<u64, TransportError> {
        let mut buf = [0; HEADER_SIZE];
        self.stream.read_exact(&mut buf)?;
        let (value, _) = decode_from_slice(&buf, self.config)?;
        Ok(value)
    }
}
