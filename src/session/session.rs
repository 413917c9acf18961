use std::{
    fmt,
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{
        Mutex, MutexGuard, PoisonError, TryLockError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use crate::protocol::{
    Deadline, Direction, Message, ProtocolTransport, Received, TransportConfig, TransportError,
    codec,
};

/// One connected agent.
///
/// The transport sits behind a mutex so a liveness probe from the reaper can
/// never interleave with a request on the wire.
pub struct Session {
    id: usize,
    peer: SocketAddr,
    connected_at: Instant,
    transport: Mutex<ProtocolTransport<TcpStream>>,
    alive: AtomicBool,
}

impl Session {
    pub fn new(id: usize, stream: TcpStream, peer: SocketAddr, settings: TransportConfig) -> Self {
        Self {
            id,
            peer,
            connected_at: Instant::now(),
            transport: Mutex::new(ProtocolTransport::with_config(stream, settings)),
            alive: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Outcome of the most recent liveness probe.
    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Probes the peer, waiting for any exchange in progress to finish first.
    pub fn is_alive(&self) -> bool {
        let alive = self.transport().is_alive();
        self.alive.store(alive, Ordering::SeqCst);
        alive
    }

    /// Probes the peer unless the transport is busy, in which case the
    /// session counts as alive.
    pub(crate) fn probe(&self) -> bool {
        let alive = match self.transport.try_lock() {
            Ok(mut transport) => transport.is_alive(),
            Err(TryLockError::Poisoned(e)) => e.into_inner().is_alive(),
            Err(TryLockError::WouldBlock) => {
                trace!("session {} busy, skipping probe", self.id);
                true
            }
        };
        self.alive.store(alive, Ordering::SeqCst);
        alive
    }

    /// Encodes `message` as a request and sends it.
    pub fn send(&self, message: &Message) -> Result<(), TransportError> {
        let frame = codec::encode(message, Direction::Request)?;
        self.transport().send(&frame)
    }

    /// Waits for the next response from the agent.
    pub fn receive(&self, timeout: Option<Duration>) -> Result<Received<Message>, TransportError> {
        let received = self.transport().receive(timeout)?;
        received.map(|bytes| codec::decode(&bytes, Direction::Response).map_err(Into::into))
    }

    /// Sends `message` and waits for its response, holding the transport for
    /// the whole exchange.
    ///
    /// A response that misses `timeout` is still owed by the agent and would
    /// be read in place of the next acknowledgement, so the connection is
    /// shut down and the session marked dead.
    pub fn request(
        &self,
        message: &Message,
        timeout: Option<Duration>,
    ) -> Result<Received<Message>, TransportError> {
        let frame = codec::encode(message, Direction::Request)?;
        let mut transport = self.transport();

        transport.send(&frame)?;
        debug!("session {} sent {:?} request", self.id, message.code);

        let received = transport.receive(timeout)?;
        if received == Received::Timeout {
            warn!("session {} missed its response deadline, dropping it", self.id);
            if let Err(e) = transport.get_ref().shutdown(Shutdown::Both) {
                trace!("session {}: shutdown: {e}", self.id);
            }
            self.alive.store(false, Ordering::SeqCst);
        }
        received.map(|bytes| codec::decode(&bytes, Direction::Response).map_err(Into::into))
    }

    /// Sends the close notice, best effort, and shuts the socket down.
    pub fn close(&self) {
        let mut transport = self.transport();

        let timeout = transport.settings().probe_timeout;
        if self.alive() && !timeout.is_zero() {
            if let Err(e) = transport.get_ref().set_deadline(Some(timeout)) {
                debug!("session {}: failed to bound close notice: {e}", self.id);
            }
            if let Err(e) = transport.send_exit() {
                debug!("session {}: close notice not delivered: {e}", self.id);
            }
        }

        if let Err(e) = transport.get_ref().shutdown(Shutdown::Both) {
            trace!("session {}: shutdown: {e}", self.id);
        }
        self.alive.store(false, Ordering::SeqCst);
    }

    fn transport(&self) -> MutexGuard<'_, ProtocolTransport<TcpStream>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("alive", &self.alive())
            .finish()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - {}s",
            self.id,
            self.peer,
            self.connected_for().as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crate::protocol::Code;
    use crate::session::testing::{pair, spawn_agent};

    use super::*;

    fn session(stream: TcpStream) -> Session {
        let peer = stream.peer_addr().unwrap();
        let settings = TransportConfig {
            probe_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        Session::new(0, stream, peer, settings)
    }

    #[test]
    fn request_roundtrip() {
        let (agent, controller) = pair();
        let handle = spawn_agent(agent, |req| {
            assert_eq!(req.code, Code::CMD);
            Message::success("total 0")
        });

        let session = session(controller);
        let reply = session
            .request(&Message::new(Code::CMD).with_content("ls -la"), None)
            .unwrap();
        assert_eq!(reply, Received::Data(Message::success("total 0")));

        session.close();
        handle.join().unwrap();
    }

    #[test]
    fn send_then_receive() {
        let (agent, controller) = pair();
        let handle = spawn_agent(agent, |_| Message::error("denied"));

        let session = session(controller);
        session.send(&Message::new(Code::PWD)).unwrap();
        assert_eq!(
            session.receive(None).unwrap(),
            Received::Data(Message::error("denied"))
        );

        session.close();
        handle.join().unwrap();
    }

    #[test]
    fn receive_times_out() {
        let (_agent, controller) = pair();
        let session = session(controller);

        assert_eq!(
            session.receive(Some(Duration::from_millis(50))).unwrap(),
            Received::Timeout
        );
    }

    #[test]
    fn late_response_drops_session() {
        let (agent, controller) = pair();
        let handle = spawn_agent(agent, |_| {
            thread::sleep(Duration::from_millis(300));
            Message::success("late")
        });

        let session = session(controller);
        let reply = session
            .request(&Message::new(Code::PWD), Some(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(reply, Received::Timeout);
        assert!(!session.alive());
        assert!(!session.is_alive());

        handle.join().unwrap();
    }

    #[test]
    fn send_rejects_response_codes() {
        let (_agent, controller) = pair();
        let session = session(controller);

        let err = session.send(&Message::success("nope")).unwrap_err();
        assert!(matches!(err, TransportError::Codec(_)));
    }

    #[test]
    fn liveness_flag_follows_probe() {
        let (agent, controller) = pair();
        let handle = spawn_agent(agent, |_| Message::success(""));
        let session = session(controller);

        assert!(session.is_alive());
        assert!(session.alive());

        session.close();
        handle.join().unwrap();
        assert!(!session.alive());
        assert!(!session.is_alive());
    }

    #[test]
    fn probe_skips_busy_session() {
        let (_agent, controller) = pair();
        let session = std::sync::Arc::new(session(controller));

        let busy = std::sync::Arc::clone(&session);
        let waiter = thread::spawn(move || busy.receive(Some(Duration::from_millis(300))));

        thread::sleep(Duration::from_millis(50));
        assert!(session.probe());
        assert_eq!(waiter.join().unwrap().unwrap(), Received::Timeout);
    }
}
