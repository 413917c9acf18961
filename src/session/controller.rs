use std::{
    io,
    net::{Shutdown, SocketAddr, TcpListener},
    sync::Arc,
    time::Duration,
};

use log::{error, info, warn};
use thiserror::Error;

use crate::{
    protocol::{TransportConfig, TransportError},
    scheduler::Pooler,
};

use super::{Session, SessionRegistry};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller is already listening on {0}")]
    AlreadyListening(SocketAddr),
    #[error("no session with id {0}")]
    UnknownSession(usize),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Controller IO Error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    /// How often pending connections are accepted.
    pub accept_interval: Duration,
    /// How often every session is probed.
    pub reap_interval: Duration,
    /// Connections beyond this many active sessions are refused.
    pub max_sessions: usize,
    pub transport: TransportConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            accept_interval: Duration::from_secs(2),
            reap_interval: Duration::from_secs(5),
            max_sessions: 5,
            transport: TransportConfig::default(),
        }
    }
}

pub type SessionHook = Arc<dyn Fn(&Session) + Send + Sync + 'static>;

/// Session lifecycle callbacks. They run on the accept and reap workers.
#[derive(Clone, Default)]
pub struct Hooks {
    on_accept: Option<SessionHook>,
    on_reap: Option<SessionHook>,
}

impl Hooks {
    pub fn on_accept<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.on_accept = Some(Arc::new(f));
        self
    }

    pub fn on_reap<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.on_reap = Some(Arc::new(f));
        self
    }
}

/// Accepts agent connections and keeps the set of live sessions current.
///
/// The reap task runs from construction; the accept task runs once
/// [`listen`](Self::listen) has bound a socket. Both run on their own
/// single-worker [`Pooler`], off the caller's thread.
pub struct Controller {
    config: ControllerConfig,
    hooks: Hooks,
    registry: Arc<SessionRegistry>,
    acceptor: Option<(SocketAddr, Pooler)>,
    reaper: Pooler,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_hooks(config, Hooks::default())
    }

    pub fn with_hooks(config: ControllerConfig, hooks: Hooks) -> Self {
        let registry = Arc::new(SessionRegistry::new());

        let reaped = Arc::clone(&registry);
        let on_reap = hooks.on_reap.clone();
        let mut reaper = Pooler::new("reap", config.reap_interval, move || {
            for session in reaped.reap() {
                info!("session {} ({}) is unreachable, removed", session.id(), session.peer());
                if let Some(hook) = &on_reap {
                    hook(&session);
                }
            }
        });
        reaper.start();

        Self {
            config,
            hooks,
            registry,
            acceptor: None,
            reaper,
        }
    }

    /// Binds `address` and starts accepting agents. Returns the bound address.
    pub fn listen(&mut self, address: SocketAddr) -> Result<SocketAddr, ControllerError> {
        if let Some((bound, _)) = &self.acceptor {
            return Err(ControllerError::AlreadyListening(*bound));
        }

        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        let bound = listener.local_addr()?;
        info!("listening at {bound}");

        let registry = Arc::clone(&self.registry);
        let on_accept = self.hooks.on_accept.clone();
        let config = self.config;
        let mut acceptor = Pooler::new("accept", config.accept_interval, move || {
            accept_pending(&listener, &registry, &config, on_accept.as_ref())
        });
        acceptor.start();

        self.acceptor = Some((bound, acceptor));
        Ok(bound)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.as_ref().map(|(bound, _)| *bound)
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.registry.list()
    }

    pub fn session(&self, id: usize) -> Result<Arc<Session>, ControllerError> {
        self.registry
            .get(id)
            .ok_or(ControllerError::UnknownSession(id))
    }

    /// Closes the session and stops tracking it.
    pub fn close(&self, id: usize) -> Result<(), ControllerError> {
        let session = self
            .registry
            .remove(id)
            .ok_or(ControllerError::UnknownSession(id))?;
        session.close();
        info!("closed session {id}");
        Ok(())
    }

    /// Stops both background tasks and closes every session.
    pub fn shutdown(&mut self) {
        if let Some((bound, mut acceptor)) = self.acceptor.take() {
            acceptor.stop();
            info!("stopped listening at {bound}");
        }
        self.reaper.stop();

        for session in self.registry.drain() {
            session.close();
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accepts every connection that is already waiting, without blocking.
fn accept_pending(
    listener: &TcpListener,
    registry: &SessionRegistry,
    config: &ControllerConfig,
    on_accept: Option<&SessionHook>,
) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!("broken connection: {e:?}");
                return;
            }
        };

        if registry.len() >= config.max_sessions {
            warn!(
                "refusing {peer}, already holding {} sessions",
                config.max_sessions
            );
            let _ = stream.shutdown(Shutdown::Both);
            continue;
        }

        if let Err(e) = stream.set_nonblocking(false) {
            error!("failed to configure connection from {peer}: {e}");
            continue;
        }

        let session = registry.insert(stream, peer, config.transport);
        info!("accepted session {} from {peer}", session.id());
        if let Some(hook) = on_accept {
            hook(&session);
        }
    }
}
