use std::{
    collections::BTreeMap,
    net::{SocketAddr, TcpStream},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::debug;

use crate::protocol::TransportConfig;

use super::Session;

#[derive(Debug, Default)]
struct Inner {
    next_id: usize,
    sessions: BTreeMap<usize, Arc<Session>>,
}

/// Synchronized set of active sessions, keyed by id.
///
/// Ids are handed out in accept order and never reused. Iteration always
/// works on a snapshot, so the accept and reap tasks can mutate the set while
/// the console lists it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an accepted stream in a new session and tracks it.
    pub fn insert(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        settings: TransportConfig,
    ) -> Arc<Session> {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let session = Arc::new(Session::new(id, stream, peer, settings));
        inner.sessions.insert(id, Arc::clone(&session));
        session
    }

    pub fn get(&self, id: usize) -> Option<Arc<Session>> {
        self.lock().sessions.get(&id).cloned()
    }

    pub fn remove(&self, id: usize) -> Option<Arc<Session>> {
        self.lock().sessions.remove(&id)
    }

    /// Snapshot of the tracked sessions in id order.
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.lock().sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Probes every session and drops the unreachable ones, returning them.
    ///
    /// Probes run on a snapshot without holding the registry lock.
    pub fn reap(&self) -> Vec<Arc<Session>> {
        let dead: Vec<Arc<Session>> = self
            .list()
            .into_iter()
            .filter(|session| !session.probe())
            .collect();

        if dead.is_empty() {
            return dead;
        }

        let mut inner = self.lock();
        for session in &dead {
            inner.sessions.remove(&session.id());
        }
        drop(inner);

        for session in &dead {
            debug!("reaped session {session}");
            session.close();
        }
        dead
    }

    /// Removes every session and returns them.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        std::mem::take(&mut self.lock().sessions).into_values().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
