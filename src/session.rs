//! Retained server-side session state, keyed by resume token.

use std::sync::Arc;

use dashmap::DashMap;
use log::debug;

use crate::{
    connection::{CanResumeFn, Event, EventSender},
    error::RSocketError,
    handler::{Responder, ServiceHandler},
    setup::{ResumeParameters, ResumeToken, SetupParameters},
    transport::BoxDuplexConnection,
};

/// Handle to a live server connection, retained so a later RESUME can be
/// routed back to it.
pub struct ServerState {
    events: EventSender,
    resumable: bool,
    token: ResumeToken,
}

impl ServerState {
    pub(crate) fn new(events: EventSender, resumable: bool, token: ResumeToken) -> Self {
        Self {
            events,
            resumable,
            token,
        }
    }

    /// Whether the session was established with resumption enabled.
    #[must_use]
    pub fn is_resumable(&self) -> bool { self.resumable }

    /// The token the session was registered under.
    #[must_use]
    pub fn token(&self) -> ResumeToken { self.token }

    /// Hand a fresh transport and the decoded RESUME parameters to the
    /// connection. Returns whether the handshake was accepted.
    pub(crate) async fn resume(
        &self,
        transport: BoxDuplexConnection,
        params: ResumeParameters,
        handler: Arc<dyn ServiceHandler>,
    ) -> bool {
        if !self.resumable {
            return false;
        }
        let token = self.token;
        let can_resume: CanResumeFn =
            Box::new(move |clean, dirty| handler.can_resume(clean, dirty, token));
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        if self
            .events
            .send(Event::ServerResume {
                transport,
                params,
                can_resume,
                reply: reply_tx,
            })
            .is_err()
        {
            debug!("resume for token {token} targets a closed connection");
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }
}

/// Shared token → session store.
///
/// The single piece of cross-connection state a server carries; the map's
/// internal sharded locking satisfies the brief-reader/brief-writer
/// discipline the resume path needs.
#[derive(Default)]
pub struct ServerSessions {
    sessions: DashMap<ResumeToken, Arc<ServerState>>,
}

impl ServerSessions {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Retain `state` under `token`, replacing any prior session.
    pub fn insert(&self, token: ResumeToken, state: Arc<ServerState>) {
        self.sessions.insert(token, state);
    }

    /// Look up the session for `token`.
    #[must_use]
    pub fn get(&self, token: &ResumeToken) -> Option<Arc<ServerState>> {
        self.sessions.get(token).map(|entry| Arc::clone(&entry))
    }

    /// Drop the session for `token`.
    pub fn remove(&self, token: &ResumeToken) { self.sessions.remove(token); }

    /// Number of retained sessions.
    #[must_use]
    pub fn len(&self) -> usize { self.sessions.len() }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.sessions.is_empty() }
}

/// A [`ServiceHandler`] that accepts every setup with a fixed responder and
/// retains resumable sessions in a [`ServerSessions`] store.
pub struct SessionServiceHandler {
    responder: Arc<dyn Responder>,
    sessions: ServerSessions,
}

impl SessionServiceHandler {
    /// Serve every connection with `responder`, retaining resumable
    /// sessions for later resumption.
    #[must_use]
    pub fn new(responder: Arc<dyn Responder>) -> Self {
        Self {
            responder,
            sessions: ServerSessions::new(),
        }
    }
}

impl ServiceHandler for SessionServiceHandler {
    fn on_new_setup(&self, _setup: &SetupParameters) -> Result<Arc<dyn Responder>, RSocketError> {
        Ok(Arc::clone(&self.responder))
    }

    fn on_new_rsocket_state(&self, state: Arc<ServerState>, token: ResumeToken) {
        self.sessions.insert(token, state);
    }

    fn on_resume(&self, token: ResumeToken) -> Result<Arc<ServerState>, RSocketError> {
        self.sessions
            .get(&token)
            .ok_or_else(|| RSocketError::rejected("no server state for token"))
    }
}
