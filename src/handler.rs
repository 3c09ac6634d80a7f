//! Application-facing contracts: the responder interface and the server's
//! service handler hooks.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use log::debug;

use crate::{
    connection::PayloadStream,
    error::RSocketError,
    frame::StreamId,
    payload::Payload,
    session::ServerState,
    setup::{ResumeToken, SetupParameters},
};

/// Stream of payloads produced by a responder (or fed into a channel).
pub type PayloadSource = BoxStream<'static, Result<Payload, RSocketError>>;

/// Handler set the application implements to answer inbound requests.
///
/// Every default rejects (or ignores, for signals without a reply channel),
/// so embedders implement only the interaction models they serve. Handlers
/// run on the connection's executor: return quickly and do asynchronous
/// work inside the returned stream or future.
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    /// Handle a fire-and-forget request. Errors have nowhere to go and are
    /// dropped.
    async fn handle_fire_and_forget(&self, payload: Payload, stream_id: StreamId) {
        let _ = payload;
        debug!("fire-and-forget on stream {stream_id} ignored by default responder");
    }

    /// Handle a request/response interaction.
    async fn handle_request_response(
        &self,
        payload: Payload,
        stream_id: StreamId,
    ) -> Result<Payload, RSocketError> {
        let _ = (payload, stream_id);
        Err(RSocketError::rejected("request_response not supported"))
    }

    /// Handle a request/stream interaction by returning the payload source
    /// to drain, under the peer's request-n credit.
    fn handle_request_stream(
        &self,
        payload: Payload,
        stream_id: StreamId,
    ) -> Result<PayloadSource, RSocketError> {
        let _ = (payload, stream_id);
        Err(RSocketError::rejected("request_stream not supported"))
    }

    /// Handle a channel: consume `payloads` (requesting credit through it)
    /// and return the outbound source.
    fn handle_request_channel(
        &self,
        payloads: PayloadStream,
        stream_id: StreamId,
    ) -> Result<PayloadSource, RSocketError> {
        let _ = (payloads, stream_id);
        Err(RSocketError::rejected("request_channel not supported"))
    }

    /// Observe a connection-scoped metadata push.
    fn handle_metadata_push(&self, metadata: Bytes) {
        debug!("metadata push of {} bytes ignored by default responder", metadata.len());
    }
}

/// A responder with every handler left at its rejecting default.
pub struct NoopResponder;

impl Responder for NoopResponder {}

/// Server-side embedding hooks: accepting setups, retaining resumable
/// sessions and authorizing resumption.
pub trait ServiceHandler: Send + Sync + 'static {
    /// Inspect a SETUP and produce the responder serving the connection.
    ///
    /// # Errors
    ///
    /// Returning an error rejects the connection with `REJECTED_SETUP`.
    fn on_new_setup(&self, setup: &SetupParameters) -> Result<Arc<dyn Responder>, RSocketError>;

    /// Called exactly once per accepted resumable SETUP with the session
    /// state and its token. Default: no-op (resumption will never find the
    /// session unless this stores it).
    fn on_new_rsocket_state(&self, state: Arc<ServerState>, token: ResumeToken) {
        let _ = (state, token);
    }

    /// Look up the retained session for `token`.
    ///
    /// # Errors
    ///
    /// The default rejects every resumption attempt.
    fn on_resume(&self, token: ResumeToken) -> Result<Arc<ServerState>, RSocketError> {
        let _ = token;
        Err(RSocketError::rejected("no server state for token"))
    }

    /// Authorize a resumption given the clean (completed before disconnect)
    /// and dirty (still open) stream ids. Default: allow.
    fn can_resume(&self, clean: &[StreamId], dirty: &[StreamId], token: ResumeToken) -> bool {
        let _ = (clean, dirty, token);
        true
    }
}

/// Build a [`ServiceHandler`] from a setup closure, for servers that do not
/// retain session state.
pub fn service_handler_from_fn<F>(on_new_setup: F) -> Arc<dyn ServiceHandler>
where
    F: Fn(&SetupParameters) -> Result<Arc<dyn Responder>, RSocketError> + Send + Sync + 'static,
{
    struct FnHandler<F>(F);

    impl<F> ServiceHandler for FnHandler<F>
    where
        F: Fn(&SetupParameters) -> Result<Arc<dyn Responder>, RSocketError>
            + Send
            + Sync
            + 'static,
    {
        fn on_new_setup(
            &self,
            setup: &SetupParameters,
        ) -> Result<Arc<dyn Responder>, RSocketError> {
            (self.0)(setup)
        }
    }

    Arc::new(FnHandler(on_new_setup))
}
