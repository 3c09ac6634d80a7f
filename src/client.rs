//! Client embedding: connect, request, disconnect, resume.

use std::{io, sync::Arc};

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{
    connection::{Connection, ConnectionEvents, Event, NoopConnectionEvents, PayloadStream},
    error::{RSocketError, ResumeError, StreamError},
    handler::{NoopResponder, Responder},
    payload::Payload,
    registry::ConnectionMode,
    setup::{SetupParameters, MAX_MIME_LEN},
    transport::ConnectionFactory,
};

/// Error establishing or addressing a client connection.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport could not be opened.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The setup parameters were invalid.
    #[error("invalid setup: {0}")]
    Setup(String),
    /// The connection has already closed.
    #[error("connection closed")]
    Closed,
}

/// A connected client: the requester API plus disconnect/resume control.
///
/// Cloneable; all clones address the same connection. Dropping the last
/// clone closes the connection, as does an explicit
/// [`close`](Self::close).
#[derive(Clone)]
pub struct RSocketClient {
    events: crate::connection::EventSender,
    factory: Arc<dyn ConnectionFactory>,
    resumable: bool,
    _close_on_drop: Arc<CloseOnDrop>,
}

/// Posts the terminal close when the last client handle goes away.
struct CloseOnDrop {
    events: crate::connection::EventSender,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Close {
            reason: "client dropped".to_owned(),
        });
    }
}

impl RSocketClient {
    /// Dial through `factory` and establish a session with `params`.
    ///
    /// The factory is retained so [`resume`](Self::resume) can dial again
    /// after a transport failure.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or invalid setup parameters.
    pub async fn connect(
        factory: Arc<dyn ConnectionFactory>,
        params: SetupParameters,
    ) -> Result<Self, ClientError> {
        Self::connect_with(factory, params, Arc::new(NoopResponder), Arc::new(NoopConnectionEvents))
            .await
    }

    /// [`connect`](Self::connect) with an explicit responder for
    /// server-initiated interactions and lifecycle hooks.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or invalid setup parameters.
    pub async fn connect_with(
        factory: Arc<dyn ConnectionFactory>,
        params: SetupParameters,
        responder: Arc<dyn Responder>,
        hooks: Arc<dyn ConnectionEvents>,
    ) -> Result<Self, ClientError> {
        if params.metadata_mime.len() > MAX_MIME_LEN || params.data_mime.len() > MAX_MIME_LEN {
            return Err(ClientError::Setup("mime type exceeds 255 bytes".to_owned()));
        }
        let transport = factory.connect().await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut connection =
            Connection::new(ConnectionMode::Client, responder, events_tx.clone(), hooks);
        connection
            .connect_client_send_setup(transport, &params)
            .map_err(|error| ClientError::Setup(error.to_string()))?;
        tokio::spawn(connection.run(events_rx));
        Ok(Self {
            events: events_tx.clone(),
            factory,
            resumable: params.resumable,
            _close_on_drop: Arc::new(CloseOnDrop { events: events_tx }),
        })
    }

    /// Send a payload with no response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] once the connection is gone.
    pub fn fire_and_forget(&self, payload: Payload) -> Result<(), ClientError> {
        self.events
            .send(Event::Fnf { payload })
            .map_err(|_| ClientError::Closed)
    }

    /// Send a request and await its single response payload.
    ///
    /// # Errors
    ///
    /// Resolves to the stream-terminal error when the responder rejects or
    /// the connection fails.
    pub async fn request_response(&self, payload: Payload) -> Result<Payload, StreamError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(Event::Request { payload, reply })
            .map_err(|_| StreamError::ConnectionClosed("connection closed".to_owned()))?;
        response
            .await
            .map_err(|_| StreamError::ConnectionClosed("connection closed".to_owned()))?
    }

    /// Open a requested stream.
    ///
    /// Nothing is sent until the first [`PayloadStream::request_n`], whose
    /// value seeds the stream's initial credit.
    #[must_use]
    pub fn request_stream(&self, payload: Payload) -> PayloadStream {
        let (stream, sink, control) = PayloadStream::channel();
        if self
            .events
            .send(Event::OpenStream {
                payload,
                sink: sink.clone(),
                control,
            })
            .is_err()
        {
            let _ = sink.send(Err(StreamError::ConnectionClosed(
                "connection closed".to_owned(),
            )));
        }
        stream
    }

    /// Open a channel fed by `source`; returns the inbound direction.
    ///
    /// The REQUEST_CHANNEL frame carries the source's first payload and
    /// goes out once downstream credit exists.
    #[must_use]
    pub fn request_channel<S>(&self, source: S) -> PayloadStream
    where
        S: Stream<Item = Result<Payload, RSocketError>> + Send + 'static,
    {
        let (stream, sink, control) = PayloadStream::channel();
        if self
            .events
            .send(Event::OpenChannel {
                source: Box::pin(source),
                sink: sink.clone(),
                control,
            })
            .is_err()
        {
            let _ = sink.send(Err(StreamError::ConnectionClosed(
                "connection closed".to_owned(),
            )));
        }
        stream
    }

    /// Push connection-scoped metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] once the connection is gone.
    pub fn metadata_push(&self, metadata: Bytes) -> Result<(), ClientError> {
        self.events
            .send(Event::MetadataPush { metadata })
            .map_err(|_| ClientError::Closed)
    }

    /// Detach the transport. Streams survive when the session is resumable;
    /// resolves once the connection has processed the detach.
    pub async fn disconnect(&self, reason: impl Into<String>) {
        let (done, ack) = oneshot::channel();
        if self
            .events
            .send(Event::Disconnect {
                reason: reason.into(),
                done,
            })
            .is_ok()
        {
            let _ = ack.await;
        }
    }

    /// Warm-resume the session onto a freshly dialed transport.
    ///
    /// # Errors
    ///
    /// Yields [`ResumeError`] when the session is not resumable, the
    /// transport cannot be dialed, or the server turns the handshake down.
    /// A failed resumption leaves the connection closed; open a fresh
    /// client to continue.
    pub async fn resume(&self) -> Result<(), ResumeError> {
        if !self.resumable {
            return Err(ResumeError::NotResumable);
        }
        let transport = self.factory.connect().await?;
        let (reply, result) = oneshot::channel();
        self.events
            .send(Event::Resume { transport, reply })
            .map_err(|_| ResumeError::Connection("connection closed".to_owned()))?;
        result
            .await
            .map_err(|_| ResumeError::Connection("connection closed".to_owned()))?
    }

    /// Terminally close the connection.
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.events.send(Event::Close {
            reason: reason.into(),
        });
    }
}
