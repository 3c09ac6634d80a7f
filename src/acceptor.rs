//! Server-side setup/resume acceptor.
//!
//! Each freshly accepted transport sits in a transient first-frame state:
//! SETUP births a new connection, RESUME routes to a retained session, and
//! anything else is turned away with `INVALID_SETUP`.

use std::{sync::Arc, time::Duration};

use log::{debug, info};
use tokio::sync::mpsc;

use crate::{
    connection::{Connection, NoopConnectionEvents},
    error::ErrorCode,
    frame::{Frame, FrameCodec, StreamId},
    handler::ServiceHandler,
    registry::ConnectionMode,
    session::ServerState,
    setup::{ResumeParameters, ResumeToken, SetupParameters},
    transport::{BoxDuplexConnection, BoxFrameSink, BoxFrameSource, SplitConnection},
};

/// Drive one accepted transport through the first-frame handshake.
pub(crate) async fn accept_connection(
    transport: BoxDuplexConnection,
    handler: Arc<dyn ServiceHandler>,
) {
    let framed = transport.is_framed();
    let (sink, mut source) = transport.split();
    let first = match source.next_frame().await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            debug!("transport closed before its first frame");
            return;
        }
        Err(error) => {
            debug!("transport failed before its first frame: {error}");
            return;
        }
    };

    let Some(codec) = FrameCodec::autodetect(&first) else {
        reject(
            sink,
            FrameCodec::latest(),
            ErrorCode::InvalidSetup,
            "cannot detect protocol version",
        )
        .await;
        return;
    };

    match codec.decode(first) {
        Ok(Frame::Setup {
            version,
            keepalive_time_ms,
            max_lifetime_ms,
            token,
            metadata_mime,
            data_mime,
            payload,
            ..
        }) => {
            let params = SetupParameters {
                version,
                resumable: token.is_some(),
                token: token.unwrap_or_else(|| ResumeToken::from_bytes([0; 16])),
                keepalive_time: Duration::from_millis(u64::from(keepalive_time_ms)),
                max_lifetime: Duration::from_millis(u64::from(max_lifetime_ms)),
                metadata_mime,
                data_mime,
                payload,
            };
            accept_setup(sink, source, framed, codec, params, handler).await;
        }
        Ok(Frame::Resume {
            version,
            token,
            last_received_server_position,
            first_available_client_position,
        }) => {
            let params = ResumeParameters {
                version,
                token,
                last_received_server_position,
                first_available_client_position,
            };
            accept_resume(sink, source, framed, codec, params, handler).await;
        }
        Ok(other) => {
            reject(
                sink,
                codec,
                ErrorCode::InvalidSetup,
                format!("first frame must be SETUP or RESUME, not {}", other.frame_type()),
            )
            .await;
        }
        Err(error) => {
            reject(
                sink,
                codec,
                ErrorCode::InvalidSetup,
                format!("invalid first frame: {error}"),
            )
            .await;
        }
    }
}

async fn accept_setup(
    sink: BoxFrameSink,
    source: BoxFrameSource,
    framed: bool,
    codec: FrameCodec,
    params: SetupParameters,
    handler: Arc<dyn ServiceHandler>,
) {
    let responder = match handler.on_new_setup(&params) {
        Ok(responder) => responder,
        Err(error) => {
            reject(sink, codec, ErrorCode::RejectedSetup, error.message).await;
            return;
        }
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut connection = Connection::new(
        ConnectionMode::Server,
        responder,
        events_tx.clone(),
        Arc::new(NoopConnectionEvents),
    );
    connection.connect_server(
        Box::new(SplitConnection::new(sink, source, framed)),
        codec,
        &params,
    );
    tokio::spawn(connection.run(events_rx));

    if params.resumable {
        info!("accepted resumable session under token {}", params.token);
        let state = Arc::new(ServerState::new(events_tx, true, params.token));
        handler.on_new_rsocket_state(state, params.token);
    }
}

async fn accept_resume(
    sink: BoxFrameSink,
    source: BoxFrameSource,
    framed: bool,
    codec: FrameCodec,
    params: ResumeParameters,
    handler: Arc<dyn ServiceHandler>,
) {
    let state = match handler.on_resume(params.token) {
        Ok(state) => state,
        Err(error) => {
            reject(sink, codec, ErrorCode::RejectedResume, error.message).await;
            return;
        }
    };
    if !state.is_resumable() {
        reject(
            sink,
            codec,
            ErrorCode::RejectedResume,
            "session is not resumable",
        )
        .await;
        return;
    }
    info!("resuming session under token {}", params.token);
    let transport = Box::new(SplitConnection::new(sink, source, framed));
    if !state.resume(transport, params, Arc::clone(&handler)).await {
        debug!("resume handshake rejected by the session");
    }
}

/// Send one ERROR frame on a transport being turned away, then drop it.
async fn reject(
    mut sink: BoxFrameSink,
    codec: FrameCodec,
    code: ErrorCode,
    message: impl Into<String>,
) {
    let message = message.into();
    debug!("rejecting transport with {code}: {message}");
    let frame = Frame::error(StreamId::CONNECTION, code, message);
    let _ = sink.send(codec.encode(&frame)).await;
}
