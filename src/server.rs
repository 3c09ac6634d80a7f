//! Tokio-based server accepting transports for the setup/resume acceptor.

use std::{io, net::SocketAddr, sync::Arc};

use log::{debug, info};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

use crate::{
    acceptor,
    handler::ServiceHandler,
    transport::{MemListener, TcpConnection},
};

/// Accept loop feeding transports to the protocol acceptor.
///
/// Dropping the server stops accepting; established connections keep
/// running until they close on their own.
pub struct RSocketServer {
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
}

impl RSocketServer {
    /// Bind a TCP listener and serve connections with `handler`.
    ///
    /// # Errors
    ///
    /// Propagates bind errors from the socket layer.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        handler: Arc<dyn ServiceHandler>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("listening on {local_addr}");
        let shutdown = CancellationToken::new();
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("accepted transport from {peer}");
                            let _ = stream.set_nodelay(true);
                            tokio::spawn(acceptor::accept_connection(
                                Box::new(TcpConnection::from_stream(stream)),
                                Arc::clone(&handler),
                            ));
                        }
                        Err(error) => {
                            debug!("accept failed: {error}");
                        }
                    },
                }
            }
        });
        Ok(Self {
            local_addr: Some(local_addr),
            shutdown,
        })
    }

    /// Serve connections arriving through an in-memory listener.
    #[must_use]
    pub fn serve_mem(mut listener: MemListener, handler: Arc<dyn ServiceHandler>) -> Self {
        let shutdown = CancellationToken::new();
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Some(connection) => {
                            tokio::spawn(acceptor::accept_connection(
                                Box::new(connection),
                                Arc::clone(&handler),
                            ));
                        }
                        None => break,
                    },
                }
            }
        });
        Self {
            local_addr: None,
            shutdown,
        }
    }

    /// The bound address, when serving TCP.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.local_addr }

    /// Stop accepting new transports.
    pub fn shutdown(&self) { self.shutdown.cancel(); }
}

impl Drop for RSocketServer {
    fn drop(&mut self) { self.shutdown.cancel(); }
}
