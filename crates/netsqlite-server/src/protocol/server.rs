//! Accept loop and per-connection workers of the raw protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use netsqlite_types::envelope::{Request, Response};
use netsqlite_types::frame::{read_frame, write_frame, FrameError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use super::session::Session;
use crate::AppState;

/// Error sent to clients whose session is interrupted by shutdown.
pub const SHUTDOWN_MESSAGE: &str = "Server shutting down";

/// Serves the raw protocol on `listener` until `shutdown` flips to `true`.
///
/// On shutdown the listener stops accepting, every worker sends
/// [`SHUTDOWN_MESSAGE`] and exits, and workers still running after
/// `drain_timeout` are aborted.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
    drain_timeout: Duration,
) -> std::io::Result<()> {
    let mut workers = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        // Per-connection accept failures (e.g. EMFILE) should not
                        // take the listener down.
                        tracing::warn!(error = %e, "failed to accept raw connection");
                        continue;
                    }
                };
                tracing::info!(%peer, "accepted raw connection");
                workers.spawn(handle_connection(
                    stream,
                    peer,
                    Arc::clone(&state),
                    shutdown.clone(),
                ));
            }
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "raw connection worker panicked");
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => {
                tracing::info!("shutdown signal received, raw listener stops accepting");
                break;
            }
        }
    }
    drop(listener);

    if !workers.is_empty() {
        tracing::info!(
            active = workers.len(),
            timeout = ?drain_timeout,
            "draining raw connections"
        );
        let drained = tokio::time::timeout(drain_timeout, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "raw connection worker panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = workers.len(),
                "drain timeout reached, aborting raw connections"
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
    }

    tracing::info!("raw protocol server stopped");
    Ok(())
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let session_id = Uuid::new_v4();
    let span = tracing::info_span!("raw_session", %session_id, %peer);

    async move {
        let (mut reader, mut writer) = stream.into_split();
        let mut session = Session::new(state);

        loop {
            let request: Request = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    tracing::info!("closing session for shutdown");
                    let _ = write_frame(&mut writer, &Response::error(SHUTDOWN_MESSAGE)).await;
                    break;
                }
                frame = read_frame(&mut reader) => match frame {
                    Ok(Some(request)) => request,
                    Ok(None) => {
                        tracing::info!("client disconnected");
                        break;
                    }
                    Err(FrameError::TooLarge(len)) => {
                        tracing::warn!(len, "oversized frame, closing connection");
                        let _ = write_frame(
                            &mut writer,
                            &Response::error(format!("frame of {len} bytes exceeds limit")),
                        )
                        .await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read request, closing connection");
                        break;
                    }
                }
            };

            let response = session.handle(request).await;
            if let Err(e) = write_frame(&mut writer, &response).await {
                tracing::warn!(error = %e, "failed to send response, closing connection");
                break;
            }
        }

        session.close();
        tracing::info!("raw connection closed");
    }
    .instrument(span)
    .await
}
