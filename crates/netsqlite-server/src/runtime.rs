//! Wiring of both listeners, shared state and graceful shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use netsqlite_db::{DbError, PoolManager};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::auth::TokenValidator;
use crate::config::Config;
use crate::{app, protocol, AppState};

/// Fatal errors while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The data directory could not be prepared.
    #[error("database setup failed: {0}")]
    Db(#[from] DbError),

    /// A listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A listener failed while serving.
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bound but not yet running listeners. Binding separately lets callers
/// (and tests using port 0) learn the actual addresses before serving.
pub struct Listeners {
    pub rpc: TcpListener,
    pub raw: Option<TcpListener>,
}

impl Listeners {
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let rpc_addr = config.server.rpc_addr();
        let rpc = TcpListener::bind(rpc_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: rpc_addr,
                source,
            })?;

        let raw = if config.server.raw_enabled {
            let raw_addr = config.server.raw_addr();
            Some(
                TcpListener::bind(raw_addr)
                    .await
                    .map_err(|source| ServerError::Bind {
                        addr: raw_addr,
                        source,
                    })?,
            )
        } else {
            None
        };

        Ok(Self { rpc, raw })
    }

    pub fn rpc_addr(&self) -> std::io::Result<SocketAddr> {
        self.rpc.local_addr()
    }

    pub fn raw_addr(&self) -> Option<std::io::Result<SocketAddr>> {
        self.raw.as_ref().map(TcpListener::local_addr)
    }
}

/// Builds the shared state from configuration.
pub fn build_state(config: &Config) -> Result<AppState, ServerError> {
    let manager = PoolManager::new(
        &config.database.data_dir,
        config.database.runtime_settings(),
    )?;
    let validator = TokenValidator::new(config.auth.tokens.iter().cloned());
    if validator.is_empty() {
        tracing::warn!("no auth tokens configured, every call will be rejected");
    }
    Ok(AppState {
        manager: Arc::new(manager),
        validator: Arc::new(validator),
    })
}

/// Serves both transports until `shutdown` resolves, then drains.
///
/// In-flight RPC calls and raw sessions get `shutdown.grace_period_secs`
/// to finish; whatever is still running afterwards is dropped. All pools are
/// closed before returning.
pub async fn run(
    config: &Config,
    listeners: Listeners,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), ServerError> {
    let grace = config.shutdown.grace_period();
    let manager = Arc::clone(&state.manager);
    let state = Arc::new(state);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tracing::info!(addr = %listeners.rpc_addr()?, "starting rpc listener");
    let mut rpc_shutdown = shutdown_rx.clone();
    let router = app(AppState::clone(&state));
    let mut rpc_task = tokio::spawn(async move {
        axum::serve(listeners.rpc, router)
            .with_graceful_shutdown(async move {
                let _ = rpc_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    let raw_task = listeners.raw.map(|listener| {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "starting raw protocol listener");
        }
        tokio::spawn(protocol::serve(
            listener,
            Arc::clone(&state),
            shutdown_rx.clone(),
            grace,
        ))
    });

    let early_exit = tokio::select! {
        () = shutdown => None,
        finished = &mut rpc_task => Some(finished),
    };
    let _ = shutdown_tx.send(true);

    let rpc_result = match early_exit {
        Some(finished) => finished,
        None => match tokio::time::timeout(grace, &mut rpc_task).await {
            Ok(finished) => finished,
            Err(_) => {
                tracing::warn!(timeout = ?grace, "rpc drain timed out, aborting in-flight calls");
                rpc_task.abort();
                Ok(Ok(()))
            }
        },
    };

    if let Some(raw_task) = raw_task {
        match raw_task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "raw protocol server failed"),
            Err(e) => tracing::error!(error = %e, "raw protocol task panicked"),
            Ok(Ok(())) => {}
        }
    }

    manager.close_all();

    match rpc_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServerError::Io(e)),
        Err(e) => {
            tracing::error!(error = %e, "rpc server task panicked");
            Ok(())
        }
    }
}
