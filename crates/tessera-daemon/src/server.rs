//! Unix socket server for the line-delimited JSON-RPC control plane

use crate::handlers::{handle_request, DaemonContext};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::TopologyError;
use tessera_protocol::{methods, remove_socket, Request, Response, PARSE_ERROR};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Daemon server that listens on a Unix socket
pub struct Server {
    listener: UnixListener,
    ctx: Arc<DaemonContext>,
}

/// Connection tasks still open after the accept loop ends
pub struct Connections {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Connections {
    /// Stop idle readers and wait for in-progress requests to answer
    pub async fn close(self, grace: Duration) {
        self.tracker.close();
        self.cancel.cancel();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(open = self.tracker.len(), "Connections still open at shutdown");
        }
    }
}

impl Server {
    /// Bind the control socket, replacing a leftover socket file
    ///
    /// A socket that still accepts connections belongs to a live daemon and
    /// is never unlinked.
    pub async fn bind(
        path: &Path,
        root: &Path,
        runtime: Arc<tessera_core::Runtime>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> std::result::Result<Self, TopologyError> {
        let bind_error = |source| TopologyError::Bind {
            path: path.to_path_buf(),
            source,
        };
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Err(bind_error(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "socket is accepting connections",
            )));
        }
        remove_socket(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(bind_error)?;
        }
        let listener = UnixListener::bind(path).map_err(bind_error)?;
        info!("Daemon listening on {:?}", path);

        Ok(Self {
            listener,
            ctx: Arc::new(DaemonContext {
                runtime,
                root: root.to_path_buf(),
                socket: path.to_path_buf(),
                shutdown_tx,
            }),
        })
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.ctx.socket
    }

    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.ctx.shutdown_tx.clone()
    }

    /// Accept connections until a shutdown signal arrives
    pub async fn run(self) -> Result<Connections> {
        let mut shutdown_rx = self.ctx.shutdown_tx.subscribe();
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Daemon stopped accepting connections");
                    break;
                }
                accept = self.listener.accept() => {
                    match accept {
                        Ok((stream, _)) => {
                            let ctx = self.ctx.clone();
                            let cancel = cancel.clone();
                            tracker.spawn(async move {
                                if let Err(e) = handle_client(stream, ctx, cancel).await {
                                    debug!("Client connection ended: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }

        Ok(Connections { tracker, cancel })
    }
}

async fn handle_client(
    stream: UnixStream,
    ctx: Arc<DaemonContext>,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        // Only an idle reader is interrupted; a request in progress still answers
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            n = reader.read_line(&mut line) => n?,
        };
        if n == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let (response, stop) = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                let stop = req.method == methods::SHUTDOWN;
                (handle_request(req, &ctx).await, stop)
            }
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                (
                    Response::error(None, PARSE_ERROR, format!("Parse error: {}", e)),
                    false,
                )
            }
        };

        writer.write_all(response.to_json_line()?.as_bytes()).await?;
        writer.flush().await?;

        if stop {
            let _ = ctx.shutdown_tx.send(());
            break;
        }
    }

    Ok(())
}
