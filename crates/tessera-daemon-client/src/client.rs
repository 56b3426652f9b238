//! Socket client for the daemon control plane

use crate::error::{ClientError, Result};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_core::{DiagnosticPage, Listing, ReloadSummary};
use tessera_protocol::{
    methods, socket_path, DiagnosticsParams, InvokeParams, ListParams, Request, ResolveParams,
    Response,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::debug;

pub struct DaemonClient {
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    next_id: AtomicU64,
}

impl DaemonClient {
    /// Connect to the daemon serving `root`
    pub async fn connect(root: &Path) -> Result<Self> {
        Self::connect_to(&socket_path(root)).await
    }

    /// Connect to a daemon at a specific socket path
    pub async fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| ClientError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        let (read, write) = stream.into_split();

        Ok(Self {
            reader: Mutex::new(BufReader::new(read)),
            writer: Mutex::new(write),
            next_id: AtomicU64::new(1),
        })
    }

    /// Send one request and wait for its response
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = Request::new(id, method, params).to_json_line()?;

        // hold the reader across the write so responses pair with requests
        let mut reader = self.reader.lock().await;
        {
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await?;
        }

        let mut buf = String::new();
        if reader.read_line(&mut buf).await? == 0 {
            return Err(ClientError::Closed);
        }
        let response: Response = serde_json::from_str(&buf)?;
        debug!(method, id, ok = response.error.is_none(), "Daemon replied");
        response.into_result().map_err(ClientError::Rpc)
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        Ok(serde_json::from_value(self.call(method, params).await?)?)
    }

    pub async fn ping(&self) -> Result<String> {
        let result = self.call(methods::PING, json!({})).await?;
        Ok(result.as_str().unwrap_or("").to_string())
    }

    /// Runtime status plus daemon pid, socket and attached client
    pub async fn status(&self) -> Result<Value> {
        self.call(methods::STATUS, json!({})).await
    }

    pub async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<Value> {
        let params = InvokeParams {
            name: name.to_string(),
            arguments,
        };
        self.call(methods::INVOKE, serde_json::to_value(params)?).await
    }

    pub async fn list(&self, domain: Option<&str>) -> Result<Listing> {
        let params = ListParams {
            domain: domain.map(str::to_string),
        };
        self.call_as(methods::LIST, serde_json::to_value(params)?).await
    }

    pub async fn diagnostics(&self, params: DiagnosticsParams) -> Result<DiagnosticPage> {
        self.call_as(methods::DIAGNOSTICS, serde_json::to_value(params)?)
            .await
    }

    /// Returns how many diagnostics were marked resolved
    pub async fn resolve(&self, params: ResolveParams) -> Result<u64> {
        let result = self
            .call(methods::DIAGNOSTICS_RESOLVE, serde_json::to_value(params)?)
            .await?;
        Ok(result["resolved"].as_u64().unwrap_or(0))
    }

    pub async fn reload(&self) -> Result<ReloadSummary> {
        self.call_as(methods::RELOAD, json!({})).await
    }

    /// Claim the single client slot for `pid`
    pub async fn attach(&self, pid: u32) -> Result<Value> {
        self.call(methods::ATTACH, json!({ "pid": pid })).await
    }

    /// Release the client slot; true when a slot was held
    pub async fn detach(&self, pid: Option<u32>) -> Result<bool> {
        let params = match pid {
            Some(pid) => json!({ "pid": pid }),
            None => json!({}),
        };
        let result = self.call(methods::DETACH, params).await?;
        Ok(result["released"].as_bool().unwrap_or(false))
    }

    /// Request daemon shutdown
    pub async fn shutdown(&self) -> Result<()> {
        self.call(methods::SHUTDOWN, json!({})).await?;
        Ok(())
    }
}
