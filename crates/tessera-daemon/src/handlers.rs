//! Method handlers for the control socket

use crate::lifecycle;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tessera_core::{Domain, ErrorKind, Runtime};
use tessera_protocol::{
    methods, AttachParams, DetachParams, DiagnosticsParams, InvokeParams, ListParams, Request,
    RequestId, ResolveParams, Response, METHOD_NOT_FOUND,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Everything a connection handler needs
pub struct DaemonContext {
    pub runtime: Arc<Runtime>,
    pub root: PathBuf,
    pub socket: PathBuf,
    pub shutdown_tx: broadcast::Sender<()>,
}

fn parse_params<T: DeserializeOwned>(req: &Request) -> Result<T, Response> {
    let params = if req.params.is_null() {
        json!({})
    } else {
        req.params.clone()
    };
    serde_json::from_value(params).map_err(|e| {
        Response::failure(
            req.id.clone(),
            ErrorKind::Validation,
            format!("invalid params for '{}': {}", req.method, e),
        )
    })
}

fn to_response(id: Option<RequestId>, value: impl serde::Serialize) -> Response {
    match serde_json::to_value(value) {
        Ok(v) => Response::success(id, v),
        Err(e) => {
            error!("Failed to encode result: {}", e);
            Response::failure(id, ErrorKind::Internal, "failed to encode result")
        }
    }
}

pub async fn handle_request(req: Request, ctx: &DaemonContext) -> Response {
    debug!(method = %req.method, "Handling request");
    let result = match req.method.as_str() {
        methods::PING => Ok(Response::success(req.id.clone(), "pong")),
        methods::STATUS => Ok(handle_status(&req, ctx)),
        methods::INVOKE => handle_invoke(&req, ctx).await,
        methods::LIST => handle_list(&req, ctx),
        methods::DIAGNOSTICS => handle_diagnostics(&req, ctx),
        methods::DIAGNOSTICS_RESOLVE => handle_resolve(&req, ctx),
        methods::RELOAD => Ok(handle_reload(&req, ctx).await),
        methods::ATTACH => handle_attach(&req, ctx),
        methods::DETACH => handle_detach(&req, ctx),
        methods::SHUTDOWN => {
            info!("Shutdown requested over the control socket");
            Ok(Response::success(req.id.clone(), json!({ "stopping": true })))
        }
        _ => Ok(Response::error(
            req.id.clone(),
            METHOD_NOT_FOUND,
            format!("Unknown method: {}", req.method),
        )),
    };
    result.unwrap_or_else(|response| response)
}

fn handle_status(req: &Request, ctx: &DaemonContext) -> Response {
    let mut status = match serde_json::to_value(ctx.runtime.status()) {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to encode status: {}", e);
            return Response::failure(req.id.clone(), ErrorKind::Internal, "failed to encode status");
        }
    };
    if let Value::Object(map) = &mut status {
        map.insert("pid".into(), json!(std::process::id()));
        map.insert("socket".into(), json!(ctx.socket));
        map.insert(
            "client".into(),
            json!(lifecycle::current_client(&ctx.root).map(|c| c.pid)),
        );
    }
    Response::success(req.id.clone(), status)
}

async fn handle_invoke(req: &Request, ctx: &DaemonContext) -> Result<Response, Response> {
    let params: InvokeParams = parse_params(req)?;
    Ok(match ctx.runtime.invoke(&params.name, params.arguments).await {
        Ok(value) => Response::success(req.id.clone(), value),
        Err(e) => {
            debug!(name = %params.name, error = %e, "Invocation failed");
            Response::failure(req.id.clone(), e.kind(), e.to_string())
        }
    })
}

fn handle_list(req: &Request, ctx: &DaemonContext) -> Result<Response, Response> {
    let params: ListParams = parse_params(req)?;
    let domain = match params.domain.as_deref() {
        None => Domain::Functions,
        Some(name) => name.parse::<Domain>().map_err(|e| {
            Response::failure(req.id.clone(), ErrorKind::Validation, e.to_string())
        })?,
    };
    Ok(to_response(req.id.clone(), ctx.runtime.list(domain)))
}

fn handle_diagnostics(req: &Request, ctx: &DaemonContext) -> Result<Response, Response> {
    let params: DiagnosticsParams = parse_params(req)?;
    let page = ctx
        .runtime
        .diagnostics(params.limit, params.offset, params.include_resolved);
    Ok(to_response(req.id.clone(), page))
}

fn handle_resolve(req: &Request, ctx: &DaemonContext) -> Result<Response, Response> {
    let params: ResolveParams = parse_params(req)?;
    let resolved = ctx
        .runtime
        .resolve_diagnostics(params.code.as_deref(), params.file.as_deref());
    Ok(Response::success(req.id.clone(), json!({ "resolved": resolved })))
}

async fn handle_reload(req: &Request, ctx: &DaemonContext) -> Response {
    match ctx.runtime.reload().await {
        Ok(summary) => to_response(req.id.clone(), summary),
        Err(e) => {
            error!("Reload failed: {}", e);
            Response::failure(req.id.clone(), e.kind(), e.to_string())
        }
    }
}

fn handle_attach(req: &Request, ctx: &DaemonContext) -> Result<Response, Response> {
    let params: AttachParams = parse_params(req)?;
    Ok(match lifecycle::acquire_client_slot(&ctx.root, params.pid) {
        Ok(client) => to_response(req.id.clone(), client),
        Err(e) => Response::failure(req.id.clone(), e.kind(), e.to_string()),
    })
}

fn handle_detach(req: &Request, ctx: &DaemonContext) -> Result<Response, Response> {
    let params: DetachParams = parse_params(req)?;
    Ok(match lifecycle::release_client_slot(&ctx.root, params.pid) {
        Ok(released) => Response::success(req.id.clone(), json!({ "released": released })),
        Err(e) => Response::failure(req.id.clone(), e.kind(), e.to_string()),
    })
}
