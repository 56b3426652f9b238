mod lifecycle;
pub mod methods;
mod params;
mod protocol;

pub use lifecycle::{remove_socket, socket_path, SOCKET_FILE};
pub use params::{
    AttachParams, DetachParams, DiagnosticsParams, InvokeParams, ListParams, ResolveParams,
};
pub use protocol::{
    Request, RequestId, Response, RpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR, RUNTIME_ERROR,
};
