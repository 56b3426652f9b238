//! Control-plane method names

pub const PING: &str = "ping";
pub const STATUS: &str = "status";
pub const INVOKE: &str = "invoke";
pub const LIST: &str = "list";
pub const DIAGNOSTICS: &str = "diagnostics";
pub const DIAGNOSTICS_RESOLVE: &str = "diagnostics.resolve";
pub const RELOAD: &str = "reload";
pub const ATTACH: &str = "attach";
pub const DETACH: &str = "detach";
pub const SHUTDOWN: &str = "shutdown";

pub const ALL: &[&str] = &[
    PING,
    STATUS,
    INVOKE,
    LIST,
    DIAGNOSTICS,
    DIAGNOSTICS_RESOLVE,
    RELOAD,
    ATTACH,
    DETACH,
    SHUTDOWN,
];
