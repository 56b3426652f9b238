//! Configuration sections, one per component

pub mod auto_reload;
pub mod databases;
pub mod execution;
pub mod runtime;
pub mod transport;

pub use auto_reload::*;
pub use databases::*;
pub use execution::*;
pub use runtime::*;
pub use transport::*;
