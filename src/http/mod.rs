//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, trace, request ID, timeout)
//!     → access_log.rs (record created, line written on the way out)
//!     → lookup.rs (Host + instance header → RoutePool, or 404 unknown_route)
//!     → dispatch.rs (select endpoint, report it)
//!     → Send to client
//! ```

pub mod access_log;
pub mod dispatch;
pub mod lookup;
pub mod request;
pub mod response;
pub mod server;

pub use access_log::AccessLogRecord;
pub use lookup::{BadRequestReporter, LookupState, MetricsReporter};
pub use request::X_REQUEST_ID;
pub use server::{build_router, HttpServer};
