//! Heartbeat-driven HTTP route registry.

pub mod admin;
pub mod bus;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod registry;
pub mod routing;
pub mod subscriber;

pub use config::schema::RouterConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use registry::RouteRegistry;
