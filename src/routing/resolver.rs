//! Request-time route resolution.
//!
//! Turns a Host header plus an optional instance-selector header into a pool
//! snapshot or a typed failure. Stateless: everything that crosses requests
//! lives in the route table.

use std::sync::Arc;

use crate::load_balancer::{PoolSnapshot, Selection};
use crate::routing::RouteUri;

/// Why a request could not be matched to a pool.
///
/// Every variant renders as the same `unknown_route` response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("route not found")]
    RouteNotFound,
    #[error("no endpoint matches app '{app_id}' instance '{instance_index}'")]
    InstanceNotFound {
        app_id: String,
        instance_index: String,
    },
    #[error("malformed instance header '{0}'")]
    MalformedInstanceHeader(String),
}

impl LookupError {
    /// Machine-readable marker sent back to the client.
    pub fn marker(&self) -> &'static str {
        "unknown_route"
    }
}

/// A parsed `appId:instanceIndex` selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSelector {
    pub app_id: String,
    pub instance_index: String,
}

impl From<InstanceSelector> for Selection {
    fn from(selector: InstanceSelector) -> Self {
        Selection::Instance {
            app_id: selector.app_id,
            instance_index: selector.instance_index,
        }
    }
}

/// Read access to routes, as needed by the resolver.
pub trait RouteTable: Send + Sync {
    fn lookup(&self, uri: &RouteUri) -> Result<Arc<PoolSnapshot>, LookupError>;

    fn lookup_with_instance(
        &self,
        uri: &RouteUri,
        app_id: &str,
        instance_index: &str,
    ) -> Result<Arc<PoolSnapshot>, LookupError>;
}

impl<T: RouteTable + ?Sized> RouteTable for Arc<T> {
    fn lookup(&self, uri: &RouteUri) -> Result<Arc<PoolSnapshot>, LookupError> {
        (**self).lookup(uri)
    }

    fn lookup_with_instance(
        &self,
        uri: &RouteUri,
        app_id: &str,
        instance_index: &str,
    ) -> Result<Arc<PoolSnapshot>, LookupError> {
        (**self).lookup_with_instance(uri, app_id, instance_index)
    }
}

/// Parse the instance-selector header.
///
/// No colon means the header is ignored. Exactly one colon with both sides
/// non-empty is a selector. Anything else is malformed.
pub fn parse_instance_header(value: &str) -> Result<Option<InstanceSelector>, LookupError> {
    let mut parts = value.split(':');
    let app_id = parts.next().unwrap_or_default();
    let Some(instance_index) = parts.next() else {
        return Ok(None);
    };
    if parts.next().is_some() || app_id.is_empty() || instance_index.is_empty() {
        return Err(LookupError::MalformedInstanceHeader(value.to_string()));
    }
    Ok(Some(InstanceSelector {
        app_id: app_id.to_string(),
        instance_index: instance_index.to_string(),
    }))
}

/// Resolve a request against the route table.
///
/// A malformed instance header fails before the table is consulted.
pub fn resolve<T: RouteTable + ?Sized>(
    table: &T,
    host: Option<&str>,
    path: &str,
    instance_header: Option<&str>,
) -> Result<Arc<PoolSnapshot>, LookupError> {
    let host = match host.map(str::trim) {
        Some(host) if !host.is_empty() => host,
        _ => return Err(LookupError::RouteNotFound),
    };

    let selector = match instance_header {
        Some(value) => parse_instance_header(value)?,
        None => None,
    };

    let uri = RouteUri::new(host, path);
    match selector {
        Some(selector) => table.lookup_with_instance(&uri, &selector.app_id, &selector.instance_index),
        None => table.lookup(&uri),
    }
}
