//! Registry message payloads.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer, Serialize};

use crate::bus::BusMessage;
use crate::load_balancer::Endpoint;
use crate::routing::RouteKey;

pub const REGISTER_SUBJECT: &str = "router.register";
pub const UNREGISTER_SUBJECT: &str = "router.unregister";
pub const GREET_SUBJECT: &str = "router.greet";
pub const START_SUBJECT: &str = "router.start";

#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
}

/// Body of `router.register` and `router.unregister`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RegistryMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uris: Vec<String>,
    pub address: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub instance_index: String,
    #[serde(default)]
    pub private_instance_id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub tls: bool,
    /// Seconds; caps the registry stale threshold for this endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl RegistryMessage {
    /// Every route this message names, `route` first, duplicates removed.
    pub fn routes(&self) -> Result<Vec<RouteKey>, SubscriberError> {
        let mut keys: Vec<RouteKey> = Vec::new();
        for raw in self.route.iter().chain(self.uris.iter()) {
            let key = RouteKey::parse(raw).map_err(|e| SubscriberError::InvalidRoute(e.to_string()))?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        if keys.is_empty() {
            return Err(SubscriberError::InvalidRoute("message names no route".into()));
        }
        Ok(keys)
    }

    /// `host:port` with a non-empty host and a numeric port.
    pub fn validate_address(&self) -> Result<(), SubscriberError> {
        let invalid = || SubscriberError::InvalidAddress(self.address.clone());
        let (host, port) = self.address.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(invalid());
        }
        Ok(())
    }

    pub fn endpoint(&self, now: Instant) -> Result<Endpoint, SubscriberError> {
        self.validate_address()?;
        let mut endpoint = Endpoint::new(self.address.clone(), now)
            .with_app(self.app_id.clone(), self.instance_index.clone())
            .with_private_instance_id(self.private_instance_id.clone())
            .with_tags(self.tags.clone())
            .with_tls(self.tls);
        if let Some(ttl) = self.ttl.filter(|ttl| *ttl > 0) {
            endpoint = endpoint.with_stale_threshold(Duration::from_secs(ttl));
        }
        Ok(endpoint)
    }
}

/// Instance indexes arrive as strings or as bare numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Index {
        Text(String),
        Number(u64),
    }

    Ok(match Option::<Index>::deserialize(deserializer)? {
        Some(Index::Text(s)) => s,
        Some(Index::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

/// Body of `router.start` and of replies to `router.greet`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMessage {
    pub id: String,
    pub minimum_register_interval_in_seconds: u64,
    pub prune_threshold_in_seconds: u64,
}

/// A bus message the subscriber acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Register(RegistryMessage),
    Unregister(RegistryMessage),
    Greet { reply_to: Option<String> },
}

impl RegistryEvent {
    /// Decode by subject. Subjects the subscriber does not handle yield None.
    pub fn decode(message: &BusMessage) -> Result<Option<Self>, SubscriberError> {
        let event = match message.subject.as_str() {
            REGISTER_SUBJECT => RegistryEvent::Register(serde_json::from_slice(&message.payload)?),
            UNREGISTER_SUBJECT => RegistryEvent::Unregister(serde_json::from_slice(&message.payload)?),
            GREET_SUBJECT => RegistryEvent::Greet {
                reply_to: message.reply_to.clone(),
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
