//! Health reporting for the cache's backing store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Round-trip latency above which a reachable store is reported degraded.
pub const DEGRADED_LATENCY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Reachable but slow.
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Whether cache operations are expected to succeed.
    pub fn is_serving(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

/// Result of probing one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    pub message: Option<String>,
    /// Ping round-trip in milliseconds, when the ping completed.
    pub latency_ms: Option<u64>,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl HealthCheck {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            component: component.into(),
            message: None,
            latency_ms: None,
            details: BTreeMap::new(),
        }
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            ..Self::healthy(component)
        }
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            ..Self::healthy(component)
        }
    }

    /// Classify a completed ping by its round-trip time.
    pub fn from_latency(component: impl Into<String>, elapsed: Duration) -> Self {
        let check = if elapsed > DEGRADED_LATENCY {
            Self::degraded(
                component,
                format!(
                    "store round-trip {}ms exceeds {}ms",
                    elapsed.as_millis(),
                    DEGRADED_LATENCY.as_millis()
                ),
            )
        } else {
            Self::healthy(component)
        };
        check.with_latency(elapsed)
    }

    pub fn with_latency(mut self, elapsed: Duration) -> Self {
        self.latency_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
