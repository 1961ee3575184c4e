//! Traffic statistics synchronization
//!
//! The privileged tunnel process periodically writes a raw statistics record
//! into the shared store. [`StatsSynchronizer::refresh`] reads it, normalizes
//! the heterogeneous field encodings, and overwrites the single composed
//! connection-update record the application polls. Refresh is idempotent and
//! never fails the caller: both the cross-process stats signal and an explicit
//! poll may trigger it redundantly.

use crate::store::{
    SharedStore, CONNECTION_UPDATE_KEY, LEGACY_BYTES_IN_KEY, LEGACY_BYTES_OUT_KEY,
    LEGACY_CONNECTED_DATE_KEY, LEGACY_PACKETS_IN_KEY, LEGACY_PACKETS_OUT_KEY, VPN_STATISTICS_KEY,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct StatsSynchronizer {
    store: Arc<dyn SharedStore>,
}

impl StatsSynchronizer {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Rebuild the composed connection-update record for a group.
    ///
    /// Best effort: an absent group namespace means no record is written at
    /// all, and a missing structured record falls back to the legacy scalar
    /// keys with a "now" timestamp. Speed fields are always written as zero;
    /// throughput self-reported across the process boundary is not trusted,
    /// the consumer derives speeds from successive byte-count deltas.
    pub async fn refresh(&self, group: &str) {
        if !self.store.contains_group(group).await {
            debug!("Shared store group {} not present, skipping stats refresh", group);
            return;
        }

        let update = match self.store.get(group, VPN_STATISTICS_KEY).await {
            Some(Value::Object(record)) => {
                let connected_on = record
                    .get("connected_on")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(now_timestamp);
                compose_update(
                    &connected_on,
                    &counter_string(record.get("packets_in")),
                    &counter_string(record.get("packets_out")),
                    &counter_string(record.get("byte_in")),
                    &counter_string(record.get("byte_out")),
                )
            }
            _ => {
                // Legacy scalar keys written by older tunnel builds
                let connected_on = self
                    .store
                    .get(group, LEGACY_CONNECTED_DATE_KEY)
                    .await
                    .as_ref()
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(now_timestamp);
                let packets_in = counter_string(self.store.get(group, LEGACY_PACKETS_IN_KEY).await.as_ref());
                let packets_out = counter_string(self.store.get(group, LEGACY_PACKETS_OUT_KEY).await.as_ref());
                let bytes_in = counter_string(self.store.get(group, LEGACY_BYTES_IN_KEY).await.as_ref());
                let bytes_out = counter_string(self.store.get(group, LEGACY_BYTES_OUT_KEY).await.as_ref());
                debug!("Structured stats record absent for {}, using legacy keys", group);
                compose_update(&connected_on, &packets_in, &packets_out, &bytes_in, &bytes_out)
            }
        };

        debug!("Composed connection update for {}: {}", group, update);
        self.store
            .set(group, CONNECTION_UPDATE_KEY, Value::String(update))
            .await;
    }
}

/// Normalize a counter that the source may encode as an integer or a string
fn counter_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|v| v.to_string())
            .unwrap_or_else(|| n.to_string()),
        Some(Value::String(s)) => s.clone(),
        _ => "0".to_string(),
    }
}

fn compose_update(
    connected_on: &str,
    packets_in: &str,
    packets_out: &str,
    bytes_in: &str,
    bytes_out: &str,
) -> String {
    let speed_in: f64 = 0.0;
    let speed_out: f64 = 0.0;
    format!(
        "{}_{}_{}_{}_{}_{:.2}_{:.2}",
        connected_on, packets_in, packets_out, bytes_in, bytes_out, speed_in, speed_out
    )
}

fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}
