/**
 * VIEW MODEL - Enrichissement d'une instance valide pour l'affichage
 *
 * RÔLE :
 * Transforme un record INSTANCE en NodeViewModel : adresse résolue,
 * uptime lisible, nom d'affichage et statut.
 *
 * FONCTIONNEMENT :
 * - l'adresse vient d'un lookup externe injecté (AddressResolver)
 * - un lookup en échec ou vide donne "Unavailable", jamais une erreur
 * - l'uptime est calculé depuis `content.time` par rapport à `now`
 */

use crate::models::{LogRecord, NodeStatus, NodeViewModel, UNAVAILABLE};
use crate::resolver::ResolveError;
use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::warn;

/// Lookup de l'adresse réseau d'une instance à partir de son id
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, instance_id: &str) -> Result<Option<String>, ResolveError>;
}

/// Format "1d 1h 1m 1s" : une unité n'apparaît qu'à partir de la première
/// unité non nulle, les secondes sont toujours présentes.
pub fn format_uptime(total_seconds: u64) -> String {
    let days = total_seconds / 86_400;
    let hours = (total_seconds / 3_600) % 24;
    let minutes = (total_seconds / 60) % 60;
    let seconds = total_seconds % 60;

    let mut uptime = String::new();
    if days > 0 {
        uptime.push_str(&format!("{days}d "));
    }
    if hours > 0 || days > 0 {
        uptime.push_str(&format!("{hours}h "));
    }
    if minutes > 0 || hours > 0 || days > 0 {
        uptime.push_str(&format!("{minutes}m "));
    }
    uptime.push_str(&format!("{seconds}s"));
    uptime
}

/// Secondes écoulées depuis `created_unix` (négatif ramené à 0)
pub fn uptime_seconds(created_unix: f64, now: OffsetDateTime) -> u64 {
    let now_ms = now.unix_timestamp_nanos() / 1_000_000;
    let created_ms = (created_unix * 1000.0) as i128;
    let elapsed_ms = (now_ms - created_ms).max(0);
    (elapsed_ms / 1000) as u64
}

async fn resolve_address(resolver: &dyn AddressResolver, instance_id: &str) -> String {
    match resolver.resolve(instance_id).await {
        Ok(Some(address)) if !address.trim().is_empty() => address,
        Ok(_) => UNAVAILABLE.to_string(),
        Err(e) => {
            warn!(instance = %instance_id, error = %e, "address lookup failed");
            UNAVAILABLE.to_string()
        }
    }
}

pub async fn build_view_model(
    record: &LogRecord,
    resolver: &dyn AddressResolver,
    now: OffsetDateTime,
) -> NodeViewModel {
    let content = record.instance_content();
    let address = resolve_address(resolver, &record.item_hash).await;

    NodeViewModel {
        id: record.item_hash.clone(),
        name: content
            .metadata
            .and_then(|metadata| metadata.name)
            .filter(|name| !name.is_empty()),
        address,
        status: NodeStatus::from_confirmed(record.confirmed),
        uptime_text: format_uptime(uptime_seconds(content.time, now)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct MapResolver {
        known: HashMap<&'static str, Option<&'static str>>,
    }

    #[async_trait]
    impl AddressResolver for MapResolver {
        async fn resolve(&self, instance_id: &str) -> Result<Option<String>, ResolveError> {
            match self.known.get(instance_id) {
                Some(found) => Ok(found.map(str::to_string)),
                None => Err(ResolveError::Status(404)),
            }
        }
    }

    fn resolver() -> MapResolver {
        MapResolver {
            known: HashMap::from([
                ("up", Some("2001:db8::1")),
                ("blank", Some("")),
                ("none", None),
            ]),
        }
    }

    fn instance(hash: &str, confirmed: bool, content: serde_json::Value) -> LogRecord {
        serde_json::from_value(json!({
            "type": "INSTANCE",
            "item_hash": hash,
            "confirmed": confirmed,
            "content": content,
        }))
        .unwrap()
    }

    #[test]
    fn test_format_uptime_cases() {
        assert_eq!(format_uptime(0), "0s");
        assert_eq!(format_uptime(5), "5s");
        assert_eq!(format_uptime(45), "45s");
        assert_eq!(format_uptime(61), "1m 1s");
        assert_eq!(format_uptime(65), "1m 5s");
        assert_eq!(format_uptime(3600), "1h 0m 0s");
        assert_eq!(format_uptime(3665), "1h 1m 5s");
        assert_eq!(format_uptime(90061), "1d 1h 1m 1s");
        assert_eq!(format_uptime(90065), "1d 1h 1m 5s");
        assert_eq!(format_uptime(86400), "1d 0h 0m 0s");
    }

    #[test]
    fn test_uptime_seconds_clamps_future() {
        let now = OffsetDateTime::from_unix_timestamp(1_000).unwrap();
        assert_eq!(uptime_seconds(935.0, now), 65);
        assert_eq!(uptime_seconds(934.4, now), 65);
        assert_eq!(uptime_seconds(2_000.0, now), 0);
    }

    #[tokio::test]
    async fn test_build_view_model() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_003_665).unwrap();
        let rec = instance(
            "up",
            true,
            json!({"metadata": {"name": "gala"}, "time": 1_700_000_000.0}),
        );
        let vm = build_view_model(&rec, &resolver(), now).await;
        assert_eq!(vm.id, "up");
        assert_eq!(vm.name.as_deref(), Some("gala"));
        assert_eq!(vm.address, "2001:db8::1");
        assert_eq!(vm.status, NodeStatus::Running);
        assert_eq!(vm.uptime_text, "1h 1m 5s");
    }

    #[tokio::test]
    async fn test_lookup_failures_become_unavailable() {
        let now = OffsetDateTime::from_unix_timestamp(100).unwrap();
        for id in ["blank", "none", "unknown"] {
            let rec = instance(id, false, json!({"time": 95.0}));
            let vm = build_view_model(&rec, &resolver(), now).await;
            assert_eq!(vm.address, UNAVAILABLE, "{id}");
            assert_eq!(vm.status, NodeStatus::Pending);
            assert_eq!(vm.name, None);
            assert_eq!(vm.display_name(), id);
            assert_eq!(vm.uptime_text, "5s");
        }
    }
}
