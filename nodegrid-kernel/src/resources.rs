//! Resource aggregation and tier pricing
//!
//! Costs come from a fixed tier table. An instance is billed only when its
//! `(vcpus, memory)` matches a tier exactly; anything else contributes 0.

use crate::models::{LogRecord, ResourceTotals, Resources};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Pricing bucket (ALEPH held per instance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub cores: u32,
    #[serde(alias = "ram")]
    pub ram_gb: u64,
    pub cost: u64,
}

pub fn default_tiers() -> Vec<Tier> {
    vec![
        Tier { cores: 1, ram_gb: 2, cost: 2000 },
        Tier { cores: 2, ram_gb: 4, cost: 4000 },
        Tier { cores: 4, ram_gb: 8, cost: 8000 },
        Tier { cores: 6, ram_gb: 12, cost: 12000 },
        Tier { cores: 8, ram_gb: 16, cost: 16000 },
        Tier { cores: 12, ram_gb: 24, cost: 24000 },
    ]
}

/// Cost of one instance, exact tier match only
pub fn node_cost(resources: &Resources, tiers: &[Tier]) -> u64 {
    let (Some(vcpus), Some(memory_mb)) = (resources.vcpus, resources.memory_mb) else {
        return 0;
    };
    tiers
        .iter()
        .find(|tier| tier.cores == vcpus && tier.ram_gb.checked_mul(1024) == Some(memory_mb))
        .map(|tier| tier.cost)
        .unwrap_or(0)
}

/// Sum cores, memory and cost over the valid instances.
/// Instances without readable `vcpus` and `memory` are skipped and logged.
pub fn aggregate(valid_instances: &[LogRecord], tiers: &[Tier]) -> ResourceTotals {
    valid_instances
        .iter()
        .fold(ResourceTotals::default(), |mut totals, record| {
            match record.instance_content().resources {
                Some(res @ Resources { vcpus: Some(vcpus), memory_mb: Some(memory_mb), .. }) => {
                    totals.total_cores = totals.total_cores.saturating_add(u64::from(vcpus));
                    totals.total_memory_mb = totals.total_memory_mb.saturating_add(memory_mb);
                    totals.total_cost = totals.total_cost.saturating_add(node_cost(&res, tiers));
                }
                other => {
                    warn!(instance = %record.item_hash, resources = ?other, "invalid instance resources");
                    totals.skipped_instances += 1;
                }
            }
            totals
        })
}

/// One bar of the "available compute" chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeTier {
    pub cores: u32,
    pub ram_gb: u64,
    pub cost: u64,
    pub label: String,
    /// How many instances of this tier the balance could hold
    pub available: u64,
    /// Tier fits within the cores already running
    pub within_usage: bool,
}

pub fn available_compute(balance: f64, total_cores: u64, tiers: &[Tier]) -> Vec<ComputeTier> {
    tiers
        .iter()
        .map(|tier| {
            let available = if tier.cost == 0 || !balance.is_finite() || balance <= 0.0 {
                0
            } else {
                (balance / tier.cost as f64).floor() as u64
            };
            ComputeTier {
                cores: tier.cores,
                ram_gb: tier.ram_gb,
                cost: tier.cost,
                label: format!("{} cores / {}GB RAM", tier.cores, tier.ram_gb),
                available,
                within_usage: u64::from(tier.cores) <= total_cores,
            }
        })
        .collect()
}

/// Power dial fill, capped at 100%
pub fn power_percentage(balance: f64, full_scale: f64) -> f64 {
    if full_scale <= 0.0 || !balance.is_finite() || balance <= 0.0 {
        return 0.0;
    }
    (balance / full_scale * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(hash: &str, resources: serde_json::Value) -> LogRecord {
        serde_json::from_value(json!({
            "type": "INSTANCE",
            "item_hash": hash,
            "content": {"resources": resources}
        }))
        .unwrap()
    }

    #[test]
    fn test_exact_tier_match() {
        let tiers = default_tiers();
        let two_four = Resources { vcpus: Some(2), memory_mb: Some(4096), duration_seconds: None };
        assert_eq!(node_cost(&two_four, &tiers), 4000);

        let three_four = Resources { vcpus: Some(3), memory_mb: Some(4096), duration_seconds: None };
        assert_eq!(node_cost(&three_four, &tiers), 0);

        // 4000 MB n'est pas 4 GB : pas de facturation partielle
        let odd_memory = Resources { vcpus: Some(2), memory_mb: Some(4000), duration_seconds: None };
        assert_eq!(node_cost(&odd_memory, &tiers), 0);
    }

    #[test]
    fn test_aggregate_sums_and_skips_invalid() {
        let tiers = default_tiers();
        let batch = vec![
            instance("a", json!({"vcpus": 2, "memory": 4096})),
            instance("b", json!({"vcpus": 1, "memory": 2048})),
            instance("c", json!({"vcpus": 4})),
            instance("d", json!(null)),
            instance("e", json!({"vcpus": 3, "memory": 4096})),
        ];
        let totals = aggregate(&batch, &tiers);
        assert_eq!(totals.total_cores, 6);
        assert_eq!(totals.total_memory_mb, 10240);
        assert_eq!(totals.total_cost, 6000);
        assert_eq!(totals.skipped_instances, 2);
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let tiers = default_tiers();
        let mut batch = vec![
            instance("a", json!({"vcpus": 2, "memory": 4096})),
            instance("b", json!({"vcpus": 1, "memory": 2048})),
            instance("c", json!({"vcpus": 8, "memory": 16384})),
            instance("d", json!({"memory": 1024})),
        ];
        let reference = aggregate(&batch, &tiers);
        for _ in 0..batch.len() {
            batch.rotate_left(1);
            assert_eq!(aggregate(&batch, &tiers), reference);
        }
        batch.reverse();
        assert_eq!(aggregate(&batch, &tiers), reference);
    }

    #[test]
    fn test_available_compute() {
        let tiers = default_tiers();
        let compute = available_compute(9000.0, 2, &tiers);
        assert_eq!(compute[0].available, 4);
        assert_eq!(compute[1].available, 2);
        assert_eq!(compute[2].available, 1);
        assert_eq!(compute[3].available, 0);
        assert!(compute[0].within_usage);
        assert!(compute[1].within_usage);
        assert!(!compute[2].within_usage);
        assert_eq!(compute[1].label, "2 cores / 4GB RAM");
    }

    #[test]
    fn test_power_percentage_is_capped() {
        assert_eq!(power_percentage(100000.0, 200000.0), 50.0);
        assert_eq!(power_percentage(500000.0, 200000.0), 100.0);
        assert_eq!(power_percentage(-5.0, 200000.0), 0.0);
    }

    #[test]
    fn test_tier_accepts_ram_alias() {
        let tier: Tier = serde_json::from_value(json!({"cores": 2, "ram": 4, "cost": 4000})).unwrap();
        assert_eq!(tier, Tier { cores: 2, ram_gb: 4, cost: 4000 });
    }

    #[test]
    fn test_aggregate_saturates_on_huge_values() {
        let batch = vec![
            instance("a", json!({"vcpus": u32::MAX, "memory": u64::MAX})),
            instance("b", json!({"vcpus": 1, "memory": u64::MAX - 1})),
            instance("c", json!({"vcpus": 2, "memory": 4096})),
        ];
        let totals = aggregate(&batch, &default_tiers());
        assert_eq!(totals.total_memory_mb, u64::MAX);
        assert_eq!(totals.total_cores, u64::from(u32::MAX) + 3);
        assert_eq!(totals.total_cost, 4000);
    }
}
