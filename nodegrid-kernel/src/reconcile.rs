/**
 * RECONCILE - Ensemble courant des instances valides
 *
 * RÔLE :
 * Le message log est append-only : une instance supprimée reste dans le log,
 * c'est un record FORGET qui la désactive. Ce module dérive la liste des
 * instances encore vivantes à partir d'un batch brut.
 *
 * FONCTIONNEMENT :
 * - union des `hashes` de tous les FORGET du batch (ensemble, pas compteur)
 * - garde les INSTANCE dont l'item_hash n'est pas dans l'union
 * - ordre relatif des INSTANCE conservé, aucune I/O, aucune erreur
 *
 * Un FORGET est définitif : aucun record ultérieur ne ressuscite une instance.
 */

use crate::models::LogRecord;
use std::collections::HashSet;

/// Union de tous les hashes ciblés par les FORGET du batch
pub fn forgotten_hashes(records: &[LogRecord]) -> HashSet<&str> {
    records
        .iter()
        .flat_map(|record| record.forget_hashes())
        .collect()
}

/// Instances du batch qui n'ont pas de FORGET correspondant
pub fn filter_valid_instances(records: &[LogRecord]) -> Vec<LogRecord> {
    let forgotten = forgotten_hashes(records);
    records
        .iter()
        .filter(|record| record.is_instance())
        .filter(|record| !forgotten.contains(record.item_hash.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{parse_batch, LogRecord, RecordKind};
    use serde_json::json;

    fn instance(hash: &str) -> LogRecord {
        serde_json::from_value(json!({
            "type": "INSTANCE",
            "item_hash": hash,
            "confirmed": true,
            "content": {"resources": {"vcpus": 1, "memory": 2048}}
        }))
        .unwrap()
    }

    fn forget(hash: &str, targets: &[&str]) -> LogRecord {
        serde_json::from_value(json!({
            "type": "FORGET",
            "item_hash": hash,
            "content": {"hashes": targets, "reason": "User requested deletion"}
        }))
        .unwrap()
    }

    fn hashes(records: &[LogRecord]) -> Vec<&str> {
        records.iter().map(|r| r.item_hash.as_str()).collect()
    }

    #[test]
    fn test_empty_batch() {
        assert!(filter_valid_instances(&[]).is_empty());
    }

    #[test]
    fn test_forgotten_instance_is_removed() {
        let batch = vec![instance("a"), instance("b"), forget("f1", &["a"])];
        let valid = filter_valid_instances(&batch);
        assert_eq!(hashes(&valid), vec!["b"]);
    }

    #[test]
    fn test_forget_before_instance_still_applies() {
        let batch = vec![forget("f1", &["a"]), instance("a"), instance("c")];
        assert_eq!(hashes(&filter_valid_instances(&batch)), vec!["c"]);
    }

    #[test]
    fn test_inert_and_duplicate_forgets() {
        let batch = vec![
            instance("a"),
            instance("b"),
            forget("f1", &["zzz"]),
            forget("f2", &["b"]),
            forget("f3", &["b", "b"]),
        ];
        assert_eq!(hashes(&filter_valid_instances(&batch)), vec!["a"]);
    }

    #[test]
    fn test_forget_without_hashes_is_inert() {
        let empty_forget: LogRecord = serde_json::from_value(json!({
            "type": "FORGET", "item_hash": "f", "content": {}
        }))
        .unwrap();
        let batch = vec![instance("a"), empty_forget];
        assert_eq!(hashes(&filter_valid_instances(&batch)), vec!["a"]);
    }

    #[test]
    fn test_non_instance_records_are_dropped() {
        let post: LogRecord = serde_json::from_value(json!({
            "type": "POST", "item_hash": "p", "content": {"type": "ALEPH-SSH"}
        }))
        .unwrap();
        let valid = filter_valid_instances(&[post, instance("a")]);
        assert_eq!(hashes(&valid), vec!["a"]);
        assert!(valid.iter().all(|r| r.kind == RecordKind::Instance));
    }

    #[test]
    fn test_output_preserves_input_order() {
        let batch = vec![instance("c"), instance("a"), forget("f", &["x"]), instance("b")];
        assert_eq!(hashes(&filter_valid_instances(&batch)), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_count_matches_forget_union_for_generated_batches() {
        // batches déterministes : 12 instances, FORGET sur un sous-ensemble variable
        for seed in 0..32u32 {
            let mut batch = Vec::new();
            let mut forgotten = HashSet::new();
            for i in 0..12u32 {
                batch.push(instance(&format!("h{i}")));
                if (seed >> (i % 5)) & 1 == 1 && i % 3 != 0 {
                    forgotten.insert(format!("h{i}"));
                    batch.push(forget(&format!("f{seed}-{i}"), &[&format!("h{i}")]));
                }
            }
            let valid = filter_valid_instances(&batch);
            assert_eq!(valid.len(), 12 - forgotten.len(), "seed {seed}");
            assert!(valid.iter().all(|r| !forgotten.contains(&r.item_hash)));
        }
    }

    #[test]
    fn test_reapplying_forgets_is_stable() {
        let forgets = vec![forget("f1", &["a"]), forget("f2", &["c"])];
        let mut batch = vec![instance("a"), instance("b"), instance("c")];
        batch.extend(forgets.clone());

        let once = filter_valid_instances(&batch);

        let mut again_input = once.clone();
        again_input.extend(forgets.clone());
        let twice = filter_valid_instances(&again_input);

        let mut third_input = twice.clone();
        third_input.extend(forgets);
        let thrice = filter_valid_instances(&third_input);

        assert_eq!(once, twice);
        assert_eq!(twice, thrice);
        assert_eq!(hashes(&once), vec!["b"]);
    }

    #[test]
    fn test_loosely_typed_forgets_still_apply() {
        let batch = parse_batch(&json!([
            {"type": "INSTANCE", "item_hash": "a", "confirmed": true, "content": {}},
            {"type": "INSTANCE", "item_hash": "b", "confirmed": "yes", "time": null, "content": {}},
            {"type": "FORGET", "item_hash": "f1", "confirmed": null, "content": {"hashes": ["a"]}},
            {"type": "FORGET", "item_hash": "f2", "time": "1700000000", "sender": 42, "content": {"hashes": ["a"]}}
        ]))
        .unwrap();
        assert_eq!(batch.len(), 4);
        assert_eq!(batch[3].time, 1700000000.0);
        assert_eq!(batch[3].sender, None);
        assert!(!batch[1].confirmed);

        assert_eq!(hashes(&filter_valid_instances(&batch)), vec!["b"]);
    }
}
