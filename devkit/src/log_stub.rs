/*!
Mock du message log pour tester sans réseau

Stocke des records bruts (JSON), répond aux requêtes filtrées par type et
adresse, et enregistre chaque soumission comme un nouveau record.
Latence et indisponibilité sont simulables.
*/

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Submission {
    pub sender: String,
    pub kind: String,
    pub content: Value,
    pub item_hash: String,
}

/// Mock du message log, clonable (état partagé)
#[derive(Clone, Default)]
pub struct MockMessageLog {
    records: Arc<Mutex<Vec<Value>>>,
    submissions: Arc<Mutex<Vec<Submission>>>,
    unavailable: Arc<AtomicBool>,
    latency: Arc<Mutex<Option<Duration>>>,
    counter: Arc<AtomicU64>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn sender_matches(record: &Value, addresses: &[String]) -> bool {
    if addresses.is_empty() {
        return true;
    }
    record
        .get("sender")
        .and_then(Value::as_str)
        .map(|sender| addresses.iter().any(|a| a.eq_ignore_ascii_case(sender)))
        .unwrap_or(false)
}

fn kind_matches(record: &Value, kinds: &[&str]) -> bool {
    kinds.is_empty()
        || record
            .get("type")
            .and_then(Value::as_str)
            .map(|kind| kinds.contains(&kind))
            .unwrap_or(false)
}

impl MockMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute des records au log (ordre conservé)
    pub fn seed(&self, records: Vec<Value>) {
        log::debug!("[MOCK] seeding {} records", records.len());
        locked(&self.records).extend(records);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Délai appliqué à chaque requête et soumission
    pub fn set_latency(&self, latency: Duration) {
        *locked(&self.latency) = Some(latency);
    }

    async fn simulate_network(&self) -> Result<()> {
        let latency = *locked(&self.latency);
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("message log unavailable");
        }
        Ok(())
    }

    /// Records dont le type est dans `kinds` et l'émetteur dans `addresses`
    /// (filtre vide = tout accepter)
    pub async fn query(&self, kinds: &[&str], addresses: &[String]) -> Result<Vec<Value>> {
        self.simulate_network().await?;
        let matching: Vec<Value> = locked(&self.records)
            .iter()
            .filter(|record| kind_matches(record, kinds) && sender_matches(record, addresses))
            .cloned()
            .collect();
        log::debug!("[MOCK] query {:?} -> {} records", kinds, matching.len());
        Ok(matching)
    }

    /// Enregistre la soumission et l'ajoute au log comme record non confirmé
    pub async fn submit(&self, sender: &str, kind: &str, content: Value) -> Result<String> {
        self.simulate_network().await?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let item_hash = format!("mock-{}-{}", kind.to_lowercase(), n);
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;

        locked(&self.records).push(json!({
            "type": kind,
            "item_hash": item_hash,
            "sender": sender,
            "confirmed": false,
            "time": now,
            "content": content,
        }));
        locked(&self.submissions).push(Submission {
            sender: sender.to_string(),
            kind: kind.to_string(),
            content,
            item_hash: item_hash.clone(),
        });

        log::info!("[MOCK] submitted {} {}", kind, item_hash);
        Ok(item_hash)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        locked(&self.submissions).clone()
    }

    pub fn submissions_of(&self, kind: &str) -> Vec<Submission> {
        locked(&self.submissions)
            .iter()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect()
    }

    pub fn record_count(&self) -> usize {
        locked(&self.records).len()
    }

    /// Reset records et soumissions
    pub fn clear(&self) {
        locked(&self.records).clear();
        locked(&self.submissions).clear();
    }
}
