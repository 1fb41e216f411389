/**
 * MODELS - Records du message log et vues dérivées
 *
 * RÔLE :
 * Types partagés par tout le kernel : records bruts du message log
 * (INSTANCE, FORGET, POST), vues prêtes à l'affichage et totaux de ressources.
 *
 * FONCTIONNEMENT :
 * - LogRecord garde le `content` en JSON brut : le log est éventuellement
 *   incohérent, on lit chaque section de manière tolérante
 * - Un champ manquant ou mal typé donne `None` / vide, jamais une erreur
 * - Seul un batch qui n'est pas une liste de records est rejeté (ParseError)
 */

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Marqueur affiché quand l'adresse d'une instance n'a pas pu être résolue
pub const UNAVAILABLE: &str = "Unavailable";

/// Type de post utilisé pour publier une clé SSH publique
pub const SSH_POST_TYPE: &str = "ALEPH-SSH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordKind {
    Instance,
    Forget,
    Post,
    /// STORE, AGGREGATE, PROGRAM... présents dans le log mais ignorés ici
    #[serde(other)]
    Other,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Instance => "INSTANCE",
            RecordKind::Forget => "FORGET",
            RecordKind::Post => "POST",
            RecordKind::Other => "OTHER",
        }
    }
}

/// Message tel que retourné par le message log.
/// Seuls `type` et `item_hash` sont obligatoires ; les autres champs
/// mal typés prennent leur valeur par défaut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub item_hash: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub confirmed: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender: Option<String>,
    #[serde(default)]
    pub content: Value,
    /// Horodatage unix (secondes, fractionnaire côté log)
    #[serde(default, deserialize_with = "lenient_time")]
    pub time: f64,
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_bool().unwrap_or(false))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// Nombre, ou chaîne numérique ("1700000000") ; 0 sinon
fn lenient_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let time = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(time.filter(|t| t.is_finite()).unwrap_or(0.0))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub vcpus: Option<u32>,
    #[serde(default, rename = "memory", alias = "memoryMB")]
    pub memory_mb: Option<u64>,
    #[serde(default, rename = "seconds", alias = "durationSeconds")]
    pub duration_seconds: Option<u64>,
}

/// Vue typée du contenu d'un record INSTANCE
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceContent {
    pub metadata: Option<InstanceMetadata>,
    pub resources: Option<Resources>,
    /// Date de création (unix secondes)
    pub time: f64,
}

impl LogRecord {
    pub fn is_instance(&self) -> bool {
        self.kind == RecordKind::Instance
    }

    /// Contenu INSTANCE lu section par section : une section illisible vaut `None`
    pub fn instance_content(&self) -> InstanceContent {
        InstanceContent {
            metadata: section(&self.content, "metadata"),
            resources: section(&self.content, "resources"),
            time: self
                .content
                .get("time")
                .and_then(Value::as_f64)
                .unwrap_or(self.time),
        }
    }

    /// Hashes ciblés par un FORGET (vide si absent ou mal formé)
    pub fn forget_hashes(&self) -> Vec<&str> {
        if self.kind != RecordKind::Forget {
            return Vec::new();
        }
        self.content
            .get("hashes")
            .and_then(Value::as_array)
            .map(|hashes| hashes.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Clé SSH publiée via un POST `ALEPH-SSH`
    pub fn ssh_key(&self) -> Option<SshKey> {
        if self.kind != RecordKind::Post {
            return None;
        }
        if self.content.get("type").and_then(Value::as_str) != Some(SSH_POST_TYPE) {
            return None;
        }
        let inner = self.content.get("content")?;
        let key = inner.get("key").and_then(Value::as_str)?.trim();
        if key.is_empty() {
            return None;
        }
        let label = inner
            .get("label")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .unwrap_or("Unnamed Key");

        Some(SshKey {
            item_hash: self.item_hash.clone(),
            key: key.to_string(),
            label: label.to_string(),
            time: self.time,
        })
    }
}

fn section<T: DeserializeOwned>(content: &Value, key: &str) -> Option<T> {
    let raw = content.get(key)?;
    if raw.is_null() {
        return None;
    }
    serde_json::from_value(raw.clone()).ok()
}

/// Erreurs de contrat : l'entrée n'a même pas la forme d'un batch
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("expected a list of messages, got {0}")]
    NotAList(&'static str),
    #[error("message #{0} is not an object")]
    NotARecord(usize),
}

/// Parse un batch brut : soit une liste, soit `{ "messages": [...] }`.
/// Les records sans `type` ou `item_hash` sont ignorés avec un warning.
pub fn parse_batch(value: &Value) -> Result<Vec<LogRecord>, ParseError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("messages") {
            Some(Value::Array(items)) => items,
            _ => return Err(ParseError::NotAList("object without messages")),
        },
        Value::Null => return Err(ParseError::NotAList("null")),
        Value::Bool(_) => return Err(ParseError::NotAList("bool")),
        Value::Number(_) => return Err(ParseError::NotAList("number")),
        Value::String(_) => return Err(ParseError::NotAList("string")),
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        if !item.is_object() {
            return Err(ParseError::NotARecord(index));
        }
        match serde_json::from_value::<LogRecord>(item.clone()) {
            Ok(record) => records.push(record),
            Err(e) => warn!(index, error = %e, "skipping unreadable log record"),
        }
    }
    Ok(records)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Running,
    Pending,
}

impl NodeStatus {
    pub fn from_confirmed(confirmed: bool) -> Self {
        if confirmed {
            NodeStatus::Running
        } else {
            NodeStatus::Pending
        }
    }

    /// Classe CSS de la pastille de statut
    pub fn css_class(&self) -> &'static str {
        match self {
            NodeStatus::Running => "status-running",
            NodeStatus::Pending => "status-pending",
        }
    }
}

/// Instance enrichie, prête pour le rendu d'une carte
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeViewModel {
    pub id: String,
    pub name: Option<String>,
    pub address: String,
    pub status: NodeStatus,
    pub uptime_text: String,
}

impl NodeViewModel {
    /// Libellé affiché : le nom si présent, sinon l'id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub total_cores: u64,
    pub total_memory_mb: u64,
    pub total_cost: u64,
    /// Instances ignorées faute de ressources lisibles
    pub skipped_instances: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TotalsDisplay {
    pub cpu: String,
    pub memory: String,
    pub cost: String,
}

impl ResourceTotals {
    pub fn display(&self) -> TotalsDisplay {
        TotalsDisplay {
            cpu: format!("{} vCPUs", self.total_cores),
            memory: format!("{:.2} GB", self.total_memory_mb as f64 / 1024.0),
            cost: format!("{:.2} K ALEPH", self.total_cost as f64 / 1000.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SshKey {
    pub item_hash: String,
    pub key: String,
    pub label: String,
    pub time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> LogRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_instance_content_reads_sections() {
        let rec = record(json!({
            "type": "INSTANCE",
            "item_hash": "abc",
            "confirmed": true,
            "time": 1700000000.5,
            "content": {
                "metadata": {"name": "web-1"},
                "resources": {"vcpus": 2, "memory": 4096, "seconds": 3600},
                "time": 1699999999.0
            }
        }));
        let content = rec.instance_content();
        assert_eq!(content.metadata.unwrap().name.as_deref(), Some("web-1"));
        let res = content.resources.unwrap();
        assert_eq!(res.vcpus, Some(2));
        assert_eq!(res.memory_mb, Some(4096));
        assert_eq!(res.duration_seconds, Some(3600));
        assert_eq!(content.time, 1699999999.0);
    }

    #[test]
    fn test_malformed_resources_become_none() {
        let rec = record(json!({
            "type": "INSTANCE",
            "item_hash": "abc",
            "time": 42.0,
            "content": {"resources": {"vcpus": "two"}, "metadata": null}
        }));
        let content = rec.instance_content();
        assert!(content.resources.is_none());
        assert!(content.metadata.is_none());
        // pas de time dans le contenu : on retombe sur celui du message
        assert_eq!(content.time, 42.0);
    }

    #[test]
    fn test_forget_hashes_default_to_empty() {
        let forget = record(json!({"type": "FORGET", "item_hash": "f1", "content": {"reason": "x"}}));
        assert!(forget.forget_hashes().is_empty());

        let forget = record(json!({"type": "FORGET", "item_hash": "f2", "content": {"hashes": ["a", 3, "b"]}}));
        assert_eq!(forget.forget_hashes(), vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_kind_is_other() {
        let rec = record(json!({"type": "STORE", "item_hash": "s1"}));
        assert_eq!(rec.kind, RecordKind::Other);
    }

    #[test]
    fn test_ssh_key_extraction() {
        let post = record(json!({
            "type": "POST",
            "item_hash": "p1",
            "time": 10.0,
            "content": {"type": "ALEPH-SSH", "content": {"key": "ssh-ed25519 AAAA test", "label": ""}}
        }));
        let key = post.ssh_key().unwrap();
        assert_eq!(key.label, "Unnamed Key");
        assert_eq!(key.key, "ssh-ed25519 AAAA test");

        let other_post = record(json!({
            "type": "POST",
            "item_hash": "p2",
            "content": {"type": "blog", "content": {"key": "x"}}
        }));
        assert!(other_post.ssh_key().is_none());
    }

    #[test]
    fn test_parse_batch_shapes() {
        let batch = json!({"messages": [
            {"type": "INSTANCE", "item_hash": "a"},
            {"type": "INSTANCE"},
        ]});
        let records = parse_batch(&batch).unwrap();
        assert_eq!(records.len(), 1);

        assert_eq!(parse_batch(&json!("nope")), Err(ParseError::NotAList("string")));
        assert_eq!(parse_batch(&json!([1])), Err(ParseError::NotARecord(0)));
        assert!(parse_batch(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn test_totals_display() {
        let totals = ResourceTotals {
            total_cores: 3,
            total_memory_mb: 6144,
            total_cost: 6000,
            skipped_instances: 0,
        };
        let display = totals.display();
        assert_eq!(display.cpu, "3 vCPUs");
        assert_eq!(display.memory, "6.00 GB");
        assert_eq!(display.cost, "6.00 K ALEPH");
    }
}
