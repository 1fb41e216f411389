/*!
Helpers pour construire des records du message log

- RecordBuilder : records INSTANCE / FORGET / POST en JSON brut
- FixtureLoader : batches JSON versionnés sous `devkit/fixtures`
*/

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// Émetteur de tous les records des fixtures embarquées
pub const FIXTURE_WALLET: &str = "0x27702a26126e0B3702af63Ee09aC4d1A084EF628";

pub struct RecordBuilder {
    record: Map<String, Value>,
    content: Map<String, Value>,
}

impl RecordBuilder {
    fn new(kind: &str, item_hash: &str) -> Self {
        let now = chrono::Utc::now().timestamp() as f64;
        let mut record = Map::new();
        record.insert("type".into(), json!(kind));
        record.insert("item_hash".into(), json!(item_hash));
        record.insert("confirmed".into(), json!(true));
        record.insert("time".into(), json!(now));
        Self { record, content: Map::new() }
    }

    pub fn instance(item_hash: &str) -> Self {
        Self::new("INSTANCE", item_hash)
    }

    pub fn forget(item_hash: &str, targets: &[&str]) -> Self {
        let mut builder = Self::new("FORGET", item_hash);
        builder.content.insert("hashes".into(), json!(targets));
        builder
    }

    /// POST `ALEPH-SSH` publiant une clé publique
    pub fn ssh_key(item_hash: &str, key: &str, label: &str) -> Self {
        let mut builder = Self::new("POST", item_hash);
        builder.content.insert("type".into(), json!("ALEPH-SSH"));
        builder
            .content
            .insert("content".into(), json!({ "key": key, "label": label }));
        builder
    }

    pub fn sender(mut self, address: &str) -> Self {
        self.record.insert("sender".into(), json!(address));
        self
    }

    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.record.insert("confirmed".into(), json!(confirmed));
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.content.insert("metadata".into(), json!({ "name": name }));
        self
    }

    pub fn resources(mut self, vcpus: u32, memory_mb: u64) -> Self {
        self.content.insert(
            "resources".into(),
            json!({ "vcpus": vcpus, "memory": memory_mb, "seconds": 3600 }),
        );
        self
    }

    /// Date de création (unix secondes) du record et de son contenu
    pub fn created_at(mut self, unix_seconds: f64) -> Self {
        self.record.insert("time".into(), json!(unix_seconds));
        self.content.insert("time".into(), json!(unix_seconds));
        self
    }

    pub fn content_field(mut self, key: &str, value: Value) -> Self {
        self.content.insert(key.into(), value);
        self
    }

    pub fn build(mut self) -> Value {
        self.record.insert("content".into(), Value::Object(self.content));
        Value::Object(self.record)
    }
}

/// Charge les batches de records depuis un répertoire de fixtures
pub struct FixtureLoader {
    dir: PathBuf,
}

impl FixtureLoader {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    /// Fixtures livrées avec la devkit
    pub fn bundled() -> Self {
        Self::new(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures"))
    }

    /// `name` sans extension ; accepte une liste ou `{ "messages": [...] }`
    pub fn load(&self, name: &str) -> Result<Vec<Value>> {
        let path = self.dir.join(format!("{name}.json"));
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing fixture {}", path.display()))?;

        let records = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("messages") {
                Some(Value::Array(items)) => items,
                _ => anyhow::bail!("fixture {name} has no messages list"),
            },
            _ => anyhow::bail!("fixture {name} is not a batch"),
        };
        log::info!("Loaded fixture {} ({} records)", name, records.len());
        Ok(records)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let instance = RecordBuilder::instance("a")
            .sender(FIXTURE_WALLET)
            .name("web-1")
            .resources(2, 4096)
            .confirmed(false)
            .build();
        assert_eq!(instance["type"], "INSTANCE");
        assert_eq!(instance["confirmed"], false);
        assert_eq!(instance["content"]["metadata"]["name"], "web-1");
        assert_eq!(instance["content"]["resources"]["memory"], 4096);

        let forget = RecordBuilder::forget("f", &["a", "b"]).build();
        assert_eq!(forget["content"]["hashes"][1], "b");

        let key = RecordBuilder::ssh_key("k", "ssh-ed25519 AAAA", "laptop").build();
        assert_eq!(key["content"]["type"], "ALEPH-SSH");
        assert_eq!(key["content"]["content"]["label"], "laptop");
    }

    #[test]
    fn test_bundled_fixtures() {
        let loader = FixtureLoader::bundled();
        let names = loader.list().unwrap();
        assert!(names.contains(&"forget_basic".to_string()));

        let basic = loader.load("forget_basic").unwrap();
        assert_eq!(basic.len(), 4);
        assert!(basic.iter().all(|r| r["sender"] == FIXTURE_WALLET));

        // format { "messages": [...] }
        assert_eq!(loader.load("forget_pair").unwrap().len(), 3);
        assert!(loader.load("missing").is_err());
    }

    #[test]
    fn test_custom_fixture_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("odd.json"), "{\"total\": 3}").unwrap();
        let loader = FixtureLoader::new(dir.path());
        assert!(loader.load("odd").is_err());
    }
}
