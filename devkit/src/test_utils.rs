/*!
Test Harness pour le kernel NodeGrid

Regroupe un MockMessageLog, le chargeur de fixtures et des expectations
sur les messages soumis (INSTANCE / FORGET / POST).
*/

use crate::log_stub::MockMessageLog;
use crate::record_helpers::FixtureLoader;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub struct TestHarness {
    pub log: MockMessageLog,
    pub fixtures: FixtureLoader,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    kind: String,
    expected_count: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok();

        Self {
            log: MockMessageLog::new(),
            fixtures: FixtureLoader::bundled(),
            expectations: Vec::new(),
        }
    }

    /// Pré-remplit le log avec une fixture embarquée
    pub fn with_fixture(self, name: &str) -> Result<Self> {
        let records = self.fixtures.load(name)?;
        self.log.seed(records);
        Ok(self)
    }

    /// On s'attend à exactement `count` soumissions de type `kind`
    pub fn expect_submissions(&mut self, kind: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            kind: kind.to_string(),
            expected_count: count,
        });
        self
    }

    /// Attend qu'au moins `count` soumissions de type `kind` soient arrivées
    pub async fn wait_for_submissions(&self, kind: &str, count: usize, timeout_ms: u64) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.log.submissions_of(kind).len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        log::warn!("Timeout waiting for {} {} submissions", count, kind);
        false
    }

    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual = self.log.submissions_of(&expectation.kind).len();
            if actual != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for {}: expected {} submissions, got {}",
                    expectation.kind,
                    expectation.expected_count,
                    actual
                );
            }
        }
        log::info!("All {} expectations verified", self.expectations.len());
        Ok(())
    }

    /// Assert qu'un champ (chemin `a.b.0.c`) de la dernière soumission vaut `expected`
    pub fn assert_field_equals(&self, kind: &str, field_path: &str, expected: &Value) -> Result<()> {
        let Some(last) = self.log.submissions_of(kind).pop() else {
            anyhow::bail!("No {} submission recorded", kind);
        };
        match get_nested_field(&last.content, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!(
                "Field '{}' mismatch: expected {:?}, got {:?}",
                field_path,
                expected,
                actual
            ),
            None => anyhow::bail!("Field '{}' not found in last {} submission", field_path, kind),
        }
    }

    pub fn get_stats(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for submission in self.log.submissions() {
            *counts.entry(submission.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn reset(&mut self) {
        self.log.clear();
        self.expectations.clear();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Object(obj) => obj.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
