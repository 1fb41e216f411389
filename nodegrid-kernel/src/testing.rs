//! Test doubles shared by the kernel's unit tests.

use crate::configure::{ConfigureError, ExecutionResult, RemoteExecutor, RemoteTarget};
use crate::log_client::{ForgetDraft, InstanceDraft, LogError, MessageLog, MessageQuery, PostDraft};
use crate::models::{parse_batch, LogRecord, RecordKind};
use crate::resolver::ResolveError;
use crate::view_model::AddressResolver;
use async_trait::async_trait;
use nodegrid_devkit::MockMessageLog;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;

fn rejected(e: anyhow::Error) -> LogError {
    LogError::Rejected(e.to_string())
}

fn to_content<T: serde::Serialize>(draft: &T) -> Result<Value, LogError> {
    serde_json::to_value(draft).map_err(|e| LogError::Rejected(e.to_string()))
}

#[async_trait]
impl MessageLog for MockMessageLog {
    async fn get_messages(&self, query: &MessageQuery) -> Result<Vec<LogRecord>, LogError> {
        let kinds: Vec<&str> = query.kinds.iter().map(RecordKind::as_str).collect();
        let raw = self.query(&kinds, &query.addresses).await.map_err(rejected)?;
        Ok(parse_batch(&Value::Array(raw))?)
    }

    async fn create_instance(&self, sender: &str, draft: &InstanceDraft) -> Result<String, LogError> {
        self.submit(sender, "INSTANCE", to_content(draft)?).await.map_err(rejected)
    }

    async fn forget(&self, sender: &str, draft: &ForgetDraft) -> Result<String, LogError> {
        self.submit(sender, "FORGET", to_content(draft)?).await.map_err(rejected)
    }

    async fn create_post(&self, sender: &str, draft: &PostDraft) -> Result<String, LogError> {
        let content = json!({
            "type": draft.post_type,
            "content": draft.content,
            "channel": draft.channel,
        });
        self.submit(sender, "POST", content).await.map_err(rejected)
    }
}

/// Adresses connues d'avance ; un id inconnu n'a pas d'allocation
pub struct StaticResolver {
    known: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            known: entries
                .iter()
                .map(|(id, address)| (id.to_string(), address.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, instance_id: &str) -> Result<Option<String>, ResolveError> {
        Ok(self.known.get(instance_id).cloned())
    }
}

#[derive(Default)]
pub struct RecordingExecutor {
    runs: Mutex<Vec<(RemoteTarget, String)>>,
}

impl RecordingExecutor {
    pub fn runs(&self) -> Vec<(RemoteTarget, String)> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn run(&self, target: &RemoteTarget, script: &str) -> Result<ExecutionResult, ConfigureError> {
        self.runs.lock().push((target.clone(), script.to_string()));
        Ok(ExecutionResult {
            success: true,
            output: "configured".into(),
            error: None,
            exit_code: Some(0),
            execution_time_ms: 0,
        })
    }
}
