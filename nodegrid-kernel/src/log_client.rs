/**
 * LOG CLIENT - Contrat du message log externe
 *
 * RÔLE :
 * Le message log (append-only) stocke les records INSTANCE / FORGET / POST
 * par adresse propriétaire. Le kernel ne l'implémente pas : il dépend
 * seulement de ce contrat de lecture/écriture (trait MessageLog).
 *
 * FONCTIONNEMENT (HttpMessageLog) :
 * - lecture : GET {api}/api/v0/messages.json?msgTypes=...&addresses=...
 *   page par page (500 messages) jusqu'à une page incomplète ou au total annoncé
 * - écriture : le message brouillon est transmis au wallet bridge externe
 *   qui le signe et le soumet ; il renvoie l'item_hash créé
 */

use crate::models::{parse_batch, LogRecord, ParseError, RecordKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Taille de page demandée au message log
pub const PAGE_SIZE: usize = 500;
const MAX_PAGES: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("message log request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("message log returned HTTP {0}")]
    Status(u16),
    #[error("message log returned a malformed batch: {0}")]
    Malformed(#[from] ParseError),
    #[error("message rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub kinds: Vec<RecordKind>,
    pub addresses: Vec<String>,
}

impl MessageQuery {
    pub fn new(kinds: &[RecordKind], address: &str) -> Self {
        Self {
            kinds: kinds.to_vec(),
            addresses: vec![address.to_string()],
        }
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&record.kind);
        let address_ok = self.addresses.is_empty()
            || record
                .sender
                .as_deref()
                .map(|sender| self.addresses.iter().any(|a| a.eq_ignore_ascii_case(sender)))
                .unwrap_or(false);
        kind_ok && address_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftResources {
    pub vcpus: u32,
    pub memory: u64,
    pub seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payment {
    pub chain: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Payment {
    pub fn hold_eth() -> Self {
        Self { chain: "ETH".into(), kind: "hold".into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceDraft {
    pub authorized_keys: Vec<String>,
    pub resources: DraftResources,
    pub payment: Payment,
    pub channel: String,
    pub metadata: Value,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForgetDraft {
    pub hashes: Vec<String>,
    pub reason: String,
    pub channel: String,
}

/// `post_type` devient `content.type` du record publié, `content` son `content.content`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostDraft {
    pub post_type: String,
    pub content: Value,
    pub channel: String,
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn get_messages(&self, query: &MessageQuery) -> Result<Vec<LogRecord>, LogError>;

    async fn create_instance(&self, sender: &str, draft: &InstanceDraft) -> Result<String, LogError>;

    async fn forget(&self, sender: &str, draft: &ForgetDraft) -> Result<String, LogError>;

    async fn create_post(&self, sender: &str, draft: &PostDraft) -> Result<String, LogError>;
}

#[derive(Debug, Serialize)]
struct Submission<'a, T: Serialize> {
    sender: &'a str,
    #[serde(rename = "type")]
    kind: RecordKind,
    content: &'a T,
}

#[derive(Debug, Deserialize)]
struct SubmissionReceipt {
    item_hash: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpMessageLog {
    client: reqwest::Client,
    api_url: String,
    bridge_url: String,
}

impl HttpMessageLog {
    pub fn new(api_url: &str, bridge_url: &str, timeout: Duration) -> Result<Self, LogError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bridge_url: bridge_url.trim_end_matches('/').to_string(),
        })
    }

    fn query_params(query: &MessageQuery, page: usize) -> Vec<(&'static str, String)> {
        let kinds: Vec<&str> = query.kinds.iter().map(RecordKind::as_str).collect();
        vec![
            ("msgTypes", kinds.join(",")),
            ("addresses", query.addresses.join(",")),
            ("pagination", PAGE_SIZE.to_string()),
            ("page", page.to_string()),
        ]
    }

    async fn fetch_page(&self, query: &MessageQuery, page: usize) -> Result<Value, LogError> {
        let response = self
            .client
            .get(format!("{}/api/v0/messages.json", self.api_url))
            .query(&Self::query_params(query, page))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LogError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn submit<T: Serialize + Sync>(
        &self,
        sender: &str,
        kind: RecordKind,
        content: &T,
    ) -> Result<String, LogError> {
        let response = self
            .client
            .post(format!("{}/submit", self.bridge_url))
            .json(&Submission { sender, kind, content })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LogError::Status(response.status().as_u16()));
        }
        let receipt: SubmissionReceipt = response.json().await?;
        match receipt.item_hash {
            Some(hash) if !hash.is_empty() => {
                debug!(kind = kind.as_str(), item_hash = %hash, "message submitted");
                Ok(hash)
            }
            _ => Err(LogError::Rejected(
                receipt.error.unwrap_or_else(|| "no item_hash in receipt".to_string()),
            )),
        }
    }
}

fn raw_len(body: &Value) -> usize {
    match body {
        Value::Array(items) => items.len(),
        other => other
            .get("messages")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
    }
}

#[async_trait]
impl MessageLog for HttpMessageLog {
    async fn get_messages(&self, query: &MessageQuery) -> Result<Vec<LogRecord>, LogError> {
        let mut records = Vec::new();
        let mut seen = 0usize;

        for page in 1..=MAX_PAGES {
            let body = self.fetch_page(query, page).await?;
            records.extend(parse_batch(&body)?);

            // compte brut : les records ignorés par parse_batch occupent aussi la page
            let page_len = raw_len(&body);
            seen += page_len;
            let exhausted = body
                .get("pagination_total")
                .and_then(Value::as_u64)
                .is_some_and(|total| seen as u64 >= total);
            if page_len < PAGE_SIZE || exhausted {
                debug!(pages = page, records = records.len(), "message log read");
                return Ok(records);
            }
        }

        warn!(pages = MAX_PAGES, "message log paging stopped at page limit");
        Ok(records)
    }

    async fn create_instance(&self, sender: &str, draft: &InstanceDraft) -> Result<String, LogError> {
        self.submit(sender, RecordKind::Instance, draft).await
    }

    async fn forget(&self, sender: &str, draft: &ForgetDraft) -> Result<String, LogError> {
        self.submit(sender, RecordKind::Forget, draft).await
    }

    async fn create_post(&self, sender: &str, draft: &PostDraft) -> Result<String, LogError> {
        self.submit(sender, RecordKind::Post, draft).await
    }
}
