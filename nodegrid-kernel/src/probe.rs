//! Node status probe
//!
//! A node answers `GET http://[address]:{port}/status` with
//! `{ "status": "success", "details": "<text report>" }`. The text report holds
//! a few node lines followed by a workload table whose columns are separated by
//! runs of two or more spaces.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("Ping failed with status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub node_details: Vec<String>,
    pub workloads: WorkloadTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PingOutcome {
    Success(NodeReport),
    Failed { reason: String },
}

fn column_gap() -> &'static Regex {
    static COLUMN_GAP: OnceLock<Regex> = OnceLock::new();
    COLUMN_GAP.get_or_init(|| Regex::new(r"\s{2,}").expect("column gap pattern is valid"))
}

/// Split on runs of 2+ whitespace characters; single spaces stay inside a column
pub fn split_columns(line: &str) -> Vec<String> {
    column_gap()
        .split(line.trim())
        .filter(|column| !column.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lines before the `Name` header are node details, lines after it are workload rows
pub fn parse_details(details: &str) -> NodeReport {
    let mut report = NodeReport::default();
    let mut in_table = false;

    for line in details.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if !in_table && line.starts_with("Name") {
            report.workloads.header = split_columns(line);
            in_table = true;
        } else if in_table {
            report.workloads.rows.push(split_columns(line));
        } else {
            report.node_details.push(line.to_string());
        }
    }
    report
}

/// IPv6 literals are bracketed, hostnames and IPv4 are not
pub fn status_url(address: &str, port: u16) -> String {
    if address.contains(':') {
        format!("http://[{address}]:{port}/status")
    } else {
        format!("http://{address}:{port}/status")
    }
}

/// Interprets a `/status` payload
pub fn read_status(payload: &Value) -> PingOutcome {
    let success = payload.get("status").and_then(Value::as_str) == Some("success");
    match (success, payload.get("details").and_then(Value::as_str)) {
        (true, Some(details)) => PingOutcome::Success(parse_details(details)),
        (true, None) => PingOutcome::Success(NodeReport::default()),
        (false, _) => PingOutcome::Failed { reason: payload.to_string() },
    }
}

pub struct StatusProbe {
    client: reqwest::Client,
    port: u16,
}

impl StatusProbe {
    pub fn new(port: u16, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, port })
    }

    async fn fetch(&self, address: &str) -> Result<Value, ProbeError> {
        let response = self.client.get(status_url(address, self.port)).send().await?;
        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    /// Never fails: transport and payload problems become `PingOutcome::Failed`
    pub async fn ping(&self, address: &str) -> PingOutcome {
        match self.fetch(address).await {
            Ok(payload) => {
                let outcome = read_status(&payload);
                debug!(node = %address, ?outcome, "status probe answered");
                outcome
            }
            Err(e) => {
                warn!(node = %address, error = %e, "status probe failed");
                PingOutcome::Failed { reason: e.to_string() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    const DETAILS: &str = "\n\nNode ID: 7f3a\nGala Node v1.4\n\n\nName     Version  Status   CPU (cores)  Memory (bytes)  Age  Port(s)\ndrng     1.0.2    running  0.5          104857600       3d   8080\nfounders  2.1.0    running  1            209715200       3d   -\n";

    #[test]
    fn test_split_columns_keeps_single_spaces() {
        assert_eq!(
            split_columns("  Gala Node   v1.4\t\tup "),
            vec!["Gala Node", "v1.4", "up"]
        );
        assert!(split_columns("   ").is_empty());
        assert_eq!(split_columns("founders 2.1.0  running"), vec!["founders 2.1.0", "running"]);
    }

    #[test]
    fn test_parse_details_sections() {
        let report = parse_details(DETAILS);
        assert_eq!(report.node_details, vec!["Node ID: 7f3a", "Gala Node v1.4"]);
        assert_eq!(report.workloads.header.len(), 7);
        assert_eq!(report.workloads.header[3], "CPU (cores)");
        assert_eq!(report.workloads.rows.len(), 2);
        assert_eq!(report.workloads.rows[0][0], "drng");
        assert!(report.workloads.rows.iter().all(|row| row.len() == 7));
        assert_eq!(report.workloads.rows[1][0], "founders");
        assert_eq!(report.workloads.rows[1][6], "-");
    }

    #[test]
    fn test_parse_details_without_table() {
        let report = parse_details("Node ID: 1\n\nbooting");
        assert_eq!(report.node_details, vec!["Node ID: 1", "booting"]);
        assert!(report.workloads.header.is_empty());
        assert!(report.workloads.rows.is_empty());
    }

    #[test]
    fn test_status_url_brackets_ipv6() {
        assert_eq!(status_url("2001:db8::1", 8080), "http://[2001:db8::1]:8080/status");
        assert_eq!(status_url("127.0.0.1", 9000), "http://127.0.0.1:9000/status");
    }

    #[test]
    fn test_non_success_payload_is_a_failure() {
        let outcome = read_status(&json!({"status": "error", "message": "down"}));
        let PingOutcome::Failed { reason } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("down"));
    }

    async fn spawn_node(healthy: bool) -> u16 {
        let app = Router::new().route(
            "/status",
            get(move || async move {
                if healthy {
                    (StatusCode::OK, Json(json!({"status": "success", "details": DETAILS})))
                } else {
                    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_ping_healthy_node() {
        let port = spawn_node(true).await;
        let probe = StatusProbe::new(port, Duration::from_secs(5)).unwrap();
        let PingOutcome::Success(report) = probe.ping("127.0.0.1").await else {
            panic!("expected success");
        };
        assert_eq!(report.workloads.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_ping_http_error_and_unreachable() {
        let port = spawn_node(false).await;
        let probe = StatusProbe::new(port, Duration::from_secs(5)).unwrap();
        assert_eq!(
            probe.ping("127.0.0.1").await,
            PingOutcome::Failed { reason: "Ping failed with status 503".into() }
        );

        // port 9 (discard) n'écoute pas en local
        let closed = StatusProbe::new(9, Duration::from_secs(2)).unwrap();
        assert!(matches!(closed.ping("127.0.0.1").await, PingOutcome::Failed { .. }));
    }
}
