use crate::log_client::DraftResources;
use crate::resources::{default_tiers, Tier};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GridConfig {
    pub server: ServerConf,
    pub log: LogConf,
    pub scheduler: SchedulerConf,
    pub probe: ProbeConf,
    pub ssh: SshConf,
    pub dashboard: DashboardConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConf {
    pub port: u16,
    pub public_dir: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConf {
    pub api_url: String,
    /// Signataire externe qui signe et soumet les messages brouillons
    pub bridge_url: String,
    pub channel: String,
    pub image: String,
    pub resources: DraftResources,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConf {
    pub allocation_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConf {
    pub port: u16,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SshConf {
    pub binary: String,
    pub user: String,
    /// Commande lancée dans le dépôt cloné
    pub bootstrap: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConf {
    pub tiers: Vec<Tier>,
    pub power_full_scale: f64,
    pub default_label: String,
}

impl Default for ServerConf {
    fn default() -> Self {
        Self { port: 8080, public_dir: "./public".into() }
    }
}

impl Default for LogConf {
    fn default() -> Self {
        Self {
            api_url: "https://46.255.204.193".into(),
            bridge_url: "http://127.0.0.1:3100".into(),
            channel: "ALEPH-CLOUDSOLUTIONS".into(),
            image: "b6ff5c3a8205d1ca4c7c3369300eeafff498b558f71b851aa2114afd0a532717".into(),
            resources: DraftResources { vcpus: 1, memory: 2048, seconds: 3600 },
            timeout_secs: 15,
        }
    }
}

impl Default for SchedulerConf {
    fn default() -> Self {
        Self {
            allocation_url: "https://scheduler.api.aleph.cloud/api/v0/allocation".into(),
            timeout_secs: 10,
        }
    }
}

impl Default for ProbeConf {
    fn default() -> Self {
        Self { port: 8080, timeout_secs: 10 }
    }
}

impl Default for SshConf {
    fn default() -> Self {
        Self {
            binary: "ssh".into(),
            user: "root".into(),
            bootstrap: "./setup.sh".into(),
            timeout_secs: 600,
        }
    }
}

impl Default for DashboardConf {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            power_full_scale: 200_000.0,
            default_label: "AlephVM".into(),
        }
    }
}

impl LogConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SchedulerConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ProbeConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SshConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub async fn load_config() -> GridConfig {
    let path = std::env::var("NODEGRID_CONFIG").unwrap_or_else(|_| "nodegrid.yaml".into());
    load_config_from(&path).await
}

pub async fn load_config_from(path: &str) -> GridConfig {
    if !Path::new(path).exists() {
        info!(path, "no config file, using defaults");
        return GridConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return GridConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!(path, error = %e, "invalid config, using defaults");
        GridConfig::default()
    })
}
