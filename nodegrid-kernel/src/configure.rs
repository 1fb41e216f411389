/**
 * CONFIGURE - Bootstrap distant d'un nœud via SSH
 *
 * RÔLE :
 * Valide une demande de configuration (adresse, clé privée, dépôt git)
 * puis exécute sur le nœud : clone du dépôt + script de bootstrap.
 *
 * FONCTIONNEMENT :
 * - clé inline : écrite dans un fichier temporaire privé (0600),
 *   supprimé à la fin de l'exécution
 * - clé par chemin : utilisée telle quelle
 * - le canal d'exécution est le trait RemoteExecutor (SshExecutor en prod)
 * - exécution bornée par un timeout ; sortie standard + erreur capturées
 */

use crate::config::SshConf;
use crate::models::UNAVAILABLE;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigureError {
    #[error("IPv6 address is unavailable for this node.")]
    MissingAddress,
    #[error("Private key is required to configure the node.")]
    MissingKey,
    #[error("Git repository URL is required.")]
    MissingRepository,
    #[error("private key file not found: {0}")]
    KeyNotFound(String),
    #[error("failed to prepare private key: {0}")]
    KeyFile(#[from] std::io::Error),
    #[error("failed to start ssh: {0}")]
    Spawn(std::io::Error),
    #[error("remote configuration timed out after {0}s")]
    Timeout(u64),
    #[error("remote bootstrap exited with code {exit_code:?}")]
    RemoteFailed { exit_code: Option<i32>, output: String },
}

impl ConfigureError {
    /// Erreur de saisie utilisateur (400) plutôt qu'échec distant
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ConfigureError::MissingAddress
                | ConfigureError::MissingKey
                | ConfigureError::MissingRepository
                | ConfigureError::KeyNotFound(_)
        )
    }
}

/// Corps de `POST /configure-node`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    #[serde(default)]
    pub ipv6: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub git_repo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Inline(String),
    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurePlan {
    pub ipv6: String,
    pub key: KeySource,
    pub git_repo: String,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl ConfigureRequest {
    pub fn validate(&self) -> Result<ConfigurePlan, ConfigureError> {
        let ipv6 = non_blank(self.ipv6.as_deref())
            .filter(|address| *address != UNAVAILABLE)
            .ok_or(ConfigureError::MissingAddress)?;

        let key = match (
            self.private_key.as_deref().filter(|k| !k.trim().is_empty()),
            non_blank(self.private_key_path.as_deref()),
        ) {
            (Some(pem), _) => KeySource::Inline(pem.to_string()),
            (None, Some(path)) => KeySource::Path(PathBuf::from(path)),
            (None, None) => return Err(ConfigureError::MissingKey),
        };

        let git_repo = non_blank(self.git_repo.as_deref()).ok_or(ConfigureError::MissingRepository)?;

        Ok(ConfigurePlan {
            ipv6: ipv6.to_string(),
            key,
            git_repo: git_repo.to_string(),
        })
    }
}

/// Script lancé sur le nœud : clone dans un dossier temporaire puis bootstrap
pub fn bootstrap_script(git_repo: &str, bootstrap: &str) -> String {
    format!(
        "set -e; workdir=$(mktemp -d); git clone {} \"$workdir/repo\"; cd \"$workdir/repo\"; {}",
        shell_words::quote(git_repo),
        bootstrap
    )
}

/// Command execution result
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub key_path: PathBuf,
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, target: &RemoteTarget, script: &str) -> Result<ExecutionResult, ConfigureError>;
}

pub struct SshExecutor {
    binary: String,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(binary: &str, timeout: Duration) -> Self {
        Self { binary: binary.to_string(), timeout }
    }

    pub fn ssh_args(target: &RemoteTarget, script: &str) -> Vec<String> {
        vec![
            "-i".into(),
            target.key_path.display().to_string(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            format!("{}@{}", target.user, target.host),
            script.to_string(),
        ]
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, target: &RemoteTarget, script: &str) -> Result<ExecutionResult, ConfigureError> {
        let start_time = Instant::now();
        debug!(host = %target.host, user = %target.user, "running remote bootstrap");

        let output = tokio::time::timeout(
            self.timeout,
            AsyncCommand::new(&self.binary)
                .args(Self::ssh_args(target, script))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ConfigureError::Timeout(self.timeout.as_secs()))?
        .map_err(ConfigureError::Spawn)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code();

        Ok(ExecutionResult {
            success: output.status.success(),
            output: stdout.to_string(),
            error: (!stderr.is_empty()).then(|| stderr.to_string()),
            exit_code,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }
}

/// Fichier clé privé, supprimé au drop pour une clé inline
enum KeyFile {
    Temporary(tempfile::NamedTempFile),
    Existing(PathBuf),
}

impl KeyFile {
    fn prepare(source: &KeySource) -> Result<Self, ConfigureError> {
        match source {
            KeySource::Path(path) => {
                if !path.exists() {
                    return Err(ConfigureError::KeyNotFound(path.display().to_string()));
                }
                Ok(KeyFile::Existing(path.clone()))
            }
            KeySource::Inline(pem) => {
                let mut file = tempfile::Builder::new().prefix("nodegrid-key-").tempfile()?;
                file.write_all(pem.as_bytes())?;
                if !pem.ends_with('\n') {
                    file.write_all(b"\n")?;
                }
                file.flush()?;
                restrict_permissions(file.path())?;
                Ok(KeyFile::Temporary(file))
            }
        }
    }

    fn path(&self) -> &Path {
        match self {
            KeyFile::Temporary(file) => file.path(),
            KeyFile::Existing(path) => path,
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

pub struct NodeConfigurator {
    executor: Arc<dyn RemoteExecutor>,
    user: String,
    bootstrap: String,
}

impl NodeConfigurator {
    pub fn new(executor: Arc<dyn RemoteExecutor>, ssh: &SshConf) -> Self {
        Self {
            executor,
            user: ssh.user.clone(),
            bootstrap: ssh.bootstrap.clone(),
        }
    }

    pub async fn configure(&self, plan: &ConfigurePlan) -> Result<ExecutionResult, ConfigureError> {
        let key_file = KeyFile::prepare(&plan.key)?;
        let target = RemoteTarget {
            user: self.user.clone(),
            host: plan.ipv6.clone(),
            key_path: key_file.path().to_path_buf(),
        };
        let script = bootstrap_script(&plan.git_repo, &self.bootstrap);

        info!(node = %plan.ipv6, repo = %plan.git_repo, "configuring node");
        let result = self.executor.run(&target, &script).await?;
        drop(key_file);

        if !result.success {
            warn!(node = %plan.ipv6, exit_code = ?result.exit_code, "node bootstrap failed");
            return Err(ConfigureError::RemoteFailed {
                exit_code: result.exit_code,
                output: result.error.clone().unwrap_or_else(|| result.output.clone()),
            });
        }
        info!(node = %plan.ipv6, elapsed_ms = result.execution_time_ms as u64, "node configured");
        Ok(result)
    }
}
