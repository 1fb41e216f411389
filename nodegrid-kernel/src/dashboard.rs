/**
 * DASHBOARD - Orchestration des opérations utilisateur
 *
 * RÔLE :
 * Relie le message log, le lookup d'adresses, la grille de cartes et les
 * actions distantes (ping, configuration). Chaque opération reçoit la
 * Session explicitement ; aucun état client global.
 *
 * FONCTIONNEMENT :
 * - list : clear + placeholders -> requête INSTANCE/FORGET -> réconciliation
 *   -> totaux + view models (lookups concurrents) -> commit sous la
 *   génération capturée au départ
 * - create / delete : brouillon soumis au log puis rafraîchissement complet
 * - un drapeau "en cours" par opération : un second appel concurrent est ignoré
 * - confirmations et saisies passent par le trait Prompter
 */

use crate::config::GridConfig;
use crate::configure::{ConfigureError, ConfigureRequest, ExecutionResult, NodeConfigurator};
use crate::grid::{CardAction, DispatchError, GridSnapshot, RenderReport, LOADING_PLACEHOLDERS};
use crate::health::HealthTracker;
use crate::keygen::{generate_keypair, private_key_file_name, KEY_COMMENT};
use crate::log_client::{DraftResources, ForgetDraft, InstanceDraft, LogError, MessageLog, MessageQuery, Payment, PostDraft};
use crate::models::{RecordKind, ResourceTotals, SshKey, SSH_POST_TYPE};
use crate::probe::{PingOutcome, StatusProbe};
use crate::prompts::Prompter;
use crate::reconcile::filter_valid_instances;
use crate::resources::{aggregate, available_compute, power_percentage, ComputeTier, Tier};
use crate::session::{Session, SessionError};
use crate::view_model::{build_view_model, AddressResolver};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub const NO_INSTANCES_NOTICE: &str = "No instances found for this wallet.";
pub const NO_ACTIVE_INSTANCES_NOTICE: &str = "No active instances found for this wallet.";
pub const LOAD_ERROR_NOTICE: &str = "Error loading instances. Please refresh or try again later.";

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// Saisie utilisateur invalide
    #[error("{0}")]
    Validation(String),
    #[error("Wallet is not connected.")]
    NoSession,
    #[error("{0}")]
    NotFound(String),
    /// Échec d'un service externe (log, nœud, ssh)
    #[error("{0}")]
    Upstream(String),
}

impl From<SessionError> for DashboardError {
    fn from(e: SessionError) -> Self {
        DashboardError::Validation(e.to_string())
    }
}

impl From<DispatchError> for DashboardError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::UnknownCard(_) => DashboardError::NotFound(e.to_string()),
            DispatchError::AddressUnavailable(_) => DashboardError::Validation(e.to_string()),
        }
    }
}

impl From<ConfigureError> for DashboardError {
    fn from(e: ConfigureError) -> Self {
        if e.is_validation() {
            DashboardError::Validation(e.to_string())
        } else {
            DashboardError::Upstream(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub generation: u64,
    pub valid_instances: usize,
    pub rendered: RenderReport,
    pub notice: Option<String>,
    /// Un clear est passé pendant la requête : résultat jeté
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ListOutcome {
    Refreshed(RefreshReport),
    /// Rafraîchissement déjà en cours pour cette session
    Busy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CreateOutcome {
    Created { item_hash: String },
    Cancelled,
    Busy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted { instance: String, forget_hash: String },
    Cancelled,
}

/// Clé générée : la clé privée n'est rendue qu'une fois
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedSshKey {
    pub item_hash: String,
    pub label: String,
    pub public_key: String,
    pub private_key: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComputeView {
    pub balance: f64,
    pub power_percentage: f64,
    pub tiers: Vec<ComputeTier>,
    pub totals: Option<ResourceTotals>,
}

#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub channel: String,
    pub image: String,
    pub resources: DraftResources,
    pub tiers: Vec<Tier>,
    pub power_full_scale: f64,
    pub default_label: String,
}

impl DashboardSettings {
    pub fn from_config(cfg: &GridConfig) -> Self {
        Self {
            channel: cfg.log.channel.clone(),
            image: cfg.log.image.clone(),
            resources: cfg.log.resources,
            tiers: cfg.dashboard.tiers.clone(),
            power_full_scale: cfg.dashboard.power_full_scale,
            default_label: cfg.dashboard.default_label.clone(),
        }
    }
}

/// `<algo> <base64> [comment]`
pub fn is_openssh_public_key(key: &str) -> bool {
    let mut parts = key.split_whitespace();
    let (Some(algo), Some(blob)) = (parts.next(), parts.next()) else {
        return false;
    };
    let known_algo = algo.starts_with("ssh-") || algo.starts_with("ecdsa-sha2-") || algo.starts_with("sk-");
    let base64 = blob
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='));
    known_algo && base64
}

pub struct Dashboard {
    log: Arc<dyn MessageLog>,
    resolver: Arc<dyn AddressResolver>,
    probe: StatusProbe,
    configurator: NodeConfigurator,
    health: HealthTracker,
    settings: DashboardSettings,
}

impl Dashboard {
    pub fn new(
        log: Arc<dyn MessageLog>,
        resolver: Arc<dyn AddressResolver>,
        probe: StatusProbe,
        configurator: NodeConfigurator,
        health: HealthTracker,
        settings: DashboardSettings,
    ) -> Self {
        Self { log, resolver, probe, configurator, health, settings }
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn snapshot(&self, session: &Session) -> GridSnapshot {
        session.view.grid.lock().snapshot()
    }

    pub async fn list_instances(&self, session: &Session) -> ListOutcome {
        let Some(_guard) = session.view.listing.try_acquire() else {
            debug!(wallet = %session.display_address(), "refresh already in progress, ignoring");
            return ListOutcome::Busy;
        };
        ListOutcome::Refreshed(self.refresh(session).await)
    }

    fn finish_with_notice(&self, session: &Session, started: u64, notice: &str) -> RefreshReport {
        let stale = session.view.grid.lock().show_notice(started, notice).is_err();
        RefreshReport {
            generation: started,
            valid_instances: 0,
            rendered: RenderReport::default(),
            notice: Some(notice.to_string()),
            stale,
        }
    }

    async fn refresh(&self, session: &Session) -> RefreshReport {
        let started = session.view.grid.lock().begin_refresh(LOADING_PLACEHOLDERS);
        let query = MessageQuery::new(&[RecordKind::Instance, RecordKind::Forget], &session.address);

        let batch = match self.log.get_messages(&query).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(wallet = %session.display_address(), error = %e, "error fetching instances");
                self.health.record_failure();
                return self.finish_with_notice(session, started, LOAD_ERROR_NOTICE);
            }
        };
        if batch.is_empty() {
            return self.finish_with_notice(session, started, NO_INSTANCES_NOTICE);
        }

        let valid = filter_valid_instances(&batch);
        info!(wallet = %session.display_address(), valid = valid.len(), total = batch.len(), "valid instances");
        if valid.is_empty() {
            return self.finish_with_notice(session, started, NO_ACTIVE_INSTANCES_NOTICE);
        }

        let totals = aggregate(&valid, &self.settings.tiers);
        let now = OffsetDateTime::now_utc();
        let view_models = join_all(
            valid
                .iter()
                .map(|record| build_view_model(record, self.resolver.as_ref(), now)),
        )
        .await;

        let committed = session.view.grid.lock().commit(started, &view_models, totals);
        match committed {
            Ok(rendered) => {
                self.health.record_refresh();
                RefreshReport {
                    generation: started,
                    valid_instances: valid.len(),
                    rendered,
                    notice: None,
                    stale: false,
                }
            }
            Err(stale) => {
                debug!(%stale, "discarding stale refresh");
                RefreshReport {
                    generation: started,
                    valid_instances: valid.len(),
                    rendered: RenderReport::default(),
                    notice: None,
                    stale: true,
                }
            }
        }
    }

    /// Clés publiées par la session ; un échec de requête donne une liste vide
    pub async fn ssh_keys(&self, session: &Session) -> Vec<SshKey> {
        let query = MessageQuery::new(&[RecordKind::Post], &session.address);
        match self.log.get_messages(&query).await {
            Ok(records) => records.iter().filter_map(|record| record.ssh_key()).collect(),
            Err(e) => {
                warn!(wallet = %session.display_address(), error = %e, "error fetching SSH keys");
                Vec::new()
            }
        }
    }

    pub async fn register_ssh_key(&self, session: &Session, label: &str, key: &str) -> Result<String, DashboardError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(DashboardError::Validation("Label is required to create an SSH key.".into()));
        }
        let key = key.trim();
        if !is_openssh_public_key(key) {
            return Err(DashboardError::Validation("A valid OpenSSH public key is required.".into()));
        }

        let draft = PostDraft {
            post_type: SSH_POST_TYPE.to_string(),
            content: json!({ "key": key, "label": label }),
            channel: self.settings.channel.clone(),
        };
        let item_hash = self.log.create_post(&session.address, &draft).await.map_err(|e| {
            warn!(error = %e, "error posting SSH key");
            DashboardError::Upstream("Failed to register SSH key.".into())
        })?;
        info!(wallet = %session.display_address(), %label, item_hash = %item_hash, "SSH key posted");
        Ok(item_hash)
    }

    pub async fn generate_ssh_key(&self, session: &Session, label: &str) -> Result<GeneratedSshKey, DashboardError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(DashboardError::Validation("Label is required to create an SSH key.".into()));
        }

        let pair = generate_keypair(KEY_COMMENT).map_err(|e| {
            warn!(error = %e, "error generating SSH key");
            DashboardError::Upstream("An error occurred while creating the SSH key. Please try again.".into())
        })?;
        let item_hash = self.register_ssh_key(session, label, &pair.public_key).await?;

        Ok(GeneratedSshKey {
            item_hash,
            label: label.to_string(),
            public_key: pair.public_key,
            private_key: pair.private_key,
            file_name: private_key_file_name(label),
        })
    }

    /// Rafraîchissement après une écriture, sous le même drapeau que list
    async fn refresh_after_write(&self, session: &Session) {
        let Some(_guard) = session.view.listing.try_acquire() else {
            debug!(wallet = %session.display_address(), "refresh already in progress, skipping follow-up");
            return;
        };
        self.refresh(session).await;
    }

    pub async fn create_instance(&self, session: &Session, prompter: &dyn Prompter) -> Result<CreateOutcome, DashboardError> {
        let Some(_guard) = session.view.creating.try_acquire() else {
            debug!(wallet = %session.display_address(), "instance creation already in progress");
            return Ok(CreateOutcome::Busy);
        };

        let keys = self.ssh_keys(session).await;
        if keys.is_empty() {
            return Err(DashboardError::Validation("No SSH keys available. Please create one first.".into()));
        }

        let labels: Vec<String> = keys.iter().map(|key| key.label.clone()).collect();
        let selected = prompter
            .request_selection("Select an SSH Key", &labels)
            .await
            .and_then(|index| keys.get(index));
        let Some(selected) = selected else {
            return Ok(CreateOutcome::Cancelled);
        };

        let label = prompter
            .request_text("Enter a label for your VM:", &self.settings.default_label)
            .await
            .map(|label| label.trim().to_string())
            .unwrap_or_default();
        if label.is_empty() {
            return Err(DashboardError::Validation("Label is required to create a VM.".into()));
        }

        let draft = InstanceDraft {
            authorized_keys: vec![selected.key.clone()],
            resources: self.settings.resources,
            payment: Payment::hold_eth(),
            channel: self.settings.channel.clone(),
            metadata: json!({ "name": label }),
            image: self.settings.image.clone(),
        };
        let item_hash = self
            .log
            .create_instance(&session.address, &draft)
            .await
            .map_err(|e| upstream("Failed to create instance.", e))?;
        info!(wallet = %session.display_address(), item_hash = %item_hash, "instance created");

        self.refresh_after_write(session).await;
        Ok(CreateOutcome::Created { item_hash })
    }

    pub async fn delete_instance(
        &self,
        session: &Session,
        instance_id: &str,
        prompter: &dyn Prompter,
    ) -> Result<DeleteOutcome, DashboardError> {
        let target = session.view.grid.lock().dispatch(instance_id, CardAction::Delete)?;

        let body = format!("Are you sure you want to delete instance {}?", target.id);
        if !prompter.request_confirmation("Confirm Deletion", &body).await {
            info!(instance = %target.id, "user cancelled deletion");
            return Ok(DeleteOutcome::Cancelled);
        }

        let draft = ForgetDraft {
            hashes: vec![target.id.clone()],
            reason: "User requested deletion".into(),
            channel: self.settings.channel.clone(),
        };
        let forget_hash = self
            .log
            .forget(&session.address, &draft)
            .await
            .map_err(|e| upstream("Failed to delete instance.", e))?;
        info!(instance = %target.id, forget_hash = %forget_hash, "instance deleted");

        self.refresh_after_write(session).await;
        Ok(DeleteOutcome::Deleted { instance: target.id, forget_hash })
    }

    pub fn compute(&self, session: &Session) -> ComputeView {
        let balance = session.balance();
        let totals = session.view.grid.lock().totals();
        let total_cores = totals.map(|t| t.total_cores).unwrap_or(0);
        ComputeView {
            balance,
            power_percentage: power_percentage(balance, self.settings.power_full_scale),
            tiers: available_compute(balance, total_cores, &self.settings.tiers),
            totals,
        }
    }

    pub async fn ping(&self, session: &Session, instance_id: &str) -> Result<PingOutcome, DashboardError> {
        let target = session.view.grid.lock().dispatch(instance_id, CardAction::Ping)?;
        Ok(self.probe.ping(&target.address).await)
    }

    /// Configuration d'une carte : l'adresse vient de la grille, pas de la requête
    pub async fn configure_card(
        &self,
        session: &Session,
        instance_id: &str,
        mut request: ConfigureRequest,
    ) -> Result<ExecutionResult, DashboardError> {
        let target = session.view.grid.lock().dispatch(instance_id, CardAction::Configure)?;
        request.ipv6 = Some(target.address);
        self.configure(request).await
    }

    pub async fn configure(&self, request: ConfigureRequest) -> Result<ExecutionResult, DashboardError> {
        let plan = request.validate()?;
        Ok(self.configurator.configure(&plan).await?)
    }
}

fn upstream(message: &str, e: LogError) -> DashboardError {
    warn!(error = %e, "{message}");
    DashboardError::Upstream(message.to_string())
}
