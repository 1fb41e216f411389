/**
 * GRID - Collection des cartes affichées (une par instance)
 *
 * RÔLE :
 * Projette les NodeViewModel sur des cartes, de manière idempotente.
 * C'est le seul état mutable partagé : seul ce module le modifie,
 * les actions (delete / ping / configure) le lisent au moment du dispatch.
 *
 * FONCTIONNEMENT :
 * - render : ajoute la carte si l'id est absent, sinon no-op (pas d'erreur)
 * - clear : reset complet, incrémente la génération
 * - un rafraîchissement capture la génération au départ ; si un clear
 *   est passé entre temps, son résultat est jeté (rafraîchissement périmé)
 * - dispatch : relit la carte courante par id, jamais une copie capturée
 */

use crate::models::{NodeStatus, NodeViewModel, ResourceTotals, TotalsDisplay, UNAVAILABLE};
use serde::Serialize;
use tracing::debug;

/// Cartes "Loading..." affichées pendant un rafraîchissement
pub const LOADING_PLACEHOLDERS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    pub id: String,
    pub title: String,
    pub name: Option<String>,
    pub address: String,
    pub status: NodeStatus,
    pub status_class: &'static str,
    pub uptime: String,
}

impl Card {
    fn from_view_model(vm: &NodeViewModel) -> Self {
        Self {
            id: vm.id.clone(),
            title: vm.display_name().to_string(),
            name: vm.name.clone(),
            address: vm.address.clone(),
            status: vm.status,
            status_class: vm.status.css_class(),
            uptime: vm.uptime_text.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Created,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderReport {
    pub created: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardAction {
    Delete,
    Ping,
    Configure,
}

/// Cible d'une action, lue dans la grille au moment du dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTarget {
    pub id: String,
    pub address: String,
    pub action: CardAction,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("node {0} is not displayed")]
    UnknownCard(String),
    #[error("IPv6 address is unavailable for this node.")]
    AddressUnavailable(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("refresh from generation {started} superseded by generation {current}")]
pub struct StaleRefresh {
    pub started: u64,
    pub current: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GridSnapshot {
    pub generation: u64,
    pub loading: usize,
    pub notice: Option<String>,
    pub cards: Vec<Card>,
    pub totals: Option<ResourceTotals>,
    pub totals_display: Option<TotalsDisplay>,
}

#[derive(Debug, Default)]
pub struct NodeGrid {
    cards: Vec<Card>,
    generation: u64,
    loading: usize,
    notice: Option<String>,
    totals: Option<ResourceTotals>,
}

impl NodeGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reset complet : cartes, placeholders, notice et totaux
    pub fn clear(&mut self) -> u64 {
        self.cards.clear();
        self.loading = 0;
        self.notice = None;
        self.totals = None;
        self.generation += 1;
        self.generation
    }

    /// Clear + placeholders de chargement ; retourne la génération du rafraîchissement
    pub fn begin_refresh(&mut self, placeholders: usize) -> u64 {
        let generation = self.clear();
        self.loading = placeholders;
        generation
    }

    fn ensure_current(&self, started: u64) -> Result<(), StaleRefresh> {
        if started != self.generation {
            return Err(StaleRefresh { started, current: self.generation });
        }
        Ok(())
    }

    /// Ajoute une carte, ou ne fait rien si l'id est déjà affiché
    pub fn render_node(&mut self, vm: &NodeViewModel) -> RenderOutcome {
        if self.contains(&vm.id) {
            debug!(node = %vm.id, "card already rendered, skipping duplicate");
            return RenderOutcome::Skipped;
        }
        self.cards.push(Card::from_view_model(vm));
        RenderOutcome::Created
    }

    pub fn render_all(&mut self, view_models: &[NodeViewModel]) -> RenderReport {
        view_models
            .iter()
            .fold(RenderReport::default(), |mut report, vm| {
                match self.render_node(vm) {
                    RenderOutcome::Created => report.created += 1,
                    RenderOutcome::Skipped => report.skipped += 1,
                }
                report
            })
    }

    /// Termine un rafraîchissement démarré à la génération `started`
    pub fn commit(
        &mut self,
        started: u64,
        view_models: &[NodeViewModel],
        totals: ResourceTotals,
    ) -> Result<RenderReport, StaleRefresh> {
        self.ensure_current(started)?;
        self.loading = 0;
        self.notice = None;
        self.totals = Some(totals);
        Ok(self.render_all(view_models))
    }

    /// Termine un rafraîchissement par un message (liste vide, erreur...)
    pub fn show_notice(&mut self, started: u64, notice: &str) -> Result<(), StaleRefresh> {
        self.ensure_current(started)?;
        self.cards.clear();
        self.loading = 0;
        self.totals = None;
        self.notice = Some(notice.to_string());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cards.iter().any(|card| card.id == id)
    }

    pub fn card(&self, id: &str) -> Option<&Card> {
        self.cards.iter().find(|card| card.id == id)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn totals(&self) -> Option<ResourceTotals> {
        self.totals
    }

    /// Résout la cible d'une action sur l'état courant de la grille
    pub fn dispatch(&self, id: &str, action: CardAction) -> Result<ActionTarget, DispatchError> {
        let card = self
            .card(id)
            .ok_or_else(|| DispatchError::UnknownCard(id.to_string()))?;

        let needs_address = matches!(action, CardAction::Ping | CardAction::Configure);
        if needs_address && (card.address.is_empty() || card.address == UNAVAILABLE) {
            return Err(DispatchError::AddressUnavailable(id.to_string()));
        }

        Ok(ActionTarget {
            id: card.id.clone(),
            address: card.address.clone(),
            action,
        })
    }

    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            generation: self.generation,
            loading: self.loading,
            notice: self.notice.clone(),
            cards: self.cards.clone(),
            totals: self.totals,
            totals_display: self.totals.map(|totals| totals.display()),
        }
    }
}
