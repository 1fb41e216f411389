/**
 * SESSION - Contexte explicite d'un wallet connecté
 *
 * RÔLE :
 * Remplace l'état global client/compte : chaque opération du dashboard
 * reçoit la Session en paramètre. La session porte l'adresse du wallet,
 * le solde connu, sa grille de cartes et ses verrous "opération en cours".
 *
 * CYCLE DE VIE :
 * connect(address, balance) -> Session ; disconnect(session) vide la grille
 * (génération incrémentée : un rafraîchissement en vol sera jeté).
 * La signature des messages et la lecture du solde on-chain restent externes.
 */

use crate::grid::NodeGrid;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("wallet address is required")]
    MissingAddress,
    #[error("invalid wallet address: {0}")]
    InvalidAddress(String),
}

/// Drapeau "opération en cours" : une seconde invocation concurrente est ignorée
#[derive(Debug, Default)]
pub struct BusyFlag(AtomicBool);

/// Libère le drapeau à la destruction, quel que soit le chemin de sortie
#[derive(Debug)]
pub struct BusyGuard<'a>(&'a AtomicBool);

impl BusyFlag {
    pub fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(&self.0))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// État mutable propre à une session
#[derive(Debug, Default)]
pub struct SessionView {
    pub grid: Mutex<NodeGrid>,
    pub listing: BusyFlag,
    pub creating: BusyFlag,
    balance: Mutex<f64>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub address: String,
    pub connected_at: OffsetDateTime,
    pub view: Arc<SessionView>,
}

impl Session {
    pub fn balance(&self) -> f64 {
        *self.view.balance.lock()
    }

    pub fn set_balance(&self, balance: f64) {
        *self.view.balance.lock() = if balance.is_finite() { balance.max(0.0) } else { 0.0 };
    }

    /// "0x1234...abcd"
    pub fn display_address(&self) -> String {
        short_address(&self.address)
    }
}

pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

fn validate_address(address: &str) -> Result<String, SessionError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(SessionError::MissingAddress);
    }
    let hex = address.strip_prefix("0x").unwrap_or(address);
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SessionError::InvalidAddress(address.to_string()));
    }
    Ok(address.to_string())
}

pub fn connect(address: &str, balance: f64) -> Result<Session, SessionError> {
    let address = validate_address(address)?;
    let session = Session {
        token: Uuid::new_v4().to_string(),
        address,
        connected_at: OffsetDateTime::now_utc(),
        view: Arc::new(SessionView::default()),
    };
    session.set_balance(balance);
    Ok(session)
}

pub fn disconnect(session: Session) {
    session.view.grid.lock().clear();
    session.set_balance(0.0);
    info!(wallet = %session.display_address(), "wallet disconnected");
}

/// Sessions actives indexées par token
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, address: &str, balance: f64) -> Result<Session, SessionError> {
        let session = connect(address, balance)?;
        self.sessions.write().insert(session.token.clone(), session.clone());
        info!(wallet = %session.display_address(), "wallet connected");
        Ok(session)
    }

    pub fn get(&self, token: &str) -> Option<Session> {
        self.sessions.read().get(token).cloned()
    }

    pub fn close(&self, token: &str) -> bool {
        let removed = self.sessions.write().remove(token);
        match removed {
            Some(session) => {
                disconnect(session);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
