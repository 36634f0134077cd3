//! In-memory registry of live guardian sessions.
//!
//! Sessions are addressable by `(vault_id, guardian_id)` and as a per-vault
//! broadcast group. The registry owns nothing durable: closing a socket
//! removes the entry and never touches ceremony state, and a guardian
//! reconnecting replaces its prior session.

use quorum_types::{GuardianId, ServerEvent, VaultId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Opaque handle identifying one attachment. Detach is a no-op unless the
/// handle still names the live session, so a stale socket task cannot
/// evict its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(Uuid);

struct GuardianSession {
    session_id: SessionId,
    sender: UnboundedSender<ServerEvent>,
}

/// Registry of connected guardian sessions, grouped by vault.
#[derive(Default)]
pub struct SessionRegistry {
    rooms: Arc<RwLock<HashMap<VaultId, HashMap<GuardianId, GuardianSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and hand back the event stream the transport
    /// should drain. A prior session for the same guardian is replaced;
    /// its receiver closes.
    pub async fn attach(
        &self,
        vault_id: &VaultId,
        guardian_id: &GuardianId,
    ) -> (SessionId, UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let session_id = SessionId(Uuid::new_v4());

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(vault_id.clone()).or_default();
        if room
            .insert(
                guardian_id.clone(),
                GuardianSession { session_id, sender },
            )
            .is_some()
        {
            debug!("replaced existing session for {}/{}", vault_id, guardian_id);
        }
        debug!("attached session for {}/{}", vault_id, guardian_id);
        (session_id, receiver)
    }

    /// Remove a session if `session_id` still names it.
    pub async fn detach(&self, vault_id: &VaultId, guardian_id: &GuardianId, session_id: SessionId) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(vault_id) {
            let is_current = room
                .get(guardian_id)
                .map(|s| s.session_id == session_id)
                .unwrap_or(false);
            if is_current {
                room.remove(guardian_id);
                debug!("detached session for {}/{}", vault_id, guardian_id);
            }
            if room.is_empty() {
                rooms.remove(vault_id);
            }
        }
    }

    /// Deliver an event to every session in the vault room. Best-effort:
    /// a closed channel just drops the event for that guardian.
    ///
    /// Senders are snapshotted before delivery so a concurrent attach or
    /// detach cannot deadlock or skip members mid-iteration.
    pub async fn broadcast(&self, vault_id: &VaultId, event: ServerEvent) -> usize {
        let senders: Vec<(GuardianId, UnboundedSender<ServerEvent>)> = {
            let rooms = self.rooms.read().await;
            match rooms.get(vault_id) {
                Some(room) => room
                    .iter()
                    .map(|(g, s)| (g.clone(), s.sender.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (guardian_id, sender) in senders {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!(
                    "dropping event for closed session {}/{}",
                    vault_id, guardian_id
                );
            }
        }
        delivered
    }

    /// Deliver an event to one guardian's session, if connected.
    pub async fn send(
        &self,
        vault_id: &VaultId,
        guardian_id: &GuardianId,
        event: ServerEvent,
    ) -> bool {
        let sender = {
            let rooms = self.rooms.read().await;
            rooms
                .get(vault_id)
                .and_then(|room| room.get(guardian_id))
                .map(|s| s.sender.clone())
        };
        match sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Guardians currently connected to a vault room.
    pub async fn connected(&self, vault_id: &VaultId) -> Vec<GuardianId> {
        let rooms = self.rooms.read().await;
        rooms
            .get(vault_id)
            .map(|room| room.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_types::TransactionId;

    fn cancelled(reason: &str) -> ServerEvent {
        ServerEvent::SigningCancelled {
            transaction_id: TransactionId::from("tx-1"),
            reason: reason.to_string(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session() {
        let registry = SessionRegistry::new();
        let vault = VaultId::from("vault-1");

        let (_, mut rx1) = registry.attach(&vault, &GuardianId::from("g1")).await;
        let (_, mut rx2) = registry.attach(&vault, &GuardianId::from("g2")).await;

        let delivered = registry.broadcast(&vault, cancelled("test")).await;
        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.unwrap(), cancelled("test"));
        assert_eq!(rx2.recv().await.unwrap(), cancelled("test"));
    }

    #[tokio::test]
    async fn test_reconnect_replaces_prior_session() {
        let registry = SessionRegistry::new();
        let vault = VaultId::from("vault-1");
        let g1 = GuardianId::from("g1");

        let (_, mut old_rx) = registry.attach(&vault, &g1).await;
        let (_, mut new_rx) = registry.attach(&vault, &g1).await;

        // The old channel is closed; only the replacement receives.
        let delivered = registry.broadcast(&vault, cancelled("test")).await;
        assert_eq!(delivered, 1);
        assert!(old_rx.recv().await.is_none());
        assert_eq!(new_rx.recv().await.unwrap(), cancelled("test"));
    }

    #[tokio::test]
    async fn test_stale_detach_keeps_replacement() {
        let registry = SessionRegistry::new();
        let vault = VaultId::from("vault-1");
        let g1 = GuardianId::from("g1");

        let (old_session, _old_rx) = registry.attach(&vault, &g1).await;
        let (_new_session, _new_rx) = registry.attach(&vault, &g1).await;

        registry.detach(&vault, &g1, old_session).await;
        assert_eq!(registry.connected(&vault).await, vec![g1.clone()]);
    }

    #[tokio::test]
    async fn test_detach_removes_session_and_room() {
        let registry = SessionRegistry::new();
        let vault = VaultId::from("vault-1");
        let g1 = GuardianId::from("g1");

        let (session, _rx) = registry.attach(&vault, &g1).await;
        registry.detach(&vault, &g1, session).await;

        assert!(registry.connected(&vault).await.is_empty());
        assert!(!registry.send(&vault, &g1, cancelled("test")).await);
        assert_eq!(registry.broadcast(&vault, cancelled("test")).await, 0);
    }
}
