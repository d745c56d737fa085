use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::api::{AcquirableKind, PlatformApi};

/// Aggregate character state. The core never inspects the contents; it only
/// guarantees that all five sources were fetched together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacterSnapshot {
    pub detail: Value,
    pub skills: Value,
    pub infusions: Value,
    pub weavings: Value,
    pub rites: Value,
}

/// Serializes read-after-write refreshes of character-scoped data. A caller
/// that awaits `refresh_all` is guaranteed the published snapshot reflects
/// its just-completed mutation; a partial refresh is never published.
pub struct RefreshCoordinator {
    api: Arc<dyn PlatformApi>,
    snapshot_tx: watch::Sender<Option<Arc<CharacterSnapshot>>>,
}

impl RefreshCoordinator {
    pub fn new(api: Arc<dyn PlatformApi>) -> Self {
        let (snapshot_tx, _snapshot_rx) = watch::channel(None);
        Self { api, snapshot_tx }
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<Option<Arc<CharacterSnapshot>>> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> Option<Arc<CharacterSnapshot>> {
        self.snapshot_tx.borrow().clone()
    }

    /// Re-fetches the character detail and the four acquirable lists in
    /// parallel. Resolves with `true` once all five completed; any single
    /// failure rejects the whole refresh and leaves the snapshot untouched.
    /// Without an active character nothing is fetched and `false` returns.
    pub async fn refresh_all(&self, character_id: Option<&str>) -> Result<bool> {
        let Some(id) = character_id.map(str::trim).filter(|id| !id.is_empty()) else {
            debug!("no active character; snapshot refresh skipped");
            return Ok(false);
        };

        let (detail, skills, infusions, weavings, rites) = tokio::try_join!(
            self.api.fetch_character_detail(id),
            self.api.fetch_acquirable(id, AcquirableKind::Skills),
            self.api.fetch_acquirable(id, AcquirableKind::Infusions),
            self.api.fetch_acquirable(id, AcquirableKind::Weavings),
            self.api.fetch_acquirable(id, AcquirableKind::Rites),
        )?;

        self.snapshot_tx
            .send_replace(Some(Arc::new(CharacterSnapshot {
                detail,
                skills,
                infusions,
                weavings,
                rites,
            })));
        Ok(true)
    }
}
