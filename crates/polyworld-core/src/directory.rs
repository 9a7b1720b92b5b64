//! ============================================================================
//! Ember Directory
//! ============================================================================
//! Cached view of the public Ember gallery plus the caller's own Embers.
//! The gallery loads once per session; selection swaps the active persona.
//! ============================================================================

use std::sync::Arc;

use tracing::{debug, warn};

use crate::gateway::{Gateway, GatewayError};
use crate::render::EmberCard;
use crate::types::{EmberRecord, EmberStatus};

/// Partition of a creator's Embers. At most one may be in progress.
#[derive(Debug, Default)]
pub struct MyEmbers {
    pub trained: Vec<EmberRecord>,
    pub in_progress: Option<EmberRecord>,
}

impl MyEmbers {
    /// A new Ember may only be started when nothing is mid-training.
    pub fn offers_create(&self) -> bool {
        self.in_progress.is_none()
    }
}

pub struct EmberDirectory {
    gateway: Arc<dyn Gateway>,
    cache: Vec<EmberRecord>,
    loaded: bool,
    active: Option<EmberRecord>,
}

impl EmberDirectory {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            cache: Vec::new(),
            loaded: false,
            active: None,
        }
    }

    /// Fetch the public gallery once; later calls serve the cache.
    pub async fn ensure_loaded(&mut self) -> Result<&[EmberRecord], GatewayError> {
        if !self.loaded {
            let embers = self.gateway.list_active_embers().await?;
            debug!("Loaded {} active embers", embers.len());
            self.cache = embers;
            self.loaded = true;
        }
        Ok(&self.cache)
    }

    pub fn gallery_cards(&self) -> Vec<EmberCard> {
        self.cache.iter().map(card_for).collect()
    }

    /// Select by id from the cache; returns the record and marks it active.
    pub fn select(&mut self, id: &str) -> Option<&EmberRecord> {
        let found = self.cache.iter().find(|e| e.id == id).cloned();
        match found {
            Some(ember) => {
                self.active = Some(ember);
                self.active.as_ref()
            }
            None => {
                warn!("Ember not in directory: {}", id);
                None
            }
        }
    }

    pub fn active(&self) -> Option<&EmberRecord> {
        self.active.as_ref()
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// Partition the caller's Embers into fully trained and in-progress.
    pub async fn my_embers(&self, user_id: &str) -> Result<MyEmbers, GatewayError> {
        let mine = self.gateway.list_embers_by_creator(user_id).await?;
        let mut out = MyEmbers::default();
        for ember in mine {
            let complete = ember
                .training_progress
                .as_ref()
                .map(|p| p.complete)
                .unwrap_or(ember.status == EmberStatus::Active);
            if complete {
                out.trained.push(ember);
            } else if out.in_progress.is_none() {
                out.in_progress = Some(ember);
            } else {
                // backend invariant is one-in-progress; tolerate extras
                warn!("Multiple in-progress embers, ignoring {}", ember.id);
            }
        }
        Ok(out)
    }
}

pub(crate) fn card_for(ember: &EmberRecord) -> EmberCard {
    EmberCard {
        id: ember.id.clone(),
        name: ember.display_name().to_string(),
        tagline: ember
            .persona
            .as_ref()
            .map(|p| p.tagline.clone())
            .filter(|t| !t.is_empty()),
        minted: ember.is_minted(),
        in_training: ember.status == EmberStatus::Training,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockGateway;
    use crate::types::TrainingProgress;

    fn ember(id: &str, status: EmberStatus, complete: bool) -> EmberRecord {
        EmberRecord {
            id: id.into(),
            name: Some(format!("Ember {}", id)),
            status,
            training_progress: Some(TrainingProgress { step: 4, complete }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_select_from_cache() {
        let gw = Arc::new(MockGateway::new());
        *gw.active_embers.lock().unwrap() = vec![ember("a", EmberStatus::Active, true)];
        let mut dir = EmberDirectory::new(gw.clone());
        dir.ensure_loaded().await.unwrap();
        assert!(dir.select("a").is_some());
        assert_eq!(dir.active().map(|e| e.id.as_str()), Some("a"));
        assert!(dir.select("missing").is_none());

        dir.clear_active();
        assert!(dir.active().is_none());
    }

    #[tokio::test]
    async fn test_gallery_loads_once() {
        let gw = Arc::new(MockGateway::new());
        let mut dir = EmberDirectory::new(gw.clone());
        dir.ensure_loaded().await.unwrap();
        dir.ensure_loaded().await.unwrap();
        assert_eq!(gw.call_count("list_active_embers"), 1);
    }

    #[tokio::test]
    async fn test_my_embers_partition() {
        let gw = Arc::new(MockGateway::new());
        *gw.my_embers.lock().unwrap() = vec![
            ember("done", EmberStatus::Active, true),
            ember("wip", EmberStatus::Training, false),
        ];
        let dir = EmberDirectory::new(gw);
        let mine = dir.my_embers("u1").await.unwrap();
        assert_eq!(mine.trained.len(), 1);
        assert_eq!(mine.in_progress.as_ref().map(|e| e.id.as_str()), Some("wip"));
        assert!(!mine.offers_create());
    }

    #[tokio::test]
    async fn test_offers_create_when_nothing_in_progress() {
        let gw = Arc::new(MockGateway::new());
        *gw.my_embers.lock().unwrap() = vec![ember("done", EmberStatus::Active, true)];
        let dir = EmberDirectory::new(gw);
        let mine = dir.my_embers("u1").await.unwrap();
        assert!(mine.offers_create());
    }
}
