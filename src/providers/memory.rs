//! In-process host document and UI adapters

use crate::model::Metadata;
use crate::providers::{HostDocument, UiAdapter};
use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Serialized form of a host document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    #[serde(default)]
    pub taxonomy_ids: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Named text sources available for annotation.
    #[serde(default)]
    pub texts: HashMap<String, String>,
}

/// Host document held in memory; change notifications fan out through a
/// broadcast channel.
pub struct MemoryHostDocument {
    metadata: RwLock<Metadata>,
    taxonomy_ids: Vec<String>,
    texts: RwLock<HashMap<String, String>>,
    sender: broadcast::Sender<String>,
    change_log: Mutex<Vec<String>>,
    writes: AtomicUsize,
}

impl MemoryHostDocument {
    pub fn new(metadata: Metadata, taxonomy_ids: Vec<String>) -> Self {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            metadata: RwLock::new(metadata),
            taxonomy_ids,
            texts: RwLock::new(HashMap::new()),
            sender,
            change_log: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn from_snapshot(snapshot: DocumentSnapshot) -> Self {
        let document = Self::new(snapshot.metadata, snapshot.taxonomy_ids);
        *document.texts.write() = snapshot.texts;
        document
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read document {:?}", path))?;
        let snapshot: DocumentSnapshot = crate::config::parse_by_extension(path, &contents)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            taxonomy_ids: self.taxonomy_ids.clone(),
            metadata: self.metadata.read().clone(),
            texts: self.texts.read().clone(),
        }
    }

    pub fn with_text(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.texts.write().insert(name.into(), text.into());
        self
    }

    pub fn set_text(&self, name: impl Into<String>, text: impl Into<String>) {
        self.texts.write().insert(name.into(), text.into());
    }

    /// Apply an edit on behalf of another component and announce it.
    pub fn edit_as<F>(&self, modifier_id: &str, edit: F)
    where
        F: FnOnce(&mut Metadata),
    {
        {
            let mut metadata = self.metadata.write();
            edit(&mut *metadata);
        }
        self.changed(modifier_id);
    }

    /// Modifier ids of every change notification so far, in order.
    pub fn change_log(&self) -> Vec<String> {
        self.change_log.lock().clone()
    }

    pub fn changes_by(&self, modifier_id: &str) -> usize {
        self.change_log
            .lock()
            .iter()
            .filter(|id| id.as_str() == modifier_id)
            .count()
    }

    /// Number of `set_metadata` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl HostDocument for MemoryHostDocument {
    fn metadata(&self) -> Metadata {
        self.metadata.read().clone()
    }

    fn set_metadata(&self, metadata: Metadata) {
        *self.metadata.write() = metadata;
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn changed(&self, modifier_id: &str) {
        self.change_log.lock().push(modifier_id.to_string());
        // no subscribers is fine
        let _ = self.sender.send(modifier_id.to_string());
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    fn taxonomy_ids(&self) -> Vec<String> {
        self.taxonomy_ids.clone()
    }

    fn text_source(&self, name: &str) -> Option<String> {
        self.texts.read().get(name).cloned()
    }
}

#[derive(Debug, Default)]
pub struct NoopUi;

impl UiAdapter for NoopUi {
    fn dismiss_transient(&self, _keep: Option<&str>) {}
}

/// Counts dismissal requests.
#[derive(Debug, Default)]
pub struct RecordingUi {
    dismissals: AtomicUsize,
}

impl RecordingUi {
    pub fn dismissals(&self) -> usize {
        self.dismissals.load(Ordering::SeqCst)
    }
}

impl UiAdapter for RecordingUi {
    fn dismiss_transient(&self, _keep: Option<&str>) {
        self.dismissals.fetch_add(1, Ordering::SeqCst);
    }
}
