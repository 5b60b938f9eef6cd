//! Sync gateway: the single mutation path.
//!
//! Every write (HTTP, WebSocket, action batch) takes the store lock and runs
//! binding check → commit → broadcast while holding it, so two mutations
//! never interleave and the broadcast stream follows commit order exactly.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sketch_sync_actions::{
    ActionError, ActionSource, ActionTranslator, BatchSummary, ProposeRequest, RawAction,
};
use sketch_sync_core::bindings::normalize_bindings;
use sketch_sync_core::element::{Element, SyncSource};
use sketch_sync_core::error::{Result, SyncError};
use sketch_sync_core::protocol::{SyncMessage, Viewport};
use sketch_sync_core::store::ElementStore;

use crate::hub::{BroadcastHub, ChannelTx};

pub struct SyncGateway {
    store: Mutex<Box<dyn ElementStore>>,
    hub: Arc<BroadcastHub>,
    action_source: Option<Arc<dyn ActionSource>>,
}

/// Result of an AI request: the source's explanation and what was applied.
#[derive(Debug, Clone)]
pub struct AiOutcome {
    pub explanation: String,
    pub summary: BatchSummary,
}

impl SyncGateway {
    pub fn new(
        store: Box<dyn ElementStore>,
        hub: Arc<BroadcastHub>,
        action_source: Option<Arc<dyn ActionSource>>,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            hub,
            action_source,
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Read-only copy of every element.
    pub async fn snapshot(&self) -> Vec<Element> {
        self.store.lock().await.list()
    }

    pub async fn get(&self, id: &str) -> Option<Element> {
        self.store.lock().await.get(id)
    }

    pub async fn element_count(&self) -> usize {
        self.store.lock().await.len()
    }

    /// Register a channel and queue the full snapshot ahead of any event.
    pub async fn join(&self, conn_id: &str, tx: ChannelTx) -> Result<()> {
        let store = self.store.lock().await;
        let initial = SyncMessage::initial(store.list()).to_json()?;
        tx.send(initial)
            .map_err(|_| SyncError::Transport(format!("channel {conn_id} closed before snapshot")))?;
        self.hub.join(conn_id, tx).await;
        info!(conn_id, elements = store.len(), "Sent initial snapshot");
        Ok(())
    }

    pub async fn leave(&self, conn_id: &str) {
        self.hub.leave(conn_id).await;
    }

    /// Create an element. A known id turns this into a full replace.
    pub async fn create_element(&self, element: Element, source: SyncSource) -> Result<Element> {
        let mut store = self.store.lock().await;
        self.commit_single(store.as_mut(), element, source).await
    }

    /// Merge `patch` into an existing element.
    pub async fn update_element(
        &self,
        id: &str,
        patch: &Map<String, Value>,
        source: SyncSource,
    ) -> Result<Element> {
        let mut store = self.store.lock().await;
        let existing = store
            .get(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        let merged = existing.merge_patch(patch)?;
        self.commit_single(store.as_mut(), merged, source).await
    }

    /// Delete by id and repair every reference to it. `false` if absent.
    pub async fn delete_element(&self, id: &str) -> Result<bool> {
        let mut store = self.store.lock().await;
        if store.delete(id)?.is_none() {
            return Ok(false);
        }

        let mut remaining = store.list();
        let report = normalize_bindings(&mut remaining);
        if !report.is_empty() {
            let repaired: Vec<Element> = remaining
                .into_iter()
                .filter(|e| report.contains(&e.id))
                .collect();
            debug!(id, repaired = repaired.len(), "Repaired references to deleted element");
            store.put_batch(repaired)?;
        }

        self.hub.broadcast(&SyncMessage::deleted(id)).await;
        Ok(true)
    }

    pub async fn clear(&self) -> Result<()> {
        let mut store = self.store.lock().await;
        store.clear()?;
        self.hub.broadcast(&SyncMessage::cleared()).await;
        info!("Canvas cleared");
        Ok(())
    }

    /// Replace the whole collection with `elements`. A repeated id keeps its
    /// first position and its last value.
    pub async fn sync_all(&self, elements: Vec<Element>) -> Result<usize> {
        let mut elements = elements;
        for el in &mut elements {
            if el.id.trim().is_empty() {
                el.id = Element::generate_id();
            }
        }
        let mut elements = dedup_by_id(elements);
        for el in &mut elements {
            if el.created_at.is_none() {
                el.apply_defaults();
                el.stamp_created(SyncSource::Sync);
            } else {
                el.stamp_updated(SyncSource::Sync);
            }
        }
        normalize_bindings(&mut elements);

        let mut store = self.store.lock().await;
        store.replace_all(elements)?;
        let stored = store.list();
        let count = stored.len();
        self.hub.broadcast(&SyncMessage::synced(stored)).await;
        info!(count, "Synced elements");
        Ok(count)
    }

    /// Apply an externally supplied action batch. One broadcast at most.
    pub async fn apply_actions(
        &self,
        actions: &[RawAction],
        explanation: &str,
        source: SyncSource,
    ) -> std::result::Result<BatchSummary, ActionError> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let mut store = self.store.lock().await;
        let outcome = ActionTranslator::new(source).apply(store.as_mut(), actions, explanation)?;
        if let Some(event) = &outcome.event {
            self.hub.broadcast(event).await;
        }

        #[cfg(feature = "metrics")]
        crate::metrics::record_batch(actions.len(), start.elapsed().as_secs_f64());

        info!(
            actions = actions.len(),
            succeeded = outcome.summary.succeeded(),
            failed = outcome.summary.failed.len(),
            "Applied action batch"
        );
        Ok(outcome.summary)
    }

    /// Ask the action source for a plan against the current canvas, then
    /// apply it. A malformed plan leaves the store untouched.
    pub async fn run_ai(
        &self,
        prompt: String,
        image: Option<String>,
    ) -> std::result::Result<AiOutcome, ActionError> {
        let source = self
            .action_source
            .as_ref()
            .ok_or_else(|| ActionError::Upstream("no action source configured".into()))?;

        let request = ProposeRequest {
            prompt,
            image,
            elements: self.snapshot().await,
        };
        let plan = source.propose(&request).await.inspect_err(|e| {
            warn!(source = source.id(), error = %e, "Action source failed");
        })?;

        let summary = self
            .apply_actions(&plan.actions, &plan.explanation, SyncSource::Agent)
            .await?;
        Ok(AiOutcome {
            explanation: plan.explanation,
            summary,
        })
    }

    pub async fn set_viewport(&self, viewport: Viewport) -> usize {
        self.hub
            .broadcast(&SyncMessage::SetViewport {
                viewport,
                timestamp: Some(chrono::Utc::now()),
            })
            .await
    }

    pub async fn mermaid_convert(&self, mermaid_diagram: String) -> usize {
        self.hub
            .broadcast(&SyncMessage::MermaidConvert {
                mermaid_diagram,
                timestamp: Some(chrono::Utc::now()),
            })
            .await
    }

    /// Route a frame received from a viewer.
    pub async fn handle_client_message(&self, conn_id: &str, msg: SyncMessage) -> Result<()> {
        match msg {
            SyncMessage::ElementCreated { element, .. } => {
                self.create_element(element, SyncSource::Client).await?;
            }
            SyncMessage::ElementUpdated { element, .. } => {
                // Viewers send the full element; an unknown id becomes a create.
                self.create_element(element, SyncSource::Client).await?;
            }
            SyncMessage::ElementDeleted { element_id, .. } => {
                self.delete_element(&element_id).await?;
            }
            SyncMessage::SyncStatus { .. } => {
                let count = self.element_count().await;
                self.hub
                    .send_to(conn_id, &SyncMessage::sync_status(count))
                    .await;
            }
            other => {
                debug!(conn_id, kind = other.kind(), "Ignoring client frame");
            }
        }
        Ok(())
    }

    async fn commit_single(
        &self,
        store: &mut dyn ElementStore,
        element: Element,
        source: SyncSource,
    ) -> Result<Element> {
        let mut element = element;
        if element.id.trim().is_empty() {
            element.id = Element::generate_id();
        }

        let existing = store.get(&element.id);
        match &existing {
            Some(prev) => {
                element.created_at = prev.created_at;
                element.version = prev.version;
                element.stamp_updated(source);
            }
            None => {
                element.apply_defaults();
                element.stamp_created(source);
            }
        }

        let mut repaired = Vec::new();
        let needs_check = element.has_bindings()
            || existing.as_ref().is_some_and(Element::has_bindings);
        if needs_check {
            let id = element.id.clone();
            let mut candidates: Vec<Element> =
                store.list().into_iter().filter(|e| e.id != id).collect();
            candidates.push(element);
            let report = normalize_bindings(&mut candidates);
            let mut committed = None;
            for candidate in candidates {
                if candidate.id == id {
                    committed = Some(candidate);
                } else if report.contains(&candidate.id) {
                    repaired.push(candidate);
                }
            }
            element = committed.ok_or_else(|| SyncError::Store(format!("lost element {id}")))?;
        }

        let stored = store.put(element)?;
        if !repaired.is_empty() {
            store.put_batch(repaired)?;
        }

        let event = if existing.is_some() {
            SyncMessage::updated(stored.clone())
        } else {
            SyncMessage::created(stored.clone())
        };
        self.hub.broadcast(&event).await;
        Ok(stored)
    }
}

fn dedup_by_id(elements: Vec<Element>) -> Vec<Element> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(elements.len());
    let mut unique: Vec<Element> = Vec::with_capacity(elements.len());
    for el in elements {
        match index.get(&el.id) {
            Some(&pos) => unique[pos] = el,
            None => {
                index.insert(el.id.clone(), unique.len());
                unique.push(el);
            }
        }
    }
    unique
}
