//! Batch translation of semantic actions into store mutations.
//!
//! A batch is applied to a working copy of the store in order, then the
//! whole candidate set (committed elements plus the batch) goes through the
//! binding checker once, so references between elements created in the same
//! batch resolve. Only the elements the batch touched are written back.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sketch_sync_core::bindings::normalize_bindings;
use sketch_sync_core::element::{Element, SyncSource};
use sketch_sync_core::protocol::SyncMessage;
use sketch_sync_core::store::ElementStore;

use crate::action::{Action, RawAction};
use crate::error::{ActionError, Result};

/// One action that was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub index: usize,
    pub action: String,
    pub kind: String,
    pub message: String,
}

/// Result of applying one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: Vec<ActionFailure>,
    /// Elements in the store after the batch.
    pub element_count: usize,
    /// Passed through from the action source, never interpreted.
    pub explanation: String,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    pub fn not_found(&self) -> usize {
        self.failed.iter().filter(|f| f.kind == "not_found").count()
    }
}

/// Summary plus the single event to fan out, if anything changed.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub summary: BatchSummary,
    pub event: Option<SyncMessage>,
}

pub struct ActionTranslator {
    source: SyncSource,
}

impl Default for ActionTranslator {
    fn default() -> Self {
        Self::new(SyncSource::Agent)
    }
}

impl ActionTranslator {
    pub fn new(source: SyncSource) -> Self {
        Self { source }
    }

    /// Apply `actions` in order against `store`.
    ///
    /// Invalid or unresolvable actions are skipped and reported; the only
    /// hard error is a failing store write.
    pub fn apply(
        &self,
        store: &mut dyn ElementStore,
        actions: &[RawAction],
        explanation: impl Into<String>,
    ) -> Result<BatchOutcome> {
        let mut working: HashMap<String, Element> =
            store.list().into_iter().map(|e| (e.id.clone(), e)).collect();

        let mut created: Vec<String> = Vec::new();
        let mut updated: BTreeSet<String> = BTreeSet::new();
        let mut deleted: Vec<String> = Vec::new();
        let mut failed = Vec::new();

        for (index, raw) in actions.iter().enumerate() {
            let step = Action::parse(raw).and_then(|action| {
                self.apply_one(action, &mut working, &mut created, &mut updated, &mut deleted)
            });
            if let Err(e) = step {
                warn!(index, action = %raw.action, error = %e, "Skipping action");
                failed.push(ActionFailure {
                    index,
                    action: raw.action.clone(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
        }

        let mut candidates: Vec<Element> = working.into_values().collect();
        let repaired = normalize_bindings(&mut candidates);

        let mut touched: BTreeSet<String> = created.iter().cloned().collect();
        touched.extend(updated.iter().cloned());
        touched.extend(repaired.modified.iter().cloned());

        let to_write: Vec<Element> = candidates
            .iter()
            .filter(|e| touched.contains(&e.id))
            .cloned()
            .collect();
        // Keep the batch's creation order for the broadcast.
        let order: HashMap<&str, usize> = created
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut to_write = to_write;
        to_write.sort_by_key(|e| order.get(e.id.as_str()).copied().unwrap_or(usize::MAX));

        for id in &deleted {
            store.delete(id)?;
        }
        let written = store.put_batch(to_write)?;

        let summary = BatchSummary {
            created: created.len(),
            updated: updated.len(),
            deleted: deleted.len(),
            failed,
            element_count: store.len(),
            explanation: explanation.into(),
        };

        let event = if written.is_empty() && deleted.is_empty() {
            None
        } else if updated.is_empty() && deleted.is_empty() {
            Some(SyncMessage::batch_created(written))
        } else {
            Some(SyncMessage::synced(store.list()))
        };

        debug!(
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            failed = summary.failed.len(),
            repaired = repaired.modified.len(),
            "Applied action batch"
        );

        Ok(BatchOutcome { summary, event })
    }

    fn apply_one(
        &self,
        action: Action,
        working: &mut HashMap<String, Element>,
        created: &mut Vec<String>,
        updated: &mut BTreeSet<String>,
        deleted: &mut Vec<String>,
    ) -> Result<()> {
        match action {
            Action::AddShape(element) | Action::AddText(element) | Action::AddArrow(element) => {
                let mut element = element;
                element.apply_defaults();
                match working.get(&element.id) {
                    // A second create with a known id is an update.
                    Some(existing) => {
                        element.created_at = existing.created_at;
                        element.version = existing.version;
                        element.stamp_updated(self.source);
                        if !created.contains(&element.id) {
                            updated.insert(element.id.clone());
                        }
                    }
                    None => {
                        element.stamp_created(self.source);
                        deleted.retain(|id| *id != element.id);
                        created.push(element.id.clone());
                    }
                }
                working.insert(element.id.clone(), element);
            }
            Action::UpdateElement { id, patch } => {
                let existing = working
                    .get(&id)
                    .ok_or_else(|| ActionError::NotFound(id.clone()))?;
                let mut element = existing
                    .merge_patch(&patch)
                    .map_err(|e| ActionError::Validation(format!("updateElement {id}: {e}")))?;
                element.stamp_updated(self.source);
                if !created.contains(&id) {
                    updated.insert(id.clone());
                }
                working.insert(id, element);
            }
            Action::DeleteElement { id } => {
                if working.remove(&id).is_none() {
                    return Err(ActionError::NotFound(id));
                }
                let was_created = created.contains(&id);
                created.retain(|c| *c != id);
                updated.remove(&id);
                if !was_created {
                    deleted.push(id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sketch_sync_core::bindings::find_dangling;
    use sketch_sync_core::element::{ArrowEndpoint, ElementType};
    use sketch_sync_core::store::MemoryStore;

    fn add_rect(id: &str) -> RawAction {
        RawAction::new(
            "addShape",
            json!({"id": id, "type": "rectangle", "x": 100, "y": 100, "width": 200, "height": 80}),
        )
    }

    #[test]
    fn test_shape_and_label_in_one_batch() {
        let mut store = MemoryStore::new();
        let actions = vec![
            add_rect("rect-1"),
            RawAction::new(
                "addText",
                json!({
                    "type": "text", "x": 110, "y": 120, "width": 180, "height": 40,
                    "text": "API Gateway", "fontSize": 20, "containerId": "rect-1",
                }),
            ),
        ];

        let outcome = ActionTranslator::default()
            .apply(&mut store, &actions, "Added the gateway")
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(outcome.summary.created, 2);
        assert_eq!(outcome.summary.element_count, 2);
        assert_eq!(outcome.summary.explanation, "Added the gateway");

        let text = store
            .list()
            .into_iter()
            .find(|e| e.element_type == ElementType::Text)
            .unwrap();
        assert_eq!(text.container_id.as_deref(), Some("rect-1"));
        let rect = store.get("rect-1").unwrap();
        assert_eq!(rect.bound_entries().len(), 1);
        assert_eq!(rect.bound_entries()[0].id, text.id);

        match outcome.event {
            Some(SyncMessage::ElementsBatchCreated { elements, .. }) => {
                assert_eq!(elements.len(), 2);
                assert_eq!(elements[0].id, "rect-1");
            }
            other => panic!("expected one batch event, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_update_target_is_reported() {
        let mut store = MemoryStore::new();
        let actions = vec![
            RawAction::new("updateElement", json!({"id": "missing-id", "x": 0, "y": 0})),
            add_rect("r1"),
        ];
        let outcome = ActionTranslator::default()
            .apply(&mut store, &actions, "")
            .unwrap();

        assert_eq!(outcome.summary.succeeded(), 1);
        assert_eq!(outcome.summary.not_found(), 1);
        assert_eq!(outcome.summary.failed[0].index, 0);
        assert_eq!(store.len(), 1);
        assert!(store.get("r1").is_some());
    }

    #[test]
    fn test_invalid_action_does_not_abort_batch() {
        let mut store = MemoryStore::new();
        let actions = vec![
            RawAction::new("addShape", json!({"type": "rectangle", "x": 0, "y": 0})),
            add_rect("r1"),
        ];
        let outcome = ActionTranslator::default()
            .apply(&mut store, &actions, "")
            .unwrap();
        assert_eq!(outcome.summary.created, 1);
        assert_eq!(outcome.summary.failed[0].kind, "validation");
        assert!(outcome.summary.failed[0].message.contains("width"));
    }

    #[test]
    fn test_defaults_applied_on_create() {
        let mut store = MemoryStore::new();
        ActionTranslator::default()
            .apply(&mut store, &[add_rect("r1")], "")
            .unwrap();
        let rect = store.get("r1").unwrap();
        assert_eq!(rect.stroke_color.as_deref(), Some("#1e1e1e"));
        assert_eq!(rect.sync_source, Some(SyncSource::Agent));
        assert_eq!(rect.version, Some(1));
    }

    #[test]
    fn test_delete_repairs_arrow_start() {
        let mut store = MemoryStore::new();
        let translator = ActionTranslator::default();
        translator
            .apply(
                &mut store,
                &[
                    add_rect("x"),
                    add_rect("y"),
                    RawAction::new(
                        "addArrow",
                        json!({
                            "id": "a1", "type": "arrow", "x": 0, "y": 0,
                            "points": [[0, 0], [100, 0]],
                            "start": {"id": "x"}, "end": {"id": "y"},
                        }),
                    ),
                ],
                "",
            )
            .unwrap();
        assert_eq!(store.get("a1").unwrap().start, Some(ArrowEndpoint::new("x")));

        let outcome = translator
            .apply(
                &mut store,
                &[RawAction::new("deleteElement", json!({"id": "x"}))],
                "",
            )
            .unwrap();

        let arrow = store.get("a1").unwrap();
        assert!(arrow.start.is_none());
        assert_eq!(arrow.end, Some(ArrowEndpoint::new("y")));
        assert!(store.get("x").is_none());
        assert_eq!(outcome.summary.deleted, 1);
        assert!(matches!(outcome.event, Some(SyncMessage::ElementsSynced { .. })));
        assert!(find_dangling(&store.list()).is_empty());
    }

    #[test]
    fn test_cross_batch_reference_to_uncommitted_id_is_dropped() {
        let mut store = MemoryStore::new();
        let translator = ActionTranslator::default();
        let arrow_to = |id: &str, target: &str| {
            RawAction::new(
                "addArrow",
                json!({
                    "id": id, "type": "arrow", "x": 0, "y": 0,
                    "points": [[0, 0], [50, 50]], "end": {"id": target},
                }),
            )
        };

        // First batch points at a shape that only the second batch creates.
        translator
            .apply(&mut store, &[add_rect("a-rect"), arrow_to("a-arrow", "b-rect")], "")
            .unwrap();
        assert!(store.get("a-arrow").unwrap().end.is_none());

        // Second batch points at a shape from a batch that has not been committed.
        translator
            .apply(&mut store, &[add_rect("b-rect"), arrow_to("b-arrow", "c-rect")], "")
            .unwrap();
        assert!(store.get("b-arrow").unwrap().end.is_none());
        assert!(store.get("a-arrow").unwrap().end.is_none());
    }

    #[test]
    fn test_update_merges_fields() {
        let mut store = MemoryStore::new();
        let translator = ActionTranslator::default();
        translator.apply(&mut store, &[add_rect("r1")], "").unwrap();
        let outcome = translator
            .apply(
                &mut store,
                &[RawAction::new(
                    "updateElement",
                    json!({"id": "r1", "backgroundColor": "#ffc9c9"}),
                )],
                "",
            )
            .unwrap();
        let rect = store.get("r1").unwrap();
        assert_eq!(rect.background_color.as_deref(), Some("#ffc9c9"));
        assert_eq!(rect.width, Some(200.0));
        assert_eq!(rect.version, Some(2));
        assert_eq!(outcome.summary.updated, 1);
    }

    #[test]
    fn test_duplicate_create_is_update() {
        let mut store = MemoryStore::new();
        let translator = ActionTranslator::default();
        translator.apply(&mut store, &[add_rect("r1")], "").unwrap();
        let outcome = translator.apply(&mut store, &[add_rect("r1")], "").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(outcome.summary.created, 0);
        assert_eq!(outcome.summary.updated, 1);
    }

    #[test]
    fn test_create_then_delete_in_same_batch() {
        let mut store = MemoryStore::new();
        let outcome = ActionTranslator::default()
            .apply(
                &mut store,
                &[add_rect("tmp"), RawAction::new("deleteElement", json!({"id": "tmp"}))],
                "",
            )
            .unwrap();
        assert!(store.is_empty());
        assert_eq!(outcome.summary.created, 0);
        assert_eq!(outcome.summary.deleted, 0);
        assert!(outcome.event.is_none());
    }

    #[test]
    fn test_all_failed_batch_emits_nothing() {
        let mut store = MemoryStore::new();
        let outcome = ActionTranslator::default()
            .apply(
                &mut store,
                &[RawAction::new("deleteElement", json!({"id": "ghost"}))],
                "",
            )
            .unwrap();
        assert!(outcome.event.is_none());
        assert_eq!(outcome.summary.not_found(), 1);
    }
}
