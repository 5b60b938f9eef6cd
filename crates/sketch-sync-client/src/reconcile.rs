//! Applies server events to a [`LocalScene`].
//!
//! Every event the server sends is applied as `Origin::Remote` and is never
//! sent back. Local edits are applied optimistically, tagged `Origin::Local`,
//! and turned into exactly one outbound frame. The server echoes committed
//! edits to everyone including the editor, so the echo simply overwrites the
//! optimistic copy with the authoritative one.

use tracing::debug;

use sketch_sync_core::bindings::RepairReport;
use sketch_sync_core::element::Element;
use sketch_sync_core::protocol::{SyncMessage, Viewport};

use crate::error::{ClientError, Result};
use crate::scene::{LocalScene, SceneElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Requests only the embedding renderer can act on.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererRequest {
    ExportImage { request_id: String, format: String },
    MermaidConvert { diagram: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneChange {
    /// Whole scene replaced (snapshot or full sync).
    Replaced { count: usize },
    Added(SceneElement),
    Updated(SceneElement),
    Removed { id: String },
    Cleared,
    Viewport(Viewport),
    RendererRequest(RendererRequest),
    /// Server's element count, in reply to a status request.
    Status { count: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneEvent {
    pub origin: Origin,
    pub change: SceneChange,
}

impl SceneEvent {
    fn remote(change: SceneChange) -> Self {
        Self {
            origin: Origin::Remote,
            change,
        }
    }

    fn local(change: SceneChange) -> Self {
        Self {
            origin: Origin::Local,
            change,
        }
    }
}

/// A user edit made in the local renderer.
#[derive(Debug, Clone)]
pub enum LocalEdit {
    Create(Element),
    Update(Element),
    Delete(String),
}

#[derive(Debug, Default)]
pub struct Reconciler {
    scene: LocalScene,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scene(&self) -> &LocalScene {
        &self.scene
    }

    /// Apply one server frame. Applying the same frame twice leaves the
    /// scene as applying it once.
    pub fn apply(&mut self, msg: SyncMessage) -> Vec<SceneEvent> {
        match msg {
            SyncMessage::InitialElements { elements, .. }
            | SyncMessage::ElementsSynced { elements, .. } => {
                let count = self.scene.replace(elements);
                self.scene.normalize();
                debug!(count, "Scene replaced");
                vec![SceneEvent::remote(SceneChange::Replaced { count })]
            }
            SyncMessage::ElementCreated { element, .. }
            | SyncMessage::ElementUpdated { element, .. } => {
                self.upsert_all(vec![element], Origin::Remote)
            }
            SyncMessage::ElementsBatchCreated { elements, .. } => {
                self.upsert_all(elements, Origin::Remote)
            }
            SyncMessage::ElementDeleted { element_id, .. } => {
                self.remove(&element_id, Origin::Remote)
            }
            SyncMessage::CanvasCleared { .. } => {
                self.scene.clear();
                vec![SceneEvent::remote(SceneChange::Cleared)]
            }
            SyncMessage::SetViewport { viewport, .. } => {
                self.scene.set_viewport(viewport);
                vec![SceneEvent::remote(SceneChange::Viewport(viewport))]
            }
            SyncMessage::MermaidConvert {
                mermaid_diagram, ..
            } => vec![SceneEvent::remote(SceneChange::RendererRequest(
                RendererRequest::MermaidConvert {
                    diagram: mermaid_diagram,
                },
            ))],
            SyncMessage::ExportImageRequest { request_id, format } => {
                vec![SceneEvent::remote(SceneChange::RendererRequest(
                    RendererRequest::ExportImage { request_id, format },
                ))]
            }
            SyncMessage::SyncStatus { count, .. } => vec![SceneEvent::remote(SceneChange::Status {
                count: count.unwrap_or(0),
            })],
        }
    }

    /// Apply a local edit and return its events. The first event is the
    /// edit itself; any further ones are binding repairs.
    pub fn local_edit(&mut self, edit: LocalEdit) -> Result<Vec<SceneEvent>> {
        match edit {
            LocalEdit::Create(element) => Ok(self.upsert_all(vec![element], Origin::Local)),
            LocalEdit::Update(element) => {
                if !self.scene.contains(&element.id) {
                    return Err(ClientError::UnknownElement(element.id));
                }
                Ok(self.upsert_all(vec![element], Origin::Local))
            }
            LocalEdit::Delete(id) => {
                let events = self.remove(&id, Origin::Local);
                if events.is_empty() {
                    return Err(ClientError::UnknownElement(id));
                }
                Ok(events)
            }
        }
    }

    /// Frame to send for `event`. Remote events never go back out, and
    /// repairs are left for the server to redo.
    pub fn outbound(event: &SceneEvent) -> Option<SyncMessage> {
        if event.origin != Origin::Local {
            return None;
        }
        match &event.change {
            SceneChange::Added(el) => Some(SyncMessage::created(Element::clone(el))),
            SceneChange::Updated(el) => Some(SyncMessage::updated(Element::clone(el))),
            SceneChange::Removed { id } => Some(SyncMessage::deleted(id.clone())),
            _ => None,
        }
    }

    fn upsert_all(&mut self, elements: Vec<Element>, origin: Origin) -> Vec<SceneEvent> {
        let mut needs_check = false;
        let mut applied = Vec::with_capacity(elements.len());
        for element in elements {
            needs_check |= element.has_bindings()
                || self.scene.get(&element.id).is_some_and(|e| e.has_bindings());
            let id = element.id.clone();
            let existed = self.scene.upsert(element);
            applied.push((id, existed));
        }

        let report = if needs_check {
            self.scene.normalize()
        } else {
            RepairReport::default()
        };

        let mut events = Vec::new();
        for (id, existed) in &applied {
            if let Some(el) = self.scene.get(id) {
                let change = if *existed {
                    SceneChange::Updated(el.clone())
                } else {
                    SceneChange::Added(el.clone())
                };
                events.push(SceneEvent { origin, change });
            }
        }
        events.extend(self.repairs(&report, &applied));
        events
    }

    fn remove(&mut self, id: &str, origin: Origin) -> Vec<SceneEvent> {
        if self.scene.remove(id).is_none() {
            return Vec::new();
        }
        let report = self.scene.normalize();
        let mut events = vec![SceneEvent {
            origin,
            change: SceneChange::Removed { id: id.to_string() },
        }];
        events.extend(self.repairs(&report, &[]));
        events
    }

    /// Repairs are consequences of the scene rule, never user intent, so
    /// they are always tagged remote.
    fn repairs(&self, report: &RepairReport, skip: &[(String, bool)]) -> Vec<SceneEvent> {
        report
            .modified
            .iter()
            .filter(|id| !skip.iter().any(|(s, _)| s == *id))
            .filter_map(|id| self.scene.get(id))
            .map(|el| SceneEvent::remote(SceneChange::Updated(el.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketch_sync_core::bindings::find_dangling;
    use sketch_sync_core::element::{ElementType, SyncSource};

    fn rect(id: &str) -> Element {
        Element::new(id, ElementType::Rectangle, 0.0, 0.0).with_size(100.0, 80.0)
    }

    fn scene_elements(r: &Reconciler) -> Vec<Element> {
        r.scene()
            .elements()
            .iter()
            .cloned()
            .map(SceneElement::into_element)
            .collect()
    }

    #[test]
    fn test_snapshot_replaces_scene() {
        let mut r = Reconciler::new();
        r.apply(SyncMessage::created(rect("old")));
        let events = r.apply(SyncMessage::initial(vec![rect("a"), rect("b")]));
        assert_eq!(events, vec![SceneEvent::remote(SceneChange::Replaced { count: 2 })]);
        assert!(!r.scene().contains("old"));
        assert_eq!(r.scene().len(), 2);
    }

    #[test]
    fn test_remote_changes_have_no_outbound() {
        let mut r = Reconciler::new();
        let events = r.apply(SyncMessage::created(rect("a")));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin, Origin::Remote);
        assert!(Reconciler::outbound(&events[0]).is_none());
    }

    #[test]
    fn test_applying_update_twice_is_idempotent() {
        let mut r = Reconciler::new();
        r.apply(SyncMessage::created(rect("a")));
        let mut moved = rect("a");
        moved.x = 42.0;
        moved.stamp_updated(SyncSource::Api);

        r.apply(SyncMessage::updated(moved.clone()));
        let once = scene_elements(&r);
        r.apply(SyncMessage::updated(moved));
        assert_eq!(scene_elements(&r), once);
        assert_eq!(r.scene().get("a").unwrap().x, 42.0);
    }

    #[test]
    fn test_batch_links_bindings_across_scene() {
        let mut r = Reconciler::new();
        let label = Element::new("label", ElementType::Text, 10.0, 10.0)
            .with_text("API Gateway")
            .with_container("gw");
        let events = r.apply(SyncMessage::batch_created(vec![rect("gw"), label]));
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e.change, SceneChange::Added(_))));

        let gw = r.scene().get("gw").unwrap();
        assert_eq!(gw.bound_entries().len(), 1);
        assert_eq!(gw.bound_entries()[0].id, "label");
    }

    #[test]
    fn test_delete_repairs_and_is_idempotent() {
        let mut r = Reconciler::new();
        let arrow = Element::new("arr", ElementType::Arrow, 0.0, 0.0)
            .with_points(vec![[0.0, 0.0], [50.0, 0.0]])
            .with_endpoints(Some("x"), Some("y"));
        r.apply(SyncMessage::initial(vec![rect("x"), rect("y"), arrow]));

        let events = r.apply(SyncMessage::deleted("x"));
        assert_eq!(
            events[0],
            SceneEvent::remote(SceneChange::Removed { id: "x".into() })
        );
        let arrow = r.scene().get("arr").unwrap();
        assert!(arrow.start.is_none());
        assert_eq!(arrow.end.as_ref().unwrap().id, "y");
        assert!(find_dangling(&scene_elements(&r)).is_empty());

        assert!(r.apply(SyncMessage::deleted("x")).is_empty());
    }

    #[test]
    fn test_local_edits_produce_one_outbound_frame() {
        let mut r = Reconciler::new();
        let events = r.local_edit(LocalEdit::Create(rect("mine"))).unwrap();
        assert_eq!(events[0].origin, Origin::Local);
        let frame = Reconciler::outbound(&events[0]).unwrap();
        assert_eq!(frame.kind(), "element_created");

        let mut moved = rect("mine");
        moved.y = 5.0;
        let events = r.local_edit(LocalEdit::Update(moved)).unwrap();
        assert_eq!(Reconciler::outbound(&events[0]).unwrap().kind(), "element_updated");

        let events = r.local_edit(LocalEdit::Delete("mine".into())).unwrap();
        assert_eq!(Reconciler::outbound(&events[0]).unwrap().kind(), "element_deleted");

        assert!(matches!(
            r.local_edit(LocalEdit::Delete("mine".into())),
            Err(ClientError::UnknownElement(_))
        ));
        assert!(r.local_edit(LocalEdit::Update(rect("ghost"))).is_err());
    }

    #[test]
    fn test_server_echo_overwrites_optimistic_copy() {
        let mut r = Reconciler::new();
        r.local_edit(LocalEdit::Create(rect("mine"))).unwrap();

        let mut committed = rect("mine");
        committed.apply_defaults();
        committed.stamp_created(SyncSource::Client);
        let events = r.apply(SyncMessage::created(committed));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].change, SceneChange::Updated(_)));
        assert_eq!(
            r.scene().get("mine").unwrap().stroke_color.as_deref(),
            Some("#1e1e1e")
        );
    }

    #[test]
    fn test_renderer_requests_and_viewport() {
        let mut r = Reconciler::new();
        let events = r.apply(SyncMessage::MermaidConvert {
            mermaid_diagram: "graph TD; A-->B".into(),
            timestamp: None,
        });
        assert!(matches!(
            &events[0].change,
            SceneChange::RendererRequest(RendererRequest::MermaidConvert { diagram }) if diagram.contains("A-->B")
        ));

        let viewport = Viewport {
            x: 10.0,
            y: 20.0,
            zoom: 2.0,
        };
        r.apply(SyncMessage::SetViewport {
            viewport,
            timestamp: None,
        });
        assert_eq!(r.scene().viewport(), viewport);
    }
}
