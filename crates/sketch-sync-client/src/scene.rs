//! Local scene state held by a viewer.

use std::ops::Deref;

use sketch_sync_core::bindings::{RepairReport, normalize_bindings};
use sketch_sync_core::element::Element;
use sketch_sync_core::protocol::Viewport;

/// An element as the renderer sees it: same id and attributes, no sync
/// bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneElement(Element);

impl SceneElement {
    pub fn from_element(mut element: Element) -> Self {
        element.strip_bookkeeping();
        Self(element)
    }

    pub fn into_element(self) -> Element {
        self.0
    }
}

impl Deref for SceneElement {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.0
    }
}

/// Ordered element list plus the current viewport.
#[derive(Debug, Default, Clone)]
pub struct LocalScene {
    elements: Vec<SceneElement>,
    viewport: Viewport,
}

impl LocalScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elements(&self) -> &[SceneElement] {
        &self.elements
    }

    pub fn get(&self, id: &str) -> Option<&SceneElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Replace everything. A repeated id is kept once, with its last value.
    /// Returns the new element count.
    pub fn replace(&mut self, elements: Vec<Element>) -> usize {
        self.elements.clear();
        for element in elements {
            self.upsert(element);
        }
        self.elements.len()
    }

    /// Insert or replace by id, keeping the original position on replace.
    /// Returns whether the id was already present.
    pub fn upsert(&mut self, element: Element) -> bool {
        let element = SceneElement::from_element(element);
        match self.elements.iter_mut().find(|e| e.id == element.id) {
            Some(slot) => {
                *slot = element;
                true
            }
            None => {
                self.elements.push(element);
                false
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<SceneElement> {
        let pos = self.elements.iter().position(|e| e.id == id)?;
        Some(self.elements.remove(pos))
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    /// Resolve bindings across the whole scene.
    pub fn normalize(&mut self) -> RepairReport {
        let mut elements: Vec<Element> = std::mem::take(&mut self.elements)
            .into_iter()
            .map(SceneElement::into_element)
            .collect();
        let report = normalize_bindings(&mut elements);
        self.elements = elements.into_iter().map(SceneElement).collect();
        report
    }
}
