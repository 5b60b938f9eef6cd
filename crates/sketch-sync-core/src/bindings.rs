//! Binding integrity: keeps weak references between elements valid.
//!
//! Both functions here are pure transforms over a *candidate set*: the
//! elements about to be committed, plus whatever already-committed elements
//! the caller wants references to resolve against. A reference is valid only
//! if its target id is in that same set.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::element::{BoundElement, BoundElements, BoundKind, Element, ElementType};

/// Ids of the elements a pass modified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub modified: BTreeSet<String>,
}

impl RepairReport {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modified.contains(id)
    }

    pub fn merge(&mut self, other: RepairReport) {
        self.modified.extend(other.modified);
    }
}

/// A weak reference that does not resolve inside a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingRef {
    pub from: String,
    pub field: &'static str,
    pub target: String,
}

/// Drop every weak reference that does not resolve within `elements`.
///
/// - malformed `boundElements` is cleared entirely
/// - unresolved `boundElements` entries are dropped one by one
/// - unresolved `containerId`, `start` and `end` are cleared
pub fn check_bindings(elements: &mut [Element]) -> RepairReport {
    let ids: HashSet<String> = elements.iter().map(|e| e.id.clone()).collect();
    let mut report = RepairReport::default();

    for el in elements.iter_mut() {
        let mut changed = false;

        match el.bound_elements.take() {
            Some(BoundElements::Malformed(_)) => changed = true,
            Some(BoundElements::Valid(mut entries)) => {
                let before = entries.len();
                entries.retain(|b| b.id != el.id && ids.contains(&b.id));
                changed |= entries.len() != before;
                el.bound_elements = Some(BoundElements::Valid(entries));
            }
            None => {}
        }

        if el
            .container_id
            .as_ref()
            .is_some_and(|c| *c == el.id || !ids.contains(c))
        {
            el.container_id = None;
            changed = true;
        }
        if el.start.as_ref().is_some_and(|s| !ids.contains(&s.id)) {
            el.start = None;
            changed = true;
        }
        if el.end.as_ref().is_some_and(|e| !ids.contains(&e.id)) {
            el.end = None;
            changed = true;
        }

        if changed {
            report.modified.insert(el.id.clone());
        }
    }

    report
}

/// Add the reverse `boundElements` entries for resolved text containers and
/// arrow endpoints. Idempotent; never duplicates an entry.
pub fn link_bindings(elements: &mut [Element]) -> RepairReport {
    let index: HashMap<String, usize> = elements
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.clone(), i))
        .collect();

    let mut links: Vec<(usize, BoundElement)> = Vec::new();
    for el in elements.iter() {
        if el.element_type == ElementType::Text {
            if let Some(&target) = el.container_id.as_ref().and_then(|c| index.get(c)) {
                links.push((target, BoundElement::new(el.id.clone(), BoundKind::Text)));
            }
        }
        for endpoint in [&el.start, &el.end].into_iter().flatten() {
            if let Some(&target) = index.get(&endpoint.id) {
                links.push((target, BoundElement::new(el.id.clone(), BoundKind::Arrow)));
            }
        }
    }

    let mut report = RepairReport::default();
    for (target, entry) in links {
        let target_el = &mut elements[target];
        if target_el.id == entry.id {
            continue;
        }
        let mut entries = match target_el.bound_elements.take() {
            Some(BoundElements::Valid(entries)) => entries,
            _ => Vec::new(),
        };
        if !entries.iter().any(|b| b.id == entry.id) {
            entries.push(entry);
            report.modified.insert(target_el.id.clone());
        }
        target_el.bound_elements = Some(BoundElements::Valid(entries));
    }
    report
}

/// Check then link. This is what every commit path runs.
pub fn normalize_bindings(elements: &mut [Element]) -> RepairReport {
    let mut report = check_bindings(elements);
    report.merge(link_bindings(elements));
    report
}

/// List every unresolved weak reference in `elements`.
pub fn find_dangling(elements: &[Element]) -> Vec<DanglingRef> {
    let ids: HashSet<&str> = elements.iter().map(|e| e.id.as_str()).collect();
    let mut dangling = Vec::new();
    for el in elements {
        let mut push = |field: &'static str, target: &str| {
            if !ids.contains(target) {
                dangling.push(DanglingRef {
                    from: el.id.clone(),
                    field,
                    target: target.to_string(),
                });
            }
        };
        for b in el.bound_entries() {
            push("boundElements", &b.id);
        }
        if let Some(c) = &el.container_id {
            push("containerId", c);
        }
        if let Some(s) = &el.start {
            push("start", &s.id);
        }
        if let Some(e) = &el.end {
            push("end", &e.id);
        }
    }
    dangling
}
