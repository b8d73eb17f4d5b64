//! The document root: owner of every element, indexed by creation stamp.

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};

use super::nodes::{CrdtElement, ObjectNode};
use crate::time::{TimeTicket, INITIAL_TIME_TICKET};

/// Every element of one replica of a document.
///
/// Elements are never dropped. Removing an element tombstones it and records
/// it in the removed set, so operations that still reference it resolve.
#[derive(Debug, Clone)]
pub struct DocumentRoot {
    elements: HashMap<TimeTicket, CrdtElement>,
    /// child created_at → parent created_at
    parents: HashMap<TimeTicket, TimeTicket>,
    removed: BTreeSet<TimeTicket>,
}

impl Default for DocumentRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentRoot {
    /// Creates a document holding an empty root object stamped
    /// `INITIAL_TIME_TICKET`.
    pub fn new() -> Self {
        let mut elements = HashMap::new();
        elements.insert(
            INITIAL_TIME_TICKET,
            CrdtElement::Object(ObjectNode::new(INITIAL_TIME_TICKET)),
        );
        Self { elements, parents: HashMap::new(), removed: BTreeSet::new() }
    }

    pub fn root_created_at(&self) -> TimeTicket {
        INITIAL_TIME_TICKET
    }

    /// Finds an element, tombstoned or not.
    pub fn find_by_created_at(&self, created_at: &TimeTicket) -> Option<&CrdtElement> {
        self.elements.get(created_at)
    }

    pub fn find_by_created_at_mut(&mut self, created_at: &TimeTicket) -> Option<&mut CrdtElement> {
        self.elements.get_mut(created_at)
    }

    /// Finds an element that neither it nor any of its ancestors was removed.
    pub fn find_live_by_created_at(&self, created_at: &TimeTicket) -> Option<&CrdtElement> {
        let element = self.elements.get(created_at)?;
        let mut cur = *created_at;
        loop {
            if self.elements.get(&cur)?.is_removed() {
                return None;
            }
            match self.parents.get(&cur) {
                Some(parent) => cur = *parent,
                None => return Some(element),
            }
        }
    }

    pub fn parent_of(&self, created_at: &TimeTicket) -> Option<TimeTicket> {
        self.parents.get(created_at).copied()
    }

    /// Adds `element` as a child of `parent`. Registering an existing stamp
    /// is a no-op.
    pub fn register_element(&mut self, element: CrdtElement, parent: TimeTicket) {
        let created_at = element.created_at();
        if self.elements.contains_key(&created_at) {
            return;
        }
        self.parents.insert(created_at, parent);
        self.elements.insert(created_at, element);
    }

    pub fn register_removed_element(&mut self, created_at: TimeTicket) {
        self.removed.insert(created_at);
    }

    pub fn contains(&self, created_at: &TimeTicket) -> bool {
        self.elements.contains_key(created_at)
    }

    /// Number of elements, the root and tombstones included.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn removed_element_count(&self) -> usize {
        self.removed.len()
    }

    pub fn removed_elements(&self) -> impl Iterator<Item = &TimeTicket> + '_ {
        self.removed.iter()
    }

    /// JSON view of the document. Removed elements are left out and object
    /// keys are sorted.
    pub fn to_json(&self) -> Value {
        self.element_json(&INITIAL_TIME_TICKET).unwrap_or(Value::Null)
    }

    /// Stable diagnostic rendering of every element's state, ordered by
    /// creation stamp.
    pub fn annotated(&self) -> String {
        let mut stamps: Vec<&TimeTicket> = self.elements.keys().collect();
        stamps.sort();
        let mut out = String::new();
        for created_at in stamps {
            let element = &self.elements[created_at];
            let body = match element {
                CrdtElement::PlainText(text) => text.annotated(),
                CrdtElement::RichText(text) => text.annotated(),
                other => self.element_json(created_at).map_or_else(
                    || other.kind().to_string(),
                    |v| v.to_string(),
                ),
            };
            let removed = element
                .removed_at()
                .map_or_else(String::new, |t| format!(" removed@{}", t));
            out.push_str(&format!("{} {}{}\n", created_at, body, removed));
        }
        out
    }

    fn element_json(&self, created_at: &TimeTicket) -> Option<Value> {
        let element = self.elements.get(created_at)?;
        if element.is_removed() {
            return None;
        }
        let value = match element {
            CrdtElement::Primitive(p) => p.value.clone(),
            CrdtElement::Object(obj) => {
                let mut members: Vec<(&str, TimeTicket)> = obj.winners().collect();
                members.sort_by(|a, b| a.0.cmp(b.0));
                let mut map = Map::new();
                for (key, child) in members {
                    if let Some(v) = self.element_json(&child) {
                        map.insert(key.to_string(), v);
                    }
                }
                Value::Object(map)
            }
            CrdtElement::Array(arr) => Value::Array(
                arr.elements()
                    .filter_map(|e| self.element_json(&e.created_at))
                    .collect(),
            ),
            CrdtElement::PlainText(text) => text.to_json(),
            CrdtElement::RichText(text) => text.to_json(),
        };
        Some(value)
    }
}
