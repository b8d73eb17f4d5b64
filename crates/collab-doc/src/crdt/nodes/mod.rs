//! CRDT element types.
//!
//! | Rust type     | Semantics                                        |
//! |---------------|--------------------------------------------------|
//! | `Primitive`   | Immutable JSON scalar                            |
//! | `ObjectNode`  | Key → element map, greatest `created_at` wins    |
//! | `ArrayNode`   | RGA list of element slots, latest move shown     |
//! | `PlainText`   | RGA split text                                   |
//! | `RichText`    | RGA split text with per-segment attributes       |
//!
//! Containers only hold the creation stamps of their children. The elements
//! themselves are owned by [`DocumentRoot`](crate::crdt::root::DocumentRoot).

pub mod rga_split;
pub mod text;

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OperationError, Result};
use crate::time::{TimeTicket, INITIAL_TIME_TICKET};
pub use text::{PlainText, RichText};

// ── Primitive ─────────────────────────────────────────────────────────────

/// An immutable JSON value.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub created_at: TimeTicket,
    pub removed_at: Option<TimeTicket>,
    pub value: Value,
}

impl Primitive {
    pub fn new(created_at: TimeTicket, value: Value) -> Self {
        Self { created_at, removed_at: None, value }
    }
}

// ── ObjectNode ────────────────────────────────────────────────────────────

/// A map from keys to elements.
///
/// Every element ever set under a key is remembered; the one with the
/// greatest `created_at` is the visible value. Shadowed elements stay
/// resolvable so that late operations on them still apply.
#[derive(Debug, Clone)]
pub struct ObjectNode {
    pub created_at: TimeTicket,
    pub removed_at: Option<TimeTicket>,
    /// key → element stamps, ascending
    members: IndexMap<String, Vec<TimeTicket>>,
}

impl ObjectNode {
    pub fn new(created_at: TimeTicket) -> Self {
        Self { created_at, removed_at: None, members: IndexMap::new() }
    }

    /// Records `created_at` under `key`.
    ///
    /// Returns the previous winner if `created_at` replaced it. Setting the
    /// same element twice is a no-op.
    pub fn set(&mut self, key: &str, created_at: TimeTicket) -> Option<TimeTicket> {
        let stamps = self.members.entry(key.to_string()).or_default();
        let Err(at) = stamps.binary_search(&created_at) else {
            return None;
        };
        let prev = stamps.last().copied();
        stamps.insert(at, created_at);
        if at == stamps.len() - 1 {
            prev
        } else {
            None
        }
    }

    /// The winning element under `key`.
    pub fn get(&self, key: &str) -> Option<TimeTicket> {
        self.members.get(key).and_then(|s| s.last().copied())
    }

    /// The key `created_at` was set under.
    pub fn key_of(&self, created_at: &TimeTicket) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, stamps)| stamps.binary_search(created_at).is_ok())
            .map(|(k, _)| k.as_str())
    }

    pub fn has_member(&self, created_at: &TimeTicket) -> bool {
        self.key_of(created_at).is_some()
    }

    /// Winning element of every key, in first-set order.
    pub fn winners(&self) -> impl Iterator<Item = (&str, TimeTicket)> + '_ {
        self.members
            .iter()
            .filter_map(|(k, s)| s.last().map(|t| (k.as_str(), *t)))
    }
}

// ── ArrayNode ─────────────────────────────────────────────────────────────

/// One slot of an [`ArrayNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayEntry {
    /// The element held by this slot.
    pub created_at: TimeTicket,
    /// Stamp of the insertion or move that created the slot. Names the slot
    /// as a position.
    pub positioned_at: TimeTicket,
}

/// RGA list of element references.
///
/// Every insertion and every move creates a slot named by its stamp. Slots
/// are never taken out of the list: an element is shown at the slot of its
/// latest move, and the slots it left behind stay as anchors for concurrent
/// insertions that followed them. `INITIAL_TIME_TICKET` names the start of
/// the list.
#[derive(Debug, Clone)]
pub struct ArrayNode {
    pub created_at: TimeTicket,
    pub removed_at: Option<TimeTicket>,
    entries: Vec<ArrayEntry>,
    /// element → slot it is shown at
    current: BTreeMap<TimeTicket, TimeTicket>,
}

impl ArrayNode {
    pub fn new(created_at: TimeTicket) -> Self {
        Self { created_at, removed_at: None, entries: Vec::new(), current: BTreeMap::new() }
    }

    /// Every slot in list order, superseded ones included.
    pub fn entries(&self) -> &[ArrayEntry] {
        &self.entries
    }

    /// The slots elements are shown at, in list order.
    pub fn elements(&self) -> impl Iterator<Item = &ArrayEntry> + '_ {
        self.entries.iter().filter(|e| self.is_current(e))
    }

    pub fn is_current(&self, entry: &ArrayEntry) -> bool {
        self.current.get(&entry.created_at) == Some(&entry.positioned_at)
    }

    pub fn contains(&self, created_at: &TimeTicket) -> bool {
        self.current.contains_key(created_at)
    }

    /// The slot `created_at` is shown at.
    pub fn slot_of(&self, created_at: &TimeTicket) -> Option<TimeTicket> {
        self.current.get(created_at).copied()
    }

    fn position(&self, positioned_at: &TimeTicket) -> Option<usize> {
        self.entries.iter().position(|e| e.positioned_at == *positioned_at)
    }

    /// Index right after the slot `prev`, before any neighbour positioned
    /// after `executed_at`.
    fn insertion_point(&self, prev: &TimeTicket, executed_at: &TimeTicket) -> Result<usize> {
        let mut at = if *prev == INITIAL_TIME_TICKET {
            0
        } else {
            self.position(prev)
                .map(|i| i + 1)
                .ok_or(OperationError::MissingAncestor(*prev))?
        };
        while at < self.entries.len() && self.entries[at].positioned_at.after(executed_at) {
            at += 1;
        }
        Ok(at)
    }

    /// Checks that `prev` names the start of the list or one of its slots.
    pub fn check_prev(&self, prev: &TimeTicket) -> Result<()> {
        if *prev == INITIAL_TIME_TICKET || self.position(prev).is_some() {
            Ok(())
        } else {
            Err(OperationError::MissingAncestor(*prev))
        }
    }

    /// Inserts `created_at` in a new slot after the slot `prev`. Returns
    /// `false` if the element is already in the list.
    pub fn insert_after(
        &mut self,
        prev: &TimeTicket,
        created_at: TimeTicket,
        executed_at: TimeTicket,
    ) -> Result<bool> {
        if self.contains(&created_at) {
            return Ok(false);
        }
        let at = self.insertion_point(prev, &executed_at)?;
        self.entries.insert(at, ArrayEntry { created_at, positioned_at: executed_at });
        self.current.insert(created_at, executed_at);
        Ok(true)
    }

    /// Moves `created_at` into a new slot after the slot `prev`.
    ///
    /// The slot is created whatever the order of arrival; the element is
    /// shown at it only if this is its latest move. Returns whether the
    /// element is now shown at the new slot. Replays change nothing.
    pub fn move_after(
        &mut self,
        prev: &TimeTicket,
        created_at: &TimeTicket,
        executed_at: TimeTicket,
    ) -> Result<bool> {
        self.check_prev(prev)?;
        let shown_at = self
            .slot_of(created_at)
            .ok_or(OperationError::MissingAncestor(*created_at))?;
        if self.position(&executed_at).is_some() {
            return Ok(false);
        }
        let at = self.insertion_point(prev, &executed_at)?;
        self.entries.insert(
            at,
            ArrayEntry { created_at: *created_at, positioned_at: executed_at },
        );
        if executed_at.after(&shown_at) {
            self.current.insert(*created_at, executed_at);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

// ── CrdtElement ───────────────────────────────────────────────────────────

/// All element types a document can hold.
#[derive(Debug, Clone)]
pub enum CrdtElement {
    Primitive(Primitive),
    Object(ObjectNode),
    Array(ArrayNode),
    PlainText(PlainText),
    RichText(RichText),
}

impl CrdtElement {
    pub fn created_at(&self) -> TimeTicket {
        match self {
            Self::Primitive(n) => n.created_at,
            Self::Object(n) => n.created_at,
            Self::Array(n) => n.created_at,
            Self::PlainText(n) => n.created_at,
            Self::RichText(n) => n.created_at,
        }
    }

    pub fn removed_at(&self) -> Option<TimeTicket> {
        match self {
            Self::Primitive(n) => n.removed_at,
            Self::Object(n) => n.removed_at,
            Self::Array(n) => n.removed_at,
            Self::PlainText(n) => n.removed_at,
            Self::RichText(n) => n.removed_at,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at().is_some()
    }

    /// Tombstones the element at `removed_at`.
    ///
    /// The tombstone only ever moves to a later stamp; returns `false` if it
    /// did not move.
    pub fn remove(&mut self, removed_at: TimeTicket) -> bool {
        let slot = match self {
            Self::Primitive(n) => &mut n.removed_at,
            Self::Object(n) => &mut n.removed_at,
            Self::Array(n) => &mut n.removed_at,
            Self::PlainText(n) => &mut n.removed_at,
            Self::RichText(n) => &mut n.removed_at,
        };
        if slot.is_some_and(|existing| !removed_at.after(&existing)) {
            return false;
        }
        *slot = Some(removed_at);
        true
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Primitive(_) => "primitive",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::PlainText(_) => "text",
            Self::RichText(_) => "rich text",
        }
    }
}

// ── ElementValue ──────────────────────────────────────────────────────────

/// Seed of a new element, as carried by `Set` and `Add` operations.
///
/// Containers always start empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementValue {
    Primitive { created_at: TimeTicket, value: Value },
    Object { created_at: TimeTicket },
    Array { created_at: TimeTicket },
    PlainText { created_at: TimeTicket },
    RichText { created_at: TimeTicket },
}

impl ElementValue {
    pub fn created_at(&self) -> TimeTicket {
        match self {
            Self::Primitive { created_at, .. }
            | Self::Object { created_at }
            | Self::Array { created_at }
            | Self::PlainText { created_at }
            | Self::RichText { created_at } => *created_at,
        }
    }

    pub fn to_element(&self) -> CrdtElement {
        match self {
            Self::Primitive { created_at, value } => {
                CrdtElement::Primitive(Primitive::new(*created_at, value.clone()))
            }
            Self::Object { created_at } => CrdtElement::Object(ObjectNode::new(*created_at)),
            Self::Array { created_at } => CrdtElement::Array(ArrayNode::new(*created_at)),
            Self::PlainText { created_at } => CrdtElement::PlainText(PlainText::new(*created_at)),
            Self::RichText { created_at } => CrdtElement::RichText(RichText::new(*created_at)),
        }
    }

    /// Short form used in annotated operations.
    pub fn annotated(&self) -> String {
        match self {
            Self::Primitive { value, .. } => value.to_string(),
            Self::Object { .. } => "{}".to_string(),
            Self::Array { .. } => "[]".to_string(),
            Self::PlainText { .. } => "Text".to_string(),
            Self::RichText { .. } => "RichText".to_string(),
        }
    }
}
