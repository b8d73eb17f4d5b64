//! Text containers: [`PlainText`] and [`RichText`].
//!
//! Both wrap an [`RgaSplit`] and expose the `*_internal` entry points used by
//! operations. They differ only in the segment payload: rich text carries a
//! replicated attribute table on every segment.
//!
//! Each container also remembers the latest selection of every actor. A
//! selection is presence information: it never changes content or
//! tombstones.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::rga_split::{CreatedAtMapByActor, NodePos, RgaSplit, SplitValue};
use crate::error::Result;
use crate::time::{ActorId, TimeTicket, INITIAL_TIME_TICKET};

/// Style attributes, in the order the editor supplied them.
pub type Attributes = IndexMap<String, String>;

// ── TextChange ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextChangeKind {
    Content,
    Selection,
    Style,
}

/// A visible effect of executing an operation on a text, in index terms.
///
/// Content changes of one operation are listed in the order an editor should
/// apply them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChange {
    pub kind: TextChangeKind,
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub content: Option<String>,
    pub attributes: Option<Attributes>,
}

impl TextChange {
    pub(crate) fn deletion(actor: ActorId, from: usize, to: usize) -> Self {
        Self {
            kind: TextChangeKind::Content,
            actor,
            from,
            to,
            content: None,
            attributes: None,
        }
    }

    fn selection(actor: ActorId, from: usize, to: usize) -> Self {
        Self {
            kind: TextChangeKind::Selection,
            actor,
            from,
            to,
            content: None,
            attributes: None,
        }
    }
}

// ── Selections ────────────────────────────────────────────────────────────

/// The selected range of one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub from: NodePos,
    pub to: NodePos,
    pub updated_at: TimeTicket,
}

/// Last-writer-wins selection per actor.
#[derive(Debug, Clone, Default)]
struct SelectionMap {
    by_actor: BTreeMap<ActorId, Selection>,
}

impl SelectionMap {
    fn update<V: SplitValue>(
        &mut self,
        rga: &RgaSplit<V>,
        from: &NodePos,
        to: &NodePos,
        updated_at: TimeTicket,
    ) -> Result<Option<TextChange>> {
        let (from_index, to_index) = rga.find_indexes_from_range(from, to)?;
        let actor = updated_at.actor;
        if let Some(prev) = self.by_actor.get(&actor) {
            if !prev.updated_at.before(&updated_at) {
                return Ok(None);
            }
        }
        self.by_actor.insert(actor, Selection { from: *from, to: *to, updated_at });
        Ok(Some(TextChange::selection(actor, from_index, to_index)))
    }

    fn get(&self, actor: &ActorId) -> Option<&Selection> {
        self.by_actor.get(actor)
    }
}

// ── Rht ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct RhtNode {
    value: String,
    updated_at: TimeTicket,
}

/// Replicated hash table: a last-writer-wins map from attribute name to
/// value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rht {
    nodes: IndexMap<String, RhtNode>,
}

impl Rht {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` unless a write at `updated_at` or later already happened.
    /// Returns `true` if the table changed.
    pub fn set(&mut self, key: &str, value: &str, updated_at: TimeTicket) -> bool {
        if let Some(node) = self.nodes.get(key) {
            if !updated_at.after(&node.updated_at) {
                return false;
            }
        }
        self.nodes.insert(
            key.to_string(),
            RhtNode { value: value.to_string(), updated_at },
        );
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.nodes.get(key).map(|n| n.value.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Key-sorted snapshot of the values.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.nodes
            .iter()
            .map(|(k, n)| (k.clone(), n.value.clone()))
            .collect()
    }
}

// ── RichTextValue ─────────────────────────────────────────────────────────

/// Payload of a rich text segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RichTextValue {
    pub content: String,
    pub attributes: Rht,
}

impl RichTextValue {
    pub fn new(content: &str) -> Self {
        Self { content: content.to_string(), attributes: Rht::new() }
    }
}

impl SplitValue for RichTextValue {
    fn len(&self) -> u32 {
        SplitValue::len(&self.content)
    }

    /// Both halves keep a copy of the attributes.
    fn split_off(&mut self, offset: u32) -> Self {
        Self {
            content: SplitValue::split_off(&mut self.content, offset),
            attributes: self.attributes.clone(),
        }
    }

    fn text(&self) -> &str {
        &self.content
    }

    fn annotated(&self) -> String {
        if self.attributes.is_empty() {
            return self.content.clone();
        }
        let attrs: Vec<String> = self
            .attributes
            .to_map()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}<{}>", self.content, attrs.join(","))
    }
}

// ── PlainText ─────────────────────────────────────────────────────────────

/// A text container without formatting.
#[derive(Debug, Clone)]
pub struct PlainText {
    pub created_at: TimeTicket,
    pub removed_at: Option<TimeTicket>,
    rga: RgaSplit<String>,
    selections: SelectionMap,
}

impl PlainText {
    pub fn new(created_at: TimeTicket) -> Self {
        Self {
            created_at,
            removed_at: None,
            rga: RgaSplit::new(),
            selections: SelectionMap::default(),
        }
    }

    pub fn rga(&self) -> &RgaSplit<String> {
        &self.rga
    }

    /// Replaces `from..to` with `content` at `edited_at` and moves the
    /// editor's selection to the end of the edit.
    ///
    /// Returns the deletion horizon to ship with the operation and the
    /// visible changes.
    pub fn edit_internal(
        &mut self,
        from: &NodePos,
        to: &NodePos,
        content: &str,
        edited_at: TimeTicket,
        latest_created_at_map: Option<&CreatedAtMapByActor>,
    ) -> Result<(CreatedAtMapByActor, Vec<TextChange>)> {
        let value = (!content.is_empty()).then(|| content.to_string());
        let result = self.rga.edit(from, to, edited_at, value, latest_created_at_map)?;
        let mut changes = result.changes;
        if let Some(change) =
            self.selections
                .update(&self.rga, &result.caret, &result.caret, edited_at)?
        {
            changes.push(change);
        }
        Ok((result.latest_created_at_map, changes))
    }

    /// Records the selection of `updated_at.actor`.
    pub fn select_internal(
        &mut self,
        from: &NodePos,
        to: &NodePos,
        updated_at: TimeTicket,
    ) -> Result<Option<TextChange>> {
        self.selections.update(&self.rga, from, to, updated_at)
    }

    /// Current visible index range of an actor's selection.
    pub fn selection(&self, actor: &ActorId) -> Option<(usize, usize)> {
        let sel = self.selections.get(actor)?;
        self.rga.find_indexes_from_range(&sel.from, &sel.to).ok()
    }

    pub fn create_range(&self, from: usize, to: usize) -> (NodePos, NodePos) {
        self.rga.create_range(from, to)
    }

    pub fn text(&self) -> String {
        self.rga.text()
    }

    pub fn len(&self) -> usize {
        self.rga.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rga.is_empty()
    }

    pub fn annotated(&self) -> String {
        self.rga.annotated()
    }

    pub fn to_json(&self) -> Value {
        Value::String(self.text())
    }
}

// ── RichText ──────────────────────────────────────────────────────────────

/// A text container whose segments carry style attributes.
#[derive(Debug, Clone)]
pub struct RichText {
    pub created_at: TimeTicket,
    pub removed_at: Option<TimeTicket>,
    rga: RgaSplit<RichTextValue>,
    selections: SelectionMap,
}

impl RichText {
    pub fn new(created_at: TimeTicket) -> Self {
        Self {
            created_at,
            removed_at: None,
            rga: RgaSplit::new(),
            selections: SelectionMap::default(),
        }
    }

    pub fn rga(&self) -> &RgaSplit<RichTextValue> {
        &self.rga
    }

    /// Like [`PlainText::edit_internal`]; the inserted content starts out
    /// with `attributes`.
    pub fn edit_internal(
        &mut self,
        from: &NodePos,
        to: &NodePos,
        content: &str,
        attributes: Option<&Attributes>,
        edited_at: TimeTicket,
        latest_created_at_map: Option<&CreatedAtMapByActor>,
    ) -> Result<(CreatedAtMapByActor, Vec<TextChange>)> {
        let value = (!content.is_empty()).then(|| {
            let mut value = RichTextValue::new(content);
            for (key, val) in attributes.into_iter().flatten() {
                value.attributes.set(key, val, edited_at);
            }
            value
        });
        let result = self.rga.edit(from, to, edited_at, value, latest_created_at_map)?;
        let mut changes = result.changes;
        for change in changes.iter_mut().filter(|c| c.content.is_some()) {
            change.attributes = attributes.cloned();
        }
        if let Some(change) =
            self.selections
                .update(&self.rga, &result.caret, &result.caret, edited_at)?
        {
            changes.push(change);
        }
        Ok((result.latest_created_at_map, changes))
    }

    /// Applies `attributes` to every character between `from` and `to`.
    /// Tombstones are styled too, so the outcome does not depend on whether a
    /// concurrent delete arrived first.
    ///
    /// `latest_created_at_map` plays the same role as for edits: a remote
    /// style only touches segments its author had seen. Returns the horizon
    /// of the styled segments and one change per restyled segment.
    pub fn set_style_internal(
        &mut self,
        from: &NodePos,
        to: &NodePos,
        attributes: &Attributes,
        edited_at: TimeTicket,
        latest_created_at_map: Option<&CreatedAtMapByActor>,
    ) -> Result<(CreatedAtMapByActor, Vec<TextChange>)> {
        let slots = self.rga.segments_between(from, to, &edited_at)?;
        let mut created_at_map = CreatedAtMapByActor::new();
        let mut changes = Vec::new();
        for slot in slots {
            let seg = self.rga.segment(slot);
            let removed = seg.is_removed();
            let created_at = seg.created_at();
            if let Some(map) = latest_created_at_map {
                let latest = map.get(&created_at.actor).unwrap_or(&INITIAL_TIME_TICKET);
                if created_at.after(latest) {
                    continue;
                }
            }
            let newest = created_at_map.entry(created_at.actor).or_insert(created_at);
            if created_at.after(newest) {
                *newest = created_at;
            }

            let (from_index, to_index) = self.rga.segment_range(slot);
            let value = &mut self.rga.segment_mut(slot).value;
            let mut changed = false;
            for (key, val) in attributes {
                changed |= value.attributes.set(key, val, edited_at);
            }
            if changed && !removed {
                changes.push(TextChange {
                    kind: TextChangeKind::Style,
                    actor: edited_at.actor,
                    from: from_index,
                    to: to_index,
                    content: None,
                    attributes: Some(attributes.clone()),
                });
            }
        }
        Ok((created_at_map, changes))
    }

    /// Records the selection of `updated_at.actor`.
    pub fn select_internal(
        &mut self,
        from: &NodePos,
        to: &NodePos,
        updated_at: TimeTicket,
    ) -> Result<Option<TextChange>> {
        self.selections.update(&self.rga, from, to, updated_at)
    }

    pub fn selection(&self, actor: &ActorId) -> Option<(usize, usize)> {
        let sel = self.selections.get(actor)?;
        self.rga.find_indexes_from_range(&sel.from, &sel.to).ok()
    }

    pub fn create_range(&self, from: usize, to: usize) -> (NodePos, NodePos) {
        self.rga.create_range(from, to)
    }

    pub fn text(&self) -> String {
        self.rga.text()
    }

    pub fn len(&self) -> usize {
        self.rga.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rga.is_empty()
    }

    pub fn annotated(&self) -> String {
        self.rga.annotated()
    }

    /// Runs of live text with identical attributes, as
    /// `[{"attrs": {...}, "content": "..."}, ...]`.
    pub fn to_json(&self) -> Value {
        let mut runs: Vec<(BTreeMap<String, String>, String)> = Vec::new();
        for seg in self.rga.iter().filter(|s| !s.is_removed()) {
            let attrs = seg.value.attributes.to_map();
            match runs.last_mut() {
                Some((last_attrs, content)) if *last_attrs == attrs => {
                    content.push_str(&seg.value.content);
                }
                _ => runs.push((attrs, seg.value.content.clone())),
            }
        }
        Value::Array(
            runs.into_iter()
                .map(|(attrs, content)| json!({ "attrs": attrs, "content": content }))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::nodes::rga_split::SegmentId;

    fn t(lamport: u64, actor: u8) -> TimeTicket {
        TimeTicket::new(lamport, ActorId::from_u8(actor), 1)
    }

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn rht_is_last_writer_wins() {
        let mut rht = Rht::new();
        assert!(rht.set("bold", "true", t(2, 1)));
        assert!(!rht.set("bold", "false", t(1, 2)));
        assert!(!rht.set("bold", "false", t(2, 1)));
        assert_eq!(rht.get("bold"), Some("true"));
        assert!(rht.set("bold", "false", t(3, 1)));
        assert_eq!(rht.get("bold"), Some("false"));
    }

    #[test]
    fn plain_edit_moves_selection_to_caret() {
        let mut text = PlainText::new(t(1, 1));
        let (from, to) = text.create_range(0, 0);
        let (_, changes) = text.edit_internal(&from, &to, "hello", t(2, 1), None).unwrap();
        assert_eq!(text.text(), "hello");
        assert_eq!(text.selection(&ActorId::from_u8(1)), Some((5, 5)));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].content.as_deref(), Some("hello"));
        assert_eq!(changes[1].kind, TextChangeKind::Selection);
    }

    #[test]
    fn select_never_touches_content() {
        let mut text = PlainText::new(t(1, 1));
        let (from, to) = text.create_range(0, 0);
        text.edit_internal(&from, &to, "hello", t(2, 1), None).unwrap();
        let before = text.annotated();

        let (from, to) = text.create_range(1, 3);
        let change = text.select_internal(&from, &to, t(3, 2)).unwrap().unwrap();
        assert_eq!((change.from, change.to), (1, 3));
        assert_eq!(text.annotated(), before);
        assert_eq!(text.selection(&ActorId::from_u8(2)), Some((1, 3)));

        // An older selection of the same actor loses; replay is a no-op.
        assert!(text.select_internal(&from, &from, t(2, 2)).unwrap().is_none());
        assert!(text.select_internal(&from, &to, t(3, 2)).unwrap().is_none());
        assert_eq!(text.selection(&ActorId::from_u8(2)), Some((1, 3)));
    }

    #[test]
    fn selection_follows_concurrent_inserts() {
        let mut text = PlainText::new(t(1, 1));
        let (from, to) = text.create_range(0, 0);
        text.edit_internal(&from, &to, "hello", t(2, 1), None).unwrap();
        let (from, to) = text.create_range(2, 4);
        text.select_internal(&from, &to, t(3, 2)).unwrap();

        let (at, _) = text.create_range(0, 0);
        text.edit_internal(&at, &at, ">>", t(4, 1), None).unwrap();
        assert_eq!(text.selection(&ActorId::from_u8(2)), Some((4, 6)));
    }

    #[test]
    fn rich_style_applies_to_range_only() {
        let mut text = RichText::new(t(1, 1));
        let (from, to) = text.create_range(0, 0);
        text.edit_internal(&from, &to, "hello world", None, t(2, 1), None)
            .unwrap();
        let (from, to) = text.create_range(0, 5);
        let (horizon, changes) = text
            .set_style_internal(&from, &to, &attrs(&[("b", "1")]), t(3, 1), None)
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!((changes[0].from, changes[0].to), (0, 5));
        assert_eq!(horizon.get(&ActorId::from_u8(1)), Some(&t(2, 1)));
        assert_eq!(
            text.to_json(),
            json!([
                { "attrs": { "b": "1" }, "content": "hello" },
                { "attrs": {}, "content": " world" },
            ])
        );
        // Replaying the style changes nothing.
        let (_, changes) = text
            .set_style_internal(&from, &to, &attrs(&[("b", "1")]), t(3, 1), None)
            .unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn rich_insert_carries_attributes_and_split_copies_them() {
        let mut text = RichText::new(t(1, 1));
        let (from, to) = text.create_range(0, 0);
        text.edit_internal(&from, &to, "abcd", Some(&attrs(&[("i", "1")])), t(2, 1), None)
            .unwrap();
        let (at, _) = text.create_range(2, 2);
        text.edit_internal(&at, &at, "-", None, t(3, 1), None).unwrap();
        assert_eq!(text.text(), "ab-cd");
        let right = text
            .rga()
            .find_segment(&SegmentId::new(t(2, 1), 2))
            .unwrap();
        assert_eq!(right.value.attributes.get("i"), Some("1"));
        assert_eq!(
            text.to_json(),
            json!([
                { "attrs": { "i": "1" }, "content": "ab" },
                { "attrs": {}, "content": "-" },
                { "attrs": { "i": "1" }, "content": "cd" },
            ])
        );
    }

    #[test]
    fn remote_style_skips_unseen_segments() {
        let mut text = RichText::new(t(1, 1));
        let (from, to) = text.create_range(0, 0);
        text.edit_internal(&from, &to, "abcd", None, t(2, 1), None).unwrap();
        let (from, to) = text.create_range(0, 4);
        // Actor 2 inserts in the middle before the remote style arrives.
        let (at, _) = text.create_range(2, 2);
        text.edit_internal(&at, &at, "XY", None, t(3, 2), None).unwrap();

        let mut horizon = CreatedAtMapByActor::new();
        horizon.insert(ActorId::from_u8(1), t(2, 1));
        text.set_style_internal(&from, &to, &attrs(&[("u", "1")]), t(4, 1), Some(&horizon))
            .unwrap();
        assert_eq!(
            text.to_json(),
            json!([
                { "attrs": { "u": "1" }, "content": "ab" },
                { "attrs": {}, "content": "XY" },
                { "attrs": { "u": "1" }, "content": "cd" },
            ])
        );
    }
}
