//! Split-node RGA: the replicated sequence behind the text containers.
//!
//! A sequence is a linked list of segments. Each segment owns a contiguous
//! run of characters inserted by one operation and is named by a
//! [`SegmentId`]: the creation ticket of that insertion plus the offset of
//! the segment inside it. Splitting a segment at offset `k` shortens it and
//! spawns a successor named `(created_at, offset + k)` that owns the rest, so
//! no identity is ever lost. The pieces of one insertion form a chain through
//! `ins_prev`/`ins_next`.
//!
//! Positions are [`NodePos`] values: a segment identity plus an offset inside
//! it. They stay valid however the sequence around them grows, because
//! resolving one looks up the piece that currently owns the offset instead of
//! trusting an absolute index.
//!
//! Segments live in an arena (`Vec<Segment<V>>`) and link to each other by
//! slot index. Slots are never freed: removed content stays as a tombstone.
//! Index lookups walk the list linearly.

use std::collections::BTreeMap;
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::text::{TextChange, TextChangeKind};
use crate::error::{OperationError, Result};
use crate::time::{ActorId, TimeTicket, INITIAL_TIME_TICKET, MAX_TIME_TICKET};

// ── SplitValue ────────────────────────────────────────────────────────────

/// Payload owned by a segment.
///
/// Lengths and offsets are counted in characters. A single payload holds at
/// most `u32::MAX` characters; longer content saturates at that length.
pub trait SplitValue: Clone + Default {
    /// Number of characters in the payload.
    fn len(&self) -> u32;

    /// Keep `[0, offset)` in `self` and return `[offset, len)`.
    fn split_off(&mut self, offset: u32) -> Self;

    /// The plain text of the payload.
    fn text(&self) -> &str;

    /// Diagnostic rendering of the payload.
    fn annotated(&self) -> String {
        self.text().to_string()
    }
}

impl SplitValue for String {
    fn len(&self) -> u32 {
        u32::try_from(self.chars().count()).unwrap_or(u32::MAX)
    }

    fn split_off(&mut self, offset: u32) -> Self {
        let byte_pos = self
            .char_indices()
            .nth(offset as usize)
            .map(|(i, _)| i)
            .unwrap_or(self.len());
        String::split_off(self, byte_pos)
    }

    fn text(&self) -> &str {
        self
    }
}

// ── SegmentId / NodePos ───────────────────────────────────────────────────

/// Identity of a segment: creation ticket of the insertion it came from and
/// its character offset inside that insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId {
    pub created_at: TimeTicket,
    pub offset: u32,
}

impl SegmentId {
    pub const fn new(created_at: TimeTicket, offset: u32) -> Self {
        Self { created_at, offset }
    }

    /// Identity of the piece starting `offset` characters into this one.
    pub fn split(&self, offset: u32) -> Self {
        Self::new(self.created_at, self.offset + offset)
    }

    pub fn annotated(&self) -> String {
        format!("{}:{}", self.created_at.annotated(), self.offset)
    }
}

impl Ord for SegmentId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.offset.cmp(&other.offset))
    }
}

impl PartialOrd for SegmentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A position inside a sequence, addressed by segment identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodePos {
    pub id: SegmentId,
    pub relative_offset: u32,
}

impl NodePos {
    pub const fn new(id: SegmentId, relative_offset: u32) -> Self {
        Self { id, relative_offset }
    }

    /// The identity of the character slot this position points at, relative
    /// to the whole insertion rather than to one piece of it.
    ///
    /// Fails with [`OperationError::DanglingNodePos`] if the offsets overflow.
    pub fn absolute_id(&self) -> Result<SegmentId> {
        self.id
            .offset
            .checked_add(self.relative_offset)
            .map(|offset| SegmentId::new(self.id.created_at, offset))
            .ok_or(OperationError::DanglingNodePos(*self))
    }

    pub fn annotated(&self) -> String {
        format!("{}:{}", self.id.annotated(), self.relative_offset)
    }
}

/// Per-actor horizon of a remote deletion: the newest insertion of each actor
/// the deleting replica had seen inside the deleted range.
pub type CreatedAtMapByActor = BTreeMap<ActorId, TimeTicket>;

// ── Segment ───────────────────────────────────────────────────────────────

/// One run of characters in the sequence.
#[derive(Debug, Clone)]
pub struct Segment<V> {
    pub id: SegmentId,
    pub value: V,
    pub removed_at: Option<TimeTicket>,
    prev: Option<usize>,
    next: Option<usize>,
    ins_prev: Option<usize>,
    ins_next: Option<usize>,
}

impl<V: SplitValue> Segment<V> {
    fn new(id: SegmentId, value: V) -> Self {
        Self {
            id,
            value,
            removed_at: None,
            prev: None,
            next: None,
            ins_prev: None,
            ins_next: None,
        }
    }

    pub fn created_at(&self) -> TimeTicket {
        self.id.created_at
    }

    /// Number of characters owned, tombstoned or not.
    pub fn content_len(&self) -> u32 {
        self.value.len()
    }

    /// Number of visible characters.
    pub fn len(&self) -> u32 {
        if self.is_removed() {
            0
        } else {
            self.content_len()
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    /// The segment may be removed at `edited_at` by an editor whose view of
    /// this segment's actor reached `latest_created_at`.
    fn can_delete(&self, edited_at: &TimeTicket, latest_created_at: &TimeTicket) -> bool {
        if self.created_at().after(latest_created_at) {
            return false;
        }
        match &self.removed_at {
            Some(removed_at) => edited_at.after(removed_at),
            None => true,
        }
    }

    fn annotated(&self) -> String {
        let body = format!("{} {}", self.id.annotated(), self.value.annotated());
        if self.is_removed() {
            format!("{{{}}}", body)
        } else {
            format!("[{}]", body)
        }
    }
}

// ── RgaSplit ──────────────────────────────────────────────────────────────

/// Result of [`RgaSplit::edit`].
#[derive(Debug, Clone, PartialEq)]
pub struct EditResult {
    /// Position right after the edited range, for moving the caret.
    pub caret: NodePos,
    /// Newest insertion of each actor removed by this edit.
    pub latest_created_at_map: CreatedAtMapByActor,
    pub changes: Vec<TextChange>,
}

const HEAD: usize = 0;

/// A replicated sequence of split segments.
#[derive(Debug, Clone)]
pub struct RgaSplit<V> {
    segments: Vec<Segment<V>>,
    ids: BTreeMap<SegmentId, usize>,
    /// insertion → position it was inserted after, never the start of
    /// another insertion
    origins: BTreeMap<TimeTicket, NodePos>,
}

impl<V: SplitValue> Default for RgaSplit<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: SplitValue> RgaSplit<V> {
    /// Creates a sequence holding only the empty head segment.
    pub fn new() -> Self {
        let head_id = SegmentId::new(INITIAL_TIME_TICKET, 0);
        let mut ids = BTreeMap::new();
        ids.insert(head_id, HEAD);
        Self {
            segments: vec![Segment::new(head_id, V::default())],
            ids,
            origins: BTreeMap::new(),
        }
    }

    /// Position of the very start of the sequence.
    pub fn head_pos(&self) -> NodePos {
        NodePos::new(self.segments[HEAD].id, 0)
    }

    // ── Iteration / views ────────────────────────────────────────────────

    /// Iterates all segments in sequence order, tombstones included and the
    /// head excluded.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter { rga: self, next: self.segments[HEAD].next }
    }

    /// Number of visible characters.
    pub fn len(&self) -> usize {
        self.iter().map(|s| s.len() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of segments, including tombstones and the head.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Visible text.
    pub fn text(&self) -> String {
        self.iter()
            .filter(|s| !s.is_removed())
            .map(|s| s.value.text())
            .collect()
    }

    /// Debug rendering: `[id text]` for live segments, `{id text}` for
    /// tombstones.
    pub fn annotated(&self) -> String {
        std::iter::once(&self.segments[HEAD])
            .chain(self.iter())
            .map(|s| s.annotated())
            .collect()
    }

    pub fn find_segment(&self, id: &SegmentId) -> Option<&Segment<V>> {
        self.ids.get(id).map(|&slot| &self.segments[slot])
    }

    pub fn contains_insertion(&self, created_at: &TimeTicket) -> bool {
        self.ids.contains_key(&SegmentId::new(*created_at, 0))
    }

    // ── Position ↔ index ─────────────────────────────────────────────────

    /// Converts a visible index into a position.
    ///
    /// At a segment boundary the position attaches to the end of the left
    /// segment. Indexes past the end are clamped.
    pub fn find_node_pos(&self, index: usize) -> NodePos {
        let mut acc = 0usize;
        let mut last = self.head_pos();
        for seg in self.iter() {
            let len = seg.len() as usize;
            if len == 0 {
                continue;
            }
            if index <= acc + len {
                if index == 0 {
                    break;
                }
                return NodePos::new(seg.id, (index - acc) as u32);
            }
            acc += len;
            last = NodePos::new(seg.id, seg.len());
        }
        if index == 0 {
            self.head_pos()
        } else {
            last
        }
    }

    /// Converts a pair of visible indexes into a range of positions.
    pub fn create_range(&self, from: usize, to: usize) -> (NodePos, NodePos) {
        (self.find_node_pos(from), self.find_node_pos(to))
    }

    /// Resolves a position into its current visible index and the identity of
    /// the segment owning it.
    ///
    /// A position on a split boundary belongs to the left piece.
    pub fn resolve(&self, pos: &NodePos) -> Result<(usize, SegmentId)> {
        let (slot, offset) = self.locate(pos)?;
        let seg = &self.segments[slot];
        let index = self.index_of(slot);
        let index = if seg.is_removed() { index } else { index + offset as usize };
        Ok((index, seg.id))
    }

    /// Converts a range of positions into visible indexes.
    pub fn find_indexes_from_range(&self, from: &NodePos, to: &NodePos) -> Result<(usize, usize)> {
        Ok((self.resolve(from)?.0, self.resolve(to)?.0))
    }

    /// Visible characters before the segment in `slot`.
    fn index_of(&self, slot: usize) -> usize {
        let mut index = 0usize;
        let mut cur = self.segments[HEAD].next;
        while let Some(c) = cur {
            if c == slot {
                break;
            }
            index += self.segments[c].len() as usize;
            cur = self.segments[c].next;
        }
        index
    }

    // ── Lookup ───────────────────────────────────────────────────────────

    /// The piece of the same insertion whose range starts at or before `id`.
    fn find_floor(&self, id: &SegmentId) -> Option<usize> {
        let (key, &slot) = self.ids.range(..=*id).next_back()?;
        if key.created_at == id.created_at {
            Some(slot)
        } else {
            None
        }
    }

    /// Like [`find_floor`](Self::find_floor), but a position sitting exactly
    /// on a split boundary resolves to the end of the left piece.
    fn find_floor_prefer_left(&self, pos: &NodePos) -> Result<usize> {
        let abs = pos.absolute_id()?;
        let slot = self
            .find_floor(&abs)
            .ok_or(OperationError::DanglingNodePos(*pos))?;
        let seg = &self.segments[slot];
        if abs.offset > 0 && seg.id.offset == abs.offset {
            return seg.ins_prev.ok_or(OperationError::DanglingNodePos(*pos));
        }
        Ok(slot)
    }

    /// The segment owning `pos` and the offset of `pos` inside it.
    fn locate(&self, pos: &NodePos) -> Result<(usize, u32)> {
        let slot = self.find_floor_prefer_left(pos)?;
        let seg = &self.segments[slot];
        let offset = pos.absolute_id()?.offset - seg.id.offset;
        if offset > seg.content_len() {
            return Err(OperationError::DanglingNodePos(*pos));
        }
        Ok((slot, offset))
    }

    /// Checks that `pos` can be resolved without mutating anything.
    pub fn check_pos(&self, pos: &NodePos) -> Result<()> {
        self.locate(pos).map(|_| ())
    }

    /// Where an insertion at `pos` is anchored. The start of a non-head
    /// insertion is replaced by the origin of that insertion.
    fn origin_of(&self, pos: &NodePos) -> Result<NodePos> {
        let (slot, offset) = self.locate(pos)?;
        if offset == 0 && slot != HEAD {
            return self
                .origins
                .get(&self.segments[slot].created_at())
                .copied()
                .ok_or(OperationError::DanglingNodePos(*pos));
        }
        Ok(*pos)
    }

    // ── Structural mutation ──────────────────────────────────────────────

    /// Splits the segment in `slot` so that its first `offset` characters
    /// stay in place. Splitting at either end is a no-op.
    fn split_segment(&mut self, slot: usize, offset: u32) {
        let new_slot = self.segments.len();
        let seg = &mut self.segments[slot];
        if offset == 0 || offset >= seg.content_len() {
            return;
        }
        let value = seg.value.split_off(offset);
        let mut split = Segment::new(seg.id.split(offset), value);
        split.removed_at = seg.removed_at;
        split.prev = Some(slot);
        split.next = seg.next;
        split.ins_prev = Some(slot);
        split.ins_next = seg.ins_next;
        seg.next = Some(new_slot);
        seg.ins_next = Some(new_slot);

        if let Some(next) = split.next {
            self.segments[next].prev = Some(new_slot);
        }
        if let Some(ins_next) = split.ins_next {
            self.segments[ins_next].ins_prev = Some(new_slot);
        }
        self.ids.insert(split.id, new_slot);
        self.segments.push(split);
    }

    /// Links a fresh insertion right after `left` and returns its slot.
    fn link_after(&mut self, left: usize, origin: NodePos, id: SegmentId, value: V) -> usize {
        self.origins.insert(id.created_at, origin);
        let slot = self.segments.len();
        let mut seg = Segment::new(id, value);
        seg.prev = Some(left);
        seg.next = self.segments[left].next;
        if let Some(next) = seg.next {
            self.segments[next].prev = Some(slot);
        }
        self.segments[left].next = Some(slot);
        self.ids.insert(id, slot);
        self.segments.push(seg);
        slot
    }

    /// Splits at `pos` and returns the segment `pos` follows, plus the
    /// segment it must stay in front of when it names the start of an
    /// insertion.
    fn split_at(&mut self, pos: &NodePos) -> Result<(usize, Option<usize>)> {
        let (slot, offset) = self.locate(pos)?;
        if offset == 0 && slot != HEAD {
            // Before an insertion: anchor at that insertion's origin.
            let origin = self.origin_of(pos)?;
            let (left, _) = self.split_at(&origin)?;
            return Ok((left, Some(slot)));
        }
        self.split_segment(slot, offset);
        Ok((slot, None))
    }

    /// Splits at `pos` and returns the segments left and right of it.
    ///
    /// Right neighbours inserted after `edited_at` were concurrent with the
    /// edit and sort before it, so the left side moves past them.
    pub(crate) fn find_node_with_split(
        &mut self,
        pos: &NodePos,
        edited_at: &TimeTicket,
    ) -> Result<(usize, Option<usize>)> {
        let (mut left, before) = self.split_at(pos)?;
        while let Some(next) = self.segments[left].next {
            if Some(next) == before || !self.segments[next].created_at().after(edited_at) {
                break;
            }
            left = next;
        }
        Ok((left, before.or(self.segments[left].next)))
    }

    /// Slots from `from` (inclusive) up to `to` (exclusive).
    fn find_between(&self, from: Option<usize>, to: Option<usize>) -> Vec<usize> {
        let mut slots = Vec::new();
        let mut cur = from;
        while let Some(c) = cur {
            if Some(c) == to {
                break;
            }
            slots.push(c);
            cur = self.segments[c].next;
        }
        slots
    }

    /// Splits at both positions and returns the slots between them.
    pub(crate) fn segments_between(
        &mut self,
        from: &NodePos,
        to: &NodePos,
        edited_at: &TimeTicket,
    ) -> Result<Vec<usize>> {
        self.check_pos(from)?;
        self.check_pos(to)?;
        let (_, to_right) = self.find_node_with_split(to, edited_at)?;
        let (_, from_right) = self.find_node_with_split(from, edited_at)?;
        Ok(self.find_between(from_right, to_right))
    }

    /// Newest insertion of each actor between `from` and `to`, tombstones
    /// included. This is the horizon a local edit of that range ships with.
    pub fn created_at_map_between(&self, from: &NodePos, to: &NodePos) -> Result<CreatedAtMapByActor> {
        let (from_slot, from_offset) = self.locate(from)?;
        let (to_slot, to_offset) = self.locate(to)?;

        let mut map = CreatedAtMapByActor::new();
        if from_slot == to_slot && to_offset <= from_offset {
            return Ok(map);
        }
        let mut cur = if from_offset < self.segments[from_slot].content_len() {
            Some(from_slot)
        } else {
            self.segments[from_slot].next
        };
        while let Some(slot) = cur {
            if slot == to_slot && to_offset == 0 {
                break;
            }
            let created_at = self.segments[slot].created_at();
            let newest = map.entry(created_at.actor).or_insert(created_at);
            if created_at.after(newest) {
                *newest = created_at;
            }
            if slot == to_slot {
                break;
            }
            cur = self.segments[slot].next;
        }
        Ok(map)
    }

    pub(crate) fn segment(&self, slot: usize) -> &Segment<V> {
        &self.segments[slot]
    }

    pub(crate) fn segment_mut(&mut self, slot: usize) -> &mut Segment<V> {
        &mut self.segments[slot]
    }

    /// Visible index range currently covered by the segment in `slot`.
    pub(crate) fn segment_range(&self, slot: usize) -> (usize, usize) {
        let from = self.index_of(slot);
        (from, from + self.segments[slot].len() as usize)
    }

    // ── Operations ───────────────────────────────────────────────────────

    /// Inserts `value` right after `pos` and returns the new segment's
    /// identity.
    ///
    /// Concurrent insertions at the same position end up ordered by
    /// `created_at`, newest first. Inserting the same `created_at` twice is a
    /// no-op.
    pub fn insert_after(&mut self, pos: &NodePos, value: V, created_at: TimeTicket) -> Result<SegmentId> {
        self.check_pos(pos)?;
        let id = SegmentId::new(created_at, 0);
        if self.ids.contains_key(&id) {
            return Ok(id);
        }
        let origin = self.origin_of(pos)?;
        let (left, _) = self.find_node_with_split(pos, &created_at)?;
        self.link_after(left, origin, id, value);
        Ok(id)
    }

    /// Tombstones every character between `from` and `to`.
    ///
    /// Segments already removed at `deleted_at` or later are left alone.
    pub fn delete_range(
        &mut self,
        from: &NodePos,
        to: &NodePos,
        deleted_at: TimeTicket,
    ) -> Result<Vec<TextChange>> {
        let result = self.edit(from, to, deleted_at, None, None)?;
        Ok(result.changes)
    }

    /// Replaces the range `from..to` by `value`.
    ///
    /// `latest_created_at_map` is the deletion horizon carried by a remote
    /// edit: a segment inserted by actor `A` is only removed if its creation
    /// is not newer than the horizon recorded for `A` (segments of actors
    /// missing from the map were never seen and survive). `None` means a
    /// local edit, which removes everything in the range.
    pub fn edit(
        &mut self,
        from: &NodePos,
        to: &NodePos,
        edited_at: TimeTicket,
        value: Option<V>,
        latest_created_at_map: Option<&CreatedAtMapByActor>,
    ) -> Result<EditResult> {
        self.check_pos(to)?;
        let origin = self.origin_of(from)?;

        let (_, to_right) = self.find_node_with_split(to, &edited_at)?;
        let (from_left, from_right) = self.find_node_with_split(from, &edited_at)?;

        let candidates = self.find_between(from_right, to_right);
        let (mut changes, latest_created_at_map) =
            self.delete_segments(&candidates, &edited_at, latest_created_at_map);

        let mut caret = *from;
        if let Some(value) = value.filter(|v| v.len() > 0) {
            let id = SegmentId::new(edited_at, 0);
            caret = NodePos::new(id, value.len());
            if !self.ids.contains_key(&id) {
                let content = value.text().to_string();
                let slot = self.link_after(from_left, origin, id, value);
                let index = self.index_of(slot);
                changes.push(TextChange {
                    kind: TextChangeKind::Content,
                    actor: edited_at.actor,
                    from: index,
                    to: index,
                    content: Some(content),
                    attributes: None,
                });
            }
        }

        Ok(EditResult { caret, latest_created_at_map, changes })
    }

    /// Tombstones the deletable candidates and reports the removed visible
    /// ranges, each expressed after the previous ones were applied.
    fn delete_segments(
        &mut self,
        candidates: &[usize],
        edited_at: &TimeTicket,
        latest_created_at_map: Option<&CreatedAtMapByActor>,
    ) -> (Vec<TextChange>, CreatedAtMapByActor) {
        let mut changes: Vec<TextChange> = Vec::new();
        let mut created_at_map = CreatedAtMapByActor::new();
        let Some(&first) = candidates.first() else {
            return (changes, created_at_map);
        };

        let mut cursor = self.index_of(first);
        let mut open: Option<(usize, usize)> = None;
        for &slot in candidates {
            let seg = &self.segments[slot];
            let latest_created_at = match latest_created_at_map {
                Some(map) => map
                    .get(&seg.created_at().actor)
                    .copied()
                    .unwrap_or(INITIAL_TIME_TICKET),
                None => MAX_TIME_TICKET,
            };
            let visible = seg.len() as usize;

            if !seg.can_delete(edited_at, &latest_created_at) {
                if visible > 0 {
                    if let Some((from, to)) = open.take() {
                        changes.push(TextChange::deletion(edited_at.actor, from, to));
                    }
                    cursor += visible;
                }
                continue;
            }

            let created_at = seg.created_at();
            let newest = created_at_map.entry(created_at.actor).or_insert(created_at);
            if created_at.after(newest) {
                *newest = created_at;
            }
            if visible > 0 {
                open = match open {
                    Some((from, to)) => Some((from, to + visible)),
                    None => Some((cursor, cursor + visible)),
                };
            }
            self.segments[slot].removed_at = Some(*edited_at);
        }
        if let Some((from, to)) = open {
            changes.push(TextChange::deletion(edited_at.actor, from, to));
        }
        (changes, created_at_map)
    }
}

// ── Iter ──────────────────────────────────────────────────────────────────

/// Iterator over segments in sequence order.
pub struct Iter<'a, V> {
    rga: &'a RgaSplit<V>,
    next: Option<usize>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = &'a Segment<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.next?;
        let seg = &self.rga.segments[slot];
        self.next = seg.next;
        Some(seg)
    }
}
