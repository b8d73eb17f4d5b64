//! [`ChangeContext`]: builds a [`Change`] while applying it locally.

use serde_json::Value;

use super::Change;
use crate::crdt::nodes::rga_split::{CreatedAtMapByActor, NodePos};
use crate::crdt::nodes::text::{Attributes, TextChange};
use crate::crdt::nodes::{ArrayNode, CrdtElement, ElementValue};
use crate::crdt::DocumentRoot;
use crate::error::{OperationError, Result};
use crate::operation::Operation;
use crate::time::{ChangeId, TimeTicket, INITIAL_TIME_TICKET};

/// An element to create, before it has a stamp.
#[derive(Debug, Clone, PartialEq)]
pub enum NewElement {
    Primitive(Value),
    Object,
    Array,
    PlainText,
    RichText,
}

impl NewElement {
    fn stamped(self, created_at: TimeTicket) -> ElementValue {
        match self {
            NewElement::Primitive(value) => ElementValue::Primitive { created_at, value },
            NewElement::Object => ElementValue::Object { created_at },
            NewElement::Array => ElementValue::Array { created_at },
            NewElement::PlainText => ElementValue::PlainText { created_at },
            NewElement::RichText => ElementValue::RichText { created_at },
        }
    }
}

/// Records the operations of one local change.
///
/// Each helper mints a ticket, builds the operation, executes it against the
/// local root through [`Operation::execute`] and keeps it only if it applied.
/// Text helpers take visible indexes and translate them into positions.
pub struct ChangeContext<'a> {
    id: ChangeId,
    root: &'a mut DocumentRoot,
    operations: Vec<Operation>,
    delimiter: u32,
    message: Option<String>,
}

impl<'a> ChangeContext<'a> {
    pub fn new(id: ChangeId, root: &'a mut DocumentRoot) -> Self {
        Self { id, root, operations: Vec::new(), delimiter: 0, message: None }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn id(&self) -> ChangeId {
        self.id
    }

    pub fn root(&self) -> &DocumentRoot {
        &*self.root
    }

    /// The next ticket of this change.
    pub fn issue_time_ticket(&mut self) -> TimeTicket {
        self.delimiter += 1;
        self.id.create_time_ticket(self.delimiter)
    }

    /// Executes `op` locally and records it if it applied.
    pub fn push(&mut self, op: Operation) -> Result<Vec<TextChange>> {
        let changes = op.execute(self.root)?;
        self.operations.push(op);
        Ok(changes)
    }

    pub fn has_operations(&self) -> bool {
        !self.operations.is_empty()
    }

    pub fn into_change(self) -> Change {
        Change {
            id: self.id,
            operations: self.operations,
            message: self.message,
        }
    }

    // ── JSON containers ──────────────────────────────────────────────────

    /// Sets `key` of the object `parent`; returns the new element's stamp.
    pub fn set(&mut self, parent: TimeTicket, key: &str, element: NewElement) -> Result<TimeTicket> {
        let ticket = self.issue_time_ticket();
        self.push(Operation::Set {
            parent_created_at: parent,
            executed_at: ticket,
            key: key.to_string(),
            value: element.stamped(ticket),
        })?;
        Ok(ticket)
    }

    /// Inserts into the array `parent` so that the new element ends up at
    /// visible `index` (clamped to the length).
    pub fn add(&mut self, parent: TimeTicket, index: usize, element: NewElement) -> Result<TimeTicket> {
        let prev_created_at = self.array_prev(parent, index, "add")?;
        let ticket = self.issue_time_ticket();
        self.push(Operation::Add {
            parent_created_at: parent,
            executed_at: ticket,
            prev_created_at,
            value: element.stamped(ticket),
        })?;
        Ok(ticket)
    }

    /// Moves `created_at` right after the element `prev_created_at` in the
    /// array `parent`. `INITIAL_TIME_TICKET` moves it to the front.
    pub fn move_after(
        &mut self,
        parent: TimeTicket,
        prev_created_at: TimeTicket,
        created_at: TimeTicket,
    ) -> Result<()> {
        let prev_created_at = if prev_created_at == INITIAL_TIME_TICKET {
            INITIAL_TIME_TICKET
        } else {
            self.array(parent, "move")?
                .slot_of(&prev_created_at)
                .ok_or(OperationError::MissingAncestor(prev_created_at))?
        };
        let ticket = self.issue_time_ticket();
        self.push(Operation::Move {
            parent_created_at: parent,
            executed_at: ticket,
            prev_created_at,
            created_at,
        })?;
        Ok(())
    }

    pub fn remove(&mut self, parent: TimeTicket, created_at: TimeTicket) -> Result<()> {
        let ticket = self.issue_time_ticket();
        self.push(Operation::Remove { parent_created_at: parent, executed_at: ticket, created_at })?;
        Ok(())
    }

    fn array(&self, parent: TimeTicket, operation: &'static str) -> Result<&ArrayNode> {
        match self.root.find_by_created_at(&parent) {
            Some(CrdtElement::Array(arr)) => Ok(arr),
            Some(other) => Err(OperationError::UnsupportedOperationOnType {
                operation,
                kind: other.kind(),
            }),
            None => Err(OperationError::MissingAncestor(parent)),
        }
    }

    /// Slot of the live element before visible `index` of an array, or the
    /// list start.
    fn array_prev(&self, parent: TimeTicket, index: usize, operation: &'static str) -> Result<TimeTicket> {
        let live: Vec<TimeTicket> = self
            .array(parent, operation)?
            .elements()
            .filter(|e| self.root.find_by_created_at(&e.created_at).is_some_and(|el| !el.is_removed()))
            .map(|e| e.positioned_at)
            .collect();
        Ok(match index.min(live.len()) {
            0 => INITIAL_TIME_TICKET,
            i => live[i - 1],
        })
    }

    // ── Text containers ──────────────────────────────────────────────────

    /// Replaces the visible range `from..to` of the plain text `parent`.
    pub fn edit(&mut self, parent: TimeTicket, from: usize, to: usize, content: &str) -> Result<Vec<TextChange>> {
        let (from_pos, to_pos, map) = self.text_range(parent, from, to, "edit")?;
        let ticket = self.issue_time_ticket();
        self.push(Operation::Edit {
            parent_created_at: parent,
            executed_at: ticket,
            from_pos,
            to_pos,
            max_created_at_map_by_actor: map,
            content: content.to_string(),
        })
    }

    /// Replaces the visible range `from..to` of the rich text `parent`.
    pub fn rich_edit(
        &mut self,
        parent: TimeTicket,
        from: usize,
        to: usize,
        content: &str,
        attributes: Attributes,
    ) -> Result<Vec<TextChange>> {
        let (from_pos, to_pos, map) = self.text_range(parent, from, to, "rich_edit")?;
        let ticket = self.issue_time_ticket();
        self.push(Operation::RichEdit {
            parent_created_at: parent,
            executed_at: ticket,
            from_pos,
            to_pos,
            max_created_at_map_by_actor: map,
            content: content.to_string(),
            attributes,
        })
    }

    pub fn set_style(
        &mut self,
        parent: TimeTicket,
        from: usize,
        to: usize,
        attributes: Attributes,
    ) -> Result<Vec<TextChange>> {
        let (from_pos, to_pos, map) = self.text_range(parent, from, to, "style")?;
        let ticket = self.issue_time_ticket();
        self.push(Operation::Style {
            parent_created_at: parent,
            executed_at: ticket,
            from_pos,
            to_pos,
            max_created_at_map_by_actor: map,
            attributes,
        })
    }

    pub fn select(&mut self, parent: TimeTicket, from: usize, to: usize) -> Result<Vec<TextChange>> {
        let (from_pos, to_pos, _) = self.text_range(parent, from, to, "select")?;
        let ticket = self.issue_time_ticket();
        self.push(Operation::Select { parent_created_at: parent, executed_at: ticket, from_pos, to_pos })
    }

    /// Positions of a visible range and the horizon of what it covers.
    fn text_range(
        &self,
        parent: TimeTicket,
        from: usize,
        to: usize,
        operation: &'static str,
    ) -> Result<(NodePos, NodePos, CreatedAtMapByActor)> {
        match self.root.find_by_created_at(&parent) {
            Some(CrdtElement::PlainText(text)) => {
                let (from_pos, to_pos) = text.create_range(from, to);
                let map = text.rga().created_at_map_between(&from_pos, &to_pos)?;
                Ok((from_pos, to_pos, map))
            }
            Some(CrdtElement::RichText(text)) => {
                let (from_pos, to_pos) = text.create_range(from, to);
                let map = text.rga().created_at_map_between(&from_pos, &to_pos)?;
                Ok((from_pos, to_pos, map))
            }
            Some(other) => Err(OperationError::UnsupportedOperationOnType {
                operation,
                kind: other.kind(),
            }),
            None => Err(OperationError::MissingAncestor(parent)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ActorId;
    use serde_json::json;

    #[test]
    fn builds_and_applies_a_change() {
        let mut root = DocumentRoot::new();
        let mut ctx = ChangeContext::new(ChangeId::new(1, 1, ActorId::from_u8(1)), &mut root);
        let text = ctx.set(INITIAL_TIME_TICKET, "text", NewElement::PlainText).unwrap();
        ctx.edit(text, 0, 0, "hello world").unwrap();
        ctx.edit(text, 0, 5, "goodbye").unwrap();
        let list = ctx.set(INITIAL_TIME_TICKET, "list", NewElement::Array).unwrap();
        let a = ctx.add(list, 0, NewElement::Primitive(json!(1))).unwrap();
        ctx.add(list, 0, NewElement::Primitive(json!(0))).unwrap();
        ctx.add(list, 9, NewElement::Primitive(json!(2))).unwrap();
        ctx.remove(list, a).unwrap();
        let change = ctx.into_change();

        assert_eq!(change.operations.len(), 8);
        assert_eq!(
            change.operations.iter().map(|op| op.executed_at().delimiter).collect::<Vec<_>>(),
            (1..=8).collect::<Vec<_>>()
        );
        assert_eq!(root.to_json(), json!({ "list": [0, 2], "text": "goodbye world" }));
    }

    #[test]
    fn failed_operation_is_not_recorded() {
        let mut root = DocumentRoot::new();
        let mut ctx = ChangeContext::new(ChangeId::new(1, 1, ActorId::from_u8(1)), &mut root);
        let obj = ctx.set(INITIAL_TIME_TICKET, "o", NewElement::Object).unwrap();
        assert_eq!(
            ctx.edit(obj, 0, 0, "x"),
            Err(OperationError::UnsupportedOperationOnType { operation: "edit", kind: "object" })
        );
        assert_eq!(ctx.into_change().operations.len(), 1);
    }

    #[test]
    fn recorded_edit_carries_the_horizon() {
        let mut root = DocumentRoot::new();
        let mut ctx = ChangeContext::new(ChangeId::new(1, 1, ActorId::from_u8(1)), &mut root);
        let text = ctx.set(INITIAL_TIME_TICKET, "t", NewElement::PlainText).unwrap();
        ctx.edit(text, 0, 0, "abc").unwrap();
        ctx.edit(text, 1, 2, "").unwrap();
        let change = ctx.into_change();
        match &change.operations[2] {
            Operation::Edit { max_created_at_map_by_actor, .. } => {
                assert_eq!(
                    max_created_at_map_by_actor.get(&ActorId::from_u8(1)),
                    Some(&TimeTicket::new(1, ActorId::from_u8(1), 2))
                );
            }
            other => panic!("unexpected operation {other}"),
        }
        assert_eq!(root.to_json(), json!({ "t": "ac" }));
    }
}
