//! Operations: the immutable commands that mutate a document.
//!
//! Every operation targets one container by its creation stamp
//! (`parent_created_at`) and carries the stamp it was issued at
//! (`executed_at`). [`Operation::execute`] is the only mutation entry point,
//! used alike for local application and for remote replay.
//!
//! | Variant    | Target              | Mnemonic |
//! |------------|---------------------|----------|
//! | `Set`      | object              | `SET`    |
//! | `Add`      | array               | `ADD`    |
//! | `Move`     | array               | `MOV`    |
//! | `Remove`   | object, array       | `REMOVE` |
//! | `Edit`     | text                | `EDIT`   |
//! | `RichEdit` | rich text           | `EDIT`   |
//! | `Style`    | rich text           | `STYL`   |
//! | `Select`   | text, rich text     | `SELT`   |

use serde::{Deserialize, Serialize};

use crate::crdt::nodes::rga_split::{CreatedAtMapByActor, NodePos};
use crate::crdt::nodes::text::{Attributes, TextChange};
use crate::crdt::nodes::{CrdtElement, ElementValue};
use crate::crdt::DocumentRoot;
use crate::error::{OperationError, Result};
use crate::time::TimeTicket;

/// A single document operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    // ── JSON containers ──────────────────────────────────────────────────
    /// Set `key` of an object to a new element.
    Set {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        key: String,
        value: ElementValue,
    },
    /// Insert a new element into an array after the slot `prev_created_at`
    /// (`INITIAL_TIME_TICKET` for the start). A slot is named by the stamp of
    /// the insertion or move that created it.
    Add {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        prev_created_at: TimeTicket,
        value: ElementValue,
    },
    /// Move an element of an array into a new slot after the slot
    /// `prev_created_at`.
    Move {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        prev_created_at: TimeTicket,
        created_at: TimeTicket,
    },
    /// Remove a member of an object or an array.
    Remove {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        created_at: TimeTicket,
    },

    // ── Text containers ──────────────────────────────────────────────────
    /// Replace a range of a plain text.
    Edit {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        from_pos: NodePos,
        to_pos: NodePos,
        /// Newest insertion of each actor the editor saw inside the range.
        max_created_at_map_by_actor: CreatedAtMapByActor,
        content: String,
    },
    /// Replace a range of a rich text; the new content carries `attributes`.
    RichEdit {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        from_pos: NodePos,
        to_pos: NodePos,
        max_created_at_map_by_actor: CreatedAtMapByActor,
        content: String,
        attributes: Attributes,
    },
    /// Apply `attributes` to a range of a rich text.
    Style {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        from_pos: NodePos,
        to_pos: NodePos,
        max_created_at_map_by_actor: CreatedAtMapByActor,
        attributes: Attributes,
    },
    /// Record the selection of the executing actor.
    Select {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        from_pos: NodePos,
        to_pos: NodePos,
    },
}

impl Operation {
    pub fn parent_created_at(&self) -> TimeTicket {
        match self {
            Operation::Set { parent_created_at, .. }
            | Operation::Add { parent_created_at, .. }
            | Operation::Move { parent_created_at, .. }
            | Operation::Remove { parent_created_at, .. }
            | Operation::Edit { parent_created_at, .. }
            | Operation::RichEdit { parent_created_at, .. }
            | Operation::Style { parent_created_at, .. }
            | Operation::Select { parent_created_at, .. } => *parent_created_at,
        }
    }

    pub fn executed_at(&self) -> TimeTicket {
        match self {
            Operation::Set { executed_at, .. }
            | Operation::Add { executed_at, .. }
            | Operation::Move { executed_at, .. }
            | Operation::Remove { executed_at, .. }
            | Operation::Edit { executed_at, .. }
            | Operation::RichEdit { executed_at, .. }
            | Operation::Style { executed_at, .. }
            | Operation::Select { executed_at, .. } => *executed_at,
        }
    }

    /// The element whose version this operation advances: the created
    /// element for `Set`/`Add`, the moved one for `Move`, the target
    /// container otherwise.
    pub fn effected_created_at(&self) -> TimeTicket {
        match self {
            Operation::Set { value, .. } | Operation::Add { value, .. } => value.created_at(),
            Operation::Move { created_at, .. } => *created_at,
            _ => self.parent_created_at(),
        }
    }

    /// Short name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Set { .. } => "set",
            Operation::Add { .. } => "add",
            Operation::Move { .. } => "move",
            Operation::Remove { .. } => "remove",
            Operation::Edit { .. } => "edit",
            Operation::RichEdit { .. } => "rich_edit",
            Operation::Style { .. } => "style",
            Operation::Select { .. } => "select",
        }
    }

    /// Diagnostic form, e.g. `1:0a:1.SELT(1:0a:2:0:3,1:0a:2:0:5)`.
    pub fn annotated(&self) -> String {
        let parent = self.parent_created_at().annotated();
        match self {
            Operation::Set { key, value, .. } => {
                format!("{}.SET.{}={}", parent, key, value.annotated())
            }
            Operation::Add { value, .. } => format!("{}.ADD.{}", parent, value.annotated()),
            Operation::Move { created_at, .. } => {
                format!("{}.MOV({})", parent, created_at.annotated())
            }
            Operation::Remove { created_at, .. } => {
                format!("{}.REMOVE({})", parent, created_at.annotated())
            }
            Operation::Edit { from_pos, to_pos, content, .. }
            | Operation::RichEdit { from_pos, to_pos, content, .. } => format!(
                "{}.EDIT({},{},{})",
                parent,
                from_pos.annotated(),
                to_pos.annotated(),
                content
            ),
            Operation::Style { from_pos, to_pos, attributes, .. } => {
                let attrs: Vec<String> =
                    attributes.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
                format!(
                    "{}.STYL({},{},{{{}}})",
                    parent,
                    from_pos.annotated(),
                    to_pos.annotated(),
                    attrs.join(",")
                )
            }
            Operation::Select { from_pos, to_pos, .. } => format!(
                "{}.SELT({},{})",
                parent,
                from_pos.annotated(),
                to_pos.annotated()
            ),
        }
    }

    fn unsupported(&self, element: &CrdtElement) -> OperationError {
        OperationError::UnsupportedOperationOnType {
            operation: self.name(),
            kind: element.kind(),
        }
    }

    /// Applies the operation to `root` and returns the visible text changes
    /// it caused.
    ///
    /// Every check runs before the first mutation: an operation that fails
    /// leaves `root` untouched. Executing the same operation twice has the
    /// effect of executing it once.
    pub fn execute(&self, root: &mut DocumentRoot) -> Result<Vec<TextChange>> {
        let parent_created_at = self.parent_created_at();
        let executed_at = self.executed_at();
        let missing = || OperationError::MissingAncestor(parent_created_at);

        let changes = match self {
            Operation::Set { key, value, .. } => {
                let created_at = value.created_at();
                match root.find_by_created_at(&parent_created_at).ok_or_else(missing)? {
                    // A stamp already in use is only accepted as a replay.
                    CrdtElement::Object(obj) => match root.find_by_created_at(&created_at) {
                        Some(existing) if obj.key_of(&created_at) != Some(key.as_str()) => {
                            return Err(self.unsupported(existing));
                        }
                        _ => {}
                    },
                    other => return Err(self.unsupported(other)),
                }
                root.register_element(value.to_element(), parent_created_at);
                if let Some(CrdtElement::Object(obj)) =
                    root.find_by_created_at_mut(&parent_created_at)
                {
                    obj.set(key, created_at);
                }
                Vec::new()
            }

            Operation::Add { prev_created_at, value, .. } => {
                let created_at = value.created_at();
                match root.find_by_created_at(&parent_created_at).ok_or_else(missing)? {
                    CrdtElement::Array(arr) => {
                        arr.check_prev(prev_created_at)?;
                        match root.find_by_created_at(&created_at) {
                            Some(existing) if !arr.contains(&created_at) => {
                                return Err(self.unsupported(existing));
                            }
                            _ => {}
                        }
                    }
                    other => return Err(self.unsupported(other)),
                }
                root.register_element(value.to_element(), parent_created_at);
                if let Some(CrdtElement::Array(arr)) =
                    root.find_by_created_at_mut(&parent_created_at)
                {
                    arr.insert_after(prev_created_at, created_at, executed_at)?;
                }
                Vec::new()
            }

            Operation::Move { prev_created_at, created_at, .. } => {
                match root.find_by_created_at_mut(&parent_created_at).ok_or_else(missing)? {
                    CrdtElement::Array(arr) => {
                        arr.move_after(prev_created_at, created_at, executed_at)?;
                    }
                    other => return Err(self.unsupported(other)),
                }
                Vec::new()
            }

            Operation::Remove { created_at, .. } => {
                let is_member = match root.find_by_created_at(&parent_created_at).ok_or_else(missing)? {
                    CrdtElement::Object(obj) => obj.has_member(created_at),
                    CrdtElement::Array(arr) => arr.contains(created_at),
                    other => return Err(self.unsupported(other)),
                };
                let child = root
                    .find_by_created_at_mut(created_at)
                    .filter(|_| is_member)
                    .ok_or(OperationError::MissingAncestor(*created_at))?;
                child.remove(executed_at);
                root.register_removed_element(*created_at);
                Vec::new()
            }

            Operation::Edit { from_pos, to_pos, max_created_at_map_by_actor, content, .. } => {
                match root.find_by_created_at_mut(&parent_created_at).ok_or_else(missing)? {
                    CrdtElement::PlainText(text) => {
                        let (_, changes) = text.edit_internal(
                            from_pos,
                            to_pos,
                            content,
                            executed_at,
                            Some(max_created_at_map_by_actor),
                        )?;
                        changes
                    }
                    other => return Err(self.unsupported(other)),
                }
            }

            Operation::RichEdit {
                from_pos,
                to_pos,
                max_created_at_map_by_actor,
                content,
                attributes,
                ..
            } => match root.find_by_created_at_mut(&parent_created_at).ok_or_else(missing)? {
                CrdtElement::RichText(text) => {
                    let attributes = (!attributes.is_empty()).then_some(attributes);
                    let (_, changes) = text.edit_internal(
                        from_pos,
                        to_pos,
                        content,
                        attributes,
                        executed_at,
                        Some(max_created_at_map_by_actor),
                    )?;
                    changes
                }
                other => return Err(self.unsupported(other)),
            },

            Operation::Style { from_pos, to_pos, max_created_at_map_by_actor, attributes, .. } => {
                match root.find_by_created_at_mut(&parent_created_at).ok_or_else(missing)? {
                    CrdtElement::RichText(text) => {
                        let (_, changes) = text.set_style_internal(
                            from_pos,
                            to_pos,
                            attributes,
                            executed_at,
                            Some(max_created_at_map_by_actor),
                        )?;
                        changes
                    }
                    other => return Err(self.unsupported(other)),
                }
            }

            Operation::Select { from_pos, to_pos, .. } => {
                // Presence on a removed container is dropped.
                if root.find_live_by_created_at(&parent_created_at).is_none() {
                    return Err(missing());
                }
                let change = match root.find_by_created_at_mut(&parent_created_at).ok_or_else(missing)? {
                    CrdtElement::PlainText(text) => {
                        text.select_internal(from_pos, to_pos, executed_at)?
                    }
                    CrdtElement::RichText(text) => {
                        text.select_internal(from_pos, to_pos, executed_at)?
                    }
                    other => return Err(self.unsupported(other)),
                };
                change.into_iter().collect()
            }
        };

        tracing::debug!(operation = %self, changes = changes.len(), "executed operation");
        Ok(changes)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.annotated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::nodes::rga_split::SegmentId;
    use crate::time::{ActorId, INITIAL_TIME_TICKET};
    use serde_json::json;

    fn t(lamport: u64, actor: u8) -> TimeTicket {
        TimeTicket::new(lamport, ActorId::from_u8(actor), 1)
    }

    fn pos(created_at: TimeTicket, offset: u32) -> NodePos {
        NodePos::new(SegmentId::new(created_at, 0), offset)
    }

    /// `{"t": <plain text "hello">}` with the text at `t(1, 1)`.
    fn doc_with_text() -> DocumentRoot {
        let mut root = DocumentRoot::new();
        Operation::Set {
            parent_created_at: INITIAL_TIME_TICKET,
            executed_at: t(1, 1),
            key: "t".into(),
            value: ElementValue::PlainText { created_at: t(1, 1) },
        }
        .execute(&mut root)
        .unwrap();
        let head = NodePos::new(SegmentId::new(INITIAL_TIME_TICKET, 0), 0);
        Operation::Edit {
            parent_created_at: t(1, 1),
            executed_at: t(2, 1),
            from_pos: head,
            to_pos: head,
            max_created_at_map_by_actor: CreatedAtMapByActor::new(),
            content: "hello".into(),
        }
        .execute(&mut root)
        .unwrap();
        root
    }

    fn select(parent: TimeTicket, at: TimeTicket, from: u32, to: u32) -> Operation {
        Operation::Select {
            parent_created_at: parent,
            executed_at: at,
            from_pos: pos(t(2, 1), from),
            to_pos: pos(t(2, 1), to),
        }
    }

    #[test]
    fn select_records_presence_without_touching_content() {
        let mut root = doc_with_text();
        let changes = select(t(1, 1), t(3, 2), 1, 3).execute(&mut root).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!((changes[0].from, changes[0].to), (1, 3));
        assert_eq!(root.to_json(), json!({ "t": "hello" }));
        // Replay changes nothing.
        assert!(select(t(1, 1), t(3, 2), 1, 3).execute(&mut root).unwrap().is_empty());
    }

    #[test]
    fn missing_parent_is_a_no_op() {
        let mut root = doc_with_text();
        let before = root.annotated();
        let err = select(t(9, 9), t(3, 2), 0, 1).execute(&mut root).unwrap_err();
        assert_eq!(err, OperationError::MissingAncestor(t(9, 9)));
        assert!(err.is_recoverable());
        assert_eq!(root.annotated(), before);
    }

    #[test]
    fn select_on_object_is_unsupported() {
        let mut root = doc_with_text();
        let err = select(INITIAL_TIME_TICKET, t(3, 2), 0, 1)
            .execute(&mut root)
            .unwrap_err();
        assert_eq!(
            err,
            OperationError::UnsupportedOperationOnType { operation: "select", kind: "object" }
        );
        assert!(!err.is_recoverable());
    }

    #[test]
    fn dangling_position_leaves_text_untouched() {
        let mut root = doc_with_text();
        let before = root.annotated();
        let op = Operation::Edit {
            parent_created_at: t(1, 1),
            executed_at: t(3, 1),
            from_pos: pos(t(2, 1), 1),
            to_pos: pos(t(7, 7), 0),
            max_created_at_map_by_actor: CreatedAtMapByActor::new(),
            content: "x".into(),
        };
        assert!(matches!(op.execute(&mut root), Err(OperationError::DanglingNodePos(_))));
        assert_eq!(root.annotated(), before);
    }

    #[test]
    fn remove_then_select_is_missing_ancestor() {
        let mut root = doc_with_text();
        Operation::Remove {
            parent_created_at: INITIAL_TIME_TICKET,
            executed_at: t(3, 1),
            created_at: t(1, 1),
        }
        .execute(&mut root)
        .unwrap();
        assert_eq!(root.to_json(), json!({}));
        assert_eq!(root.removed_element_count(), 1);
        assert_eq!(
            select(t(1, 1), t(3, 2), 0, 1).execute(&mut root),
            Err(OperationError::MissingAncestor(t(1, 1)))
        );
    }

    #[test]
    fn effected_created_at_per_variant() {
        let set = Operation::Set {
            parent_created_at: INITIAL_TIME_TICKET,
            executed_at: t(1, 1),
            key: "k".into(),
            value: ElementValue::Primitive { created_at: t(1, 1), value: json!(1) },
        };
        assert_eq!(set.effected_created_at(), t(1, 1));
        let mv = Operation::Move {
            parent_created_at: t(1, 1),
            executed_at: t(3, 1),
            prev_created_at: INITIAL_TIME_TICKET,
            created_at: t(2, 1),
        };
        assert_eq!(mv.effected_created_at(), t(2, 1));
        assert_eq!(select(t(1, 1), t(3, 2), 0, 1).effected_created_at(), t(1, 1));
    }

    #[test]
    fn annotated_forms() {
        assert_eq!(
            select(t(1, 1), t(3, 2), 0, 1).to_string(),
            "1:01:1.SELT(2:01:1:0:0,2:01:1:0:1)"
        );
        let set = Operation::Set {
            parent_created_at: INITIAL_TIME_TICKET,
            executed_at: t(1, 1),
            key: "k".into(),
            value: ElementValue::Primitive { created_at: t(1, 1), value: json!("v") },
        };
        assert_eq!(set.annotated(), "0:00:0.SET.k=\"v\"");
    }

    #[test]
    fn reused_stamp_is_not_aliased() {
        let mut root = doc_with_text();
        let before = root.annotated();
        let second_key = Operation::Set {
            parent_created_at: INITIAL_TIME_TICKET,
            executed_at: t(3, 1),
            key: "u".into(),
            value: ElementValue::PlainText { created_at: t(1, 1) },
        };
        assert_eq!(
            second_key.execute(&mut root),
            Err(OperationError::UnsupportedOperationOnType { operation: "set", kind: "text" })
        );
        assert_eq!(root.annotated(), before);

        let list = t(4, 1);
        Operation::Set {
            parent_created_at: INITIAL_TIME_TICKET,
            executed_at: list,
            key: "list".into(),
            value: ElementValue::Array { created_at: list },
        }
        .execute(&mut root)
        .unwrap();
        let into_array = Operation::Add {
            parent_created_at: list,
            executed_at: t(5, 1),
            prev_created_at: INITIAL_TIME_TICKET,
            value: ElementValue::PlainText { created_at: t(1, 1) },
        };
        assert_eq!(
            into_array.execute(&mut root),
            Err(OperationError::UnsupportedOperationOnType { operation: "add", kind: "text" })
        );
        assert_eq!(root.parent_of(&t(1, 1)), Some(INITIAL_TIME_TICKET));
        assert_eq!(root.to_json(), json!({ "list": [], "t": "hello" }));
    }

    #[test]
    fn array_operations() {
        let mut root = DocumentRoot::new();
        let list = t(1, 1);
        let ops = vec![
            Operation::Set {
                parent_created_at: INITIAL_TIME_TICKET,
                executed_at: list,
                key: "list".into(),
                value: ElementValue::Array { created_at: list },
            },
            Operation::Add {
                parent_created_at: list,
                executed_at: t(2, 1),
                prev_created_at: INITIAL_TIME_TICKET,
                value: ElementValue::Primitive { created_at: t(2, 1), value: json!("a") },
            },
            Operation::Add {
                parent_created_at: list,
                executed_at: t(3, 1),
                prev_created_at: t(2, 1),
                value: ElementValue::Primitive { created_at: t(3, 1), value: json!("b") },
            },
            Operation::Move {
                parent_created_at: list,
                executed_at: t(4, 1),
                prev_created_at: INITIAL_TIME_TICKET,
                created_at: t(3, 1),
            },
        ];
        for op in &ops {
            op.execute(&mut root).unwrap();
        }
        assert_eq!(root.to_json(), json!({ "list": ["b", "a"] }));
        for op in &ops {
            op.execute(&mut root).unwrap();
        }
        assert_eq!(root.to_json(), json!({ "list": ["b", "a"] }));

        Operation::Remove { parent_created_at: list, executed_at: t(5, 1), created_at: t(2, 1) }
            .execute(&mut root)
            .unwrap();
        assert_eq!(root.to_json(), json!({ "list": ["b"] }));

        let edit_on_array = Operation::Edit {
            parent_created_at: list,
            executed_at: t(6, 1),
            from_pos: pos(t(2, 1), 0),
            to_pos: pos(t(2, 1), 0),
            max_created_at_map_by_actor: CreatedAtMapByActor::new(),
            content: "x".into(),
        };
        assert_eq!(
            edit_on_array.execute(&mut root),
            Err(OperationError::UnsupportedOperationOnType { operation: "edit", kind: "array" })
        );
    }
}
