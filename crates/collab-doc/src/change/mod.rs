//! Changes: the unit in which operations travel between replicas.
//!
//! A [`Change`] is an ordered batch of operations issued by one actor under
//! one [`ChangeId`]. Locally it is built by a [`ChangeContext`]; remotely it
//! is replayed with [`Change::execute`].

mod context;

pub use context::{ChangeContext, NewElement};

use serde::{Deserialize, Serialize};

use crate::crdt::nodes::text::TextChange;
use crate::crdt::DocumentRoot;
use crate::error::OperationError;
use crate::operation::Operation;
use crate::time::ChangeId;

/// An ordered batch of operations from one actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub operations: Vec<Operation>,
    /// Free-form description, not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of [`Change::execute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    /// Number of operations that applied.
    pub applied: usize,
    /// Index and error of every operation that was skipped.
    pub failed: Vec<(usize, OperationError)>,
    /// Text changes of the applied operations, in order.
    pub changes: Vec<TextChange>,
}

impl ExecutionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Change {
    pub fn new(id: ChangeId, operations: Vec<Operation>) -> Self {
        Self { id, operations, message: None }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Executes every operation against `root`.
    ///
    /// A failing operation is logged and skipped; the ones after it still
    /// run. Nothing here ever aborts the replica.
    pub fn execute(&self, root: &mut DocumentRoot) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for (index, op) in self.operations.iter().enumerate() {
            match op.execute(root) {
                Ok(changes) => {
                    report.applied += 1;
                    report.changes.extend(changes);
                }
                Err(err) => {
                    if err.is_recoverable() {
                        tracing::warn!(
                            change = %self.id.annotated(),
                            operation = %op,
                            error = %err,
                            "skipped operation"
                        );
                    } else {
                        tracing::error!(
                            change = %self.id.annotated(),
                            operation = %op,
                            error = %err,
                            "dropped invalid operation"
                        );
                    }
                    report.failed.push((index, err));
                }
            }
        }
        report
    }
}
