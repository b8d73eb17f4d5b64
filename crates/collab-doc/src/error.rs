//! Errors raised while executing operations.

use thiserror::Error;

use crate::crdt::nodes::rga_split::NodePos;
use crate::time::TimeTicket;

/// Why a single operation could not be applied.
///
/// None of these is allowed to escape the execution of one operation: the
/// caller logs it and moves on to the next operation. An operation that fails
/// leaves the document untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The targeted container does not exist on this replica (not yet
    /// synchronized, or removed before a presence update arrived).
    #[error("fail to find {}", .0.annotated())]
    MissingAncestor(TimeTicket),

    /// The targeted container exists but cannot perform the operation.
    #[error("fail to execute, {operation} is not supported on {kind}")]
    UnsupportedOperationOnType {
        operation: &'static str,
        kind: &'static str,
    },

    /// A position names a segment identity that never existed here, or an
    /// offset past the end of that segment's content.
    #[error("fail to resolve position {}", .0.annotated())]
    DanglingNodePos(NodePos),
}

impl OperationError {
    /// `true` for the failures that are expected under eventual consistency
    /// and are safe to treat as a no-op.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, OperationError::UnsupportedOperationOnType { .. })
    }
}

pub type Result<T> = std::result::Result<T, OperationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::nodes::rga_split::SegmentId;
    use crate::time::{ActorId, TimeTicket};

    #[test]
    fn messages() {
        let ticket = TimeTicket::new(3, ActorId::from_u8(0x1f), 2);
        assert_eq!(
            OperationError::MissingAncestor(ticket).to_string(),
            "fail to find 3:1f:2"
        );
        let pos = NodePos::new(SegmentId::new(ticket, 4), 1);
        assert_eq!(
            OperationError::DanglingNodePos(pos).to_string(),
            "fail to resolve position 3:1f:2:4:1"
        );
        let err = OperationError::UnsupportedOperationOnType { operation: "select", kind: "object" };
        assert_eq!(err.to_string(), "fail to execute, select is not supported on object");
    }

    #[test]
    fn only_type_mismatch_is_unrecoverable() {
        let ticket = TimeTicket::new(1, ActorId::from_u8(1), 1);
        assert!(OperationError::MissingAncestor(ticket).is_recoverable());
        assert!(!OperationError::UnsupportedOperationOnType { operation: "edit", kind: "array" }
            .is_recoverable());
    }
}
