//! collab-doc: the mutation core of a replicated, conflict-free document.
//!
//! Operations name the container they target by its creation stamp, and text
//! positions name the segment they fall into by identity. Both survive being
//! recorded on one replica and replayed on another after concurrent edits.
//!
//! Layering, leaves first: [`time`] → [`crdt`] → [`operation`] → [`change`].

pub mod error;
pub mod time;
pub mod crdt;
pub mod operation;
pub mod change;

pub use change::{Change, ChangeContext, ExecutionReport, NewElement};
pub use crdt::nodes::rga_split::{CreatedAtMapByActor, NodePos, SegmentId};
pub use crdt::nodes::text::{Attributes, TextChange, TextChangeKind};
pub use crdt::{CrdtElement, DocumentRoot, ElementValue};
pub use error::OperationError;
pub use operation::Operation;
pub use time::{ActorId, ChangeId, LogicalClock, TimeTicket, INITIAL_TIME_TICKET, MAX_TIME_TICKET};
