#![allow(dead_code)]

use collab_doc::crdt::nodes::rga_split::{RgaSplit, SplitValue};
use collab_doc::crdt::nodes::ArrayEntry;
use collab_doc::{
    ActorId, Change, ChangeContext, CrdtElement, DocumentRoot, ExecutionReport, LogicalClock,
    TimeTicket,
};

/// One actor's copy of a document.
pub struct Replica {
    pub clock: LogicalClock,
    pub root: DocumentRoot,
}

impl Replica {
    pub fn new(actor: u8) -> Self {
        Self {
            clock: LogicalClock::new(ActorId::from_u8(actor)),
            root: DocumentRoot::new(),
        }
    }

    /// Builds and applies one local change.
    pub fn change<F>(&mut self, f: F) -> Change
    where
        F: FnOnce(&mut ChangeContext<'_>),
    {
        let id = self.clock.next();
        let mut ctx = ChangeContext::new(id, &mut self.root);
        f(&mut ctx);
        ctx.into_change()
    }

    /// Applies a change received from another replica.
    pub fn apply(&mut self, change: &Change) -> ExecutionReport {
        self.clock.observe(change.id.lamport);
        change.execute(&mut self.root)
    }

    pub fn text(&self, created_at: TimeTicket) -> String {
        match self.root.find_by_created_at(&created_at) {
            Some(CrdtElement::PlainText(text)) => text.text(),
            Some(CrdtElement::RichText(text)) => text.text(),
            other => panic!("no text at {created_at}: {other:?}"),
        }
    }

    /// Elements of an array that are shown and not removed, in order.
    pub fn elements(&self, created_at: TimeTicket) -> Vec<TimeTicket> {
        match self.root.find_by_created_at(&created_at) {
            Some(CrdtElement::Array(arr)) => arr
                .elements()
                .map(|e| e.created_at)
                .filter(|c| self.root.find_by_created_at(c).is_some_and(|el| !el.is_removed()))
                .collect(),
            other => panic!("no array at {created_at}: {other:?}"),
        }
    }

    /// Every slot of an array, superseded ones included.
    pub fn slots(&self, created_at: TimeTicket) -> Vec<ArrayEntry> {
        match self.root.find_by_created_at(&created_at) {
            Some(CrdtElement::Array(arr)) => arr.entries().to_vec(),
            other => panic!("no array at {created_at}: {other:?}"),
        }
    }

    /// Every character ever inserted into the text, in sequence order, with
    /// its identity and tombstone.
    pub fn characters(&self, created_at: TimeTicket) -> Vec<Character> {
        match self.root.find_by_created_at(&created_at) {
            Some(CrdtElement::PlainText(text)) => characters(text.rga()),
            Some(CrdtElement::RichText(text)) => characters(text.rga()),
            other => panic!("no text at {created_at}: {other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Character {
    pub created_at: TimeTicket,
    pub offset: u32,
    pub removed_at: Option<TimeTicket>,
}

pub fn characters<V: SplitValue>(rga: &RgaSplit<V>) -> Vec<Character> {
    rga.iter()
        .flat_map(|seg| {
            (0..seg.content_len()).map(move |i| Character {
                created_at: seg.id.created_at,
                offset: seg.id.offset + i,
                removed_at: seg.removed_at,
            })
        })
        .collect()
}

pub fn ticket(lamport: u64, actor: u8, delimiter: u32) -> TimeTicket {
    TimeTicket::new(lamport, ActorId::from_u8(actor), delimiter)
}
