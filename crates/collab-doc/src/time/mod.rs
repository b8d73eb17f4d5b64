//! Logical time for the document: actor IDs, time tickets and clocks.
//!
//! Every element and every operation is stamped exactly once with a
//! [`TimeTicket`]. Tickets are totally ordered, so they double as globally
//! unique identities and as tie-breakers between concurrent edits.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── ActorId ────────────────────────────────────────────────────────────────

/// Number of bytes in an [`ActorId`].
pub const ACTOR_ID_LEN: usize = 12;

/// Fixed-size identifier of a replica (actor).
///
/// Displayed and serialized as 24 lowercase hex characters. Ordering is
/// byte-wise, which matches the lexical order of the hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorId([u8; ACTOR_ID_LEN]);

impl ActorId {
    /// The actor that owns system-created elements (the root object).
    pub const INITIAL: ActorId = ActorId([0x00; ACTOR_ID_LEN]);
    /// Greatest possible actor.
    pub const MAX: ActorId = ActorId([0xff; ACTOR_ID_LEN]);

    pub const fn new(bytes: [u8; ACTOR_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Convenience constructor for tests and fixtures: the last byte is `n`.
    pub const fn from_u8(n: u8) -> Self {
        let mut bytes = [0u8; ACTOR_ID_LEN];
        bytes[ACTOR_ID_LEN - 1] = n;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ACTOR_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(ACTOR_ID_LEN * 2);
        for b in self.0 {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Error returned when parsing an [`ActorId`] from its hex form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid actor id {0:?}: expected 24 hex characters")]
pub struct ParseActorIdError(pub String);

impl FromStr for ActorId {
    type Err = ParseActorIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ACTOR_ID_LEN * 2 || !s.is_ascii() {
            return Err(ParseActorIdError(s.to_string()));
        }
        let mut bytes = [0u8; ACTOR_ID_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseActorIdError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for ActorId {
    type Error = ParseActorIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ActorId> for String {
    fn from(id: ActorId) -> Self {
        id.to_hex()
    }
}

// ── TimeTicket ─────────────────────────────────────────────────────────────

/// An immutable logical timestamp: `(lamport, actor, delimiter)`.
///
/// `delimiter` distinguishes tickets issued inside the same local change,
/// which all share one lamport value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeTicket {
    pub lamport: u64,
    pub actor: ActorId,
    pub delimiter: u32,
}

/// Stamp of the document root and of every sequence head.
pub const INITIAL_TIME_TICKET: TimeTicket = TimeTicket::new(0, ActorId::INITIAL, 0);

/// Greatest possible stamp.
pub const MAX_TIME_TICKET: TimeTicket = TimeTicket::new(u64::MAX, ActorId::MAX, u32::MAX);

impl TimeTicket {
    pub const fn new(lamport: u64, actor: ActorId, delimiter: u32) -> Self {
        Self { lamport, actor, delimiter }
    }

    /// `true` if `self` is strictly greater than `other`.
    #[inline]
    pub fn after(&self, other: &TimeTicket) -> bool {
        self > other
    }

    /// `true` if `self` is strictly less than `other`.
    #[inline]
    pub fn before(&self, other: &TimeTicket) -> bool {
        self < other
    }

    /// Short diagnostic form: `lamport:xx:delimiter`, where `xx` are the last
    /// two hex characters of the actor.
    pub fn annotated(&self) -> String {
        let hex = self.actor.to_hex();
        format!("{}:{}:{}", self.lamport, &hex[hex.len() - 2..], self.delimiter)
    }
}

impl Ord for TimeTicket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then_with(|| self.actor.cmp(&other.actor))
            .then_with(|| self.delimiter.cmp(&other.delimiter))
    }
}

impl PartialOrd for TimeTicket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimeTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.annotated())
    }
}

// ── ChangeId ───────────────────────────────────────────────────────────────

/// Identifies one change (a batch of operations) of one actor.
///
/// Every ticket issued inside the change shares its lamport value and is told
/// apart by its delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeId {
    pub client_seq: u32,
    pub lamport: u64,
    pub actor: ActorId,
}

impl ChangeId {
    pub fn new(client_seq: u32, lamport: u64, actor: ActorId) -> Self {
        Self { client_seq, lamport, actor }
    }

    pub fn create_time_ticket(&self, delimiter: u32) -> TimeTicket {
        TimeTicket::new(self.lamport, self.actor, delimiter)
    }

    pub fn annotated(&self) -> String {
        format!("{}:{}:{}", self.lamport, self.actor, self.client_seq)
    }
}

// ── LogicalClock ───────────────────────────────────────────────────────────

/// A per-actor Lamport clock.
///
/// One instance lives for one actor session and is passed explicitly to the
/// code that builds changes. Each call to [`next`](Self::next) yields a
/// [`ChangeId`] whose tickets are greater than every ticket this clock has
/// issued or observed before.
#[derive(Debug, Clone)]
pub struct LogicalClock {
    pub actor: ActorId,
    pub lamport: u64,
    pub client_seq: u32,
}

impl LogicalClock {
    pub fn new(actor: ActorId) -> Self {
        Self { actor, lamport: 0, client_seq: 0 }
    }

    /// Advances the clock and returns the ID of the next local change.
    pub fn next(&mut self) -> ChangeId {
        self.lamport += 1;
        self.client_seq += 1;
        ChangeId::new(self.client_seq, self.lamport, self.actor)
    }

    /// Observes the lamport value of a remote change.
    ///
    /// Idempotent: observing the same or an older value has no effect.
    pub fn observe(&mut self, lamport: u64) {
        if lamport > self.lamport {
            self.lamport = lamport;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(lamport: u64, actor: u8, delimiter: u32) -> TimeTicket {
        TimeTicket::new(lamport, ActorId::from_u8(actor), delimiter)
    }

    #[test]
    fn order_is_lamport_then_actor_then_delimiter() {
        assert!(t(2, 1, 0).after(&t(1, 9, 9)));
        assert!(t(1, 2, 0).after(&t(1, 1, 9)));
        assert!(t(1, 1, 2).after(&t(1, 1, 1)));
        assert_eq!(t(1, 1, 1).cmp(&t(1, 1, 1)), Ordering::Equal);
        assert!(INITIAL_TIME_TICKET.before(&t(0, 0, 1)));
        assert!(MAX_TIME_TICKET.after(&t(u64::MAX, 255, 0)));
    }

    #[test]
    fn actor_hex_round_trip() {
        let actor = ActorId::new([0xde, 0xad, 0xbe, 0xef, 0, 1, 2, 3, 4, 5, 6, 0x7f]);
        let hex = actor.to_hex();
        assert_eq!(hex, "deadbeef000102030405067f");
        assert_eq!(hex.parse::<ActorId>().unwrap(), actor);
        assert!("xyz".parse::<ActorId>().is_err());
        assert!("zz0000000000000000000000".parse::<ActorId>().is_err());
    }

    #[test]
    fn annotated_uses_actor_suffix() {
        assert_eq!(t(7, 0xab, 3).annotated(), "7:ab:3");
        assert_eq!(INITIAL_TIME_TICKET.annotated(), "0:00:0");
    }

    #[test]
    fn clock_changes_are_strictly_increasing() {
        let mut clock = LogicalClock::new(ActorId::from_u8(1));
        let first = clock.next();
        let a = first.create_time_ticket(1);
        let b = first.create_time_ticket(2);
        let c = clock.next().create_time_ticket(1);
        assert!(a < b && b < c);
        assert_eq!(c, t(2, 1, 1));
        assert_eq!(clock.client_seq, 2);
    }

    #[test]
    fn clock_observe_moves_lamport_forward() {
        let mut clock = LogicalClock::new(ActorId::from_u8(1));
        clock.observe(10);
        assert_eq!(clock.next().lamport, 11);
        clock.observe(4);
        assert_eq!(clock.next().lamport, 12);
    }

    #[test]
    fn change_id_annotated() {
        let id = ChangeId::new(3, 9, ActorId::from_u8(1));
        assert_eq!(id.annotated(), "9:000000000000000000000001:3");
        assert_eq!(id.create_time_ticket(4), t(9, 1, 4));
    }
}
