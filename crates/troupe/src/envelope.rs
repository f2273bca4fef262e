//! Message envelopes and their metadata.
//!
//! Every message travels as an [`Envelope`]: payload plus sender, recipient,
//! and a bit-packed [`MessageId`] carrying the request/response correlation
//! and the mailbox [`Category`]. Envelopes are heap-allocated nodes with an
//! intrusive forward link; whichever queue currently holds an envelope owns
//! it exclusively, and ownership transfers on push/pop.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::queue::QueueNode;

/// An opaque user message payload.
pub type Payload = Box<dyn Any + Send>;

// ---------------------------------------------------------------------------
// ActorId
// ---------------------------------------------------------------------------

/// Unique identifier for an actor.
///
/// Ids are assigned from a global atomic counter, guaranteeing uniqueness
/// within a single process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

impl ActorId {
    /// Generate a fresh, globally unique actor id.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ActorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({})", self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// The mailbox slot a message is routed to.
///
/// The slot index doubles as the visitation order of the multiplexed
/// mailbox: stream slots first, then high-priority, then regular.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Category {
    /// Streaming data flowing downstream. No selective-receive support.
    DownstreamData = 0,
    /// Streaming control flowing upstream (credit messages and the like).
    UpstreamControl = 1,
    /// Urgent messages; receives a 5x share of each resume quantum.
    HighPriority = 2,
    /// Ordinary messages.
    Regular = 3,
}

impl Category {
    pub(crate) fn from_index(idx: u64) -> Self {
        match idx {
            0 => Category::DownstreamData,
            1 => Category::UpstreamControl,
            2 => Category::HighPriority,
            _ => Category::Regular,
        }
    }
}

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Bit-packed message metadata.
///
/// Layout: `[2-bit category | request flag | response flag | 60-bit sequence]`.
/// The sequence is non-zero only for request/response pairs and correlates a
/// response (or a bounce) with the request that caused it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MessageId(u64);

const CATEGORY_SHIFT: u32 = 62;
const REQUEST_BIT: u64 = 1 << 61;
const RESPONSE_BIT: u64 = 1 << 60;
const SEQ_MASK: u64 = (1 << 60) - 1;

impl MessageId {
    /// A plain (non-request) message id in the given category.
    pub fn of(category: Category) -> Self {
        MessageId((category as u64) << CATEGORY_SHIFT)
    }

    /// A request id with a fresh correlation sequence.
    pub fn request(category: Category) -> Self {
        static SEQ: AtomicU64 = AtomicU64::new(1);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed) & SEQ_MASK;
        MessageId((category as u64) << CATEGORY_SHIFT | REQUEST_BIT | seq)
    }

    /// The id of the response correlated with this request.
    ///
    /// Keeps the sequence and category, swaps the request flag for the
    /// response flag.
    pub fn response(self) -> Self {
        MessageId(self.0 & !REQUEST_BIT | RESPONSE_BIT)
    }

    pub fn category(self) -> Category {
        Category::from_index(self.0 >> CATEGORY_SHIFT)
    }

    pub fn is_request(self) -> bool {
        self.0 & REQUEST_BIT != 0
    }

    pub fn is_response(self) -> bool {
        self.0 & RESPONSE_BIT != 0
    }

    pub fn sequence(self) -> u64 {
        self.0 & SEQ_MASK
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageId")
            .field("category", &self.category())
            .field("request", &self.is_request())
            .field("response", &self.is_response())
            .field("sequence", &self.sequence())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ExitReason
// ---------------------------------------------------------------------------

/// Why an actor terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Normal completion.
    Normal,
    /// Clean system-initiated shutdown. Non-crashing for exit propagation,
    /// like `Normal`.
    Shutdown,
    /// Explicitly killed via `quit`.
    Kill,
    /// A user handler panicked.
    UnhandledPanic,
    /// User-defined exit code.
    Custom(u64),
}

impl ExitReason {
    /// Non-crashing reasons do not terminate linked peers.
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal | ExitReason::Shutdown)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::Kill => write!(f, "kill"),
            ExitReason::UnhandledPanic => write!(f, "unhandled panic"),
            ExitReason::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

// ---------------------------------------------------------------------------
// User-visible system payloads
// ---------------------------------------------------------------------------

/// Delivered to an actor with `trap_exit` enabled when a linked peer exits.
#[derive(Debug, Clone)]
pub struct ExitMsg {
    pub source: ActorId,
    pub reason: ExitReason,
}

/// Delivered to a monitoring actor when the monitored peer terminates.
#[derive(Debug, Clone)]
pub struct DownMsg {
    /// The monitor reference returned by `monitor`.
    pub monitor: u64,
    pub source: ActorId,
    pub reason: ExitReason,
}

/// Error reply synthesized for a request whose recipient terminated.
#[derive(Debug, Clone)]
pub struct Bounced {
    pub reason: ExitReason,
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// The content of an envelope: either an opaque user payload or one of the
/// reserved system messages interpreted by the resume loop.
pub(crate) enum Item {
    /// Opaque user payload.
    User(Payload),
    /// A linked peer terminated.
    Exit { source: ActorId, reason: ExitReason },
    /// A monitored peer terminated.
    Down {
        monitor: u64,
        source: ActorId,
        reason: ExitReason,
    },
    /// A behavior or receive timeout elapsed. Stale generations are dropped.
    Timeout { generation: u64 },
    /// Forced termination, bypassing `trap_exit`.
    Kill { reason: ExitReason },
    /// Marker left behind once the content has been consumed.
    Taken,
}

impl Item {
    /// Move the content out, leaving a `Taken` marker behind.
    pub(crate) fn take(&mut self) -> Item {
        std::mem::replace(self, Item::Taken)
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::User(_) => write!(f, "User(..)"),
            Item::Exit { source, reason } => write!(f, "Exit({source}, {reason})"),
            Item::Down { source, reason, .. } => write!(f, "Down({source}, {reason})"),
            Item::Timeout { generation } => write!(f, "Timeout({generation})"),
            Item::Kill { reason } => write!(f, "Kill({reason})"),
            Item::Taken => write!(f, "Taken"),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A message in flight: content plus metadata and the intrusive queue link.
pub(crate) struct Envelope {
    pub sender: Option<ActorId>,
    pub recipient: ActorId,
    pub mid: MessageId,
    pub item: Item,
    next: Option<Box<Envelope>>,
}

impl Envelope {
    /// A user message envelope.
    pub(crate) fn user(
        sender: Option<ActorId>,
        recipient: ActorId,
        mid: MessageId,
        payload: Payload,
    ) -> Box<Envelope> {
        Box::new(Envelope {
            sender,
            recipient,
            mid,
            item: Item::User(payload),
            next: None,
        })
    }

    /// A system message envelope. System messages ride the high-priority
    /// slot so they overtake regular traffic.
    pub(crate) fn system(sender: Option<ActorId>, recipient: ActorId, item: Item) -> Box<Envelope> {
        Box::new(Envelope {
            sender,
            recipient,
            mid: MessageId::of(Category::HighPriority),
            item,
            next: None,
        })
    }
}

impl QueueNode for Envelope {
    fn next_slot(&mut self) -> &mut Option<Box<Self>> {
        &mut self.next
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("mid", &self.mid)
            .field("item", &self.item)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_id_unique() {
        let ids: Vec<ActorId> = (0..100).map(|_| ActorId::next()).collect();
        let mut seen = std::collections::HashSet::new();
        for id in &ids {
            assert!(seen.insert(id.as_u64()), "duplicate id: {}", id);
        }
    }

    #[test]
    fn test_message_id_packing_roundtrip() {
        for cat in [
            Category::DownstreamData,
            Category::UpstreamControl,
            Category::HighPriority,
            Category::Regular,
        ] {
            let mid = MessageId::of(cat);
            assert_eq!(mid.category(), cat);
            assert!(!mid.is_request());
            assert!(!mid.is_response());
            assert_eq!(mid.sequence(), 0);
        }
    }

    #[test]
    fn test_message_id_request_response() {
        let req = MessageId::request(Category::Regular);
        assert!(req.is_request());
        assert!(!req.is_response());
        assert_ne!(req.sequence(), 0);

        let resp = req.response();
        assert!(!resp.is_request());
        assert!(resp.is_response());
        assert_eq!(resp.sequence(), req.sequence());
        assert_eq!(resp.category(), Category::Regular);
    }

    #[test]
    fn test_request_sequences_distinct() {
        let a = MessageId::request(Category::Regular);
        let b = MessageId::request(Category::Regular);
        assert_ne!(a.sequence(), b.sequence());
    }

    #[test]
    fn test_exit_reason_is_normal() {
        assert!(ExitReason::Normal.is_normal());
        assert!(ExitReason::Shutdown.is_normal());
        assert!(!ExitReason::Kill.is_normal());
        assert!(!ExitReason::UnhandledPanic.is_normal());
        assert!(!ExitReason::Custom(7).is_normal());
    }

    #[test]
    fn test_item_take_leaves_marker() {
        let mut item = Item::User(Box::new(42i32));
        let taken = item.take();
        assert!(matches!(taken, Item::User(_)));
        assert!(matches!(item, Item::Taken));
    }
}
