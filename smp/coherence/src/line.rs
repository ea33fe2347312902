use std::fmt;

/// MESI state of one cache line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LineState {
    /// Holds no usable data.
    #[default]
    Invalid,
    /// Clean, possibly present in other caches.
    Shared,
    /// Clean and present in no other cache; can be written without a bus transaction.
    Exclusive,
    /// Dirty and present in no other cache. Memory is stale until written back.
    Modified,
}

impl LineState {
    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self != LineState::Invalid
    }

    /// Modified or Exclusive: at most one bank may hold a line in either state.
    #[inline(always)]
    pub fn is_owned(self) -> bool {
        matches!(self, LineState::Modified | LineState::Exclusive)
    }

    pub fn letter(self) -> char {
        match self {
            LineState::Invalid => 'I',
            LineState::Shared => 'S',
            LineState::Exclusive => 'E',
            LineState::Modified => 'M',
        }
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    LocalRead,
    LocalWrite,
    SnoopRead,
    SnoopInvalidate,
    Evict,
}

/// What a bank must put on the bus as a consequence of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAction {
    None,
    BroadcastSnoopRead,
    BroadcastSnoopInvalidate,
    SupplyData,
    WriteBackAndSupply,
    WriteBack,
}

impl BusAction {
    /// The line has to reach memory before the transaction completes.
    pub fn writes_back(self) -> bool {
        matches!(self, BusAction::WriteBack | BusAction::WriteBackAndSupply)
    }

    /// The snooped bank hands its copy to the requester.
    pub fn supplies(self) -> bool {
        matches!(self, BusAction::SupplyData | BusAction::WriteBackAndSupply)
    }
}

/// The MESI transition table.
///
/// `Invalid` + `LocalRead` yields `Exclusive`. The requester only learns whether a peer
/// also holds the line once the snoop completes; [`fill_state`] applies that answer.
/// Events that make no sense for a state (snooping a line that isn't held) leave it alone.
pub fn transition(state: LineState, event: LineEvent) -> (LineState, BusAction) {
    use BusAction as A;
    use LineEvent::*;
    use LineState::*;

    match (state, event) {
        (Invalid, LocalRead) => (Exclusive, A::BroadcastSnoopRead),
        (Invalid, LocalWrite) => (Modified, A::BroadcastSnoopInvalidate),
        (Invalid, SnoopRead | SnoopInvalidate | Evict) => (Invalid, A::None),

        (Shared, LocalRead) => (Shared, A::None),
        (Shared, LocalWrite) => (Modified, A::BroadcastSnoopInvalidate),
        (Shared, SnoopRead) => (Shared, A::None),
        (Shared, SnoopInvalidate) => (Invalid, A::None),
        (Shared, Evict) => (Invalid, A::None),

        (Exclusive, LocalRead) => (Exclusive, A::None),
        (Exclusive, LocalWrite) => (Modified, A::None),
        (Exclusive, SnoopRead) => (Shared, A::SupplyData),
        (Exclusive, SnoopInvalidate) => (Invalid, A::None),
        (Exclusive, Evict) => (Invalid, A::None),

        (Modified, LocalRead | LocalWrite) => (Modified, A::None),
        (Modified, SnoopRead) => (Shared, A::WriteBackAndSupply),
        (Modified, SnoopInvalidate) => (Invalid, A::WriteBack),
        (Modified, Evict) => (Invalid, A::WriteBack),
    }
}

/// State of a line freshly filled by a read miss.
pub fn fill_state(was_shared: bool) -> LineState {
    if was_shared {
        LineState::Shared
    } else {
        LineState::Exclusive
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLine {
    pub tag: u64,
    pub state: LineState,
    pub data: Box<[u8]>,
    /// Bank-local access counter value at the last touch, for LRU
    pub last_used: u64,
}

impl CacheLine {
    pub fn new(line_bytes: usize) -> CacheLine {
        CacheLine {
            tag: 0,
            state: LineState::Invalid,
            data: vec![0; line_bytes].into_boxed_slice(),
            last_used: 0,
        }
    }

    #[inline(always)]
    pub fn holds(&self, tag: u64) -> bool {
        self.state.is_valid() && self.tag == tag
    }
}
