//! Call-count instrumentation interface.
//!
//! The counting facility itself lives outside this crate; the public
//! collective entry points only report "I was called" through [`OpCounter`].

/// Kinds of collective entry points that report to the counting facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// A sum reduction over the work group.
    Sum,
    /// A group-wide barrier.
    Barrier,
    /// A byte broadcast from the master rank.
    Broadcast,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Sum => f.write_str("sum"),
            OpKind::Barrier => f.write_str("barrier"),
            OpKind::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// Per-process call counting, keyed by operation kind.
pub trait OpCounter: Send + Sync {
    /// Record one invocation of the given operation kind.
    fn record(&self, op: OpKind);
}

/// Counter that discards every report. The default when no facility is wired.
#[derive(Debug, Default)]
pub struct NoopCounter;

impl OpCounter for NoopCounter {
    fn record(&self, _op: OpKind) {}
}
