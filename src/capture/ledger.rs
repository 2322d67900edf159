use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Stream,
    Context,
}

#[derive(Debug, Default)]
struct Counts {
    streams: AtomicUsize,
    contexts: AtomicUsize,
    peak_streams: AtomicUsize,
    peak_contexts: AtomicUsize,
}

impl Counts {
    fn live(&self, kind: ResourceKind) -> &AtomicUsize {
        match kind {
            ResourceKind::Stream => &self.streams,
            ResourceKind::Context => &self.contexts,
        }
    }

    fn peak(&self, kind: ResourceKind) -> &AtomicUsize {
        match kind {
            ResourceKind::Stream => &self.peak_streams,
            ResourceKind::Context => &self.peak_contexts,
        }
    }
}

/// Live and peak counts of camera streams and rendering contexts.
///
/// Cloning shares the counters.
#[derive(Clone, Debug, Default)]
pub struct ResourceLedger {
    counts: Arc<Counts>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub live_streams: usize,
    pub live_contexts: usize,
    pub peak_streams: usize,
    pub peak_contexts: usize,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one live resource until the returned token is dropped.
    pub fn track(&self, kind: ResourceKind) -> LedgerToken {
        let live = self.counts.live(kind).fetch_add(1, Ordering::SeqCst) + 1;
        self.counts.peak(kind).fetch_max(live, Ordering::SeqCst);
        LedgerToken {
            counts: Arc::clone(&self.counts),
            kind,
        }
    }

    pub fn live(&self, kind: ResourceKind) -> usize {
        self.counts.live(kind).load(Ordering::SeqCst)
    }

    pub fn peak(&self, kind: ResourceKind) -> usize {
        self.counts.peak(kind).load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            live_streams: self.live(ResourceKind::Stream),
            live_contexts: self.live(ResourceKind::Context),
            peak_streams: self.peak(ResourceKind::Stream),
            peak_contexts: self.peak(ResourceKind::Context),
        }
    }
}

/// Proof of one live resource in a [`ResourceLedger`].
#[derive(Debug)]
pub struct LedgerToken {
    counts: Arc<Counts>,
    kind: ResourceKind,
}

impl LedgerToken {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl Drop for LedgerToken {
    fn drop(&mut self) {
        self.counts.live(self.kind).fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_count_live_and_peak() {
        let ledger = ResourceLedger::new();
        let a = ledger.track(ResourceKind::Stream);
        let b = ledger.track(ResourceKind::Stream);
        let c = ledger.track(ResourceKind::Context);
        assert_eq!(ledger.live(ResourceKind::Stream), 2);
        drop(a);
        drop(b);
        drop(c);
        assert_eq!(
            ledger.snapshot(),
            LedgerSnapshot {
                live_streams: 0,
                live_contexts: 0,
                peak_streams: 2,
                peak_contexts: 1,
            }
        );
    }
}
