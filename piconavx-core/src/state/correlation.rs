//! Request / response correlation.
//!
//! The wire protocol carries no request identifiers, so a report can only be
//! matched to a request by its kind. [`KindCorrelator`] resolves *every*
//! waiter of a kind on the next report of that kind: two callers awaiting
//! `Health` concurrently both receive the first `HEALTH:` line that arrives,
//! even though two `GETHEALTH:` commands were sent. Callers go through the
//! [`ReportCorrelator`] trait so a protocol revision with real request ids
//! can swap the strategy without touching them.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::protocol::{Report, ReportKind};

/// Strategy for matching inbound reports to outstanding requests.
pub trait ReportCorrelator: Send + Sync + Debug {
    /// Register interest in the next report of `kind`. Must be called before
    /// the request command is queued, so a fast answer cannot be missed.
    fn register(&self, kind: ReportKind) -> oneshot::Receiver<Report>;

    /// Deliver `report` to the waiters it resolves. Returns how many.
    fn complete(&self, report: &Report) -> usize;

    /// Forget waiters of `kind` whose receiver was dropped. Returns how many.
    fn prune(&self, kind: ReportKind) -> usize;

    /// Drop every waiter; their receivers observe a closed channel.
    fn abandon_all(&self) -> usize;

    /// Waiters still outstanding.
    fn pending_count(&self) -> usize;
}

// ── Waiter ───────────────────────────────────────────────────────

#[derive(Debug)]
struct Waiter {
    tx: oneshot::Sender<Report>,
    registered_at: Instant,
}

// ── KindCorrelator ───────────────────────────────────────────────

/// Correlates by report kind only.
#[derive(Debug, Default)]
pub struct KindCorrelator {
    waiters: Mutex<HashMap<ReportKind, Vec<Waiter>>>,
}

impl KindCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ReportKind, Vec<Waiter>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Age of the oldest live waiter of `kind`.
    pub fn oldest_wait(&self, kind: ReportKind) -> Option<Duration> {
        self.lock()
            .get(&kind)?
            .iter()
            .filter(|w| !w.tx.is_closed())
            .map(|w| w.registered_at.elapsed())
            .max()
    }

    #[cfg(test)]
    pub(crate) fn registered(&self, kind: ReportKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }
}

impl ReportCorrelator for KindCorrelator {
    fn register(&self, kind: ReportKind) -> oneshot::Receiver<Report> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.lock();
        let slot = waiters.entry(kind).or_default();
        // Callers that gave up (dropped their receiver) are pruned here.
        slot.retain(|w| !w.tx.is_closed());
        slot.push(Waiter {
            tx,
            registered_at: Instant::now(),
        });
        rx
    }

    fn complete(&self, report: &Report) -> usize {
        let Some(waiters) = self.lock().remove(&report.kind()) else {
            return 0;
        };
        waiters
            .into_iter()
            .map(|w| w.tx.send(*report).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    fn prune(&self, kind: ReportKind) -> usize {
        let mut waiters = self.lock();
        let Some(slot) = waiters.get_mut(&kind) else {
            return 0;
        };
        let before = slot.len();
        slot.retain(|w| !w.tx.is_closed());
        let pruned = before - slot.len();
        if slot.is_empty() {
            waiters.remove(&kind);
        }
        pruned
    }

    fn abandon_all(&self) -> usize {
        let mut waiters = self.lock();
        let count = waiters.values().map(Vec::len).sum();
        waiters.clear();
        count
    }

    fn pending_count(&self) -> usize {
        self.lock()
            .values()
            .flat_map(|v| v.iter())
            .filter(|w| !w.tx.is_closed())
            .count()
    }
}

// ── Tests ─────────────────────────────────────────────────────────
