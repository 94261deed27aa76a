//! Per-migration proposal caps and the platform API budget.

use std::sync::atomic::{AtomicU32, Ordering};

/// Proposals a migration may still open in this run.
///
/// Slots are reserved before the expensive work starts and handed back when no
/// proposal came of it, so concurrent workers never overshoot the cap.
#[derive(Debug)]
pub struct PrBudget {
  limit: u32,
  used: AtomicU32,
}

impl PrBudget {
  pub fn new(limit: u32) -> Self {
    Self {
      limit,
      used: AtomicU32::new(0),
    }
  }

  pub fn try_reserve(&self) -> bool {
    self
      .used
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| (used < self.limit).then_some(used + 1))
      .is_ok()
  }

  pub fn release(&self) {
    let _ = self
      .used
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| used.checked_sub(1));
  }

  pub fn used(&self) -> u32 {
    self.used.load(Ordering::Acquire)
  }

  pub fn remaining(&self) -> u32 {
    self.limit.saturating_sub(self.used())
  }

  pub fn is_exhausted(&self) -> bool {
    self.remaining() == 0
  }
}

/// Calls kept in reserve for work outside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiBudget {
  reserve: u64,
}

impl ApiBudget {
  pub fn new(reserve: u64) -> Self {
    Self { reserve }
  }

  pub fn is_exhausted(&self, remaining: u64) -> bool {
    remaining <= self.reserve
  }
}
