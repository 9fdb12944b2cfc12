//! Per-expression tier state. Interpreted runs report the tree's shape
//! fingerprint; once the same fingerprint has been seen `threshold` times in
//! a row the expression is ready for promotion. All fields are atomics or
//! behind a lock so one expression can be evaluated from many threads.

use super::CompiledEvaluator;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilationState {
    Uncompiled,
    Compiling,
    Compiled,
}

impl CompilationState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CompilationState::Compiling,
            2 => CompilationState::Compiled,
            _ => CompilationState::Uncompiled,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PromoterStats {
    pub interpreted_runs: u64,
    pub compiled_runs: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub compilation_failures: u64,
}

pub struct Promoter {
    threshold: u32,
    state: AtomicU8,
    compiled: RwLock<Option<Arc<CompiledEvaluator>>>,
    streak: AtomicU32,
    last_fingerprint: AtomicU64,
    interpreted_runs: AtomicU64,
    compiled_runs: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
    compilation_failures: AtomicU64,
}

impl std::fmt::Debug for Promoter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promoter")
            .field("threshold", &self.threshold)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Promoter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            state: AtomicU8::new(CompilationState::Uncompiled as u8),
            compiled: RwLock::new(None),
            streak: AtomicU32::new(0),
            last_fingerprint: AtomicU64::new(0),
            interpreted_runs: AtomicU64::new(0),
            compiled_runs: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
            demotions: AtomicU64::new(0),
            compilation_failures: AtomicU64::new(0),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self) -> CompilationState {
        CompilationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn evaluator(&self) -> Option<Arc<CompiledEvaluator>> {
        self.compiled.read().clone()
    }

    /// Feed the fingerprint of a successful interpreted run. Returns true
    /// once the streak of identical fingerprints reaches the threshold.
    pub fn observe(&self, fingerprint: u64) -> bool {
        let previous = self.last_fingerprint.swap(fingerprint, Ordering::AcqRel);
        let streak = if previous == fingerprint {
            self.streak.fetch_add(1, Ordering::AcqRel).saturating_add(1)
        } else {
            self.streak.store(1, Ordering::Release);
            1
        };
        streak >= self.threshold
    }

    pub fn record_interpreted_run(&self) {
        self.interpreted_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compiled_run(&self) {
        self.compiled_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset_streak(&self) {
        self.streak.store(0, Ordering::Release);
    }

    /// Claim the right to compile. Only one caller wins per promotion.
    pub fn try_begin(&self) -> bool {
        self.state
            .compare_exchange(
                CompilationState::Uncompiled as u8,
                CompilationState::Compiling as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn install(&self, evaluator: Arc<CompiledEvaluator>) {
        let mut slot = self.compiled.write();
        *slot = Some(evaluator);
        self.state
            .store(CompilationState::Compiled as u8, Ordering::Release);
        self.promotions.fetch_add(1, Ordering::Relaxed);
        self.reset_streak();
    }

    /// Record a failed compilation. An evaluator installed by an earlier
    /// success stays in place and keeps the state at `Compiled`.
    pub fn fail(&self) {
        let slot = self.compiled.read();
        let state = if slot.is_some() {
            CompilationState::Compiled
        } else {
            CompilationState::Uncompiled
        };
        self.state.store(state as u8, Ordering::Release);
        drop(slot);
        self.compilation_failures.fetch_add(1, Ordering::Relaxed);
        self.reset_streak();
    }

    /// Drop `evaluator` after a shape mismatch. A no-op when another thread
    /// already replaced or removed it.
    pub fn demote(&self, evaluator: &Arc<CompiledEvaluator>) -> bool {
        let mut slot = self.compiled.write();
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, evaluator) => {
                *slot = None;
                self.state
                    .store(CompilationState::Uncompiled as u8, Ordering::Release);
                self.demotions.fetch_add(1, Ordering::Relaxed);
                self.reset_streak();
                true
            }
            _ => false,
        }
    }

    /// Forget any compiled evaluator and start profiling again.
    pub fn revert(&self) {
        let mut slot = self.compiled.write();
        *slot = None;
        self.state
            .store(CompilationState::Uncompiled as u8, Ordering::Release);
        self.reset_streak();
    }

    pub fn stats(&self) -> PromoterStats {
        PromoterStats {
            interpreted_runs: self.interpreted_runs.load(Ordering::Relaxed),
            compiled_runs: self.compiled_runs.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            compilation_failures: self.compilation_failures.load(Ordering::Relaxed),
        }
    }
}
