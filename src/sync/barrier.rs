//! The mutate/sync barrier (spec §4.3, component C4).
//!
//! A direct, idiomatic-Rust port of the original's `pheap::barrier`
//! (`original_source/ruts/include/pheap/pheap_barrier.h`): a lock-free fast
//! path built on a single compare-and-swap of a packed 64-bit word, with a
//! `Mutex` + three `Condvar`s reserved for the slow path where a mutator or
//! a piggybacking syncer must actually block.
//!
//! Terminology matches spec §4.3 exactly: `enter_for_mutate`/
//! `exit_for_mutate` bracket a *mutate region*; `enter_for_sync`/
//! `exit_for_sync` bracket a *sync region*. [`MutateRegion`] and
//! [`SyncRegion`] are the scoped RAII guards mirroring the original's
//! `mutate_region`/`sync_region`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::GcError;

/// The five states a barrier can be in (spec §4.3 table).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Idle = 0,
    Mutating = 1,
    Allowing = 2,
    Syncing = 3,
    Unwinding = 4,
}

impl State {
    #[inline(always)]
    fn from_u8(v: u8) -> State {
        match v {
            0 => State::Idle,
            1 => State::Mutating,
            2 => State::Allowing,
            3 => State::Syncing,
            _ => State::Unwinding,
        }
    }
}

/// `(n_mutate_regions, n_sync_regions, state)` packed into one 64-bit word
/// so the fast path advances with a single CAS (spec §4.3: "Compound state:
/// ... packed into a 64-bit word and updated by compare-and-swap").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct CompoundState {
    n_mutate_regions: u16,
    n_sync_regions: u16,
    state: State,
}

static_assertions::const_assert!(std::mem::size_of::<CompoundState>() <= 8);

impl CompoundState {
    const IDLE: CompoundState = CompoundState {
        n_mutate_regions: 0,
        n_sync_regions: 0,
        state: State::Idle,
    };

    #[inline(always)]
    fn encode(self) -> u64 {
        (self.n_mutate_regions as u64)
            | ((self.n_sync_regions as u64) << 16)
            | ((self.state as u64) << 32)
    }

    #[inline(always)]
    fn decode(word: u64) -> Self {
        CompoundState {
            n_mutate_regions: (word & 0xffff) as u16,
            n_sync_regions: ((word >> 16) & 0xffff) as u16,
            state: State::from_u8(((word >> 32) & 0xff) as u8),
        }
    }

    #[inline(always)]
    fn with(self, state: State, delta_mutate: i32, delta_sync: i32) -> Self {
        CompoundState {
            n_mutate_regions: (self.n_mutate_regions as i32 + delta_mutate) as u16,
            n_sync_regions: (self.n_sync_regions as i32 + delta_sync) as u16,
            state,
        }
    }
}

/// The mutate/sync barrier (spec §4.3). One instance lives in the shared
/// control block; every attached process shares the same `_state` word,
/// `Mutex` and `Condvar`s through the shared-memory mapping (spec: "The
/// barrier's compound state is also shared; its condition variables are
/// cross-process primitives" — this crate models that with
/// process-local but logically-shared primitives; wiring them onto actual
/// cross-process futex/condvar objects is the `OsMapper`'s concern, out of
/// scope here).
pub struct Barrier {
    state: AtomicU64,
    mutex: Mutex<()>,
    mutate_okay: Condvar,
    sync_okay: Condvar,
    sync_done: Condvar,
}

impl Barrier {
    pub fn new() -> Self {
        Barrier {
            state: AtomicU64::new(CompoundState::IDLE.encode()),
            mutex: Mutex::new(()),
            mutate_okay: Condvar::new(),
            sync_okay: Condvar::new(),
            sync_done: Condvar::new(),
        }
    }

    #[inline(always)]
    fn current(&self) -> CompoundState {
        CompoundState::decode(self.state.load(Ordering::Acquire))
    }

    #[inline(always)]
    fn update(&self, expected: &mut CompoundState, new: CompoundState) -> bool {
        match self.state.compare_exchange(
            expected.encode(),
            new.encode(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(actual) => {
                *expected = CompoundState::decode(actual);
                false
            }
        }
    }

    /// Enter a mutate region. Blocks only if a sync region is in progress
    /// (spec §4.3 `enter_for_mutate`).
    pub fn enter_for_mutate(&self) {
        let mut s = self.current();
        loop {
            match s.state {
                State::Idle | State::Mutating => {
                    let next = s.with(State::Mutating, 1, 0);
                    if self.update(&mut s, next) {
                        return;
                    }
                }
                State::Allowing | State::Syncing | State::Unwinding => {
                    let next = s.with(s.state, 1, 0);
                    if self.update(&mut s, next) {
                        let guard = self.mutex.lock().unwrap();
                        if self.current().state == State::Mutating {
                            return;
                        }
                        let _guard = self
                            .mutate_okay
                            .wait_while(guard, |_| self.current().state != State::Mutating)
                            .unwrap();
                        return;
                    }
                    s = self.current();
                }
            }
        }
    }

    /// Exit a mutate region. If this is the last mutator and a syncer is
    /// waiting, transitions to `Allowing` and wakes it (spec §4.3
    /// `exit_for_mutate`).
    pub fn exit_for_mutate(&self) {
        let mut s = self.current();
        loop {
            debug_assert_eq!(s.state, State::Mutating, "exit_for_mutate outside a mutate region");
            let next_state = if s.n_mutate_regions > 1 {
                State::Mutating
            } else if s.n_sync_regions == 0 {
                State::Idle
            } else {
                State::Allowing
            };
            let next = s.with(next_state, -1, 0);
            if self.update(&mut s, next) {
                if next_state == State::Allowing {
                    let _guard = self.mutex.lock().unwrap();
                    self.sync_okay.notify_all();
                }
                return;
            }
        }
    }

    /// Enter a sync region with no wait bound. Returns `true` ("did_sync")
    /// iff this caller is the one that actually performs the sync work; a
    /// caller that arrives while another sync is already in
    /// `Syncing`/`Unwinding` piggybacks and returns `false` (spec §4.3
    /// `enter_for_sync`, and S6). Never fails: an unbounded wait cannot time
    /// out.
    pub fn enter_for_sync(&self) -> bool {
        match self.enter_for_sync_timeout(None) {
            Ok(did_sync) => did_sync,
            Err(_) => unreachable!("an unbounded wait cannot time out"),
        }
    }

    /// Enter a sync region, failing with [`GcError::BarrierTimeout`] if
    /// `timeout` elapses before the wait this call registers for is
    /// satisfied (spec §5/§7: "the sync region waits may be bounded to
    /// detect deadlock caused by a crashed peer; on timeout the barrier
    /// invokes the dead-process recovery path"). `None` waits unbounded.
    ///
    /// On timeout the region this call registered is credited back — the
    /// same bookkeeping a piggybacker's `exit_for_sync(false)` performs — so
    /// a timed-out caller leaves the barrier exactly as if it had never
    /// called `enter_for_sync_timeout` at all.
    pub fn enter_for_sync_timeout(&self, timeout: Option<Duration>) -> Result<bool, GcError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut s = self.current();
        loop {
            match s.state {
                State::Idle => {
                    let next = s.with(State::Syncing, 0, 1);
                    if self.update(&mut s, next) {
                        return Ok(true);
                    }
                }
                State::Mutating => {
                    let next = s.with(State::Allowing, 0, 1);
                    if self.update(&mut s, next) {
                        return self.wait_for_mutators_then_claim(deadline);
                    }
                    s = self.current();
                }
                State::Allowing => {
                    // A syncer is already waiting for mutators to drain;
                    // piggyback on it rather than registering a second wait.
                    let next = s.with(State::Allowing, 0, 1);
                    if self.update(&mut s, next) {
                        return self.wait_for_sync_done(deadline);
                    }
                    s = self.current();
                }
                State::Syncing | State::Unwinding => {
                    let next = s.with(s.state, 0, 1);
                    if self.update(&mut s, next) {
                        return self.wait_for_sync_done(deadline);
                    }
                    s = self.current();
                }
            }
        }
    }

    /// Waits for the last mutator to drain, then claims the `Syncing` slot
    /// for this caller (or waits out a racing piggybacker that claimed it
    /// first).
    fn wait_for_mutators_then_claim(&self, deadline: Option<Instant>) -> Result<bool, GcError> {
        let guard = self.mutex.lock().unwrap();
        match self.wait_while_deadline(guard, &self.sync_okay, deadline, || {
            let cur = self.current();
            cur.state == State::Allowing && cur.n_mutate_regions > 0
        }) {
            Ok(guard) => {
                drop(guard);
                self.claim_syncing(deadline)
            }
            Err(e) => {
                self.abandon_sync_wait();
                Err(e)
            }
        }
    }

    /// Called after waking from `sync_okay` while in `Allowing` with no
    /// mutators left: claims the `Syncing` slot for this caller, or — if
    /// another piggybacking caller raced us into it — waits out their sync.
    fn claim_syncing(&self, deadline: Option<Instant>) -> Result<bool, GcError> {
        let mut s = self.current();
        loop {
            match s.state {
                State::Allowing if s.n_mutate_regions == 0 => {
                    let next = s.with(State::Syncing, 0, 0);
                    if self.update(&mut s, next) {
                        return Ok(true);
                    }
                }
                State::Syncing | State::Unwinding => return self.wait_for_sync_done(deadline),
                _ => {
                    s = self.current();
                }
            }
        }
    }

    /// Waits until the currently-running sync has at least left `Syncing`
    /// (spec §4.3: "signal sync-done to piggyback waiters" happens at the
    /// Syncing->Unwinding transition, before the owning syncer goes on to
    /// release mutators). Piggybackers only need to know that round of sync
    /// work is done; they don't need to wait for mutators to be released
    /// too.
    fn wait_for_sync_done(&self, deadline: Option<Instant>) -> Result<bool, GcError> {
        let guard = self.mutex.lock().unwrap();
        match self.wait_while_deadline(guard, &self.sync_done, deadline, || {
            self.current().state == State::Syncing
        }) {
            Ok(_) => Ok(false),
            Err(e) => {
                self.abandon_sync_wait();
                Err(e)
            }
        }
    }

    /// Credits a sync region back without touching `state`, identical to the
    /// bookkeeping half of `exit_for_sync(false)`. Used to recover from a
    /// timed-out wait: the region this caller registered in
    /// `enter_for_sync_timeout` is undone as though it never happened.
    fn abandon_sync_wait(&self) {
        let mut s = self.current();
        loop {
            let next = s.with(s.state, 0, -1);
            if self.update(&mut s, next) {
                return;
            }
        }
    }

    /// `Condvar::wait_while`, bounded by an optional absolute `deadline`.
    /// Loops on `wait_timeout` rather than relying on a single bounded wait,
    /// since a spurious wakeup before the deadline must re-check the
    /// condition against the *remaining* time, not the original duration.
    fn wait_while_deadline<'m, F>(
        &self,
        guard: MutexGuard<'m, ()>,
        condvar: &Condvar,
        deadline: Option<Instant>,
        mut condition: F,
    ) -> Result<MutexGuard<'m, ()>, GcError>
    where
        F: FnMut() -> bool,
    {
        let Some(deadline) = deadline else {
            return Ok(condvar.wait_while(guard, |_| condition()).unwrap());
        };
        let mut guard = guard;
        loop {
            if !condition() {
                return Ok(guard);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GcError::BarrierTimeout);
            }
            let (next_guard, result) = condvar.wait_timeout(guard, remaining).unwrap();
            guard = next_guard;
            if !condition() {
                return Ok(guard);
            }
            if result.timed_out() {
                return Err(GcError::BarrierTimeout);
            }
        }
    }

    /// Exit a sync region. `did_sync` must be the value returned by the
    /// matching `enter_for_sync` (spec §4.3 `exit_for_sync`).
    pub fn exit_for_sync(&self, did_sync: bool) {
        if !did_sync {
            let mut s = self.current();
            loop {
                let next = s.with(s.state, 0, -1);
                if self.update(&mut s, next) {
                    return;
                }
            }
        }

        let mut s = self.current();
        loop {
            debug_assert_eq!(s.state, State::Syncing);
            let next = s.with(State::Unwinding, 0, 0);
            if self.update(&mut s, next) {
                {
                    let _guard = self.mutex.lock().unwrap();
                    self.sync_done.notify_all();
                }
                break;
            }
        }

        let mut s = self.current();
        loop {
            debug_assert_eq!(s.state, State::Unwinding);
            let next_state = if s.n_mutate_regions > 0 {
                State::Mutating
            } else {
                State::Idle
            };
            let next = s.with(next_state, 0, 0);
            if self.update(&mut s, next) {
                if next_state == State::Mutating {
                    let _guard = self.mutex.lock().unwrap();
                    self.mutate_okay.notify_all();
                }
                return;
            }
        }
    }
}

impl Default for Barrier {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a mutate region; guarantees `exit_for_mutate` on every
/// exit path, including unwinding (spec §4.3: "every mutator operation is
/// wrapped in a scoped acquisition").
pub struct MutateRegion<'b> {
    barrier: &'b Barrier,
}

impl<'b> MutateRegion<'b> {
    pub fn enter(barrier: &'b Barrier) -> Self {
        barrier.enter_for_mutate();
        MutateRegion { barrier }
    }
}

impl Drop for MutateRegion<'_> {
    fn drop(&mut self) {
        self.barrier.exit_for_mutate();
    }
}

/// RAII guard for a sync region. `*guard` (via `Deref`-like `did_sync()`)
/// tells the caller whether they must actually perform the sync work.
pub struct SyncRegion<'b> {
    barrier: &'b Barrier,
    did_sync: bool,
}

impl<'b> SyncRegion<'b> {
    pub fn enter(barrier: &'b Barrier) -> Self {
        let did_sync = barrier.enter_for_sync();
        SyncRegion { barrier, did_sync }
    }

    /// As [`Self::enter`], but fails with [`GcError::BarrierTimeout`] rather
    /// than blocking past `timeout`. On error no region was ever
    /// established — there is nothing for the caller to drop or exit.
    pub fn enter_timeout(barrier: &'b Barrier, timeout: Option<Duration>) -> Result<Self, GcError> {
        let did_sync = barrier.enter_for_sync_timeout(timeout)?;
        Ok(SyncRegion { barrier, did_sync })
    }

    pub fn did_sync(&self) -> bool {
        self.did_sync
    }
}

impl Drop for SyncRegion<'_> {
    fn drop(&mut self) {
        self.barrier.exit_for_sync(self.did_sync);
    }
}
