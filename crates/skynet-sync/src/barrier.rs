use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::{CancelToken, SyncError, CANCEL_POLL};

#[derive(Debug, Default)]
struct State {
    arrived: usize,
    generation: u64,
    broken: bool,
}

/// What a party learns when its barrier trips.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Crossing {
    /// Cycle that just completed, counting from zero.
    pub generation: u64,
    /// Set for the last arrival, the one that released everybody else.
    pub leader: bool,
}

/// Cyclic rendezvous for a fixed number of parties.
///
/// The barrier re-arms itself each time it trips, so the same instance
/// serves every simulated day. Once broken, by [`PhaseBarrier::abort`] or by
/// a cancelled waiter, it stays broken: current and future waiters get
/// [`SyncError::BrokenBarrier`] instead of hanging.
pub struct PhaseBarrier {
    label: &'static str,
    parties: usize,
    state: Mutex<State>,
    cvar: Condvar,
}

impl PhaseBarrier {
    pub fn new(label: &'static str, parties: usize) -> Result<Self, SyncError> {
        if parties == 0 {
            return Err(SyncError::ZeroParties);
        }
        Ok(Self {
            label,
            parties,
            state: Mutex::new(State::default()),
            cvar: Condvar::new(),
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Number of completed cycles so far.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_broken(&self) -> bool {
        self.lock().broken
    }

    /// Block until all parties have arrived.
    ///
    /// A cancelled `token` breaks the barrier for everyone and returns
    /// [`SyncError::Cancelled`] to the caller.
    pub fn wait(&self, token: &CancelToken) -> Result<Crossing, SyncError> {
        let mut state = self.lock();
        if state.broken {
            return Err(SyncError::BrokenBarrier);
        }
        if token.is_cancelled() {
            self.break_locked(&mut state);
            return Err(SyncError::Cancelled);
        }

        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cvar.notify_all();
            return Ok(Crossing {
                generation,
                leader: true,
            });
        }

        loop {
            state = self
                .cvar
                .wait_timeout(state, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            // A trip that happened before the break still counts.
            if state.generation != generation {
                return Ok(Crossing {
                    generation,
                    leader: false,
                });
            }
            if state.broken {
                return Err(SyncError::BrokenBarrier);
            }
            if token.is_cancelled() {
                self.break_locked(&mut state);
                return Err(SyncError::Cancelled);
            }
        }
    }

    /// Break the barrier, releasing every waiter with an error.
    pub fn abort(&self) {
        let mut state = self.lock();
        self.break_locked(&mut state);
    }

    fn break_locked(&self, state: &mut State) {
        if !state.broken {
            state.broken = true;
            debug!(barrier = self.label, waiting = state.arrived, "barrier broken");
        }
        self.cvar.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn zero_parties_rejected() {
        assert_eq!(
            PhaseBarrier::new("day", 0).err(),
            Some(SyncError::ZeroParties)
        );
    }

    #[test]
    fn single_party_never_blocks() {
        let barrier = PhaseBarrier::new("day", 1).unwrap();
        let token = CancelToken::new();
        for expected in 0..5 {
            let crossing = barrier.wait(&token).unwrap();
            assert_eq!(crossing.generation, expected);
            assert!(crossing.leader);
        }
        assert_eq!(barrier.generation(), 5);
    }

    #[test]
    fn reusable_across_many_cycles() {
        const PARTIES: usize = 4;
        const CYCLES: usize = 50;
        let barrier = Arc::new(PhaseBarrier::new("day", PARTIES).unwrap());
        let arrivals = Arc::new(AtomicUsize::new(0));
        let leaders = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..PARTIES)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let arrivals = Arc::clone(&arrivals);
                let leaders = Arc::clone(&leaders);
                thread::spawn(move || {
                    let token = CancelToken::new();
                    for cycle in 0..CYCLES {
                        arrivals.fetch_add(1, Ordering::SeqCst);
                        let crossing = barrier.wait(&token).unwrap();
                        assert_eq!(crossing.generation, cycle as u64);
                        assert!(arrivals.load(Ordering::SeqCst) >= PARTIES * (cycle + 1));
                        if crossing.leader {
                            leaders.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), CYCLES);
        assert_eq!(barrier.generation(), CYCLES as u64);
        assert!(!barrier.is_broken());
    }

    #[test]
    fn cancelled_waiter_releases_others() {
        let barrier = Arc::new(PhaseBarrier::new("night", 3).unwrap());
        let patient = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait(&CancelToken::new()))
        };
        let token = CancelToken::new();
        let cancelled = {
            let barrier = Arc::clone(&barrier);
            let token = token.clone();
            thread::spawn(move || barrier.wait(&token))
        };
        thread::sleep(Duration::from_millis(30));
        token.cancel();
        assert_eq!(cancelled.join().unwrap(), Err(SyncError::Cancelled));
        assert_eq!(patient.join().unwrap(), Err(SyncError::BrokenBarrier));
        assert!(barrier.is_broken());
    }

    #[test]
    fn abort_is_sticky() {
        let barrier = Arc::new(PhaseBarrier::new("day", 2).unwrap());
        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait(&CancelToken::new()))
        };
        thread::sleep(Duration::from_millis(30));
        barrier.abort();
        assert_eq!(waiter.join().unwrap(), Err(SyncError::BrokenBarrier));
        assert_eq!(
            barrier.wait(&CancelToken::new()),
            Err(SyncError::BrokenBarrier)
        );
    }
}
