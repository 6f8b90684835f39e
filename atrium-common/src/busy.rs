// Copyright 2026 atrium Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

const BLOCKED: usize = 1 << (usize::BITS - 1);
const HOLDERS: usize = !BLOCKED;

/// A gate that admits many concurrent operations and can be blocked to drain them.
///
/// [`BusyGate::enter`] admits an operation unless the gate is blocked. [`BusyGate::block`] stops admitting new
/// operations and waits until every admitted operation has left. The state is a single atomic word: the highest bit is
/// the blocked flag, the remaining bits count the holders.
#[derive(Debug, Default)]
pub struct BusyGate {
    state: AtomicUsize,
    mutex: Mutex<()>,
    drained: Condvar,
}

/// Scoped holder of a [`BusyGate`]. Leaves the gate on drop.
#[derive(Debug)]
#[must_use = "the operation leaves the gate as soon as the guard is dropped"]
pub struct BusyGuard<'a> {
    gate: &'a BusyGate,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.gate.leave();
    }
}

impl BusyGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to enter the gate.
    ///
    /// Returns `None` if the gate is blocked.
    pub fn enter(&self) -> Option<BusyGuard<'_>> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & BLOCKED != 0 {
                return None;
            }
            debug_assert!(current & HOLDERS < HOLDERS, "busy gate holder count overflow");
            match self
                .state
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(BusyGuard { gate: self }),
                Err(actual) => current = actual,
            }
        }
    }

    fn leave(&self) {
        let prev = self.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev & HOLDERS > 0, "leave a busy gate that has not been entered");
        if prev & BLOCKED != 0 && prev & HOLDERS == 1 {
            // Take the mutex so that the notification cannot slip in between the check and the wait of the blocker.
            let _guard = self.mutex.lock();
            self.drained.notify_all();
        }
    }

    /// Block the gate and wait until all holders have left.
    ///
    /// New calls to [`BusyGate::enter`] fail from the moment this function is called.
    ///
    /// Calling this while holding a [`BusyGuard`] of the same gate deadlocks.
    pub fn block(&self) {
        self.state.fetch_or(BLOCKED, Ordering::AcqRel);
        let mut guard = self.mutex.lock();
        while self.state.load(Ordering::Acquire) & HOLDERS != 0 {
            self.drained.wait(&mut guard);
        }
    }

    /// Open the gate again.
    pub fn unblock(&self) {
        self.state.fetch_and(HOLDERS, Ordering::AcqRel);
    }

    /// Returns `true` if the gate is blocked.
    pub fn is_blocked(&self) -> bool {
        self.state.load(Ordering::Acquire) & BLOCKED != 0
    }

    /// Count of operations currently inside the gate.
    pub fn holders(&self) -> usize {
        self.state.load(Ordering::Acquire) & HOLDERS
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize},
            Barrier,
        },
        thread,
        time::Duration,
    };

    use rand::Rng;

    use super::*;

    #[test]
    fn test_enter_and_leave() {
        let gate = BusyGate::new();
        let g1 = gate.enter().unwrap();
        let g2 = gate.enter().unwrap();
        assert_eq!(gate.holders(), 2);
        drop(g1);
        drop(g2);
        assert_eq!(gate.holders(), 0);

        gate.block();
        assert!(gate.is_blocked());
        assert!(gate.enter().is_none());

        gate.unblock();
        assert!(!gate.is_blocked());
        assert!(gate.enter().is_some());
    }

    #[test]
    fn test_block_waits_for_holders() {
        let gate = BusyGate::new();
        let left = AtomicBool::new(false);
        let barrier = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                let _guard = gate.enter().unwrap();
                barrier.wait();
                thread::sleep(Duration::from_millis(50));
                left.store(true, Ordering::SeqCst);
            });

            barrier.wait();
            gate.block();
            assert!(left.load(Ordering::SeqCst));
            assert_eq!(gate.holders(), 0);
        });
    }

    #[test]
    fn test_concurrent_enter_during_block() {
        let gate = BusyGate::new();
        let admitted = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let mut rng = rand::rng();
                    for _ in 0..1000 {
                        if let Some(_guard) = gate.enter() {
                            admitted.fetch_add(1, Ordering::Relaxed);
                            if rng.random_bool(0.01) {
                                thread::sleep(Duration::from_micros(rng.random_range(1..50)));
                            }
                        }
                    }
                });
            }
            gate.block();
            assert_eq!(gate.holders(), 0);
        });

        assert!(admitted.load(Ordering::Relaxed) <= 8000);
        assert!(gate.enter().is_none());
    }
}
