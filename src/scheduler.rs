//! The scheduler: the only place this crate touches an executor.
//!
//! Every other module is executor-agnostic — `Chan::put`/`get` are plain `Future`s that make
//! progress purely through polling, with no dependency on any particular runtime. `LocalScheduler`
//! exists for the handful of operations that must actively spawn work rather than just being
//! polled: `go()` (spec.md §4.9), `timeout()` (spec.md §4.10), and a `Duplicator`/`Publisher`'s
//! background fan-out task.
//!
//! `LocalScheduler` itself is `!Send` — it is a thin wrapper around [`tokio::task::spawn_local`],
//! valid only inside a [`tokio::task::LocalSet`] (spec.md §5: "a single-threaded cooperative
//! core"). [`SchedulerHandle`] is the `Send + Sync` escape hatch for code running on *another*
//! thread that needs to schedule work back onto the local one — `call_soon_threadsafe`, named
//! after the `asyncio.AbstractEventLoop` method this generalises.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

type Thunk = Box<dyn FnOnce() + Send + 'static>;

/// A handle to the local cooperative executor.
///
/// Construct one from inside a running [`tokio::task::LocalSet`] (typically at the top of
/// `LocalSet::run_until`/`block_on`). Cloning is intentionally not supported — callers that need
/// to reach the scheduler from elsewhere on the same thread should pass `&LocalScheduler` down,
/// and callers on another thread should use [`LocalScheduler::handle`] instead.
pub struct LocalScheduler {
    threadsafe_tx: mpsc::UnboundedSender<Thunk>,
}

impl LocalScheduler {
    /// Must be called from within a `LocalSet` context; panics otherwise, same as
    /// `tokio::task::spawn_local` itself.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Thunk>();
        tokio::task::spawn_local(async move {
            while let Some(thunk) = rx.recv().await {
                thunk();
            }
        });
        Self { threadsafe_tx: tx }
    }

    /// Spawns a future onto the local executor, returning its `JoinHandle`.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        tokio::task::spawn_local(fut)
    }

    /// Schedules `f` to run on a future turn of the local executor (`call_soon` in the source).
    pub fn call_soon<F: FnOnce() + 'static>(&self, f: F) {
        tokio::task::spawn_local(async move { f() });
    }

    /// Schedules `f` to run after `delay` (`call_later` in the source).
    pub fn call_later<F: FnOnce() + 'static>(&self, delay: Duration, f: F) -> JoinHandle<()> {
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            f();
        })
    }

    /// Returns a `Send + Sync` handle that can schedule work back onto this local executor from
    /// any thread (`call_soon_threadsafe` in the source).
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle { tx: self.threadsafe_tx.clone() }
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// The cross-thread trampoline for [`LocalScheduler`].
///
/// Sends a boxed thunk down an unbounded channel drained by a task spawned in `LocalScheduler::new`
/// on the owning thread; the thunk itself runs there, so it is free to touch `Rc`-based channel
/// state that would otherwise be unsound to share across threads.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Thunk>,
}

impl SchedulerHandle {
    /// Enqueues `f` to run on the owning thread. Returns `false` if the scheduler has already shut
    /// down (its `LocalScheduler` and every clone of this handle dropped, or the pump task ended).
    pub fn call_soon_threadsafe<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sent = self.tx.send(Box::new(f)).is_ok();
        if !sent {
            trace!("call_soon_threadsafe dropped: local scheduler is gone");
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[tokio::test]
    async fn call_soon_runs_on_next_turn() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let seen = Rc::new(Cell::new(false));
                let seen2 = seen.clone();
                scheduler.call_soon(move || seen2.set(true));
                tokio::task::yield_now().await;
                assert!(seen.get());
            })
            .await;
    }

    #[tokio::test]
    async fn threadsafe_handle_reaches_back_to_the_local_thread() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let handle = scheduler.handle();
                let seen = Arc::new(AtomicBool::new(false));
                let seen2 = seen.clone();
                std::thread::spawn(move || {
                    handle.call_soon_threadsafe(move || seen2.store(true, Ordering::SeqCst));
                })
                .join()
                .unwrap();
                for _ in 0..8 {
                    tokio::task::yield_now().await;
                }
                assert!(seen.load(Ordering::SeqCst));
            })
            .await;
    }
}
