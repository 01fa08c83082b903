//! `go`/`timeout`: the two small spawn-adjacent helpers spec.md calls out explicitly (§4.9, §4.10).
//!
//! Spawning the task itself is the one thing this crate can't do without an executor, which is why
//! both take a `&LocalScheduler` — everything else in the crate (channels, select, merge, dup,
//! publisher, mux) only *uses* futures, it never needs to spawn one of its own.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::channel::Chan;
use crate::scheduler::LocalScheduler;

/// Wraps a `!Send` boxed future so it can ride through
/// [`crate::scheduler::SchedulerHandle::call_soon_threadsafe`]'s `Send`-bounded thunk queue.
///
/// # Safety
/// The only consumer of that queue is the pump task `LocalScheduler::new` spawns via
/// `tokio::task::spawn_local` on the scheduler's owning thread — so a thunk wrapped here crosses
/// the channel but is never polled, cloned, or dropped anywhere but that one thread. That single
/// handoff is exactly the case `Send` exists to gate; nothing here is ever touched concurrently
/// from two threads at once.
struct AssertSend<T>(T);
unsafe impl<T> Send for AssertSend<T> {}

/// Runs `fut` as a background task, returning a channel that receives its result (if any) and
/// then closes — mirroring the source's `go(f, ..., threadsafe=False)`, which hands back a `Chan`
/// fed by the callable's return value.
///
/// A future that resolves to `None` contributes nothing to the returned channel before it closes;
/// this is how a `go`'d task that's pure side effect (no value to report) is expressed.
///
/// `threadsafe` mirrors the source's `go(..., threadsafe=True)`: instead of spawning directly via
/// `scheduler.spawn` (`tokio::task::spawn_local`, only ever valid to call while already running on
/// the owning thread), the spawn itself is routed through `scheduler.handle().
/// call_soon_threadsafe` — the same trampoline a task on another thread reaches for per spec.md
/// §5's "cross-thread producers must trampoline via the loop's thread-safe scheduling".
pub fn go<T, F>(scheduler: &LocalScheduler, fut: F, threadsafe: bool) -> Chan<T>
where
    T: Clone + 'static,
    F: Future<Output = Option<T>> + 'static,
{
    let out = Chan::rendezvous();
    let out_task = out.clone();
    let body: Pin<Box<dyn Future<Output = ()>>> = Box::pin(async move {
        if let Some(value) = fut.await {
            out_task.put(value).await;
        }
        out_task.close();
    });

    if threadsafe {
        let wrapped = AssertSend(body);
        scheduler.handle().call_soon_threadsafe(move || {
            let AssertSend(body) = wrapped;
            tokio::task::spawn_local(body);
        });
    } else {
        scheduler.spawn(body);
    }
    out
}

/// A channel that seeds `seed` (non-blocking) and then, if `close` is set, closes itself after
/// `duration` — mirroring the source's `Chan.timeout(seconds, *values, close=True)`. The common
/// case of a bare deadline used as a `select` operand passes an empty `seed` and `close = true`.
pub fn timeout<T>(scheduler: &LocalScheduler, duration: Duration, seed: Vec<T>, close: bool) -> Chan<T>
where
    T: Clone + 'static,
{
    let out: Chan<T> = Chan::rendezvous();
    let out_task = out.clone();
    scheduler.spawn(async move {
        tokio::time::sleep(duration).await;
        out_task.add(seed);
        if close {
            out_task.close();
        }
    });
    out
}
