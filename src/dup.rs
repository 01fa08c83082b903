//! Fan-out: broadcast every value from one source channel to a dynamic set of tap channels
//! (spec.md §4.7).
//!
//! A background task repeatedly gets from the source and puts the value (cloned per tap, hence
//! the `T: Clone` bound already threaded through the whole crate) to every current tap
//! concurrently via [`futures_util::future::join_all`] — so one slow tap delays the *next* value
//! reaching every tap (the source stays un-drained until every existing put resolves), but doesn't
//! block a fast tap's put from completing independently. That's the backpressure the source's
//! `Dup` gets from running every tap's put inside the same `asyncio.gather`. Each put's outcome is
//! paired back up with its tap id: a put that resolves `false` means the tap was (or became)
//! closed, and spec.md §4.7 requires such taps to be untapped immediately rather than retried
//! forever against a channel that will only ever refuse.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures_util::future::join_all;

use crate::channel::Chan;
use crate::scheduler::LocalScheduler;

/// Identifies a tap previously registered with a [`Duplicator`], for [`Duplicator::untap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TapId(usize);

struct TapEntry<T> {
    chan: Chan<T>,
    close_when_done: bool,
}

/// Broadcasts one source channel's values to however many tap channels are currently registered.
pub struct Duplicator<T: Clone + 'static> {
    taps: Rc<RefCell<HashMap<usize, TapEntry<T>>>>,
    next_id: Rc<Cell<usize>>,
}

impl<T: Clone + 'static> Duplicator<T> {
    /// Spawns the broadcast task reading from `source`. Starts with no taps; values arriving
    /// before the first `tap()` call are simply dropped, same as the source's `Dup`.
    pub fn new(scheduler: &LocalScheduler, source: Chan<T>) -> Self {
        let taps: Rc<RefCell<HashMap<usize, TapEntry<T>>>> = Rc::new(RefCell::new(HashMap::new()));
        let taps_task = taps.clone();

        scheduler.spawn(async move {
            loop {
                let value = source.get().await;
                let current: Vec<(usize, Chan<T>)> =
                    taps_task.borrow().iter().map(|(id, t)| (*id, t.chan.clone())).collect();
                match value {
                    Some(v) => {
                        let puts = current.into_iter().map(|(id, c)| {
                            let fut = c.put(v.clone());
                            async move { (id, fut.await) }
                        });
                        let results = join_all(puts).await;
                        let mut taps = taps_task.borrow_mut();
                        for (id, delivered) in results {
                            if !delivered {
                                taps.remove(&id);
                            }
                        }
                    }
                    None => {
                        let closers: Vec<Chan<T>> = taps_task
                            .borrow()
                            .values()
                            .filter(|t| t.close_when_done)
                            .map(|t| t.chan.clone())
                            .collect();
                        for c in closers {
                            c.close();
                        }
                        break;
                    }
                }
            }
        });

        Duplicator { taps, next_id: Rc::new(Cell::new(0)) }
    }

    /// Registers a fresh rendezvous channel as a tap, closed automatically when the source closes.
    pub fn tap(&self) -> (TapId, Chan<T>) {
        let chan = Chan::rendezvous();
        let id = self.tap_with(chan.clone(), true);
        (id, chan)
    }

    /// Registers `chan` as a tap. If `close_when_done` is false, `chan` is left open when the
    /// source closes — useful when the same channel is also fed from elsewhere.
    pub fn tap_with(&self, chan: Chan<T>, close_when_done: bool) -> TapId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.taps.borrow_mut().insert(id, TapEntry { chan, close_when_done });
        TapId(id)
    }

    /// Stops broadcasting to the tap identified by `id`. A no-op if it was already removed.
    pub fn untap(&self, id: TapId) {
        self.taps.borrow_mut().remove(&id.0);
    }

    pub fn tap_count(&self) -> usize {
        self.taps.borrow().len()
    }
}
