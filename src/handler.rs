//! Handler: the one-shot commit token an operation attaches to a channel.
//!
//! A [`Handler`] is what a put or get actually parks in a channel's queue. Exactly one party may
//! ever commit it — for a plain [`FnHandler`] that's trivially true (only the channel it's parked
//! in can reach it), but a [`SelectHandler`] shares a [`SelectFlag`] with its siblings from the
//! same `select` call, so the first sibling to commit makes every other sibling's commit a silent
//! no-op (spec.md §3, §4.5).
//!
//! Committing is split into two steps, mirroring the source's `handler.commit()` (deactivate,
//! return the target to dispatch) plus a separate `_dispatch(target, value)`:
//! [`Handler::deactivate`] claims the handler, and [`Handler::complete`] delivers a value to it.
//! The split matters because a channel completing an operation synchronously for its *own* caller
//! never needs to deliver through the handler at all — the value goes straight back as the
//! function's return — it only needs `deactivate` to make any sibling select handlers see
//! `active == false`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::task::Waker;

/// A one-shot commit token for a single put or get operation.
///
/// `Outcome` is `bool` for puts (did the put succeed) and `Option<T>` for gets (the value, or
/// `None` for the closed-sentinel). Object-safe so channels can hold `Rc<dyn Handler<...>>`
/// without knowing which concrete kind (`FnHandler` vs `SelectHandler`) parked it.
pub(crate) trait Handler {
    type Outcome;

    /// True until the handler commits (or a sibling select handler commits first).
    fn is_active(&self) -> bool;

    /// If false, the operation must not park — it either completes synchronously or is abandoned.
    fn blockable(&self) -> bool;

    /// Atomically deactivates the handler. Returns whether *this* call performed the
    /// deactivation; `false` means a sibling (sharing the same `SelectFlag`) already won the race.
    fn deactivate(&self) -> bool;

    /// Delivers `value` to whatever is waiting on this handler (a `Future`'s waker, or a shared
    /// select result). Only meaningful after a successful `deactivate`; calling it on a handler
    /// this side didn't just deactivate is a logic error in the caller, not something `complete`
    /// itself needs to guard against.
    fn complete(&self, value: Self::Outcome);

    /// Called once, when the operation actually parks (as opposed to completing synchronously or
    /// being refused for being non-blockable). `chan` is the channel the operation just parked
    /// in, type-erased to [`DirtyTarget`]. Lets a handler that spans multiple channels (a
    /// `select`'s siblings) record where else it's waiting, so a winning commit can flag those
    /// other channels' dirty counters (spec.md §9, "cyclic references").
    fn queue(&self, chan: Rc<dyn DirtyTarget>, is_put: bool);
}

pub(crate) enum Slot<O> {
    Pending(Option<Waker>),
    Ready(O),
}

/// A plain handler wrapping a single future's completion slot. Always `active` until it commits;
/// `blockable` unless constructed for a `_nowait(..., immediate_only = true)` call.
pub(crate) struct FnHandler<O> {
    active: Cell<bool>,
    blockable: bool,
    slot: Rc<RefCell<Slot<O>>>,
}

impl<O> FnHandler<O> {
    pub(crate) fn new(blockable: bool) -> (Self, Rc<RefCell<Slot<O>>>) {
        let slot = Rc::new(RefCell::new(Slot::Pending(None)));
        (Self { active: Cell::new(true), blockable, slot: slot.clone() }, slot)
    }
}

impl<O> Handler for FnHandler<O> {
    type Outcome = O;

    fn is_active(&self) -> bool {
        self.active.get()
    }

    fn blockable(&self) -> bool {
        self.blockable
    }

    fn deactivate(&self) -> bool {
        if !self.active.get() {
            return false;
        }
        self.active.set(false);
        true
    }

    fn complete(&self, value: O) {
        let waker = match &mut *self.slot.borrow_mut() {
            slot @ Slot::Pending(_) => {
                let Slot::Pending(waker) = std::mem::replace(slot, Slot::Ready(value)) else {
                    unreachable!()
                };
                waker
            }
            Slot::Ready(_) => unreachable!("FnHandler completed twice"),
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn queue(&self, _chan: Rc<dyn DirtyTarget>, _is_put: bool) {}
}

/// Polls a [`FnHandler`]'s completion slot, registering the task's waker if it isn't ready yet.
pub(crate) fn poll_slot<O>(
    slot: &SlotHandle<O>,
    cx: &mut std::task::Context<'_>,
) -> std::task::Poll<O> {
    let mut guard = slot.borrow_mut();
    match &mut *guard {
        Slot::Ready(_) => {
            let Slot::Ready(value) = std::mem::replace(&mut *guard, Slot::Pending(None)) else {
                unreachable!()
            };
            std::task::Poll::Ready(value)
        }
        Slot::Pending(waker) => {
            *waker = Some(cx.waker().clone());
            std::task::Poll::Pending
        }
    }
}

pub(crate) type SlotHandle<O> = Rc<RefCell<Slot<O>>>;

/// Anything a channel can notify when one of its parked handlers turns out to be stale because a
/// sibling committed elsewhere. Implemented by `channel::Inner<T>` for every `T`, type-erased so a
/// single [`SelectFlag`] can register channels of different value types.
pub(crate) trait DirtyTarget {
    fn notify_dirty(&self, is_put: bool);
}

/// The bit shared by every [`SelectHandler`] spawned from one `select` call.
///
/// `try_fire` is the only mutator: the first caller to see `active == true` flips it to `false`
/// and wins; everyone else observes `false` from then on (spec.md §3: "commit on any sibling
/// atomically flips it off").
#[derive(Clone)]
pub(crate) struct SelectFlag {
    active: Rc<Cell<bool>>,
    registered: Rc<RefCell<Vec<(Rc<dyn DirtyTarget>, bool)>>>,
}

impl SelectFlag {
    pub(crate) fn new() -> Self {
        Self { active: Rc::new(Cell::new(true)), registered: Rc::new(RefCell::new(Vec::new())) }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Records that a sibling handler parked on `chan`, so that if a *different* sibling wins,
    /// this channel's dirty counter gets bumped even though nothing else ever touches it again.
    pub(crate) fn register(&self, chan: Rc<dyn DirtyTarget>, is_put: bool) {
        self.registered.borrow_mut().push((chan, is_put));
    }

    /// Flips the flag off if it was on. Returns whether this call performed the flip. On success,
    /// notifies every registered channel so their dirty counters account for the now-stale
    /// parked entries left behind in siblings' queues.
    pub(crate) fn try_fire(&self) -> bool {
        if !self.active.get() {
            return false;
        }
        self.active.set(false);
        for (chan, is_put) in self.registered.borrow().iter() {
            chan.notify_dirty(*is_put);
        }
        true
    }
}

/// A handler shared by the operations of one `select` call. Wraps the flag above plus the shared
/// result slot that whichever operation wins resolves.
///
/// `wrap` is `Rc<dyn Fn>` rather than a bare `fn` pointer so a case can close over state from its
/// own `select` call — e.g. `merge` tagging each branch with which input channel it came from.
pub(crate) struct SelectHandler<O, R> {
    flag: SelectFlag,
    wrap: Rc<dyn Fn(O) -> R>,
    state: SlotHandle<R>,
}

impl<O, R> SelectHandler<O, R> {
    pub(crate) fn new(flag: SelectFlag, wrap: Rc<dyn Fn(O) -> R>, state: SlotHandle<R>) -> Self {
        Self { flag, wrap, state }
    }
}

impl<O, R> Handler for SelectHandler<O, R> {
    type Outcome = O;

    fn is_active(&self) -> bool {
        self.flag.is_active()
    }

    fn blockable(&self) -> bool {
        true
    }

    fn deactivate(&self) -> bool {
        self.flag.try_fire()
    }

    fn complete(&self, value: O) {
        let outcome = (self.wrap)(value);
        let waker = match &mut *self.state.borrow_mut() {
            slot @ Slot::Pending(_) => {
                let Slot::Pending(waker) = std::mem::replace(slot, Slot::Ready(outcome)) else {
                    unreachable!()
                };
                waker
            }
            Slot::Ready(_) => unreachable!("select result completed twice"),
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn queue(&self, chan: Rc<dyn DirtyTarget>, is_put: bool) {
        self.flag.register(chan, is_put);
    }
}
