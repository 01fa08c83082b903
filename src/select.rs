//! Multi-way select: atomically commit to exactly one of several put/get operations,
//! across possibly-different channels and possibly-different value types (spec.md §4.5).
//!
//! Each operand is built from its channel via [`Chan::get_case`]/[`Chan::put_case`], which bakes
//! in a `wrap` function turning that operand's own outcome (`Option<T>` for a get, `bool` for a
//! put) into the select's single result type `R`. That's what lets `select` accept operands over
//! unrelated `T`s in one call: the heterogeneity is erased behind `Box<dyn SelectCase<R>>` the
//! moment the case is constructed, the same way `tokio::select!` erases its branches behind one
//! polled future, except here it's a vec of trait objects rather than macro-generated code.
//!
//! Every case shares one [`SelectFlag`] (handler.rs): the first case to complete — synchronously
//! during the initial attach pass, or later, asynchronously, while parked — deactivates every
//! sibling handler so exactly one ever delivers a value.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use rand::seq::SliceRandom;

use crate::channel::Chan;
use crate::handler::{poll_slot, Handler, SelectFlag, SelectHandler, SlotHandle};

/// One operand of a `select` call, already wrapped to the select's shared result type `R`.
pub(crate) trait SelectCase<R> {
    /// Tries to complete this operand synchronously, parking it (sharing `flag`) if it can't.
    /// `Some(r)` means it won outright; `None` means it's now parked on its channel.
    fn attach(self: Box<Self>, flag: SelectFlag, state: &SlotHandle<R>) -> Option<R>;
}

/// One operand of a [`select`] call. Built from a channel via [`Chan::get_case`]/
/// [`Chan::put_case`]; opaque on purpose — its only use is being collected into the `Vec` passed
/// to [`select`].
pub struct Case<R>(Box<dyn SelectCase<R>>);

struct GetCase<T, R> {
    chan: Chan<T>,
    wrap: Rc<dyn Fn(Option<T>) -> R>,
}

impl<T: Clone + 'static, R: 'static> SelectCase<R> for GetCase<T, R> {
    fn attach(self: Box<Self>, flag: SelectFlag, state: &SlotHandle<R>) -> Option<R> {
        let handler = Rc::new(SelectHandler::new(flag, self.wrap.clone(), state.clone()));
        self.chan.attach_get(handler).map(|v| (self.wrap)(v))
    }
}

struct PutCase<T, R> {
    chan: Chan<T>,
    value: T,
    wrap: Rc<dyn Fn(bool) -> R>,
}

impl<T: Clone + 'static, R: 'static> SelectCase<R> for PutCase<T, R> {
    fn attach(self: Box<Self>, flag: SelectFlag, state: &SlotHandle<R>) -> Option<R> {
        let handler = Rc::new(SelectHandler::new(flag, self.wrap.clone(), state.clone()));
        self.chan.attach_put(self.value, handler).map(|v| (self.wrap)(v))
    }
}

impl<T: Clone + 'static> Chan<T> {
    /// Builds a get operand for [`select`], wrapping the received `Option<T>` (the closed sentinel
    /// is `None`, same as [`Chan::get`]) into the select's shared result type.
    ///
    /// `wrap` may capture (e.g. `merge` tagging each case with its source channel's index); it
    /// only ever needs to run once per `select` call, but is a `Fn` rather than `FnOnce` so it can
    /// sit behind the cheap-to-clone `Rc` that lets the same case be handed to both a synchronous
    /// attach attempt and, if parked, a later asynchronous completion.
    pub fn get_case<R: 'static>(&self, wrap: impl Fn(Option<T>) -> R + 'static) -> Case<R> {
        Case(Box::new(GetCase { chan: self.clone(), wrap: Rc::new(wrap) }))
    }

    /// Builds a put operand for [`select`], wrapping the success `bool` into the select's shared
    /// result type.
    pub fn put_case<R: 'static>(&self, value: T, wrap: impl Fn(bool) -> R + 'static) -> Case<R> {
        Case(Box::new(PutCase { chan: self.clone(), value, wrap: Rc::new(wrap) }))
    }
}

/// Picks, at random, the first of `cases` that can complete immediately; if none can, parks on
/// all of them simultaneously and resolves as soon as exactly one unparks.
///
/// `priority`, when true, tries `cases` in the order given instead of shuffling first (spec.md
/// §4.5's "priority mode" — useful for e.g. always preferring a shutdown channel over a work
/// channel). `default`, when given, is returned immediately if no case can complete synchronously,
/// without parking on any of them.
pub fn select<R: 'static>(cases: Vec<Case<R>>, priority: bool, default: Option<R>) -> SelectFuture<R> {
    SelectFuture {
        flag: SelectFlag::new(),
        state: Rc::new(std::cell::RefCell::new(crate::handler::Slot::Pending(None))),
        cases: Some(cases.into_iter().map(|c| c.0).collect()),
        priority,
        default,
    }
}

/// The future returned by [`select`].
#[must_use = "futures do nothing unless polled"]
pub struct SelectFuture<R> {
    flag: SelectFlag,
    state: SlotHandle<R>,
    cases: Option<Vec<Box<dyn SelectCase<R>>>>,
    priority: bool,
    default: Option<R>,
}

impl<R> Future for SelectFuture<R> {
    type Output = R;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<R> {
        if let Some(mut cases) = self.cases.take() {
            if !self.priority {
                cases.shuffle(&mut rand::thread_rng());
            }
            for case in cases {
                if let Some(r) = case.attach(self.flag.clone(), &self.state) {
                    return Poll::Ready(r);
                }
            }
            if let Some(default) = self.default.take() {
                self.flag.try_fire();
                return Poll::Ready(default);
            }
        }
        poll_slot(&self.state, cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Kind;

    fn now<F: Future + Unpin>(mut f: F) -> Option<F::Output> {
        let waker = futures_util::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        match Pin::new(&mut f).poll(&mut cx) {
            Poll::Ready(v) => Some(v),
            Poll::Pending => None,
        }
    }

    #[derive(Debug, PartialEq)]
    enum Outcome {
        Got(Option<i32>),
        Put(bool),
        Default,
    }

    #[test]
    fn picks_the_only_ready_case() {
        let a: Chan<i32> = Chan::new(Kind::Fixed(1));
        let b: Chan<i32> = Chan::rendezvous();
        a.put_nowait(7, true);

        let fut = select(
            vec![a.get_case(Outcome::Got), b.get_case(Outcome::Got)],
            true,
            None,
        );
        assert_eq!(now(fut), Some(Outcome::Got(Some(7))));
    }

    #[test]
    fn returns_default_when_nothing_is_ready() {
        let a: Chan<i32> = Chan::rendezvous();
        let fut = select(vec![a.get_case(Outcome::Got)], true, Some(Outcome::Default));
        assert_eq!(now(fut), Some(Outcome::Default));
        // the parked get should have been cancelled by the default firing, not left dangling
        assert_eq!(a.put_nowait(1, true), None, "no active getter should remain parked");
    }

    #[test]
    fn only_one_sibling_ever_wins() {
        let a: Chan<i32> = Chan::rendezvous();
        let b: Chan<i32> = Chan::rendezvous();

        let mut fut = select(
            vec![a.put_case(1, Outcome::Put), b.put_case(2, Outcome::Put)],
            true,
            None,
        );
        assert_eq!(now(&mut fut), None, "both sides parked, nothing to rendezvous with yet");
        assert_eq!(now(a.get()), Some(Some(1)), "only the first case should have committed");
        assert_eq!(now(fut), Some(Outcome::Put(true)));
        // b's put_case must have been cancelled, not silently left parked
        assert_eq!(b.get_nowait(true), None);
    }
}
