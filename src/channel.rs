//! The channel core: the put/get state machine, its wait queues, and close/drain semantics.
//!
//! `Chan<T>` is an `Rc`-cloneable handle — cloning it gives another handle to the same
//! rendezvous point, the same way multiple producers/consumers share one `asyncio.Queue`-like
//! object in the source. It is deliberately `!Send`/`!Sync`: the whole point of this crate is a
//! single-threaded cooperative core (spec.md §5), so a channel never needs synchronization
//! primitives beyond `Rc<RefCell<_>>`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use tracing::trace;

use crate::buffer::{Buffer, Kind};
use crate::error::ChanError;
use crate::handler::{poll_slot, DirtyTarget, FnHandler, Handler, SlotHandle};

/// Default cap on parked puts/gets per channel (spec.md §3, §5). Exceeding it is a programmer
/// error — an unbounded producer/consumer asymmetry — and fails loudly rather than silently
/// growing memory without bound.
pub const MAX_OP_QUEUE_SIZE: usize = 1024;
/// Default dirty-counter threshold that triggers queue compaction (spec.md §3, §5).
pub const MAX_DIRTY_SIZE: usize = 256;

pub(crate) type PutHandle = Rc<dyn Handler<Outcome = bool>>;
pub(crate) type GetHandle<T> = Rc<dyn Handler<Outcome = Option<T>>>;

pub(crate) struct Inner<T> {
    buffer: Option<Buffer<T>>,
    puts: VecDeque<(PutHandle, T)>,
    gets: VecDeque<GetHandle<T>>,
    closed: bool,
    close_wakers: Vec<Waker>,
    dirty_puts: usize,
    dirty_gets: usize,
    op_queue_limit: usize,
    dirty_limit: usize,
    name: Option<String>,
}

impl<T> DirtyTarget for RefCell<Inner<T>> {
    fn notify_dirty(&self, is_put: bool) {
        // A select sibling can win on a channel that is, at this very moment, in the middle of
        // its own put/get call (e.g. a select spanning a put and a get on the same channel). In
        // that reentrant case the counter is just a heuristic for when to compact, so skipping
        // the bump rather than panicking on a double `borrow_mut` is the right tradeoff.
        if let Ok(mut inner) = self.try_borrow_mut() {
            if is_put {
                inner.dirty_puts += 1;
            } else {
                inner.dirty_gets += 1;
            }
        }
    }
}

/// A handle to a rendezvous channel carrying values of type `T`.
///
/// Cloning a `Chan` is cheap (an `Rc` bump) and gives another handle to the same underlying
/// channel — this is how multiple producers and consumers share one channel, matching the
/// source's `Chan` object, which is likewise freely shared by reference.
pub struct Chan<T> {
    pub(crate) inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Chan { inner: self.inner.clone() }
    }
}

/// Builder for non-default queue-size limits (spec.md §5, "implementer SHOULD pass a scheduler
/// handle explicitly" generalises here to: don't hardcode `MAX_OP_QUEUE_SIZE`/`MAX_DIRTY_SIZE`
/// either, when an embedder has a reason to tune them).
pub struct ChanBuilder {
    buffer: Option<Kind>,
    op_queue_limit: usize,
    dirty_limit: usize,
    name: Option<String>,
}

impl Default for ChanBuilder {
    fn default() -> Self {
        Self { buffer: None, op_queue_limit: MAX_OP_QUEUE_SIZE, dirty_limit: MAX_DIRTY_SIZE, name: None }
    }
}

impl ChanBuilder {
    pub fn buffer(mut self, kind: Kind) -> Self {
        self.buffer = Some(kind);
        self
    }

    pub fn op_queue_limit(mut self, limit: usize) -> Self {
        self.op_queue_limit = limit;
        self
    }

    pub fn dirty_limit(mut self, limit: usize) -> Self {
        self.dirty_limit = limit;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn build<T: Clone>(self) -> Chan<T> {
        Chan {
            inner: Rc::new(RefCell::new(Inner {
                buffer: self.buffer.map(Buffer::new),
                puts: VecDeque::new(),
                gets: VecDeque::new(),
                closed: false,
                close_wakers: Vec::new(),
                dirty_puts: 0,
                dirty_gets: 0,
                op_queue_limit: self.op_queue_limit,
                dirty_limit: self.dirty_limit,
                name: self.name,
            })),
        }
    }
}

impl<T: Clone> Chan<T> {
    /// An unbuffered, pure-rendezvous channel: every put waits for a matching get and vice versa.
    pub fn rendezvous() -> Self {
        ChanBuilder::default().build()
    }

    /// A channel backed by one of the four buffer variants (spec.md §3).
    pub fn new(buffer: Kind) -> Self {
        ChanBuilder::default().buffer(buffer).build()
    }

    pub fn builder() -> ChanBuilder {
        ChanBuilder::default()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    pub fn name(&self) -> Option<String> {
        self.inner.borrow().name.clone()
    }

    /// Asynchronously puts `v` into the channel. Resolves `true` if the put succeeded, `false` if
    /// the channel was (or became) closed before it could.
    pub fn put(&self, v: T) -> PutFuture<T> {
        let (handler, slot) = FnHandler::new(true);
        PutFuture { inner: self.inner.clone(), handler: Rc::new(handler), slot, value: Some(v), parked: false }
    }

    /// Asynchronously gets a value. Resolves `None` once the channel is closed and drained —
    /// spec.md's closed-sentinel, represented here by the absence of a value.
    pub fn get(&self) -> GetFuture<T> {
        let (handler, slot) = FnHandler::new(true);
        GetFuture { inner: self.inner.clone(), handler: Rc::new(handler), slot, parked: false }
    }

    /// Non-blocking put. `immediate_only = true` refuses to park: it returns `None` the moment the
    /// put can't complete right away, without ever enqueuing it (spec.md §4.4).
    pub fn put_nowait(&self, v: T, immediate_only: bool) -> Option<bool> {
        let handler: PutHandle = Rc::new(FnHandler::<bool>::new(!immediate_only).0);
        put_raw(&self.inner, v, handler)
    }

    /// Non-blocking get, symmetric to [`Chan::put_nowait`].
    pub fn get_nowait(&self, immediate_only: bool) -> Option<Option<T>> {
        let handler: GetHandle<T> = Rc::new(FnHandler::<Option<T>>::new(!immediate_only).0);
        get_raw(&self.inner, handler)
    }

    /// Puts every value in `vals`, queuing rather than refusing if the channel can't take them
    /// immediately (`add` in the source: `put_nowait(v, immediate_only=False)` for each value).
    pub fn add(&self, vals: impl IntoIterator<Item = T>) {
        for v in vals {
            self.put_nowait(v, false);
        }
    }

    /// Closes the channel. Idempotent (spec.md §8: "close(); close() is equivalent to close()").
    ///
    /// Drains parked gets first (handing each the next buffered value, or the closed-sentinel
    /// once the buffer empties), matching spec.md §4.3's drain-before-sentinel guarantee. Parked
    /// puts are then resolved `false` — this crate resolves the open question in spec.md §9
    /// ("a correct implementation should resolve parked puts with false") rather than reproducing
    /// the source's bug of leaving them hanging forever.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return;
        }
        trace!(chan = ?inner.name, "closing channel");

        loop {
            match inner.gets.pop_front() {
                Some(getter) => {
                    if getter.deactivate() {
                        let val = match inner.buffer.as_mut() {
                            Some(buf) if buf.can_take() => Some(buf.take()),
                            _ => None,
                        };
                        getter.complete(val);
                    }
                }
                None => {
                    inner.dirty_gets = 0;
                    break;
                }
            }
        }

        let stale_puts: Vec<_> = inner.puts.drain(..).collect();
        inner.dirty_puts = 0;
        inner.closed = true;
        let wakers = std::mem::take(&mut inner.close_wakers);
        drop(inner);

        for (putter, _value) in stale_puts {
            if putter.deactivate() {
                putter.complete(false);
            }
        }
        for waker in wakers {
            waker.wake();
        }
    }

    /// Resolves once the channel is closed. Mirrors the source's `Chan.join()`
    /// (`await self._closed.wait()`).
    pub fn closed(&self) -> Closed<T> {
        Closed { inner: self.inner.clone() }
    }

    /// Drains every value immediately available in the buffer without parking — a convenience
    /// absent from spec.md but natural given the buffer already exposes its length, analogous to
    /// the teacher's `Receiver::drain()`.
    pub fn drain_available(&self) -> Vec<T> {
        let mut inner = self.inner.borrow_mut();
        let mut out = Vec::new();
        if let Some(buf) = inner.buffer.as_mut() {
            while buf.can_take() {
                out.push(buf.take());
            }
        }
        out
    }

    /// Attaches a select sibling as a getter. Used by `select.rs`, which builds the
    /// `SelectHandler` and needs the raw `get_raw` plumbing rather than a fresh `GetFuture`.
    pub(crate) fn attach_get(&self, handler: GetHandle<T>) -> Option<Option<T>> {
        get_raw(&self.inner, handler)
    }

    /// Attaches a select sibling as a putter, symmetric to [`Chan::attach_get`].
    pub(crate) fn attach_put(&self, val: T, handler: PutHandle) -> Option<bool> {
        put_raw(&self.inner, val, handler)
    }
}

/// The direct-handoff "pop until active or empty" scan shared by both `_put`'s and `_get`'s
/// second case. Resets the relevant dirty counter to zero once the queue is fully drained — the
/// source's `except IndexError: self._dirty_gets = 0` / `_dirty_puts = 0`.
fn pop_active_get<T>(inner: &mut Inner<T>) -> Option<GetHandle<T>> {
    loop {
        match inner.gets.pop_front() {
            Some(g) if g.is_active() => return Some(g),
            Some(_) => continue,
            None => {
                inner.dirty_gets = 0;
                return None;
            }
        }
    }
}

fn pop_active_put<T>(inner: &mut Inner<T>) -> Option<(PutHandle, T)> {
    loop {
        match inner.puts.pop_front() {
            Some(p) if p.0.is_active() => return Some(p),
            Some(_) => continue,
            None => {
                inner.dirty_puts = 0;
                return None;
            }
        }
    }
}

fn compact_gets<T>(inner: &mut Inner<T>) {
    inner.gets.retain(|g| g.is_active());
    inner.dirty_gets = 0;
}

fn compact_puts<T>(inner: &mut Inner<T>) {
    inner.puts.retain(|(h, _)| h.is_active());
    inner.dirty_puts = 0;
}

/// The put state machine (spec.md §4.1). Returns `Some(outcome)` for a synchronous completion,
/// `None` if the operation parked (or was refused for being non-blockable).
pub(crate) fn put_raw<T>(this: &Rc<RefCell<Inner<T>>>, val: T, handler: PutHandle) -> Option<bool>
where
    T: Clone,
{
    let mut inner = this.borrow_mut();

    if inner.closed || !handler.is_active() {
        return Some(!inner.closed);
    }

    if let Some(buf) = inner.buffer.as_mut() {
        if buf.can_add() {
            handler.deactivate();
            buf.add(val);
            while !inner.gets.is_empty() && buf.can_take() {
                let getter = inner.gets.pop_front().unwrap();
                if getter.deactivate() {
                    let v = buf.take();
                    getter.complete(Some(v));
                }
            }
            return Some(true);
        }
    }

    if let Some(getter) = pop_active_get(&mut inner) {
        handler.deactivate();
        getter.deactivate();
        getter.complete(Some(val));
        return Some(true);
    }

    if handler.blockable() {
        if inner.dirty_puts >= inner.dirty_limit {
            compact_puts(&mut inner);
        }
        assert!(
            inner.puts.len() < inner.op_queue_limit,
            "{}",
            ChanError::PutQueueOverflow { limit: inner.op_queue_limit }
        );
        let target: Rc<dyn DirtyTarget> = this.clone();
        handler.queue(target, true);
        inner.puts.push_back((handler, val));
        return None;
    }

    None
}

/// The get state machine (spec.md §4.2).
pub(crate) fn get_raw<T>(this: &Rc<RefCell<Inner<T>>>, handler: GetHandle<T>) -> Option<Option<T>>
where
    T: Clone,
{
    let mut inner = this.borrow_mut();

    if !handler.is_active() {
        return None;
    }

    if let Some(buf) = inner.buffer.as_mut() {
        if buf.can_take() {
            handler.deactivate();
            let val = buf.take();
            while buf.can_add() {
                match inner.puts.pop_front() {
                    Some((putter, v)) => {
                        if putter.deactivate() {
                            buf.add(v);
                            putter.complete(true);
                        }
                    }
                    None => {
                        inner.dirty_puts = 0;
                        break;
                    }
                }
            }
            return Some(Some(val));
        }
    }

    if let Some((putter, val)) = pop_active_put(&mut inner) {
        handler.deactivate();
        putter.deactivate();
        putter.complete(true);
        return Some(Some(val));
    }

    if inner.closed {
        if handler.is_active() && handler.deactivate() {
            return Some(None);
        }
        return None;
    }

    if handler.blockable() {
        if inner.dirty_gets >= inner.dirty_limit {
            compact_gets(&mut inner);
        }
        assert!(
            inner.gets.len() < inner.op_queue_limit,
            "{}",
            ChanError::GetQueueOverflow { limit: inner.op_queue_limit }
        );
        let target: Rc<dyn DirtyTarget> = this.clone();
        handler.queue(target, false);
        inner.gets.push_back(handler);
        return None;
    }

    None
}

/// The future returned by [`Chan::put`].
#[must_use = "futures do nothing unless polled"]
pub struct PutFuture<T> {
    inner: Rc<RefCell<Inner<T>>>,
    handler: Rc<FnHandler<bool>>,
    slot: SlotHandle<bool>,
    value: Option<T>,
    parked: bool,
}

impl<T: Clone> Future for PutFuture<T> {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        if !self.parked {
            let val = self.value.take().expect("PutFuture polled after completion");
            let handler: PutHandle = self.handler.clone();
            match put_raw(&self.inner, val, handler) {
                Some(outcome) => return Poll::Ready(outcome),
                None => self.parked = true,
            }
        }
        poll_slot(&self.slot, cx)
    }
}

/// The future returned by [`Chan::get`].
#[must_use = "futures do nothing unless polled"]
pub struct GetFuture<T> {
    inner: Rc<RefCell<Inner<T>>>,
    handler: Rc<FnHandler<Option<T>>>,
    slot: SlotHandle<Option<T>>,
    parked: bool,
}

impl<T: Clone> Future for GetFuture<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if !self.parked {
            let handler: GetHandle<T> = self.handler.clone();
            match get_raw(&self.inner, handler) {
                Some(outcome) => return Poll::Ready(outcome),
                None => self.parked = true,
            }
        }
        poll_slot(&self.slot, cx)
    }
}

/// A [`futures_core::Stream`] of successive values from a [`Chan`], ending once it closes and
/// drains. Built via [`Chan::stream`]; each `ChanStream` holds its own in-flight `get`, so two
/// streams over the same channel compete for values exactly like two independent `get` callers
/// would — streaming is just a convenience over repeated `get`, not a distinct consumption mode.
pub struct ChanStream<T> {
    chan: Chan<T>,
    pending: Option<GetFuture<T>>,
}

impl<T: Clone> Chan<T> {
    pub fn stream(&self) -> ChanStream<T> {
        ChanStream { chan: self.clone(), pending: None }
    }
}

impl<T: Clone> futures_core::Stream for ChanStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if self.pending.is_none() {
            self.pending = Some(self.chan.get());
        }
        match Pin::new(self.pending.as_mut().unwrap()).poll(cx) {
            Poll::Ready(v) => {
                self.pending = None;
                Poll::Ready(v)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The future returned by [`Chan::closed`].
pub struct Closed<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Future for Closed<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            Poll::Ready(())
        } else {
            inner.close_wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now<F: Future + Unpin>(mut f: F) -> Option<F::Output> {
        let waker = futures_util::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        match Pin::new(&mut f).poll(&mut cx) {
            Poll::Ready(v) => Some(v),
            Poll::Pending => None,
        }
    }

    #[test]
    fn rendezvous_put_parks_until_matching_get() {
        let c: Chan<i32> = Chan::rendezvous();
        let mut put_fut = c.put(1);
        assert_eq!(now(&mut put_fut), None, "put on an empty rendezvous channel must park");
        assert_eq!(now(c.get()), Some(Some(1)));
        assert_eq!(now(put_fut), Some(true));
    }

    #[test]
    fn fixed_buffer_absorbs_up_to_capacity() {
        let c: Chan<i32> = Chan::new(Kind::Fixed(2));
        assert_eq!(c.put_nowait(1, true), Some(true));
        assert_eq!(c.put_nowait(2, true), Some(true));
        assert_eq!(c.put_nowait(3, true), None, "fixed buffer is full");
        assert_eq!(c.get_nowait(true), Some(Some(1)));
        assert_eq!(c.get_nowait(true), Some(Some(2)));
        assert_eq!(c.get_nowait(true), None);
    }

    #[test]
    fn close_drains_buffer_before_sentinel() {
        let c: Chan<i32> = Chan::new(Kind::Fixed(4));
        c.add([1, 2, 3]);
        c.close();
        assert_eq!(c.get_nowait(true), Some(Some(1)));
        assert_eq!(c.get_nowait(true), Some(Some(2)));
        assert_eq!(c.get_nowait(true), Some(Some(3)));
        assert_eq!(c.get_nowait(true), Some(None), "drained and closed must yield the sentinel");
    }

    #[test]
    fn close_is_idempotent() {
        let c: Chan<i32> = Chan::rendezvous();
        c.close();
        c.close();
        assert!(c.is_closed());
    }

    #[test]
    fn close_resolves_parked_puts_false() {
        let c: Chan<i32> = Chan::rendezvous();
        let mut put_fut = c.put(1);
        assert_eq!(now(&mut put_fut), None);
        c.close();
        assert_eq!(now(put_fut), Some(false));
    }

    #[test]
    fn sliding_buffer_keeps_newest() {
        let c: Chan<i32> = Chan::new(Kind::Sliding(2));
        c.add([1, 2, 3, 4]);
        assert_eq!(c.drain_available(), vec![3, 4]);
    }

    #[tokio::test]
    async fn stream_yields_every_value_then_ends_on_close() {
        use futures_util::StreamExt;

        let c: Chan<i32> = Chan::new(Kind::Fixed(4));
        c.add([1, 2, 3]);
        c.close();

        let got: Vec<i32> = c.stream().collect().await;
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn put_nowait_immediate_only_never_parks() {
        let c: Chan<i32> = Chan::rendezvous();
        assert_eq!(c.put_nowait(1, true), None, "no getter ready; must not park");
        assert_eq!(c.get_nowait(true), None, "the refused put left nothing behind");
    }
}
