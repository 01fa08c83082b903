//! Many-to-one routing with per-source mute/pause/solo control.
//!
//! Not part of spec.md's component table, but present in `original_source/` as `Mux`; brought in
//! as a supplement because it's a natural generalisation of [`crate::merge::merge`] once a
//! consumer needs to dynamically add/remove sources and temporarily silence some of them rather
//! than fan in everything unconditionally.
//!
//! `solo_mode` governs what happens to *non-solo'd* sources while at least one source is solo'd:
//! [`SoloMode::Mute`] drops their values, [`SoloMode::Pause`] simply stops reading them (so their
//! puts block, applying backpressure instead of data loss). The source's Python implementation
//! represented this as a string (`'mute'` or `'pause'`) asserted against at call time, which is how
//! a typo there (passing neither) surfaces only at runtime; here it's an enum, so it can't
//! construct at all.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::channel::Chan;
use crate::scheduler::LocalScheduler;
use crate::select::select;

/// Identifies a source previously added to a [`Mux`], for the later admin calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(usize);

/// What happens to non-solo'd sources while at least one source is solo'd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoloMode {
    Mute,
    Pause,
}

struct Source<T> {
    chan: Chan<T>,
    muted: bool,
    paused: bool,
    solo: bool,
}

struct State<T> {
    sources: HashMap<usize, Source<T>>,
    solo_mode: SoloMode,
}

/// Routes values from a dynamic set of admitted source channels onto one output channel.
pub struct Mux<T: Clone + 'static> {
    state: Rc<RefCell<State<T>>>,
    next_id: Rc<Cell<usize>>,
    out: Chan<T>,
}

impl<T: Clone + 'static> Mux<T> {
    /// Spawns the routing task feeding `out`. Starts with no sources and `SoloMode::Mute`.
    pub fn new(scheduler: &LocalScheduler, out: Chan<T>) -> Self {
        let state = Rc::new(RefCell::new(State { sources: HashMap::new(), solo_mode: SoloMode::Mute }));
        let state_task = state.clone();
        let out_task = out.clone();

        scheduler.spawn(async move {
            loop {
                // Under `SoloMode::Pause`, a solo'd set reads only from the solos — non-solo
                // sources are simply not attached to the select, so their puts park and the
                // producer feels backpressure. Under `SoloMode::Mute`, non-solo sources are still
                // read (so they don't block) but their values are discarded once received. With no
                // solo active, each source's own `muted`/`paused` flag governs directly.
                let (active, muted_ids): (Vec<(usize, Chan<T>)>, HashSet<usize>) = {
                    let s = state_task.borrow();
                    let any_solo = s.sources.values().any(|src| src.solo);
                    let mut active = Vec::new();
                    let mut muted_ids = HashSet::new();
                    for (id, src) in s.sources.iter() {
                        let paused_effective = if any_solo && s.solo_mode == SoloMode::Pause {
                            !src.solo
                        } else {
                            src.paused
                        };
                        if paused_effective {
                            continue;
                        }
                        let muted_effective = if any_solo && s.solo_mode == SoloMode::Mute {
                            !src.solo
                        } else {
                            src.muted
                        };
                        if muted_effective {
                            muted_ids.insert(*id);
                        }
                        active.push((*id, src.chan.clone()));
                    }
                    (active, muted_ids)
                };

                if active.is_empty() {
                    // No readable source right now (none added yet, or all paused). There's
                    // no generic "admin state changed" signal to park on, so this polls; fine for
                    // a routing task that's expected to have sources most of the time, but a busy
                    // mux with everything paused will spin rather than truly sleep.
                    tokio::task::yield_now().await;
                    continue;
                }

                let cases = active
                    .into_iter()
                    .map(|(id, chan)| chan.get_case(move |v| (id, v)))
                    .collect();
                let (id, value) = select(cases, false, None).await;
                match value {
                    Some(v) => {
                        if muted_ids.contains(&id) {
                            continue;
                        }
                        if !out_task.put(v).await {
                            break;
                        }
                    }
                    None => {
                        state_task.borrow_mut().sources.remove(&id);
                    }
                }
            }
        });

        Mux { state, next_id: Rc::new(Cell::new(0)), out }
    }

    pub fn out(&self) -> Chan<T> {
        self.out.clone()
    }

    /// Admits `chan` as a source, unmuted and unpaused.
    pub fn add(&self, chan: Chan<T>) -> SourceId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.state
            .borrow_mut()
            .sources
            .insert(id, Source { chan, muted: false, paused: false, solo: false });
        SourceId(id)
    }

    pub fn remove(&self, id: SourceId) {
        self.state.borrow_mut().sources.remove(&id.0);
    }

    pub fn mute(&self, id: SourceId) {
        self.set_flag(id, |s| s.muted = true);
    }

    pub fn unmute(&self, id: SourceId) {
        self.set_flag(id, |s| s.muted = false);
    }

    pub fn pause(&self, id: SourceId) {
        self.set_flag(id, |s| s.paused = true);
    }

    pub fn unpause(&self, id: SourceId) {
        self.set_flag(id, |s| s.paused = false);
    }

    pub fn solo(&self, id: SourceId) {
        self.set_flag(id, |s| s.solo = true);
    }

    pub fn unsolo(&self, id: SourceId) {
        self.set_flag(id, |s| s.solo = false);
    }

    pub fn set_solo_mode(&self, mode: SoloMode) {
        self.state.borrow_mut().solo_mode = mode;
    }

    fn set_flag(&self, id: SourceId, f: impl FnOnce(&mut Source<T>)) {
        if let Some(src) = self.state.borrow_mut().sources.get_mut(&id.0) {
            f(src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Kind;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::task::LocalSet;

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let waker = futures_util::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(fut).poll(&mut cx)
    }

    #[tokio::test]
    async fn routes_from_an_added_source() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let out: Chan<i32> = Chan::new(Kind::Fixed(4));
                let mux = Mux::new(&scheduler, out.clone());
                let a: Chan<i32> = Chan::rendezvous();
                mux.add(a.clone());

                a.put(1).await;
                assert_eq!(out.get().await, Some(1));
            })
            .await;
    }

    #[tokio::test]
    async fn muted_source_is_not_read() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let out: Chan<i32> = Chan::new(Kind::Fixed(4));
                let mux = Mux::new(&scheduler, out.clone());
                let a: Chan<i32> = Chan::new(Kind::Fixed(4));
                let id = mux.add(a.clone());
                mux.mute(id);

                a.put(1).await;
                assert_eq!(out.get_nowait(true), None, "muted source must not reach the output");
            })
            .await;
    }

    #[tokio::test]
    async fn solo_silences_other_sources_under_mute_mode() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let out: Chan<i32> = Chan::new(Kind::Fixed(4));
                let mux = Mux::new(&scheduler, out.clone());
                let a: Chan<i32> = Chan::new(Kind::Fixed(4));
                let b: Chan<i32> = Chan::new(Kind::Fixed(4));
                mux.add(a.clone());
                let id_b = mux.add(b.clone());
                mux.solo(id_b);

                a.put(1).await;
                b.put(2).await;
                assert_eq!(out.get().await, Some(2), "only the solo'd source should be routed");
            })
            .await;
    }

    #[tokio::test]
    async fn solo_under_pause_mode_backpressures_non_solo_sources_instead_of_dropping() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let out: Chan<i32> = Chan::new(Kind::Fixed(4));
                let mux = Mux::new(&scheduler, out.clone());
                let a: Chan<i32> = Chan::rendezvous();
                let b: Chan<i32> = Chan::new(Kind::Fixed(4));
                mux.add(a.clone());
                let id_b = mux.add(b.clone());
                mux.set_solo_mode(SoloMode::Pause);
                mux.solo(id_b);

                let mut a_put = a.put(1);
                tokio::task::yield_now().await;
                assert!(
                    poll_once(&mut a_put).is_pending(),
                    "a non-solo source must not be read at all under Pause mode, so its put parks"
                );

                b.put(2).await;
                assert_eq!(out.get().await, Some(2), "only the solo'd source should be routed");
                assert!(
                    poll_once(&mut a_put).is_pending(),
                    "a must remain parked: Pause mode never reads non-solo sources"
                );
            })
            .await;
    }

    #[tokio::test]
    async fn solo_under_mute_mode_drains_but_discards_non_solo_sources() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let out: Chan<i32> = Chan::new(Kind::Fixed(4));
                let mux = Mux::new(&scheduler, out.clone());
                let a: Chan<i32> = Chan::new(Kind::Fixed(4));
                let b: Chan<i32> = Chan::new(Kind::Fixed(4));
                mux.add(a.clone());
                let id_b = mux.add(b.clone());
                mux.solo(id_b); // default solo_mode is Mute

                a.put(1).await; // consumed (read) but dropped, not left parked
                b.put(2).await;
                assert_eq!(out.get().await, Some(2), "only the solo'd source's value is forwarded");
                assert_eq!(out.get_nowait(true), None, "a's muted value must not reach the output");
            })
            .await;
    }
}
