//! Topic routing: dispatch values from one source channel to per-topic subscriber sets
//! (spec.md §4.8).
//!
//! A `Publisher` reads the source once, extracts each value's topic with a user-supplied
//! function, and forwards the value into that topic's feed channel, which a [`Duplicator`] then
//! fans out to subscribers — created lazily on first subscriber, same as the source's `Pub`. A
//! topic function that panics is the one case this crate treats as a genuine runtime fault rather
//! than a `bool`/`Option` outcome: it's caught, logged via `tracing::error!`, and the value is
//! dropped, so one bad value can't take down the whole publisher.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::error;

use crate::channel::Chan;
use crate::dup::{Duplicator, TapId};
use crate::scheduler::LocalScheduler;

struct Topic<T: Clone + 'static> {
    feed: Chan<T>,
    dup: Duplicator<T>,
}

/// Routes values from a source channel to per-topic subscribers.
///
/// `K` is the topic key (needs `Eq + Hash` like any `HashMap` key); `topic_of` is moved into the
/// background routing task and called once per value. `scheduler` is an `Rc` rather than a
/// borrowed reference because `subscribe` spawns a fresh per-topic `Duplicator` worker lazily, on
/// whatever turn the first subscriber for that topic shows up.
pub struct Publisher<T: Clone + 'static, K: Hash + Eq + Clone + 'static> {
    topics: Rc<RefCell<HashMap<K, Topic<T>>>>,
    scheduler: Rc<LocalScheduler>,
}

/// User hook invoked, in addition to the `tracing::error!` event, whenever the topic function
/// panics (spec.md §9's redesign remark: "should expose a user-provided error hook rather than
/// writing to a fixed stream"). Receives a message describing the failure.
pub type TopicErrorHook = Rc<dyn Fn(&str)>;

impl<T, K> Publisher<T, K>
where
    T: Clone + 'static,
    K: Hash + Eq + Clone + 'static,
{
    pub fn new(
        scheduler: Rc<LocalScheduler>,
        source: Chan<T>,
        topic_of: impl Fn(&T) -> K + 'static,
    ) -> Self {
        Self::with_error_hook(scheduler, source, topic_of, None)
    }

    /// Like [`Publisher::new`], but `on_error` is also called with a diagnostic message each time
    /// `topic_of` panics, instead of only logging via `tracing`.
    pub fn with_error_hook(
        scheduler: Rc<LocalScheduler>,
        source: Chan<T>,
        topic_of: impl Fn(&T) -> K + 'static,
        on_error: Option<TopicErrorHook>,
    ) -> Self {
        let topics: Rc<RefCell<HashMap<K, Topic<T>>>> = Rc::new(RefCell::new(HashMap::new()));
        let topics_task = topics.clone();

        scheduler.spawn(async move {
            loop {
                match source.get().await {
                    Some(value) => {
                        let topic = match catch_unwind(AssertUnwindSafe(|| topic_of(&value))) {
                            Ok(topic) => topic,
                            Err(_) => {
                                let msg = "publisher topic function panicked; dropping value";
                                error!("{msg}");
                                if let Some(hook) = &on_error {
                                    hook(msg);
                                }
                                continue;
                            }
                        };
                        let feed = topics_task.borrow().get(&topic).map(|t| t.feed.clone());
                        if let Some(feed) = feed {
                            feed.put(value).await;
                        }
                        // No subscribers for this topic yet: dropped, matching the source's `Pub`,
                        // which only fans out to topics that already have a `Duplicator`.
                    }
                    None => {
                        let feeds: Vec<Chan<T>> =
                            topics_task.borrow().values().map(|t| t.feed.clone()).collect();
                        for feed in feeds {
                            feed.close();
                        }
                        break;
                    }
                }
            }
        });

        Publisher { topics, scheduler }
    }

    /// Subscribes a fresh rendezvous channel to `topic`, creating that topic's feed channel and
    /// `Duplicator` on first use.
    pub fn subscribe(&self, topic: K) -> (TapId, Chan<T>) {
        let mut topics = self.topics.borrow_mut();
        if !topics.contains_key(&topic) {
            let feed = Chan::rendezvous();
            let dup = Duplicator::new(&self.scheduler, feed.clone());
            topics.insert(topic.clone(), Topic { feed, dup });
        }
        topics.get(&topic).unwrap().dup.tap()
    }

    pub fn unsubscribe(&self, topic: &K, id: TapId) {
        if let Some(t) = self.topics.borrow().get(topic) {
            t.dup.untap(id);
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics.borrow().len()
    }
}
