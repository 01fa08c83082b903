//! Fan-in: merge several channels' values onto one output channel (spec.md §4.6).
//!
//! Implemented, like the source's `merge`, as a background task repeatedly `select`ing a get from
//! whichever input channels are still open and forwarding whatever it receives to the output.
//! When an input reports closed it's dropped from the select set (not propagated as a value); the
//! output closes once every input has closed — one input closing early doesn't end the merge.

use crate::buffer::Kind;
use crate::channel::Chan;
use crate::scheduler::LocalScheduler;
use crate::select::select;

/// Merges `inputs` onto a freshly created output channel, spawned via `scheduler`.
///
/// `out_buffer` sizes the output the same way [`Chan::new`](crate::channel::Chan::new) would;
/// `None` gives a pure-rendezvous output, matching the source's `merge(*chans, buffer=None)`
/// default.
pub fn merge<T: Clone + 'static>(
    scheduler: &LocalScheduler,
    inputs: Vec<Chan<T>>,
    out_buffer: Option<Kind>,
) -> Chan<T> {
    let out = match out_buffer {
        Some(kind) => Chan::new(kind),
        None => Chan::rendezvous(),
    };
    let out_task = out.clone();

    scheduler.spawn(async move {
        let mut remaining = inputs;
        while !remaining.is_empty() {
            let cases = remaining
                .iter()
                .enumerate()
                .map(|(idx, chan)| chan.get_case(move |v| (idx, v)))
                .collect();
            let (idx, value) = select(cases, false, None).await;
            match value {
                Some(v) => {
                    if !out_task.put(v).await {
                        break;
                    }
                }
                None => {
                    remaining.swap_remove(idx);
                }
            }
        }
        out_task.close();
    });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Kind;
    use tokio::task::LocalSet;

    #[tokio::test]
    async fn forwards_from_every_input_until_all_close() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let a: Chan<i32> = Chan::new(Kind::Fixed(4));
                let b: Chan<i32> = Chan::new(Kind::Fixed(4));
                a.add([1, 2]);
                b.add([3]);
                a.close();
                b.close();

                let out = merge(&scheduler, vec![a, b], Some(Kind::Fixed(8)));
                let mut got = Vec::new();
                while let Some(v) = out.get().await {
                    got.push(v);
                }
                got.sort_unstable();
                assert_eq!(got, vec![1, 2, 3]);
            })
            .await;
    }

    #[tokio::test]
    async fn one_input_closing_does_not_end_the_merge() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let a: Chan<i32> = Chan::rendezvous();
                let b: Chan<i32> = Chan::rendezvous();
                let out = merge(&scheduler, vec![a.clone(), b.clone()], None);

                a.close();
                tokio::task::yield_now().await;
                b.put(42).await;
                assert_eq!(out.get().await, Some(42));
            })
            .await;
    }
}
