//! CSP-style channels for single-threaded cooperative concurrency.
//!
//! This crate ports the rendezvous/buffered channel, multi-way `select`, fan-in (`merge`),
//! fan-out (`Duplicator`), topic routing (`Publisher`), and many-to-one routing (`Mux`) components
//! of an `asyncio`-flavoured channel library to a plain `Future`-based core: every channel
//! operation is a `Future` that makes progress purely by being polled, with no hidden dependency
//! on any particular executor. `LocalScheduler` is the one place an executor shows up, for the
//! handful of operations (`go`, `timeout`, and each composer's background task) that need to
//! actively spawn work rather than just being awaited.
//!
//! # Example
//!
//! ```no_run
//! use cochan::{buffer::Kind, channel::Chan};
//!
//! # async fn example() {
//! let ch: Chan<i32> = Chan::new(Kind::Fixed(8));
//! ch.put(1).await;
//! assert_eq!(ch.get().await, Some(1));
//! # }
//! ```
//!
//! # Single-threaded by design
//!
//! Every type here is `!Send`/`!Sync` (`Rc<RefCell<_>>` throughout, not `Arc<Mutex<_>>`). Run a
//! program built on this crate inside a [`tokio::task::LocalSet`]; see [`scheduler::LocalScheduler`]
//! for the spawn-side of that story and [`scheduler::SchedulerHandle`] for the one sanctioned way
//! to reach back into it from another thread.

pub mod buffer;
pub mod channel;
pub mod dup;
pub mod error;
pub mod go;
pub(crate) mod handler;
pub mod merge;
pub mod mux;
pub mod publisher;
pub mod scheduler;
pub mod select;

pub use buffer::Kind as BufferKind;
pub use channel::Chan;
pub use dup::{Duplicator, TapId};
pub use error::ChanError;
pub use go::{go, timeout};
pub use merge::merge;
pub use mux::{Mux, SoloMode, SourceId};
pub use publisher::Publisher;
pub use scheduler::{LocalScheduler, SchedulerHandle};
pub use select::{select, Case};
