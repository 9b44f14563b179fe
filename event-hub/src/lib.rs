//! In-process publish/subscribe for mpdex.
//!
//! Producers publish [`Event`]s under a [`Topic`]; each [`Subscription`]
//! receives the events whose topic is in its filter through its own bounded
//! mailbox. Publishing is synchronous and never waits on a subscriber: a
//! subscriber that lets its mailbox fill up is treated as dead and removed,
//! unless it asked for an overwrite mailbox.
//!
//! # Example
//!
//! ```
//! use event_hub::{EventHub, Subsystem, Topic};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let hub = EventHub::new();
//! let mut playlist = hub.subscribe([Topic::Subsystem(Subsystem::Playlist)]);
//!
//! hub.publish(Topic::Subsystem(Subsystem::Player));
//! hub.publish(Topic::Subsystem(Subsystem::Playlist));
//!
//! let event = playlist.recv().await.unwrap();
//! assert_eq!(event.topic.as_str(), "playlist");
//! # }
//! ```

pub mod error;
pub mod event;
pub mod hub;
mod mailbox;
pub mod topic;

pub use error::{HubError, Result};
pub use event::Event;
pub use hub::{EventHub, SubscriberId, Subscription, TryRecvError, DEFAULT_CAPACITY};
pub use mailbox::Overflow;
pub use topic::{Subsystem, Topic};
