//! Bounded per-subscriber queue with an explicit overflow policy.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::event::Event;

/// What a subscriber's mailbox does when an event arrives and it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// Treat the subscriber as unresponsive: close its mailbox and remove it
    /// from the hub.
    #[default]
    Disconnect,
    /// Discard the oldest queued event to make room. With a capacity of one
    /// this is a single-slot mailbox that always holds the latest event.
    Overwrite,
}

/// Outcome of offering an event to a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    Replaced,
    Full,
    Closed,
}

#[derive(Debug)]
struct State {
    queue: VecDeque<Event>,
    closed: bool,
}

/// Single-consumer queue shared between the hub and one subscription.
///
/// Wakeups go through `Notify::notify_one`, which stores a permit when the
/// consumer is not yet waiting, so a push between an empty check and the
/// following await is never lost.
#[derive(Debug)]
pub(crate) struct Mailbox {
    state: Mutex<State>,
    notify: Notify,
    capacity: usize,
    overflow: Overflow,
}

impl Mailbox {
    pub(crate) fn new(capacity: usize, overflow: Overflow) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            overflow,
        }
    }

    pub(crate) fn push(&self, event: Event) -> Delivery {
        let delivery = {
            let mut state = self.state.lock();
            if state.closed {
                return Delivery::Closed;
            }
            if state.queue.len() < self.capacity {
                state.queue.push_back(event);
                Delivery::Queued
            } else {
                match self.overflow {
                    Overflow::Disconnect => return Delivery::Full,
                    Overflow::Overwrite => {
                        state.queue.pop_front();
                        state.queue.push_back(event);
                        Delivery::Replaced
                    }
                }
            }
        };
        self.notify.notify_one();
        delivery
    }

    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Pops the next event without waiting. `Err(())` means closed and empty.
    pub(crate) fn try_pop(&self) -> Result<Option<Event>, ()> {
        let mut state = self.state.lock();
        match state.queue.pop_front() {
            Some(event) => Ok(Some(event)),
            None if state.closed => Err(()),
            None => Ok(None),
        }
    }

    /// Waits for the next event. Returns `None` once closed and empty.
    ///
    /// Cancel safe: an event is only removed in the poll that returns it.
    pub(crate) async fn pop(&self) -> Option<Event> {
        loop {
            match self.try_pop() {
                Ok(Some(event)) => return Some(event),
                Err(()) => return None,
                Ok(None) => self.notify.notified().await,
            }
        }
    }

    pub(crate) fn drain(&self) -> usize {
        let mut state = self.state.lock();
        let drained = state.queue.len();
        state.queue.clear();
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().queue.len()
    }
}
