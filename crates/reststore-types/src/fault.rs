//! Multi-subscriber error notification for in-flight resources.
//!
//! A resource handed out by a storage engine may fail long after the call
//! that produced it returned, e.g. when the client disconnects halfway
//! through an upload. Both the engine (to clean up its temporary state) and
//! the protocol layer (to finish the response) need to learn about that
//! failure, so a resource carries an [`ErrorChannel`] that any number of
//! parties can subscribe to.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::error;

/// A failure delivered over an [`ErrorChannel`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ResourceFault {
    /// Kind of the underlying I/O failure.
    pub kind: io::ErrorKind,
    /// Human readable description.
    pub message: String,
}

impl ResourceFault {
    pub fn new(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A fault that did not originate from the filesystem.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(io::ErrorKind::Other, message)
    }
}

impl From<&io::Error> for ResourceFault {
    fn from(err: &io::Error) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<io::Error> for ResourceFault {
    fn from(err: io::Error) -> Self {
        Self::from(&err)
    }
}

type Subscriber = Arc<dyn Fn(&ResourceFault) + Send + Sync>;

#[derive(Default)]
struct ChannelState {
    subscribers: Vec<Subscriber>,
    fault: Option<ResourceFault>,
}

/// Cloneable handle to a resource's error notifications.
///
/// Subscribers run in registration order. A subscriber registered after a
/// fault was emitted is invoked immediately with the recorded fault, so late
/// subscribers never miss a failure that is already in flight.
#[derive(Clone, Default)]
pub struct ErrorChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&ResourceFault) + Send + Sync + 'static,
    {
        let subscriber: Subscriber = Arc::new(subscriber);
        let replay = {
            let mut state = self.state.lock().expect("error channel lock poisoned");
            state.subscribers.push(Arc::clone(&subscriber));
            state.fault.clone()
        };
        if let Some(fault) = replay {
            invoke(&subscriber, &fault);
        }
    }

    /// Record `fault` and notify every subscriber.
    ///
    /// The lock is released before subscribers run so a subscriber may itself
    /// subscribe or emit without deadlocking.
    pub fn emit(&self, fault: impl Into<ResourceFault>) {
        let fault = fault.into();
        let subscribers = {
            let mut state = self.state.lock().expect("error channel lock poisoned");
            state.fault = Some(fault.clone());
            state.subscribers.clone()
        };
        for subscriber in &subscribers {
            invoke(subscriber, &fault);
        }
    }

    /// The most recently emitted fault, if any.
    pub fn fault(&self) -> Option<ResourceFault> {
        self.state
            .lock()
            .expect("error channel lock poisoned")
            .fault
            .clone()
    }

    /// Returns `true` once a fault was emitted.
    pub fn is_faulted(&self) -> bool {
        self.fault().is_some()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .expect("error channel lock poisoned")
            .subscribers
            .len()
    }
}

fn invoke(subscriber: &Subscriber, fault: &ResourceFault) {
    if panic::catch_unwind(AssertUnwindSafe(|| subscriber(fault))).is_err() {
        error!(fault = %fault, "error channel subscriber panicked");
    }
}

impl std::fmt::Debug for ErrorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorChannel")
            .field("subscribers", &self.subscriber_count())
            .field("fault", &self.fault())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Box<dyn Fn(&ResourceFault) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&log);
        let make = move |tag: &'static str| -> Box<dyn Fn(&ResourceFault) + Send + Sync> {
            let log = Arc::clone(&shared);
            Box::new(move |fault: &ResourceFault| {
                log.lock().unwrap().push(format!("{tag}:{}", fault.message));
            })
        };
        (log, make)
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let channel = ErrorChannel::new();
        let (log, make) = recorder();
        channel.subscribe(make("writer"));
        channel.subscribe(make("protocol"));

        channel.emit(ResourceFault::other("boom"));

        assert_eq!(*log.lock().unwrap(), vec!["writer:boom", "protocol:boom"]);
    }

    #[test]
    fn late_subscriber_receives_recorded_fault() {
        let channel = ErrorChannel::new();
        channel.emit(ResourceFault::other("disconnected"));

        let (log, make) = recorder();
        channel.subscribe(make("late"));

        assert_eq!(*log.lock().unwrap(), vec!["late:disconnected"]);
        assert!(channel.is_faulted());
    }

    #[test]
    fn clones_share_subscribers() {
        let channel = ErrorChannel::new();
        let clone = channel.clone();
        let (log, make) = recorder();
        channel.subscribe(make("a"));

        clone.emit(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));

        assert_eq!(*log.lock().unwrap(), vec!["a:pipe"]);
        assert_eq!(channel.fault().unwrap().kind, io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_delivery() {
        let channel = ErrorChannel::new();
        let (log, make) = recorder();
        channel.subscribe(|_| panic!("subscriber bug"));
        channel.subscribe(make("after"));

        channel.emit(ResourceFault::other("x"));

        assert_eq!(*log.lock().unwrap(), vec!["after:x"]);
    }

    #[test]
    fn subscriber_may_subscribe_reentrantly() {
        let channel = ErrorChannel::new();
        let inner = channel.clone();
        channel.subscribe(move |_| inner.subscribe(|_| {}));

        channel.emit(ResourceFault::other("x"));

        assert_eq!(channel.subscriber_count(), 2);
    }
}
