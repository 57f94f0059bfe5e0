use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::errors::TranslationError;
use crate::model::{SubtitleBatch, SubtitleScene};

/// A synchronous observer registry for one event.
///
/// Subscribers are invoked in registration order on the emitting thread.
/// `connect` returns a token that `disconnect` accepts, standing in for
/// the `+=`/`-=` signal syntax of event frameworks.
pub struct Signal<T: ?Sized> {
    subscribers: Mutex<Vec<(usize, Box<dyn Fn(&T) + Send + Sync>)>>,
    next_token: AtomicUsize,
}

impl<T: ?Sized> Default for Signal<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_token: AtomicUsize::new(1),
        }
    }
}

impl<T: ?Sized> Signal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; returns a token for disconnecting
    pub fn connect(&self, subscriber: impl Fn(&T) + Send + Sync + 'static) -> usize {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((token, Box::new(subscriber)));
        token
    }

    /// Remove a subscriber by its token
    pub fn disconnect(&self, token: usize) {
        self.subscribers.lock().retain(|(id, _)| *id != token);
    }

    /// Invoke every subscriber with the event payload
    pub fn emit(&self, payload: &T) {
        // Subscribers run outside the registry lock so they may connect
        // or disconnect from within a callback
        let subscribers = std::mem::take(&mut *self.subscribers.lock());
        for (_, subscriber) in &subscribers {
            subscriber(payload);
        }
        let mut registry = self.subscribers.lock();
        let mut restored = subscribers;
        restored.extend(registry.drain(..));
        *registry = restored;
    }

    /// Number of connected subscribers
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }
}

/// The observable signals emitted during a translation run.
///
/// Payloads are snapshots taken after the subtitle lock is released, so
/// subscribers are free to take the lock themselves.
#[derive(Default)]
pub struct TranslationEvents {
    /// Preprocessing finished; payload is the batched scenes
    pub preprocessed: Signal<[SubtitleScene]>,

    /// A batch finished translating
    pub batch_translated: Signal<SubtitleBatch>,

    /// A batch received a partial update (streaming)
    pub batch_updated: Signal<SubtitleBatch>,

    /// Every batch of a scene finished
    pub scene_translated: Signal<SubtitleScene>,

    /// A batch failed with an error
    pub error: Signal<TranslationError>,

    /// A non-fatal condition worth surfacing
    pub warning: Signal<str>,

    /// Progress information
    pub info: Signal<str>,
}

impl TranslationEvents {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_signal_shouldDeliverInRegistrationOrder() {
        let signal: Signal<str> = Signal::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        signal.connect(move |message: &str| first.lock().push(format!("first:{message}")));
        let second = seen.clone();
        signal.connect(move |message: &str| second.lock().push(format!("second:{message}")));

        signal.emit("hello");
        assert_eq!(
            *seen.lock(),
            vec!["first:hello".to_string(), "second:hello".to_string()]
        );
    }

    #[test]
    fn test_signal_disconnect_shouldStopDelivery() {
        let signal: Signal<str> = Signal::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let collector = seen.clone();
        let token = signal.connect(move |message: &str| collector.lock().push(message.to_string()));

        signal.emit("one");
        signal.disconnect(token);
        signal.emit("two");

        assert_eq!(*seen.lock(), vec!["one".to_string()]);
        assert!(signal.is_empty());
    }
}
