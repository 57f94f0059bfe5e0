use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Debounce window: a save fires this long after the last touch
pub const AUTOSAVE_DELAY: Duration = Duration::from_secs(20);

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Debounced background saving.
///
/// Each `touch()` re-arms the timer; the save closure runs once the
/// delay has elapsed with no further touches, coalescing intermediate
/// changes into a single save.
pub struct Autosave {
    last_touch: Arc<Mutex<Option<Instant>>>,
    handle: JoinHandle<()>,
}

impl Autosave {
    /// Start the autosave task with the default delay
    pub fn start<F>(save: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_delay(AUTOSAVE_DELAY, save)
    }

    /// Start the autosave task with a custom delay
    pub fn with_delay<F>(delay: Duration, save: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let last_touch: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

        let touch_state = last_touch.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;

                let due = {
                    let mut state = touch_state.lock();
                    match *state {
                        Some(touched) if touched.elapsed() >= delay => {
                            *state = None;
                            true
                        }
                        _ => false,
                    }
                };

                if due {
                    debug!("Autosave firing");
                    save();
                }
            }
        });

        Self { last_touch, handle }
    }

    /// Record a change; re-arms the debounce timer
    pub fn touch(&self) {
        *self.last_touch.lock() = Some(Instant::now());
    }

    /// Stop the autosave task without firing a final save
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for Autosave {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
