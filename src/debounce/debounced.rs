use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::StateError;

struct Pending<T> {
    trailing: watch::Sender<T>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl<T> Pending<T> {
    fn cancel(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// A trailing copy of a changing value.
///
/// [`update`](Debounced::update) restarts the delay; the trailing value only
/// moves once the delay has passed without another update. Dropping the
/// `Debounced` discards whatever update is still waiting.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use slotstate::Debounced;
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let search = Debounced::new(String::new(), Duration::from_millis(300)).unwrap();
/// search.update("r".to_string());
/// search.update("ru".to_string());
/// search.update("rust".to_string());
/// assert_eq!(search.get(), "");
///
/// tokio::time::sleep(Duration::from_millis(301)).await;
/// assert_eq!(search.get(), "rust");
/// # }
/// ```
pub struct Debounced<T> {
    pending: Arc<Mutex<Pending<T>>>,
    delay: Duration,
    handle: Handle,
}

impl<T> Debounced<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a debouncer on the current Tokio runtime.
    pub fn new(initial: T, delay: Duration) -> Result<Self, StateError> {
        let handle = Handle::try_current().map_err(|_| StateError::NoRuntime)?;
        Ok(Self::with_handle(initial, delay, handle))
    }

    /// Like [`new`](Self::new), spawning timers on `handle`.
    pub fn with_handle(initial: T, delay: Duration, handle: Handle) -> Self {
        let (trailing, _) = watch::channel(initial);
        Self {
            pending: Arc::new(Mutex::new(Pending {
                trailing,
                generation: 0,
                timer: None,
            })),
            delay,
            handle,
        }
    }

    /// How long `update` waits before committing.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Feed a new input value, restarting the delay.
    pub fn update(&self, value: T) {
        let mut pending = self.pending.lock();
        pending.cancel();

        if self.delay.is_zero() {
            pending.trailing.send_replace(value);
            return;
        }

        let generation = pending.generation;
        let delay = self.delay;
        let weak: Weak<Mutex<Pending<T>>> = Arc::downgrade(&self.pending);
        pending.timer = Some(self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(pending) = weak.upgrade() else {
                return;
            };
            let mut pending = pending.lock();
            // A newer update or a cancel may have landed after the timer woke.
            if pending.generation == generation {
                pending.trailing.send_replace(value);
                pending.timer = None;
            }
        }));
    }

    /// The current trailing value.
    pub fn get(&self) -> T {
        self.pending.lock().trailing.borrow().clone()
    }

    /// Receiver notified whenever the trailing value moves.
    pub fn changed(&self) -> watch::Receiver<T> {
        self.pending.lock().trailing.subscribe()
    }

    /// Drop any update still waiting for its delay.
    pub fn cancel(&self) {
        self.pending.lock().cancel();
    }

    /// Whether an update is waiting on its timer.
    pub fn is_pending(&self) -> bool {
        self.pending.lock().timer.is_some()
    }
}

impl<T> Drop for Debounced<T> {
    fn drop(&mut self) {
        self.pending.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn needs_a_runtime() {
        assert!(matches!(
            Debounced::new(0, ms(10)),
            Err(StateError::NoRuntime)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_value_waits_for_quiet_period() {
        let debounced = Debounced::new(0, ms(100)).unwrap();
        debounced.update(1);
        sleep(ms(50)).await;
        debounced.update(2);

        sleep(ms(60)).await;
        assert_eq!(debounced.get(), 0);
        assert!(debounced.is_pending());

        sleep(ms(50)).await;
        assert_eq!(debounced.get(), 2);
        assert!(!debounced.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_is_immediate() {
        let debounced = Debounced::new("a", Duration::ZERO).unwrap();
        debounced.update("b");
        assert_eq!(debounced.get(), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_pending() {
        let debounced = Debounced::new(0, ms(100)).unwrap();
        debounced.update(7);
        debounced.cancel();
        sleep(ms(200)).await;
        assert_eq!(debounced.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_discards_pending() {
        let debounced = Debounced::new(0, ms(100)).unwrap();
        let rx = debounced.changed();
        debounced.update(5);
        drop(debounced);

        sleep(ms(200)).await;
        assert_eq!(*rx.borrow(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_receiver_sees_trailing_value() {
        let debounced = Debounced::new(0, ms(100)).unwrap();
        let mut rx = debounced.changed();
        debounced.update(3);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 3);
    }
}
