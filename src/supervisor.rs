//! Worker supervision
//!
//! Background workers catch panics per item, but a bug outside that guard
//! would still end the task. [`spawn_supervised`] restarts such a worker
//! after a short delay; a worker that returns normally is not restarted.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;

/// Default pause before restarting a crashed worker
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Spawn a worker that is restarted whenever it panics
///
/// `factory` builds a fresh worker future for every (re)start.
pub fn spawn_supervised<F, Fut>(
    name: impl Into<String>,
    restart_delay: Duration,
    mut factory: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let name = name.into();

    tokio::spawn(async move {
        let mut restarts: u64 = 0;
        loop {
            match AssertUnwindSafe(factory()).catch_unwind().await {
                Ok(()) => {
                    tracing::debug!(worker = %name, "Worker finished");
                    return;
                }
                Err(panic) => {
                    restarts += 1;
                    tracing::error!(
                        worker = %name,
                        restarts = restarts,
                        panic = %panic_message(panic.as_ref()),
                        "Worker crashed, restarting"
                    );
                    tokio::time::sleep(restart_delay).await;
                }
            }
        }
    })
}

/// Best-effort text of a panic payload
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_restarts_after_panic() {
        let starts = Arc::new(AtomicUsize::new(0));

        let handle = spawn_supervised("flaky", Duration::from_millis(1), {
            let starts = Arc::clone(&starts);
            move || {
                let starts = Arc::clone(&starts);
                async move {
                    if starts.fetch_add(1, Ordering::SeqCst) < 2 {
                        panic!("boom");
                    }
                }
            }
        });

        handle.await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
