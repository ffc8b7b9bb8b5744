use std::future::Future;

use tokio::{
    sync::watch,
    time::{sleep, Duration},
};

/// Bounds of a [`retry`] loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RetryOptions {
    /// Pause between two attempts.
    pub delay: Duration,
    /// Maximum number of retries, `0` means unlimited.
    pub max_attempts: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: 0,
        }
    }
}

impl RetryOptions {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

/// Result of a single attempt.
pub(crate) enum Attempt<T, E> {
    /// Stop and return the value.
    Done(T),
    /// Stop and return the error of the operation.
    Failed(E),
    /// Try again after the configured delay.
    Retry,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum RetryError<E> {
    #[error("retry cancelled")]
    Cancelled,
    /// The loop gave up waiting, distinct from the operation's own failure.
    #[error("exceeded max attempts ({0})")]
    MaxAttemptsExceeded(u32),
    #[error("{0}")]
    Operation(E),
}

/// Signals cancellation to in-flight [`retry`] loops.
pub(crate) struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Cloneable cancellation token observed by [`retry`].
#[derive(Clone, Debug)]
pub(crate) struct Cancellation {
    receiver: watch::Receiver<bool>,
}

pub(crate) fn cancellation() -> (CancelHandle, Cancellation) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, Cancellation { receiver })
}

impl Cancellation {
    /// A token which is never cancelled.
    pub fn never() -> Self {
        cancellation().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancelled, never resolves if the handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Call `attempt` until it returns [`Attempt::Done`] or [`Attempt::Failed`].
///
/// Retries are bounded by `options.max_attempts`, which yields
/// [`RetryError::MaxAttemptsExceeded`] once exceeded. Cancellation is checked
/// before the first attempt and interrupts the delay between attempts.
pub(crate) async fn retry<T, E, F, Fut>(
    cancel: &Cancellation,
    options: RetryOptions,
    mut attempt: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    if cancel.is_cancelled() {
        return Err(RetryError::Cancelled);
    }
    let mut retries: u32 = 0;
    loop {
        match attempt().await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Failed(e) => return Err(RetryError::Operation(e)),
            Attempt::Retry => (),
        }
        retries += 1;
        if options.max_attempts != 0 && retries > options.max_attempts {
            return Err(RetryError::MaxAttemptsExceeded(options.max_attempts));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = sleep(options.delay) => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn count_to(calls: &AtomicU32, target: u32) -> Attempt<u32, String> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n > target {
            Attempt::Done(n)
        } else {
            Attempt::Retry
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result = retry(&Cancellation::never(), RetryOptions::new(Duration::ZERO, 4), || {
            count_to(&calls, 5)
        })
        .await;
        assert!(matches!(result, Err(RetryError::MaxAttemptsExceeded(4))));
        assert_eq!(5, calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn returns_value_within_budget() {
        let calls = AtomicU32::new(0);
        let result = retry(&Cancellation::never(), RetryOptions::new(Duration::ZERO, 10), || {
            count_to(&calls, 5)
        })
        .await;
        assert_eq!(6, result.unwrap());
    }

    #[tokio::test]
    async fn unlimited_attempts() {
        let calls = AtomicU32::new(0);
        let result = retry(&Cancellation::never(), RetryOptions::default(), || {
            count_to(&calls, 100)
        })
        .await;
        assert_eq!(101, result.unwrap());
    }

    #[tokio::test]
    async fn operation_error_is_distinct() {
        let result: Result<(), RetryError<String>> =
            retry(&Cancellation::never(), RetryOptions::default(), || async {
                Attempt::Failed("boom".to_string())
            })
            .await;
        match result {
            Err(RetryError::Operation(e)) => assert_eq!("boom", e),
            _ => panic!("expected operation error"),
        }
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let (handle, cancel) = cancellation();
        handle.cancel();
        let calls = AtomicU32::new(0);
        let result = retry(&cancel, RetryOptions::default(), || count_to(&calls, 1)).await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(0, calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_interrupts_delay() {
        let (handle, cancel) = cancellation();
        let calls = AtomicU32::new(0);
        let canceller = tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        let result = retry(
            &cancel,
            RetryOptions::new(Duration::from_secs(3600), 0),
            || count_to(&calls, 10),
        )
        .await;
        canceller.await.unwrap();
        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }
}
