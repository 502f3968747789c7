//! Ordered teardown of resources acquired in sequence.

use std::error::Error;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

const DISPOSE_TARGET: &str = "envscout_locator::dispose";

/// Error returned by a cleanup step.
pub(crate) type CleanupError = Box<dyn Error + Send + Sync>;

type CleanupFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CleanupError>> + Send + 'a>>;

/// Cleanup steps run in reverse registration order.
///
/// Register steps in acquisition order. A failing step is logged and the
/// remaining steps still run.
#[derive(Default)]
pub(crate) struct CleanupStack<'a> {
    steps: Vec<(&'static str, CleanupFuture<'a>)>,
}

impl<'a> CleanupStack<'a> {
    pub(crate) fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Registers a step. The future is not polled until [`Self::run`].
    pub(crate) fn push<F>(&mut self, name: &'static str, step: F)
    where
        F: Future<Output = Result<(), CleanupError>> + Send + 'a,
    {
        self.steps.push((name, Box::pin(step)));
    }

    /// Runs every step, newest first. Returns the number of failed steps.
    pub(crate) async fn run(mut self) -> usize {
        let mut failures = 0;
        while let Some((name, step)) = self.steps.pop() {
            match step.await {
                Ok(()) => debug!(target: DISPOSE_TARGET, step = name, "cleanup step finished"),
                Err(error) => {
                    failures += 1;
                    warn!(
                        target: DISPOSE_TARGET,
                        step = name,
                        error = %error,
                        "cleanup step failed; continuing"
                    );
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[tokio::test]
    async fn runs_in_reverse_order_and_survives_failures() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::new();
        for name in ["process", "streams", "channel", "listeners"] {
            let order = Arc::clone(&order);
            stack.push(name, async move {
                order.lock().expect("order").push(name);
                if name == "channel" {
                    return Err(CleanupError::from("channel already closed"));
                }
                Ok(())
            });
        }

        let failures = stack.run().await;

        assert_eq!(failures, 1);
        assert_eq!(
            *order.lock().expect("order"),
            vec!["listeners", "channel", "streams", "process"]
        );
    }

    #[tokio::test]
    async fn steps_are_lazy_until_run() {
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        let mut stack = CleanupStack::new();
        stack.push("flag", async move {
            *flag.lock().expect("flag") = true;
            Ok(())
        });

        assert!(!*ran.lock().expect("ran"));
        stack.run().await;
        assert!(*ran.lock().expect("ran"));
    }
}
