//! Transient-conflict retry loop.

use std::time::Duration;

/// Maximum attempts for a transactional mutation.
pub(crate) const MAX_ATTEMPTS: u32 = 5;

/// First backoff delay; doubles per attempt.
pub(crate) const BASE_DELAY: Duration = Duration::from_millis(10);

/// Run the given async block until it succeeds, fails permanently, or
/// exhausts the retry budget. Only errors reporting
/// [`MetadataError::is_transient`] are retried.
///
/// Implemented as a macro (rather than a generic function taking an
/// `AsyncFnMut`) because the latter triggers a rustc limitation
/// ("implementation of `Send` is not general enough") when called from
/// inside an `#[async_trait]`-boxed method that borrows its arguments.
macro_rules! with_retries {
    ($op:expr) => {
        async {
            let mut delay = $crate::retry::BASE_DELAY;
            let mut attempt: u32 = 1;
            loop {
                match (async { $op }).await {
                    Err(e) if $crate::error::MetadataError::is_transient(&e) && attempt < $crate::retry::MAX_ATTEMPTS => {
                        tracing::debug!(attempt, error = %e, "retrying transient metadata conflict");
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        attempt += 1;
                    }
                    other => break other,
                }
            }
        }
    };
}

pub(crate) use with_retries;
