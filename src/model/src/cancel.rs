//! Cancellation helpers shared by every collaborator call.

use std::future::Future;

use cog_core::error::{CogError, Result};
use tokio_util::sync::CancellationToken;

/// Fail with [`CogError::Cancelled`] if `cancel` has already fired.
pub fn check(cancel: &CancellationToken, what: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(CogError::Cancelled(what.to_string()));
    }
    Ok(())
}

/// Race `fut` against the token.
///
/// An already-cancelled token wins without polling `fut`.
pub async fn run_cancellable<T, F>(cancel: &CancellationToken, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CogError::Cancelled(what.to_string())),
        result = fut => result,
    }
}
