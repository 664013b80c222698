use scholia_core::error::CoreError;

pub use tokio_util::sync::CancellationToken;

/// Cooperative cancellation check, used at every suspension point.
pub fn check(token: &CancellationToken) -> Result<(), CoreError> {
    if token.is_cancelled() {
        Err(CoreError::Cancelled)
    } else {
        Ok(())
    }
}
