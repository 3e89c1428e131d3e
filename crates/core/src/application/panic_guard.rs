// Panic isolation for handler tasks
use std::any::Any;
use tracing::error;

/// Outcome of a handler task that ran on its own tokio task
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Task returned normally
    Success(T),
    /// Task panicked; carries the panic message
    Panicked(String),
}

/// Turn a panic payload into a readable message
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run a future on its own tokio task so a panic cannot take down the caller
///
/// Cancellation of the spawned task is reported like a panic.
pub async fn execute_guarded_async<F, T>(future: F) -> PanicGuardResult<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn(future).await {
        Ok(value) => PanicGuardResult::Success(value),
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let panic_msg = panic_message(payload.as_ref());
            error!(panic_msg = %panic_msg, "Handler task panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
        Err(join_err) => PanicGuardResult::Panicked(format!("task cancelled: {}", join_err)),
    }
}
