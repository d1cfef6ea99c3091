use crate::execution::ExecutionId;

pub type TrackingResult<T> = Result<T, TrackingError>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrackingError {
    /// A lifecycle event referenced an execution that was never declared to a
    /// request-scoped tracking approach. The full execution set must be known
    /// before the first event arrives, so this is a programming error on the
    /// caller's side, not something to retry.
    #[error("execution {0} was not declared for request-scoped dispatch tracking")]
    UndeclaredExecution(ExecutionId),
}
