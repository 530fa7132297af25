//! Hook failure and interception types.

use serde_json::Value;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Response payload raised by a listener that fully handled the request.
#[derive(Debug, Clone, PartialEq)]
pub struct InterceptSignal {
    response: Value,
}

impl InterceptSignal {
    pub fn new(response: impl Into<Value>) -> Self {
        Self {
            response: response.into(),
        }
    }

    pub fn response(&self) -> &Value {
        &self.response
    }

    pub fn into_response(self) -> Value {
        self.response
    }
}

impl Display for InterceptSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "request intercepted by hook listener")
    }
}

impl std::error::Error for InterceptSignal {}

/// Error type returned by hook listeners and by `filter`.
#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Intercepted(#[from] InterceptSignal),
    #[error("hook listener failed: {0}")]
    Failed(#[source] BoxError),
    #[error("filter `{hook}` listener #{position} failed: {source}")]
    Filter {
        hook: String,
        position: usize,
        #[source]
        source: BoxError,
    },
}

impl HookError {
    /// Wraps an arbitrary listener failure.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        Self::Failed(err.into())
    }

    pub fn is_intercept(&self) -> bool {
        matches!(self, Self::Intercepted(_))
    }
}

/// Aborts the current dispatch chain and hands `response` to the request
/// boundary. Listeners `return intercept(...)` from their callback.
pub fn intercept<T>(response: impl Into<Value>) -> Result<T, HookError> {
    Err(HookError::Intercepted(InterceptSignal::new(response)))
}

/// Result of request handling that may have been short-circuited by a hook.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome<T> {
    Completed(T),
    Intercepted(Value),
}

/// Request-boundary helper: turns an intercept into a regular outcome and
/// lets every other failure through.
pub fn catch_intercept<T>(result: Result<T, HookError>) -> Result<RequestOutcome<T>, HookError> {
    match result {
        Ok(value) => Ok(RequestOutcome::Completed(value)),
        Err(HookError::Intercepted(signal)) => {
            Ok(RequestOutcome::Intercepted(signal.into_response()))
        }
        Err(err) => Err(err),
    }
}
