//! Named hook dispatch: broadcast actions, value-transforming filters and
//! request interception.
//!
//! # Invariants
//! - Listeners run ordered by `(priority, registration sequence)`; lower
//!   priority runs first and equal priorities keep registration order.
//! - Action listener failures are logged and skipped; filter listener
//!   failures propagate.
//! - An [`InterceptSignal`] always aborts the remaining chain and reaches the
//!   caller of `call`/`filter` untouched.

pub mod dispatcher;
pub mod signal;

pub use dispatcher::{HookDispatcher, HookKind, HookRegistrar, DEFAULT_PRIORITY};
pub use signal::{catch_intercept, intercept, BoxError, HookError, InterceptSignal, RequestOutcome};
