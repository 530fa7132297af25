//! Extension lifecycle orchestration and the administrative operations
//! built on it.

mod admin;
mod error;
mod manager;

pub use admin::{ConfigEntry, PackageRow};
pub use error::{LifecycleError, LifecycleResult};
pub use manager::{LifecycleManager, PaymentMethodInfo, UploadOutcome};
