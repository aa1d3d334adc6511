//! Pastures Core Library
//!
//! Settings, the shared FAST var file, the error taxonomy and the tracing
//! setup used by the orchestrator and the `pasture` binary.

pub mod config;
mod error;
pub mod obs;
pub mod telemetry;
pub mod varfile;

pub use config::{hydrate, Hydrated, Settings, SettingsFile};
pub use error::{PastureError, Result};
pub use telemetry::init_tracing;
pub use varfile::{outputs_bucket, BillingAccount, FastConfig, VarFile, VAR_FILE_NAME, VAR_FILE_OBJECT};
