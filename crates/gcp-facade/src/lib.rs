//! gcp-facade: Google Cloud Access for Pastures
//!
//! Thin wrappers over the Google APIs the orchestrator needs. Nothing here
//! knows about stages or pipelines.
//!
//! ## Key Components
//!
//! - `app_default_credentials`: check ambient ADC and hand back a token provider
//! - `ObjectStore` / `GcsObjectStore`: Cloud Storage get/put
//! - `PolicyStore` / `IamClient`: organization IAM policy read-modify-write
//! - `fakes`: in-memory object and policy stores for tests

pub mod auth;
mod error;
pub mod fakes;
pub mod iam;
pub mod storage;

pub use auth::{app_default_credentials, AdcTokenProvider, TokenSource};
pub use error::CloudError;
pub use iam::{
    grant_roles, set_required_org_iam_roles, Binding, IamClient, Organization, Policy,
    PolicyStore, REQUIRED_ORG_ROLES,
};
pub use storage::{GcsObjectStore, ObjectRef, ObjectStore};

/// Result type for gcp-facade operations
pub type Result<T> = std::result::Result<T, CloudError>;
