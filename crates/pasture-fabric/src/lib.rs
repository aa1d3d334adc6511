//! pasture-fabric: FAST Stages and the Pasture Pipeline
//!
//! Builds the ordered stage list (Cloud Foundation Fabric foundation stages
//! plus one seed) and drives it through an [`tf_runner::IacEngine`].
//!
//! ## Key Components
//!
//! - `ProviderFile`: gcs backend descriptor per stage
//! - `Stage`: dependency discovery, init with state migration, plan/apply/destroy
//! - `catalog`: foundation stages read from a Fabric checkout
//! - `seed`: seed templates, jumpstarts and seed variables
//! - `Pipeline`: plant/burn/dry-run orchestration

pub mod catalog;
pub mod pipeline;
pub mod provider;
pub mod seed;
pub mod stage;

pub use catalog::{initialize_stages, FoundationStage, FOUNDATION_STAGES};
pub use pipeline::{Mode, Pipeline, PipelineReport, RunFlags, StageOutcome, StageReport};
pub use provider::ProviderFile;
pub use seed::{hydrate_seed, Jumpstarts, PastureSize, SeedOptions, SeedTemplate};
pub use stage::{Stage, StageKind, BOOTSTRAP_STAGE};
