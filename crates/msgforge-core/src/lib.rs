//! Shared domain types, error handling, configuration, event envelope/catalogue, and
//! metrics registry for the msgforge workspace.
//!
//! Every other crate in the workspace depends on this one and nothing in this crate
//! depends on any other msgforge crate (see the dependency order in spec §2).

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod metrics;

pub use error::{PipelineError, PipelineResult};
