#![doc(hidden)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core library for nuggit
//!
//! This library consolidates all functionality for the nuggit tool, which tracks GitHub
//! repositories, periodically refreshes their metadata, and records how that metadata
//! changes over time.
//!
//! # Module Organization
//!
//! - [`commands`]: Command-line interface and orchestration
//! - [`github`]: Rate-limit aware, circuit-breaking access to the GitHub REST API
//! - [`record`]: The normalized repository snapshot and its history/version entries
//! - [`store`]: Insert-or-update persistence with field-level change history
//! - [`timestamp`]: UTC ISO-8601 normalization of remote timestamps

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub mod commands;
pub mod github;
pub mod record;
mod repo_id;
pub mod store;
pub mod timestamp;

pub use crate::commands::{Host, run};
pub use crate::repo_id::RepoId;
