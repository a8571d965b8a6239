//! Command-line interface and orchestration for nuggit
//!
//! # Implementation Model
//!
//! ## Commands
//!
//! - **fetch**: Fetch repositories through the GitHub access layer and upsert the
//!   snapshots into the store, optionally printing access-layer statistics
//! - **list**, **show**, **history**, **versions**, **comments**: Read what the store holds
//! - **compare**: Report how two recorded versions of a repository differ
//! - **add-version**, **tag**, **note**, **comment**, **delete**: Edit stored repositories
//! - **init**: Generate a default configuration file
//!
//! ## Execution Flow
//!
//! The `run` function parses command-line arguments using clap and routes to the
//! appropriate handler. Store-backed handlers build a `Session` from the shared
//! arguments: logging is initialized, the TOML configuration is loaded, and the SQLite
//! database is opened. All output goes through [`Host`] so the commands can be driven
//! with in-memory buffers.

mod common;
mod config;
mod fetch;
mod host;
mod init;
mod repos;
mod run;

pub use common::{ColorMode, CommonArgs, LogLevel};
pub use config::{Config, DEFAULT_CONFIG_TOML};
pub use fetch::{FetchArgs, fetch_repositories};
pub use host::Host;
pub use init::{InitArgs, init_config};
pub use repos::{
    AddVersionArgs, CommentArgs, CompareArgs, ListArgs, NoteArgs, RepoArgs, TagArgs, add_version, comment_repository,
    compare_versions, delete_repository, list_repositories, note_repository, show_comments, show_history, show_repository,
    show_versions, tag_repository,
};
pub use run::run;
