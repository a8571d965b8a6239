//! Argument handling and setup shared by the subcommands.

use super::Host;
use super::config::Config;
use crate::Result;
use crate::store::SqliteStore;
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, ValueEnum};
use directories::ProjectDirs;
use ohno::IntoAppError;
use owo_colors::OwoColorize;
use std::io::{IsTerminal, stdout};

const DATABASE_FILE_NAME: &str = "nuggit.db";

/// Color mode configuration for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Always use colors
    Always,

    /// Never use colors
    Never,

    /// Use colors if the output is a terminal, otherwise don't use colors
    Auto,
}

impl ColorMode {
    fn enabled(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => stdout().is_terminal(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,

    /// Only error messages
    Error,

    /// Warning and error messages
    Warn,

    /// Info, warning, and error messages
    Info,

    /// Debug, info, warning, and error messages
    Debug,

    /// Trace, debug, info, warning, and error messages
    Trace,
}

/// Arguments accepted by every subcommand that touches the store
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file (default is `nuggit.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Path to the SQLite database (overrides the configuration file)
    #[arg(long, value_name = "PATH", env = "NUGGIT_DATABASE")]
    pub database: Option<Utf8PathBuf>,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorMode,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none", global = true)]
    pub log_level: LogLevel,
}

/// Everything a store-backed command needs, built once from [`CommonArgs`].
pub struct Session<'a, H: Host> {
    pub config: Config,
    pub store: SqliteStore,
    pub host: &'a mut H,
    use_colors: bool,
}

impl<'a, H: Host> Session<'a, H> {
    pub fn new(host: &'a mut H, args: &CommonArgs) -> Result<Self> {
        init_logging(args.log_level);

        let config = Config::load(args.config.as_deref())?;
        let database = resolve_database_path(args.database.as_deref(), config.store.database.as_deref())?;
        let store = SqliteStore::open(&database)?;

        Ok(Self {
            config,
            store,
            host,
            use_colors: args.color.enabled(),
        })
    }

    /// Styles a status word the way the console shows outcomes.
    pub fn status(&self, word: &str, good: bool) -> String {
        match (self.use_colors, good) {
            (false, _) => word.to_string(),
            (true, true) => word.green().bold().to_string(),
            (true, false) => word.red().bold().to_string(),
        }
    }

    /// Styles a heading.
    pub fn heading(&self, text: &str) -> String {
        if self.use_colors { text.bold().to_string() } else { text.to_string() }
    }
}

/// Initialize logger based on log level
///
/// Safe to call more than once; only the first call installs the logger.
pub fn init_logging(log_level: LogLevel) {
    let level = match log_level {
        LogLevel::None => return,
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(matches!(log_level, LogLevel::Debug | LogLevel::Trace))
        .try_init();
}

/// Picks the database path: command line, then configuration, then the platform data directory.
fn resolve_database_path(from_args: Option<&Utf8Path>, from_config: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
    if let Some(path) = from_args.or(from_config) {
        return Ok(path.to_path_buf());
    }

    let dirs = ProjectDirs::from("", "", "nuggit").into_app_err("could not determine the data directory")?;
    let path = dirs.data_dir().join(DATABASE_FILE_NAME);
    Utf8PathBuf::from_path_buf(path).map_err(|p| ohno::app_err!("data directory '{}' is not valid UTF-8", p.display()))
}
