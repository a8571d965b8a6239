//! Command dispatch logic for nuggit

use super::{
    AddVersionArgs, CommentArgs, CompareArgs, FetchArgs, InitArgs, ListArgs, NoteArgs, RepoArgs, TagArgs, add_version,
    comment_repository, compare_versions, delete_repository, fetch_repositories, init_config, list_repositories, note_repository,
    show_comments, show_history, show_repository, show_versions, tag_repository,
};
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "nuggit", author, version, long_about = None)]
#[command(about = "Track GitHub repositories and record how their metadata changes over time")]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: NuggitSubcommand,
}

#[derive(Subcommand, Debug)]
enum NuggitSubcommand {
    /// Fetch repositories from GitHub and record them
    Fetch(Box<FetchArgs>),
    /// List tracked repositories
    List(ListArgs),
    /// Show one tracked repository
    Show(RepoArgs),
    /// Show the change history of a repository
    History(RepoArgs),
    /// Show the recorded versions of a repository
    Versions(RepoArgs),
    /// Compare two recorded versions of a repository
    Compare(CompareArgs),
    /// Record a named version of a repository
    AddVersion(AddVersionArgs),
    /// Add a tag to a repository
    Tag(TagArgs),
    /// Add a note to a repository
    Note(NoteArgs),
    /// Leave a comment on a repository
    Comment(CommentArgs),
    /// Show the comments on a repository
    Comments(RepoArgs),
    /// Stop tracking a repository
    Delete(RepoArgs),
    /// Generate a default configuration file
    Init(InitArgs),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// This function parses the command-line arguments and executes the corresponding
/// subcommand. It's designed to be called from main.rs with the program arguments.
///
/// # Errors
///
/// Returns an error if command parsing fails or if the executed command fails
pub async fn run<I, T, H>(host: &mut H, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    match &Cli::parse_from(args).command {
        NuggitSubcommand::Fetch(fetch_args) => fetch_repositories(host, fetch_args).await,
        NuggitSubcommand::List(list_args) => list_repositories(host, list_args),
        NuggitSubcommand::Show(repo_args) => show_repository(host, repo_args),
        NuggitSubcommand::History(repo_args) => show_history(host, repo_args),
        NuggitSubcommand::Versions(repo_args) => show_versions(host, repo_args),
        NuggitSubcommand::Compare(compare_args) => compare_versions(host, compare_args),
        NuggitSubcommand::AddVersion(version_args) => add_version(host, version_args),
        NuggitSubcommand::Tag(tag_args) => tag_repository(host, tag_args),
        NuggitSubcommand::Note(note_args) => note_repository(host, note_args),
        NuggitSubcommand::Comment(comment_args) => comment_repository(host, comment_args),
        NuggitSubcommand::Comments(repo_args) => show_comments(host, repo_args),
        NuggitSubcommand::Delete(repo_args) => delete_repository(host, repo_args),
        NuggitSubcommand::Init(init_args) => init_config(host, init_args),
    }
}
