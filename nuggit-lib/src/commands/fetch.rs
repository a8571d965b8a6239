use super::Host;
use super::common::{CommonArgs, Session};
use crate::github::{ApiClient, ApiContext, FetchOutcome, QuotaSource};
use crate::store::{RepositoryStore, UpsertOutcome};
use crate::{RepoId, Result};
use clap::Parser;
use futures_util::StreamExt;
use futures_util::stream;
use ohno::IntoAppError;
use std::io::Write;
use std::sync::Arc;

/// Repositories fetched at the same time.
const MAX_CONCURRENT_FETCHES: usize = 4;

#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Repositories to fetch, as `owner/name` or GitHub URLs
    #[arg(value_name = "REPO", required = true)]
    pub repos: Vec<String>,

    /// GitHub personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Name recorded as the author of any changes
    #[arg(long, value_name = "NAME")]
    pub actor: Option<String>,

    /// Print request, rate-limit, and circuit breaker statistics as JSON when done
    #[arg(long)]
    pub stats: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Fetch repositories from GitHub and record them in the store
///
/// Exits with status 1 when any repository could not be fetched or stored.
pub async fn fetch_repositories<H: Host>(host: &mut H, args: &FetchArgs) -> Result<()> {
    let ids = args.repos.iter().map(|r| RepoId::parse(r)).collect::<Result<Vec<_>>>()?;

    let session = Session::new(host, &args.common)?;
    let settings = &session.config.github;
    let client = Arc::new(ApiClient::new(
        args.github_token.as_deref(),
        settings.api_url.as_str(),
        settings.request_timeout,
        settings.connect_timeout,
    )?);

    let quota_source: Arc<dyn QuotaSource> = Arc::<ApiClient>::clone(&client);
    let context = ApiContext::new(quota_source, session.config.rate_limit.refresh_interval);
    let fetcher = context.fetcher(client, session.config.fetch_config());

    let outcomes: Vec<(RepoId, FetchOutcome)> = stream::iter(ids)
        .map(|id| {
            let fetcher = &fetcher;
            async move {
                let outcome = fetcher.fetch(&id).await;
                (id, outcome)
            }
        })
        .buffered(MAX_CONCURRENT_FETCHES)
        .collect()
        .await;

    let mut failures = 0;
    for (id, outcome) in outcomes {
        let (line, recorded) = describe(&session, &id, outcome, args.actor.as_deref());
        if recorded {
            let _ = writeln!(session.host.output(), "{line}");
        } else {
            failures += 1;
            let _ = writeln!(session.host.error(), "{line}");
        }
    }

    if args.stats {
        let snapshot = context.stats_snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot).into_app_err("serializing statistics")?;
        let _ = writeln!(session.host.output(), "{json}");
    }

    if failures > 0 {
        let _ = writeln!(session.host.error(), "{failures} of {} repositories could not be fetched", args.repos.len());
        session.host.exit(1);
    }

    Ok(())
}

/// Stores one outcome and renders it. The flag is `false` when the repository was not recorded.
fn describe<H: Host>(session: &Session<'_, H>, id: &RepoId, outcome: FetchOutcome, actor: Option<&str>) -> (String, bool) {
    match outcome {
        FetchOutcome::Found(record) => match session.store.upsert(*record, actor) {
            Ok(UpsertOutcome::Inserted) => (format!("{id}: {}", session.status("added", true)), true),
            Ok(UpsertOutcome::Updated { changed }) => (format!("{id}: {} ({})", session.status("updated", true), changed.join(", ")), true),
            Ok(UpsertOutcome::Unchanged) => (format!("{id}: unchanged"), true),
            Err(e) => (format!("{id}: {} {e}", session.status("not stored:", false)), false),
        },
        FetchOutcome::NotFound => (format!("{id}: {}", session.status("not found", false)), false),
        FetchOutcome::Transient(e) => (format!("{id}: {} {e}", session.status("unavailable, try again later:", false)), false),
        FetchOutcome::Terminal(e) => (format!("{id}: {} {e}", session.status("failed:", false)), false),
    }
}
