//! End-to-end tests of the repository snapshot fetcher against a mock GitHub API.

use async_trait::async_trait;
use chrono::Utc;
use core::time::Duration;
use nuggit_lib::RepoId;
use nuggit_lib::github::{
    ApiClient, ApiContext, BreakerError, CircuitBreakerConfig, CircuitState, FetchConfig, FetchOutcome, GitHubError, QuotaSource,
    RepositorySnapshotFetcher, RetryConfig, Sleeper,
};
use nuggit_lib::record::ContributorCount;
use serde_json::json;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Default)]
struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

struct Harness {
    server: MockServer,
    context: ApiContext,
    sleeper: Arc<RecordingSleeper>,
}

impl Harness {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = Arc::new(ApiClient::new(Some("test-token"), server.uri(), Duration::from_secs(5), Duration::from_secs(5)).unwrap());
        let context = ApiContext::new(client as Arc<dyn QuotaSource>, Duration::from_secs(300))
            .with_sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>);

        Self { server, context, sleeper }
    }

    fn fetcher(&self, config: FetchConfig) -> RepositorySnapshotFetcher {
        let client = Arc::new(ApiClient::new(Some("test-token"), self.server.uri(), Duration::from_secs(5), Duration::from_secs(5)).unwrap());
        self.context.fetcher(client, config)
    }
}

// Sleeps are only recorded, so whole-second delays cost nothing.
fn recorded_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        jitter: false,
        ..RetryConfig::default()
    }
}

fn config(max_retries: u32) -> FetchConfig {
    FetchConfig {
        retry: recorded_retry(max_retries),
        secondary_retry: recorded_retry(0),
        circuit_breaker: CircuitBreakerConfig::default(),
    }
}

fn hello_world(stars: u64) -> serde_json::Value {
    json!({
        "full_name": "octocat/Hello-World",
        "name": "Hello-World",
        "description": "My first repository on GitHub!",
        "html_url": "https://github.com/octocat/Hello-World",
        "topics": ["demo"],
        "license": {"name": "MIT License", "spdx_id": "MIT"},
        "created_at": "2011-01-26T19:01:12Z",
        "updated_at": "2024-03-10T01:30:00Z",
        "pushed_at": "2024-03-09T10:00:00Z",
        "stargazers_count": stars,
        "forks_count": 9,
        "open_issues_count": 2
    })
}

fn id(s: &str) -> RepoId {
    RepoId::parse(s).unwrap()
}

#[tokio::test]
async fn test_rate_limited_fetch_waits_and_succeeds() {
    let h = Harness::new().await;
    let reset = Utc::now().timestamp() + 2;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", reset.to_string().as_str())
                .insert_header("retry-after", "2")
                .set_body_json(json!({"message": "API rate limit exceeded"})),
        )
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&h.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hello_world(50)))
        .with_priority(2)
        .mount(&h.server)
        .await;

    let fetcher = h.fetcher(config(3));
    let record = fetcher.fetch(&id("octocat/Hello-World")).await.into_result().unwrap().unwrap();
    assert_eq!(record.stars, 50);

    let delays = h.sleeper.delays();
    assert_eq!(delays.len(), 2, "unexpected sleeps: {delays:?}");
    assert!(delays.iter().all(|d| *d >= Duration::from_secs(2)), "slept too little: {delays:?}");

    let stats = h.context.stats_snapshot().await.client;
    assert_eq!(stats.rate_limit_hits, 2);
    assert_eq!(stats.retries_performed, 2);
}

#[tokio::test]
async fn test_nonexistent_repository_is_not_found_without_retries() {
    let h = Harness::new().await;

    Mock::given(method("GET"))
        .and(path("/repos/no/such-repo"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
        .expect(1)
        .mount(&h.server)
        .await;

    let outcome = h.fetcher(config(5)).fetch(&id("no/such-repo")).await;
    assert!(matches!(outcome, FetchOutcome::NotFound), "{outcome:?}");

    let stats = h.context.stats_snapshot().await;
    assert_eq!(stats.client.retries_performed, 0);
    assert!(h.sleeper.delays().is_empty());

    // A missing repository is a normal answer, not a breaker failure.
    let breaker = &stats.circuit_breakers["github_get_repo_no/such-repo"];
    assert_eq!(breaker.stats.state, CircuitState::Closed);
    assert_eq!(breaker.stats.failed_requests, 0);
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let h = Harness::new().await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&h.server)
        .await;

    let outcome = h.fetcher(config(2)).fetch(&id("octocat/Hello-World")).await;
    let FetchOutcome::Transient(GitHubError::RetriesExhausted { attempts, source, .. }) = outcome else {
        unreachable!("expected exhausted retries, got {outcome:?}");
    };
    assert_eq!(attempts, 3);
    assert_eq!(source.status(), Some(503));

    assert_eq!(h.sleeper.delays(), [Duration::from_secs(1), Duration::from_secs(2)]);
    assert_eq!(h.context.stats_snapshot().await.client.retries_performed, 2);
}

#[tokio::test]
async fn test_unreachable_api_exhausts_retries() {
    // Bind and release a port so nothing is listening on it.
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let base_url = format!("http://127.0.0.1:{port}");

    let sleeper = Arc::new(RecordingSleeper::default());
    let client = Arc::new(ApiClient::new(None, base_url, Duration::from_secs(2), Duration::from_secs(2)).unwrap());
    let context = ApiContext::new(Arc::clone(&client) as Arc<dyn QuotaSource>, Duration::from_secs(300))
        .with_sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>);

    let outcome = context.fetcher(client, config(2)).fetch(&id("octocat/Hello-World")).await;
    let FetchOutcome::Transient(GitHubError::RetriesExhausted { attempts, source, .. }) = outcome else {
        unreachable!("expected exhausted retries, got {outcome:?}");
    };
    assert_eq!(attempts, 3);
    assert!(matches!(*source, GitHubError::Transport(_)), "{source:?}");

    assert_eq!(sleeper.delays(), [Duration::from_secs(1), Duration::from_secs(2)]);
    assert_eq!(context.stats_snapshot().await.client.retries_performed, 2);
}

#[tokio::test]
async fn test_unexpected_status_is_terminal() {
    let h = Harness::new().await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})))
        .expect(1)
        .mount(&h.server)
        .await;

    let outcome = h.fetcher(config(5)).fetch(&id("octocat/Hello-World")).await;
    let FetchOutcome::Terminal(GitHubError::Status { status, message }) = outcome else {
        unreachable!("expected a terminal status, got {outcome:?}");
    };
    assert_eq!(status, 401);
    assert_eq!(message, "Bad credentials");
}

#[tokio::test]
async fn test_breaker_opens_and_fails_fast() {
    let h = Harness::new().await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&h.server)
        .await;

    let fetch_config = FetchConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(3600),
            ..CircuitBreakerConfig::default()
        },
        ..config(0)
    };
    let fetcher = h.fetcher(fetch_config);
    let repo = id("octocat/Hello-World");

    for _ in 0..2 {
        let outcome = fetcher.fetch(&repo).await;
        assert!(matches!(outcome, FetchOutcome::Transient(GitHubError::RetriesExhausted { .. })), "{outcome:?}");
    }

    let outcome = fetcher.fetch(&repo).await;
    assert!(
        matches!(outcome, FetchOutcome::Transient(GitHubError::Breaker(BreakerError::Open { .. }))),
        "{outcome:?}"
    );

    let stats = h.context.stats_snapshot().await;
    let breaker = &stats.circuit_breakers["github_get_repo_octocat/Hello-World"];
    assert_eq!(breaker.stats.state, CircuitState::Open);
    assert_eq!(breaker.stats.rejected_requests, 1);
    assert_eq!(breaker.stats.circuit_opened_count, 1);
}

#[tokio::test]
async fn test_secondary_attributes_are_assembled() {
    let h = Harness::new().await;
    let base = h.server.uri();

    let mut repo = hello_world(7);
    repo["topics"] = serde_json::Value::Null;
    repo["license"] = serde_json::Value::Null;
    repo["created_at"] = json!("2011-01-26T21:01:12+02:00");

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repo))
        .mount(&h.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/contributors"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "link",
                    format!(
                        r#"<{base}/repos/octocat/Hello-World/contributors?per_page=1&anon=true&page=2>; rel="next", <{base}/repos/octocat/Hello-World/contributors?per_page=1&anon=true&page=42>; rel="last""#
                    )
                    .as_str(),
                )
                .set_body_json(json!([{"login": "octocat"}])),
        )
        .mount(&h.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/commits"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "link",
                    format!(r#"<{base}/repos/octocat/Hello-World/commits?per_page=1&page=1234>; rel="last""#).as_str(),
                )
                .set_body_json(json!([{"sha": "abc"}])),
        )
        .mount(&h.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/releases/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tag_name": "v1.2.0"})))
        .mount(&h.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/topics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"names": ["git", "demo"]})))
        .mount(&h.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/license"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"license": {"name": "Apache License 2.0", "spdx_id": "Apache-2.0"}})))
        .mount(&h.server)
        .await;

    let record = h
        .fetcher(config(0))
        .fetch(&id("octocat/Hello-World"))
        .await
        .into_result()
        .unwrap()
        .unwrap();

    assert_eq!(record.contributors, ContributorCount::Exact(42));
    assert_eq!(record.commits, 1234);
    assert_eq!(record.latest_release.as_deref(), Some("v1.2.0"));
    assert_eq!(record.topics, ["git", "demo"]);
    assert_eq!(record.license.as_deref(), Some("Apache License 2.0"));
    assert_eq!(record.created_at.as_deref(), Some("2011-01-26T19:01:12Z"));
    assert_eq!(record.description, "My first repository on GitHub!");
}

#[tokio::test]
async fn test_secondary_failures_fall_back() {
    let h = Harness::new().await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hello_world(1)))
        .mount(&h.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/contributors"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "too large to list contributors"})))
        .mount(&h.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/commits"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "Git Repository is empty."})))
        .mount(&h.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/releases/latest"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&h.server)
        .await;

    let outcome = h.fetcher(config(0)).fetch(&id("octocat/Hello-World")).await;
    let FetchOutcome::Found(record) = outcome else {
        unreachable!("expected a record, got {outcome:?}");
    };

    assert_eq!(record.contributors, ContributorCount::capped());
    assert_eq!(record.contributors.to_string(), "5000+");
    assert_eq!(record.commits, 0);
    assert!(record.latest_release.is_none());
    assert_eq!(record.topics, ["demo"]);
    assert_eq!(record.license.as_deref(), Some("MIT License"));
}

#[tokio::test]
async fn test_quota_headers_feed_the_tracker() {
    let h = Harness::new().await;
    let reset = Utc::now().timestamp() + 1800;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-limit", "5000")
                .insert_header("x-ratelimit-remaining", "4321")
                .insert_header("x-ratelimit-reset", reset.to_string().as_str())
                .insert_header("x-ratelimit-resource", "core")
                .set_body_json(hello_world(1)),
        )
        .mount(&h.server)
        .await;

    let _ = h.fetcher(config(0)).fetch(&id("octocat/Hello-World")).await.into_result().unwrap();

    let rate_limit = h.context.stats_snapshot().await.rate_limit.unwrap();
    assert_eq!(rate_limit.limit, 5000);
    assert_eq!(rate_limit.remaining, 4321);
    assert!(rate_limit.reset_in_seconds > 0);
}
