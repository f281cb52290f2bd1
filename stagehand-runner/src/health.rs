//! Health prober
//!
//! Runs a fixed battery of checks against a running application:
//! 1. `reachability` - the root path answers 2xx
//! 2. `api_surface` - every API path answers 2xx
//! 3. `static_assets` - every asset path answers 2xx
//! 4. `data_file` - the data file in the live directory parses as JSON
//!
//! Every check runs even if an earlier one failed. Each check is retried with
//! capped exponential backoff before it is marked unhealthy.

use stagehand_client::AppClient;
use stagehand_core::config::{EnvironmentSettings, HealthSettings};
use stagehand_core::domain::health::{HealthCheckResult, HealthReport};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct HealthProber {
    settings: HealthSettings,
}

impl HealthProber {
    pub fn new(settings: HealthSettings) -> Self {
        Self { settings }
    }

    /// Runs every check against one environment
    pub async fn check(&self, environment: &str, env: &EnvironmentSettings) -> HealthReport {
        info!("Running health checks for {} at {}", environment, env.base_url);

        let mut checks = Vec::with_capacity(4);

        match AppClient::with_timeout(env.base_url.clone(), self.settings.request_timeout()) {
            Ok(client) => {
                let client = &client;
                let root = vec![self.settings.root_path.clone()];

                checks.push(self.with_retries("reachability", || probe_all(client, &root)).await);
                checks.push(
                    self.with_retries("api_surface", || {
                        probe_all(client, &self.settings.api_paths)
                    })
                    .await,
                );
                checks.push(
                    self.with_retries("static_assets", || {
                        probe_all(client, &self.settings.asset_paths)
                    })
                    .await,
                );
            }
            Err(e) => {
                let detail = format!("cannot build HTTP client: {}", e);
                for name in ["reachability", "api_surface", "static_assets"] {
                    checks.push(HealthCheckResult {
                        check_name: name.to_string(),
                        healthy: false,
                        detail: Some(detail.clone()),
                        attempts: 0,
                    });
                }
            }
        }

        let data_file = env.live_dir.join(&self.settings.data_file);
        checks.push(self.with_retries("data_file", || read_json(&data_file)).await);

        let report = HealthReport { checks };
        if report.is_healthy() {
            info!("All health checks passed for {}", environment);
        } else {
            for failure in report.failures() {
                warn!(
                    "Health check {} failed for {}: {}",
                    failure.check_name,
                    environment,
                    failure.detail.as_deref().unwrap_or("unknown")
                );
            }
        }
        report
    }

    /// Runs one check until it passes or the retries are used up
    async fn with_retries<F, Fut>(&self, name: &str, mut check: F) -> HealthCheckResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        let max_attempts = self.settings.retries + 1;
        let mut delay = self.settings.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match check().await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!("{} passed after {} attempt(s)", name, attempt);
                    }
                    return HealthCheckResult {
                        check_name: name.to_string(),
                        healthy: true,
                        detail: None,
                        attempts: attempt,
                    };
                }
                Err(detail) => {
                    if attempt >= max_attempts {
                        return HealthCheckResult {
                            check_name: name.to_string(),
                            healthy: false,
                            detail: Some(detail),
                            attempts: attempt,
                        };
                    }

                    debug!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        name, attempt, max_attempts, detail, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, self.settings.max_backoff());
                }
            }
        }
    }
}

fn next_delay(delay: Duration, max: Duration) -> Duration {
    std::cmp::min(delay.saturating_mul(2), max)
}

/// Every path must answer 2xx; reports all failing paths
async fn probe_all(client: &AppClient, paths: &[String]) -> Result<(), String> {
    let mut failures = Vec::new();

    for path in paths {
        match client.probe(path).await {
            Ok(probe) if probe.is_success() => {}
            Ok(probe) => failures.push(format!("{} returned {}", path, probe.status)),
            Err(e) => failures.push(format!("{}: {}", path, e)),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; "))
    }
}

async fn read_json(path: &Path) -> Result<(), String> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;

    serde_json::from_slice::<serde_json::Value>(&raw)
        .map(|_| ())
        .map_err(|e| format!("{} is not valid JSON: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{MethodRouter, get};
    use axum::{Json, Router, http::StatusCode};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Fake application with replaceable root and random-poem handlers
    fn app(root: MethodRouter, random: MethodRouter) -> Router {
        Router::new()
            .route("/", root)
            .route("/api/poems", get(|| async { Json(vec!["a", "b"]) }))
            .route("/api/poems/random", random)
            .route("/api/poems/templates", get(|| async { Json(Vec::<String>::new()) }))
            .route("/index.html", get(|| async { "<html></html>" }))
            .route("/styles.css", get(|| async { "body {}" }))
            .route("/app.js", get(|| async { "void 0" }))
    }

    fn healthy_app() -> Router {
        app(get(|| async { "ok" }), get(|| async { Json("a") }))
    }

    fn fast_settings() -> HealthSettings {
        HealthSettings {
            retries: 2,
            backoff_ms: 10,
            max_backoff_ms: 20,
            request_timeout_secs: 2,
            ..HealthSettings::default()
        }
    }

    fn environment(base_url: String, live_dir: PathBuf) -> EnvironmentSettings {
        EnvironmentSettings {
            live_dir,
            base_url,
            env_vars: BTreeMap::new(),
        }
    }

    fn write_data(dir: &Path, content: &str) {
        std::fs::create_dir_all(dir.join("data")).unwrap();
        std::fs::write(dir.join("data/poems.json"), content).unwrap();
    }

    #[tokio::test]
    async fn test_healthy_application() {
        let dir = tempdir().unwrap();
        write_data(dir.path(), r#"[{"title":"x"}]"#);
        let base_url = serve(healthy_app()).await;

        let prober = HealthProber::new(fast_settings());
        let report = prober
            .check("staging", &environment(base_url, dir.path().to_path_buf()))
            .await;

        assert!(report.is_healthy(), "{:?}", report.summary_lines());
        let names: Vec<&str> = report.checks.iter().map(|c| c.check_name.as_str()).collect();
        assert_eq!(names, ["reachability", "api_surface", "static_assets", "data_file"]);
        assert!(report.checks.iter().all(|c| c.attempts == 1));
    }

    #[tokio::test]
    async fn test_all_checks_run_after_a_failure() {
        let dir = tempdir().unwrap();
        write_data(dir.path(), "not json");
        let base_url = serve(app(
            get(|| async { "ok" }),
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;

        let report = HealthProber::new(fast_settings())
            .check("staging", &environment(base_url, dir.path().to_path_buf()))
            .await;

        assert!(!report.is_healthy());
        assert_eq!(report.checks.len(), 4);
        let failed: Vec<&str> = report.failures().map(|c| c.check_name.as_str()).collect();
        assert_eq!(failed, ["api_surface", "data_file"]);

        let api = &report.checks[1];
        assert_eq!(api.attempts, 3);
        assert!(api.detail.as_deref().unwrap().contains("/api/poems/random returned 500"));
    }

    #[tokio::test]
    async fn test_unreachable_application() {
        let dir = tempdir().unwrap();
        write_data(dir.path(), "[]");
        // Bind and drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let report = HealthProber::new(fast_settings())
            .check(
                "staging",
                &environment(format!("http://{}", addr), dir.path().to_path_buf()),
            )
            .await;

        let failed: Vec<&str> = report.failures().map(|c| c.check_name.as_str()).collect();
        assert_eq!(failed, ["reachability", "api_surface", "static_assets"]);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_slow_start() {
        let dir = tempdir().unwrap();
        write_data(dir.path(), "[]");
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let root = get(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                }
            }
        });
        let base_url = serve(app(root, get(|| async { Json("a") }))).await;

        let report = HealthProber::new(fast_settings())
            .check("staging", &environment(base_url, dir.path().to_path_buf()))
            .await;

        assert!(report.is_healthy());
        assert_eq!(report.checks[0].attempts, 3);
    }

    #[test]
    fn test_backoff_is_capped() {
        let max = Duration::from_millis(300);
        let mut delay = Duration::from_millis(100);
        delay = next_delay(delay, max);
        assert_eq!(delay, Duration::from_millis(200));
        delay = next_delay(delay, max);
        assert_eq!(delay, Duration::from_millis(300));
        delay = next_delay(delay, max);
        assert_eq!(delay, Duration::from_millis(300));
    }
}
