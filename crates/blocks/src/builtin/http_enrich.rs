//! Per-item HTTP enrichment.
//!
//! For every item the `url` template is rendered with `{item, vars}`, the
//! URL is fetched (GET, optional bearer token from a named secret) and the
//! JSON response is stored under `target_field` on the item.  Responses go
//! through the shared cache keyed by the request fingerprint, which covers
//! the URL and the credentials it was fetched with.
//!
//! A failing item does not abort the loop: the error is written to the
//! item's `_error` field and counted.  Only when every item fails does the
//! node itself fail.

use std::time::Duration;

use async_trait::async_trait;
use cache::{fingerprint, fingerprint_with};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{default_items_field, take_items};
use crate::resilience::{retry, with_timeout};
use crate::template::render_str;
use crate::{BlockError, BlockLogic, BlockOutput, ExecutionContext};

const CACHE_NAMESPACE: &str = "http_enrich";

#[derive(Debug, Deserialize)]
pub struct HttpEnrichConfig {
    /// URL template, rendered once per item.
    pub url: String,
    #[serde(default = "default_items_field")]
    pub items_field: String,
    #[serde(default = "default_target_field")]
    pub target_field: String,
    /// Name of the secret holding a bearer token.
    #[serde(default)]
    pub auth_secret: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default = "default_mock_latency_ms")]
    pub mock_latency_ms: u64,
}

fn default_target_field() -> String {
    "enrichment".into()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_mock_latency_ms() -> u64 {
    5
}

impl HttpEnrichConfig {
    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    fn render_url(&self, item: &Value, ctx: &ExecutionContext) -> Result<String, BlockError> {
        render_str(&self.url, &json!({ "item": item, "vars": ctx.variables() }))
    }
}

/// Cache key for one request.  The token only enters as its own hash.
fn cache_key(url: &str, secret_name: Option<&str>, token: Option<&str>) -> String {
    let auth = match (secret_name, token) {
        (Some(name), Some(token)) => json!({ "secret": name, "token": fingerprint(&json!(token)) }),
        _ => Value::Null,
    };
    fingerprint_with(CACHE_NAMESPACE, &json!({ "url": url, "auth": auth }))
}

pub struct HttpEnrich;

/// Counts reported in the node metadata.
#[derive(Default)]
struct Tally {
    enriched: usize,
    failed: usize,
    first_error: Option<String>,
}

impl HttpEnrich {
    async fn fetch(
        client: &reqwest::Client,
        url: &str,
        token: Option<&str>,
    ) -> Result<Value, BlockError> {
        let mut request = client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json::<Value>().await?)
    }

    async fn enrich_one(
        client: &reqwest::Client,
        config: &HttpEnrichConfig,
        item: &Value,
        token: Option<&str>,
        ctx: &ExecutionContext,
    ) -> Result<Value, BlockError> {
        let url = config.render_url(item, ctx)?;
        let url = url.as_str();
        let fetch_with_retry = move || async move {
            let (result, _) = retry(ctx.retry_policy(), url, |_| {
                with_timeout(Some(config.request_timeout()), Self::fetch(client, url, token))
            })
            .await;
            result
        };

        match ctx.cache().filter(|_| config.use_cache) {
            Some(cache) => {
                let key = cache_key(url, config.auth_secret.as_deref(), token);
                cache
                    .get_or_try_insert_with(&key, config.cache_ttl(), fetch_with_retry)
                    .await
            }
            None => fetch_with_retry().await,
        }
    }

    /// Shared per-item loop for the live and mock branches.
    async fn for_each_item<'a, F, Fut>(
        config: &'a HttpEnrichConfig,
        input: Value,
        ctx: &'a ExecutionContext,
        mut enrich: F,
    ) -> Result<BlockOutput, BlockError>
    where
        F: FnMut(Value) -> Fut,
        Fut: std::future::Future<Output = Result<Value, BlockError>> + 'a,
    {
        let (items, source) = take_items(input, &config.items_field)?;
        let total = items.len();
        let mut tally = Tally::default();
        let mut out = Vec::with_capacity(total);

        for (index, mut item) in items.into_iter().enumerate() {
            match enrich(item.clone()).await {
                Ok(data) => {
                    if let Some(obj) = item.as_object_mut() {
                        obj.insert(config.target_field.clone(), data);
                    }
                    tally.enriched += 1;
                }
                Err(err) => {
                    ctx.logger().warn(format!("item {index} failed: {err}"));
                    if let Some(obj) = item.as_object_mut() {
                        obj.insert("_error".into(), Value::String(err.to_string()));
                    }
                    tally.failed += 1;
                    tally.first_error.get_or_insert_with(|| err.to_string());
                }
            }
            out.push(item);
            let percent = ((index + 1) * 100 / total.max(1)) as u8;
            ctx.update_progress(percent, format!("enriched {}/{}", index + 1, total));
        }

        if total > 0 && tally.enriched == 0 {
            return Err(BlockError::Fatal(format!(
                "all {total} items failed; first error: {}",
                tally.first_error.unwrap_or_default()
            )));
        }

        ctx.logger().info(format!(
            "enriched {} of {} items ({} failed)",
            tally.enriched, total, tally.failed
        ));

        Ok(BlockOutput::new(source.rebuild(out))
            .with_metadata("total", total)
            .with_metadata("enriched", tally.enriched)
            .with_metadata("failed", tally.failed))
    }
}

#[async_trait]
impl BlockLogic for HttpEnrich {
    type Config = HttpEnrichConfig;

    async fn execute_live(
        &self,
        config: &HttpEnrichConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<BlockOutput, BlockError> {
        let token = match &config.auth_secret {
            Some(name) => Some(ctx.require_secret(name)?.to_owned()),
            None => None,
        };
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BlockError::Fatal(format!("cannot build http client: {e}")))?;

        let client = &client;
        let token = token.as_deref();
        Self::for_each_item(config, input, ctx, move |item| async move {
            Self::enrich_one(client, config, &item, token, ctx).await
        })
        .await
    }

    async fn execute_mock(
        &self,
        config: &HttpEnrichConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<BlockOutput, BlockError> {
        let latency = Duration::from_millis(config.mock_latency_ms);
        Self::for_each_item(config, input, ctx, move |item| async move {
            let url = config.render_url(&item, ctx)?;
            tokio::time::sleep(latency).await;
            Ok::<Value, BlockError>(json!({ "source": "mock", "url": url }))
        })
        .await
    }

    fn supports_mock(&self) -> bool {
        true
    }

    fn raw_config_keys(&self) -> &'static [&'static str] {
        &["url"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, Dispatch, ExecutionMode, NodeStatus};
    use std::sync::Arc;

    fn test_ctx() -> ExecutionContext {
        ExecutionContext::standalone("enrich", ExecutionMode::Test)
    }

    #[tokio::test]
    async fn mock_branch_enriches_every_record_without_network() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = test_ctx().with_progress(Arc::new(tx));
        ctx.set_variable("region", json!("eu"));
        let config = json!({
            "url": "https://api.example.com/{{ vars.region }}/{{ item.domain }}",
            "auth_secret": "NOT_NEEDED_IN_MOCK",
            "mock_latency_ms": 0
        });
        let input = json!({ "records": [
            { "id": 1, "domain": "acme.io" },
            { "id": 2, "domain": "globex.com" }
        ]});

        let result = Dispatch::new(HttpEnrich).execute(&config, input, &ctx).await;

        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.metadata["mock"], true);
        assert_eq!(result.metadata["enriched"], 2);
        assert_eq!(
            result.output["records"][1]["enrichment"]["url"],
            "https://api.example.com/eu/globex.com"
        );

        let mut last = 0;
        while let Ok(event) = rx.try_recv() {
            last = event.percent;
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn bad_item_is_recorded_and_loop_continues() {
        let config = json!({ "url": "https://x/{{ item.domain }}", "mock_latency_ms": 0 });
        let input = json!([{ "domain": "ok.io" }, { "name": "no domain" }]);

        let result = Dispatch::new(HttpEnrich).execute(&config, input, &test_ctx()).await;

        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.metadata["failed"], 1);
        assert!(result.output[0].get("enrichment").is_some());
        assert!(result.output[1]["_error"].is_string());
    }

    #[tokio::test]
    async fn every_item_failing_fails_the_node() {
        let config = json!({ "url": "https://x/{{ item.domain }}", "mock_latency_ms": 0 });
        let input = json!([{ "name": "a" }, { "name": "b" }]);

        let result = Dispatch::new(HttpEnrich).execute(&config, input, &test_ctx()).await;
        assert_eq!(result.status, NodeStatus::Failed);
    }

    #[tokio::test]
    async fn live_branch_requires_the_named_secret() {
        let ctx = ExecutionContext::standalone("enrich", ExecutionMode::Production);
        let config = json!({ "url": "https://x/{{ item.domain }}", "auth_secret": "API_TOKEN" });

        let result = Dispatch::new(HttpEnrich)
            .execute(&config, json!([{ "domain": "a.io" }]), &ctx)
            .await;

        assert_eq!(result.status, NodeStatus::Failed);
        assert!(result.error.as_deref().unwrap_or("").contains("API_TOKEN"));
    }

    #[test]
    fn cache_key_separates_credentials() {
        let url = "https://api.example.com/acme.io";
        let anonymous = cache_key(url, None, None);
        let with_a = cache_key(url, Some("API_TOKEN"), Some("token-a"));
        let with_b = cache_key(url, Some("API_TOKEN"), Some("token-b"));
        let other_secret = cache_key(url, Some("OTHER_TOKEN"), Some("token-a"));

        assert_ne!(anonymous, with_a);
        assert_ne!(with_a, with_b);
        assert_ne!(with_a, other_secret);
        assert_eq!(with_a, cache_key(url, Some("API_TOKEN"), Some("token-a")));
        assert!(!with_a.contains("token-a"));
        assert!(with_a.starts_with("http_enrich:"));
    }

    #[tokio::test]
    async fn missing_url_is_a_config_error() {
        let result = Dispatch::new(HttpEnrich)
            .execute(&json!({}), json!([]), &test_ctx())
            .await;
        assert_eq!(result.metadata["errorKind"], "config");
    }
}
