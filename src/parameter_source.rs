//! Field-name source for leaf rules.
//!
//! The builder offers a list of selectable field names: whatever an external
//! parameter source returns, followed by a fixed set of defaults. The fetch is
//! fire-and-forget. A failure, timeout, or empty answer leaves only the
//! defaults, and is logged but never surfaced to the caller.

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Field names offered when the parameter source has nothing to add.
pub const DEFAULT_FIELDS: [&str; 3] = ["name", "age", "dateOfBirth"];

// ================================================================================================
// ERRORS
// ================================================================================================

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("Parameter request failed: {0}")]
    Request(String),

    #[error("Parameter source returned status {0}")]
    Status(u16),

    #[error("Failed to decode parameter list: {0}")]
    Decode(String),

    #[error("Parameter fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("No async runtime available to run the parameter fetch")]
    NoRuntime,
}

// ================================================================================================
// SOURCE TRAIT
// ================================================================================================

/// External collaborator supplying selectable field names.
#[async_trait]
pub trait ParameterSource: Send + Sync {
    /// Fetches all parameter names. `Ok(None)` means the source had no value.
    async fn fetch_all(&self) -> Result<Option<Vec<String>>, ParameterError>;
}

/// Source with a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct StaticParameterSource {
    parameters: Option<Vec<String>>,
}

impl StaticParameterSource {
    pub fn new(parameters: Vec<String>) -> Self {
        Self {
            parameters: Some(parameters),
        }
    }

    /// A source that answers with no value.
    pub fn empty() -> Self {
        Self { parameters: None }
    }
}

#[async_trait]
impl ParameterSource for StaticParameterSource {
    async fn fetch_all(&self) -> Result<Option<Vec<String>>, ParameterError> {
        Ok(self.parameters.clone())
    }
}

// ================================================================================================
// HTTP SOURCE
// ================================================================================================

/// Configuration for [`HttpParameterSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Base URL of the service exposing the parameter list
    pub base_url: String,
    /// Path of the "fetch all parameters" endpoint
    pub path: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Honor proxy settings from the environment
    pub use_system_proxy: bool,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            path: "/api/v1/parameters".to_string(),
            request_timeout: Duration::from_secs(10),
            use_system_proxy: true,
        }
    }
}

impl HttpSourceConfig {
    /// Full endpoint URL, joining base and path with exactly one slash.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

/// Fetches the parameter list with a single GET. The body is a JSON array of strings.
#[derive(Debug, Clone)]
pub struct HttpParameterSource {
    client: reqwest::Client,
    url: String,
}

impl HttpParameterSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, ParameterError> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| ParameterError::Request(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.endpoint(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ParameterSource for HttpParameterSource {
    async fn fetch_all(&self) -> Result<Option<Vec<String>>, ParameterError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ParameterError::Request(format!("GET {}: {e}", self.url)))?;

        if !response.status().is_success() {
            return Err(ParameterError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ParameterError::Request(format!("Failed to read body: {e}")))?;

        parse_parameter_list(&body)
    }
}

/// Decodes a parameter list body. Blank bodies and JSON `null` carry no value.
pub fn parse_parameter_list(body: &str) -> Result<Option<Vec<String>>, ParameterError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Option<Vec<String>>>(body)
        .map_err(|e| ParameterError::Decode(e.to_string()))
}

// ================================================================================================
// PARAMETER LIST
// ================================================================================================

/// Shared slot for the fetched field names plus the fixed defaults.
///
/// Writes are last-write-wins. Clones share the fetched names.
#[derive(Debug, Clone)]
pub struct ParameterList {
    fetched: Arc<RwLock<Vec<String>>>,
    defaults: Vec<String>,
}

impl ParameterList {
    pub fn new(defaults: Vec<String>) -> Self {
        Self {
            fetched: Arc::new(RwLock::new(Vec::new())),
            defaults,
        }
    }

    /// Overwrites the fetched names. `None` leaves them untouched.
    /// Returns whether anything was written.
    pub fn store_fetched(&self, parameters: Option<Vec<String>>) -> bool {
        match parameters {
            Some(parameters) => {
                *self.fetched.write() = parameters;
                true
            }
            None => false,
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.read().clone()
    }

    pub fn defaults(&self) -> &[String] {
        &self.defaults
    }

    /// Selectable field names: fetched names first, then the defaults.
    pub fn options(&self) -> Vec<String> {
        let fetched = self.fetched.read();
        fetched.iter().chain(self.defaults.iter()).cloned().collect()
    }
}

impl Default for ParameterList {
    fn default() -> Self {
        Self::new(DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect())
    }
}

// ================================================================================================
// FETCH
// ================================================================================================

/// Fetches from `source` and stores the result in `list`.
///
/// Errors and timeouts are logged and swallowed. Returns whether the list was updated.
pub async fn load_parameters(
    source: &dyn ParameterSource,
    list: &ParameterList,
    timeout: Duration,
) -> bool {
    match tokio::time::timeout(timeout, source.fetch_all()).await {
        Ok(Ok(Some(parameters))) => {
            info!("Loaded {} parameters from source", parameters.len());
            list.store_fetched(Some(parameters))
        }
        Ok(Ok(None)) => {
            debug!("Parameter source returned no value, keeping defaults");
            false
        }
        Ok(Err(e)) => {
            warn!("Parameter fetch failed: {}", e);
            false
        }
        Err(_) => {
            warn!("{}", ParameterError::Timeout(timeout));
            false
        }
    }
}

/// Spawns [`load_parameters`] on the current Tokio runtime.
///
/// Dropping the returned handle does not cancel the fetch.
pub fn spawn_parameter_fetch(
    source: Arc<dyn ParameterSource>,
    list: ParameterList,
    timeout: Duration,
) -> Result<JoinHandle<bool>, ParameterError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| ParameterError::NoRuntime)?;
    Ok(handle.spawn(async move { load_parameters(source.as_ref(), &list, timeout).await }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct FailingSource;

    #[async_trait]
    impl ParameterSource for FailingSource {
        async fn fetch_all(&self) -> Result<Option<Vec<String>>, ParameterError> {
            Err(ParameterError::Status(503))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl ParameterSource for SlowSource {
        async fn fetch_all(&self) -> Result<Option<Vec<String>>, ParameterError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(vec!["late".to_string()]))
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Answers a single request on a loopback port with `status` and `body`.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        format!("http://{}", addr)
    }

    fn http_source(base_url: String) -> HttpParameterSource {
        HttpParameterSource::new(HttpSourceConfig {
            base_url,
            request_timeout: Duration::from_secs(5),
            use_system_proxy: false,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_default_options() {
        let list = ParameterList::default();
        assert_eq!(list.options(), names(&["name", "age", "dateOfBirth"]));
        assert_eq!(list.defaults(), names(&["name", "age", "dateOfBirth"]).as_slice());
        assert!(list.fetched().is_empty());
    }

    #[test]
    fn test_fetched_names_come_first() {
        let list = ParameterList::default();
        assert!(list.store_fetched(Some(names(&["email", "city"]))));
        assert_eq!(
            list.options(),
            names(&["email", "city", "name", "age", "dateOfBirth"])
        );

        assert!(!list.store_fetched(None));
        assert_eq!(list.fetched(), names(&["email", "city"]));

        // last write wins
        list.store_fetched(Some(names(&["zip"])));
        assert_eq!(list.options(), names(&["zip", "name", "age", "dateOfBirth"]));
    }

    #[test]
    fn test_parse_parameter_list() {
        assert_eq!(
            parse_parameter_list(r#"["email", "city"]"#).unwrap(),
            Some(names(&["email", "city"]))
        );
        assert_eq!(parse_parameter_list("null").unwrap(), None);
        assert_eq!(parse_parameter_list("  ").unwrap(), None);
        assert!(matches!(
            parse_parameter_list(r#"{"data": 1}"#),
            Err(ParameterError::Decode(_))
        ));
    }

    #[test]
    fn test_http_endpoint_joining() {
        let config = HttpSourceConfig {
            base_url: "http://params.local/".to_string(),
            path: "/v2/fields".to_string(),
            ..Default::default()
        };
        assert_eq!(config.endpoint(), "http://params.local/v2/fields");
        assert_eq!(
            HttpSourceConfig::default().endpoint(),
            "http://localhost:4000/api/v1/parameters"
        );
    }

    #[tokio::test]
    async fn test_http_source_success() {
        let base = serve_once("200 OK", r#"["email","city"]"#).await;
        let source = http_source(base.clone());
        assert_eq!(source.url(), format!("{}/api/v1/parameters", base));

        let fetched = source.fetch_all().await.unwrap();
        assert_eq!(fetched, Some(names(&["email", "city"])));
    }

    #[tokio::test]
    async fn test_http_source_error_status() {
        let base = serve_once("503 Service Unavailable", "").await;
        let result = http_source(base).fetch_all().await;
        assert!(matches!(result, Err(ParameterError::Status(503))));
    }

    #[tokio::test]
    async fn test_http_source_malformed_body() {
        let base = serve_once("200 OK", r#"{"fields": ["email"]"#).await;
        let result = http_source(base).fetch_all().await;
        assert!(matches!(result, Err(ParameterError::Decode(_))));
    }

    #[tokio::test]
    async fn test_http_source_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = http_source(format!("http://{}", addr)).fetch_all().await;
        assert!(matches!(result, Err(ParameterError::Request(_))));
    }

    #[tokio::test]
    async fn test_http_failure_keeps_defaults() {
        let base = serve_once("500 Internal Server Error", "").await;
        let list = ParameterList::default();
        assert!(!load_parameters(&http_source(base), &list, Duration::from_secs(5)).await);
        assert_eq!(list.options(), names(&["name", "age", "dateOfBirth"]));
    }

    #[test]
    fn test_spawn_outside_runtime_is_an_error() {
        let result = spawn_parameter_fetch(
            Arc::new(StaticParameterSource::empty()),
            ParameterList::default(),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(ParameterError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_load_from_static_source() {
        let list = ParameterList::default();
        let source = StaticParameterSource::new(names(&["email", "city"]));
        assert!(load_parameters(&source, &list, Duration::from_secs(1)).await);
        assert_eq!(list.fetched(), names(&["email", "city"]));
    }

    #[tokio::test]
    async fn test_failures_keep_defaults() {
        let list = ParameterList::default();

        assert!(!load_parameters(&FailingSource, &list, Duration::from_secs(1)).await);
        assert!(!load_parameters(&StaticParameterSource::empty(), &list, Duration::from_secs(1)).await);
        assert!(!load_parameters(&SlowSource, &list, Duration::from_millis(10)).await);

        assert_eq!(list.options(), names(&["name", "age", "dateOfBirth"]));
    }

    #[tokio::test]
    async fn test_spawned_fetch_updates_shared_list() {
        let list = ParameterList::default();
        let handle = spawn_parameter_fetch(
            Arc::new(StaticParameterSource::new(names(&["email"]))),
            list.clone(),
            Duration::from_secs(1),
        )
        .unwrap();

        assert!(handle.await.unwrap());
        assert_eq!(list.options()[0], "email");
    }
}
