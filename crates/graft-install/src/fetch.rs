//! Archive download.
//!
//! [`ArchiveFetcher`] builds the zipball URL, lets a [`CredentialProvider`]
//! adjust the request, and hands it to an [`ArchiveTransport`]. The default
//! transport is [`ReqwestTransport`] (feature `http`); tests substitute
//! their own.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use graft_storage::KvStore;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::FetchError;
use crate::source::RepositoryReference;

/// Key-value namespace shared by everything graft persists.
pub const STATE_NAMESPACE: &str = "graft";

/// Key under [`STATE_NAMESPACE`] holding the access token.
pub const TOKEN_KEY: &str = "github_token";

/// Header name credential providers set.
pub const AUTHORIZATION: &str = "Authorization";

/// Options for a single archive request.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Client identifier sent as `User-Agent`.
    pub user_agent: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Extra headers.
    pub headers: BTreeMap<String, String>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Adjusts request options before an archive request is sent.
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    /// Return the options to use for `reference` at `git_ref`.
    fn augment(
        &self,
        options: RequestOptions,
        reference: &RepositoryReference,
        git_ref: &str,
    ) -> RequestOptions;
}

/// Sends requests unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn augment(
        &self,
        options: RequestOptions,
        _reference: &RepositoryReference,
        _git_ref: &str,
    ) -> RequestOptions {
        options
    }
}

/// Adds `Authorization: token {secret}` to every request.
#[derive(Clone)]
pub struct TokenCredentials {
    token: String,
}

impl TokenCredentials {
    /// Create a provider for `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for TokenCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCredentials")
            .field("token", &"***")
            .finish()
    }
}

fn with_token(mut options: RequestOptions, token: &str) -> RequestOptions {
    options
        .headers
        .insert(AUTHORIZATION.to_string(), format!("token {token}"));
    options
}

impl CredentialProvider for TokenCredentials {
    fn augment(
        &self,
        options: RequestOptions,
        _reference: &RepositoryReference,
        _git_ref: &str,
    ) -> RequestOptions {
        with_token(options, &self.token)
    }
}

/// Reads the token from a [`KvStore`] at request time.
///
/// A missing or blank token sends the request unauthenticated.
#[derive(Debug, Clone)]
pub struct StoredTokenCredentials {
    store: Arc<dyn KvStore>,
}

impl StoredTokenCredentials {
    /// Create a provider backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

impl CredentialProvider for StoredTokenCredentials {
    fn augment(
        &self,
        options: RequestOptions,
        reference: &RepositoryReference,
        _git_ref: &str,
    ) -> RequestOptions {
        match self.store.get(STATE_NAMESPACE, TOKEN_KEY) {
            Ok(Some(token)) if !token.trim().is_empty() => with_token(options, token.trim()),
            Ok(_) => options,
            Err(e) => {
                warn!(repository = %reference, error = %e, "could not read stored token, sending unauthenticated");
                options
            },
        }
    }
}

/// Raw response from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body. Transports may leave this empty for non-200 responses.
    pub body: Vec<u8>,
}

/// Performs the HTTP GET for an archive.
#[async_trait]
pub trait ArchiveTransport: Send + Sync + fmt::Debug {
    /// Issue a single GET. No retries.
    ///
    /// # Errors
    ///
    /// [`FetchError::Transport`] on network failure, [`FetchError::TooLarge`]
    /// when the body exceeds `max_bytes`.
    async fn get(
        &self,
        url: &Url,
        options: &RequestOptions,
        max_bytes: u64,
    ) -> Result<TransportResponse, FetchError>;
}

/// Settings for [`ArchiveFetcher`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// API base URL, e.g. `https://api.github.com`.
    pub api_base_url: Url,
    /// Client identifier.
    pub user_agent: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Largest accepted archive, in bytes.
    pub max_download_bytes: u64,
}

impl FetchSettings {
    /// Settings for `api_base_url` with the default client identifier,
    /// a 60 second timeout and a 100 MiB size limit.
    #[must_use]
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            user_agent: "graft-plugin-installer".to_string(),
            timeout: Duration::from_secs(60),
            max_download_bytes: 104_857_600,
        }
    }
}

/// A fetched archive.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Status code of the response (always 200 on success).
    pub status: u16,
    /// Archive bytes.
    pub bytes: Vec<u8>,
}

/// Build `{base}/repos/{owner}/{repo}/zipball/{git_ref}`, encoding each
/// segment on its own.
///
/// # Errors
///
/// [`FetchError::Transport`] if `base` cannot carry a path.
pub fn archive_url(base: &Url, owner: &str, repo: &str, git_ref: &str) -> Result<Url, FetchError> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| {
            FetchError::transport(
                "invalid API base URL",
                format!("'{base}' cannot carry path segments"),
            )
        })?
        .pop_if_empty()
        .extend(["repos", owner, repo, "zipball", git_ref]);
    Ok(url)
}

/// Downloads repository archives.
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    settings: FetchSettings,
    transport: Arc<dyn ArchiveTransport>,
    credentials: Arc<dyn CredentialProvider>,
}

impl ArchiveFetcher {
    /// Create a fetcher that sends requests through `transport` without
    /// credentials.
    #[must_use]
    pub fn new(settings: FetchSettings, transport: Arc<dyn ArchiveTransport>) -> Self {
        Self {
            settings,
            transport,
            credentials: Arc::new(NoCredentials),
        }
    }

    /// Use `credentials` to augment every request.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Settings in use.
    #[must_use]
    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Download the archive for `reference` at `git_ref`.
    ///
    /// `git_ref` must already be normalized (see
    /// [`normalize_ref`](crate::source::normalize_ref)).
    ///
    /// # Errors
    ///
    /// [`FetchError::HttpStatus`] unless the status is exactly 200,
    /// [`FetchError::EmptyBody`] for an empty 200 body,
    /// [`FetchError::TooLarge`] past the size limit, and
    /// [`FetchError::Transport`] for everything the transport reports.
    pub async fn fetch(
        &self,
        reference: &RepositoryReference,
        git_ref: &str,
    ) -> Result<FetchResult, FetchError> {
        let url = archive_url(
            &self.settings.api_base_url,
            reference.owner(),
            reference.repo(),
            git_ref,
        )?;

        let options = RequestOptions {
            user_agent: self.settings.user_agent.clone(),
            timeout: self.settings.timeout,
            headers: BTreeMap::new(),
        };
        let options = self.credentials.augment(options, reference, git_ref);

        debug!(%url, ?options, "fetching archive");

        let limit = self.settings.max_download_bytes;
        let response = self.transport.get(&url, &options, limit).await?;

        if response.status != 200 {
            return Err(FetchError::HttpStatus {
                code: response.status,
            });
        }
        if response.body.is_empty() {
            return Err(FetchError::EmptyBody);
        }
        let size = u64::try_from(response.body.len()).unwrap_or(u64::MAX);
        if size > limit {
            return Err(FetchError::TooLarge { size, limit });
        }

        info!(repository = %reference, git_ref, bytes = size, "archive fetched");
        Ok(FetchResult {
            status: response.status,
            bytes: response.body,
        })
    }
}

/// [`ArchiveTransport`] over `reqwest`.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl ReqwestTransport {
    /// Build a transport following at most 10 redirects (the archive
    /// endpoint answers with a redirect to the storage host).
    ///
    /// # Errors
    ///
    /// [`FetchError::Transport`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::transport("failed to create HTTP client", e))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl ArchiveTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &Url,
        options: &RequestOptions,
        max_bytes: u64,
    ) -> Result<TransportResponse, FetchError> {
        let mut request = self
            .client
            .get(url.clone())
            .timeout(options.timeout)
            .header(reqwest::header::USER_AGENT, &options.user_agent);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::transport(format!("GET {url}"), e))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Ok(TransportResponse {
                status,
                body: Vec::new(),
            });
        }

        if let Some(len) = response.content_length()
            && len > max_bytes
        {
            return Err(FetchError::TooLarge {
                size: len,
                limit: max_bytes,
            });
        }

        let body = download_with_limit(response, max_bytes).await?;
        Ok(TransportResponse { status, body })
    }
}

/// Stream a response body, failing once it grows past `max_size`.
#[cfg(feature = "http")]
async fn download_with_limit(response: reqwest::Response, max_size: u64) -> Result<Vec<u8>, FetchError> {
    use futures::StreamExt;

    let capacity =
        usize::try_from(response.content_length().unwrap_or(0).min(max_size)).unwrap_or(0);
    let mut bytes = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::transport("download interrupted", e))?;
        bytes.extend_from_slice(&chunk);
        let current_size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if current_size > max_size {
            return Err(FetchError::TooLarge {
                size: current_size,
                limit: max_size,
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use graft_storage::MemoryKvStore;

    use super::*;

    #[derive(Debug)]
    struct Recorded {
        response: TransportResponse,
        seen: Mutex<Vec<(Url, RequestOptions)>>,
    }

    impl Recorded {
        fn answering(status: u16, body: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                response: TransportResponse {
                    status,
                    body: body.to_vec(),
                },
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ArchiveTransport for Recorded {
        async fn get(
            &self,
            url: &Url,
            options: &RequestOptions,
            _max_bytes: u64,
        ) -> Result<TransportResponse, FetchError> {
            self.seen
                .lock()
                .unwrap()
                .push((url.clone(), options.clone()));
            Ok(self.response.clone())
        }
    }

    fn octo() -> RepositoryReference {
        RepositoryReference::parse("octo/hello-world").unwrap()
    }

    fn settings() -> FetchSettings {
        FetchSettings::new(Url::parse("https://api.github.com").unwrap())
    }

    #[test]
    fn url_has_canonical_shape() {
        let base = Url::parse("https://api.github.com").unwrap();
        let url = archive_url(&base, "octo", "hello-world", "HEAD").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/octo/hello-world/zipball/HEAD"
        );
    }

    #[test]
    fn url_segments_are_encoded_independently() {
        let base = Url::parse("https://api.github.com/").unwrap();
        let url = archive_url(&base, "a b", "r", "feature/x").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/a%20b/r/zipball/feature%2Fx"
        );
    }

    #[test]
    fn url_keeps_base_path_prefix() {
        let base = Url::parse("http://127.0.0.1:8080/api/v3/").unwrap();
        let url = archive_url(&base, "o", "r", "v1").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/v3/repos/o/r/zipball/v1");
    }

    #[test]
    fn url_rejects_opaque_base() {
        let base = Url::parse("mailto:someone@example.com").unwrap();
        assert!(matches!(
            archive_url(&base, "o", "r", "HEAD"),
            Err(FetchError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn fetch_sends_user_agent_and_timeout() {
        let transport = Recorded::answering(200, b"PK");
        let fetcher = ArchiveFetcher::new(settings(), transport.clone());

        let result = fetcher.fetch(&octo(), "HEAD").await.unwrap();
        assert_eq!(result.bytes, b"PK");

        let seen = transport.seen.lock().unwrap();
        let (url, options) = &seen[0];
        assert!(url.as_str().ends_with("/repos/octo/hello-world/zipball/HEAD"));
        assert_eq!(options.user_agent, "graft-plugin-installer");
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert!(options.headers.is_empty());
    }

    #[tokio::test]
    async fn non_200_is_http_status() {
        for status in [404, 201, 302, 500] {
            let fetcher = ArchiveFetcher::new(
                settings(),
                Recorded::answering(status, b"body"),
            );
            match fetcher.fetch(&octo(), "HEAD").await {
                Err(FetchError::HttpStatus { code }) => assert_eq!(code, status),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn empty_200_is_empty_body() {
        let fetcher = ArchiveFetcher::new(settings(), Recorded::answering(200, b""));
        assert!(matches!(
            fetcher.fetch(&octo(), "HEAD").await,
            Err(FetchError::EmptyBody)
        ));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let settings = FetchSettings {
            max_download_bytes: 4,
            ..settings()
        };
        let fetcher = ArchiveFetcher::new(settings, Recorded::answering(200, b"12345"));
        assert!(matches!(
            fetcher.fetch(&octo(), "HEAD").await,
            Err(FetchError::TooLarge { size: 5, limit: 4 })
        ));
    }

    #[tokio::test]
    async fn token_credentials_add_authorization() {
        let transport = Recorded::answering(200, b"PK");
        let fetcher = ArchiveFetcher::new(settings(), transport.clone())
            .with_credentials(Arc::new(TokenCredentials::new("ghp_abc")));

        fetcher.fetch(&octo(), "main").await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(
            seen[0].1.headers.get(AUTHORIZATION).map(String::as_str),
            Some("token ghp_abc")
        );
    }

    #[test]
    fn token_is_redacted_in_debug() {
        let creds = TokenCredentials::new("ghp_secret");
        assert!(!format!("{creds:?}").contains("ghp_secret"));

        let options = with_token(
            RequestOptions {
                user_agent: "ua".into(),
                timeout: Duration::from_secs(1),
                headers: BTreeMap::new(),
            },
            "ghp_secret",
        );
        let rendered = format!("{options:?}");
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("Authorization"));
    }

    #[test]
    fn stored_token_is_read_at_request_time() {
        let store = Arc::new(MemoryKvStore::new());
        let provider = StoredTokenCredentials::new(store.clone());
        let base = RequestOptions {
            user_agent: "ua".into(),
            timeout: Duration::from_secs(1),
            headers: BTreeMap::new(),
        };

        let unauthenticated = provider.augment(base.clone(), &octo(), "HEAD");
        assert!(unauthenticated.headers.is_empty());

        store
            .set(STATE_NAMESPACE, TOKEN_KEY, "ghp_stored".into())
            .unwrap();
        let authenticated = provider.augment(base, &octo(), "HEAD");
        assert_eq!(
            authenticated.headers.get(AUTHORIZATION).map(String::as_str),
            Some("token ghp_stored")
        );
    }
}
