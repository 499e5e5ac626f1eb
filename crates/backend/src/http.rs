//! Decision backend reached over HTTP.

use std::time::Duration;

use permitter::BackendError;
use permitter::policies::{BackendQuery, BackendVerdict, DecisionBackend};

use crate::error::{Error, Result};
use crate::stdio::DEFAULT_TIMEOUT;

/// Builder for creating an HTTP backend.
#[derive(Debug, Clone)]
pub struct HttpBackendBuilder {
    url: String,
    bearer_token: Option<String>,
    timeout: Duration,
}

impl HttpBackendBuilder {
    /// Create a new builder posting queries to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Authenticate to the backend with a bearer token.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the backend.
    pub fn build(self) -> Result<HttpBackend> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(HttpBackend {
            client,
            url: self.url,
            bearer_token: self.bearer_token,
        })
    }
}

/// Decision backend that POSTs each query as JSON and reads a JSON verdict.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpBackend {
    /// Create a builder for the HTTP backend.
    pub fn builder(url: impl Into<String>) -> HttpBackendBuilder {
        HttpBackendBuilder::new(url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the backend for a verdict.
    pub async fn query(&self, query: &BackendQuery) -> Result<BackendVerdict> {
        let mut req = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("accept", "application/json");
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }

        let response = req.json(query).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Http(format!("request timed out: {e}"))
            } else {
                Error::Http(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("{status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

impl std::fmt::Display for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let auth = if self.bearer_token.is_some() {
            "bearer"
        } else {
            "none"
        };
        write!(f, "http({}, auth={auth})", self.url)
    }
}

impl DecisionBackend for HttpBackend {
    async fn decide(
        &self,
        query: &BackendQuery,
    ) -> std::result::Result<BackendVerdict, BackendError> {
        self.query(query).await.map_err(BackendError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permitter::policies::Operation;
    use permitter::{Account, Authorization, Context, IdentityId};

    #[test]
    fn display_hides_token() {
        let backend = HttpBackend::builder("http://127.0.0.1:9/decide")
            .bearer_token("s3cret")
            .build()
            .unwrap();
        let shown = backend.to_string();
        assert_eq!(shown, "http(http://127.0.0.1:9/decide, auth=bearer)");
        assert!(!shown.contains("s3cret"));
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        let backend = HttpBackend::builder("http://127.0.0.1:9/decide")
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let query = BackendQuery {
            operation: Operation::Release,
            identity: IdentityId([1; 32]),
            account: Account([2; 20]),
            duration_secs: None,
            context: Context::empty(),
            authorization: Authorization::empty(),
        };
        let err = backend.decide(&query).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
