use serde::Deserialize;

use crate::error::{Error, Result};

/// Standard Cloudflare v4 API response envelope.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct UserResult {
    email: String,
    id: String,
}

/// One deployed worker script, as returned by the scripts list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSummary {
    pub id: String,
    #[serde(default)]
    pub modified_on: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub email: String,
    pub account_id: String,
}

#[derive(Debug, Clone)]
pub struct DeployedWorker {
    pub url: String,
}

/// Thin client for the Cloudflare Workers control plane.
///
/// Every call returns a success value or an [`Error::Remote`] carrying the
/// API's first error message verbatim; nothing is retried.
pub struct CloudflareApi {
    client: reqwest::Client,
    api_base: String,
    workers_subdomain: String,
}

impl CloudflareApi {
    pub fn new(api_base: &str, workers_subdomain: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            workers_subdomain: workers_subdomain.to_string(),
        }
    }

    /// Validates an API token against the /user endpoint. A valid token
    /// yields the account email the token belongs to.
    pub async fn validate_token(&self, api_token: &str) -> Result<TokenInfo> {
        let resp = self
            .client
            .get(format!("{}/user", self.api_base))
            .bearer_auth(api_token)
            .send()
            .await?;

        let envelope: ApiEnvelope<UserResult> = resp.json().await?;
        match envelope.result {
            Some(user) if envelope.success => Ok(TokenInfo {
                email: user.email,
                account_id: user.id,
            }),
            _ => Err(remote_error(envelope.errors, "Invalid token")),
        }
    }

    pub async fn list_workers(&self, api_token: &str, account_id: &str) -> Result<Vec<WorkerSummary>> {
        let resp = self
            .client
            .get(format!(
                "{}/accounts/{}/workers/scripts",
                self.api_base, account_id
            ))
            .bearer_auth(api_token)
            .send()
            .await?;

        let envelope: ApiEnvelope<Vec<WorkerSummary>> = resp.json().await?;
        if envelope.success {
            Ok(envelope.result.unwrap_or_default())
        } else {
            Err(remote_error(envelope.errors, "Failed to list workers"))
        }
    }

    /// Uploads a script body under the given worker name. Returns the
    /// generated workers.dev URL on success.
    pub async fn deploy_worker(
        &self,
        api_token: &str,
        account_id: &str,
        worker_name: &str,
        script: String,
    ) -> Result<DeployedWorker> {
        let resp = self
            .client
            .put(format!(
                "{}/accounts/{}/workers/scripts/{}",
                self.api_base, account_id, worker_name
            ))
            .bearer_auth(api_token)
            .header(reqwest::header::CONTENT_TYPE, "application/javascript")
            .body(script)
            .send()
            .await?;

        let envelope: ApiEnvelope<serde_json::Value> = resp.json().await?;
        if envelope.success {
            Ok(DeployedWorker {
                url: format!(
                    "https://{}.{}.{}",
                    worker_name, account_id, self.workers_subdomain
                ),
            })
        } else {
            Err(remote_error(envelope.errors, "Failed to deploy worker"))
        }
    }

    pub async fn delete_worker(&self, api_token: &str, account_id: &str, worker_name: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!(
                "{}/accounts/{}/workers/scripts/{}",
                self.api_base, account_id, worker_name
            ))
            .bearer_auth(api_token)
            .send()
            .await?;

        let envelope: ApiEnvelope<serde_json::Value> = resp.json().await?;
        if envelope.success {
            Ok(())
        } else {
            Err(remote_error(envelope.errors, "Failed to delete worker"))
        }
    }

    /// The public URL a deployed worker is reachable at.
    pub fn worker_url(&self, worker_name: &str, account_id: &str) -> String {
        format!(
            "https://{}.{}.{}",
            worker_name, account_id, self.workers_subdomain
        )
    }
}

fn remote_error(errors: Vec<ApiError>, fallback: &str) -> Error {
    let reason = errors
        .into_iter()
        .next()
        .map(|e| e.message)
        .unwrap_or_else(|| fallback.to_string());
    Error::Remote(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parses_error_message() {
        let json = r#"{"success":false,"errors":[{"code":10000,"message":"Authentication error"}],"result":null}"#;
        let envelope: ApiEnvelope<UserResult> = serde_json::from_str(json).unwrap();
        assert!(!envelope.success);
        let err = remote_error(envelope.errors, "fallback");
        assert_eq!(err.to_string(), "Authentication error");
    }

    #[test]
    fn test_envelope_parses_worker_list() {
        let json = r#"{"success":true,"errors":[],"result":[{"id":"my-worker","modified_on":"2026-01-02T03:04:05Z"},{"id":"other"}]}"#;
        let envelope: ApiEnvelope<Vec<WorkerSummary>> = serde_json::from_str(json).unwrap();
        let workers = envelope.result.unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].id, "my-worker");
        assert!(workers[1].modified_on.is_none());
    }

    #[test]
    fn test_worker_url_shape() {
        let api = CloudflareApi::new("https://api.cloudflare.com/client/v4/", "workers.dev");
        assert_eq!(
            api.worker_url("demo-1", "abc123"),
            "https://demo-1.abc123.workers.dev"
        );
    }
}
