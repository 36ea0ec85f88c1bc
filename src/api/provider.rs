//! Service providers: the code that actually opens a session with a remote service.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use tokio::sync::RwLock;

use super::models::{ServiceId, Session};
use crate::auth::CredentialSet;
use crate::config::ServiceConfig;

const DEFAULT_TOKEN_URL: &str = "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token";
const GRAPH_VERIFY_URL: &str = "https://graph.microsoft.com/v1.0/organization?$top=1";
const MAIL_ADMIN_VERIFY_URL: &str = "https://outlook.office365.com/adminapi/beta/{tenant}/OrganizationConfig";

/// Opens, checks and closes a session with one service.
///
/// Errors are plain `anyhow` errors; the retry layer classifies them by
/// their text, so implementations should keep HTTP status codes in the message.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Authenticate with the given credentials and report the granted session
    async fn connect(&self, credentials: &CredentialSet, scopes: &[String]) -> Result<Session>;

    /// Lightweight call proving the session works
    async fn verify(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

struct ActiveSession {
    client: Client,
    access_token: String,
}

/// OAuth2 client-credentials provider over HTTP
pub struct HttpServiceProvider {
    service: ServiceId,
    token_url: String,
    scope: String,
    verify_url: String,
    session: RwLock<Option<ActiveSession>>,
}

impl HttpServiceProvider {
    /// Provider verifying against the service's default endpoint; see `with_verify_url`
    pub fn new(service: ServiceId, token_url: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            service,
            token_url: token_url.into(),
            scope: scope.into(),
            verify_url: default_verify_url(service).to_string(),
            session: RwLock::new(None),
        }
    }

    pub fn with_verify_url(mut self, url: impl Into<String>) -> Self {
        self.verify_url = url.into();
        self
    }

    /// Build from a service's configuration, falling back to per-service defaults
    pub fn from_config(service: ServiceId, config: &ServiceConfig) -> Self {
        let token_url = config
            .token_url
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string())
            .replace("{tenant}", &config.tenant_id);
        let scope = config
            .scope
            .clone()
            .unwrap_or_else(|| default_scope(service).to_string());

        let verify_url = config
            .verify_url
            .clone()
            .unwrap_or_else(|| default_verify_url(service).to_string())
            .replace("{tenant}", &config.tenant_id);

        Self::new(service, token_url, scope).with_verify_url(verify_url)
    }

    fn client_for(credentials: &CredentialSet) -> Result<Client> {
        match credentials {
            CredentialSet::Secret { .. } => Ok(Client::new()),
            CredentialSet::FileCertificate { path, certificate, .. } => {
                let identity = reqwest::Identity::from_pkcs12_der(&certificate.der, &certificate.password)
                    .with_context(|| format!("Failed to build TLS identity from {:?}", path))?;
                Client::builder()
                    .identity(identity)
                    .build()
                    .context("Failed to build HTTP client with client certificate")
            }
            CredentialSet::ThumbprintCertificate { .. } => {
                // Phrased so the classifier treats it as a permission failure and does not retry.
                // The thumbprint itself stays out of the text: its digits could match status codes.
                anyhow::bail!(
                    "403 access denied: certificate thumbprint lookup requires a platform certificate store; configure certificate_path instead"
                )
            }
        }
    }
}

fn default_scope(service: ServiceId) -> &'static str {
    match service {
        ServiceId::Graph | ServiceId::Directory => "https://graph.microsoft.com/.default",
        ServiceId::MailAdmin => "https://outlook.office365.com/.default",
    }
}

/// Cheap authenticated read used to prove a fresh token works
fn default_verify_url(service: ServiceId) -> &'static str {
    match service {
        ServiceId::Graph | ServiceId::Directory => GRAPH_VERIFY_URL,
        ServiceId::MailAdmin => MAIL_ADMIN_VERIFY_URL,
    }
}

/// Turn a non-success response into an error that keeps status and Retry-After
async fn status_error(context: &str, response: Response) -> anyhow::Error {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(|v| format!(" (Retry-After: {})", v))
        .unwrap_or_default();
    let body = response.text().await.unwrap_or_default();

    anyhow::anyhow!("{} failed with HTTP {}{}: {}", context, status, retry_after, body)
}

#[async_trait]
impl ServiceProvider for HttpServiceProvider {
    async fn connect(&self, credentials: &CredentialSet, scopes: &[String]) -> Result<Session> {
        log::info!("Requesting {} token from {}", self.service, self.token_url);

        let client = Self::client_for(credentials)?;

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id()),
            ("scope", self.scope.as_str()),
        ];
        if let CredentialSet::Secret { client_secret, .. } = credentials {
            form.push(("client_secret", client_secret.as_str()));
        }

        let response = client.post(&self.token_url).form(&form).send().await?;
        log::debug!("Token request status: {}", response.status());

        if !response.status().is_success() {
            return Err(status_error("Token request", response).await);
        }

        let token_data: serde_json::Value = response.json().await?;
        let access_token = token_data
            .get("access_token")
            .and_then(|t| t.as_str())
            .context("No access token in response")?
            .to_string();

        let expires_in = token_data
            .get("expires_in")
            .and_then(|e| e.as_u64())
            .map(Duration::from_secs);

        // Client-credentials responses rarely list scopes; without a list the
        // requested ones are assumed granted.
        let granted_scopes: BTreeSet<String> = match token_data.get("scope").and_then(|s| s.as_str()) {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => scopes.iter().cloned().collect(),
        };

        *self.session.write().await = Some(ActiveSession { client, access_token });

        Ok(Session {
            granted_scopes,
            expires_in,
        })
    }

    async fn verify(&self) -> Result<()> {
        let guard = self.session.read().await;
        let session = guard
            .as_ref()
            .context("401 Unauthorized: no active session")?;

        log::debug!("Verifying {} session against {}", self.service, self.verify_url);
        let response = session
            .client
            .get(&self.verify_url)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error("Verification request", response).await)
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.session.write().await.take();
        Ok(())
    }
}
