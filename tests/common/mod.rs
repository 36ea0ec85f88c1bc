//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tenant_auth::api::{ServiceId, ServiceProvider, Session};
use tenant_auth::auth::{CertificateLoader, CertificateMaterial, CredentialSet};
use tenant_auth::config::{AuthConfig, ServiceConfig};

/// Provider that counts calls and fails on demand
#[derive(Default)]
pub struct FakeProvider {
    pub connects: AtomicU32,
    pub verifies: AtomicU32,
    pub disconnects: AtomicU32,
    connect_delay: Duration,
    connect_failures: Mutex<VecDeque<String>>,
    verify_failures: Mutex<VecDeque<String>>,
    fail_disconnect: bool,
    granted: Option<Vec<String>>,
    expires_in: Option<Duration>,
    auth_methods: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Fail the next connects with these messages, in order
    pub fn failing_with(self, messages: &[&str]) -> Self {
        self.connect_failures
            .lock()
            .unwrap()
            .extend(messages.iter().map(|m| m.to_string()));
        self
    }

    /// Fail the next verifications with these messages, in order
    pub fn failing_verify_with(self, messages: &[&str]) -> Self {
        self.verify_failures
            .lock()
            .unwrap()
            .extend(messages.iter().map(|m| m.to_string()));
        self
    }

    pub fn failing_disconnect(mut self) -> Self {
        self.fail_disconnect = true;
        self
    }

    pub fn granting(mut self, scopes: &[&str]) -> Self {
        self.granted = Some(scopes.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn expiring_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn verify_count(&self) -> u32 {
        self.verifies.load(Ordering::SeqCst)
    }

    pub fn auth_methods(&self) -> Vec<String> {
        self.auth_methods.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceProvider for FakeProvider {
    async fn connect(&self, credentials: &CredentialSet, scopes: &[String]) -> anyhow::Result<Session> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.auth_methods
            .lock()
            .unwrap()
            .push(credentials.auth_method().to_string());

        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let failure = self.connect_failures.lock().unwrap().pop_front();
        if let Some(message) = failure {
            anyhow::bail!(message);
        }

        Ok(Session {
            granted_scopes: self
                .granted
                .clone()
                .unwrap_or_else(|| scopes.to_vec())
                .into_iter()
                .collect(),
            expires_in: self.expires_in,
        })
    }

    async fn verify(&self) -> anyhow::Result<()> {
        self.verifies.fetch_add(1, Ordering::SeqCst);

        let failure = self.verify_failures.lock().unwrap().pop_front();
        if let Some(message) = failure {
            anyhow::bail!(message);
        }
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect {
            anyhow::bail!("connection reset by peer");
        }
        Ok(())
    }
}

/// Certificate loader that accepts only the empty password
pub struct EmptyPasswordLoader;

impl CertificateLoader for EmptyPasswordLoader {
    fn load(&self, _path: &Path, password: &str) -> anyhow::Result<CertificateMaterial> {
        if password.is_empty() {
            Ok(CertificateMaterial {
                der: vec![0x30, 0x82],
                password: String::new(),
            })
        } else {
            anyhow::bail!("mac verify failure")
        }
    }
}

pub fn secret_service() -> ServiceConfig {
    ServiceConfig {
        tenant_id: "contoso.onmicrosoft.com".to_string(),
        client_id: "11111111-2222-3333-4444-555555555555".to_string(),
        client_secret: Some("a1B2~c3D4.e5F6".to_string()),
        ..ServiceConfig::default()
    }
}

pub fn config_with(services: &[ServiceId]) -> AuthConfig {
    let mut config = AuthConfig::default();
    for service in services {
        config.services.insert(*service, secret_service());
    }
    config
}
