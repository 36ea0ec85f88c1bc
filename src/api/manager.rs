use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::diagnostics::{DiagnosticsReporter, HealthReport};
use super::models::{
    ConnectOptions, ConnectionResult, ConnectionState, ConnectionStatus, ServiceId, TokenMarker,
};
use super::provider::{HttpServiceProvider, ServiceProvider};
use super::resilience::{
    CacheStats, ErrorClassifier, InvocationLogger, ResilienceConfig, RetryControls, RetryInvoker,
    RetryPolicy, TtlCache,
};
use crate::auth::{CertificateLoader, CredentialResolver, Pkcs12FileLoader};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};

/// Owns per-service connection state for every registered provider.
///
/// Share it as `Arc<ConnectionManager>`; all methods take `&self`.
pub struct ConnectionManager {
    config: AuthConfig,
    resilience: ResilienceConfig,
    resolver: CredentialResolver,
    invoker: RetryInvoker,
    providers: BTreeMap<ServiceId, Arc<dyn ServiceProvider>>,
    locks: HashMap<ServiceId, Arc<Mutex<()>>>,
    statuses: Arc<RwLock<BTreeMap<ServiceId, ConnectionStatus>>>,
    tokens: TtlCache<ServiceId, TokenMarker>,
    results: TtlCache<String, serde_json::Value>,
}

pub struct ConnectionManagerBuilder {
    config: AuthConfig,
    providers: BTreeMap<ServiceId, Arc<dyn ServiceProvider>>,
    resilience: Option<ResilienceConfig>,
    loader: Option<Arc<dyn CertificateLoader>>,
    http_defaults: bool,
}

impl ConnectionManagerBuilder {
    /// Register the provider used for `service`
    pub fn provider(mut self, service: ServiceId, provider: Arc<dyn ServiceProvider>) -> Self {
        self.providers.insert(service, provider);
        self
    }

    /// Override the resilience settings taken from the config file
    pub fn resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = Some(resilience);
        self
    }

    pub fn certificate_loader(mut self, loader: Arc<dyn CertificateLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Do not fill in `HttpServiceProvider`s for configured services lacking a provider
    pub fn without_http_defaults(mut self) -> Self {
        self.http_defaults = false;
        self
    }

    pub fn build(self) -> ConnectionManager {
        let Self {
            config,
            mut providers,
            resilience,
            loader,
            http_defaults,
        } = self;

        if http_defaults {
            for (service, service_config) in &config.services {
                providers.entry(*service).or_insert_with(|| {
                    debug!("Using HTTP provider for {}", service);
                    Arc::new(HttpServiceProvider::from_config(*service, service_config))
                });
            }
        }

        let resilience = resilience.unwrap_or_else(|| ResilienceConfig::from_settings(&config.resilience));
        let loader = loader.unwrap_or_else(|| Arc::new(Pkcs12FileLoader));
        let resolver = CredentialResolver::new(config.certificate_root(), loader);
        let invoker = RetryInvoker::new(InvocationLogger::new(resilience.monitoring.clone()));

        let locks = providers
            .keys()
            .map(|service| (*service, Arc::new(Mutex::new(()))))
            .collect();
        let statuses = providers
            .keys()
            .map(|service| (*service, ConnectionStatus::new(*service)))
            .collect();

        info!("Connection manager ready for {} services", providers.len());

        ConnectionManager {
            config,
            resilience,
            resolver,
            invoker,
            providers,
            locks,
            statuses: Arc::new(RwLock::new(statuses)),
            tokens: TtlCache::new(),
            results: TtlCache::new(),
        }
    }
}

impl ConnectionManager {
    pub fn builder(config: AuthConfig) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            config,
            providers: BTreeMap::new(),
            resilience: None,
            loader: None,
            http_defaults: true,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn resilience(&self) -> &ResilienceConfig {
        &self.resilience
    }

    /// Services with a registered provider, in stable order
    pub fn services(&self) -> Vec<ServiceId> {
        self.providers.keys().copied().collect()
    }

    /// Services that count towards overall health
    pub fn required_services(&self) -> Vec<ServiceId> {
        let required: Vec<ServiceId> = self
            .config
            .required_services()
            .into_iter()
            .filter(|service| self.providers.contains_key(service))
            .collect();

        if required.is_empty() {
            self.services()
        } else {
            required
        }
    }

    /// Policy built from the configured retry settings
    pub fn policy(&self, operation_name: impl Into<String>) -> RetryPolicy {
        self.resilience.retry.policy(operation_name)
    }

    /// Connect every listed service; one failure does not stop the others
    pub async fn ensure_connected(&self, services: &[ServiceId], options: ConnectOptions) -> ConnectionResult {
        let outcomes = join_all(services.iter().map(|service| self.connect_service(*service, &options))).await;

        // An empty request has nothing to fail
        let mut result = ConnectionResult {
            success: true,
            ..ConnectionResult::default()
        };
        for (service, outcome) in services.iter().zip(outcomes) {
            result.record(*service, outcome);
        }

        if !result.success {
            warn!(
                "Failed to connect {} of {} services",
                result.failed_services.len(),
                services.len()
            );
        }
        result
    }

    /// Make sure `service` has a live session.
    ///
    /// Returns straight away, without locking, while the token marker is valid.
    pub async fn connect_service(&self, service: ServiceId, options: &ConnectOptions) -> AuthResult<()> {
        let provider = self.provider(service)?;

        if !options.force_reconnect && self.tokens.lookup(&service).await {
            return Ok(());
        }

        let _guard = self.acquire_lock(service).await?;

        // Another caller may have connected while we waited
        if !options.force_reconnect && self.tokens.is_valid(&service).await {
            debug!("{} was connected while waiting for the lock", service);
            return Ok(());
        }

        self.tokens.invalidate(&service).await;
        self.update_status(service, |status| status.state = ConnectionState::Connecting)
            .await;
        self.invoker.logger().connection_event(
            service.as_str(),
            "connect_started",
            json!({ "force_reconnect": options.force_reconnect }),
        );

        match self.connect_locked(service, provider.as_ref(), options).await {
            Ok(()) => Ok(()),
            Err(error) => {
                let limit = self.resilience.error_history_limit;
                self.update_status(service, |status| {
                    status.state = ConnectionState::Disconnected;
                    status.connected = false;
                    status.push_error(&error, limit);
                })
                .await;
                self.invoker.logger().connection_event(
                    service.as_str(),
                    "connect_failed",
                    json!({
                        "error": error.to_string(),
                        "category": error.category(),
                        "retryable": error.is_retryable(),
                    }),
                );
                Err(error)
            }
        }
    }

    /// Resolve, connect, verify, record. Caller holds the service lock.
    async fn connect_locked(
        &self,
        service: ServiceId,
        provider: &dyn ServiceProvider,
        options: &ConnectOptions,
    ) -> AuthResult<()> {
        let service_config = self.config.service(service).ok_or_else(|| AuthError::MissingCredential {
            service,
            reason: "service is not configured".to_string(),
        })?;

        let credentials = self.resolver.resolve(service_config, service)?;
        let auth_method = credentials.auth_method();

        let required: BTreeSet<String> = service_config
            .required_scopes
            .iter()
            .chain(options.required_scopes.iter())
            .cloned()
            .collect();
        let scopes: Vec<String> = required.iter().cloned().collect();

        let credentials = &credentials;
        let scopes = scopes.as_slice();

        let session = self
            .invoker
            .execute_with(
                &self.policy(format!("connect {}", service)),
                Self::retry_controls(service, options),
                move || provider.connect(credentials, scopes),
            )
            .await?;

        // A rejected verification gets one fresh token before giving up
        let refresh = Self::retry_controls(service, options).on_auth_expired(move || {
            async move { provider.connect(credentials, scopes).await.map(|_| ()) }.boxed()
        });
        self.invoker
            .execute_with(&self.policy(format!("verify {}", service)), refresh, move || provider.verify())
            .await?;

        let missing: BTreeSet<String> = required.difference(&session.granted_scopes).cloned().collect();
        if !missing.is_empty() {
            warn!(
                "{} connected without required scopes: {}",
                service,
                missing.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        let configured_ttl = self.config.token_ttl();
        let ttl = session
            .expires_in
            .map(|expires_in| expires_in.min(configured_ttl))
            .unwrap_or(configured_ttl);

        let marker = TokenMarker {
            acquired_at: Utc::now(),
            auth_method: auth_method.to_string(),
        };

        // Status and marker change together under the status lock, so fast-path
        // callers never see a valid marker next to a `Connecting` status
        {
            let mut statuses = self.statuses.write().await;
            let status = statuses
                .entry(service)
                .or_insert_with(|| ConnectionStatus::new(service));
            status.state = ConnectionState::Connected;
            status.connected = true;
            status.last_auth_time = Some(marker.acquired_at);
            status.auth_method = auth_method.to_string();
            status.granted_scopes = session.granted_scopes.clone();
            status.missing_scopes = missing.clone();
            status.last_error = None;
            status.connect_count += 1;

            self.tokens.insert(service, marker, ttl).await;
        }

        self.invoker.logger().connection_event(
            service.as_str(),
            "connect_succeeded",
            json!({
                "auth_method": auth_method,
                "token_ttl_secs": ttl.as_secs(),
                "missing_scopes": missing,
            }),
        );
        Ok(())
    }

    /// Controls for one connect step, carrying the caller's cancellation and deadline
    fn retry_controls<'a>(service: ServiceId, options: &ConnectOptions) -> RetryControls<'a> {
        let mut controls = RetryControls::new().service(service.as_str());
        if let Some(token) = &options.cancel {
            controls = controls.cancel_token(token.clone());
        }
        if let Some(deadline) = options.deadline {
            controls = controls.deadline(deadline);
        }
        controls
    }

    /// Take the per-service lock: a normal wait, then one escalated wait
    async fn acquire_lock(&self, service: ServiceId) -> AuthResult<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .get(&service)
            .cloned()
            .ok_or(AuthError::UnknownService(service))?;
        let initial = self.resilience.lock.initial_wait;
        let escalated = self.resilience.lock.escalated_wait;

        if let Ok(guard) = tokio::time::timeout(initial, lock.clone().lock_owned()).await {
            return Ok(guard);
        }

        warn!(
            "Still waiting for the {} connection lock after {:?}, escalating",
            service, initial
        );

        tokio::time::timeout(escalated, lock.lock_owned())
            .await
            .map_err(|_| AuthError::LockTimeout {
                service,
                waited: initial + escalated,
            })
    }

    /// Run an operation under `policy`; the single retry boundary for API calls
    pub async fn execute_with_retry<F, Fut, T>(&self, policy: &RetryPolicy, operation: F) -> AuthResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.invoker.execute(policy, operation).await
    }

    /// Like `execute_with_retry`, with caller-supplied cancellation, deadline or refresh hooks
    pub async fn execute_with_controls<'a, F, Fut, T>(
        &self,
        policy: &RetryPolicy,
        controls: RetryControls<'a>,
        operation: F,
    ) -> AuthResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.invoker.execute_with(policy, controls, operation).await
    }

    /// Run an operation against `service`, connecting first if needed.
    ///
    /// An expired-authentication failure forces one reconnect before the retry.
    pub async fn execute_for_service<F, Fut, T>(
        &self,
        service: ServiceId,
        policy: &RetryPolicy,
        operation: F,
    ) -> AuthResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute_for_service_with(service, policy, &ConnectOptions::default(), operation)
            .await
    }

    /// `execute_for_service` under the caller's connect options.
    ///
    /// The options' cancellation token and deadline bound the initial connect,
    /// the operation's retries and the reconnect on expiry alike.
    pub async fn execute_for_service_with<F, Fut, T>(
        &self,
        service: ServiceId,
        policy: &RetryPolicy,
        options: &ConnectOptions,
        operation: F,
    ) -> AuthResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.connect_service(service, options).await?;

        let reconnect = ConnectOptions {
            force_reconnect: true,
            ..options.clone()
        };
        let reconnect = &reconnect;
        let controls = Self::retry_controls(service, options).on_auth_expired(move || {
            async move {
                self.connect_service(service, reconnect).await?;
                Ok(())
            }
            .boxed()
        });

        let outcome = self.invoker.execute_with(policy, controls, operation).await;

        if let Err(error) = &outcome {
            let limit = self.resilience.error_history_limit;
            self.update_status(service, |status| status.push_error(error, limit))
                .await;
        }
        outcome
    }

    /// Cached read-only result, fetched through `producer` on a miss
    pub async fn get_or_fetch_cached<F, Fut, E>(
        &self,
        key: impl Into<String>,
        ttl: Duration,
        producer: F,
    ) -> Result<serde_json::Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, E>>,
    {
        self.results.get_or_fetch(key.into(), ttl, producer).await
    }

    /// `get_or_fetch_cached` with the configured `result_ttl_secs`
    pub async fn get_or_fetch_cached_default<F, Fut, E>(
        &self,
        key: impl Into<String>,
        producer: F,
    ) -> Result<serde_json::Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, E>>,
    {
        self.get_or_fetch_cached(key, self.config.result_ttl(), producer).await
    }

    /// Drop one cached result. Returns whether it existed.
    pub async fn invalidate_cached(&self, key: &str) -> bool {
        self.results.invalidate(&key.to_string()).await
    }

    /// Whether `service` holds a valid token marker; counts towards token cache stats
    pub async fn is_connected(&self, service: ServiceId) -> bool {
        self.tokens.lookup(&service).await
    }

    /// Current status, with an elapsed token reported as `Expired`.
    ///
    /// A pure read: the stored status is left alone and the next connect replaces it.
    pub async fn status(&self, service: ServiceId) -> Option<ConnectionStatus> {
        let statuses = self.statuses.read().await;
        let mut status = statuses.get(&service)?.clone();

        if status.state == ConnectionState::Connected && !self.tokens.is_valid(&service).await {
            debug!("{} token marker elapsed", service);
            status.state = ConnectionState::Expired;
            status.connected = false;
        }
        Some(status)
    }

    pub async fn statuses(&self) -> Vec<ConnectionStatus> {
        let mut all = Vec::with_capacity(self.providers.len());
        for service in self.providers.keys() {
            if let Some(status) = self.status(*service).await {
                all.push(status);
            }
        }
        all
    }

    /// Health snapshot of every managed service
    pub async fn diagnostics(&self) -> HealthReport {
        DiagnosticsReporter::new(self).report().await
    }

    /// Time left on the service's token marker
    pub async fn token_remaining(&self, service: ServiceId) -> Option<Duration> {
        self.tokens.remaining_ttl(&service).await
    }

    pub async fn token_cache_stats(&self) -> CacheStats {
        self.tokens.stats().await
    }

    pub async fn result_cache_stats(&self) -> CacheStats {
        self.results.stats().await
    }

    /// Close the session for `service`. Local state is cleared even if the provider fails.
    pub async fn disconnect(&self, service: ServiceId) -> AuthResult<()> {
        let provider = self.provider(service)?;
        let _guard = self.acquire_lock(service).await?;

        self.tokens.invalidate(&service).await;
        let outcome = provider.disconnect().await;

        self.update_status(service, |status| {
            status.state = ConnectionState::Disconnected;
            status.connected = false;
            status.granted_scopes.clear();
            status.missing_scopes.clear();
        })
        .await;

        match outcome {
            Ok(()) => {
                self.invoker
                    .logger()
                    .connection_event(service.as_str(), "disconnected", json!({}));
                Ok(())
            }
            Err(cause) => {
                self.invoker.logger().connection_event(
                    service.as_str(),
                    "disconnect_failed",
                    json!({ "error": format!("{:#}", cause) }),
                );
                Err(AuthError::NonRetryable {
                    operation: format!("disconnect {}", service),
                    category: ErrorClassifier::classify(&cause),
                    cause,
                })
            }
        }
    }

    /// Best-effort teardown of every service; failures are logged and skipped
    pub async fn disconnect_all(&self) {
        for service in self.services() {
            if let Err(error) = self.disconnect(service).await {
                warn!("Failed to disconnect {}: {}", service, error);
            }
        }
        self.results.invalidate_all().await;
        info!("Disconnected all services");
    }

    fn provider(&self, service: ServiceId) -> AuthResult<Arc<dyn ServiceProvider>> {
        self.providers
            .get(&service)
            .cloned()
            .ok_or(AuthError::UnknownService(service))
    }

    async fn update_status<F>(&self, service: ServiceId, update: F)
    where
        F: FnOnce(&mut ConnectionStatus),
    {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(service)
            .or_insert_with(|| ConnectionStatus::new(service));
        update(status);
    }
}
