//! Connection lifecycle tests against fake providers

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{config_with, EmptyPasswordLoader, FakeProvider};
use tokio_util::sync::CancellationToken;
use tenant_auth::api::{
    ConnectOptions, ConnectionManager, ConnectionState, ResilienceConfig, RetryPolicy, ServiceId,
};
use tenant_auth::config::ServiceConfig;
use tenant_auth::AuthError;

fn fast_resilience() -> ResilienceConfig {
    ResilienceConfig::builder()
        .max_retries(3)
        .base_delay(Duration::from_millis(1))
        .jitter(false)
        .build()
}

fn manager_for(service: ServiceId, provider: Arc<FakeProvider>) -> ConnectionManager {
    ConnectionManager::builder(config_with(&[service]))
        .provider(service, provider)
        .resilience(fast_resilience())
        .build()
}

#[tokio::test]
async fn test_ensure_connected_is_idempotent() {
    let provider = Arc::new(FakeProvider::new());
    let manager = manager_for(ServiceId::Graph, provider.clone());

    let first = manager.ensure_connected(&[ServiceId::Graph], ConnectOptions::default()).await;
    let second = manager.ensure_connected(&[ServiceId::Graph], ConnectOptions::default()).await;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(second.connected_services, vec![ServiceId::Graph]);
    assert_eq!(provider.connect_count(), 1);
    assert!(manager.is_connected(ServiceId::Graph).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connects_are_serialized() {
    let provider = Arc::new(FakeProvider::new().with_delay(Duration::from_millis(100)));
    let manager = Arc::new(manager_for(ServiceId::MailAdmin, provider.clone()));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let result = manager
                    .ensure_connected(&[ServiceId::MailAdmin], ConnectOptions::default())
                    .await;
                // A caller released by the fast path must already see the final status
                let state = manager.status(ServiceId::MailAdmin).await.map(|status| status.state);
                (result, state)
            })
        })
        .collect();

    for handle in handles {
        let (result, state) = handle.await.unwrap();
        assert!(result.success);
        assert_eq!(state, Some(ConnectionState::Connected));
    }

    assert_eq!(provider.connect_count(), 1);
    let status = manager.status(ServiceId::MailAdmin).await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.connect_count, 1);
}

#[tokio::test]
async fn test_token_cache_counts_fast_path_hits() {
    let provider = Arc::new(FakeProvider::new());
    let manager = manager_for(ServiceId::Graph, provider.clone());

    for _ in 0..5 {
        let result = manager.ensure_connected(&[ServiceId::Graph], ConnectOptions::default()).await;
        assert!(result.success);
    }

    assert_eq!(provider.connect_count(), 1);
    let stats = manager.token_cache_stats().await;
    assert_eq!(stats.hits, 4);
    assert_eq!(stats.misses, 1);

    let report = manager.diagnostics().await;
    assert_eq!(report.token_cache.hits, 4);
    assert_eq!(report.token_cache.misses, 1);
}

#[tokio::test]
async fn test_failed_verification_fails_connect() {
    let provider = Arc::new(FakeProvider::new().failing_verify_with(&["403 Forbidden: Authorization_RequestDenied"]));
    let manager = manager_for(ServiceId::Graph, provider.clone());

    let error = manager
        .connect_service(ServiceId::Graph, &ConnectOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(error, AuthError::NonRetryable { .. }));
    assert_eq!(provider.connect_count(), 1);
    assert_eq!(provider.verify_count(), 1);

    let status = manager.status(ServiceId::Graph).await.unwrap();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(!status.connected);
    assert_eq!(status.error_history.len(), 1);
    assert!(status.last_error.as_deref().unwrap_or_default().contains("403"));
    assert!(!manager.is_connected(ServiceId::Graph).await);
}

#[tokio::test]
async fn test_rejected_verification_fetches_a_fresh_token() {
    let provider = Arc::new(FakeProvider::new().failing_verify_with(&["401 Unauthorized: token rejected"]));
    let manager = manager_for(ServiceId::Graph, provider.clone());

    manager
        .connect_service(ServiceId::Graph, &ConnectOptions::default())
        .await
        .unwrap();

    // The rejected verify triggers one reconnect, then verification passes
    assert_eq!(provider.connect_count(), 2);
    assert_eq!(provider.verify_count(), 2);
    let status = manager.status(ServiceId::Graph).await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.connect_count, 1);
}

#[tokio::test]
async fn test_second_rejected_verification_gives_up() {
    let provider = Arc::new(
        FakeProvider::new().failing_verify_with(&["401 Unauthorized: token rejected", "401 Unauthorized: token rejected"]),
    );
    let manager = manager_for(ServiceId::Graph, provider.clone());

    let error = manager
        .connect_service(ServiceId::Graph, &ConnectOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(error, AuthError::NonRetryable { .. }));
    assert_eq!(provider.verify_count(), 2);
    assert_eq!(
        manager.status(ServiceId::Graph).await.unwrap().state,
        ConnectionState::Disconnected
    );
}

fn slow_backoff_manager(provider: Arc<FakeProvider>) -> ConnectionManager {
    ConnectionManager::builder(config_with(&[ServiceId::Graph]))
        .provider(ServiceId::Graph, provider)
        .resilience(
            ResilienceConfig::builder()
                .max_retries(3)
                .base_delay(Duration::from_secs(10))
                .jitter(false)
                .build(),
        )
        .build()
}

#[tokio::test]
async fn test_cancel_connect_while_backing_off() {
    let provider = Arc::new(FakeProvider::new().failing_with(&["503 Service Unavailable"; 3]));
    let manager = slow_backoff_manager(provider.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let error = manager
        .connect_service(ServiceId::Graph, &ConnectOptions::default().cancel_on(cancel))
        .await
        .unwrap_err();

    assert!(matches!(error, AuthError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(provider.connect_count(), 1);

    let status = manager.status(ServiceId::Graph).await.unwrap();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.error_history.len(), 1);
}

#[tokio::test]
async fn test_connect_deadline_stops_backoff() {
    let provider = Arc::new(FakeProvider::new().failing_with(&["429 Too Many Requests"; 3]));
    let manager = slow_backoff_manager(provider.clone());

    let started = std::time::Instant::now();
    let error = manager
        .connect_service(
            ServiceId::Graph,
            &ConnectOptions::default().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, AuthError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(provider.connect_count(), 1);
}

#[tokio::test]
async fn test_execute_for_service_honours_cancellation() {
    let provider = Arc::new(FakeProvider::new());
    let manager = slow_backoff_manager(provider.clone());

    let cancel = CancellationToken::new();
    let options = ConnectOptions::default().cancel_on(cancel.clone());
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let policy = manager.policy("list mailboxes");
    let result: Result<(), AuthError> = manager
        .execute_for_service_with(ServiceId::Graph, &policy, &options, || async {
            anyhow::bail!("503 Service Unavailable")
        })
        .await;

    assert!(matches!(result, Err(AuthError::Cancelled { .. })));
    assert_eq!(provider.connect_count(), 1);
}

#[tokio::test]
async fn test_ensure_connected_with_no_services() {
    let manager = manager_for(ServiceId::Graph, Arc::new(FakeProvider::new()));
    let result = manager.ensure_connected(&[], ConnectOptions::default()).await;

    assert!(result.success);
    assert!(result.connected_services.is_empty());
    assert!(result.failed_services.is_empty());
}

#[tokio::test]
async fn test_placeholder_secret_connects_with_certificate() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("certs")).unwrap();
    fs::write(dir.path().join("certs/automation.pfx"), b"bundle").unwrap();

    let mut config = config_with(&[]);
    config.certificate_root = Some(dir.path().to_path_buf());
    config.services.insert(
        ServiceId::Graph,
        ServiceConfig {
            tenant_id: "contoso.onmicrosoft.com".to_string(),
            client_id: "app".to_string(),
            client_secret: Some("YOUR-CLIENT-SECRET-HERE".to_string()),
            certificate_path: Some(PathBuf::from("certs/automation.pfx")),
            certificate_password: Some(String::new()),
            ..ServiceConfig::default()
        },
    );

    let provider = Arc::new(FakeProvider::new());
    let manager = ConnectionManager::builder(config)
        .provider(ServiceId::Graph, provider.clone())
        .certificate_loader(Arc::new(EmptyPasswordLoader))
        .resilience(fast_resilience())
        .build();

    let result = manager.ensure_connected(&[ServiceId::Graph], ConnectOptions::default()).await;
    assert!(result.success, "errors: {:?}", result.errors);

    let status = manager.status(ServiceId::Graph).await.unwrap();
    assert_eq!(status.auth_method, "certificate");
    assert_eq!(provider.auth_methods(), vec!["certificate".to_string()]);
}

#[tokio::test]
async fn test_missing_certificate_fails_without_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_with(&[]);
    config.certificate_root = Some(dir.path().to_path_buf());
    config.services.insert(
        ServiceId::Directory,
        ServiceConfig {
            tenant_id: "contoso".to_string(),
            client_id: "app".to_string(),
            certificate_path: Some(PathBuf::from("missing.pfx")),
            ..ServiceConfig::default()
        },
    );

    let provider = Arc::new(FakeProvider::new());
    let manager = ConnectionManager::builder(config)
        .provider(ServiceId::Directory, provider.clone())
        .resilience(fast_resilience())
        .build();

    let result = manager.ensure_connected(&[ServiceId::Directory], ConnectOptions::default()).await;
    assert!(!result.success);
    assert!(matches!(
        result.errors.get(&ServiceId::Directory),
        Some(AuthError::CertificateNotFound { .. })
    ));
    assert_eq!(provider.connect_count(), 0);
}

#[tokio::test]
async fn test_transient_connect_failures_are_retried() {
    let provider = Arc::new(FakeProvider::new().failing_with(&["503 Service Unavailable", "connection reset by peer"]));
    let manager = manager_for(ServiceId::Graph, provider.clone());

    manager
        .connect_service(ServiceId::Graph, &ConnectOptions::default())
        .await
        .unwrap();
    assert_eq!(provider.connect_count(), 3);
}

#[tokio::test]
async fn test_exhausted_connect_is_recorded() {
    let provider = Arc::new(FakeProvider::new().failing_with(&["503 Service Unavailable"; 3]));
    let manager = manager_for(ServiceId::Graph, provider.clone());

    let error = manager
        .connect_service(ServiceId::Graph, &ConnectOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(error, AuthError::RetryExhausted { attempts: 3, .. }));
    assert!(error.is_retryable());

    let status = manager.status(ServiceId::Graph).await.unwrap();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(!status.connected);
    assert!(status.last_error.as_deref().unwrap_or_default().contains("503"));
    assert_eq!(status.error_history.len(), 1);
}

#[tokio::test]
async fn test_denied_connect_is_not_retried() {
    let provider = Arc::new(FakeProvider::new().failing_with(&["403 Forbidden: Authorization_RequestDenied"]));
    let manager = manager_for(ServiceId::Graph, provider.clone());

    let error = manager
        .connect_service(ServiceId::Graph, &ConnectOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(error, AuthError::NonRetryable { .. }));
    assert!(!error.is_retryable());
    assert_eq!(provider.connect_count(), 1);
}

#[tokio::test]
async fn test_token_expiry_is_detected_lazily() {
    let provider = Arc::new(FakeProvider::new().expiring_in(Duration::from_millis(300)));
    let manager = manager_for(ServiceId::Graph, provider.clone());

    manager
        .connect_service(ServiceId::Graph, &ConnectOptions::default())
        .await
        .unwrap();
    assert!(manager.is_connected(ServiceId::Graph).await);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let status = manager.status(ServiceId::Graph).await.unwrap();
    assert_eq!(status.state, ConnectionState::Expired);
    assert!(!manager.is_connected(ServiceId::Graph).await);

    manager
        .connect_service(ServiceId::Graph, &ConnectOptions::default())
        .await
        .unwrap();
    assert_eq!(provider.connect_count(), 2);
}

#[tokio::test]
async fn test_lock_timeout_when_connect_hangs() {
    let provider = Arc::new(FakeProvider::new().with_delay(Duration::from_secs(3)));
    let manager = Arc::new(
        ConnectionManager::builder(config_with(&[ServiceId::Graph]))
            .provider(ServiceId::Graph, provider.clone())
            .resilience(
                ResilienceConfig::builder()
                    .max_retries(1)
                    .lock_waits(Duration::from_millis(50), Duration::from_millis(100))
                    .build(),
            )
            .build(),
    );

    let holder = manager.clone();
    let slow = tokio::spawn(async move {
        holder
            .connect_service(ServiceId::Graph, &ConnectOptions::default())
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let error = manager
        .connect_service(ServiceId::Graph, &ConnectOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        AuthError::LockTimeout { service: ServiceId::Graph, .. }
    ));

    slow.abort();
}

#[tokio::test]
async fn test_execute_for_service_reconnects_on_expired_auth() {
    let provider = Arc::new(FakeProvider::new());
    let manager = manager_for(ServiceId::Graph, provider.clone());
    let calls = std::sync::atomic::AtomicU32::new(0);

    let policy = RetryPolicy::new("list users").with_base_delay(Duration::from_millis(1));
    let users = manager
        .execute_for_service(ServiceId::Graph, &policy, || {
            let call = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if call == 0 {
                    anyhow::bail!("401 Unauthorized: InvalidAuthenticationToken")
                }
                Ok(vec!["adele", "megan"])
            }
        })
        .await
        .unwrap();

    assert_eq!(users.len(), 2);
    // Initial connect plus the forced reconnect
    assert_eq!(provider.connect_count(), 2);
}

#[tokio::test]
async fn test_disconnect_all_is_best_effort() {
    let failing = Arc::new(FakeProvider::new().failing_disconnect());
    let healthy = Arc::new(FakeProvider::new());
    let manager = ConnectionManager::builder(config_with(&[ServiceId::Graph, ServiceId::MailAdmin]))
        .provider(ServiceId::Graph, failing.clone())
        .provider(ServiceId::MailAdmin, healthy.clone())
        .resilience(fast_resilience())
        .build();

    let result = manager
        .ensure_connected(&[ServiceId::Graph, ServiceId::MailAdmin], ConnectOptions::default())
        .await;
    assert!(result.success);

    manager.disconnect_all().await;

    for service in [ServiceId::Graph, ServiceId::MailAdmin] {
        let status = manager.status(service).await.unwrap();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(!manager.is_connected(service).await);
    }
    assert_eq!(failing.disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(healthy.disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_partial_failure_reports_each_service() {
    let manager = ConnectionManager::builder(config_with(&[ServiceId::Graph, ServiceId::MailAdmin]))
        .provider(ServiceId::Graph, Arc::new(FakeProvider::new()))
        .provider(
            ServiceId::MailAdmin,
            Arc::new(FakeProvider::new().failing_with(&["404 Not Found"])),
        )
        .resilience(fast_resilience())
        .build();

    let result = manager
        .ensure_connected(&[ServiceId::Graph, ServiceId::MailAdmin], ConnectOptions::default())
        .await;

    assert!(!result.success);
    assert_eq!(result.connected_services, vec![ServiceId::Graph]);
    assert_eq!(result.failed_services, vec![ServiceId::MailAdmin]);
}
