use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use super::certificate::{CertificateLoader, CertificateMaterial, Pkcs12FileLoader};
use crate::api::models::ServiceId;
use crate::config::ServiceConfig;
use crate::error::{AuthError, AuthResult};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(your[-_ ].*[-_ ]here|<.*>|\{\{.*\}\}|x{3,}|changeme|change[-_ ]me|placeholder|todo|tbd)$")
        .expect("placeholder pattern is valid")
});

/// True for empty values and template sentinels such as `YOUR-CLIENT-SECRET-HERE`
pub fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || PLACEHOLDER.is_match(value)
}

fn usable(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !is_placeholder(v)).map(str::trim)
}

/// One resolved authentication variant, built per connection attempt
#[derive(Clone)]
pub enum CredentialSet {
    Secret {
        client_id: String,
        client_secret: String,
        tenant_id: String,
    },
    FileCertificate {
        path: PathBuf,
        certificate: CertificateMaterial,
        client_id: String,
        tenant_id: String,
    },
    ThumbprintCertificate {
        thumbprint: String,
        client_id: String,
        tenant_id: String,
    },
}

impl CredentialSet {
    /// Value recorded as `ConnectionStatus::auth_method`
    pub fn auth_method(&self) -> &'static str {
        match self {
            CredentialSet::Secret { .. } => "client_secret",
            CredentialSet::FileCertificate { .. } => "certificate",
            CredentialSet::ThumbprintCertificate { .. } => "certificate_thumbprint",
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            CredentialSet::Secret { client_id, .. }
            | CredentialSet::FileCertificate { client_id, .. }
            | CredentialSet::ThumbprintCertificate { client_id, .. } => client_id,
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            CredentialSet::Secret { tenant_id, .. }
            | CredentialSet::FileCertificate { tenant_id, .. }
            | CredentialSet::ThumbprintCertificate { tenant_id, .. } => tenant_id,
        }
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSet::Secret { client_id, tenant_id, .. } => f
                .debug_struct("Secret")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .field("tenant_id", tenant_id)
                .finish(),
            CredentialSet::FileCertificate { path, certificate, client_id, tenant_id } => f
                .debug_struct("FileCertificate")
                .field("path", path)
                .field("certificate", certificate)
                .field("client_id", client_id)
                .field("tenant_id", tenant_id)
                .finish(),
            CredentialSet::ThumbprintCertificate { thumbprint, client_id, tenant_id } => f
                .debug_struct("ThumbprintCertificate")
                .field("thumbprint", thumbprint)
                .field("client_id", client_id)
                .field("tenant_id", tenant_id)
                .finish(),
        }
    }
}

/// Turns service configuration into a `CredentialSet`.
///
/// Resolution order is secret, then certificate file, then certificate
/// thumbprint; the first structurally valid variant wins. No network access.
#[derive(Clone)]
pub struct CredentialResolver {
    root: PathBuf,
    loader: Arc<dyn CertificateLoader>,
}

impl CredentialResolver {
    pub fn new(root: impl Into<PathBuf>, loader: Arc<dyn CertificateLoader>) -> Self {
        Self {
            root: root.into(),
            loader,
        }
    }

    /// Resolver using the PKCS#12 file loader
    pub fn with_default_loader(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(Pkcs12FileLoader))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, config: &ServiceConfig, service: ServiceId) -> AuthResult<CredentialSet> {
        let missing = |reason: &str| AuthError::MissingCredential {
            service,
            reason: reason.to_string(),
        };

        let tenant_id = usable(Some(config.tenant_id.as_str()))
            .ok_or_else(|| missing("tenant_id is empty or a placeholder"))?
            .to_string();
        let client_id = usable(Some(config.client_id.as_str()))
            .ok_or_else(|| missing("client_id is empty or a placeholder"))?
            .to_string();

        if let Some(secret) = usable(config.client_secret.as_deref()) {
            debug!("Resolved client secret credentials for {}", service);
            return Ok(CredentialSet::Secret {
                client_id,
                client_secret: secret.to_string(),
                tenant_id,
            });
        }

        let certificate_path = config
            .certificate_path
            .as_ref()
            .filter(|p| !is_placeholder(&p.to_string_lossy()));

        if let Some(configured) = certificate_path {
            let path = self.resolve_path(configured);
            if !path.exists() {
                return Err(AuthError::CertificateNotFound { path });
            }

            let certificate = self.load_certificate(&path, config.certificate_password.as_deref())?;
            info!("Resolved certificate credentials for {} from {:?}", service, path);
            return Ok(CredentialSet::FileCertificate {
                path,
                certificate,
                client_id,
                tenant_id,
            });
        }

        if let Some(raw) = usable(config.certificate_thumbprint.as_deref()) {
            match normalize_thumbprint(raw) {
                Some(thumbprint) => {
                    debug!("Resolved certificate thumbprint credentials for {}", service);
                    return Ok(CredentialSet::ThumbprintCertificate {
                        thumbprint,
                        client_id,
                        tenant_id,
                    });
                }
                None => warn!("Ignoring malformed certificate thumbprint for {}", service),
            }
        }

        Err(missing(
            "no client secret, certificate path or certificate thumbprint configured",
        ))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Try the configured password first, then no password
    fn load_certificate(&self, path: &Path, password: Option<&str>) -> AuthResult<CertificateMaterial> {
        let mut candidates: Vec<&str> = Vec::with_capacity(2);
        if let Some(password) = password.filter(|p| !p.is_empty() && !is_placeholder(p)) {
            candidates.push(password);
        }
        candidates.push("");

        let mut last_error = None;
        for (index, candidate) in candidates.iter().enumerate() {
            match self.loader.load(path, candidate) {
                Ok(material) => return Ok(material),
                Err(error) => {
                    debug!("Certificate password candidate {} failed for {:?}: {:#}", index + 1, path, error);
                    last_error = Some(error);
                }
            }
        }

        Err(AuthError::CertificateLoadFailed {
            path: path.to_path_buf(),
            cause: last_error.unwrap_or_else(|| anyhow::anyhow!("no password candidates")),
        })
    }
}

/// Uppercase 40-character SHA-1 hex, ignoring spaces and colons
fn normalize_thumbprint(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect::<String>()
        .to_uppercase();

    (cleaned.len() == 40 && cleaned.chars().all(|c| c.is_ascii_hexdigit())).then_some(cleaned)
}
