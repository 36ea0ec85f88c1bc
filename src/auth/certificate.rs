//! Certificate loading for certificate-based client credentials.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Certificate bytes plus the password that opened them.
///
/// Only ever lives inside a per-attempt `CredentialSet`.
#[derive(Clone)]
pub struct CertificateMaterial {
    pub der: Vec<u8>,
    pub password: String,
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("der_len", &self.der.len())
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Opens a certificate file with one password candidate
pub trait CertificateLoader: Send + Sync {
    fn load(&self, path: &Path, password: &str) -> Result<CertificateMaterial>;
}

/// Loads PKCS#12 (`.pfx`/`.p12`) bundles through the platform TLS stack
#[derive(Debug, Default, Clone)]
pub struct Pkcs12FileLoader;

impl CertificateLoader for Pkcs12FileLoader {
    fn load(&self, path: &Path, password: &str) -> Result<CertificateMaterial> {
        let der = fs::read(path).with_context(|| format!("Failed to read certificate file: {:?}", path))?;

        native_tls::Identity::from_pkcs12(&der, password)
            .with_context(|| format!("Failed to parse PKCS#12 bundle: {:?}", path))?;

        Ok(CertificateMaterial {
            der,
            password: password.to_string(),
        })
    }
}
