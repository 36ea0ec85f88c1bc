//! Credential resolution: turns service configuration into one concrete
//! authentication variant per connection attempt.

pub mod certificate;
pub mod credentials;

pub use certificate::{CertificateLoader, CertificateMaterial, Pkcs12FileLoader};
pub use credentials::{is_placeholder, CredentialResolver, CredentialSet};
