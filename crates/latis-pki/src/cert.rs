//! Node leaf certificates

use crate::ca::{
    decode_cert_pem, random_serial, read_pem_file, write_file_with_mode, CertificateAuthority,
};
use crate::error::PkiError;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String, KeyPair,
    KeyUsagePurpose, SanType,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

/// A node certificate and its private key
pub struct NodeCert {
    cert_pem: String,
    cert_der: Vec<u8>,
    key: KeyPair,
}

impl NodeCert {
    /// Mint a new leaf signed by the CA
    ///
    /// `identity` becomes a URI SAN; `localhost` and the loopback
    /// addresses are added for development use. At least one of
    /// `is_server` / `is_client` must be set.
    pub fn generate(
        ca: &CertificateAuthority,
        identity: &str,
        is_server: bool,
        is_client: bool,
    ) -> Result<Self, PkiError> {
        if !is_server && !is_client {
            return Err(PkiError::NoRole);
        }

        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;

        let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
        params
            .subject_alt_names
            .push(SanType::URI(Ia5String::try_from(identity)?));
        params
            .subject_alt_names
            .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        params
            .subject_alt_names
            .push(SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)));

        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Latis");
        params.distinguished_name.push(DnType::CommonName, identity);

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        if is_server {
            params
                .extended_key_usages
                .push(ExtendedKeyUsagePurpose::ServerAuth);
        }
        if is_client {
            params
                .extended_key_usages
                .push(ExtendedKeyUsagePurpose::ClientAuth);
        }

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(365);
        params.serial_number = Some(random_serial());

        let (issuer_cert, issuer_key) = ca.issuer();
        let cert = params.signed_by(&key, issuer_cert, issuer_key)?;
        debug!(identity, "generated node certificate");

        Ok(Self {
            cert_pem: cert.pem(),
            cert_der: cert.der().to_vec(),
            key,
        })
    }

    /// Load a certificate and key from files
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, PkiError> {
        let cert_bytes = read_pem_file(cert_path)?;
        let key_bytes = read_pem_file(key_path)?;

        let cert_pem = String::from_utf8(cert_bytes)
            .map_err(|e| PkiError::malformed("certificate PEM", e))?;
        let cert_der = decode_cert_pem(&cert_pem)?;

        let key_pem =
            String::from_utf8(key_bytes).map_err(|e| PkiError::malformed("private key PEM", e))?;
        let key =
            KeyPair::from_pem(&key_pem).map_err(|e| PkiError::malformed("private key", e))?;

        Ok(Self {
            cert_pem,
            cert_der,
            key,
        })
    }

    /// Check whether certificate files exist
    pub fn exists(cert_path: &Path, key_path: &Path) -> bool {
        cert_path.exists() && key_path.exists()
    }

    /// Persist the certificate (0644) and key (0600)
    pub fn save(&self, cert_path: &Path, key_path: &Path) -> Result<(), PkiError> {
        if let Some(parent) = cert_path.parent() {
            crate::ca::ensure_private_dir(parent)?;
        }
        if let Some(parent) = key_path.parent() {
            crate::ca::ensure_private_dir(parent)?;
        }
        write_file_with_mode(cert_path, self.cert_pem.as_bytes(), 0o644)?;
        write_file_with_mode(key_path, self.key.serialize_pem().as_bytes(), 0o600)?;
        Ok(())
    }

    /// Identity URI embedded in the certificate's SANs, if present
    pub fn identity(&self) -> Result<Option<String>, PkiError> {
        let (_, cert) = X509Certificate::from_der(&self.cert_der)
            .map_err(|e| PkiError::malformed("certificate", format!("{e:?}")))?;
        let san = cert
            .subject_alternative_name()
            .map_err(|e| PkiError::malformed("subject alternative name", format!("{e:?}")))?;
        if let Some(san) = san {
            for name in &san.value.general_names {
                if let GeneralName::URI(uri) = name {
                    return Ok(Some((*uri).to_string()));
                }
            }
        }
        Ok(None)
    }

    /// PEM-encoded certificate
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// DER-encoded certificate
    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    /// PKCS#8 DER-encoded private key
    pub fn key_der(&self) -> Vec<u8> {
        self.key.serialize_der()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_identity;
    use std::fs;
    use tempfile::TempDir;
    use x509_parser::prelude::*;

    fn ca() -> CertificateAuthority {
        CertificateAuthority::generate().unwrap()
    }

    #[test]
    fn test_requires_a_role() {
        let result = NodeCert::generate(&ca(), &node_identity("x"), false, false);
        assert!(matches!(result, Err(PkiError::NoRole)));
    }

    #[test]
    fn test_identity_san() {
        let identity = node_identity("node-1");
        let cert = NodeCert::generate(&ca(), &identity, true, true).unwrap();
        assert_eq!(cert.identity().unwrap().as_deref(), Some(identity.as_str()));
    }

    #[test]
    fn test_development_sans() {
        let cert = NodeCert::generate(&ca(), &node_identity("dev"), true, false).unwrap();
        let (_, parsed) = X509Certificate::from_der(cert.cert_der()).unwrap();
        let san = parsed.subject_alternative_name().unwrap().unwrap();

        let mut has_localhost = false;
        let mut ip_count = 0;
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns) => has_localhost |= *dns == "localhost",
                GeneralName::IPAddress(_) => ip_count += 1,
                _ => {}
            }
        }
        assert!(has_localhost);
        assert_eq!(ip_count, 2);
    }

    #[test]
    fn test_extended_key_usage_follows_roles() {
        let server_only = NodeCert::generate(&ca(), &node_identity("s"), true, false).unwrap();
        let (_, parsed) = X509Certificate::from_der(server_only.cert_der()).unwrap();
        let eku = parsed.extended_key_usage().unwrap().unwrap();
        assert!(eku.value.server_auth);
        assert!(!eku.value.client_auth);

        let both = NodeCert::generate(&ca(), &node_identity("b"), true, true).unwrap();
        let (_, parsed) = X509Certificate::from_der(both.cert_der()).unwrap();
        let eku = parsed.extended_key_usage().unwrap().unwrap();
        assert!(eku.value.server_auth);
        assert!(eku.value.client_auth);
    }

    #[test]
    fn test_validity_one_year() {
        let cert = NodeCert::generate(&ca(), &node_identity("v"), true, true).unwrap();
        let (_, parsed) = X509Certificate::from_der(cert.cert_der()).unwrap();
        let span =
            parsed.validity().not_after.timestamp() - parsed.validity().not_before.timestamp();
        let one_year = 365 * 86400;
        assert!((span - one_year).abs() <= 2, "span {span} != {one_year}");
    }

    #[test]
    fn test_leaf_verifies_against_its_ca_only() {
        let ca1 = ca();
        let ca2 = ca();
        let cert = NodeCert::generate(&ca1, &node_identity("n"), true, true).unwrap();

        let (_, leaf) = X509Certificate::from_der(cert.cert_der()).unwrap();
        let (_, root1) = X509Certificate::from_der(ca1.cert_der()).unwrap();
        let (_, root2) = X509Certificate::from_der(ca2.cert_der()).unwrap();

        assert!(leaf.verify_signature(Some(root1.public_key())).is_ok());
        assert!(leaf.verify_signature(Some(root2.public_key())).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cert_path = dir.path().join("node.crt");
        let key_path = dir.path().join("node.key");

        let cert = NodeCert::generate(&ca(), &node_identity("rt"), true, true).unwrap();
        cert.save(&cert_path, &key_path).unwrap();
        assert!(NodeCert::exists(&cert_path, &key_path));

        let loaded = NodeCert::load(&cert_path, &key_path).unwrap();
        assert_eq!(cert.cert_der(), loaded.cert_der());
        assert_eq!(cert.key_der(), loaded.key_der());
    }

    #[test]
    fn test_load_missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let cert_path = dir.path().join("node.crt");
        let key_path = dir.path().join("node.key");

        let cert = NodeCert::generate(&ca(), &node_identity("m"), true, true).unwrap();
        cert.save(&cert_path, &key_path).unwrap();
        fs::remove_file(&key_path).unwrap();

        let result = NodeCert::load(&cert_path, &key_path);
        assert!(matches!(result, Err(PkiError::NotFound(_))));
    }
}
