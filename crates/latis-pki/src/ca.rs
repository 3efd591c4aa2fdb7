//! Certificate authority generation, loading, and persistence

use crate::error::PkiError;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tracing::debug;

const CA_CERT_FILE: &str = "ca.crt";
const CA_KEY_FILE: &str = "ca.key";

/// A certificate authority: the trust anchor for one Latis deployment
///
/// The on-disk PEM is kept verbatim so that save and load round-trip
/// byte-identically; the rcgen issuer is only reconstructed for
/// signing new leaves.
pub struct CertificateAuthority {
    cert_pem: String,
    cert_der: Vec<u8>,
    key: KeyPair,
    issuer: rcgen::Certificate,
}

impl CertificateAuthority {
    /// Generate a new self-signed CA
    ///
    /// 10-year validity, path length 1, key usage cert-sign and
    /// CRL-sign.
    pub fn generate() -> Result<Self, PkiError> {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Latis");
        params.distinguished_name.push(DnType::CommonName, "Latis CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(1));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(10 * 365);
        params.serial_number = Some(random_serial());

        let cert = params.self_signed(&key)?;
        debug!("generated new CA");

        Ok(Self {
            cert_pem: cert.pem(),
            cert_der: cert.der().to_vec(),
            key,
            issuer: cert,
        })
    }

    /// Load a CA from certificate and key files
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

        // Rebuild the issuer for signing; the subject and key match the
        // on-disk certificate, so minted leaves chain to it.
        let params = CertificateParams::from_ca_cert_pem(&cert_pem)
            .map_err(|e| PkiError::malformed("CA certificate", e))?;
        let issuer = params.self_signed(&key)?;

        Ok(Self {
            cert_pem,
            cert_der,
            key,
            issuer,
        })
    }

    /// Load a CA from the standard file names in a directory
    pub fn load_from_dir(dir: &Path) -> Result<Self, PkiError> {
        Self::load(&dir.join(CA_CERT_FILE), &dir.join(CA_KEY_FILE))
    }

    /// Check whether CA files exist in a directory
    pub fn exists(dir: &Path) -> bool {
        dir.join(CA_CERT_FILE).exists() && dir.join(CA_KEY_FILE).exists()
    }

    /// Persist the CA into a directory (`ca.crt` 0644, `ca.key` 0600)
    pub fn save(&self, dir: &Path) -> Result<(), PkiError> {
        ensure_private_dir(dir)?;
        write_file_with_mode(&dir.join(CA_CERT_FILE), self.cert_pem.as_bytes(), 0o644)?;
        write_file_with_mode(
            &dir.join(CA_KEY_FILE),
            self.key.serialize_pem().as_bytes(),
            0o600,
        )?;
        debug!(dir = %dir.display(), "saved CA");
        Ok(())
    }

    /// PEM-encoded certificate
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// DER-encoded certificate
    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub(crate) fn issuer(&self) -> (&rcgen::Certificate, &KeyPair) {
        (&self.issuer, &self.key)
    }
}

/// Fresh 128-bit random serial number
pub(crate) fn random_serial() -> SerialNumber {
    let bytes: [u8; 16] = rand::random();
    SerialNumber::from_slice(&bytes)
}

/// Read a file, mapping a missing file to `PkiError::NotFound`
pub(crate) fn read_pem_file(path: &Path) -> Result<Vec<u8>, PkiError> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(PkiError::NotFound(PathBuf::from(path)))
        }
        Err(e) => Err(PkiError::Io(e)),
    }
}

/// Decode one PEM certificate block and check it parses as X.509
pub(crate) fn decode_cert_pem(pem: &str) -> Result<Vec<u8>, PkiError> {
    let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
        .map_err(|e| PkiError::malformed("certificate PEM", format!("{e:?}")))?;
    parsed
        .parse_x509()
        .map_err(|e| PkiError::malformed("certificate", format!("{e:?}")))?;
    Ok(parsed.contents)
}

/// Create `dir` (and parents) owner-only
pub(crate) fn ensure_private_dir(dir: &Path) -> Result<(), PkiError> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write a file and set its mode
pub(crate) fn write_file_with_mode(path: &Path, bytes: &[u8], mode: u32) -> Result<(), PkiError> {
    fs::write(path, bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}
