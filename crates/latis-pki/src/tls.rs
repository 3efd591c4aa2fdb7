//! mTLS configuration builders
//!
//! Both ends present leaves minted by the same CA; the handshake is
//! TLS 1.3 only with a fixed application protocol.

use crate::{CertificateAuthority, NodeCert, PkiError};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::sync::Arc;

/// Application protocol identifier used on every connection
pub const ALPN: &[u8] = b"latis";

fn trust_roots(ca: &CertificateAuthority) -> Result<RootCertStore, PkiError> {
    let mut roots = RootCertStore::empty();
    roots
        .add(CertificateDer::from(ca.cert_der().to_vec()))
        .map_err(|e| PkiError::Tls(e.to_string()))?;
    Ok(roots)
}

fn key_der(cert: &NodeCert) -> PrivateKeyDer<'static> {
    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_der()))
}

/// TLS config for a server that requires and verifies client
/// certificates against the CA
pub fn server_tls_config(
    cert: &NodeCert,
    ca: &CertificateAuthority,
) -> Result<ServerConfig, PkiError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(trust_roots(ca)?), provider.clone())
            .build()
            .map_err(|e| PkiError::Tls(e.to_string()))?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| PkiError::Tls(e.to_string()))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            vec![CertificateDer::from(cert.cert_der().to_vec())],
            key_der(cert),
        )
        .map_err(|e| PkiError::Tls(e.to_string()))?;

    config.alpn_protocols = vec![ALPN.to_vec()];
    Ok(config)
}

/// TLS config for a client that presents its own leaf and verifies
/// the server chain against the CA
///
/// The expected server name is pinned by the dialer when it connects.
pub fn client_tls_config(
    cert: &NodeCert,
    ca: &CertificateAuthority,
) -> Result<ClientConfig, PkiError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| PkiError::Tls(e.to_string()))?
        .with_root_certificates(trust_roots(ca)?)
        .with_client_auth_cert(
            vec![CertificateDer::from(cert.cert_der().to_vec())],
            key_der(cert),
        )
        .map_err(|e| PkiError::Tls(e.to_string()))?;

    config.alpn_protocols = vec![ALPN.to_vec()];
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_identity;

    #[test]
    fn test_server_config_builds() {
        let ca = CertificateAuthority::generate().unwrap();
        let cert = NodeCert::generate(&ca, &node_identity("srv"), true, true).unwrap();

        let config = server_tls_config(&cert, &ca).unwrap();
        assert_eq!(config.alpn_protocols, vec![ALPN.to_vec()]);
    }

    #[test]
    fn test_client_config_builds() {
        let ca = CertificateAuthority::generate().unwrap();
        let cert = NodeCert::generate(&ca, &node_identity("cli"), false, true).unwrap();

        let config = client_tls_config(&cert, &ca).unwrap();
        assert_eq!(config.alpn_protocols, vec![ALPN.to_vec()]);
    }
}
