//! Latis node daemon binary

use anyhow::{Context, Result};
use latis_node::config::NodeConfig;
use latis_node::server::{Server, ServerConfig};
use latis_pki::{server_tls_config, CertificateAuthority, NodeCert};
use latis_transport::MuxListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = NodeConfig::from_env().context("resolve configuration")?;
    info!(name = %config.name, addr = %config.addr, "latis starting");

    if let Err(e) = run(config).await {
        error!(error = %format_args!("{e:#}"), "node error");
        std::process::exit(1);
    }

    info!("latis stopped");
    Ok(())
}

async fn run(config: NodeConfig) -> Result<()> {
    let (ca, cert) = ensure_pki(&config).context("initialize PKI")?;
    let identity = cert
        .identity()
        .context("read certificate identity")?
        .unwrap_or_else(|| config.identity());

    let tls = server_tls_config(&cert, &ca).context("build server TLS config")?;
    let listener = MuxListener::listen(config.addr, tls).context("listen")?;

    let provider = config.create_provider();
    info!(provider = provider.name(), "LLM provider");

    let server = Server::new(
        listener,
        ServerConfig {
            identity,
            provider,
            agent_card: config.agent_card(),
            streaming: config.streaming,
        },
    );

    server.run().await
}

/// Load the CA and node certificate, generating anything missing
fn ensure_pki(config: &NodeConfig) -> Result<(CertificateAuthority, NodeCert)> {
    let ca = if CertificateAuthority::exists(&config.pki_dir) {
        info!("loading existing CA");
        CertificateAuthority::load_from_dir(&config.pki_dir)?
    } else {
        info!("generating new CA");
        let ca = CertificateAuthority::generate()?;
        ca.save(&config.pki_dir)?;
        info!(dir = %config.pki_dir.display(), "CA saved");
        ca
    };

    let cert_path = config.cert_path();
    let key_path = config.key_path();
    let cert = if NodeCert::exists(&cert_path, &key_path) {
        info!("loading existing certificate");
        NodeCert::load(&cert_path, &key_path)?
    } else {
        info!(name = %config.name, "generating certificate");
        let cert = NodeCert::generate(&ca, &config.identity(), true, true)?;
        cert.save(&cert_path, &key_path)?;
        info!(path = %cert_path.display(), "certificate saved");
        cert
    };

    Ok((ca, cert))
}
