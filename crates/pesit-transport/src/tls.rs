//! PeSIT-TLS (§6): mutual-auth TLS 1.2+ built on `rustls`, loaded from PEM
//! files rather than a platform trust store, matching the closed partner
//! lists typical of Hors-SIT deployments.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;
use crate::error::TransportError;

static CRYPTO_PROVIDER: OnceLock<()> = OnceLock::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("reading certificates from {}: {e}", path.display())))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TransportError::Tls(format!("reading private key from {}: {e}", path.display())))?
        .ok_or_else(|| TransportError::Tls(format!("no private key found in {}", path.display())))
}

fn root_store(ca_path: &Path) -> Result<RootCertStore, TransportError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        roots.add(cert).map_err(|e| TransportError::Tls(e.to_string()))?;
    }
    Ok(roots)
}

pub fn server_config(cfg: &TlsConfig) -> Result<Arc<ServerConfig>, TransportError> {
    ensure_crypto_provider();

    let certs = load_certs(&cfg.cert_path)?;
    let key = load_private_key(&cfg.key_path)?;

    let builder = ServerConfig::builder();
    let built = match &cfg.client_ca_path {
        Some(ca_path) => {
            let roots = Arc::new(root_store(ca_path)?);
            let verifier_builder = WebPkiClientVerifier::builder(roots);
            let verifier = if cfg.require_client_auth {
                verifier_builder.build()
            } else {
                verifier_builder.allow_unauthenticated().build()
            }
            .map_err(|e| TransportError::Tls(e.to_string()))?;
            builder.with_client_cert_verifier(verifier).with_single_cert(certs, key)
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key),
    }
    .map_err(|e| TransportError::Tls(e.to_string()))?;

    Ok(Arc::new(built))
}

pub fn client_config(cfg: &TlsConfig) -> Result<Arc<ClientConfig>, TransportError> {
    ensure_crypto_provider();

    let ca_path = cfg
        .client_ca_path
        .as_ref()
        .ok_or_else(|| TransportError::Tls("client TLS config requires client_ca_path to trust a server cert".into()))?;
    let roots = root_store(ca_path)?;

    let certs = load_certs(&cfg.cert_path)?;
    let key = load_private_key(&cfg.key_path)?;

    let built = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    Ok(Arc::new(built))
}

pub fn acceptor(cfg: &TlsConfig) -> Result<TlsAcceptor, TransportError> {
    Ok(TlsAcceptor::from(server_config(cfg)?))
}

pub fn connector(cfg: &TlsConfig) -> Result<TlsConnector, TransportError> {
    Ok(TlsConnector::from(client_config(cfg)?))
}
