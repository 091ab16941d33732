//! Optional mutual TLS for the daemon's HTTP surface.

use std::{io::BufReader, path::PathBuf, sync::Arc};

use axum::Router;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use proxops_common::error::Error;
use rustls::{server::WebPkiClientVerifier, RootCertStore, ServerConfig};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

/// Build the server TLS config: our cert/key pair, and client certificates
/// required and verified against the CA.
pub fn load_server_config(paths: &TlsPaths) -> Result<ServerConfig, Error> {
    let certs = read_certs(&paths.cert)?;
    let key = read_key(&paths.key)?;

    let mut roots = RootCertStore::empty();
    for ca in read_certs(&paths.ca)? {
        roots
            .add(ca)
            .map_err(|e| Error::Config(format!("ca certificate: {e}")))?;
    }

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| Error::Config(format!("client verifier: {e}")))?;

    ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("server certificate: {e}")))
}

fn read_certs(path: &PathBuf) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, Error> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Access(format!("open {}: {e}", path.display())))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_key(path: &PathBuf) -> Result<rustls::pki_types::PrivateKeyDer<'static>, Error> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Access(format!("open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?
        .ok_or_else(|| Error::Config(format!("no private key in {}", path.display())))
}

/// Accept loop serving the router over TLS connections.
pub async fn serve(
    listener: TcpListener,
    tls_config: ServerConfig,
    app: Router,
) -> Result<(), Error> {
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| Error::Service(format!("accept: {e}")))?;
        let acceptor = acceptor.clone();
        let app = app.clone();

        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("tls handshake with {peer} failed: {e}");
                    return;
                }
            };

            let service = TowerToHyperService::new(app);
            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                debug!("connection from {peer} ended: {e}");
            }
        });
    }
}
