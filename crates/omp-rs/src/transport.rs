// Copyright (C) 2025 Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

//! TLS transport to the manager
//!
//! Managers are commonly deployed with self-signed certificates, so by
//! default the handshake accepts any certificate and only reports whether it
//! chained to a configured CA. Set `verify_certificates` to refuse
//! unverified peers instead.

use crate::config::validate_address;
use crate::error::{OmpError, Result};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info};

/// Default timeout for TCP connect plus TLS handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// Fail the handshake unless the chain verifies against `ca_certificates_pem`
    pub verify_certificates: bool,
    /// PEM bundle of trusted CA certificates
    pub ca_certificates_pem: Option<Vec<u8>>,
    /// Name to verify instead of the connect host
    pub server_name: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            verify_certificates: false,
            ca_certificates_pem: None,
            server_name: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Runs real verification when trust anchors exist and records the outcome
#[derive(Debug)]
struct RecordingVerifier {
    inner: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
    enforce: bool,
    authorized: Arc<AtomicBool>,
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let verdict = match &self.inner {
            Some(inner) => {
                inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            }
            None => Err(rustls::Error::General("no trusted CA configured".to_string())),
        };

        match verdict {
            Ok(verified) => {
                self.authorized.store(true, Ordering::SeqCst);
                Ok(verified)
            }
            Err(e) if self.enforce => Err(e),
            Err(e) => {
                debug!(error = %e, "accepting unverified manager certificate");
                Ok(ServerCertVerified::assertion())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

fn root_store(pem: &[u8]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(pem) {
        let cert = cert.map_err(|e| OmpError::Tls(format!("failed to parse CA certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| OmpError::Tls(format!("rejected CA certificate: {e}")))?;
    }
    if roots.is_empty() {
        return Err(OmpError::Tls("CA bundle contains no certificates".to_string()));
    }
    Ok(roots)
}

fn client_config(options: &TlsOptions, authorized: Arc<AtomicBool>) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let inner = match &options.ca_certificates_pem {
        Some(pem) => Some(
            WebPkiServerVerifier::builder_with_provider(Arc::new(root_store(pem)?), provider.clone())
                .build()
                .map_err(|e| OmpError::Tls(format!("verifier error: {e}")))?,
        ),
        None if options.verify_certificates => {
            return Err(OmpError::invalid_argument(
                "verify_certificates requires ca_certificates_pem",
            ));
        }
        None => None,
    };

    let verifier = RecordingVerifier {
        inner,
        provider: provider.clone(),
        enforce: options.verify_certificates,
        authorized,
    };

    Ok(ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| OmpError::Tls(format!("client config error: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth())
}

/// Open a TLS stream to the manager
///
/// Returns the stream and whether the peer certificate was verified.
pub async fn connect(host: &str, port: u16, options: &TlsOptions) -> Result<(TlsStream<TcpStream>, bool)> {
    validate_address(host, port)?;

    let authorized = Arc::new(AtomicBool::new(false));
    let connector = TlsConnector::from(Arc::new(client_config(options, authorized.clone())?));

    let name = options.server_name.as_deref().unwrap_or(host).to_string();
    let server_name = ServerName::try_from(name)
        .map_err(|e| OmpError::invalid_argument(format!("invalid server name: {e}")))?;

    let handshake = async {
        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;
        connector.connect(server_name, tcp).await
    };

    let stream = timeout(options.connect_timeout, handshake)
        .await
        .map_err(|_| OmpError::Timeout {
            operation: format!("connecting to {host}:{port}"),
            duration: options.connect_timeout,
        })??;

    let authorized = authorized.load(Ordering::SeqCst);
    info!(host, port, authorized, "connected to manager");
    Ok((stream, authorized))
}
