//! TLS session setup
//!
//! The tunnel transport is TCP with mandatory TLS. The server presents a
//! certificate loaded from a PEM file pair. Clients connect without
//! certificate verification by default (test deployments run on
//! self-signed certificates); the relay's next-hop dial verifies against
//! the Mozilla roots unless explicitly configured otherwise.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error as RustlsError, SignatureScheme};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::{Error, Result};

fn install_crypto_provider() {
    static CRYPTO_INIT: OnceLock<()> = OnceLock::new();
    CRYPTO_INIT.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build a TLS acceptor from a PEM certificate/key file pair
pub fn acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    install_crypto_provider();

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(format!("invalid certificate/key pair: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Build a TLS connector
///
/// With `skip_verify` the connector accepts any certificate; without it
/// the peer is verified against the Mozilla root store.
pub fn connector(skip_verify: bool) -> TlsConnector {
    install_crypto_provider();

    let config = if skip_verify {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureServerCertVerifier))
            .with_no_client_auth()
    } else {
        let root_store =
            rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    TlsConnector::from(Arc::new(config))
}

/// Parse a host into a TLS server name for SNI
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| Error::Tls(format!("invalid server name: {:?}", host)))
}

/// Configure TCP socket options on a tunnel stream
///
/// TCP keepalive is the only liveness probe the tunnel has; application
/// frames carry no timeouts of their own.
pub fn configure_socket(stream: &TcpStream) -> Result<()> {
    stream
        .set_nodelay(true)
        .map_err(|e| Error::Tls(format!("failed to set TCP_NODELAY: {}", e)))?;

    let socket_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(20))
        .with_retries(3);

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Tls(format!("failed to set TCP keepalive: {}", e)))?;

    Ok(())
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| Error::Tls(format!("cannot open certificate {}: {}", path.display(), e)))?;

    let mut reader = BufReader::new(cert_file);
    let mut certs = Vec::new();
    for cert in rustls_pemfile::certs(&mut reader) {
        certs.push(cert.map_err(|e| {
            Error::Tls(format!("failed to parse certificate {}: {}", path.display(), e))
        })?);
    }

    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| Error::Tls(format!("cannot open key {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(key_file);

    // Try PKCS#8, then RSA, then EC, rewinding between attempts
    for key in rustls_pemfile::pkcs8_private_keys(&mut reader).flatten() {
        return Ok(PrivateKeyDer::Pkcs8(key));
    }

    if reader.get_mut().seek(SeekFrom::Start(0)).is_ok() {
        for key in rustls_pemfile::rsa_private_keys(&mut reader).flatten() {
            return Ok(PrivateKeyDer::Pkcs1(key));
        }
    }

    if reader.get_mut().seek(SeekFrom::Start(0)).is_ok() {
        for key in rustls_pemfile::ec_private_keys(&mut reader).flatten() {
            return Ok(PrivateKeyDer::Sec1(key));
        }
    }

    Err(Error::Tls(format!(
        "no valid private key found in {}",
        path.display()
    )))
}

/// Certificate verifier that accepts anything
///
/// This is the documented default for clients talking to self-signed
/// servers. It makes the connection vulnerable to man-in-the-middle
/// attacks; the relay only uses it behind explicit configuration.
#[derive(Debug)]
struct InsecureServerCertVerifier;

impl ServerCertVerifier for InsecureServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_insecure() {
        let _ = connector(true);
    }

    #[test]
    fn test_connector_verifying() {
        let _ = connector(false);
    }

    #[test]
    fn test_server_name_hostname_and_ip() {
        assert!(server_name("example.com").is_ok());
        assert!(server_name("1.2.3.4").is_ok());
        assert!(server_name("bad\u{0}name").is_err());
    }

    #[test]
    fn test_acceptor_missing_files() {
        match acceptor(Path::new("/nonexistent.crt"), Path::new("/nonexistent.key")) {
            Err(err) => assert!(matches!(err, Error::Tls(_))),
            Ok(_) => panic!("expected acceptor to fail for missing files"),
        }
    }
}
