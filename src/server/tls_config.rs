use crate::error::Error;
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

// Minimum protocol version accepted by the server.
static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Builds the server TLS context: TLS 1.3 only, PEM key and certificate
/// chain loaded from disk, no client authentication.
pub(crate) fn load_tls_server_config(key_path: &Path, cert_path: &Path) -> Result<ServerConfig, Error> {
    let key_file = File::open(key_path).map_err(|e| Error::TlsKeyLoad {
        path: key_path.display().to_string(),
        source: e,
    })?;
    let key = private_key(&mut BufReader::new(key_file))
        .map_err(|e| Error::TlsInvalidKey(format!("Failed to parse private key: {e}")))?
        .ok_or_else(|| Error::TlsInvalidKey("No private key found in file".to_string()))?;

    let cert_file = File::open(cert_path).map_err(|e| Error::TlsCertificateLoad {
        path: cert_path.display().to_string(),
        source: e,
    })?;
    let cert_chain: Vec<CertificateDer> = certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::TlsInvalidCertificate(format!("Failed to parse certificates: {e}")))?;

    if cert_chain.is_empty() {
        return Err(Error::TlsInvalidCertificate(
            "No certificates found in file".to_string(),
        ));
    }

    let config = ServerConfig::builder_with_protocol_versions(PROTOCOL_VERSIONS)
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::TlsServerConfigBuild(e.to_string()))?;

    Ok(config)
}
