//! TLS material: self-signed generation, PEM loading, and the insecure
//! verifier used behind an explicit opt-in flag.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};

use crate::SetupError;

/// A certificate chain and its private key, ready to serve.
#[derive(Debug)]
pub struct TlsMaterial {
    /// Leaf-first certificate chain.
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Private key matching the leaf.
    pub key: PrivateKeyDer<'static>,
}

/// Generates a throwaway ECDSA P-256 certificate for `hosts`, attributed to
/// `org`, valid for the rcgen defaults.
pub fn self_signed(org: &str, hosts: &[String]) -> Result<TlsMaterial, SetupError> {
    let mut params = rcgen::CertificateParams::new(hosts.to_vec())?;
    params
        .distinguished_name
        .push(rcgen::DnType::OrganizationName, org);

    let key_pair = rcgen::KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    Ok(TlsMaterial {
        cert_chain: vec![cert.der().clone()],
        key: PrivatePkcs8KeyDer::from(key_pair.serialize_der()).into(),
    })
}

/// Loads a PEM certificate chain and PEM private key from disk.
pub fn load_material(cert_path: &Path, key_path: &Path) -> Result<TlsMaterial, SetupError> {
    let mut reader = BufReader::new(File::open(cert_path)?);
    let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|err| bad_material(cert_path, &err.to_string()))?;
    if cert_chain.is_empty() {
        return Err(bad_material(cert_path, "no certificates found"));
    }

    let mut reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|err| bad_material(key_path, &err.to_string()))?
        .ok_or_else(|| bad_material(key_path, "no private key found"))?;

    Ok(TlsMaterial { cert_chain, key })
}

/// Loads a PEM root-CA bundle into a rustls root store.
pub fn load_root_store(path: &Path) -> Result<rustls::RootCertStore, SetupError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|err| bad_material(path, &err.to_string()))?;
        roots
            .add(cert)
            .map_err(|err| bad_material(path, &err.to_string()))?;
    }
    if roots.is_empty() {
        return Err(bad_material(path, "no trust anchors found"));
    }
    Ok(roots)
}

fn bad_material(path: &Path, detail: &str) -> SetupError {
    SetupError::BadMaterial {
        path: path.display().to_string(),
        detail: detail.to_owned(),
    }
}

/// Accepts any server certificate. Only reachable behind the `insecure`
/// flag; signatures are still checked against the presented certificate.
#[derive(Debug)]
pub(crate) struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl AcceptAnyServerCert {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self(Arc::new(rustls::crypto::ring::default_provider())))
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn self_signed_produces_a_usable_pair() {
        let material =
            self_signed("qft test", &["localhost".to_owned(), "127.0.0.1".to_owned()]).unwrap();
        assert_eq!(material.cert_chain.len(), 1);
        assert!(!material.cert_chain[0].as_ref().is_empty());
    }

    #[test]
    fn load_material_rejects_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        fs::write(&cert, "").unwrap();
        fs::write(&key, "").unwrap();

        assert!(matches!(
            load_material(&cert, &key),
            Err(SetupError::BadMaterial { .. })
        ));
    }

    #[test]
    fn root_store_requires_at_least_one_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("roots.pem");
        fs::write(&bundle, "").unwrap();

        assert!(matches!(
            load_root_store(&bundle),
            Err(SetupError::BadMaterial { .. })
        ));
    }
}
