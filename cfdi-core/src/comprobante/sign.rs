//! Digest, signature and verification of the original string.
//!
//! The signature covers the original string rendered by the version's
//! template, so `sello` and `certificado` are never part of what is signed.
use std::time::SystemTime;

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use x509_cert::{
    Certificate,
    der::{Decode, DecodePem, Encode},
};

use super::Comprobante;
use super::canonical::{CanonicalizeError, canonicalize};
use crate::diagnostics::HexDump;
use crate::keys::{KeyError, load_private_key};
use crate::resources::Registry;

/// Digest and signature scheme pinned by a version's template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "SHA1withRSA")]
    Sha1WithRsa,
    #[serde(rename = "SHA256withRSA")]
    Sha256WithRsa,
}

impl SignatureAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1WithRsa => "SHA1withRSA",
            SignatureAlgorithm::Sha256WithRsa => "SHA256withRSA",
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            SignatureAlgorithm::Sha1WithRsa => Sha1::digest(data).to_vec(),
            SignatureAlgorithm::Sha256WithRsa => Sha256::digest(data).to_vec(),
        }
    }

    /// PKCS#1 v1.5 padding with the digest algorithm identifier.
    fn padding(self) -> Pkcs1v15Sign {
        match self {
            SignatureAlgorithm::Sha1WithRsa => Pkcs1v15Sign::new::<Sha1>(),
            SignatureAlgorithm::Sha256WithRsa => Pkcs1v15Sign::new::<Sha256>(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Signing error: {0}")]
    SigningError(String),
    #[error(transparent)]
    Canonicalize(#[from] CanonicalizeError),
    #[error(transparent)]
    Key(#[from] KeyError),
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Canonicalize(#[from] CanonicalizeError),
    #[error("embedded certificate cannot be decoded: {0}")]
    CertificateDecode(String),
    #[error(
        "certificate is not valid at {checked_at} (valid from {not_before} to {not_after})"
    )]
    ExpiredCertificate {
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        checked_at: DateTime<Utc>,
    },
    #[error("embedded signature cannot be decoded: {0}")]
    SignatureDecode(String),
    #[error("certificate public key is not usable: {0}")]
    PublicKey(String),
    #[error("signature does not match the document")]
    InvalidSignature,
}

/// Digest of the document's original string, with the algorithm pinned for
/// its version.
pub fn digest(comprobante: &Comprobante, registry: &Registry) -> Result<Vec<u8>, CanonicalizeError> {
    let algorithm = registry.template(&comprobante.version)?.signature_algorithm;
    let original = canonicalize(comprobante, registry)?;
    let digest = algorithm.digest(original.as_bytes());
    debug!(
        version = %comprobante.version,
        algorithm = algorithm.name(),
        original = %original,
        digest = %HexDump(&digest),
        "computed document digest"
    );
    Ok(digest)
}

/// Private key and certificate of an issuer.
pub struct CfdiSigner {
    certificate: Certificate,
    private_key: RsaPrivateKey,
}

impl CfdiSigner {
    /// Pairs a key with its certificate.
    ///
    /// # Errors
    /// Fails when the certificate does not carry the key's public half.
    pub fn new(certificate: Certificate, private_key: RsaPrivateKey) -> Result<Self, SigningError> {
        let certified = certificate_public_key(&certificate)
            .map_err(|e| SigningError::SigningError(format!("Certificate key error: {e}")))?;
        if certified != RsaPublicKey::from(&private_key) {
            return Err(SigningError::SigningError(
                "private key does not match certificate".to_string(),
            ));
        }
        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// Certificate and unencrypted PKCS#8 key, both DER.
    pub fn from_der(cert_der: &[u8], private_key_der: &[u8]) -> Result<Self, SigningError> {
        let cert = Certificate::from_der(cert_der)
            .map_err(|e| SigningError::SigningError(format!("Certificate parse error: {e:?}")))?;
        let private_key = load_private_key(private_key_der, "")?;
        Self::new(cert, private_key)
    }

    /// Certificate and PKCS#8 key, both PEM. The passphrase is only used
    /// for an encrypted key.
    pub fn from_pem(
        cert_pem: &str,
        private_key_pem: &str,
        passphrase: &str,
    ) -> Result<Self, SigningError> {
        let cert = Certificate::from_pem(cert_pem.as_bytes())
            .map_err(|e| SigningError::SigningError(format!("Certificate parse error: {e:?}")))?;
        let private_key = load_private_key(private_key_pem.as_bytes(), passphrase)?;
        Self::new(cert, private_key)
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn certificate_number(&self) -> String {
        certificate_number(&self.certificate)
    }

    /// Base64 signature over the document's digest. The document is not
    /// modified.
    pub fn signature(
        &self,
        comprobante: &Comprobante,
        registry: &Registry,
    ) -> Result<String, SigningError> {
        let algorithm = registry
            .template(&comprobante.version)
            .map_err(CanonicalizeError::from)?
            .signature_algorithm;
        let digest = digest(comprobante, registry)?;
        let signature = self
            .private_key
            .sign(algorithm.padding(), &digest)
            .map_err(|e| SigningError::SigningError(format!("RSA signing failed: {e}")))?;
        Ok(Base64::encode_string(&signature))
    }

    /// Writes `sello` and `certificado` into the document.
    pub fn sign(
        &self,
        comprobante: &mut Comprobante,
        registry: &Registry,
    ) -> Result<(), SigningError> {
        let number = self.certificate_number();
        if comprobante.certificate_number != number {
            warn!(
                document = %comprobante.certificate_number,
                certificate = %number,
                "noCertificado does not match the signing certificate"
            );
        }

        let signature = self.signature(comprobante, registry)?;
        let cert_der = self
            .certificate
            .to_der()
            .map_err(|e| SigningError::SigningError(format!("Certificate encode error: {e}")))?;

        comprobante.signature = signature;
        comprobante.certificate = Base64::encode_string(&cert_der);
        info!(
            version = %comprobante.version,
            certificate = %number,
            "signed document"
        );
        Ok(())
    }
}

/// Verifies the embedded signature against the embedded certificate at the
/// current time.
pub fn verify(comprobante: &Comprobante, registry: &Registry) -> Result<(), VerifyError> {
    verify_at(comprobante, registry, SystemTime::now())
}

/// Verifies the embedded signature, checking the certificate validity window
/// against `at`.
pub fn verify_at(
    comprobante: &Comprobante,
    registry: &Registry,
    at: SystemTime,
) -> Result<(), VerifyError> {
    let result = verify_inner(comprobante, registry, at);
    match &result {
        Ok(number) => info!(
            version = %comprobante.version,
            certificate = %number,
            "signature verified"
        ),
        Err(e) => warn!(version = %comprobante.version, error = %e, "verification failed"),
    }
    result.map(|_| ())
}

fn verify_inner(
    comprobante: &Comprobante,
    registry: &Registry,
    at: SystemTime,
) -> Result<String, VerifyError> {
    let algorithm = registry
        .template(&comprobante.version)
        .map_err(CanonicalizeError::from)?
        .signature_algorithm;
    let digest = digest(comprobante, registry)?;

    let cert_der = Base64::decode_vec(&strip_whitespace(&comprobante.certificate))
        .map_err(|e| VerifyError::CertificateDecode(e.to_string()))?;
    let cert = Certificate::from_der(&cert_der)
        .map_err(|e| VerifyError::CertificateDecode(e.to_string()))?;
    check_validity(&cert, at)?;

    let signature_text = strip_whitespace(&comprobante.signature);
    if signature_text.is_empty() {
        return Err(VerifyError::SignatureDecode("signature is empty".to_string()));
    }
    let signature = Base64::decode_vec(&signature_text)
        .map_err(|e| VerifyError::SignatureDecode(e.to_string()))?;

    let public_key =
        certificate_public_key(&cert).map_err(|e| VerifyError::PublicKey(e.to_string()))?;
    public_key
        .verify(algorithm.padding(), &digest, &signature)
        .map_err(|_| VerifyError::InvalidSignature)?;
    Ok(certificate_number(&cert))
}

/// Producers may wrap `sello` and `certificado` across lines.
fn strip_whitespace(encoded: &str) -> String {
    encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect()
}

fn check_validity(cert: &Certificate, at: SystemTime) -> Result<(), VerifyError> {
    let validity = &cert.tbs_certificate.validity;
    let not_before = validity.not_before.to_system_time();
    let not_after = validity.not_after.to_system_time();
    if at < not_before || at > not_after {
        return Err(VerifyError::ExpiredCertificate {
            not_before: not_before.into(),
            not_after: not_after.into(),
            checked_at: at.into(),
        });
    }
    Ok(())
}

fn certificate_public_key(cert: &Certificate) -> Result<RsaPublicKey, String> {
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| e.to_string())?;
    RsaPublicKey::from_public_key_der(&spki).map_err(|e| e.to_string())
}

/// Certificate number as printed by the tax authority: serials made of
/// ASCII digits are read as text, any other serial is rendered in decimal.
pub fn certificate_number(cert: &Certificate) -> String {
    let bytes = cert.tbs_certificate.serial_number.as_bytes();
    if !bytes.is_empty() && bytes.iter().all(u8::is_ascii_digit) {
        return bytes.iter().map(|b| *b as char).collect();
    }
    serial_bytes_to_decimal_string(bytes)
}

fn serial_bytes_to_decimal_string(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0".to_string();
    }

    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 10) as u8;
            carry = value / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }

    while digits.len() > 1 && matches!(digits.last(), Some(0)) {
        digits.pop();
    }

    digits.iter().rev().map(|d| (b'0' + *d) as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn fixture(name: &str) -> String {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/keys")
            .join(name);
        std::fs::read_to_string(path).expect("read fixture")
    }

    #[test]
    fn serial_bytes_to_decimal_handles_large_values() {
        assert_eq!(serial_bytes_to_decimal_string(&[0x01]), "1");
        assert_eq!(serial_bytes_to_decimal_string(&[0x01, 0x00]), "256");
        assert_eq!(serial_bytes_to_decimal_string(&[0x00, 0x01]), "1");
        assert_eq!(serial_bytes_to_decimal_string(&[0xFF, 0xFF]), "65535");
    }

    #[test]
    fn strip_whitespace_drops_line_breaks_and_padding() {
        assert_eq!(strip_whitespace(" TUlJ\r\nRWFq\tQ0NB\n"), "TUlJRWFqQ0NB");
        assert_eq!(strip_whitespace(""), "");
    }

    #[test]
    fn certificate_number_reads_ascii_serials() {
        let cert = Certificate::from_pem(fixture("issuer.cer.pem").as_bytes()).expect("cert");
        assert_eq!(certificate_number(&cert), "30001000000100000800");
    }

    #[test]
    fn algorithms_deserialize_from_template_names() {
        let parsed: Vec<SignatureAlgorithm> =
            serde_json::from_str(r#"["SHA1withRSA", "SHA256withRSA"]"#).expect("algorithms");
        assert_eq!(
            parsed,
            vec![SignatureAlgorithm::Sha1WithRsa, SignatureAlgorithm::Sha256WithRsa]
        );
        assert_eq!(SignatureAlgorithm::Sha1WithRsa.digest(b"abc").len(), 20);
        assert_eq!(SignatureAlgorithm::Sha256WithRsa.digest(b"abc").len(), 32);
    }

    #[test]
    fn signer_rejects_certificate_for_another_key() {
        let err = CfdiSigner::from_pem(&fixture("other.cer.pem"), &fixture("issuer.key.pem"), "")
            .err()
            .expect("mismatch");
        assert!(matches!(err, SigningError::SigningError(ref m) if m.contains("does not match")));
    }

    #[test]
    fn signer_accepts_matching_pem_pair() {
        let signer =
            CfdiSigner::from_pem(&fixture("issuer.cer.pem"), &fixture("issuer.key.pem"), "")
                .expect("signer");
        assert_eq!(signer.certificate_number(), "30001000000100000800");
    }
}
