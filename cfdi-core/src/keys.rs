//! Private key and certificate decoding.
//!
//! Issuer keys are distributed as password-protected PKCS#8 (`.key`, DER)
//! and certificates as X.509 (`.cer`, DER). PEM variants of both, and
//! unencrypted PKCS#8 keys, are accepted too.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pkcs8::{DecodePrivateKey, EncryptedPrivateKeyInfo};
use rsa::RsaPrivateKey;
use thiserror::Error;
use x509_cert::Certificate;
use x509_cert::der::{Decode, DecodePem};

const PEM_PREFIX: &[u8] = b"-----BEGIN";
const ENCRYPTED_PEM_LABEL: &str = "ENCRYPTED PRIVATE KEY";

#[derive(Debug, Clone, Error)]
pub enum KeyError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("failed to decrypt private key: {0}")]
    Decrypt(String),
    #[error("invalid private key: {0}")]
    PrivateKey(String),
    #[error("invalid certificate: {0}")]
    Certificate(String),
}

/// Decodes an RSA private key. `passphrase` is only used when the key is
/// encrypted.
pub fn load_private_key(bytes: &[u8], passphrase: &str) -> Result<RsaPrivateKey, KeyError> {
    if bytes.trim_ascii_start().starts_with(PEM_PREFIX) {
        let pem = std::str::from_utf8(bytes)
            .map_err(|e| KeyError::PrivateKey(format!("PEM is not UTF-8: {e}")))?;
        return if pem.contains(ENCRYPTED_PEM_LABEL) {
            RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase)
                .map_err(|e| KeyError::Decrypt(e.to_string()))
        } else {
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| KeyError::PrivateKey(e.to_string()))
        };
    }

    if EncryptedPrivateKeyInfo::try_from(bytes).is_ok() {
        RsaPrivateKey::from_pkcs8_encrypted_der(bytes, passphrase)
            .map_err(|e| KeyError::Decrypt(e.to_string()))
    } else {
        RsaPrivateKey::from_pkcs8_der(bytes).map_err(|e| KeyError::PrivateKey(e.to_string()))
    }
}

/// Decodes an X.509 certificate in DER or PEM form.
pub fn load_certificate(bytes: &[u8]) -> Result<Certificate, KeyError> {
    let result = if bytes.trim_ascii_start().starts_with(PEM_PREFIX) {
        Certificate::from_pem(bytes)
    } else {
        Certificate::from_der(bytes)
    };
    result.map_err(|e| KeyError::Certificate(e.to_string()))
}

pub fn read_private_key(path: &Path, passphrase: &str) -> Result<RsaPrivateKey, KeyError> {
    load_private_key(&read(path)?, passphrase)
}

pub fn read_certificate(path: &Path) -> Result<Certificate, KeyError> {
    load_certificate(&read(path)?)
}

fn read(path: &Path) -> Result<Vec<u8>, KeyError> {
    fs::read(path).map_err(|source| KeyError::Io {
        path: path.to_path_buf(),
        source: Arc::new(source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPublicKey;
    use rsa::pkcs8::DecodePublicKey;
    use x509_cert::der::Encode;

    const PASSPHRASE: &str = "12345678a";

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/keys")
            .join(name)
    }

    fn certificate_key(cert: &Certificate) -> RsaPublicKey {
        let spki = cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .expect("spki der");
        RsaPublicKey::from_public_key_der(&spki).expect("rsa public key")
    }

    #[test]
    fn encrypted_der_and_plain_pem_keys_decode_to_the_same_key() {
        let der = read_private_key(&fixture("issuer.key"), PASSPHRASE).expect("3des key");
        let aes = read_private_key(&fixture("issuer-aes.key"), PASSPHRASE).expect("aes key");
        let pem = read_private_key(&fixture("issuer.key.pem"), "ignored").expect("pem key");
        assert_eq!(der, aes);
        assert_eq!(der, pem);
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let err = read_private_key(&fixture("issuer.key"), "wrong").unwrap_err();
        assert!(matches!(err, KeyError::Decrypt(_)));
    }

    #[test]
    fn der_and_pem_certificates_match_the_key() {
        let der = read_certificate(&fixture("issuer.cer")).expect("der cert");
        let pem = read_certificate(&fixture("issuer.cer.pem")).expect("pem cert");
        assert_eq!(der, pem);

        let key = read_private_key(&fixture("issuer.key"), PASSPHRASE).expect("key");
        assert_eq!(certificate_key(&der), RsaPublicKey::from(&key));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            load_certificate(b"not a certificate"),
            Err(KeyError::Certificate(_))
        ));
        assert!(matches!(
            load_private_key(&[0x30, 0x03, 0x02, 0x01, 0x00], PASSPHRASE),
            Err(KeyError::PrivateKey(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_certificate(&fixture("missing.cer")).unwrap_err();
        assert!(matches!(err, KeyError::Io { .. }));
    }
}
