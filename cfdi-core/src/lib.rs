//! Rust toolkit for CFDI 3.0 digital tax invoices: parsing, schema
//! validation, original-string canonicalization, signing and verification.
//!
//! # Examples
//! ```rust
//! use cfdi_core::config::Config;
//!
//! let registry = Config::default().registry()?;
//! assert!(registry.get("3.0").is_ok());
//! # Ok::<(), cfdi_core::Error>(())
//! ```
pub mod cfdi;
pub mod comprobante;
pub mod config;
pub mod diagnostics;
pub mod keys;
pub mod resources;

use thiserror::Error;

pub use cfdi::{Cfdi, CopyError, WriteError};
pub use comprobante::Comprobante;
pub use comprobante::canonical::CanonicalizeError;
pub use comprobante::sign::{CfdiSigner, SigningError, VerifyError};
pub use comprobante::validation::{SchemaViolation, ValidationError};
pub use comprobante::xml::XmlError;
pub use comprobante::xml::parse::ParseError;
pub use keys::KeyError;
pub use resources::{Registry, ResourceError, UnsupportedVersion};

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error(transparent)]
    Copy(#[from] CopyError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Canonicalize(#[from] CanonicalizeError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    UnsupportedVersion(#[from] UnsupportedVersion),
    #[error(transparent)]
    Write(#[from] WriteError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comprobante::validation::ViolationKind;
    use quick_xml::se::SeError;

    #[test]
    fn error_conversions_cover_variants() {
        let err: Error = ParseError::MissingField("Emisor").into();
        assert!(matches!(err, Error::Parse(_)));

        let xml_err = XmlError::Serialize {
            source: SeError::Custom("xml".into()),
        };
        let err: Error = xml_err.into();
        assert!(matches!(err, Error::Xml(_)));

        let err: Error = CopyError::Parse(ParseError::MissingField("Receptor")).into();
        assert!(matches!(err, Error::Copy(_)));

        let violation = SchemaViolation {
            path: "/Comprobante@total".into(),
            kind: ViolationKind::MissingAttribute,
            message: "required attribute total is missing".into(),
        };
        let err: Error = ValidationError::Violation(violation).into();
        assert!(matches!(err, Error::Validation(_)));

        let unsupported = UnsupportedVersion {
            version: "2.0".into(),
        };
        let err: Error = CanonicalizeError::from(unsupported.clone()).into();
        assert!(matches!(err, Error::Canonicalize(_)));

        let err: Error = SigningError::SigningError("sign".into()).into();
        assert!(matches!(err, Error::Signing(_)));

        let err: Error = VerifyError::InvalidSignature.into();
        assert!(matches!(err, Error::Verify(_)));

        let err: Error = KeyError::Decrypt("bad passphrase".into()).into();
        assert!(matches!(err, Error::Key(_)));

        let err: Error = ResourceError::Invalid {
            name: "3.0/schema.json".into(),
            message: "eof".into(),
        }
        .into();
        assert!(matches!(err, Error::Resource(_)));

        let err: Error = unsupported.clone().into();
        assert!(matches!(err, Error::UnsupportedVersion(_)));

        let err: Error = WriteError::UnsupportedVersion(unsupported).into();
        assert!(matches!(err, Error::Write(_)));
    }
}
