//! Document handle bundling a [`Comprobante`] with the resources for its
//! version.
//!
//! # Examples
//! ```rust,no_run
//! use cfdi_core::cfdi::Cfdi;
//! use cfdi_core::comprobante::sign::CfdiSigner;
//! use cfdi_core::keys::{read_certificate, read_private_key};
//! use cfdi_core::resources::Registry;
//! use std::path::Path;
//!
//! let registry = Registry::bundled()?;
//! let mut cfdi = Cfdi::parse_file(Path::new("cfdv3.xml"), registry)?;
//! cfdi.validate()?;
//!
//! let key = read_private_key(Path::new("issuer.key"), "12345678a")?;
//! let cert = read_certificate(Path::new("issuer.cer"))?;
//! let signer = CfdiSigner::new(cert, key)?;
//! cfdi.sign(&signer)?;
//! cfdi.verify()?;
//! cfdi.write_to(std::io::stdout())?;
//! # Ok::<(), cfdi_core::Error>(())
//! ```
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;

use crate::comprobante::Comprobante;
use crate::comprobante::canonical::{self, CanonicalizeError};
use crate::comprobante::sign::{self, CfdiSigner, SigningError, VerifyError};
use crate::comprobante::validation::{self, ValidationError, ViolationSink};
use crate::comprobante::xml::parse::{
    ParseError, parse_comprobante, parse_comprobante_file, parse_comprobante_str,
};
use crate::comprobante::xml::{ComprobanteXml, XmlError, XmlFormat};
use crate::resources::{Registry, UnsupportedVersion};

/// Deep copy failure.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("failed to serialize document for copying: {0}")]
    Serialize(#[source] XmlError),
    #[error("failed to read back copied document: {0}")]
    Parse(#[source] ParseError),
}

/// Output failure for [`Cfdi::to_xml`] and [`Cfdi::write_to`].
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    UnsupportedVersion(#[from] UnsupportedVersion),
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error("failed to write document: {0}")]
    Io(#[from] std::io::Error),
}

/// Independent copy of `comprobante`, made by serializing and parsing it
/// back. Later changes to the source never reach the copy.
pub fn copy(comprobante: &Comprobante) -> Result<Comprobante, CopyError> {
    let xml = ComprobanteXml::new(comprobante)
        .to_xml_with_format(XmlFormat::Compact)
        .map_err(CopyError::Serialize)?;
    parse_comprobante_str(&xml).map_err(CopyError::Parse)
}

/// A document and the registry used to validate, canonicalize and sign it.
#[derive(Debug)]
pub struct Cfdi {
    comprobante: Comprobante,
    registry: Arc<Registry>,
}

impl Cfdi {
    /// Takes ownership of `comprobante`. No other handle can reach it.
    pub fn new(comprobante: Comprobante, registry: Arc<Registry>) -> Self {
        Self {
            comprobante,
            registry,
        }
    }

    /// Builds a document from a deep copy of `comprobante`.
    pub fn from_comprobante(
        comprobante: &Comprobante,
        registry: Arc<Registry>,
    ) -> Result<Self, CopyError> {
        Ok(Self::new(copy(comprobante)?, registry))
    }

    pub fn parse<R: Read>(source: R, registry: Arc<Registry>) -> Result<Self, ParseError> {
        Ok(Self::new(parse_comprobante(source)?, registry))
    }

    pub fn parse_str(xml: &str, registry: Arc<Registry>) -> Result<Self, ParseError> {
        Ok(Self::new(parse_comprobante_str(xml)?, registry))
    }

    pub fn parse_file(path: &Path, registry: Arc<Registry>) -> Result<Self, ParseError> {
        Ok(Self::new(parse_comprobante_file(path)?, registry))
    }

    /// Deep copy through the serialized form.
    pub fn try_clone(&self) -> Result<Self, CopyError> {
        Self::from_comprobante(&self.comprobante, Arc::clone(&self.registry))
    }

    pub fn document(&self) -> &Comprobante {
        &self.comprobante
    }

    pub fn into_document(self) -> Comprobante {
        self.comprobante
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn version(&self) -> &str {
        &self.comprobante.version
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(&self.comprobante, &self.registry)
    }

    pub fn validate_with(&self, sink: &mut dyn ViolationSink) -> Result<usize, ValidationError> {
        validation::validate_with(&self.comprobante, &self.registry, sink)
    }

    pub fn original_string(&self) -> Result<String, CanonicalizeError> {
        canonical::canonicalize(&self.comprobante, &self.registry)
    }

    pub fn original_bytes(&self) -> Result<Vec<u8>, CanonicalizeError> {
        canonical::original_bytes(&self.comprobante, &self.registry)
    }

    pub fn digest(&self) -> Result<Vec<u8>, CanonicalizeError> {
        sign::digest(&self.comprobante, &self.registry)
    }

    /// Signature value without touching the document.
    pub fn signature(&self, signer: &CfdiSigner) -> Result<String, SigningError> {
        signer.signature(&self.comprobante, &self.registry)
    }

    /// Fills `sello` and `certificado`.
    pub fn sign(&mut self, signer: &CfdiSigner) -> Result<(), SigningError> {
        signer.sign(&mut self.comprobante, &self.registry)
    }

    pub fn verify(&self) -> Result<(), VerifyError> {
        sign::verify(&self.comprobante, &self.registry)
    }

    pub fn verify_at(&self, at: SystemTime) -> Result<(), VerifyError> {
        sign::verify_at(&self.comprobante, &self.registry, at)
    }

    /// Pretty-printed XML with the schema location of the document's version.
    pub fn to_xml(&self) -> Result<String, WriteError> {
        let schema = self.registry.schema(&self.comprobante.version)?;
        Ok(ComprobanteXml::new(&self.comprobante)
            .with_schema_location(&schema.schema_location)
            .to_xml()?)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), WriteError> {
        writer.write_all(self.to_xml()?.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSIGNED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<cfdi:Comprobante xmlns:cfdi="http://www.sat.gob.mx/cfd/3" version="3.0" fecha="2010-03-06T20:38:12" sello="" formaDePago="PAGO EN UNA SOLA EXHIBICION" noCertificado="30001000000100000800" certificado="" subTotal="10.00" total="10.00" tipoDeComprobante="ingreso">
  <cfdi:Emisor rfc="PPL961114GZ1" nombre="PHARMA PLUS SA DE CV">
    <cfdi:DomicilioFiscal calle="AV. RIO MIXCOAC" municipio="BENITO JUAREZ" estado="MEXICO, D.F." pais="Mexico" codigoPostal="03240"/>
  </cfdi:Emisor>
  <cfdi:Receptor rfc="PEPJ8001019Q8"/>
  <cfdi:Conceptos>
    <cfdi:Concepto cantidad="1.0" descripcion="CLORUTO 500M" valorUnitario="10.00" importe="10.00"/>
  </cfdi:Conceptos>
  <cfdi:Impuestos/>
</cfdi:Comprobante>"#;

    fn cfdi() -> Cfdi {
        Cfdi::parse_str(UNSIGNED, Registry::bundled().expect("registry")).expect("parse")
    }

    #[test]
    fn copy_is_independent_of_source() {
        let mut source = cfdi().into_document();
        let copied = copy(&source).expect("copy");
        assert_eq!(copied, source);

        source.issuer.name = "OTHER".into();
        assert_eq!(copied.issuer.name, "PHARMA PLUS SA DE CV");
    }

    #[test]
    fn original_bytes_match_original_string() {
        let cfdi = cfdi();
        let original = cfdi.original_string().expect("original");
        assert!(original.starts_with("||3.0|2010-03-06T20:38:12|ingreso|"));
        assert!(original.ends_with("||"));
        assert_eq!(cfdi.original_bytes().expect("bytes"), original.into_bytes());
    }

    #[test]
    fn to_xml_includes_schema_location() {
        let xml = cfdi().to_xml().expect("xml");
        assert!(xml.contains(r#"xsi:schemaLocation="http://www.sat.gob.mx/cfd/3 cfdv3.xsd""#));

        let mut out = Vec::new();
        cfdi().write_to(&mut out).expect("write");
        assert_eq!(String::from_utf8(out).expect("utf8"), xml);
    }

    #[test]
    fn unknown_version_cannot_be_written() {
        let mut document = cfdi().into_document();
        document.version = "9.9".into();
        let cfdi = Cfdi::new(document, Registry::bundled().expect("registry"));
        assert!(matches!(cfdi.to_xml(), Err(WriteError::UnsupportedVersion(_))));
        assert!(matches!(
            cfdi.original_string(),
            Err(CanonicalizeError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            cfdi.validate(),
            Err(ValidationError::UnsupportedVersion(_))
        ));
    }
}
