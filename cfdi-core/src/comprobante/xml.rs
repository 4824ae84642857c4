//! XML serialization for CFDI documents.
use super::{
    Address, Comprobante, CustomsInfo, FiscalAddress, Issuer, LineItem, Recipient, Taxes,
};

use constants::{CFDI_NS, XSI_NS};
use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

pub(crate) mod constants;
pub mod parse;
pub mod tree;

pub use tree::{Element, read_tree};

/// XML serialization error.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("failed to serialize document to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
    #[error("failed to read back serialized document: {source}")]
    Reparse {
        #[from]
        source: parse::ParseError,
    },
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

/// Wrapper for serializing a [`Comprobante`] to XML.
///
/// # Examples
/// ```rust,no_run
/// use cfdi_core::comprobante::Comprobante;
/// use cfdi_core::comprobante::xml::ComprobanteXml;
///
/// let comprobante: Comprobante = unimplemented!();
/// let xml = ComprobanteXml::new(&comprobante)
///     .with_schema_location("http://www.sat.gob.mx/cfd/3 cfdv3.xsd")
///     .to_xml()?;
/// # let _ = xml;
/// # Ok::<(), cfdi_core::comprobante::xml::XmlError>(())
/// ```
pub struct ComprobanteXml<'a> {
    comprobante: &'a Comprobante,
    schema_location: Option<&'a str>,
}

impl<'a> ComprobanteXml<'a> {
    pub fn new(comprobante: &'a Comprobante) -> Self {
        Self {
            comprobante,
            schema_location: None,
        }
    }

    /// Emits `xsi:schemaLocation` on the root element.
    pub fn with_schema_location(mut self, schema_location: &'a str) -> Self {
        self.schema_location = Some(schema_location);
        self
    }

    pub fn to_xml(&self) -> Result<String, XmlError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }

    pub fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, XmlError> {
        let mut buffer = String::with_capacity(4096);
        buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        buffer.push('\n');

        {
            let mut serializer = QuickXmlSerializer::new(&mut buffer);
            if let XmlFormat::Pretty {
                indent_char,
                indent_size,
            } = format
            {
                serializer.indent(indent_char, indent_size);
            }
            self.serialize(serializer)?;
        }

        Ok(buffer)
    }
}

/// Element tree of the serialized document, as seen by validation and
/// canonicalization.
pub(crate) fn comprobante_tree(comprobante: &Comprobante) -> Result<Element, XmlError> {
    let xml = ComprobanteXml::new(comprobante).to_xml_with_format(XmlFormat::Compact)?;
    Ok(read_tree(xml.as_bytes())?)
}

fn optional_attr<S: SerializeStruct>(
    st: &mut S,
    key: &'static str,
    value: Option<&str>,
) -> Result<(), S::Error> {
    match value {
        Some(value) => st.serialize_field(key, value),
        None => Ok(()),
    }
}

struct FiscalAddressXml<'a>(&'a FiscalAddress);

impl<'a> Serialize for FiscalAddressXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let address = self.0;
        let mut st = s.serialize_struct("cfdi:DomicilioFiscal", 0)?;
        st.serialize_field("@calle", &address.street)?;
        optional_attr(&mut st, "@noExterior", address.exterior_number.as_deref())?;
        optional_attr(&mut st, "@noInterior", address.interior_number.as_deref())?;
        optional_attr(&mut st, "@colonia", address.neighborhood.as_deref())?;
        optional_attr(&mut st, "@localidad", address.locality.as_deref())?;
        optional_attr(&mut st, "@referencia", address.reference.as_deref())?;
        st.serialize_field("@municipio", &address.municipality)?;
        st.serialize_field("@estado", &address.state)?;
        st.serialize_field("@pais", &address.country)?;
        st.serialize_field("@codigoPostal", &address.postal_code)?;
        st.end()
    }
}

struct AddressXml<'a>(&'static str, &'a Address);

impl<'a> Serialize for AddressXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let address = self.1;
        let mut st = s.serialize_struct(self.0, 0)?;
        optional_attr(&mut st, "@calle", address.street.as_deref())?;
        optional_attr(&mut st, "@noExterior", address.exterior_number.as_deref())?;
        optional_attr(&mut st, "@noInterior", address.interior_number.as_deref())?;
        optional_attr(&mut st, "@colonia", address.neighborhood.as_deref())?;
        optional_attr(&mut st, "@localidad", address.locality.as_deref())?;
        optional_attr(&mut st, "@referencia", address.reference.as_deref())?;
        optional_attr(&mut st, "@municipio", address.municipality.as_deref())?;
        optional_attr(&mut st, "@estado", address.state.as_deref())?;
        st.serialize_field("@pais", &address.country)?;
        optional_attr(&mut st, "@codigoPostal", address.postal_code.as_deref())?;
        st.end()
    }
}

struct IssuerXml<'a>(&'a Issuer);

impl<'a> Serialize for IssuerXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let issuer = self.0;
        let mut st = s.serialize_struct("cfdi:Emisor", 0)?;
        st.serialize_field("@rfc", &issuer.rfc)?;
        st.serialize_field("@nombre", &issuer.name)?;
        st.serialize_field("cfdi:DomicilioFiscal", &FiscalAddressXml(&issuer.fiscal_address))?;
        if let Some(issued_at) = issuer.issued_at.as_ref() {
            st.serialize_field("cfdi:ExpedidoEn", &AddressXml("cfdi:ExpedidoEn", issued_at))?;
        }
        st.end()
    }
}

struct RecipientXml<'a>(&'a Recipient);

impl<'a> Serialize for RecipientXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let recipient = self.0;
        let mut st = s.serialize_struct("cfdi:Receptor", 0)?;
        st.serialize_field("@rfc", &recipient.rfc)?;
        optional_attr(&mut st, "@nombre", recipient.name.as_deref())?;
        if let Some(address) = recipient.address.as_ref() {
            st.serialize_field("cfdi:Domicilio", &AddressXml("cfdi:Domicilio", address))?;
        }
        st.end()
    }
}

struct LineItemXml<'a>(&'a LineItem);

impl<'a> Serialize for LineItemXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let item = self.0;
        let mut st = s.serialize_struct("cfdi:Concepto", 0)?;
        st.serialize_field("@cantidad", item.quantity.as_str())?;
        optional_attr(&mut st, "@unidad", item.unit.as_deref())?;
        optional_attr(&mut st, "@noIdentificacion", item.identification.as_deref())?;
        st.serialize_field("@descripcion", &item.description)?;
        st.serialize_field("@valorUnitario", item.unit_value.as_str())?;
        st.serialize_field("@importe", item.amount.as_str())?;
        for customs in &item.customs {
            st.serialize_field("cfdi:InformacionAduanera", &CustomsInfoXml(customs))?;
        }
        if let Some(number) = item.property_account.as_deref() {
            st.serialize_field("cfdi:CuentaPredial", &PropertyAccountXml(number))?;
        }
        st.end()
    }
}

struct CustomsInfoXml<'a>(&'a CustomsInfo);

impl<'a> Serialize for CustomsInfoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cfdi:InformacionAduanera", 0)?;
        st.serialize_field("@numero", &self.0.number)?;
        st.serialize_field("@fecha", &self.0.date)?;
        st.serialize_field("@aduana", &self.0.customs_office)?;
        st.end()
    }
}

struct PropertyAccountXml<'a>(&'a str);

impl<'a> Serialize for PropertyAccountXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cfdi:CuentaPredial", 0)?;
        st.serialize_field("@numero", self.0)?;
        st.end()
    }
}

struct LineItemsXml<'a>(&'a [LineItem]);

impl<'a> Serialize for LineItemsXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("cfdi:Conceptos", 0)?;
        for item in self.0 {
            st.serialize_field("cfdi:Concepto", &LineItemXml(item))?;
        }
        st.end()
    }
}

fn tax_lines<'a>(taxes: &'a Taxes, withheld: bool) -> impl Serialize + 'a {
    struct TaxLinesSer<'a> {
        taxes: &'a Taxes,
        withheld: bool,
    }

    impl<'a> Serialize for TaxLinesSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            if self.withheld {
                let mut st = s.serialize_struct("cfdi:Retenciones", 0)?;
                for line in &self.taxes.withholdings {
                    st.serialize_field("cfdi:Retencion", &WithholdingSer(line))?;
                }
                st.end()
            } else {
                let mut st = s.serialize_struct("cfdi:Traslados", 0)?;
                for line in &self.taxes.transfers {
                    st.serialize_field("cfdi:Traslado", &TransferSer(line))?;
                }
                st.end()
            }
        }
    }

    struct WithholdingSer<'a>(&'a super::Withholding);

    impl<'a> Serialize for WithholdingSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("cfdi:Retencion", 0)?;
            st.serialize_field("@impuesto", &self.0.tax)?;
            st.serialize_field("@importe", self.0.amount.as_str())?;
            st.end()
        }
    }

    struct TransferSer<'a>(&'a super::TransferredTax);

    impl<'a> Serialize for TransferSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("cfdi:Traslado", 0)?;
            st.serialize_field("@impuesto", &self.0.tax)?;
            st.serialize_field("@tasa", self.0.rate.as_str())?;
            st.serialize_field("@importe", self.0.amount.as_str())?;
            st.end()
        }
    }

    TaxLinesSer { taxes, withheld }
}

struct TaxesXml<'a>(&'a Taxes);

impl<'a> Serialize for TaxesXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let taxes = self.0;
        let mut st = s.serialize_struct("cfdi:Impuestos", 0)?;
        optional_attr(
            &mut st,
            "@totalImpuestosRetenidos",
            taxes.total_withheld.as_ref().map(|d| d.as_str()),
        )?;
        optional_attr(
            &mut st,
            "@totalImpuestosTrasladados",
            taxes.total_transferred.as_ref().map(|d| d.as_str()),
        )?;
        if !taxes.withholdings.is_empty() {
            st.serialize_field("cfdi:Retenciones", &tax_lines(taxes, true))?;
        }
        if !taxes.transfers.is_empty() {
            st.serialize_field("cfdi:Traslados", &tax_lines(taxes, false))?;
        }
        st.end()
    }
}

impl<'a> Serialize for ComprobanteXml<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let doc = self.comprobante;

        let mut root = serializer.serialize_struct("cfdi:Comprobante", 0)?;

        // ---- namespaces ----
        root.serialize_field("@xmlns:cfdi", CFDI_NS)?;
        if let Some(location) = self.schema_location {
            root.serialize_field("@xmlns:xsi", XSI_NS)?;
            root.serialize_field("@xsi:schemaLocation", location)?;
        }

        // ---- header ----
        root.serialize_field("@version", &doc.version)?;
        optional_attr(&mut root, "@serie", doc.series.as_deref())?;
        optional_attr(&mut root, "@folio", doc.folio.as_deref())?;
        root.serialize_field("@fecha", doc.date.as_str())?;
        root.serialize_field("@sello", &doc.signature)?;
        root.serialize_field("@formaDePago", &doc.payment_form)?;
        root.serialize_field("@noCertificado", &doc.certificate_number)?;
        root.serialize_field("@certificado", &doc.certificate)?;
        optional_attr(&mut root, "@condicionesDePago", doc.payment_terms.as_deref())?;
        root.serialize_field("@subTotal", doc.subtotal.as_str())?;
        optional_attr(&mut root, "@descuento", doc.discount.as_ref().map(|d| d.as_str()))?;
        optional_attr(&mut root, "@motivoDescuento", doc.discount_reason.as_deref())?;
        root.serialize_field("@total", doc.total.as_str())?;
        optional_attr(&mut root, "@metodoDePago", doc.payment_method.as_deref())?;
        root.serialize_field("@tipoDeComprobante", doc.voucher_type.as_str())?;

        // ---- body ----
        root.serialize_field("cfdi:Emisor", &IssuerXml(&doc.issuer))?;
        root.serialize_field("cfdi:Receptor", &RecipientXml(&doc.recipient))?;
        root.serialize_field("cfdi:Conceptos", &LineItemsXml(&doc.items))?;
        root.serialize_field("cfdi:Impuestos", &TaxesXml(&doc.taxes))?;

        root.end()
    }
}
