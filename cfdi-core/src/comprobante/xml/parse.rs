//! XML parsing for CFDI documents.
use crate::comprobante::xml::constants::{CFDI_NS, ROOT_ELEMENT};
use crate::comprobante::xml::tree::{Element, read_tree};
use crate::comprobante::{
    Address, Comprobante, CustomsInfo, Decimal, FiscalAddress, IssueDate, Issuer, LineItem,
    Recipient, Taxes, TransferredTax, VoucherType, Withholding,
};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors emitted while parsing XML documents.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("XML parse error: {0}")]
    XmlParse(String),
    #[error("I/O error while reading document: {0}")]
    Io(Arc<std::io::Error>),
    #[error("unexpected root element {{{namespace}}}{name}")]
    UnexpectedRoot { namespace: String, name: String },
    #[error("element {name} is not part of the document model (inside {parent})")]
    UnexpectedElement { parent: &'static str, name: String },
    #[error("attribute {name} is not part of the document model (on {element})")]
    UnexpectedAttribute { element: &'static str, name: String },
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Parse a document from any byte stream. The stream is dropped on return.
///
/// # Examples
/// ```rust,no_run
/// use cfdi_core::comprobante::xml::parse::parse_comprobante;
///
/// let file = std::fs::File::open("cfdi.xml")?;
/// let comprobante = parse_comprobante(file)?;
/// # let _ = comprobante;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_comprobante<R: Read>(source: R) -> Result<Comprobante, ParseError> {
    let root = read_tree(source)?;
    comprobante_from_element(&root)
}

/// Parse a document from an XML string.
pub fn parse_comprobante_str(xml: &str) -> Result<Comprobante, ParseError> {
    parse_comprobante(xml.as_bytes())
}

/// Parse a document from an XML file.
pub fn parse_comprobante_file(path: &Path) -> Result<Comprobante, ParseError> {
    let file = std::fs::File::open(path).map_err(|e| ParseError::Io(Arc::new(e)))?;
    parse_comprobante(file)
}

/// Build the document records from an already parsed element tree.
pub fn comprobante_from_element(root: &Element) -> Result<Comprobante, ParseError> {
    if root.name() != ROOT_ELEMENT || root.namespace() != Some(CFDI_NS) {
        return Err(ParseError::UnexpectedRoot {
            namespace: root.namespace().unwrap_or_default().to_string(),
            name: root.name().to_string(),
        });
    }
    expect_children(
        root,
        "Comprobante",
        &["Emisor", "Receptor", "Conceptos", "Impuestos"],
    )?;
    expect_attributes(
        root,
        "Comprobante",
        &[
            "version",
            "serie",
            "folio",
            "fecha",
            "sello",
            "formaDePago",
            "noCertificado",
            "certificado",
            "condicionesDePago",
            "subTotal",
            "descuento",
            "motivoDescuento",
            "total",
            "metodoDePago",
            "tipoDeComprobante",
        ],
    )?;

    let date_text = attr_required(root, "fecha", "Comprobante@fecha")?;
    let date = IssueDate::parse(date_text.as_str()).map_err(|_| ParseError::InvalidValue {
        field: "Comprobante@fecha",
        value: date_text.clone(),
    })?;
    let voucher_text = attr_required(root, "tipoDeComprobante", "Comprobante@tipoDeComprobante")?;
    let voucher_type =
        voucher_text
            .parse::<VoucherType>()
            .map_err(|_| ParseError::InvalidValue {
                field: "Comprobante@tipoDeComprobante",
                value: voucher_text.clone(),
            })?;

    let emisor = child_required(root, "Emisor", "Comprobante/Emisor")?;
    let receptor = child_required(root, "Receptor", "Comprobante/Receptor")?;
    let conceptos = child_required(root, "Conceptos", "Comprobante/Conceptos")?;
    let impuestos = child_required(root, "Impuestos", "Comprobante/Impuestos")?;

    Ok(Comprobante {
        version: attr_required(root, "version", "Comprobante@version")?,
        series: attr_optional(root, "serie"),
        folio: attr_optional(root, "folio"),
        date,
        signature: attr_required(root, "sello", "Comprobante@sello")?,
        payment_form: attr_required(root, "formaDePago", "Comprobante@formaDePago")?,
        certificate_number: attr_required(root, "noCertificado", "Comprobante@noCertificado")?,
        certificate: attr_required(root, "certificado", "Comprobante@certificado")?,
        payment_terms: attr_optional(root, "condicionesDePago"),
        subtotal: decimal_required(root, "subTotal", "Comprobante@subTotal")?,
        discount: decimal_optional(root, "descuento", "Comprobante@descuento")?,
        discount_reason: attr_optional(root, "motivoDescuento"),
        total: decimal_required(root, "total", "Comprobante@total")?,
        payment_method: attr_optional(root, "metodoDePago"),
        voucher_type,
        issuer: parse_issuer(emisor)?,
        recipient: parse_recipient(receptor)?,
        items: parse_items(conceptos)?,
        taxes: parse_taxes(impuestos)?,
    })
}

fn parse_issuer(emisor: &Element) -> Result<Issuer, ParseError> {
    expect_children(emisor, "Emisor", &["DomicilioFiscal", "ExpedidoEn"])?;
    expect_attributes(emisor, "Emisor", &["rfc", "nombre"])?;
    let fiscal = child_required(emisor, "DomicilioFiscal", "Emisor/DomicilioFiscal")?;
    Ok(Issuer {
        rfc: attr_required(emisor, "rfc", "Emisor@rfc")?,
        name: attr_required(emisor, "nombre", "Emisor@nombre")?,
        fiscal_address: parse_fiscal_address(fiscal)?,
        issued_at: emisor
            .child("ExpedidoEn")
            .map(|el| parse_address(el, "ExpedidoEn@pais"))
            .transpose()?,
    })
}

fn parse_recipient(receptor: &Element) -> Result<Recipient, ParseError> {
    expect_children(receptor, "Receptor", &["Domicilio"])?;
    expect_attributes(receptor, "Receptor", &["rfc", "nombre"])?;
    Ok(Recipient {
        rfc: attr_required(receptor, "rfc", "Receptor@rfc")?,
        name: attr_optional(receptor, "nombre"),
        address: receptor
            .child("Domicilio")
            .map(|el| parse_address(el, "Domicilio@pais"))
            .transpose()?,
    })
}

const ADDRESS_ATTRIBUTES: &[&str] = &[
    "calle",
    "noExterior",
    "noInterior",
    "colonia",
    "localidad",
    "referencia",
    "municipio",
    "estado",
    "pais",
    "codigoPostal",
];

fn parse_fiscal_address(el: &Element) -> Result<FiscalAddress, ParseError> {
    expect_children(el, "DomicilioFiscal", &[])?;
    expect_attributes(el, "DomicilioFiscal", ADDRESS_ATTRIBUTES)?;
    Ok(FiscalAddress {
        street: attr_required(el, "calle", "DomicilioFiscal@calle")?,
        exterior_number: attr_optional(el, "noExterior"),
        interior_number: attr_optional(el, "noInterior"),
        neighborhood: attr_optional(el, "colonia"),
        locality: attr_optional(el, "localidad"),
        reference: attr_optional(el, "referencia"),
        municipality: attr_required(el, "municipio", "DomicilioFiscal@municipio")?,
        state: attr_required(el, "estado", "DomicilioFiscal@estado")?,
        country: attr_required(el, "pais", "DomicilioFiscal@pais")?,
        postal_code: attr_required(el, "codigoPostal", "DomicilioFiscal@codigoPostal")?,
    })
}

fn parse_address(el: &Element, country_field: &'static str) -> Result<Address, ParseError> {
    expect_children(el, "Ubicacion", &[])?;
    expect_attributes(el, "Ubicacion", ADDRESS_ATTRIBUTES)?;
    Ok(Address {
        street: attr_optional(el, "calle"),
        exterior_number: attr_optional(el, "noExterior"),
        interior_number: attr_optional(el, "noInterior"),
        neighborhood: attr_optional(el, "colonia"),
        locality: attr_optional(el, "localidad"),
        reference: attr_optional(el, "referencia"),
        municipality: attr_optional(el, "municipio"),
        state: attr_optional(el, "estado"),
        country: attr_required(el, "pais", country_field)?,
        postal_code: attr_optional(el, "codigoPostal"),
    })
}

fn parse_items(conceptos: &Element) -> Result<Vec<LineItem>, ParseError> {
    expect_children(conceptos, "Conceptos", &["Concepto"])?;
    expect_attributes(conceptos, "Conceptos", &[])?;
    conceptos.children_named("Concepto").map(parse_item).collect()
}

fn parse_item(el: &Element) -> Result<LineItem, ParseError> {
    expect_children(el, "Concepto", &["InformacionAduanera", "CuentaPredial"])?;
    expect_attributes(
        el,
        "Concepto",
        &[
            "cantidad",
            "unidad",
            "noIdentificacion",
            "descripcion",
            "valorUnitario",
            "importe",
        ],
    )?;

    let customs = el
        .children_named("InformacionAduanera")
        .map(parse_customs)
        .collect::<Result<Vec<_>, _>>()?;

    let mut accounts = el.children_named("CuentaPredial");
    let property_account = match accounts.next() {
        Some(account) => {
            expect_children(account, "CuentaPredial", &[])?;
            expect_attributes(account, "CuentaPredial", &["numero"])?;
            Some(attr_required(account, "numero", "CuentaPredial@numero")?)
        }
        None => None,
    };
    // InformacionAduanera and CuentaPredial are alternatives; CuentaPredial occurs once.
    if accounts.next().is_some() || (property_account.is_some() && !customs.is_empty()) {
        return Err(ParseError::UnexpectedElement {
            parent: "Concepto",
            name: "CuentaPredial".to_string(),
        });
    }

    Ok(LineItem {
        quantity: decimal_required(el, "cantidad", "Concepto@cantidad")?,
        unit: attr_optional(el, "unidad"),
        identification: attr_optional(el, "noIdentificacion"),
        description: attr_required(el, "descripcion", "Concepto@descripcion")?,
        unit_value: decimal_required(el, "valorUnitario", "Concepto@valorUnitario")?,
        amount: decimal_required(el, "importe", "Concepto@importe")?,
        customs,
        property_account,
    })
}

fn parse_customs(info: &Element) -> Result<CustomsInfo, ParseError> {
    expect_children(info, "InformacionAduanera", &[])?;
    expect_attributes(info, "InformacionAduanera", &["numero", "fecha", "aduana"])?;
    Ok(CustomsInfo {
        number: attr_required(info, "numero", "InformacionAduanera@numero")?,
        date: attr_required(info, "fecha", "InformacionAduanera@fecha")?,
        customs_office: attr_required(info, "aduana", "InformacionAduanera@aduana")?,
    })
}

fn parse_taxes(impuestos: &Element) -> Result<Taxes, ParseError> {
    expect_children(impuestos, "Impuestos", &["Retenciones", "Traslados"])?;
    expect_attributes(
        impuestos,
        "Impuestos",
        &["totalImpuestosRetenidos", "totalImpuestosTrasladados"],
    )?;

    let mut withholdings = Vec::new();
    if let Some(retenciones) = impuestos.child("Retenciones") {
        expect_children(retenciones, "Retenciones", &["Retencion"])?;
        expect_attributes(retenciones, "Retenciones", &[])?;
        for el in retenciones.children_named("Retencion") {
            expect_children(el, "Retencion", &[])?;
            expect_attributes(el, "Retencion", &["impuesto", "importe"])?;
            withholdings.push(Withholding {
                tax: attr_required(el, "impuesto", "Retencion@impuesto")?,
                amount: decimal_required(el, "importe", "Retencion@importe")?,
            });
        }
    }

    let mut transfers = Vec::new();
    if let Some(traslados) = impuestos.child("Traslados") {
        expect_children(traslados, "Traslados", &["Traslado"])?;
        expect_attributes(traslados, "Traslados", &[])?;
        for el in traslados.children_named("Traslado") {
            expect_children(el, "Traslado", &[])?;
            expect_attributes(el, "Traslado", &["impuesto", "tasa", "importe"])?;
            transfers.push(TransferredTax {
                tax: attr_required(el, "impuesto", "Traslado@impuesto")?,
                rate: decimal_required(el, "tasa", "Traslado@tasa")?,
                amount: decimal_required(el, "importe", "Traslado@importe")?,
            });
        }
    }

    Ok(Taxes {
        total_withheld: decimal_optional(
            impuestos,
            "totalImpuestosRetenidos",
            "Impuestos@totalImpuestosRetenidos",
        )?,
        total_transferred: decimal_optional(
            impuestos,
            "totalImpuestosTrasladados",
            "Impuestos@totalImpuestosTrasladados",
        )?,
        withholdings,
        transfers,
    })
}

fn expect_children(el: &Element, parent: &'static str, allowed: &[&str]) -> Result<(), ParseError> {
    match el
        .children()
        .iter()
        .find(|child| child.namespace() != Some(CFDI_NS) || !allowed.contains(&child.name()))
    {
        Some(child) => Err(ParseError::UnexpectedElement {
            parent,
            name: child.name().to_string(),
        }),
        None => Ok(()),
    }
}

/// Qualified attributes (`xsi:*`) belong to other vocabularies and are skipped.
fn expect_attributes(
    el: &Element,
    element: &'static str,
    allowed: &[&str],
) -> Result<(), ParseError> {
    match el
        .attributes()
        .find(|(name, _)| !name.contains(':') && !allowed.contains(name))
    {
        Some((name, _)) => Err(ParseError::UnexpectedAttribute {
            element,
            name: name.to_string(),
        }),
        None => Ok(()),
    }
}

fn child_required<'a>(
    el: &'a Element,
    name: &str,
    label: &'static str,
) -> Result<&'a Element, ParseError> {
    el.child(name).ok_or(ParseError::MissingField(label))
}

fn attr_required(el: &Element, name: &str, label: &'static str) -> Result<String, ParseError> {
    el.attribute(name)
        .map(str::to_string)
        .ok_or(ParseError::MissingField(label))
}

fn attr_optional(el: &Element, name: &str) -> Option<String> {
    el.attribute(name).map(str::to_string)
}

fn decimal_required(el: &Element, name: &str, label: &'static str) -> Result<Decimal, ParseError> {
    let value = attr_required(el, name, label)?;
    to_decimal(value, label)
}

fn decimal_optional(
    el: &Element,
    name: &str,
    label: &'static str,
) -> Result<Option<Decimal>, ParseError> {
    attr_optional(el, name)
        .map(|value| to_decimal(value, label))
        .transpose()
}

fn to_decimal(value: String, label: &'static str) -> Result<Decimal, ParseError> {
    Decimal::parse(value.as_str()).map_err(|_| ParseError::InvalidValue {
        field: label,
        value,
    })
}
