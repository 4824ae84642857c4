//! CFDI document records ("Comprobante") and their value types.
pub mod canonical;
pub mod sign;
pub mod validation;
pub mod xml;

use chrono::NaiveDateTime;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Lexical form used for `fecha` when reading and writing documents.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Lexical form of `xs:date` values such as `InformacionAduanera@fecha`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Error returned when a value does not match the `xs:decimal` lexical space.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecimalError {
    #[error("invalid decimal value: {value:?}")]
    Invalid { value: String },
}

/// Decimal amount kept in its exact lexical form.
///
/// The original string has to reach the canonical string byte for byte,
/// so `488.50` stays `488.50` and is never normalized to `488.5`.
///
/// # Examples
/// ```rust
/// use cfdi_core::comprobante::Decimal;
///
/// let amount = Decimal::parse("488.50")?;
/// assert_eq!(amount.as_str(), "488.50");
/// assert_eq!(amount.fraction_digits(), 2);
/// assert!(Decimal::parse("4,88").is_err());
/// # Ok::<(), cfdi_core::comprobante::DecimalError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal(String);

impl Decimal {
    pub fn parse<S: Into<String>>(value: S) -> Result<Self, DecimalError> {
        let value = value.into();
        let trimmed = value.trim();
        if is_decimal_lexical(trimmed) {
            Ok(Decimal(trimmed.to_string()))
        } else {
            Err(DecimalError::Invalid { value })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of digits after the decimal point, as written.
    pub fn fraction_digits(&self) -> usize {
        self.0
            .split_once('.')
            .map(|(_, fraction)| fraction.len())
            .unwrap_or(0)
    }
}

pub(crate) fn is_decimal_lexical(value: &str) -> bool {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (unsigned, ""),
    };
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    !(integer.is_empty() && fraction.is_empty()) && all_digits(integer) && all_digits(fraction)
}

impl Display for Decimal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Decimal {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for Decimal {
    type Err = DecimalError;
    fn from_str(s: &str) -> Result<Self, DecimalError> {
        Decimal::parse(s)
    }
}

impl TryFrom<&str> for Decimal {
    type Error = DecimalError;
    fn try_from(value: &str) -> Result<Self, DecimalError> {
        Decimal::parse(value)
    }
}

/// Error returned when `fecha` is not a local `xs:dateTime`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueDateError {
    #[error("invalid date-time value: {value:?}")]
    Invalid { value: String },
}

/// `fecha`, kept as written alongside its parsed value.
///
/// Fractional seconds survive untouched: `20:38:12.5` is written back as
/// `20:38:12.5`, not `20:38:12.500`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueDate {
    lexical: String,
    value: NaiveDateTime,
}

impl IssueDate {
    pub fn parse<S: Into<String>>(value: S) -> Result<Self, IssueDateError> {
        let value = value.into();
        let trimmed = value.trim();
        match NaiveDateTime::parse_from_str(trimmed, DATE_TIME_FORMAT) {
            Ok(parsed) => Ok(IssueDate {
                lexical: trimmed.to_string(),
                value: parsed,
            }),
            Err(_) => Err(IssueDateError::Invalid { value }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.lexical
    }

    pub fn value(&self) -> NaiveDateTime {
        self.value
    }
}

impl From<NaiveDateTime> for IssueDate {
    fn from(value: NaiveDateTime) -> Self {
        IssueDate {
            lexical: value.format(DATE_TIME_FORMAT).to_string(),
            value,
        }
    }
}

impl Display for IssueDate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lexical)
    }
}

impl AsRef<str> for IssueDate {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for IssueDate {
    type Err = IssueDateError;
    fn from_str(s: &str) -> Result<Self, IssueDateError> {
        IssueDate::parse(s)
    }
}

/// `tipoDeComprobante`: the effect the document has on the issuer's income.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoucherType {
    Income,
    Expense,
    Transfer,
}

/// Error returned when parsing a [`VoucherType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoucherTypeParseError {
    #[error("invalid voucher type: {input}")]
    Invalid { input: String },
}

impl VoucherType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoucherType::Income => "ingreso",
            VoucherType::Expense => "egreso",
            VoucherType::Transfer => "traslado",
        }
    }
}

impl FromStr for VoucherType {
    type Err = VoucherTypeParseError;
    fn from_str(s: &str) -> Result<Self, VoucherTypeParseError> {
        match s.trim() {
            "ingreso" => Ok(VoucherType::Income),
            "egreso" => Ok(VoucherType::Expense),
            "traslado" => Ok(VoucherType::Transfer),
            _ => Err(VoucherTypeParseError::Invalid {
                input: s.to_string(),
            }),
        }
    }
}

impl Display for VoucherType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issuer fiscal address (`t_UbicacionFiscal`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiscalAddress {
    pub street: String,
    pub exterior_number: Option<String>,
    pub interior_number: Option<String>,
    pub neighborhood: Option<String>,
    pub locality: Option<String>,
    pub reference: Option<String>,
    pub municipality: String,
    pub state: String,
    pub country: String,
    pub postal_code: String,
}

/// Generic location (`t_Ubicacion`); only the country is mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub street: Option<String>,
    pub exterior_number: Option<String>,
    pub interior_number: Option<String>,
    pub neighborhood: Option<String>,
    pub locality: Option<String>,
    pub reference: Option<String>,
    pub municipality: Option<String>,
    pub state: Option<String>,
    pub country: String,
    pub postal_code: Option<String>,
}

impl Address {
    pub fn new(country: impl Into<String>) -> Self {
        Self {
            street: None,
            exterior_number: None,
            interior_number: None,
            neighborhood: None,
            locality: None,
            reference: None,
            municipality: None,
            state: None,
            country: country.into(),
            postal_code: None,
        }
    }
}

/// `Emisor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuer {
    pub rfc: String,
    pub name: String,
    pub fiscal_address: FiscalAddress,
    pub issued_at: Option<Address>,
}

/// `Receptor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub rfc: String,
    pub name: Option<String>,
    pub address: Option<Address>,
}

/// `InformacionAduanera`: customs entry for first-hand sales of imported goods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomsInfo {
    pub number: String,
    /// `xs:date`, as written.
    pub date: String,
    pub customs_office: String,
}

/// `Concepto`: one line item.
///
/// `customs` and `property_account` are alternatives; a line carries at
/// most one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub identification: Option<String>,
    pub description: String,
    pub unit_value: Decimal,
    pub amount: Decimal,
    pub customs: Vec<CustomsInfo>,
    /// `CuentaPredial@numero`.
    pub property_account: Option<String>,
}

/// `Retencion`: a withheld tax line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withholding {
    pub tax: String,
    pub amount: Decimal,
}

/// `Traslado`: a transferred tax line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferredTax {
    pub tax: String,
    pub rate: Decimal,
    pub amount: Decimal,
}

/// `Impuestos`. Empty vectors mean the wrapper element is absent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Taxes {
    pub total_withheld: Option<Decimal>,
    pub total_transferred: Option<Decimal>,
    pub withholdings: Vec<Withholding>,
    pub transfers: Vec<TransferredTax>,
}

/// The tax invoice.
///
/// `signature` (`sello`) and `certificate` (`certificado`) start empty and
/// are populated together by signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comprobante {
    pub version: String,
    pub series: Option<String>,
    pub folio: Option<String>,
    pub date: IssueDate,
    pub signature: String,
    pub payment_form: String,
    pub certificate_number: String,
    pub certificate: String,
    pub payment_terms: Option<String>,
    pub subtotal: Decimal,
    pub discount: Option<Decimal>,
    pub discount_reason: Option<String>,
    pub total: Decimal,
    pub payment_method: Option<String>,
    pub voucher_type: VoucherType,
    pub issuer: Issuer,
    pub recipient: Recipient,
    pub items: Vec<LineItem>,
    pub taxes: Taxes,
}

/// Signature lifecycle of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureState {
    Unsigned,
    Signed,
    /// Exactly one of the two signature fields is populated.
    Inconsistent,
}

impl Comprobante {
    pub fn signature_state(&self) -> SignatureState {
        match (self.signature.is_empty(), self.certificate.is_empty()) {
            (true, true) => SignatureState::Unsigned,
            (false, false) => SignatureState::Signed,
            _ => SignatureState::Inconsistent,
        }
    }

    /// Clears `sello` and `certificado`.
    pub fn clear_signature(&mut self) {
        self.signature.clear();
        self.certificate.clear();
    }
}
