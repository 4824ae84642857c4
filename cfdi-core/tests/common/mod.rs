use cfdi_core::comprobante::sign::CfdiSigner;
use cfdi_core::comprobante::{
    Address, Comprobante, Decimal, FiscalAddress, IssueDate, Issuer, LineItem, Recipient, Taxes,
    TransferredTax, VoucherType,
};
use cfdi_core::keys::{read_certificate, read_private_key};
use std::path::{Path, PathBuf};

#[allow(dead_code)]
pub const PASSPHRASE: &str = "12345678a";

/// Original string of [`sample_comprobante`] under the bundled 3.0 template.
#[allow(dead_code)]
pub const SAMPLE_ORIGINAL_STRING: &str = "||3.0|2010-03-06T20:38:12|ingreso|PAGO EN UNA SOLA EXHIBICION|488.50|488.50|PPL961114GZ1|PHARMA PLUS SA DE CV|AV. RIO MIXCOAC|No. 140|ACACIAS|BENITO JUAREZ|MEXICO, D.F.|Mexico|03240|AV. UNIVERSIDAD|1858|OXTOPULCO|DISTRITO FEDERAL|Mexico|03910|PEPJ8001019Q8|JUAN PEREZ PEREZ|AV UNIVERSIDAD|16 EDF 3|DPTO 101|COPILCO UNIVERSIDAD|COYOACAN|DISTRITO FEDERAL|Mexico|04360|1.0|CAPSULAS|VIBRAMICINA 100MG 10|244.00|244.00|1.0|BOTELLA|CLORUTO 500M|137.93|137.93|1.0|TABLETAS|SEDEPRON 250MG 10|84.50|84.50|IVA|0.00|0.00|IVA|16.00|22.07||";

#[allow(dead_code)]
pub fn fixture(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(relative)
}

#[allow(dead_code)]
pub fn sample_comprobante() -> Comprobante {
    Comprobante {
        version: "3.0".into(),
        series: None,
        folio: None,
        date: IssueDate::parse("2010-03-06T20:38:12").expect("fecha"),
        signature: String::new(),
        payment_form: "PAGO EN UNA SOLA EXHIBICION".into(),
        certificate_number: "30001000000100000800".into(),
        certificate: String::new(),
        payment_terms: None,
        subtotal: decimal("488.50"),
        discount: None,
        discount_reason: None,
        total: decimal("488.50"),
        payment_method: None,
        voucher_type: VoucherType::Income,
        issuer: sample_issuer(),
        recipient: sample_recipient(),
        items: vec![
            item("1.0", "CAPSULAS", "VIBRAMICINA 100MG 10", "244.00"),
            item("1.0", "BOTELLA", "CLORUTO 500M", "137.93"),
            item("1.0", "TABLETAS", "SEDEPRON 250MG 10", "84.50"),
        ],
        taxes: Taxes {
            transfers: vec![
                TransferredTax {
                    tax: "IVA".into(),
                    rate: decimal("0.00"),
                    amount: decimal("0.00"),
                },
                TransferredTax {
                    tax: "IVA".into(),
                    rate: decimal("16.00"),
                    amount: decimal("22.07"),
                },
            ],
            ..Taxes::default()
        },
    }
}

#[allow(dead_code)]
pub fn signer() -> CfdiSigner {
    let key = read_private_key(&fixture("keys/issuer.key"), PASSPHRASE).expect("issuer key");
    let cert = read_certificate(&fixture("keys/issuer.cer")).expect("issuer cert");
    CfdiSigner::new(cert, key).expect("signer")
}

/// Signer for the issuer key with a certificate that expired in 2011.
#[allow(dead_code)]
pub fn expired_signer() -> CfdiSigner {
    let key = read_private_key(&fixture("keys/issuer.key"), PASSPHRASE).expect("issuer key");
    let cert = read_certificate(&fixture("keys/expired.cer.pem")).expect("expired cert");
    CfdiSigner::new(cert, key).expect("signer")
}

#[allow(dead_code)]
pub fn decimal(value: &str) -> Decimal {
    Decimal::parse(value).expect("decimal")
}

fn sample_issuer() -> Issuer {
    Issuer {
        rfc: "PPL961114GZ1".into(),
        name: "PHARMA PLUS SA DE CV".into(),
        fiscal_address: FiscalAddress {
            street: "AV. RIO MIXCOAC".into(),
            exterior_number: Some("No. 140".into()),
            interior_number: None,
            neighborhood: Some("ACACIAS".into()),
            locality: None,
            reference: None,
            municipality: "BENITO JUAREZ".into(),
            state: "MEXICO, D.F.".into(),
            country: "Mexico".into(),
            postal_code: "03240".into(),
        },
        issued_at: Some(Address {
            street: Some("AV. UNIVERSIDAD".into()),
            exterior_number: Some("1858".into()),
            neighborhood: Some("OXTOPULCO".into()),
            state: Some("DISTRITO FEDERAL".into()),
            postal_code: Some("03910".into()),
            ..Address::new("Mexico")
        }),
    }
}

fn sample_recipient() -> Recipient {
    Recipient {
        rfc: "PEPJ8001019Q8".into(),
        name: Some("JUAN PEREZ PEREZ".into()),
        address: Some(Address {
            street: Some("AV UNIVERSIDAD".into()),
            exterior_number: Some("16 EDF 3".into()),
            interior_number: Some("DPTO 101".into()),
            neighborhood: Some("COPILCO UNIVERSIDAD".into()),
            municipality: Some("COYOACAN".into()),
            state: Some("DISTRITO FEDERAL".into()),
            postal_code: Some("04360".into()),
            ..Address::new("Mexico")
        }),
    }
}

fn item(quantity: &str, unit: &str, description: &str, amount: &str) -> LineItem {
    LineItem {
        quantity: decimal(quantity),
        unit: Some(unit.into()),
        identification: None,
        description: description.into(),
        unit_value: decimal(amount),
        amount: decimal(amount),
        customs: Vec::new(),
        property_account: None,
    }
}
