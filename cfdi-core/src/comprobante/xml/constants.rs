pub(crate) const CFDI_NS: &str = "http://www.sat.gob.mx/cfd/3";
pub(crate) const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

pub(crate) const ROOT_ELEMENT: &str = "Comprobante";

// Root attributes carrying signature material.
pub(crate) const SIGNATURE_ATTR: &str = "sello";
pub(crate) const CERTIFICATE_ATTR: &str = "certificado";
pub(crate) const SIGNATURE_FIELDS: [&str; 2] = [SIGNATURE_ATTR, CERTIFICATE_ATTR];
