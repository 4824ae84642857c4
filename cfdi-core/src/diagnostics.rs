//! Hex rendering of digests and other byte strings for logs and the CLI.
use std::fmt::{self, Display, Formatter};

/// Displays bytes as space-separated lowercase hex pairs: `0a 1b ff`.
#[derive(Debug, Clone, Copy)]
pub struct HexDump<'a>(pub &'a [u8]);

impl Display for HexDump<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// `"<title>: <hex dump>"`.
pub fn dump(title: &str, bytes: &[u8]) -> String {
    format!("{title}: {}", HexDump(bytes))
}
