//! PEM armor for DER encoded objects.

use std::fmt;

use ::pem::{EncodeConfig, LineEnding, Pem};

/// Encodes DER bytes into a PEM block with the given label.
///
/// Lines end in a single LF.
pub fn encode(label: &str, der: &[u8]) -> String {
    let pem = Pem::new(label, der);
    ::pem::encode_config(&pem, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

/// Decodes the first PEM block in `data` and returns its contents.
///
/// Fails if there is no block, if the block is malformed, or if its label
/// is not `label`. Anything after the first block is ignored.
pub fn decode(label: &str, data: &[u8]) -> Result<Vec<u8>, ArmorError> {
    let pem = ::pem::parse(data).map_err(|e| ArmorError::Malformed(e.to_string()))?;
    if pem.tag() != label {
        return Err(ArmorError::UnexpectedLabel {
            expected: label.to_string(),
            found: pem.tag().to_string(),
        });
    }
    Ok(pem.contents().to_vec())
}


//------------ ArmorError ----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ArmorError {
    Malformed(String),
    UnexpectedLabel { expected: String, found: String },
}

impl fmt::Display for ArmorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArmorError::Malformed(msg) => write!(f, "not valid PEM: {msg}"),
            ArmorError::UnexpectedLabel { expected, found } => {
                write!(f, "expected PEM block '{expected}', found '{found}'")
            }
        }
    }
}

impl std::error::Error for ArmorError {}


//------------ Tests ---------------------------------------------------------
