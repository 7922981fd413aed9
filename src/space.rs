//! Vector space parsing
//!
//! A vector space is declared as the first module argument of
//! `CREATE VIRTUAL TABLE`, e.g. `{"name":"v","dim":128,"distance_type":"l2"}`.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Distance metrics supported by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DistanceType {
    #[serde(rename = "l2")]
    L2,
    #[serde(rename = "ip")]
    InnerProduct,
    #[serde(rename = "cosine")]
    Cosine,
}

impl DistanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceType::L2 => "l2",
            DistanceType::InnerProduct => "ip",
            DistanceType::Cosine => "cosine",
        }
    }
}

/// Raw shape of the space literal. Unknown keys are a parse error.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SpaceLiteral {
    name: String,
    dim: usize,
    distance_type: DistanceType,
}

/// A named vector column with its dimension and metric.
///
/// `normalize` is forced for cosine: stored and query vectors are brought to
/// unit norm so the inner-product kernel yields the cosine distance.
#[derive(Debug, Clone)]
pub struct VectorSpace {
    pub vector_name: String,
    pub dim: usize,
    pub distance_type: DistanceType,
    pub normalize: bool,
}

impl VectorSpace {
    pub fn from_string(literal: &str) -> Result<Self> {
        let raw: SpaceLiteral = serde_json::from_str(literal)?;

        if raw.dim == 0 {
            return Err(Error::InvalidParameter(
                "dim must be a positive integer".to_string(),
            ));
        }
        // The column name is spliced into the declared CREATE TABLE schema.
        if !is_identifier(&raw.name) {
            return Err(Error::InvalidParameter(format!(
                "name {:?} is not a valid column identifier",
                raw.name
            )));
        }

        let normalize = raw.distance_type == DistanceType::Cosine;
        Ok(VectorSpace {
            vector_name: raw.name,
            dim: raw.dim,
            distance_type: raw.distance_type,
            normalize,
        })
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
