//! HNSW index options parsing
//!
//! Options are declared as the second module argument of
//! `CREATE VIRTUAL TABLE`, e.g.
//! `{"max_elements":100000,"M":16,"ef_construction":200,"random_seed":100}`.
//! Every key is optional.

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_MAX_ELEMENTS: usize = 10_000;
pub const DEFAULT_M: usize = 16;
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;
pub const DEFAULT_RANDOM_SEED: usize = 100;

/// Raw shape of the options literal. Unknown keys are a parse error.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionsLiteral {
    max_elements: Option<i64>,
    #[serde(rename = "M")]
    m: Option<i64>,
    ef_construction: Option<i64>,
    random_seed: Option<i64>,
}

/// Build parameters for the HNSW graph.
///
/// `max_elements` is a hard capacity: inserts past it fail. `random_seed` is
/// validated and retained but the embedded graph library does not expose
/// level-generator seeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub max_elements: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub random_seed: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            max_elements: DEFAULT_MAX_ELEMENTS,
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            random_seed: DEFAULT_RANDOM_SEED,
        }
    }
}

impl IndexOptions {
    pub fn from_string(literal: &str) -> Result<Self> {
        let raw: OptionsLiteral = serde_json::from_str(literal)?;
        let defaults = IndexOptions::default();

        Ok(IndexOptions {
            max_elements: checked("max_elements", raw.max_elements, defaults.max_elements)?,
            m: checked("M", raw.m, defaults.m)?,
            ef_construction: checked("ef_construction", raw.ef_construction, defaults.ef_construction)?,
            random_seed: checked("random_seed", raw.random_seed, defaults.random_seed)?,
        })
    }
}

// Accepted range is [1, 2^31) for every option.
fn checked(key: &str, value: Option<i64>, default: usize) -> Result<usize> {
    match value {
        None => Ok(default),
        Some(v) if (1..=i64::from(i32::MAX)).contains(&v) => Ok(v as usize),
        Some(v) => Err(Error::InvalidParameter(format!(
            "{key} must be in [1, 2147483648), got {v}"
        ))),
    }
}
