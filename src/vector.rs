//! Vector values and the blob codec
//!
//! Vectors travel through SQLite as blobs of contiguous little-endian f32
//! values, so a valid blob is non-empty and a multiple of 4 bytes long.

use bytemuck::cast_slice;

use crate::error::{Error, Result};

/// An owned f32 vector of fixed dimension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    pub fn new(data: Vec<f32>) -> Self {
        Vector { data }
    }

    /// Decode a vector from its blob encoding.
    ///
    /// The dimension is implied by the blob length: `len / 4`.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if blob.is_empty() {
            return Err(Error::InvalidVectorFormat("blob is empty".to_string()));
        }
        if blob.len() % 4 != 0 {
            return Err(Error::InvalidVectorFormat(format!(
                "blob length {} is not a multiple of 4",
                blob.len()
            )));
        }

        let mut data = Vec::with_capacity(blob.len() / 4);
        for chunk in blob.chunks_exact(4) {
            let bytes: [u8; 4] = chunk.try_into().unwrap();
            data.push(f32::from_le_bytes(bytes));
        }
        Ok(Vector { data })
    }

    /// Encode to the blob format; bit-exact inverse of [`Vector::from_blob`].
    pub fn to_blob(&self) -> Vec<u8> {
        cast_slice(&self.data).to_vec()
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Return a unit-norm copy. The zero vector is returned unchanged.
    pub fn normalize(&self) -> Vector {
        let norm = self.data.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return self.clone();
        }
        Vector {
            data: self.data.iter().map(|x| x / norm).collect(),
        }
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Vector::new(data)
    }
}
