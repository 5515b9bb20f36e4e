use serde::{Deserialize, Serialize};

use crate::lattice::CODESZ;
use crate::E8pError;

/// Number of 16-bit indices combined into one packed 64-bit word.
pub const PACKSZ: usize = 4;

/// Version tag of the codebook layout written alongside packed codes.
pub const CODEBOOK_VERSION: u32 = 1;

/// Fixed parameters of the E8P codebook and knobs for batch execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CodebookConfig {
    /// Coordinates per codeword.
    pub codesz: usize,
    /// Indices per packed word.
    pub packsz: usize,
    pub version: u32,
    /// Input scale that minimises reconstruction error for unit-variance
    /// Gaussian coordinates.
    pub opt_scale: f32,
    /// Divisor applied by the consuming layer to decoded values.
    pub decode_scale: f32,
    /// Batches with fewer vectors than this are quantized on the calling thread.
    pub parallel_min_rows: usize,
}

impl Default for CodebookConfig {
    fn default() -> Self {
        Self {
            codesz: CODESZ,
            packsz: PACKSZ,
            version: CODEBOOK_VERSION,
            opt_scale: 1.03,
            decode_scale: 32.0,
            parallel_min_rows: 256,
        }
    }
}

impl CodebookConfig {
    pub fn validate(&self) -> Result<(), E8pError> {
        if self.codesz != CODESZ {
            return Err(E8pError::InvalidConfig("codesz must be 8"));
        }
        if self.packsz != PACKSZ {
            return Err(E8pError::InvalidConfig("packsz must be 4"));
        }
        if self.version != CODEBOOK_VERSION {
            return Err(E8pError::InvalidConfig("unsupported codebook version"));
        }
        if !(self.opt_scale.is_finite() && self.opt_scale > 0.0) {
            return Err(E8pError::InvalidConfig("opt_scale must be positive"));
        }
        if !(self.decode_scale.is_finite() && self.decode_scale > 0.0) {
            return Err(E8pError::InvalidConfig("decode_scale must be positive"));
        }
        Ok(())
    }
}
