//! E8P codebook: a 65536-entry vector-quantization grid over the E8 lattice
//! shifted by 1/4, with 16-bit codeword indices and the packed 64-bit layout
//! consumed by the fused decode kernels.
//!
//! The tables are built once per process (see [`tables`]) and shared
//! read-only afterwards.

pub mod config;
pub mod decode;
pub mod grid;
pub mod io;
pub mod lattice;
pub mod matrix;
pub mod packing;
pub mod quantizer;

mod math;

pub use config::CodebookConfig;
pub use decode::{decode_index, decode_packed, decode_packed_scaled, unpack_indices};
pub use grid::{tables, CodebookTables};
pub use lattice::{LatticePoint, PackedAbsTable, CODESZ};
pub use matrix::{IndexMatrix, Matrix};
pub use packing::{pack_indices, PackedIndexMatrix};
pub use quantizer::{quantization_mse, E8pCodebook, QuantizedVector};


/// Errors raised while building the codebook, quantizing, packing or
/// persisting packed codes.
#[derive(thiserror::Error, Debug)]
pub enum E8pError {
    /// Returned when an input vector or row does not have the expected width.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Returned when a matrix does not satisfy the packer's tiling constraints.
    #[error("invalid shape {rows}x{cols}: {reason}")]
    InvalidShape {
        rows: usize,
        cols: usize,
        reason: &'static str,
    },
    /// Returned when an invalid configuration is supplied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Returned when a constant table does not have the shape the codebook requires.
    #[error("corrupt codebook table: {0}")]
    CorruptTable(String),
    /// Returned when persistence encounters an I/O failure.
    #[error("i/o error while reading or writing packed codes: {0}")]
    Io(#[from] std::io::Error),
    /// Returned when the persisted bytes are inconsistent or corrupt.
    #[error("invalid persisted codes: {0}")]
    InvalidPersistence(&'static str),
}
