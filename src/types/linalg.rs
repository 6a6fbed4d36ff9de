//! Linear algebra type system for the error-state filter
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the 4-state fusion filter implementation.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 4;

/// Packed length of a row-major upper-triangular 4x4 factor, diagonal included.
pub const UD_LEN: usize = STATE_DIM * (STATE_DIM + 1) / 2;

// ===== Measurement Dimensions =====
pub const MEAS_DIM_GNSS: usize = 3; // (lat, lon, heading)

// ===== Error-State Filter Types =====
pub type StateVec = SVector<f64, STATE_DIM>;
pub type StateMat = SMatrix<f64, STATE_DIM, STATE_DIM>;
