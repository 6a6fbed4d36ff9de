//! Correction stage of a pedestrian dead-reckoning (PDR) navigation pipeline.
//!
//! A step-based dead reckoner drifts: heading bias bends the track, step
//! length scale error stretches it. This crate fuses that trajectory with
//! intermittent absolute GNSS fixes through a 4-state error-state Kalman
//! filter carried on a UD-factorized covariance, producing a corrected
//! trajectory at every epoch.
//!
//! The whole cycle is a synchronous per-epoch state transition with no
//! dynamic allocation and no internal concurrency; the caller owns the filter
//! and the sample for the duration of each call.
//!
//! ```
//! use pdr_fusion_rs::{FusionConfig, FusionFilter, NavSample};
//!
//! let mut filter = FusionFilter::new(FusionConfig::default());
//! let mut sample = NavSample {
//!     epoch_ms: 1000,
//!     pdr_latitude: 31.0,
//!     pdr_longitude: 121.0,
//!     pdr_heading: 0.0,
//!     pdr_step_length: 0.7,
//!     pdr_step_frequency: 1.5,
//!     gnss_latitude: 31.00001,
//!     gnss_longitude: 121.00001,
//!     gnss_heading: 0.02,
//! };
//! let status = filter.run_cycle(sample.epoch_ms, &mut sample);
//! assert!(!status.is_no_fix());
//! ```

pub mod fusion;
pub mod geodesy;
pub mod kalman;
pub mod types;

pub use fusion::{elapsed_seconds, FusionConfig, FusionFilter};
pub use kalman::{UdFilter, UpdateMode};
pub use types::{FusionStatus, NavSample};
