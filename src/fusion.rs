// fusion.rs — GNSS correction stage for a pedestrian dead-reckoning pipeline
//
// Everything in this module is independent of:
//   - the step detector / heading integrator producing the PDR trajectory
//   - GNSS acquisition and fix quality bookkeeping
//   - any I/O, persistence or runtime around the filter
//
// It takes one epoch's PDR + GNSS readings in, runs one error-state Kalman
// cycle, and writes the corrected trajectory back into the sample. This means
// you can unit-test it with synthetic epochs and replay recorded walks without
// touching the upstream pipeline.

use log::debug;
use std::f64::consts::PI;

use crate::geodesy::{meridian_radius, normal_radius};
use crate::kalman::ud::{UdFilter, UpdateMode};
use crate::types::{FusionStatus, NavSample, StateMat, StateVec, MEAS_DIM_GNSS, STATE_DIM};

const DEG2RAD: f64 = PI / 180.0;

// ─── Configuration ───────────────────────────────────────────────────────────

/// All tunables of the correction stage. `Default` carries the values the
/// filter was tuned with; override individual fields for other sensor setups.
#[derive(Clone, Debug)]
pub struct FusionConfig {
    /// Initial one-sigma uncertainties seeding the covariance diagonal:
    /// [lat m, lon m, heading rad, step length m].
    pub init_sigmas: [f64; STATE_DIM],

    /// Time constant of the first-order Gauss-Markov step-length error [s].
    pub step_len_time_constant: f64,

    /// Continuous-time process-noise sigmas, squared into the spectral
    /// densities: [lat, lon, heading rad/s, step length].
    pub process_noise_sigmas: [f64; STATE_DIM],

    /// GNSS measurement one-sigma noise: [lat m, lon m, heading rad].
    pub gnss_noise_sigmas: [f64; MEAS_DIM_GNSS],

    /// Position corrections larger than this are withheld [m].
    pub position_gate_m: f64,

    /// Heading corrections larger than this are withheld [rad].
    pub heading_gate_rad: f64,

    /// Degeneracy-retry bound handed to the scalar update.
    pub update_retry_limit: u32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            init_sigmas: [0.1, 0.1, 10.0 * DEG2RAD, 0.1],
            step_len_time_constant: 100.0,
            process_noise_sigmas: [0.1, 0.1, 5.0 * DEG2RAD, 0.1],
            gnss_noise_sigmas: [20.0, 20.0, 10.0 * DEG2RAD],
            position_gate_m: 10.0,
            heading_gate_rad: 10.0 * DEG2RAD,
            update_retry_limit: 5,
        }
    }
}

// ─── Time arithmetic ─────────────────────────────────────────────────────────

const EPOCH_WRAP: f64 = u32::MAX as f64 + 1.0;

/// Elapsed time between two millisecond epoch counters, wraparound-safe.
///
/// A zero `last_ms` means no prior epoch and yields the 1 s bootstrap default;
/// `last_ms > now_ms` means the counter wrapped at 2^32.
pub fn elapsed_seconds(now_ms: u32, last_ms: u32) -> f64 {
    if last_ms == 0 {
        1.0
    } else if last_ms > now_ms {
        (EPOCH_WRAP - f64::from(last_ms) + f64::from(now_ms)) / 1000.0
    } else {
        f64::from(now_ms - last_ms) / 1000.0
    }
}

/// Wrap an angle into (-pi, pi].
fn wrap_pi(angle: f64) -> f64 {
    if angle > PI {
        angle - 2.0 * PI
    } else if angle < -PI {
        angle + 2.0 * PI
    } else {
        angle
    }
}

// ─── Fusion filter ───────────────────────────────────────────────────────────

/// Error-state fusion filter: one instance per walking session.
///
/// The filter tracks the *error* between the dead-reckoned trajectory and
/// truth, not the trajectory itself. Each [`FusionFilter::run_cycle`] call
/// rebuilds the error dynamics around the current PDR motion, folds the GNSS
/// fix in, and feeds gated corrections back into the sample.
pub struct FusionFilter {
    config: FusionConfig,
    kalman: UdFilter,
}

impl FusionFilter {
    /// One-time setup; must run exactly once before the first cycle.
    pub fn new(config: FusionConfig) -> Self {
        let kalman = UdFilter::new(&config.init_sigmas);
        FusionFilter { config, kalman }
    }

    /// The per-epoch entry point: model build, predict, GNSS update and
    /// trajectory feedback, in that fixed order, exactly once.
    pub fn run_cycle(&mut self, epoch_ms: u32, sample: &mut NavSample) -> FusionStatus {
        self.build_process_model(epoch_ms, sample);
        self.kalman.predict();
        self.gnss_update(sample);
        let status = self.apply_corrections(sample);
        debug!(
            "cycle at {} ms: status {:#04x}, error state {:?}",
            epoch_ms,
            status.bits(),
            self.kalman.x.as_slice()
        );
        status
    }

    /// Current error state (diagnostics only).
    pub fn error_state(&self) -> StateVec {
        self.kalman.x
    }

    /// Current error covariance (diagnostics only).
    pub fn covariance(&self) -> StateMat {
        self.kalman.covariance()
    }

    /// Discretize the error dynamics around the current PDR motion.
    ///
    /// The transition matrix depends on the live heading and cadence: the
    /// model describes how position/heading/step-length *errors* evolve given
    /// the motion the dead reckoner is currently integrating.
    fn build_process_model(&mut self, epoch_ms: u32, sample: &NavSample) {
        let dt = elapsed_seconds(epoch_ms, self.kalman.last_epoch_ms);

        let mut phi_c = StateMat::zeros();
        phi_c[(0, 3)] = sample.pdr_step_frequency * sample.pdr_heading.cos();
        phi_c[(1, 3)] = sample.pdr_step_frequency * sample.pdr_heading.sin();
        phi_c[(3, 3)] = -1.0 / self.config.step_len_time_constant;

        let mut q_c = StateMat::zeros();
        for i in 0..STATE_DIM {
            q_c[(i, i)] = self.config.process_noise_sigmas[i] * self.config.process_noise_sigmas[i];
        }

        // Second-order discretization. The noise term symmetrizes with
        // M + M' rather than 2M: Phi_c is not symmetric, Qd must stay so.
        let half_dt2 = dt * dt / 2.0;
        let m = phi_c * q_c;
        let q_d = q_c * dt + (m + m.transpose()) * half_dt2;
        let phi_d = StateMat::identity() + phi_c * dt + phi_c * phi_c * half_dt2;

        self.kalman.set_model(&phi_d, &q_d);
        self.kalman.last_epoch_ms = epoch_ms;
        self.kalman.period_ms = (dt * 1000.0 + 0.5) as u16;
    }

    /// Fold the GNSS fix in as three scalar measurements, in fixed order:
    /// latitude, longitude, heading.
    ///
    /// The three corrections accumulate in a local delta and land on the
    /// error state in one shot after the last update; every update in the
    /// batch must see the same pre-update error state.
    fn gnss_update(&mut self, sample: &NavSample) {
        let z = [
            (sample.gnss_latitude - sample.pdr_latitude) * meridian_radius(sample.pdr_latitude),
            (sample.gnss_longitude - sample.pdr_longitude) * normal_radius(sample.pdr_longitude),
            wrap_pi(sample.gnss_heading - sample.pdr_heading),
        ];

        let mut delta = StateVec::zeros();
        for (i, &innovation) in z.iter().enumerate() {
            let mut h = StateVec::zeros();
            h[i] = 1.0;
            let sigma = self.config.gnss_noise_sigmas[i];
            delta += self.kalman.scalar_update(
                &h,
                sigma * sigma,
                innovation,
                self.config.update_retry_limit,
                UpdateMode::Save,
            );
        }
        self.kalman.x += delta;
    }

    /// Closed-loop feedback: consume the estimated errors into the trajectory.
    ///
    /// Position and heading are gated; a correction that looks like a GNSS
    /// multipath jump stays in the error state and accumulates evidence into
    /// the next epoch instead. Step length is always applied.
    fn apply_corrections(&mut self, sample: &mut NavSample) -> FusionStatus {
        let cfg = &self.config;
        let x = &mut self.kalman.x;
        let mut status = FusionStatus::NO_FIX;

        if x[0].abs() < cfg.position_gate_m && x[1].abs() < cfg.position_gate_m {
            sample.pdr_latitude += x[0] / meridian_radius(sample.gnss_latitude);
            sample.pdr_longitude += x[1] / normal_radius(sample.gnss_latitude);
            x[0] = 0.0;
            x[1] = 0.0;
            status |= FusionStatus::POS_FIX;
        } else {
            debug!(
                "position correction withheld: ({:.2} m, {:.2} m) vs {:.1} m gate",
                x[0], x[1], cfg.position_gate_m
            );
        }

        sample.pdr_step_length += x[3];
        x[3] = 0.0;
        status |= FusionStatus::LENGTH_FIX;

        if x[2].abs() < cfg.heading_gate_rad {
            sample.pdr_heading = wrap_pi(sample.pdr_heading + x[2]);
            x[2] = 0.0;
            status |= FusionStatus::HEADING_FIX;
        } else {
            debug!(
                "heading correction withheld: {:.4} rad vs {:.4} rad gate",
                x[2], cfg.heading_gate_rad
            );
        }

        status
    }
}
