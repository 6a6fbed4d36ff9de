//! UD-factorized square-root Kalman engine.
//!
//! The error covariance is carried as `P = U * D * U'` with U unit
//! upper-triangular and D diagonal, packed row-major into a single
//! upper-triangular array (diagonal slots hold D, the implicit unit diagonal
//! of U is not stored).
//!
//! Measurement updates are Bierman's sequential scalar algorithm; the time
//! update recomposes the 4x4 covariance, propagates it densely and refactors.
//! Only `predict` and `scalar_update` write the factor.

use log::debug;

use crate::types::{StateMat, StateVec, STATE_DIM, UD_LEN};

/// Whether a scalar update persists the updated covariance factor or only
/// evaluates the correction against the current one.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UpdateMode {
    /// Persist the updated U/D factor.
    Save,
    /// Leave the factor untouched; compute the correction only.
    TestOnly,
}

/// Index into the packed row-major upper-triangular storage, `row <= col`.
#[inline]
fn packed_idx(row: usize, col: usize) -> usize {
    debug_assert!(row <= col && col < STATE_DIM);
    row * STATE_DIM - row * (row + 1) / 2 + col
}

/// Filter state for the 4-state error model.
///
/// `x` is the error-state vector `[lat_err_m, lon_err_m, heading_err_rad,
/// step_len_err_m]`. The caller decides when measurement corrections land in
/// `x` (see [`UdFilter::scalar_update`]) and when components are consumed and
/// reset by trajectory feedback.
pub struct UdFilter {
    /// Error-state vector.
    pub x: StateVec,
    /// Packed U*D*U' covariance factor.
    ud: [f64; UD_LEN],
    /// Packed upper-triangular discretized transition matrix for the current
    /// epoch, written by the process-model builder.
    phi: [f64; UD_LEN],
    /// Discretized process noise for the current epoch.
    q: StateMat,
    /// Timestamp of the last completed model build [ms].
    pub last_epoch_ms: u32,
    /// Rounded epoch period [ms].
    pub period_ms: u16,
}

impl UdFilter {
    /// Fresh filter with zero error state and a diagonal covariance seeded
    /// from the given one-sigma uncertainties.
    pub fn new(init_sigmas: &[f64; STATE_DIM]) -> Self {
        let mut ud = [0.0; UD_LEN];
        for (i, sigma) in init_sigmas.iter().enumerate() {
            ud[packed_idx(i, i)] = sigma * sigma;
        }
        UdFilter {
            x: StateVec::zeros(),
            ud,
            phi: [0.0; UD_LEN],
            q: StateMat::zeros(),
            last_epoch_ms: 0,
            period_ms: 0,
        }
    }

    /// Install the discretized model for this epoch. Only the upper triangle
    /// of `phi` is stored; the model's transition matrix is genuinely
    /// upper-triangular so nothing is lost.
    pub fn set_model(&mut self, phi: &StateMat, q: &StateMat) {
        for row in 0..STATE_DIM {
            for col in row..STATE_DIM {
                self.phi[packed_idx(row, col)] = phi[(row, col)];
            }
        }
        self.q = *q;
    }

    /// Recompose the full covariance `P = U * D * U'`.
    pub fn covariance(&self) -> StateMat {
        let mut u = StateMat::identity();
        let mut d = StateVec::zeros();
        for row in 0..STATE_DIM {
            d[row] = self.ud[packed_idx(row, row)];
            for col in (row + 1)..STATE_DIM {
                u[(row, col)] = self.ud[packed_idx(row, col)];
            }
        }
        u * StateMat::from_diagonal(&d) * u.transpose()
    }

    /// Discretized process noise installed for the current epoch.
    pub fn process_noise(&self) -> StateMat {
        self.q
    }

    /// Expand the packed transition matrix.
    pub fn transition_matrix(&self) -> StateMat {
        let mut phi = StateMat::zeros();
        for row in 0..STATE_DIM {
            for col in row..STATE_DIM {
                phi[(row, col)] = self.phi[packed_idx(row, col)];
            }
        }
        phi
    }

    /// Time update: `x <- Phi * x`, `P <- Phi * P * Phi' + Q`, refactored
    /// back into packed U/D form.
    pub fn predict(&mut self) {
        let phi = self.transition_matrix();
        self.x = phi * self.x;
        let p = phi * self.covariance() * phi.transpose() + self.q;
        self.factorize(&p);
    }

    /// One Bierman sequential scalar update for measurement row `h`, noise
    /// variance `r` and innovation `z`.
    ///
    /// Returns the state correction `K * z` implied by this single
    /// measurement without touching `x`: the caller accumulates corrections
    /// across a measurement batch and applies them in one shot, so that every
    /// update in the batch sees the same pre-update error state.
    ///
    /// If the predicted innovation variance is not positive the engine
    /// retries with an inflated `r`, at most `retry_limit` times, before
    /// giving up and returning a zero correction.
    pub fn scalar_update(
        &mut self,
        h: &StateVec,
        r: f64,
        z: f64,
        retry_limit: u32,
        mode: UpdateMode,
    ) -> StateVec {
        // f = U' h, g = D f; both independent of r.
        let mut f = [0.0; STATE_DIM];
        let mut g = [0.0; STATE_DIM];
        for j in 0..STATE_DIM {
            let mut sum = h[j];
            for i in 0..j {
                sum += self.ud[packed_idx(i, j)] * h[i];
            }
            f[j] = sum;
            g[j] = self.ud[packed_idx(j, j)] * f[j];
        }
        let hph: f64 = (0..STATE_DIM).map(|j| f[j] * g[j]).sum();

        let mut r_eff = r;
        let mut attempts = 0;
        while r_eff + hph <= 0.0 {
            if attempts >= retry_limit {
                debug!("scalar update degenerate after {attempts} retries, skipped");
                return StateVec::zeros();
            }
            r_eff = if r_eff > 0.0 { r_eff * 10.0 } else { 1.0 };
            attempts += 1;
        }

        let mut ud = self.ud;
        let mut alpha = r_eff;
        let mut b = g;
        for j in 0..STATE_DIM {
            let beta = alpha;
            alpha += f[j] * b[j];
            let lambda = -f[j] / beta;
            let dj = packed_idx(j, j);
            ud[dj] *= beta / alpha;
            for i in 0..j {
                let uij = packed_idx(i, j);
                let u_old = ud[uij];
                ud[uij] = u_old + b[i] * lambda;
                b[i] += b[j] * u_old;
            }
        }

        if mode == UpdateMode::Save {
            self.ud = ud;
        }

        let gain_scale = z / alpha;
        StateVec::from_fn(|i, _| b[i] * gain_scale)
    }

    /// Upper-triangular UD decomposition of a symmetric PSD matrix, written
    /// into the packed factor. Columns are processed last to first; only the
    /// upper triangle of `p` is read.
    fn factorize(&mut self, p: &StateMat) {
        let mut ud = [0.0; UD_LEN];
        for j in (0..STATE_DIM).rev() {
            let mut dj = p[(j, j)];
            for k in (j + 1)..STATE_DIM {
                let ujk = ud[packed_idx(j, k)];
                dj -= ujk * ujk * ud[packed_idx(k, k)];
            }
            ud[packed_idx(j, j)] = dj.max(0.0);
            for i in 0..j {
                let mut sum = p[(i, j)];
                for k in (j + 1)..STATE_DIM {
                    sum -= ud[packed_idx(i, k)] * ud[packed_idx(j, k)] * ud[packed_idx(k, k)];
                }
                ud[packed_idx(i, j)] = if dj > 0.0 { sum / dj } else { 0.0 };
            }
        }
        self.ud = ud;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn seeded_filter() -> UdFilter {
        UdFilter::new(&[0.1, 0.1, 0.17, 0.1])
    }

    #[test]
    fn test_packed_index_covers_triangle() {
        let mut seen = [false; UD_LEN];
        for row in 0..STATE_DIM {
            for col in row..STATE_DIM {
                let idx = packed_idx(row, col);
                assert!(!seen[idx]);
                seen[idx] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_init_seeds_variance_diagonal() {
        let kf = seeded_filter();
        let p = kf.covariance();
        assert_relative_eq!(p[(0, 0)], 0.01, max_relative = 1e-12);
        assert_relative_eq!(p[(2, 2)], 0.17 * 0.17, max_relative = 1e-12);
        assert_relative_eq!(p[(0, 1)], 0.0);
    }

    #[test]
    fn test_factorize_round_trip() {
        let mut kf = seeded_filter();
        // Symmetric PSD matrix with full cross-coupling: A * A' + I.
        let a = StateMat::from_row_slice(&[
            1.0, 0.3, 0.0, 0.5, //
            0.2, 1.5, 0.1, 0.0, //
            0.0, 0.4, 0.8, 0.2, //
            0.1, 0.0, 0.3, 1.2,
        ]);
        let p = a * a.transpose() + StateMat::identity();
        kf.factorize(&p);
        let back = kf.covariance();
        for i in 0..STATE_DIM {
            for j in 0..STATE_DIM {
                assert_relative_eq!(back[(i, j)], p[(i, j)], max_relative = 1e-10);
            }
        }
    }

    #[test]
    fn test_predict_grows_variance() {
        let mut kf = seeded_filter();
        let before = kf.covariance()[(0, 0)];
        kf.set_model(&StateMat::identity(), &(StateMat::identity() * 0.05));
        kf.predict();
        let after = kf.covariance()[(0, 0)];
        assert_relative_eq!(after, before + 0.05, max_relative = 1e-12);
    }

    #[test]
    fn test_predict_propagates_state() {
        let mut kf = seeded_filter();
        kf.x[3] = 1.0;
        let mut phi = StateMat::identity();
        phi[(0, 3)] = 2.0;
        kf.set_model(&phi, &StateMat::zeros());
        kf.predict();
        assert_relative_eq!(kf.x[0], 2.0, max_relative = 1e-12);
        assert_relative_eq!(kf.x[3], 1.0, max_relative = 1e-12);
    }

    #[test]
    fn test_scalar_update_matches_closed_form() {
        let mut kf = seeded_filter();
        let mut h = StateVec::zeros();
        h[0] = 1.0;
        let r = 0.04;
        let z = 0.5;
        let p0 = kf.covariance()[(0, 0)];

        let delta = kf.scalar_update(&h, r, z, 5, UpdateMode::Save);

        // Scalar Kalman: K = p / (p + r), P+ = p * r / (p + r).
        let k = p0 / (p0 + r);
        assert_relative_eq!(delta[0], k * z, max_relative = 1e-10);
        assert_relative_eq!(delta[1], 0.0);
        assert_relative_eq!(kf.covariance()[(0, 0)], p0 * r / (p0 + r), max_relative = 1e-10);
        // The engine never applies the correction itself.
        assert_relative_eq!(kf.x[0], 0.0);
    }

    #[test]
    fn test_scalar_update_uses_cross_covariance() {
        let mut kf = seeded_filter();
        let mut p = kf.covariance();
        p[(0, 3)] = 0.005;
        p[(3, 0)] = 0.005;
        kf.factorize(&p);

        let mut h = StateVec::zeros();
        h[0] = 1.0;
        let delta = kf.scalar_update(&h, 0.04, 0.5, 5, UpdateMode::Save);

        // Correlated state receives a share of the correction.
        let expected = p[(0, 3)] / (p[(0, 0)] + 0.04) * 0.5;
        assert_relative_eq!(delta[3], expected, max_relative = 1e-10);
    }

    #[test]
    fn test_test_only_mode_keeps_factor() {
        let mut kf = seeded_filter();
        let mut h = StateVec::zeros();
        h[1] = 1.0;
        let before = kf.covariance();
        let delta = kf.scalar_update(&h, 0.04, 0.3, 5, UpdateMode::TestOnly);
        assert!(delta[1] > 0.0);
        let after = kf.covariance();
        for i in 0..STATE_DIM {
            assert_relative_eq!(after[(i, i)], before[(i, i)], max_relative = 1e-12);
        }
    }

    #[test]
    fn test_sequential_updates_shrink_variance_monotonically() {
        let mut kf = seeded_filter();
        let mut h = StateVec::zeros();
        h[2] = 1.0;
        let mut last = kf.covariance()[(2, 2)];
        for _ in 0..3 {
            kf.scalar_update(&h, 0.03, 0.1, 5, UpdateMode::Save);
            let now = kf.covariance()[(2, 2)];
            assert!(now < last);
            last = now;
        }
    }

    #[test]
    fn test_degenerate_noise_is_retried() {
        let mut kf = seeded_filter();
        // Wipe the covariance so h' P h == 0, then demand r <= 0.
        kf.factorize(&StateMat::zeros());
        let mut h = StateVec::zeros();
        h[0] = 1.0;
        let delta = kf.scalar_update(&h, -1.0, 0.5, 5, UpdateMode::Save);
        // Inflated r makes the update well-posed; gain is still zero because
        // the prior variance is zero.
        assert_relative_eq!(delta[0], 0.0);
    }
}
