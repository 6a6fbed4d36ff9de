/// Replay a synthetic pedestrian walk through the fusion filter.
///
/// A walker follows a gently curving true path. The simulated dead reckoner
/// integrates that motion with a deliberate heading bias and step-length
/// scale error, so its trajectory drifts; GNSS fixes (with bounded jitter)
/// arrive every few epochs and drive the correction stage. One JSON line per
/// epoch goes to stdout, a drift summary to stderr.
use clap::Parser;
use serde::Serialize;
use std::f64::consts::PI;

use pdr_fusion_rs::geodesy::{meridian_radius, normal_radius};
use pdr_fusion_rs::{FusionConfig, FusionFilter, NavSample};

#[derive(Parser, Debug)]
#[command(about = "Synthetic-walk replay for the PDR/GNSS fusion filter")]
struct Args {
    /// Number of epochs to simulate
    #[arg(long, default_value_t = 240)]
    epochs: u32,

    /// Epoch period [ms]
    #[arg(long, default_value_t = 1000)]
    period_ms: u32,

    /// Run a fusion cycle every N epochs (GNSS fix rate)
    #[arg(long, default_value_t = 5)]
    gnss_every: u32,

    /// Heading bias injected into the dead reckoner [deg]
    #[arg(long, default_value_t = 3.0)]
    heading_bias_deg: f64,

    /// Step-length scale error injected into the dead reckoner
    #[arg(long, default_value_t = 1.05)]
    step_scale: f64,

    /// GNSS position jitter amplitude [m]
    #[arg(long, default_value_t = 4.0)]
    gnss_jitter_m: f64,
}

#[derive(Clone, Copy, Debug)]
struct Pose {
    lat: f64,
    lon: f64,
    heading: f64,
}

impl Pose {
    fn advance(&mut self, distance_m: f64) {
        self.lat += distance_m * self.heading.cos() / meridian_radius(self.lat);
        self.lon += distance_m * self.heading.sin() / normal_radius(self.lat);
    }

    fn distance_to(&self, other: &Pose) -> f64 {
        let north = (other.lat - self.lat) * meridian_radius(self.lat);
        let east = (other.lon - self.lon) * normal_radius(self.lat);
        (north * north + east * east).sqrt()
    }
}

#[derive(Serialize)]
struct EpochRecord {
    epoch_ms: u32,
    truth_lat: f64,
    truth_lon: f64,
    pdr_lat: f64,
    pdr_lon: f64,
    pdr_heading: f64,
    pdr_step_length: f64,
    drift_m: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_bits: Option<u8>,
}

fn wrap_pi(angle: f64) -> f64 {
    if angle > PI {
        angle - 2.0 * PI
    } else if angle < -PI {
        angle + 2.0 * PI
    } else {
        angle
    }
}

fn main() {
    let args = Args::parse();
    let dt = f64::from(args.period_ms) / 1000.0;
    let step_frequency = 1.8;
    let true_step_length = 0.7;

    let mut truth = Pose { lat: 31.0, lon: 121.0, heading: 0.4 };
    let mut filter = FusionFilter::new(FusionConfig::default());
    let mut sample = NavSample {
        epoch_ms: 0,
        pdr_latitude: truth.lat,
        pdr_longitude: truth.lon,
        pdr_heading: truth.heading,
        pdr_step_length: true_step_length,
        pdr_step_frequency: step_frequency,
        gnss_latitude: truth.lat,
        gnss_longitude: truth.lon,
        gnss_heading: truth.heading,
    };

    let heading_bias = args.heading_bias_deg.to_radians();
    let mut max_drift: f64 = 0.0;
    let mut last_status = None;

    for k in 1..=args.epochs {
        let epoch_ms = k.wrapping_mul(args.period_ms);
        let t = f64::from(k) * dt;

        // True walk: gentle S-curve at a steady cadence.
        truth.heading = wrap_pi(0.4 + 0.25 * (0.05 * t).sin());
        truth.advance(step_frequency * true_step_length * dt);

        // Dead reckoner: integrates the same motion with biased heading and
        // scaled step length, continuing from its own (corrected) state.
        let pdr_step = sample.pdr_step_length * args.step_scale;
        sample.pdr_heading = wrap_pi(truth.heading + heading_bias);
        let mut pdr_pose = Pose {
            lat: sample.pdr_latitude,
            lon: sample.pdr_longitude,
            heading: sample.pdr_heading,
        };
        pdr_pose.advance(step_frequency * pdr_step * dt);
        sample.pdr_latitude = pdr_pose.lat;
        sample.pdr_longitude = pdr_pose.lon;
        sample.epoch_ms = epoch_ms;

        let status_bits = if k % args.gnss_every == 0 {
            // Deterministic bounded jitter stands in for receiver noise.
            let jn = args.gnss_jitter_m * (1.7 * t).sin();
            let je = args.gnss_jitter_m * (2.3 * t + 0.8).cos();
            sample.gnss_latitude = truth.lat + jn / meridian_radius(truth.lat);
            sample.gnss_longitude = truth.lon + je / normal_radius(truth.lat);
            sample.gnss_heading = wrap_pi(truth.heading + 0.02 * (0.9 * t).sin());

            let status = filter.run_cycle(epoch_ms, &mut sample);
            last_status = Some(status);
            Some(status.bits())
        } else {
            None
        };

        let pdr_now = Pose {
            lat: sample.pdr_latitude,
            lon: sample.pdr_longitude,
            heading: sample.pdr_heading,
        };
        let drift = truth.distance_to(&pdr_now);
        max_drift = max_drift.max(drift);

        let record = EpochRecord {
            epoch_ms,
            truth_lat: truth.lat,
            truth_lon: truth.lon,
            pdr_lat: sample.pdr_latitude,
            pdr_lon: sample.pdr_longitude,
            pdr_heading: sample.pdr_heading,
            pdr_step_length: sample.pdr_step_length,
            drift_m: drift,
            status_bits,
        };
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("failed to encode epoch {epoch_ms}: {err}"),
        }
    }

    let final_pose = Pose {
        lat: sample.pdr_latitude,
        lon: sample.pdr_longitude,
        heading: sample.pdr_heading,
    };
    eprintln!(
        "epochs: {}  max drift: {:.1} m  final drift: {:.1} m  last status: {:?}",
        args.epochs,
        max_drift,
        truth.distance_to(&final_pose),
        last_status,
    );
}
