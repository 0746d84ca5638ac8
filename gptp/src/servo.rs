//! The clock servo: turns Sync/Follow-Up evidence into rate and phase
//! corrections for the local oscillator.

use crate::time::{Duration, Interval, Time};

/// Weight of the frequency-ratio term in the PI update
const PROPORTIONAL_GAIN: f64 = 1.0;
/// Weight of the integrated phase-error term in the PI update
const INTEGRAL_GAIN: f64 = 0.3;

/// Rate corrections are clamped to this range
const UPPER_FREQ_LIMIT_PPM: f64 = 100.0;
const LOWER_FREQ_LIMIT_PPM: f64 = -100.0;

/// Phase errors beyond this magnitude are not integrated; a long enough run
/// of them forces a step instead
const PHASE_ERROR_THRESHOLD_NS: f64 = 1_000_000.0;
const PHASE_ERROR_MAX_COUNT: u32 = 50;

/// Rate ratios this far from 1.0 are considered measurement garbage
pub(crate) const RATE_RATIO_LIMIT_PPM: f64 = 200.0;

/// What the caller must do with the clock after feeding the servo a sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ServoUpdate {
    /// Step the clock phase by this much, reset the master-local frequency
    /// estimator, and restart peer delay measurement on the port
    Step { phase_correction: Duration },
    /// Slew at this rate
    Rate { ppm: f64 },
}

/// PI servo with step escape hatch.
///
/// Steps when explicitly re-armed (first lock, grandmaster change) or when
/// the phase error has been out of band for [`PHASE_ERROR_MAX_COUNT`]
/// consecutive samples; integrates otherwise.
#[derive(Debug)]
pub(crate) struct PiServo {
    ppm: f64,
    new_setpoint: bool,
    phase_error_violations: u32,
}

impl Default for PiServo {
    fn default() -> Self {
        Self {
            ppm: 0.0,
            new_setpoint: true,
            phase_error_violations: 0,
        }
    }
}

impl PiServo {
    /// Force a phase step on the next sample. Used on first lock and
    /// whenever the grandmaster changes.
    pub(crate) fn arm_setpoint(&mut self) {
        self.new_setpoint = true;
    }

    pub(crate) fn current_ppm(&self) -> f64 {
        self.ppm
    }

    /// Feed one `(phase offset, master-local frequency ratio)` sample.
    ///
    /// `offset` is `sync_arrival - corrected_origin`: positive when the
    /// local clock is ahead of the master.
    pub(crate) fn sample(
        &mut self,
        offset: Duration,
        master_local_freq_ratio: f64,
        sync_interval: Interval,
    ) -> ServoUpdate {
        if self.new_setpoint || self.phase_error_violations > PHASE_ERROR_MAX_COUNT {
            self.new_setpoint = false;
            self.phase_error_violations = 0;
            return ServoUpdate::Step {
                phase_correction: -offset,
            };
        }

        let phase_error = -offset.nanos_lossy();
        if libm::fabs(phase_error) > PHASE_ERROR_THRESHOLD_NS {
            self.phase_error_violations += 1;
        } else {
            self.phase_error_violations = 0;

            let syncs_per_sec = 1.0 / sync_interval.seconds();
            self.ppm += INTEGRAL_GAIN * syncs_per_sec * phase_error
                + PROPORTIONAL_GAIN * (master_local_freq_ratio - 1.0) * 1e6;
        }

        self.ppm = self.ppm.clamp(LOWER_FREQ_LIMIT_PPM, UPPER_FREQ_LIMIT_PPM);
        ServoUpdate::Rate { ppm: self.ppm }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RateEstimatorError {
    /// The numerator clock went backwards between samples; the estimator
    /// reset itself and the sample must be discarded
    NegativeTimeJump,
    /// The computed ratio was outside plausible oscillator tolerances and
    /// was not adopted
    OutOfRange,
}

/// Delta-over-delta frequency ratio estimator.
///
/// Feeding pairs of simultaneous readings from two clocks yields the ratio
/// at which the first runs relative to the second. Used for both the
/// master-to-local and the local-to-system ratio.
#[derive(Debug)]
pub(crate) struct RateEstimator {
    previous: Option<(Time, Time)>,
    ratio: f64,
    initialized: bool,
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self {
            previous: None,
            ratio: 1.0,
            initialized: false,
        }
    }
}

impl RateEstimator {
    pub(crate) fn ratio(&self) -> f64 {
        self.ratio
    }

    pub(crate) fn initialized(&self) -> bool {
        self.initialized
    }

    /// Forget all history; the next observation only primes the estimator.
    pub(crate) fn reset(&mut self) {
        self.previous = None;
        self.initialized = false;
    }

    pub(crate) fn observe(
        &mut self,
        numerator: Time,
        denominator: Time,
    ) -> Result<f64, RateEstimatorError> {
        let Some((prev_num, prev_den)) = self.previous else {
            self.previous = Some((numerator, denominator));
            return Ok(self.ratio);
        };

        if numerator < prev_num {
            self.reset();
            return Err(RateEstimatorError::NegativeTimeJump);
        }

        let num_elapsed = (numerator - prev_num).nanos_lossy();
        let den_elapsed = (denominator - prev_den).nanos_lossy();
        self.previous = Some((numerator, denominator));

        if den_elapsed <= 0.0 {
            return Err(RateEstimatorError::OutOfRange);
        }

        let ratio = num_elapsed / den_elapsed;
        if !rate_ratio_plausible(ratio) {
            return Err(RateEstimatorError::OutOfRange);
        }

        self.ratio = ratio;
        self.initialized = true;
        Ok(ratio)
    }
}

/// Whether a measured frequency ratio lies within ±200 ppm of nominal
pub(crate) fn rate_ratio_plausible(ratio: f64) -> bool {
    let limit = RATE_RATIO_LIMIT_PPM / 1e6;
    ratio > 1.0 - limit && ratio < 1.0 + limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_steps() {
        let mut servo = PiServo::default();
        let update = servo.sample(Duration::from_nanos(12_345), 1.0, Interval::ONE_SECOND);
        assert_eq!(
            update,
            ServoUpdate::Step {
                phase_correction: Duration::from_nanos(-12_345)
            }
        );

        // Follow-up samples integrate
        let update = servo.sample(Duration::from_nanos(100), 1.0, Interval::ONE_SECOND);
        let ServoUpdate::Rate { ppm } = update else {
            panic!("expected a rate update");
        };
        assert!((ppm - (-100.0 * INTEGRAL_GAIN)).abs() < 1e-9);
    }

    #[test]
    fn rate_is_clamped() {
        let mut servo = PiServo::default();
        let _ = servo.sample(Duration::ZERO, 1.0, Interval::ONE_SECOND);

        for _ in 0..100 {
            servo.sample(Duration::from_nanos(900_000), 1.0, Interval::ONE_SECOND);
        }
        let ServoUpdate::Rate { ppm } =
            servo.sample(Duration::from_nanos(900_000), 1.0, Interval::ONE_SECOND)
        else {
            panic!("expected a rate update");
        };
        assert_eq!(ppm, LOWER_FREQ_LIMIT_PPM);
    }

    #[test]
    fn persistent_out_of_band_error_forces_step() {
        let mut servo = PiServo::default();
        let _ = servo.sample(Duration::ZERO, 1.0, Interval::ONE_SECOND);

        let offset = Duration::from_nanos(5_000_000);
        for _ in 0..=PHASE_ERROR_MAX_COUNT {
            let update = servo.sample(offset, 1.0, Interval::ONE_SECOND);
            assert!(matches!(update, ServoUpdate::Rate { .. }));
        }
        assert_eq!(
            servo.sample(offset, 1.0, Interval::ONE_SECOND),
            ServoUpdate::Step {
                phase_correction: -offset
            }
        );
    }

    #[test]
    fn faster_sync_rate_scales_integral_term() {
        let mut servo = PiServo::default();
        let _ = servo.sample(Duration::ZERO, 1.0, Interval::from_log_2(-3));

        let ServoUpdate::Rate { ppm } =
            servo.sample(Duration::from_nanos(10), 1.0, Interval::from_log_2(-3))
        else {
            panic!("expected a rate update");
        };
        // 8 syncs per second
        assert!((ppm - (-10.0 * INTEGRAL_GAIN * 8.0)).abs() < 1e-9);
    }

    #[test]
    fn estimator_tracks_ratio() {
        let mut estimator = RateEstimator::default();
        assert!(!estimator.initialized());
        estimator
            .observe(Time::from_nanos(0), Time::from_nanos(0))
            .unwrap();
        let ratio = estimator
            .observe(Time::from_nanos(1_000_000_100), Time::from_nanos(1_000_000_000))
            .unwrap();
        assert!(estimator.initialized());
        assert!((ratio - 1.0000001).abs() < 1e-9);
    }

    #[test]
    fn estimator_rejects_negative_jump() {
        let mut estimator = RateEstimator::default();
        estimator
            .observe(Time::from_nanos(5_000), Time::from_nanos(5_000))
            .unwrap();
        assert_eq!(
            estimator.observe(Time::from_nanos(1_000), Time::from_nanos(6_000)),
            Err(RateEstimatorError::NegativeTimeJump)
        );
        // Estimator restarts cleanly afterwards
        estimator
            .observe(Time::from_nanos(2_000), Time::from_nanos(7_000))
            .unwrap();
        assert!(!estimator.initialized());
    }

    #[test]
    fn estimator_rejects_implausible_ratio() {
        let mut estimator = RateEstimator::default();
        estimator
            .observe(Time::from_nanos(0), Time::from_nanos(0))
            .unwrap();
        assert_eq!(
            estimator.observe(Time::from_nanos(2_000_000_000), Time::from_nanos(1_000_000_000)),
            Err(RateEstimatorError::OutOfRange)
        );
        assert_eq!(estimator.ratio(), 1.0);
    }
}
