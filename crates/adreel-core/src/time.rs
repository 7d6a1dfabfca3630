#[must_use]
pub fn ms_to_seconds(ms: f64) -> f64 {
    ms / 1_000.0
}

#[must_use]
pub fn seconds_to_ms(seconds: f64) -> f64 {
    seconds * 1_000.0
}

#[must_use]
pub fn seconds_to_samples(seconds: f64, sample_rate: u32) -> u64 {
    if seconds <= 0.0 || sample_rate == 0 {
        return 0;
    }

    (seconds * f64::from(sample_rate)).round() as u64
}

#[must_use]
pub fn samples_to_seconds(samples: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }

    samples as f64 / f64::from(sample_rate)
}

const FRAME_SNAP_EPSILON: f64 = 1e-6;

/// Number of frames captured for a timeline: `ceil(duration * fps / 1000)`,
/// with counts within float noise of a whole frame snapped to it.
#[must_use]
pub fn frame_count(duration_ms: f64, fps: u32) -> u64 {
    if duration_ms <= 0.0 || fps == 0 {
        return 0;
    }

    let exact = duration_ms * f64::from(fps) / 1_000.0;
    let nearest = exact.round();
    if (exact - nearest).abs() < FRAME_SNAP_EPSILON {
        nearest as u64
    } else {
        exact.ceil() as u64
    }
}

#[must_use]
pub fn frame_time_ms(index: u64, fps: u32) -> f64 {
    if fps == 0 {
        return 0.0;
    }

    index as f64 / f64::from(fps) * 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_round_trip_is_stable() {
        let sample_rate = 48_000;
        let samples = seconds_to_samples(2.5, sample_rate);
        assert_eq!(samples, 120_000);
        assert!((samples_to_seconds(samples, sample_rate) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn frame_count_rounds_partial_frames_up() {
        assert_eq!(frame_count(5_000.0, 10), 50);
        assert_eq!(frame_count(1_001.0, 30), 31);
        assert_eq!(frame_count(0.0, 30), 0);
    }

    #[test]
    fn frame_count_ignores_float_noise_from_second_conversions() {
        assert_eq!(frame_count(seconds_to_ms(16.1), 10), 161);
        assert_eq!(frame_count(seconds_to_ms(16.12), 25), 403);
        assert_eq!(frame_count(seconds_to_ms(8.05), 60), 483);
        for hundredths in 1..=3_000_u32 {
            let seconds = f64::from(hundredths) / 100.0;
            for fps in [10, 15, 24, 25, 30, 60] {
                let frames = frame_count(seconds_to_ms(seconds), fps);
                let last_ms = frame_time_ms(frames - 1, fps);
                assert!(
                    last_ms < seconds_to_ms(seconds) - 1e-3,
                    "{seconds}s at {fps} fps captures a frame at the end"
                );
            }
        }
    }

    #[test]
    fn frame_times_are_evenly_spaced() {
        assert!((frame_time_ms(7, 10) - 700.0).abs() < 1e-9);
        assert!((frame_time_ms(3, 24) - 125.0).abs() < 1e-9);
        assert!(frame_time_ms(5, 0).abs() < f64::EPSILON);
    }
}
