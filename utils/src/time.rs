use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Extension trait to express simulation timestamps relative to the epoch.
pub trait SystemTimeExt {
    /// Returns the duration since the Unix epoch.
    ///
    /// Panics if the time lies before the epoch.
    fn epoch(&self) -> Duration;

    /// Returns the number of milliseconds (rounded down) since the Unix epoch.
    fn epoch_millis(&self) -> u64;

    /// Returns the number of seconds since the Unix epoch as a float.
    fn epoch_secs_f64(&self) -> f64;
}

impl SystemTimeExt for SystemTime {
    fn epoch(&self) -> Duration {
        self.duration_since(UNIX_EPOCH)
            .expect("time is before the epoch")
    }

    fn epoch_millis(&self) -> u64 {
        self.epoch().as_millis().min(u64::MAX as u128) as u64
    }

    fn epoch_secs_f64(&self) -> f64 {
        self.epoch().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch() {
        let time = UNIX_EPOCH + Duration::from_millis(1_500);
        assert_eq!(time.epoch(), Duration::from_millis(1_500));
        assert_eq!(time.epoch_millis(), 1_500);
        assert_eq!(time.epoch_secs_f64(), 1.5);
    }

    #[test]
    #[should_panic(expected = "time is before the epoch")]
    fn test_before_epoch() {
        let time = UNIX_EPOCH - Duration::from_secs(1);
        time.epoch();
    }
}
