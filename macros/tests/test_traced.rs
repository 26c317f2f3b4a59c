#[cfg(test)]
mod tests {
    use strata_macros::test_traced;
    use tracing::{debug, error, trace, warn};

    #[test_traced]
    fn test_defaults_to_debug() {
        debug!(fu = "upper", "wakeup");
        trace!("hidden at the default level");
        assert_eq!("upper".len(), 5);
    }

    #[test_traced("TRACE")]
    fn test_positional_trace() {
        let events: Vec<u64> = (0..3).collect();
        for id in &events {
            trace!(id, at = 0, "scheduled event");
        }
        assert_eq!(events.len(), 3);
    }

    #[test_traced("warn")]
    fn test_positional_lowercase() {
        warn!(fu = "buffer", length = 8, "dropped compound");
        assert_eq!(8 / 8, 1);
    }

    #[test_traced(level = "ERROR")]
    fn test_named_level() {
        error!(fu = "lower", "no neighbor");
        assert!("lower".starts_with('l'));
    }

    #[test_traced("INFO")]
    #[should_panic(expected = "single connector has no neighbor")]
    fn test_panic_propagates() {
        panic!("single connector has no neighbor");
    }
}
