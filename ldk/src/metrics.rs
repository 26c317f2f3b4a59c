use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
};
use strata_runtime::Metrics as RuntimeMetrics;

/// Label for per-unit metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Unit {
    /// Name of the functional unit
    pub fu: String,
}

/// Metrics for a [`Fun`](crate::Fun)
#[derive(Default)]
pub struct Metrics {
    /// Number of compounds sent down by unit
    pub sent: Family<Unit, Counter>,
    /// Number of compounds delivered up by unit
    pub received: Family<Unit, Counter>,
    /// Number of wakeups by unit
    pub wakeups: Family<Unit, Counter>,
    /// Number of refused acceptance checks by unit
    pub refused: Family<Unit, Counter>,
    /// Number of completed suspensions by unit
    pub suspended: Family<Unit, Counter>,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Metrics::default();
        context.register(
            "sent",
            "Number of compounds sent down by unit",
            metrics.sent.clone(),
        );
        context.register(
            "received",
            "Number of compounds delivered up by unit",
            metrics.received.clone(),
        );
        context.register(
            "wakeups",
            "Number of wakeups by unit",
            metrics.wakeups.clone(),
        );
        context.register(
            "refused",
            "Number of refused acceptance checks by unit",
            metrics.refused.clone(),
        );
        context.register(
            "suspended",
            "Number of completed suspensions by unit",
            metrics.suspended.clone(),
        );
        metrics
    }

    /// Counters of a single unit.
    pub fn unit(&self, fu: &str) -> Counters {
        let label = Unit { fu: fu.to_string() };
        Counters {
            sent: self.sent.get_or_create(&label).clone(),
            received: self.received.get_or_create(&label).clone(),
            wakeups: self.wakeups.get_or_create(&label).clone(),
            refused: self.refused.get_or_create(&label).clone(),
            suspended: self.suspended.get_or_create(&label).clone(),
        }
    }
}

/// Handles to the counters of one unit.
#[derive(Clone, Default)]
pub struct Counters {
    pub sent: Counter,
    pub received: Counter,
    pub wakeups: Counter,
    pub refused: Counter,
    pub suspended: Counter,
}
