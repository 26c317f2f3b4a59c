//! Side-channel measurement.
//!
//! A [Probe] receives samples from the stack and never influences it.
//! [Recorder] keeps samples in memory, [HistogramProbe] feeds a prometheus
//! histogram registered with the runtime, and the [Packet] unit measures the
//! delay and size of the compounds passing through it.

use crate::{Bits, Command, Compound, Fun, FunctionalUnit, Handler};
use prometheus_client::metrics::histogram::Histogram;
use std::{cell::RefCell, rc::Rc, time::SystemTime};
use strata_runtime::{Clock, Metrics};
use tracing::trace;

/// Sink for measurements.
pub trait Probe {
    /// Record `value`, annotated with `tags`.
    fn put(&self, value: f64, tags: &[(&str, &str)]);
}

/// A recorded measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub tags: Vec<(String, String)>,
}

/// Keeps every sample in memory.
#[derive(Default)]
pub struct Recorder {
    samples: RefCell<Vec<Sample>>,
}

impl Recorder {
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.borrow().clone()
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.borrow().iter().map(|sample| sample.value).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.samples.borrow_mut().clear();
    }
}

impl Probe for Recorder {
    fn put(&self, value: f64, tags: &[(&str, &str)]) {
        self.samples.borrow_mut().push(Sample {
            value,
            tags: tags
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        });
    }
}

/// Feeds a histogram registered with the runtime's metrics.
pub struct HistogramProbe {
    histogram: Histogram,
}

impl HistogramProbe {
    pub fn new<E: Metrics>(
        context: &E,
        name: &str,
        help: &str,
        buckets: impl IntoIterator<Item = f64>,
    ) -> Self {
        let histogram = Histogram::new(buckets.into_iter());
        context.register(name, help, histogram.clone());
        Self { histogram }
    }
}

impl Probe for HistogramProbe {
    fn put(&self, value: f64, _tags: &[(&str, &str)]) {
        self.histogram.observe(value);
    }
}

/// Command of the [Packet] unit.
#[derive(Clone, Debug, Default)]
pub struct PacketCommand {
    pub magic: PacketMagic,
}

#[derive(Clone, Debug, Default)]
pub struct PacketMagic {
    /// Time at which the compound passed the sending unit.
    pub sent: Option<SystemTime>,
}

impl Command for PacketCommand {}

/// Transparent unit measuring the delay and the size of the compounds
/// travelling between its sending and its receiving instance.
pub struct Packet {
    delay: Rc<dyn Probe>,
    size: Rc<dyn Probe>,
}

impl Packet {
    pub fn new(delay: Rc<dyn Probe>, size: Rc<dyn Probe>) -> Self {
        Self { delay, size }
    }

    /// Packet unit feeding histograms named after `fu`.
    pub fn histograms(fun: &Fun, fu: &str) -> Self {
        let context = fun.context().with_label(fu);
        let delay = HistogramProbe::new(
            &context,
            "delay",
            "Delay between the sending and the receiving unit in seconds",
            [0.0001, 0.001, 0.01, 0.1, 1.0, 10.0],
        );
        let size = HistogramProbe::new(
            &context,
            "size",
            "Length of received compounds in bits",
            [64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0],
        );
        Self::new(Rc::new(delay), Rc::new(size))
    }
}

impl Handler for Packet {
    fn send_data(&self, fu: &FunctionalUnit, compound: Compound) {
        fu.activate_command::<PacketCommand>(&compound).magic.sent = Some(fu.context().current());
        fu.connector().send_data(compound);
    }

    fn on_data(&self, fu: &FunctionalUnit, compound: Compound) {
        let sent = fu.get_command::<PacketCommand>(&compound).magic.sent;
        let bits: Bits = compound.length_bits();
        if let Some(sent) = sent {
            let delay = fu
                .context()
                .current()
                .duration_since(sent)
                .unwrap_or_default()
                .as_secs_f64();
            trace!(fu = fu.name(), delay, bits, "measured compound");
            self.delay.put(delay, &[("fu", fu.name())]);
        }
        self.size.put(bits as f64, &[("fu", fu.name())]);
        fu.deliverer().on_data(compound);
    }
}
