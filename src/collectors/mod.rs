pub mod system;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse counter value: {0}")]
    Parse(String),
    #[error("command {command} failed: {detail}")]
    Command { command: String, detail: String },
    #[error("counter source unavailable: {0}")]
    Unavailable(String),
}

pub trait Counter: Send {
    /// Current value. Rate counters return 0 on their first read.
    fn next_value(&mut self) -> Result<f64, CounterError>;
}

impl<F> Counter for F
where
    F: FnMut() -> Result<f64, CounterError> + Send,
{
    fn next_value(&mut self) -> Result<f64, CounterError> {
        self()
    }
}

/// Availability is decided once, at construction.
pub enum CounterSlot {
    Available(Box<dyn Counter>),
    Unavailable,
}

impl CounterSlot {
    pub fn available(counter: impl Counter + 'static) -> Self {
        Self::Available(Box::new(counter))
    }

    pub fn from_result<C: Counter + 'static>(name: &str, result: Result<C, CounterError>) -> Self {
        match result {
            Ok(counter) => Self::available(counter),
            Err(err) => {
                warn!(counter = name, error = %err, "counter unavailable, reporting zero");
                Self::Unavailable
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn read(&mut self, name: &str) -> Option<f64> {
        match self {
            Self::Available(counter) => match counter.next_value() {
                Ok(v) => Some(v),
                Err(err) => {
                    warn!(counter = name, error = %err, "counter read failed");
                    None
                }
            },
            Self::Unavailable => None,
        }
    }

    pub fn read_or_zero(&mut self, name: &str) -> f64 {
        self.read(name).unwrap_or(0.0)
    }
}

pub struct CounterSet {
    pub cpu: CounterSlot,
    pub available_memory: CounterSlot,
    pub disk_read: CounterSlot,
    pub disk_write: CounterSlot,
    pub network_sent: CounterSlot,
    pub network_received: CounterSlot,
    pub gpu: CounterSlot,
    pub total_memory_bytes: u64,
}

impl CounterSet {
    pub fn empty(total_memory_bytes: u64) -> Self {
        Self {
            cpu: CounterSlot::Unavailable,
            available_memory: CounterSlot::Unavailable,
            disk_read: CounterSlot::Unavailable,
            disk_write: CounterSlot::Unavailable,
            network_sent: CounterSlot::Unavailable,
            network_received: CounterSlot::Unavailable,
            gpu: CounterSlot::Unavailable,
            total_memory_bytes,
        }
    }

    pub fn probe() -> Self {
        system::probe_counters()
    }
}
