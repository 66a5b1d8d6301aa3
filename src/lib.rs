pub mod collectors;
pub mod config;
pub mod history;
pub mod overlay;
pub mod render;
pub mod sample;
pub mod sampler;

pub use collectors::{Counter, CounterError, CounterSet, CounterSlot};
pub use config::{Config, ConfigError, ConfigStore, Visibility};
pub use history::{History, HISTORY_CAPACITY};
pub use overlay::{HeadlessWindow, Overlay, OverlayWindow};
pub use render::Renderer;
pub use sample::{Metric, MetricsSample};
pub use sampler::Sampler;
