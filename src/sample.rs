use serde::Serialize;
use std::time::SystemTime;

const MIB: f64 = 1024.0 * 1024.0;

pub const DISK_SATURATION_BYTES_PER_SEC: f64 = 10.0 * MIB;
pub const NETWORK_SATURATION_BYTES_PER_SEC: f64 = 1.0 * MIB;

/// Values are stored raw: percentages may fall outside `0..=100` and are only
/// clamped when rendered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSample {
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub disk_read_bytes_per_sec: f64,
    pub disk_write_bytes_per_sec: f64,
    pub network_sent_bytes_per_sec: f64,
    pub network_received_bytes_per_sec: f64,
    pub gpu_percent: f64,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: SystemTime,
}

impl MetricsSample {
    pub fn disk_bytes_per_sec(&self) -> f64 {
        self.disk_read_bytes_per_sec + self.disk_write_bytes_per_sec
    }

    pub fn network_bytes_per_sec(&self) -> f64 {
        self.network_sent_bytes_per_sec + self.network_received_bytes_per_sec
    }

    pub fn disk_activity(&self) -> f64 {
        activity_percent(self.disk_bytes_per_sec(), DISK_SATURATION_BYTES_PER_SEC)
    }

    pub fn network_activity(&self) -> f64 {
        activity_percent(
            self.network_bytes_per_sec(),
            NETWORK_SATURATION_BYTES_PER_SEC,
        )
    }

    pub fn display_value(&self, metric: Metric) -> f64 {
        let raw = match metric {
            Metric::Cpu => self.cpu_percent,
            Metric::Ram => self.ram_percent,
            Metric::Disk => self.disk_activity(),
            Metric::Network => self.network_activity(),
            Metric::Gpu => self.gpu_percent,
        };
        clamp_percent(raw)
    }
}

pub fn activity_percent(bytes_per_sec: f64, saturation_bytes_per_sec: f64) -> f64 {
    (bytes_per_sec * 100.0 / saturation_bytes_per_sec).min(100.0)
}

pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

pub fn memory_used_percent(total_bytes: u64, available_bytes: f64) -> f64 {
    if total_bytes == 0 {
        return 0.0;
    }
    let total = total_bytes as f64;
    (total - available_bytes) * 100.0 / total
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Cpu,
    Ram,
    Disk,
    Network,
    Gpu,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Cpu,
        Metric::Ram,
        Metric::Disk,
        Metric::Network,
        Metric::Gpu,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Metric::Cpu => "CPU",
            Metric::Ram => "RAM",
            Metric::Disk => "DISK",
            Metric::Network => "NET",
            Metric::Gpu => "GPU",
        }
    }
}

fn serialize_timestamp<S>(ts: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(&humantime::format_rfc3339_millis(*ts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetricsSample {
        MetricsSample {
            cpu_percent: 0.0,
            ram_percent: 0.0,
            disk_read_bytes_per_sec: 0.0,
            disk_write_bytes_per_sec: 0.0,
            network_sent_bytes_per_sec: 0.0,
            network_received_bytes_per_sec: 0.0,
            gpu_percent: 0.0,
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn disk_activity_saturates_at_ten_mib() {
        let s = MetricsSample {
            disk_read_bytes_per_sec: 5.0 * MIB,
            disk_write_bytes_per_sec: 5.0 * MIB,
            ..sample()
        };
        assert_eq!(s.disk_activity(), 100.0);

        let busier = MetricsSample {
            disk_read_bytes_per_sec: 50.0 * MIB,
            ..sample()
        };
        assert_eq!(busier.disk_activity(), 100.0);
    }

    #[test]
    fn idle_disk_is_zero() {
        assert_eq!(sample().disk_activity(), 0.0);
    }

    #[test]
    fn network_activity_scales_against_one_mib() {
        let s = MetricsSample {
            network_sent_bytes_per_sec: 512.0 * 1024.0,
            ..sample()
        };
        assert_eq!(s.network_activity(), 50.0);
    }

    #[test]
    fn memory_percent_from_total_and_available() {
        let gib = 1024_u64 * 1024 * 1024;
        let pct = memory_used_percent(8 * gib, (2 * gib) as f64);
        assert_eq!(pct, 75.0);
    }

    #[test]
    fn raw_values_survive_but_display_is_clamped() {
        let s = MetricsSample {
            cpu_percent: 130.0,
            gpu_percent: -4.0,
            ram_percent: f64::NAN,
            ..sample()
        };
        assert_eq!(s.cpu_percent, 130.0);
        assert_eq!(s.display_value(Metric::Cpu), 100.0);
        assert_eq!(s.display_value(Metric::Gpu), 0.0);
        assert_eq!(s.display_value(Metric::Ram), 0.0);
    }

    #[test]
    fn serializes_timestamp_as_rfc3339() {
        let json = serde_json::to_string(&sample()).expect("serialize");
        assert!(json.contains("\"timestamp\":\"1970-01-01T00:00:00.000Z\""));
    }
}
