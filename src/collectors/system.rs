use super::{Counter, CounterError, CounterSet, CounterSlot};
#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;
#[cfg(not(target_os = "linux"))]
use sysinfo::ProcessExt;
use sysinfo::{CpuExt, NetworkExt, NetworksExt, System, SystemExt};
use tracing::{debug, info, warn};

/// Assumed physical memory when the system query fails.
pub const FALLBACK_TOTAL_MEMORY_BYTES: u64 = 8 * 1024 * 1024 * 1024;

const SECTOR_BYTES: u64 = 512;

pub fn probe_counters() -> CounterSet {
    let total_memory_bytes = resolve_total_memory(total_physical_memory());

    let (network_sent, network_received) = bind_network(&interface_names());

    let counters = CounterSet {
        cpu: CounterSlot::available(CpuCounter::new()),
        available_memory: CounterSlot::available(AvailableMemoryCounter::new()),
        disk_read: CounterSlot::from_result("disk_read", DiskCounter::new(IoDirection::Read)),
        disk_write: CounterSlot::from_result("disk_write", DiskCounter::new(IoDirection::Write)),
        network_sent,
        network_received,
        gpu: bind_gpu(&gpu_categories()),
        total_memory_bytes,
    };
    debug!(
        total_memory_bytes,
        disk = counters.disk_read.is_available(),
        network = counters.network_sent.is_available(),
        gpu = counters.gpu.is_available(),
        "counters probed"
    );
    counters
}

pub fn resolve_total_memory(result: Result<u64, CounterError>) -> u64 {
    match result {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                error = %err,
                fallback_bytes = FALLBACK_TOTAL_MEMORY_BYTES,
                "total memory query failed, using fallback"
            );
            FALLBACK_TOTAL_MEMORY_BYTES
        }
    }
}

pub fn total_physical_memory() -> Result<u64, CounterError> {
    let mut system = System::new();
    system.refresh_memory();
    match system.total_memory() {
        0 => Err(CounterError::Unavailable(
            "system reported zero total memory".to_string(),
        )),
        bytes => Ok(bytes),
    }
}

#[derive(Debug, Default)]
struct RateTracker {
    last: Option<(Instant, u64)>,
}

impl RateTracker {
    fn observe(&mut self, now: Instant, total: u64) -> f64 {
        let rate = match self.last {
            Some((at, prev)) => {
                let secs = now.saturating_duration_since(at).as_secs_f64();
                if secs > 0.0 {
                    total.saturating_sub(prev) as f64 / secs
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last = Some((now, total));
        rate
    }
}

pub struct CpuCounter {
    system: System,
}

impl CpuCounter {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self { system }
    }
}

impl Default for CpuCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Counter for CpuCounter {
    fn next_value(&mut self) -> Result<f64, CounterError> {
        self.system.refresh_cpu();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(CounterError::Unavailable("no cpus reported".to_string()));
        }
        let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
        Ok((sum / cpus.len() as f32) as f64)
    }
}

pub struct AvailableMemoryCounter {
    system: System,
}

impl AvailableMemoryCounter {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for AvailableMemoryCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Counter for AvailableMemoryCounter {
    fn next_value(&mut self) -> Result<f64, CounterError> {
        self.system.refresh_memory();
        if self.system.total_memory() == 0 {
            return Err(CounterError::Unavailable(
                "memory statistics not reported".to_string(),
            ));
        }
        Ok(self.system.available_memory() as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskTotals {
    pub read_bytes: u64,
    pub written_bytes: u64,
}

pub struct DiskCounter {
    direction: IoDirection,
    rate: RateTracker,
    #[cfg(not(target_os = "linux"))]
    system: System,
}

impl DiskCounter {
    pub fn new(direction: IoDirection) -> Result<Self, CounterError> {
        let mut counter = Self {
            direction,
            rate: RateTracker::default(),
            #[cfg(not(target_os = "linux"))]
            system: System::new(),
        };
        counter.next_value()?;
        Ok(counter)
    }

    #[cfg(target_os = "linux")]
    fn totals(&mut self) -> Result<DiskTotals, CounterError> {
        let text = fs::read_to_string("/proc/diskstats")?;
        parse_diskstats(&text, is_whole_disk)
    }

    #[cfg(not(target_os = "linux"))]
    fn totals(&mut self) -> Result<DiskTotals, CounterError> {
        self.system.refresh_processes();
        let mut totals = DiskTotals::default();
        for process in self.system.processes().values() {
            let usage = process.disk_usage();
            totals.read_bytes = totals.read_bytes.saturating_add(usage.total_read_bytes);
            totals.written_bytes = totals
                .written_bytes
                .saturating_add(usage.total_written_bytes);
        }
        Ok(totals)
    }
}

impl Counter for DiskCounter {
    fn next_value(&mut self) -> Result<f64, CounterError> {
        let totals = self.totals()?;
        let total = match self.direction {
            IoDirection::Read => totals.read_bytes,
            IoDirection::Write => totals.written_bytes,
        };
        Ok(self.rate.observe(Instant::now(), total))
    }
}

pub fn parse_diskstats(
    text: &str,
    is_whole_disk: impl Fn(&str) -> bool,
) -> Result<DiskTotals, CounterError> {
    let mut totals = DiskTotals::default();
    let mut seen = 0_usize;
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        seen += 1;
        if !is_whole_disk(fields[2]) {
            continue;
        }
        let read = fields[5]
            .parse::<u64>()
            .map_err(|err| CounterError::Parse(format!("{}: {err}", fields[2])))?;
        let written = fields[9]
            .parse::<u64>()
            .map_err(|err| CounterError::Parse(format!("{}: {err}", fields[2])))?;
        totals.read_bytes = totals.read_bytes.saturating_add(read.saturating_mul(SECTOR_BYTES));
        totals.written_bytes = totals
            .written_bytes
            .saturating_add(written.saturating_mul(SECTOR_BYTES));
    }
    if seen == 0 {
        return Err(CounterError::Parse("no disk statistics rows".to_string()));
    }
    Ok(totals)
}

pub fn is_virtual_block_device(name: &str) -> bool {
    ["loop", "ram", "zram", "dm-", "md", "sr", "fd", "nbd"]
        .iter()
        .any(|p| name.starts_with(p))
}

#[cfg(target_os = "linux")]
fn is_whole_disk(name: &str) -> bool {
    !is_virtual_block_device(name) && Path::new("/sys/block").join(name).exists()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetDirection {
    Sent,
    Received,
}

pub struct NetworkCounter {
    system: System,
    iface: String,
    direction: NetDirection,
    rate: RateTracker,
}

impl NetworkCounter {
    pub fn new(iface: &str, direction: NetDirection) -> Result<Self, CounterError> {
        let mut system = System::new();
        system.refresh_networks_list();
        let mut counter = Self {
            system,
            iface: iface.to_string(),
            direction,
            rate: RateTracker::default(),
        };
        counter.next_value()?;
        Ok(counter)
    }
}

impl Counter for NetworkCounter {
    fn next_value(&mut self) -> Result<f64, CounterError> {
        self.system.refresh_networks();
        let data = self
            .system
            .networks()
            .iter()
            .find(|(name, _)| name.as_str() == self.iface)
            .map(|(_, data)| data)
            .ok_or_else(|| {
                CounterError::Unavailable(format!("interface {} not found", self.iface))
            })?;
        let total = match self.direction {
            NetDirection::Sent => data.total_transmitted(),
            NetDirection::Received => data.total_received(),
        };
        Ok(self.rate.observe(Instant::now(), total))
    }
}

fn interface_names() -> Vec<String> {
    let mut system = System::new();
    system.refresh_networks_list();
    let mut names: Vec<String> = system
        .networks()
        .iter()
        .map(|(name, _)| name.to_string())
        .collect();
    names.sort();
    names
}

pub fn is_pseudo_interface(name: &str) -> bool {
    let lower = name.to_lowercase();
    if lower == "lo" || lower.starts_with("lo0") || lower.contains("loopback") {
        return true;
    }
    if ["teredo", "isatap", "6to4"].iter().any(|m| lower.contains(m)) {
        return true;
    }
    ["tun", "utun", "tap", "gif", "stf", "sit", "wg", "ip6tnl", "ipip"]
        .iter()
        .any(|p| lower.starts_with(p))
}

pub fn select_interface(names: &[String]) -> Option<&str> {
    names
        .iter()
        .map(String::as_str)
        .find(|name| !is_pseudo_interface(name))
}

pub fn bind_network(names: &[String]) -> (CounterSlot, CounterSlot) {
    let Some(iface) = select_interface(names) else {
        warn!(
            interfaces = names.len(),
            "no non-loopback network interface found, network reports zero"
        );
        return (CounterSlot::Unavailable, CounterSlot::Unavailable);
    };
    info!(iface = %iface, "network counters bound");
    (
        CounterSlot::from_result("network_sent", NetworkCounter::new(iface, NetDirection::Sent)),
        CounterSlot::from_result(
            "network_received",
            NetworkCounter::new(iface, NetDirection::Received),
        ),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuSource {
    NvidiaSmi,
    Drm,
}

#[derive(Debug, Clone)]
pub struct GpuCategory {
    pub name: String,
    pub source: GpuSource,
    pub instances: Vec<String>,
}

pub fn gpu_categories() -> Vec<GpuCategory> {
    let mut out = Vec::new();
    if let Some(category) = nvidia_category() {
        out.push(category);
    }
    if let Some(category) = drm_category() {
        out.push(category);
    }
    debug!(categories = out.len(), "gpu counter categories discovered");
    out
}

/// Binds the first instance of the first category named like a GPU.
/// Any failure disables the GPU metric for the life of the process.
pub fn bind_gpu(categories: &[GpuCategory]) -> CounterSlot {
    let Some(category) = categories.iter().find(|c| c.name.contains("GPU")) else {
        info!("no gpu counter category found, gpu reports zero");
        return CounterSlot::Unavailable;
    };
    let Some(instance) = category.instances.first() else {
        warn!(category = %category.name, "gpu category has no instances, gpu reports zero");
        return CounterSlot::Unavailable;
    };
    info!(category = %category.name, instance = %instance, "gpu counter bound");
    CounterSlot::from_result("gpu", GpuCounter::new(category.source, instance))
}

pub enum GpuCounter {
    Nvidia { index: String },
    Drm { path: PathBuf },
}

impl GpuCounter {
    pub fn new(source: GpuSource, instance: &str) -> Result<Self, CounterError> {
        let mut counter = match source {
            GpuSource::NvidiaSmi => Self::Nvidia {
                index: instance.to_string(),
            },
            GpuSource::Drm => Self::Drm {
                path: PathBuf::from(instance),
            },
        };
        counter.next_value()?;
        Ok(counter)
    }
}

impl Counter for GpuCounter {
    fn next_value(&mut self) -> Result<f64, CounterError> {
        match self {
            Self::Nvidia { index } => {
                let text = nvidia_smi_stdout(&[
                    "--query-gpu=utilization.gpu",
                    "--format=csv,noheader,nounits",
                    "-i",
                    index,
                ])?;
                let line = text.lines().next().unwrap_or_default();
                parse_f64_loose(line)
                    .ok_or_else(|| CounterError::Parse(format!("nvidia-smi output {line:?}")))
            }
            Self::Drm { path } => {
                let text = std::fs::read_to_string(&path)?;
                parse_f64_loose(&text).ok_or_else(|| {
                    CounterError::Parse(format!("{}: {:?}", path.display(), text.trim()))
                })
            }
        }
    }
}

fn nvidia_category() -> Option<GpuCategory> {
    let text = nvidia_smi_stdout(&["--query-gpu=index", "--format=csv,noheader"]).ok()?;
    let instances: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    Some(GpuCategory {
        name: "NVIDIA GPU".to_string(),
        source: GpuSource::NvidiaSmi,
        instances,
    })
}

#[cfg(target_os = "linux")]
fn drm_category() -> Option<GpuCategory> {
    let entries = fs::read_dir("/sys/class/drm").ok()?;
    let mut instances = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        if !name.starts_with("card") || name.contains('-') {
            continue;
        }
        let busy = path.join("device").join("gpu_busy_percent");
        if busy.exists() {
            instances.push(busy.display().to_string());
        }
    }
    if instances.is_empty() {
        return None;
    }
    instances.sort();
    Some(GpuCategory {
        name: "DRM GPU".to_string(),
        source: GpuSource::Drm,
        instances,
    })
}

#[cfg(not(target_os = "linux"))]
fn drm_category() -> Option<GpuCategory> {
    None
}

fn nvidia_smi_stdout(args: &[&str]) -> Result<String, CounterError> {
    let output = run_nvidia_smi(args).ok_or_else(|| CounterError::Command {
        command: "nvidia-smi".to_string(),
        detail: "not found".to_string(),
    })?;
    if !output.status.success() {
        return Err(CounterError::Command {
            command: "nvidia-smi".to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    String::from_utf8(output.stdout).map_err(|err| CounterError::Parse(err.to_string()))
}

fn run_nvidia_smi(args: &[&str]) -> Option<std::process::Output> {
    if let Ok(output) = Command::new("nvidia-smi").args(args).output() {
        return Some(output);
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(output) = Command::new(r"C:\Windows\System32\nvidia-smi.exe")
            .args(args)
            .output()
        {
            return Some(output);
        }
    }

    None
}

fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}
