use crate::collectors::CounterSet;
use crate::config::Config;
use crate::sample::{memory_used_percent, MetricsSample};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

type Subscriber = Box<dyn Fn(MetricsSample) + Send + Sync>;

/// Periodic producer of [`MetricsSample`]s.
///
/// Counter handles sit behind one mutex: a tick holds it while reading and
/// publishing, and [`Sampler::shutdown`] takes it to release the handles, so
/// shutdown waits for an in-flight tick. Subscribers must not call back into
/// the sampler.
pub struct Sampler {
    counters: Mutex<Option<CounterSet>>,
    subscribers: Mutex<Vec<Subscriber>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

enum LoopEvent {
    Shutdown,
    SettingsChanged,
    SettingsClosed,
    Tick,
}

impl Sampler {
    pub fn new(counters: CounterSet) -> Arc<Self> {
        let (shutdown_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            counters: Mutex::new(Some(counters)),
            subscribers: Mutex::new(Vec::new()),
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    pub fn subscribe(&self, subscriber: impl Fn(MetricsSample) + Send + Sync + 'static) {
        lock(&self.subscribers).push(Box::new(subscriber));
    }

    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<MetricsSample> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |sample| {
            let _ = tx.send(sample);
        });
        rx
    }

    /// Reads every counter once and publishes the result.
    /// Returns `None` once the sampler has been shut down.
    pub fn tick(&self) -> Option<MetricsSample> {
        let mut guard = lock(&self.counters);
        let counters = guard.as_mut()?;
        let sample = read_sample(counters);
        trace!(
            cpu = sample.cpu_percent,
            ram = sample.ram_percent,
            gpu = sample.gpu_percent,
            "sample taken"
        );
        for subscriber in lock(&self.subscribers).iter() {
            subscriber(sample);
        }
        Some(sample)
    }

    pub fn start(self: &Arc<Self>, mut settings: watch::Receiver<Config>) {
        let mut task = lock(&self.task);
        if task.is_some() {
            warn!("sampler already started, ignoring");
            return;
        }
        let sampler = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            if *shutdown.borrow_and_update() {
                return;
            }
            let mut period = settings.borrow_and_update().interval();
            let mut ticker = new_ticker(period);
            let mut settings_open = true;
            info!(interval_ms = period.as_millis() as u64, "sampler started");

            loop {
                let event = tokio::select! {
                    _ = shutdown.changed() => LoopEvent::Shutdown,
                    changed = settings.changed(), if settings_open => match changed {
                        Ok(()) => LoopEvent::SettingsChanged,
                        Err(_) => LoopEvent::SettingsClosed,
                    },
                    _ = ticker.tick() => LoopEvent::Tick,
                };

                match event {
                    LoopEvent::Shutdown => break,
                    LoopEvent::SettingsClosed => settings_open = false,
                    LoopEvent::SettingsChanged => {
                        let next = settings.borrow_and_update().interval();
                        if next != period {
                            info!(
                                from_ms = period.as_millis() as u64,
                                to_ms = next.as_millis() as u64,
                                "sampling interval changed"
                            );
                            period = next;
                            ticker = new_ticker(period);
                        }
                    }
                    LoopEvent::Tick => {
                        let sampler = Arc::clone(&sampler);
                        match tokio::task::spawn_blocking(move || sampler.tick()).await {
                            Ok(Some(_)) => {}
                            Ok(None) => break,
                            Err(err) => error!(error = %err, "sampler tick failed"),
                        }
                    }
                }
            }
            debug!("sampler loop stopped");
        });
        *task = Some(handle);
    }

    /// Stops the timer loop and releases the counter handles, waiting for an
    /// in-flight tick first. Safe to call repeatedly and from any thread.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let released = lock(&self.counters).take();
        if released.is_some() {
            info!("sampler shut down, counters released");
        }
        drop(released);
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.counters).is_none()
    }

    pub async fn join(&self) {
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "sampler task failed");
            }
        }
    }
}

fn read_sample(counters: &mut CounterSet) -> MetricsSample {
    let total = counters.total_memory_bytes;
    let ram_percent = counters
        .available_memory
        .read("available_memory")
        .map(|available| memory_used_percent(total, available))
        .unwrap_or(0.0);

    MetricsSample {
        cpu_percent: counters.cpu.read_or_zero("cpu"),
        ram_percent,
        disk_read_bytes_per_sec: counters.disk_read.read_or_zero("disk_read"),
        disk_write_bytes_per_sec: counters.disk_write.read_or_zero("disk_write"),
        network_sent_bytes_per_sec: counters.network_sent.read_or_zero("network_sent"),
        network_received_bytes_per_sec: counters
            .network_received
            .read_or_zero("network_received"),
        gpu_percent: counters.gpu.read_or_zero("gpu"),
        timestamp: SystemTime::now(),
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
