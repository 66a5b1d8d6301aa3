use crate::config::Config;
use crate::render::surface::{DrawList, Surface};
use crate::render::Renderer;
use crate::sample::MetricsSample;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

pub trait OverlayWindow {
    type Surface: Surface;

    fn size(&self) -> (f32, f32);
    fn apply_opacity(&mut self, alpha: u8);
    fn surface(&mut self) -> &mut Self::Surface;
    fn present(&mut self);
}

/// Runs on the single UI context: owns the renderer, receives samples from
/// the sampler's channel, repaints at the refresh cadence when needed.
pub struct Overlay<W: OverlayWindow> {
    window: W,
    renderer: Renderer,
    settings: watch::Receiver<Config>,
    dirty: bool,
}

enum HostEvent {
    Shutdown,
    Sample(MetricsSample),
    SettingsChanged,
    SettingsClosed,
    Refresh,
}

impl<W: OverlayWindow> Overlay<W> {
    pub fn new(mut window: W, settings: watch::Receiver<Config>) -> Self {
        window.apply_opacity(settings.borrow().opacity_alpha());
        Self {
            window,
            renderer: Renderer::new(settings.clone()),
            settings,
            dirty: false,
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn on_sample(&mut self, sample: MetricsSample) {
        self.renderer.update_history(sample);
        self.dirty = true;
    }

    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn paint(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        let (width, height) = self.window.size();
        let surface = self.window.surface();
        self.renderer.render(surface, width, height);
        self.window.present();
        self.dirty = false;
        if let Some(latest) = self.renderer.history().latest() {
            debug!(
                samples = self.renderer.history().len(),
                sample_at = %humantime::format_rfc3339_millis(latest.timestamp),
                "frame painted"
            );
        }
        true
    }

    pub async fn run(
        mut self,
        mut samples: mpsc::UnboundedReceiver<MetricsSample>,
        mut shutdown: watch::Receiver<bool>,
    ) -> W {
        let mut refresh_period = self.settings.borrow_and_update().refresh_interval();
        let mut refresh = new_refresh(refresh_period);
        let mut settings_open = true;

        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => HostEvent::Shutdown,
                sample = samples.recv() => match sample {
                    Some(sample) => HostEvent::Sample(sample),
                    None => HostEvent::Shutdown,
                },
                changed = self.settings.changed(), if settings_open => match changed {
                    Ok(()) => HostEvent::SettingsChanged,
                    Err(_) => HostEvent::SettingsClosed,
                },
                _ = refresh.tick() => HostEvent::Refresh,
            };

            match event {
                HostEvent::Shutdown => break,
                HostEvent::Sample(sample) => self.on_sample(sample),
                HostEvent::SettingsClosed => settings_open = false,
                HostEvent::SettingsChanged => {
                    let cfg = self.settings.borrow_and_update().clone();
                    self.window.apply_opacity(cfg.opacity_alpha());
                    if cfg.refresh_interval() != refresh_period {
                        refresh_period = cfg.refresh_interval();
                        refresh = new_refresh(refresh_period);
                    }
                    self.invalidate();
                }
                HostEvent::Refresh => {
                    self.paint();
                }
            }
        }
        info!("overlay stopped");
        self.window
    }
}

fn new_refresh(period: Duration) -> Interval {
    let mut refresh = tokio::time::interval(period);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
    refresh
}

#[derive(Debug)]
pub struct HeadlessWindow {
    width: f32,
    height: f32,
    alpha: u8,
    frame: DrawList,
    presented: u64,
}

impl HeadlessWindow {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            alpha: 255,
            frame: DrawList::new(),
            presented: 0,
        }
    }

    pub fn alpha(&self) -> u8 {
        self.alpha
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented
    }

    pub fn last_frame(&self) -> &DrawList {
        &self.frame
    }
}

impl OverlayWindow for HeadlessWindow {
    type Surface = DrawList;

    fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    fn apply_opacity(&mut self, alpha: u8) {
        if self.alpha != alpha {
            debug!(alpha, "opacity applied");
        }
        self.alpha = alpha;
    }

    fn surface(&mut self) -> &mut DrawList {
        self.frame.clear();
        &mut self.frame
    }

    fn present(&mut self) {
        self.presented += 1;
        debug!(
            frame = self.presented,
            commands = self.frame.len(),
            "frame presented"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn sample(cpu: f64) -> MetricsSample {
        MetricsSample {
            cpu_percent: cpu,
            ram_percent: 10.0,
            disk_read_bytes_per_sec: 0.0,
            disk_write_bytes_per_sec: 0.0,
            network_sent_bytes_per_sec: 0.0,
            network_received_bytes_per_sec: 0.0,
            gpu_percent: 0.0,
            timestamp: SystemTime::now(),
        }
    }

    fn fast_config() -> Config {
        Config {
            refresh_ms: 16,
            ..Config::default()
        }
    }

    #[test]
    fn paints_only_when_dirty() {
        let (_tx, rx) = watch::channel(Config::default());
        let mut overlay = Overlay::new(HeadlessWindow::new(300.0, 40.0), rx);

        assert!(!overlay.paint());
        overlay.on_sample(sample(1.0));
        overlay.on_sample(sample(2.0));
        overlay.on_sample(sample(3.0));
        assert!(overlay.paint());
        assert!(!overlay.paint());

        assert_eq!(overlay.window().frames_presented(), 1);
        assert_eq!(overlay.renderer().history().len(), 3);
        assert!(overlay.window().last_frame().texts().contains(&"3%"));
    }

    #[test]
    fn invalidate_without_history_presents_a_blank_frame() {
        let (_tx, rx) = watch::channel(Config::default());
        let mut overlay = Overlay::new(HeadlessWindow::new(300.0, 40.0), rx);

        overlay.invalidate();
        assert!(overlay.paint());

        assert!(overlay.window().last_frame().is_empty());
    }

    #[test]
    fn initial_opacity_comes_from_config() {
        let (_tx, rx) = watch::channel(Config::default());
        let overlay = Overlay::new(HeadlessWindow::new(300.0, 40.0), rx);
        assert_eq!(overlay.window().alpha(), 216);
    }

    #[tokio::test]
    async fn run_paints_samples_and_follows_settings() {
        let (settings_tx, settings_rx) = watch::channel(fast_config());
        let (sample_tx, sample_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let overlay = Overlay::new(HeadlessWindow::new(300.0, 40.0), settings_rx);
        let host = tokio::spawn(overlay.run(sample_rx, shutdown_rx));

        sample_tx.send(sample(20.0)).expect("host alive");
        sample_tx.send(sample(40.0)).expect("host alive");
        tokio::time::sleep(Duration::from_millis(100)).await;
        settings_tx.send_modify(|cfg| {
            cfg.opacity_percent = 50;
            cfg.visibility.gpu = false;
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).expect("host alive");

        let window = tokio::time::timeout(Duration::from_secs(2), host)
            .await
            .expect("host stops")
            .expect("host task");
        assert_eq!(window.alpha(), 127);
        assert!(window.frames_presented() >= 2);
        let texts = window.last_frame().texts();
        assert!(texts.contains(&"40%"));
        assert!(!texts.contains(&"GPU"));
    }

    #[tokio::test]
    async fn run_ends_when_sampler_channel_closes() {
        let (_settings_tx, settings_rx) = watch::channel(fast_config());
        let (sample_tx, sample_rx) = mpsc::unbounded_channel::<MetricsSample>();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let overlay = Overlay::new(HeadlessWindow::new(300.0, 40.0), settings_rx);

        drop(sample_tx);
        let window = tokio::time::timeout(
            Duration::from_secs(2),
            overlay.run(sample_rx, shutdown_rx),
        )
        .await
        .expect("host stops");

        assert_eq!(window.frames_presented(), 0);
    }
}
