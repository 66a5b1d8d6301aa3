pub mod surface;

use crate::config::{Config, Visibility};
use crate::history::History;
use crate::sample::{Metric, MetricsSample};
use surface::{Color, Paint, Point, Rect, Surface, TextStyle};
use tokio::sync::watch;

pub const MARGIN: f32 = 2.0;
pub const TEXT_HEIGHT: f32 = 12.0;
pub const GRAPH_HEIGHT: f32 = 20.0;
pub const COLUMN_WIDTH: f32 = 58.0;

const LABEL_STYLE: TextStyle = TextStyle {
    size: 7.0,
    bold: true,
};
const TEXT_COLOR: Color = Color::WHITE;
const BACKGROUND: Color = Color::argb(180, 0, 0, 0);
const GRAPH_BACKGROUND: Color = Color::argb(80, 20, 20, 20);
const LINE_WIDTH: f32 = 1.5;
const DOT_RADIUS: f32 = 2.0;

pub fn metric_color(metric: Metric) -> Color {
    match metric {
        Metric::Cpu => Color::rgb(255, 100, 149),
        Metric::Ram => Color::rgb(100, 255, 149),
        Metric::Disk => Color::rgb(149, 100, 255),
        Metric::Network => Color::rgb(255, 255, 100),
        Metric::Gpu => Color::rgb(100, 149, 255),
    }
}

pub fn visible_metrics(visibility: &Visibility) -> impl Iterator<Item = Metric> + '_ {
    Metric::ALL
        .into_iter()
        .filter(move |m| visibility.is_shown(*m))
}

pub fn graph_points(rect: Rect, values: &[f64]) -> Vec<Point> {
    let steps = values.len().saturating_sub(1).max(1) as f32;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let x = rect.x + rect.width * i as f32 / steps;
            Point::new(x, value_y(rect, *v))
        })
        .collect()
}

fn value_y(rect: Rect, value: f64) -> f32 {
    rect.bottom() - rect.height * (value as f32) / 100.0
}

pub struct Renderer {
    history: History<MetricsSample>,
    settings: watch::Receiver<Config>,
}

impl Renderer {
    pub fn new(settings: watch::Receiver<Config>) -> Self {
        Self {
            history: History::default(),
            settings,
        }
    }

    pub fn update_history(&mut self, sample: MetricsSample) {
        self.history.push(sample);
    }

    pub fn history(&self) -> &History<MetricsSample> {
        &self.history
    }

    /// Draws one column per visible metric. An empty history draws nothing.
    pub fn render<S: Surface + ?Sized>(&self, surface: &mut S, width: f32, height: f32) {
        let Some(current) = self.history.latest() else {
            return;
        };
        let visibility = self.settings.borrow().visibility;

        surface.fill_rect(Rect::new(0.0, 0.0, width, height), BACKGROUND);

        for (slot, metric) in visible_metrics(&visibility).enumerate() {
            let values: Vec<f64> = self
                .history
                .iter()
                .map(|s| s.display_value(metric))
                .collect();
            let x = slot as f32 * COLUMN_WIDTH;
            draw_column(
                surface,
                metric,
                current.display_value(metric),
                &values,
                x,
                MARGIN,
            );
        }
    }
}

fn draw_column<S: Surface + ?Sized>(
    surface: &mut S,
    metric: Metric,
    current: f64,
    values: &[f64],
    x: f32,
    y: f32,
) {
    let color = metric_color(metric);

    surface.draw_text(metric.label(), Point::new(x + 1.0, y), LABEL_STYLE, TEXT_COLOR);
    let value_text = format!("{}%", current.round());
    let value_width = surface.measure_text(&value_text, LABEL_STYLE);
    surface.draw_text(
        &value_text,
        Point::new(x + COLUMN_WIDTH - value_width - 1.0, y),
        LABEL_STYLE,
        TEXT_COLOR,
    );

    let graph = Rect::new(
        x + 1.0,
        y + TEXT_HEIGHT + 1.0,
        COLUMN_WIDTH - 2.0,
        GRAPH_HEIGHT,
    );
    surface.fill_rect(graph, GRAPH_BACKGROUND);
    surface.stroke_rect(graph, color, 1.0);

    if values.len() >= 2 {
        let points = graph_points(graph, values);
        fill_area(surface, graph, &points, color);
        surface.stroke_polyline(&points, color, LINE_WIDTH);
    }

    let dot = Point::new(graph.right(), value_y(graph, current));
    surface.fill_ellipse(Rect::around(dot, DOT_RADIUS), color.with_alpha(255));
    surface.stroke_ellipse(
        Rect::around(dot, DOT_RADIUS),
        Color::WHITE.with_alpha(160),
        1.0,
    );
}

fn fill_area<S: Surface + ?Sized>(surface: &mut S, graph: Rect, points: &[Point], color: Color) {
    let mut area = Vec::with_capacity(points.len() + 2);
    area.push(Point::new(graph.x, graph.bottom()));
    area.extend_from_slice(points);
    area.push(Point::new(graph.right(), graph.bottom()));
    surface.fill_polygon(
        &area,
        Paint::VerticalGradient {
            rect: graph,
            top: color.with_alpha(120),
            bottom: color.with_alpha(40),
        },
    );

    // gloss: the part of the area above the midline
    let mid = graph.y + graph.height / 2.0;
    let mut gloss = Vec::with_capacity(points.len() + 2);
    gloss.push(Point::new(graph.x, mid));
    gloss.extend(points.iter().map(|p| Point::new(p.x, p.y.min(mid))));
    gloss.push(Point::new(graph.right(), mid));
    surface.fill_polygon(
        &gloss,
        Paint::VerticalGradient {
            rect: Rect::new(graph.x, graph.y, graph.width, graph.height / 2.0),
            top: Color::WHITE.with_alpha(30),
            bottom: Color::WHITE.with_alpha(5),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::surface::{DrawCommand, DrawList};
    use super::*;
    use crate::history::HISTORY_CAPACITY;
    use std::time::{Duration, SystemTime};

    fn sample(cpu: f64) -> MetricsSample {
        MetricsSample {
            cpu_percent: cpu,
            ram_percent: 50.0,
            disk_read_bytes_per_sec: 0.0,
            disk_write_bytes_per_sec: 0.0,
            network_sent_bytes_per_sec: 0.0,
            network_received_bytes_per_sec: 0.0,
            gpu_percent: 0.0,
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(cpu as u64),
        }
    }

    fn renderer() -> (watch::Sender<Config>, Renderer) {
        let (tx, rx) = watch::channel(Config::default());
        (tx, Renderer::new(rx))
    }

    fn count(list: &DrawList, pred: impl Fn(&DrawCommand) -> bool) -> usize {
        list.commands().iter().filter(|c| pred(c)).count()
    }

    #[test]
    fn empty_history_draws_nothing() {
        let (_tx, renderer) = renderer();
        let mut list = DrawList::new();

        renderer.render(&mut list, 300.0, 40.0);

        assert!(list.is_empty());
    }

    #[test]
    fn single_sample_skips_line_and_fill() {
        let (_tx, mut renderer) = renderer();
        renderer.update_history(sample(42.0));
        let mut list = DrawList::new();

        renderer.render(&mut list, 300.0, 40.0);

        assert!(list.polylines().is_empty());
        assert_eq!(
            count(&list, |c| matches!(c, DrawCommand::FillPolygon { .. })),
            0
        );
        assert_eq!(
            count(&list, |c| matches!(c, DrawCommand::StrokeRect { .. })),
            5
        );
        assert_eq!(
            count(&list, |c| matches!(c, DrawCommand::FillEllipse { .. })),
            5
        );
        assert!(list.texts().contains(&"42%"));
    }

    #[test]
    fn full_history_draws_every_layer() {
        let (_tx, mut renderer) = renderer();
        for i in 0..10 {
            renderer.update_history(sample(i as f64 * 10.0));
        }
        let mut list = DrawList::new();

        renderer.render(&mut list, 300.0, 40.0);

        assert_eq!(
            list.texts(),
            vec!["CPU", "90%", "RAM", "50%", "DISK", "0%", "NET", "0%", "GPU", "0%"]
        );
        let lines = list.polylines();
        assert_eq!(lines.len(), 5);
        assert!(lines.iter().all(|l| l.len() == 10));
        assert_eq!(
            count(&list, |c| matches!(c, DrawCommand::FillPolygon { .. })),
            10
        );
        assert!(matches!(
            list.commands()[0],
            DrawCommand::FillRect { rect, .. } if rect == Rect::new(0.0, 0.0, 300.0, 40.0)
        ));
    }

    #[test]
    fn hidden_metrics_compact_leftward() {
        let (tx, mut renderer) = renderer();
        renderer.update_history(sample(10.0));
        renderer.update_history(sample(20.0));
        tx.send_modify(|cfg| {
            cfg.visibility.ram = false;
            cfg.visibility.disk = false;
        });
        let mut list = DrawList::new();

        renderer.render(&mut list, 300.0, 40.0);

        let labels: Vec<(String, f32)> = list
            .commands()
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Text { text, origin, .. } if !text.ends_with('%') => {
                    Some((text.clone(), origin.x))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            labels,
            vec![
                ("CPU".to_string(), 1.0),
                ("NET".to_string(), COLUMN_WIDTH + 1.0),
                ("GPU".to_string(), COLUMN_WIDTH * 2.0 + 1.0),
            ]
        );
    }

    #[test]
    fn values_are_clamped_when_drawn() {
        let (_tx, mut renderer) = renderer();
        renderer.update_history(sample(-20.0));
        renderer.update_history(sample(150.0));
        let mut list = DrawList::new();

        renderer.render(&mut list, 300.0, 40.0);

        assert_eq!(list.texts()[1], "100%");
        let cpu = list.polylines()[0];
        let graph_top = MARGIN + TEXT_HEIGHT + 1.0;
        assert_eq!(cpu[0].y, graph_top + GRAPH_HEIGHT);
        assert_eq!(cpu[1].y, graph_top);
        assert_eq!(renderer.history().latest().map(|s| s.cpu_percent), Some(150.0));
    }

    #[test]
    fn value_text_rounds_halves_up() {
        let (_tx, mut renderer) = renderer();
        for (cpu, expected) in [(42.5, "43%"), (2.5, "3%"), (0.5, "1%"), (99.4, "99%")] {
            renderer.update_history(sample(cpu));
            let mut list = DrawList::new();

            renderer.render(&mut list, 300.0, 40.0);

            assert_eq!(list.texts()[1], expected, "cpu {cpu}");
        }
    }

    #[test]
    fn graph_points_span_the_box() {
        let rect = Rect::new(1.0, 15.0, 56.0, 20.0);
        let points = graph_points(rect, &[0.0, 50.0, 100.0]);

        assert_eq!(points[0], Point::new(1.0, 35.0));
        assert_eq!(points[1], Point::new(29.0, 25.0));
        assert_eq!(points[2], Point::new(57.0, 15.0));
    }

    #[test]
    fn history_is_bounded() {
        let (_tx, mut renderer) = renderer();
        for i in 0..(HISTORY_CAPACITY + 40) {
            renderer.update_history(sample(i as f64));
        }

        let kept: Vec<f64> = renderer.history().iter().map(|s| s.cpu_percent).collect();
        assert_eq!(kept.len(), HISTORY_CAPACITY);
        assert_eq!(kept[0], 40.0);
        assert_eq!(kept[HISTORY_CAPACITY - 1], (HISTORY_CAPACITY + 39) as f64);
    }

    #[test]
    fn disk_column_shows_derived_activity() {
        let (_tx, mut renderer) = renderer();
        renderer.update_history(MetricsSample {
            disk_read_bytes_per_sec: 5.0 * 1024.0 * 1024.0,
            disk_write_bytes_per_sec: 5.0 * 1024.0 * 1024.0,
            ..sample(0.0)
        });
        let mut list = DrawList::new();

        renderer.render(&mut list, 300.0, 40.0);

        let texts = list.texts();
        let disk = texts.iter().position(|t| *t == "DISK").expect("disk label");
        assert_eq!(texts[disk + 1], "100%");
    }
}
