#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn around(center: Point, radius: f32) -> Self {
        Self::new(
            center.x - radius,
            center.y - radius,
            radius * 2.0,
            radius * 2.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Paint {
    Solid(Color),
    VerticalGradient { rect: Rect, top: Color, bottom: Color },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub size: f32,
    pub bold: bool,
}

pub trait Surface {
    fn fill_rect(&mut self, rect: Rect, color: Color);
    fn stroke_rect(&mut self, rect: Rect, color: Color, width: f32);
    fn fill_polygon(&mut self, points: &[Point], paint: Paint);
    fn stroke_polyline(&mut self, points: &[Point], color: Color, width: f32);
    fn fill_ellipse(&mut self, bounds: Rect, color: Color);
    fn stroke_ellipse(&mut self, bounds: Rect, color: Color, width: f32);
    fn draw_text(&mut self, text: &str, origin: Point, style: TextStyle, color: Color);
    fn measure_text(&self, text: &str, style: TextStyle) -> f32;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    FillRect { rect: Rect, color: Color },
    StrokeRect { rect: Rect, color: Color, width: f32 },
    FillPolygon { points: Vec<Point>, paint: Paint },
    StrokePolyline { points: Vec<Point>, color: Color, width: f32 },
    FillEllipse { bounds: Rect, color: Color },
    StrokeEllipse { bounds: Rect, color: Color, width: f32 },
    Text { text: String, origin: Point, style: TextStyle, color: Color },
}

/// Records every call. Text width is approximated from the glyph count.
#[derive(Debug, Clone, Default)]
pub struct DrawList {
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn texts(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn polylines(&self) -> Vec<&[Point]> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::StrokePolyline { points, .. } => Some(points.as_slice()),
                _ => None,
            })
            .collect()
    }
}

impl Surface for DrawList {
    fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.commands.push(DrawCommand::FillRect { rect, color });
    }

    fn stroke_rect(&mut self, rect: Rect, color: Color, width: f32) {
        self.commands
            .push(DrawCommand::StrokeRect { rect, color, width });
    }

    fn fill_polygon(&mut self, points: &[Point], paint: Paint) {
        self.commands.push(DrawCommand::FillPolygon {
            points: points.to_vec(),
            paint,
        });
    }

    fn stroke_polyline(&mut self, points: &[Point], color: Color, width: f32) {
        self.commands.push(DrawCommand::StrokePolyline {
            points: points.to_vec(),
            color,
            width,
        });
    }

    fn fill_ellipse(&mut self, bounds: Rect, color: Color) {
        self.commands.push(DrawCommand::FillEllipse { bounds, color });
    }

    fn stroke_ellipse(&mut self, bounds: Rect, color: Color, width: f32) {
        self.commands
            .push(DrawCommand::StrokeEllipse { bounds, color, width });
    }

    fn draw_text(&mut self, text: &str, origin: Point, style: TextStyle, color: Color) {
        self.commands.push(DrawCommand::Text {
            text: text.to_string(),
            origin,
            style,
            color,
        });
    }

    fn measure_text(&self, text: &str, style: TextStyle) -> f32 {
        text.chars().count() as f32 * style.size * 0.6
    }
}
