use std::sync::Arc;

use image::{Rgba, RgbaImage};

use super::{estimate_text_width, StrokeStyle, Surface};
use crate::transform::{BackingSize, Point, ScreenBox};

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    Clear,
    Image(ScreenBox),
    Stroke(Vec<Point>, StrokeStyle),
    FillRect(ScreenBox, Rgba<u8>),
    Text(String, Point),
}

/// Test double that records draw calls and counts buffer allocations.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pub size: BackingSize,
    pub scale: f32,
    pub allocations: usize,
    pub transforms: usize,
    pub calls: Vec<DrawCall>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls since the last `clear`, i.e. the most recent frame.
    pub fn last_frame(&self) -> &[DrawCall] {
        let start = self
            .calls
            .iter()
            .rposition(|c| *c == DrawCall::Clear)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.calls[start..]
    }

    pub fn frame_count(&self) -> usize {
        self.calls.iter().filter(|c| **c == DrawCall::Clear).count()
    }

    pub fn strokes(&self) -> Vec<(Vec<Point>, StrokeStyle)> {
        self.last_frame()
            .iter()
            .filter_map(|c| match c {
                DrawCall::Stroke(points, style) => Some((points.clone(), *style)),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.last_frame()
            .iter()
            .filter_map(|c| match c {
                DrawCall::Text(text, _) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Surface for RecordingSurface {
    fn allocate(&mut self, size: BackingSize) {
        self.size = size;
        self.allocations += 1;
    }

    fn backing_size(&self) -> BackingSize {
        self.size
    }

    fn set_transform(&mut self, scale: f32) {
        self.scale = scale;
        self.transforms += 1;
    }

    fn clear(&mut self) {
        self.calls.push(DrawCall::Clear);
    }

    fn draw_image(&mut self, _image: &Arc<RgbaImage>, dest: ScreenBox) {
        self.calls.push(DrawCall::Image(dest));
    }

    fn stroke_path(&mut self, points: &[Point], style: &StrokeStyle) {
        self.calls.push(DrawCall::Stroke(points.to_vec(), *style));
    }

    fn fill_rect(&mut self, rect: ScreenBox, color: Rgba<u8>) {
        self.calls.push(DrawCall::FillRect(rect, color));
    }

    fn fill_text(&mut self, text: &str, origin: Point, _size: f32, _color: Rgba<u8>) {
        self.calls.push(DrawCall::Text(text.to_string(), origin));
    }

    fn measure_text(&self, text: &str, size: f32) -> f32 {
        estimate_text_width(text, size)
    }
}
