//! Drawing surfaces the overlay renderer paints through.
//!
//! Every call takes CSS-pixel coordinates. Implementations keep a backing
//! buffer sized by the device pixel ratio and apply that ratio themselves
//! after `set_transform`, so callers never multiply by it.

pub mod raster;

#[cfg(test)]
pub mod recording;

use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::transform::{BackingSize, Point, ScreenBox};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub color: Rgba<u8>,
    pub width: f32,
    /// Blur radius of a glow pass; `None` for a plain stroke.
    pub glow: Option<f32>,
}

impl StrokeStyle {
    pub fn new(color: Rgba<u8>, width: f32) -> Self {
        Self {
            color,
            width,
            glow: None,
        }
    }

    pub fn with_glow(mut self, radius: f32) -> Self {
        self.glow = Some(radius);
        self
    }
}

pub trait Surface {
    /// Reallocate the backing buffer. Contents are lost.
    fn allocate(&mut self, size: BackingSize);

    fn backing_size(&self) -> BackingSize;

    /// Scale applied to every subsequent CSS-pixel coordinate.
    fn set_transform(&mut self, scale: f32);

    fn clear(&mut self);

    /// Draw `image` scaled into `dest`. The same `Arc` on later frames may
    /// reuse earlier scaling work.
    fn draw_image(&mut self, image: &Arc<RgbaImage>, dest: ScreenBox);

    /// Stroke an open polyline. A closed outline repeats its first point.
    fn stroke_path(&mut self, points: &[Point], style: &StrokeStyle);

    fn fill_rect(&mut self, rect: ScreenBox, color: Rgba<u8>);

    /// `origin` is the top-left of the text box.
    fn fill_text(&mut self, text: &str, origin: Point, size: f32, color: Rgba<u8>);

    /// Advance width of `text` at `size`, in CSS pixels.
    fn measure_text(&self, text: &str, size: f32) -> f32;
}

/// Width estimate for surfaces without font metrics: 7.5px per char at 13px.
pub fn estimate_text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * 7.5 * (size / 13.0)
}
