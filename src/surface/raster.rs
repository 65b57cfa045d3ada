//! CPU raster surface backed by an RGBA buffer.
//!
//! Strokes are filled quads with square caps, clipped to the buffer before
//! rasterizing. Glow is a Gaussian-blurred copy of the stroke composited from
//! a scratch layer, and labels use a TrueType font when one is configured.

use std::path::Path;
use std::sync::Arc;

use ab_glyph::{FontVec, PxScale};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_line_segment_mut, draw_polygon_mut, draw_text_mut, text_size, Blend,
};
use imageproc::point::Point as PolyPoint;
use imageproc::rect::Rect;
#[allow(unused_imports)]
use log::{debug, info, warn};

use super::{estimate_text_width, StrokeStyle, Surface};
use crate::error::AppError;
use crate::transform::{BackingSize, Point, ScreenBox};

pub const DEFAULT_BACKGROUND: Rgba<u8> = Rgba([16, 16, 20, 255]);

/// Base image resized for the current destination rectangle. Holding the
/// source keeps its allocation alive, so pointer identity stays meaningful.
struct ScaledImage {
    source: Arc<RgbaImage>,
    size: (u32, u32),
    image: RgbaImage,
}

pub struct RasterSurface {
    buffer: RgbaImage,
    scale: f32,
    background: Rgba<u8>,
    font: Option<FontVec>,
    scaled: Option<ScaledImage>,
    warned_missing_font: bool,
}

impl Default for RasterSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RasterSurface {
    pub fn new() -> Self {
        Self {
            buffer: RgbaImage::new(0, 0),
            scale: 1.0,
            background: DEFAULT_BACKGROUND,
            font: None,
            scaled: None,
            warned_missing_font: false,
        }
    }

    pub fn with_font(mut self, path: &Path) -> Result<Self, AppError> {
        let bytes = std::fs::read(path)
            .map_err(|e| AppError::new(format!("Failed to read font {}: {}", path.display(), e)))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| AppError::new(format!("Invalid font {}: {}", path.display(), e)))?;
        info!("Loaded label font from {}", path.display());
        self.font = Some(font);
        Ok(self)
    }

    /// Surface using the font at `path`, or no font when it is unset or fails to load.
    pub fn with_label_font(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::new();
        };
        match Self::new().with_font(path) {
            Ok(surface) => surface,
            Err(e) => {
                warn!("{}; labels will be drawn without text", e);
                Self::new()
            }
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.buffer
    }

    pub fn save_png(&self, path: &Path) -> Result<(), AppError> {
        self.buffer.save(path)?;
        Ok(())
    }

    fn to_backing(&self, p: Point) -> (f32, f32) {
        (p.x * self.scale, p.y * self.scale)
    }

    fn blended(&mut self, draw: impl FnOnce(&mut Blend<RgbaImage>)) {
        let mut canvas = Blend(std::mem::take(&mut self.buffer));
        draw(&mut canvas);
        self.buffer = canvas.0;
    }

    fn draw_glow(&mut self, points: &[(f32, f32)], width: f32, radius: f32, color: Rgba<u8>) {
        let sigma = (radius * self.scale / 2.0).max(0.5);
        let margin = (sigma * 3.0 + width).ceil();

        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for &(x, y) in points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        // Only blur the neighbourhood of the path, clipped to the buffer.
        let x0 = (min_x - margin).floor().max(0.0) as u32;
        let y0 = (min_y - margin).floor().max(0.0) as u32;
        let x1 = ((max_x + margin).ceil().max(0.0) as u32).min(self.buffer.width());
        let y1 = ((max_y + margin).ceil().max(0.0) as u32).min(self.buffer.height());
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        // Transparent pixels carry the glow color so blurring only fades alpha
        let mut layer = RgbaImage::from_pixel(x1 - x0, y1 - y0, Rgba([color[0], color[1], color[2], 0]));
        let local: Vec<(f32, f32)> = points
            .iter()
            .map(|&(x, y)| (x - x0 as f32, y - y0 as f32))
            .collect();
        let glow_color = Rgba([color[0], color[1], color[2], 200]);
        stroke_polyline(&mut layer, &local, width * 1.5, glow_color);

        let blurred = imageproc::filter::gaussian_blur_f32(&layer, sigma);
        imageops::overlay(&mut self.buffer, &blurred, x0 as i64, y0 as i64);
    }
}

impl Surface for RasterSurface {
    fn allocate(&mut self, size: BackingSize) {
        debug!("Allocating raster surface {}x{}", size.width, size.height);
        self.buffer = RgbaImage::from_pixel(size.width, size.height, self.background);
        self.scaled = None;
    }

    fn backing_size(&self) -> BackingSize {
        BackingSize {
            width: self.buffer.width(),
            height: self.buffer.height(),
        }
    }

    fn set_transform(&mut self, scale: f32) {
        self.scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
    }

    fn clear(&mut self) {
        let background = self.background;
        for pixel in self.buffer.pixels_mut() {
            *pixel = background;
        }
    }

    fn draw_image(&mut self, image: &Arc<RgbaImage>, dest: ScreenBox) {
        let x = (dest.screen_x * self.scale).round() as i64;
        let y = (dest.screen_y * self.scale).round() as i64;
        let w = (dest.screen_width * self.scale).round().max(0.0) as u32;
        let h = (dest.screen_height * self.scale).round().max(0.0) as u32;
        if w == 0 || h == 0 || image.width() == 0 || image.height() == 0 {
            return;
        }

        let scaled = match self.scaled.take() {
            Some(cached) if Arc::ptr_eq(&cached.source, image) && cached.size == (w, h) => cached,
            _ => {
                debug!("Resizing base image {}x{} -> {}x{}", image.width(), image.height(), w, h);
                ScaledImage {
                    source: Arc::clone(image),
                    size: (w, h),
                    image: imageops::resize(image.as_ref(), w, h, FilterType::Triangle),
                }
            }
        };
        imageops::overlay(&mut self.buffer, &scaled.image, x, y);
        self.scaled = Some(scaled);
    }

    fn stroke_path(&mut self, points: &[Point], style: &StrokeStyle) {
        if points.len() < 2 || self.buffer.width() == 0 || self.buffer.height() == 0 {
            return;
        }
        let scaled: Vec<(f32, f32)> = points.iter().map(|p| self.to_backing(*p)).collect();
        if scaled.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return;
        }
        let width = (style.width * self.scale).max(1.0);

        match style.glow {
            Some(radius) if radius > 0.0 => self.draw_glow(&scaled, width, radius, style.color),
            _ => {
                let color = style.color;
                self.blended(|canvas| stroke_polyline(canvas, &scaled, width, color));
            }
        }
    }

    fn fill_rect(&mut self, rect: ScreenBox, color: Rgba<u8>) {
        if !rect.is_finite() {
            return;
        }
        let (width, height) = (self.buffer.width() as f32, self.buffer.height() as f32);
        let x0 = (rect.screen_x.min(rect.right()) * self.scale).round().max(0.0);
        let y0 = (rect.screen_y.min(rect.bottom()) * self.scale).round().max(0.0);
        let x1 = (rect.screen_x.max(rect.right()) * self.scale).round().min(width);
        let y1 = (rect.screen_y.max(rect.bottom()) * self.scale).round().min(height);
        if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
            return;
        }
        let rect = Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32);
        self.blended(|canvas| draw_filled_rect_mut(canvas, rect, color));
    }

    fn fill_text(&mut self, text: &str, origin: Point, size: f32, color: Rgba<u8>) {
        let Some(font) = self.font.as_ref() else {
            if !self.warned_missing_font {
                warn!("No label font configured; label text is not rendered");
                self.warned_missing_font = true;
            }
            return;
        };
        let (x, y) = self.to_backing(origin);
        let scale = PxScale::from(size * self.scale);
        let (text_w, text_h) = text_size(scale, font, text);
        let (width, height) = (self.buffer.width() as f32, self.buffer.height() as f32);
        let visible = x.is_finite()
            && y.is_finite()
            && x < width
            && y < height
            && x + text_w as f32 > 0.0
            && y + (text_h as f32).max(size * self.scale) > 0.0;
        if !visible {
            return;
        }
        draw_text_mut(&mut self.buffer, color, x.round() as i32, y.round() as i32, scale, font, text);
    }

    fn measure_text(&self, text: &str, size: f32) -> f32 {
        match self.font.as_ref() {
            Some(font) => {
                let (w, _) = text_size(PxScale::from(size * self.scale), font, text);
                w as f32 / self.scale
            }
            None => estimate_text_width(text, size),
        }
    }
}

/// Stroke each segment after clipping it to the canvas grown by the stroke
/// width. Segments entirely outside are skipped.
fn stroke_polyline<C>(canvas: &mut C, points: &[(f32, f32)], width: f32, color: Rgba<u8>)
where
    C: imageproc::drawing::Canvas<Pixel = Rgba<u8>>,
{
    let (canvas_w, canvas_h) = canvas.dimensions();
    let margin = width + 2.0;
    let min = (-margin, -margin);
    let max = (canvas_w as f32 + margin, canvas_h as f32 + margin);
    for pair in points.windows(2) {
        if let Some((a, b)) = clip_segment(pair[0], pair[1], min, max) {
            stroke_segment(canvas, a, b, width, color);
        }
    }
}

/// Liang-Barsky clip of segment `a`-`b` against the box `min`..`max`.
fn clip_segment(
    a: (f32, f32),
    b: (f32, f32),
    min: (f32, f32),
    max: (f32, f32),
) -> Option<((f32, f32), (f32, f32))> {
    // f64 keeps the clipped endpoints accurate for very distant inputs
    let (ax, ay) = (a.0 as f64, a.1 as f64);
    let (dx, dy) = (b.0 as f64 - ax, b.1 as f64 - ay);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);

    let edges = [
        (-dx, ax - min.0 as f64),
        (dx, max.0 as f64 - ax),
        (-dy, ay - min.1 as f64),
        (dy, max.1 as f64 - ay),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| ((ax + t * dx) as f32, (ay + t * dy) as f32);
    Some((at(t0), at(t1)))
}

/// Thick segment as a quad extended by half the width at both ends, so
/// consecutive segments meet in square corners.
fn stroke_segment<C>(canvas: &mut C, a: (f32, f32), b: (f32, f32), width: f32, color: Rgba<u8>)
where
    C: imageproc::drawing::Canvas<Pixel = Rgba<u8>>,
{
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let length = (dx * dx + dy * dy).sqrt();
    if length <= f32::EPSILON {
        return;
    }
    let half = width / 2.0;
    let (ux, uy) = (dx / length * half, dy / length * half);
    let (nx, ny) = (-uy, ux);
    let (sx, sy) = (a.0 - ux, a.1 - uy);
    let (ex, ey) = (b.0 + ux, b.1 + uy);

    let corner = |x: f32, y: f32| PolyPoint::new(x.round() as i32, y.round() as i32);
    let quad = [
        corner(sx + nx, sy + ny),
        corner(ex + nx, ey + ny),
        corner(ex - nx, ey - ny),
        corner(sx - nx, sy - ny),
    ];

    if quad[0] == quad[3] || quad[0] == quad[1] {
        draw_line_segment_mut(canvas, a, b, color);
    } else {
        draw_polygon_mut(canvas, &quad, color);
    }
}
