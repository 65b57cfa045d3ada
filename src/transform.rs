//! Contain-fit mapping from media coordinates to display (CSS) pixels.
//!
//! The media is scaled uniformly to fit the container and centered, so one
//! axis is letterboxed. Detections are mapped de-normalize -> scale -> offset.

use crate::detection::{CoordinateSpace, Detection};

pub const DEFAULT_DPR_CAP: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in container CSS pixels. Width/height may be negative
/// for inverted detections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenBox {
    pub screen_x: f32,
    pub screen_y: f32,
    pub screen_width: f32,
    pub screen_height: f32,
}

impl ScreenBox {
    pub fn new(screen_x: f32, screen_y: f32, screen_width: f32, screen_height: f32) -> Self {
        Self {
            screen_x,
            screen_y,
            screen_width,
            screen_height,
        }
    }

    pub fn right(&self) -> f32 {
        self.screen_x + self.screen_width
    }

    pub fn bottom(&self) -> f32 {
        self.screen_y + self.screen_height
    }

    /// `2 * (width + height)`, measured on edge lengths.
    pub fn perimeter(&self) -> f32 {
        2.0 * (self.screen_width.abs() + self.screen_height.abs())
    }

    pub fn is_finite(&self) -> bool {
        self.screen_x.is_finite()
            && self.screen_y.is_finite()
            && self.screen_width.is_finite()
            && self.screen_height.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayTransform {
    pub fit_scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub scaled_w: f32,
    pub scaled_h: f32,
    media_w: f32,
    media_h: f32,
}

impl DisplayTransform {
    /// Contain-fit `media` inside `container`. Returns `None` when either side
    /// has no area yet (container not laid out, media not decoded).
    pub fn contain(container_w: f32, container_h: f32, media_w: u32, media_h: u32) -> Option<Self> {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        let media_w = media_w as f32;
        let media_h = media_h as f32;
        if !(valid(container_w) && valid(container_h) && valid(media_w) && valid(media_h)) {
            return None;
        }

        let width_ratio = container_w / media_w;
        let height_ratio = container_h / media_h;

        // The limiting axis fills the container exactly so its offset is a hard zero.
        let transform = if width_ratio <= height_ratio {
            let scaled_h = media_h * width_ratio;
            Self {
                fit_scale: width_ratio,
                offset_x: 0.0,
                offset_y: ((container_h - scaled_h) / 2.0).max(0.0),
                scaled_w: container_w,
                scaled_h,
                media_w,
                media_h,
            }
        } else {
            let scaled_w = media_w * height_ratio;
            Self {
                fit_scale: height_ratio,
                offset_x: ((container_w - scaled_w) / 2.0).max(0.0),
                offset_y: 0.0,
                scaled_w,
                scaled_h: container_h,
                media_w,
                media_h,
            }
        };
        Some(transform)
    }

    /// Where the media itself is drawn.
    pub fn image_rect(&self) -> ScreenBox {
        ScreenBox::new(self.offset_x, self.offset_y, self.scaled_w, self.scaled_h)
    }

    pub fn map_detection(&self, detection: &Detection) -> ScreenBox {
        let (x1, y1, x2, y2) = match detection.coordinate_space() {
            CoordinateSpace::Normalized => (
                detection.x1 * self.media_w,
                detection.y1 * self.media_h,
                detection.x2 * self.media_w,
                detection.y2 * self.media_h,
            ),
            CoordinateSpace::Pixel => (detection.x1, detection.y1, detection.x2, detection.y2),
        };

        ScreenBox {
            screen_x: x1 * self.fit_scale + self.offset_x,
            screen_y: y1 * self.fit_scale + self.offset_y,
            screen_width: (x2 - x1) * self.fit_scale,
            screen_height: (y2 - y1) * self.fit_scale,
        }
    }
}

/// Device pixel ratio actually applied to the backing buffer.
pub fn effective_dpr(device_pixel_ratio: f32, cap: f32) -> f32 {
    let cap = if cap.is_finite() && cap > 0.0 { cap } else { DEFAULT_DPR_CAP };
    if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
        device_pixel_ratio.min(cap)
    } else {
        1.0
    }
}

/// Physical size of a drawing surface's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackingSize {
    pub width: u32,
    pub height: u32,
}

impl BackingSize {
    pub fn for_css(css_w: u32, css_h: u32, dpr: f32) -> Self {
        Self {
            width: (css_w as f32 * dpr).round() as u32,
            height: (css_h as f32 * dpr).round() as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-3, "{} != {}", a, b);
    }

    #[test]
    fn test_fit_scale_and_offsets() {
        let sizes = [(1000u32, 500u32), (640, 480), (480, 640), (1920, 1080), (3, 7), (500, 500)];
        let containers = [(500.0f32, 250.0f32), (800.0, 600.0), (333.0, 777.0), (1.0, 1.0), (1234.5, 99.25)];

        for &(w, h) in &sizes {
            for &(cw, ch) in &containers {
                let t = DisplayTransform::contain(cw, ch, w, h).unwrap();
                let (width_ratio, height_ratio) = (cw / w as f32, ch / h as f32);
                let scale = width_ratio.min(height_ratio);
                assert_eq!(t.fit_scale, scale);

                // Limiting axis fills the container with no offset
                if width_ratio <= height_ratio {
                    assert_eq!(t.offset_x, 0.0, "{}x{} in {}x{}", w, h, cw, ch);
                    assert_eq!(t.scaled_w, cw);
                } else {
                    assert_eq!(t.offset_y, 0.0, "{}x{} in {}x{}", w, h, cw, ch);
                    assert_eq!(t.scaled_h, ch);
                }

                // The other axis is centered
                let (sw, sh) = (w as f32 * scale, h as f32 * scale);
                assert_close(t.scaled_w, sw);
                assert_close(t.scaled_h, sh);
                assert_close(t.offset_x, ((cw - sw) / 2.0).max(0.0));
                assert_close(t.offset_y, ((ch - sh) / 2.0).max(0.0));
                // Letterbox bars exist exactly when the aspect ratios differ
                if width_ratio < height_ratio {
                    assert!(t.offset_y > 0.0, "{}x{} in {}x{}", w, h, cw, ch);
                } else if width_ratio > height_ratio {
                    assert!(t.offset_x > 0.0, "{}x{} in {}x{}", w, h, cw, ch);
                } else {
                    assert!(t.offset_x < 1e-3 && t.offset_y < 1e-3);
                }
                assert!(t.offset_x + t.scaled_w <= cw + 1e-3);
                assert!(t.offset_y + t.scaled_h <= ch + 1e-3);
            }
        }
    }

    #[test]
    fn test_letterbox_offsets() {
        // Tall container: bars above and below
        let t = DisplayTransform::contain(500.0, 500.0, 1000, 500).unwrap();
        assert_eq!(t.fit_scale, 0.5);
        assert_eq!(t.offset_x, 0.0);
        assert_close(t.offset_y, 125.0);
        assert_close(t.scaled_h, 250.0);

        // Wide container: bars left and right
        let t = DisplayTransform::contain(1000.0, 250.0, 1000, 500).unwrap();
        assert_eq!(t.offset_y, 0.0);
        assert_close(t.offset_x, 250.0);
        assert_close(t.scaled_w, 500.0);
    }

    #[test]
    fn test_normalized_detection_mapping() {
        let t = DisplayTransform::contain(500.0, 250.0, 1000, 500).unwrap();
        assert_eq!(t.fit_scale, 0.5);
        assert_eq!((t.offset_x, t.offset_y), (0.0, 0.0));

        let det = Detection::new(0.1, 0.1, 0.5, 0.5, 0.9, "crack");
        let b = t.map_detection(&det);
        assert_close(b.screen_x, 50.0);
        assert_close(b.screen_y, 25.0);
        assert_close(b.right(), 250.0);
        assert_close(b.bottom(), 125.0);
    }

    #[test]
    fn test_pixel_detection_mapping() {
        let t = DisplayTransform::contain(500.0, 250.0, 1000, 500).unwrap();
        let det = Detection::new(100.0, 100.0, 300.0, 300.0, 0.9, "crack");
        let b = t.map_detection(&det);
        assert_close(b.screen_x, 50.0);
        assert_close(b.screen_y, 50.0);
        assert_close(b.right(), 150.0);
        assert_close(b.bottom(), 150.0);
    }

    #[test]
    fn test_offsets_applied_after_scale() {
        let t = DisplayTransform::contain(500.0, 500.0, 1000, 500).unwrap();
        let det = Detection::new(0.0, 0.0, 1000.0, 500.0, 0.9, "crack");
        let b = t.map_detection(&det);
        assert_eq!(b, t.image_rect());
    }

    #[test]
    fn test_mapping_is_pure() {
        let t = DisplayTransform::contain(731.0, 411.0, 1280, 720).unwrap();
        let det = Detection::new(12.5, 40.25, 600.0, 333.3, 0.5, "pothole");
        let a = t.map_detection(&det);
        let b = t.map_detection(&det);
        assert_eq!(a.screen_x.to_bits(), b.screen_x.to_bits());
        assert_eq!(a.screen_y.to_bits(), b.screen_y.to_bits());
        assert_eq!(a.screen_width.to_bits(), b.screen_width.to_bits());
        assert_eq!(a.screen_height.to_bits(), b.screen_height.to_bits());
        assert_eq!(t, DisplayTransform::contain(731.0, 411.0, 1280, 720).unwrap());
    }

    #[test]
    fn test_zero_size_guard() {
        assert!(DisplayTransform::contain(0.0, 250.0, 1000, 500).is_none());
        assert!(DisplayTransform::contain(500.0, 0.0, 1000, 500).is_none());
        assert!(DisplayTransform::contain(500.0, 250.0, 0, 500).is_none());
        assert!(DisplayTransform::contain(f32::NAN, 250.0, 1000, 500).is_none());
        assert!(DisplayTransform::contain(f32::INFINITY, 250.0, 1000, 500).is_none());
    }

    #[test]
    fn test_inverted_box_keeps_negative_extent() {
        let t = DisplayTransform::contain(500.0, 250.0, 1000, 500).unwrap();
        let det = Detection::new(300.0, 100.0, 100.0, 300.0, 0.9, "crack");
        let b = t.map_detection(&det);
        assert_close(b.screen_width, -100.0);
        assert_close(b.perimeter(), 400.0);
    }

    #[test]
    fn test_effective_dpr_cap() {
        assert_eq!(effective_dpr(1.0, 2.0), 1.0);
        assert_eq!(effective_dpr(1.5, 2.0), 1.5);
        assert_eq!(effective_dpr(3.0, 2.0), 2.0);
        assert_eq!(effective_dpr(0.0, 2.0), 1.0);
        assert_eq!(effective_dpr(f32::NAN, 2.0), 1.0);
        assert_eq!(effective_dpr(3.0, -1.0), 2.0);
    }

    #[test]
    fn test_backing_size() {
        assert_eq!(BackingSize::for_css(500, 250, 2.0), BackingSize { width: 1000, height: 500 });
        assert_eq!(BackingSize::for_css(333, 101, 1.5), BackingSize { width: 500, height: 152 });
        assert!(BackingSize::for_css(0, 100, 2.0).is_empty());
    }
}
