//! Draws the base image and the animated detection boxes onto a [`Surface`].
//!
//! The renderer is the single owner of the surface, the detection list, the
//! animation progress and the display transform. Each new detection list
//! starts a cycle and hands out a [`FrameRequest`]; the frame loop feeds that
//! token back through [`OverlayRenderer::on_frame`] until it comes back `None`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
#[allow(unused_imports)]
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::animation::{AnimationState, BoxPhase, Timeline};
use crate::detection::Detection;
use crate::resize::{ResizeCoordinator, ResizeOutcome};
use crate::surface::{StrokeStyle, Surface};
use crate::transform::{DisplayTransform, Point, ScreenBox};

/// What to do with boxes whose second corner lies above or left of the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvertedBoxPolicy {
    /// Draw exactly as computed (negative width/height).
    #[default]
    Draw,
    /// Swap corners so the box is well formed.
    Normalize,
    /// Leave the box out.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub stroke_width: f32,
    pub glow_radius: f32,
    pub label_font_size: f32,
    pub label_height: f32,
    pub label_padding: f32,
    pub label_gap: f32,
    pub animate: bool,
    pub inverted_boxes: InvertedBoxPolicy,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            stroke_width: 3.0,
            glow_radius: 10.0,
            label_font_size: 13.0,
            label_height: 18.0,
            label_padding: 4.0,
            label_gap: 2.0,
            animate: true,
            inverted_boxes: InvertedBoxPolicy::Draw,
        }
    }
}

/// Permission to draw one more frame of a specific cycle.
///
/// Not `Clone`: whoever holds it is the only draw loop for that cycle.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameRequest {
    cycle: u64,
}

pub struct OverlayRenderer<S: Surface> {
    surface: S,
    style: OverlayStyle,
    resize: ResizeCoordinator,
    image: Option<Arc<RgbaImage>>,
    detections: Vec<Detection>,
    transform: Option<DisplayTransform>,
    animation: AnimationState,
    cycle: u64,
}

impl<S: Surface> OverlayRenderer<S> {
    pub fn new(surface: S, style: OverlayStyle, timeline: Timeline, dpr_cap: f32) -> Self {
        Self {
            surface,
            style,
            resize: ResizeCoordinator::new(dpr_cap),
            image: None,
            detections: Vec::new(),
            transform: None,
            animation: AnimationState::new(timeline),
            cycle: 0,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn progress(&self) -> f32 {
        self.animation.progress()
    }

    pub fn transform(&self) -> Option<DisplayTransform> {
        self.transform
    }

    /// Replace the base image. Boxes already on screen are kept and redrawn
    /// against the new image's dimensions.
    pub fn set_image(&mut self, image: Arc<RgbaImage>) {
        debug!("Base image set: {}x{}", image.width(), image.height());
        self.image = Some(image);
        self.update_transform();
        self.draw();
    }

    /// Replace the detection list and start a new reveal cycle. Tokens from
    /// earlier cycles stop being honored.
    pub fn set_detections(&mut self, detections: Vec<Detection>) -> Option<FrameRequest> {
        self.detections = self.apply_inverted_policy(detections);
        self.start_cycle()
    }

    /// Run the reveal again for the current list.
    pub fn replay(&mut self) -> Option<FrameRequest> {
        self.start_cycle()
    }

    /// Advance to `now` and draw. Returns the token again while more frames
    /// are needed; stale tokens are dropped without drawing.
    pub fn on_frame(&mut self, request: FrameRequest, now: Instant) -> Option<FrameRequest> {
        if !self.is_current(&request) {
            return None;
        }
        let more = self.animation.tick(now);
        self.draw();
        more.then_some(request)
    }

    /// Like [`on_frame`](Self::on_frame) with an explicit frame interval, for
    /// fixed-rate offline rendering.
    pub fn on_frame_after(&mut self, request: FrameRequest, delta: Duration) -> Option<FrameRequest> {
        if !self.is_current(&request) {
            return None;
        }
        let more = self.animation.advance(delta);
        self.draw();
        more.then_some(request)
    }

    /// Container size changed (or may have). Reallocates the surface when the
    /// rounded size or pixel ratio moved, then redraws if an image is loaded.
    pub fn resize(&mut self, css_w: f32, css_h: f32, device_pixel_ratio: f32) -> ResizeOutcome {
        let outcome = self.resize.sync(&mut self.surface, css_w, css_h, device_pixel_ratio);
        match outcome {
            ResizeOutcome::Resized { .. } => {
                self.update_transform();
                if self.image.is_some() {
                    self.draw();
                }
            }
            ResizeOutcome::NotLaidOut => self.transform = None,
            ResizeOutcome::Unchanged => {}
        }
        outcome
    }

    /// Paint the current state: base image, then every visible box.
    pub fn draw(&mut self) {
        if !self.resize.is_laid_out() {
            debug!("Skipping draw: container not laid out");
            return;
        }
        self.surface.clear();

        let (Some(transform), Some(image)) = (self.transform, self.image.as_ref()) else {
            return;
        };
        self.surface.draw_image(image, transform.image_rect());

        for (index, detection) in self.detections.iter().enumerate() {
            let phase = self.animation.phase(index);
            if phase == BoxPhase::Hidden {
                continue;
            }
            let screen = transform.map_detection(detection);
            if !screen.is_finite() {
                continue;
            }
            let color = detection.display_color();
            let stroke = StrokeStyle::new(color, self.style.stroke_width);

            match phase {
                BoxPhase::Drawing(local) => {
                    let path = clockwise_outline(&screen, screen.perimeter() * local);
                    self.surface.stroke_path(&path, &stroke);
                }
                BoxPhase::Complete => {
                    let path = closed_outline(&screen);
                    // Glow goes down first so the crisp outline stays on top
                    if self.style.glow_radius > 0.0 {
                        self.surface
                            .stroke_path(&path, &stroke.with_glow(self.style.glow_radius));
                    }
                    self.surface.stroke_path(&path, &stroke);
                    draw_label(&mut self.surface, &self.style, &screen, &detection.label(), color);
                }
                BoxPhase::Hidden => {}
            }
        }
    }

    fn is_current(&self, request: &FrameRequest) -> bool {
        if request.cycle != self.cycle {
            debug!("Dropping frame request from cycle {} (current {})", request.cycle, self.cycle);
            return false;
        }
        true
    }

    fn start_cycle(&mut self) -> Option<FrameRequest> {
        self.cycle += 1;
        self.animation.restart(self.detections.len());
        if !self.style.animate {
            self.animation.finish();
        }
        self.draw();

        if self.animation.is_animating() {
            Some(FrameRequest { cycle: self.cycle })
        } else {
            None
        }
    }

    fn update_transform(&mut self) {
        self.transform = match (self.resize.css_size(), self.image.as_ref()) {
            (Some((css_w, css_h)), Some(image)) => {
                DisplayTransform::contain(css_w as f32, css_h as f32, image.width(), image.height())
            }
            _ => None,
        };
    }

    fn apply_inverted_policy(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let inverted = detections.iter().filter(|d| d.is_inverted()).count();
        if inverted == 0 {
            return detections;
        }
        warn!(
            "{} of {} detections have inverted corners, policy: {:?}",
            inverted,
            detections.len(),
            self.style.inverted_boxes
        );
        match self.style.inverted_boxes {
            InvertedBoxPolicy::Draw => detections,
            InvertedBoxPolicy::Normalize => detections.iter().map(Detection::normalized_corners).collect(),
            InvertedBoxPolicy::Skip => detections.into_iter().filter(|d| !d.is_inverted()).collect(),
        }
    }
}

fn corners(screen: &ScreenBox) -> [Point; 4] {
    [
        Point::new(screen.screen_x, screen.screen_y),
        Point::new(screen.right(), screen.screen_y),
        Point::new(screen.right(), screen.bottom()),
        Point::new(screen.screen_x, screen.bottom()),
    ]
}

fn closed_outline(screen: &ScreenBox) -> Vec<Point> {
    let [tl, tr, br, bl] = corners(screen);
    vec![tl, tr, br, bl, tl]
}

/// Open path from the top-left corner clockwise (top, right, bottom, left),
/// cut off after `length` CSS pixels. The edge that crosses the cut ends at
/// the interpolated point.
pub fn clockwise_outline(screen: &ScreenBox, length: f32) -> Vec<Point> {
    let outline = closed_outline(screen);
    let mut path = vec![outline[0]];
    let mut remaining = length.max(0.0);

    for edge in outline.windows(2) {
        if remaining <= 0.0 {
            break;
        }
        let (from, to) = (edge[0], edge[1]);
        let edge_length = (to.x - from.x).abs() + (to.y - from.y).abs();
        if remaining >= edge_length {
            path.push(to);
            remaining -= edge_length;
        } else {
            let t = remaining / edge_length;
            path.push(Point::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t));
            break;
        }
    }
    path
}

fn draw_label<S: Surface>(
    surface: &mut S,
    style: &OverlayStyle,
    screen: &ScreenBox,
    text: &str,
    color: Rgba<u8>,
) {
    let text_width = surface.measure_text(text, style.label_font_size);
    let chip = ScreenBox::new(
        screen.screen_x,
        screen.screen_y - style.label_height - style.label_gap,
        text_width + style.label_padding * 2.0,
        style.label_height,
    );
    surface.fill_rect(chip, color);
    let origin = Point::new(
        chip.screen_x + style.label_padding,
        chip.screen_y + (style.label_height - style.label_font_size) / 2.0,
    );
    surface.fill_text(text, origin, style.label_font_size, label_text_color(color));
}

/// Dark text on bright chips, white otherwise.
fn label_text_color(background: Rgba<u8>) -> Rgba<u8> {
    let [r, g, b, _] = background.0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 150.0 {
        Rgba([0, 0, 0, 255])
    } else {
        Rgba([255, 255, 255, 255])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::recording::{DrawCall, RecordingSurface};

    fn renderer(style: OverlayStyle) -> OverlayRenderer<RecordingSurface> {
        let mut renderer = OverlayRenderer::new(RecordingSurface::new(), style, Timeline::default(), 2.0);
        renderer.resize(500.0, 250.0, 1.0);
        renderer.set_image(Arc::new(RgbaImage::new(1000, 500)));
        renderer
    }

    fn run_to_end(renderer: &mut OverlayRenderer<RecordingSurface>, mut request: Option<FrameRequest>) -> usize {
        let mut frames = 0;
        while let Some(r) = request {
            request = renderer.on_frame_after(r, Duration::from_millis(16));
            frames += 1;
            assert!(frames < 1000, "animation never finished");
        }
        frames
    }

    fn pothole() -> Detection {
        Detection::new(100.0, 100.0, 300.0, 200.0, 0.87, "pothole")
    }

    #[test]
    fn test_outline_crosses_edges_exactly() {
        let b = ScreenBox::new(10.0, 20.0, 100.0, 50.0);
        assert_eq!(b.perimeter(), 300.0);

        assert_eq!(clockwise_outline(&b, 0.0), vec![Point::new(10.0, 20.0)]);
        assert_eq!(
            clockwise_outline(&b, 75.0),
            vec![Point::new(10.0, 20.0), Point::new(85.0, 20.0)]
        );
        assert_eq!(
            clockwise_outline(&b, 120.0),
            vec![Point::new(10.0, 20.0), Point::new(110.0, 20.0), Point::new(110.0, 40.0)]
        );
        // Left edge only starts once top, right and bottom are done
        let path = clockwise_outline(&b, 260.0);
        assert_eq!(path.len(), 5);
        assert_eq!(path[3], Point::new(10.0, 70.0));
        assert_eq!(path[4], Point::new(10.0, 60.0));

        assert_eq!(clockwise_outline(&b, 300.0), closed_outline(&b));
    }

    #[test]
    fn test_outline_of_zero_width_box() {
        let b = ScreenBox::new(5.0, 5.0, 0.0, 10.0);
        let path = clockwise_outline(&b, 10.0);
        assert!(path.iter().all(|p| p.x.is_finite() && p.y.is_finite()));
        assert_eq!(path.last(), Some(&Point::new(5.0, 15.0)));
    }

    #[test]
    fn test_empty_list_draws_image_only() {
        let mut r = renderer(OverlayStyle::default());
        assert!(r.set_detections(Vec::new()).is_none());
        let frame = r.surface().last_frame();
        assert_eq!(frame, &[DrawCall::Image(ScreenBox::new(0.0, 0.0, 500.0, 250.0))]);
    }

    #[test]
    fn test_boxes_reveal_then_complete() {
        let mut r = renderer(OverlayStyle::default());
        let request = r.set_detections(vec![pothole()]);
        assert!(request.is_some());
        // Progress 0: nothing but the image
        assert!(r.surface().strokes().is_empty());

        let request = r.on_frame_after(request.unwrap(), Duration::from_millis(100));
        let strokes = r.surface().strokes();
        assert_eq!(strokes.len(), 1);
        assert_eq!(strokes[0].0[0], Point::new(50.0, 50.0));
        assert!(strokes[0].1.glow.is_none());
        assert!(r.surface().texts().is_empty());

        run_to_end(&mut r, request);
        let strokes = r.surface().strokes();
        assert_eq!(strokes.len(), 2);
        let outline = closed_outline(&ScreenBox::new(50.0, 50.0, 100.0, 50.0));
        // Glow underneath, plain outline on top
        assert_eq!(strokes[0].0, outline);
        assert!(strokes[0].1.glow.is_some());
        assert_eq!(strokes[1].0, outline);
        assert!(strokes[1].1.glow.is_none());
        assert_eq!(r.surface().texts(), vec!["pothole 87%".to_string()]);
        assert_eq!(r.progress(), 1.0);
    }

    #[test]
    fn test_label_chip_sits_above_box() {
        let mut r = renderer(OverlayStyle::default());
        let request = r.set_detections(vec![pothole()]);
        run_to_end(&mut r, request);

        let chip = r
            .surface()
            .last_frame()
            .iter()
            .find_map(|c| match c {
                DrawCall::FillRect(rect, _) => Some(*rect),
                _ => None,
            })
            .unwrap();
        assert_eq!(chip.screen_x, 50.0);
        assert_eq!(chip.screen_y, 50.0 - 18.0 - 2.0);
        assert_eq!(chip.screen_height, 18.0);
        // 11 chars at 7.5px plus padding on both sides
        assert_eq!(chip.screen_width, 11.0 * 7.5 + 8.0);
    }

    #[test]
    fn test_stale_request_is_ignored() {
        let mut r = renderer(OverlayStyle::default());
        let stale = r.set_detections(vec![pothole()]).unwrap();
        let current = r.set_detections(vec![pothole(), pothole()]).unwrap();
        let frames = r.surface().frame_count();

        assert!(r.on_frame_after(stale, Duration::from_millis(16)).is_none());
        assert_eq!(r.surface().frame_count(), frames);
        assert!(r.on_frame_after(current, Duration::from_millis(16)).is_some());
        assert_eq!(r.surface().frame_count(), frames + 1);
    }

    #[test]
    fn test_instant_mode_completes_in_one_frame() {
        let style = OverlayStyle {
            animate: false,
            ..OverlayStyle::default()
        };
        let mut r = renderer(style);
        assert!(r.set_detections(vec![pothole()]).is_none());
        assert_eq!(r.surface().texts(), vec!["pothole 87%".to_string()]);
    }

    #[test]
    fn test_long_list_every_box_completes() {
        let mut r = renderer(OverlayStyle::default());
        let detections = (0..12)
            .map(|i| Detection::new(10.0 + i as f32 * 20.0, 10.0, 25.0 + i as f32 * 20.0, 30.0, 0.9, "crack"))
            .collect();
        let request = r.set_detections(detections);
        run_to_end(&mut r, request);
        assert_eq!(r.surface().texts().len(), 12);
    }

    #[test]
    fn test_not_laid_out_skips_drawing() {
        let mut r = OverlayRenderer::new(RecordingSurface::new(), OverlayStyle::default(), Timeline::default(), 2.0);
        r.set_image(Arc::new(RgbaImage::new(100, 100)));
        let request = r.set_detections(vec![pothole()]);
        run_to_end(&mut r, request);
        assert_eq!(r.surface().frame_count(), 0);
        assert!(r.transform().is_none());

        assert_eq!(r.resize(0.0, 300.0, 1.0), ResizeOutcome::NotLaidOut);
        assert_eq!(r.surface().allocations, 0);
    }

    #[test]
    fn test_resize_redraws_only_on_change() {
        let mut r = renderer(OverlayStyle::default());
        let request = r.set_detections(vec![pothole()]);
        run_to_end(&mut r, request);
        let frames = r.surface().frame_count();

        assert_eq!(r.resize(500.3, 249.8, 1.0), ResizeOutcome::Unchanged);
        assert_eq!(r.surface().frame_count(), frames);

        assert!(matches!(r.resize(1000.0, 500.0, 1.0), ResizeOutcome::Resized { .. }));
        assert_eq!(r.surface().frame_count(), frames + 1);
        assert_eq!(r.surface().allocations, 2);
        // Box follows the new scale
        assert_eq!(r.surface().strokes()[0].0[0], Point::new(100.0, 100.0));
    }

    #[test]
    fn test_resize_without_image_does_not_draw() {
        let mut r = OverlayRenderer::new(RecordingSurface::new(), OverlayStyle::default(), Timeline::default(), 2.0);
        r.resize(300.0, 200.0, 2.0);
        assert_eq!(r.surface().allocations, 1);
        assert_eq!(r.surface().scale, 2.0);
        assert_eq!(r.surface().frame_count(), 0);
    }

    #[test]
    fn test_inverted_policies() {
        let inverted = Detection::new(300.0, 200.0, 100.0, 100.0, 0.6, "crack");

        let mut r = renderer(OverlayStyle::default());
        r.set_detections(vec![inverted.clone()]);
        assert!(r.detections()[0].is_inverted());

        let mut r = renderer(OverlayStyle {
            inverted_boxes: InvertedBoxPolicy::Normalize,
            ..OverlayStyle::default()
        });
        r.set_detections(vec![inverted.clone()]);
        assert_eq!(r.detections()[0].x1, 100.0);
        assert_eq!(r.detections()[0].y2, 200.0);

        let mut r = renderer(OverlayStyle {
            inverted_boxes: InvertedBoxPolicy::Skip,
            ..OverlayStyle::default()
        });
        assert!(r.set_detections(vec![inverted, pothole()]).is_some());
        assert_eq!(r.detections().len(), 1);
    }

    #[test]
    fn test_replay_restarts_progress() {
        let mut r = renderer(OverlayStyle::default());
        let request = r.set_detections(vec![pothole()]);
        run_to_end(&mut r, request);
        assert!(r.replay().is_some());
        assert_eq!(r.progress(), 0.0);
        assert!(r.surface().strokes().is_empty());
    }

    #[test]
    fn test_label_text_contrast() {
        assert_eq!(label_text_color(Rgba([0xFF, 0xFF, 0x00, 0xFF])), Rgba([0, 0, 0, 255]));
        assert_eq!(label_text_color(Rgba([0xFF, 0x00, 0x00, 0xFF])), Rgba([255, 255, 255, 255]));
    }
}
