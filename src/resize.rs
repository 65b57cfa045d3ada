//! Keeps a surface's backing buffer in step with its container.
//!
//! Sizes are compared after rounding to whole CSS pixels, so sub-pixel layout
//! jitter never reallocates the buffer.

#[allow(unused_imports)]
use log::{debug, info};

use crate::surface::Surface;
use crate::transform::{effective_dpr, BackingSize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeOutcome {
    /// Container has no area yet; the surface was left alone.
    NotLaidOut,
    Unchanged,
    Resized {
        css: (u32, u32),
        backing: BackingSize,
        dpr: f32,
    },
}

#[derive(Debug, Clone)]
pub struct ResizeCoordinator {
    dpr_cap: f32,
    css: Option<(u32, u32)>,
    dpr: f32,
}

impl ResizeCoordinator {
    pub fn new(dpr_cap: f32) -> Self {
        Self {
            dpr_cap,
            css: None,
            dpr: 1.0,
        }
    }

    /// Reallocate `surface` if the rounded container size or the effective
    /// pixel ratio changed, re-issuing the pixel-ratio transform each time.
    pub fn sync<S: Surface>(
        &mut self,
        surface: &mut S,
        css_w: f32,
        css_h: f32,
        device_pixel_ratio: f32,
    ) -> ResizeOutcome {
        let rounded = |v: f32| if v.is_finite() && v > 0.0 { v.round() as u32 } else { 0 };
        let (width, height) = (rounded(css_w), rounded(css_h));
        if width == 0 || height == 0 {
            if self.css.is_some() {
                debug!("Container collapsed to {}x{}, deferring draws", css_w, css_h);
            }
            self.css = None;
            return ResizeOutcome::NotLaidOut;
        }

        let dpr = effective_dpr(device_pixel_ratio, self.dpr_cap);
        if self.css == Some((width, height)) && self.dpr == dpr {
            return ResizeOutcome::Unchanged;
        }

        let backing = BackingSize::for_css(width, height, dpr);
        surface.allocate(backing);
        surface.set_transform(dpr);
        debug!(
            "Surface resized to {}x{} css ({}x{} backing, dpr {})",
            width, height, backing.width, backing.height, dpr
        );

        self.css = Some((width, height));
        self.dpr = dpr;
        ResizeOutcome::Resized {
            css: (width, height),
            backing,
            dpr,
        }
    }

    pub fn css_size(&self) -> Option<(u32, u32)> {
        self.css
    }

    pub fn is_laid_out(&self) -> bool {
        self.css.is_some()
    }
}
