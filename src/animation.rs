//! Progress timeline for the box reveal animation.
//!
//! Progress is driven by elapsed wall-clock time rather than a per-frame
//! increment, so the reveal takes the same time on 60 Hz and 144 Hz displays.

use std::time::{Duration, Instant};

/// Legacy per-frame increment at the nominal refresh rate.
pub const NOMINAL_FRAME_STEP: f32 = 0.025;
pub const NOMINAL_FPS: f32 = 60.0;
pub const DEFAULT_PROGRESS_PER_SECOND: f32 = NOMINAL_FRAME_STEP * NOMINAL_FPS;
pub const DEFAULT_STAGGER_STEP: f32 = 0.08;
pub const DEFAULT_BOX_DURATION: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeline {
    pub progress_per_second: f32,
    pub stagger_step: f32,
    pub box_duration: f32,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            progress_per_second: DEFAULT_PROGRESS_PER_SECOND,
            stagger_step: DEFAULT_STAGGER_STEP,
            box_duration: DEFAULT_BOX_DURATION,
        }
    }
}

impl Timeline {
    /// Build from user-provided values, replacing anything unusable with defaults.
    pub fn sanitized(progress_per_second: f32, stagger_step: f32, box_duration: f32) -> Self {
        let defaults = Self::default();
        let positive = |v: f32| v.is_finite() && v > 0.0;
        Self {
            progress_per_second: if positive(progress_per_second) {
                progress_per_second
            } else {
                defaults.progress_per_second
            },
            stagger_step: if stagger_step.is_finite() && stagger_step >= 0.0 {
                stagger_step
            } else {
                defaults.stagger_step
            },
            box_duration: if positive(box_duration) {
                box_duration
            } else {
                defaults.box_duration
            },
        }
    }

    pub fn delay(&self, index: usize) -> f32 {
        index as f32 * self.stagger_step
    }

    pub fn local_progress(&self, global: f32, index: usize) -> f32 {
        ((global - self.delay(index)) / self.box_duration).clamp(0.0, 1.0)
    }

    /// Global progress at which the last of `count` boxes completes. Never
    /// below 1.0; only lists longer than the stagger window push it further.
    pub fn end(&self, count: usize) -> f32 {
        match count {
            0 => 1.0,
            n => (self.delay(n - 1) + self.box_duration).max(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoxPhase {
    Hidden,
    /// Fraction of the perimeter drawn so far, in (0, 1).
    Drawing(f32),
    Complete,
}

impl BoxPhase {
    pub fn from_local(local: f32) -> Self {
        if local >= 1.0 {
            BoxPhase::Complete
        } else if local > 0.0 {
            BoxPhase::Drawing(local)
        } else {
            BoxPhase::Hidden
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnimationState {
    timeline: Timeline,
    progress: f32,
    end: f32,
    last_frame: Option<Instant>,
    is_animating: bool,
}

impl AnimationState {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            progress: 0.0,
            end: 1.0,
            last_frame: None,
            is_animating: false,
        }
    }

    /// Start a fresh cycle for `box_count` boxes.
    pub fn restart(&mut self, box_count: usize) {
        self.progress = 0.0;
        self.end = self.timeline.end(box_count);
        self.last_frame = None;
        self.is_animating = box_count > 0;
        if box_count == 0 {
            self.progress = self.end;
        }
    }

    /// Jump to the end of the cycle (instant, non-animated draw).
    pub fn finish(&mut self) {
        self.progress = self.end;
        self.last_frame = None;
        self.is_animating = false;
    }

    /// Advance from the previous frame's timestamp to `now`. The first frame of
    /// a cycle only records the timestamp. Returns whether more frames are needed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.is_animating {
            return false;
        }
        let delta = match self.last_frame {
            Some(previous) => now.saturating_duration_since(previous),
            None => Duration::ZERO,
        };
        self.last_frame = Some(now);
        self.advance(delta)
    }

    pub fn advance(&mut self, delta: Duration) -> bool {
        if !self.is_animating {
            return false;
        }
        let step = delta.as_secs_f32() * self.timeline.progress_per_second;
        self.progress = (self.progress + step).min(self.end);
        if self.progress >= self.end {
            self.is_animating = false;
            self.last_frame = None;
        }
        self.is_animating
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_animating(&self) -> bool {
        self.is_animating
    }

    pub fn local_progress(&self, index: usize) -> f32 {
        // A finished cycle shows every box complete, whatever rounding left behind.
        if self.progress >= self.end {
            return 1.0;
        }
        self.timeline.local_progress(self.progress, index)
    }

    pub fn phase(&self, index: usize) -> BoxPhase {
        BoxPhase::from_local(self.local_progress(index))
    }
}
