//! Alert timeline: optional intro scene, main mask, optional outro scene
//!
//! Time runs from the trigger. Without an intro the mask fades in over
//! [`MASK_FADE_TIME`]; with one, the mask fades in over the intro's last
//! `fade` seconds. The outro mirrors this at the end of the alert.

use crate::scene::Scene;

/// Fade used at either end when there is no intro/outro scene.
pub const MASK_FADE_TIME: f32 = 1.0 / 3.0;

/// Timing of an intro or outro scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub duration: f32,
    pub fade: f32,
}

impl Segment {
    pub fn new(duration: f32, fade: f32) -> Self {
        let duration = duration.max(0.0);
        Self { duration, fade: fade.clamp(0.0, duration) }
    }

    pub fn of(scene: &Scene) -> Self {
        Self::new(scene.intro_duration(), scene.intro_fade().unwrap_or(MASK_FADE_TIME))
    }
}

/// What to tick and draw at the current alert time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertFrame {
    /// Main mask animates
    pub mask_active: bool,
    /// Main mask opacity, multiplied into the configured alpha
    pub mask_alpha: f32,
    pub intro_active: bool,
    pub outro_active: bool,
}

impl AlertFrame {
    /// Mask permanently on, no intro/outro.
    pub const ALWAYS_ON: AlertFrame = AlertFrame {
        mask_active: true,
        mask_alpha: 1.0,
        intro_active: false,
        outro_active: false,
    };
}

/// Ease from `a` to `b` with zero slope at both ends.
fn hermite(t: f32, a: f32, b: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    a + (b - a) * t * t * (3.0 - 2.0 * t)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertTimeline {
    /// Seconds since the last trigger; None before the first one
    elapsed: Option<f32>,
}

impl Default for AlertTimeline {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertTimeline {
    pub fn new() -> Self {
        Self { elapsed: None }
    }

    /// Restart at time zero.
    pub fn trigger(&mut self) {
        self.elapsed = Some(0.0);
    }

    pub fn advance(&mut self, dt: f32) {
        if let Some(elapsed) = self.elapsed.as_mut() {
            *elapsed += dt.max(0.0);
        }
    }

    pub fn elapsed(&self) -> Option<f32> {
        self.elapsed
    }

    /// Never triggered, or past `duration`.
    pub fn is_finished(&self, duration: f32) -> bool {
        self.elapsed.is_none_or(|e| e > duration)
    }

    /// Alert state for an alert of `duration` seconds.
    pub fn frame(&self, duration: f32, intro: Option<Segment>, outro: Option<Segment>) -> AlertFrame {
        let Some(e) = self.elapsed else {
            return AlertFrame { mask_active: false, mask_alpha: 0.0, intro_active: false, outro_active: false };
        };

        let mut alpha = 1.0;
        let mut mask_start = 0.0;
        let mut intro_active = false;
        match intro {
            Some(intro) => {
                let t1 = intro.duration - intro.fade;
                let t2 = intro.duration;
                if e < t1 {
                    alpha = 0.0;
                } else if e < t2 {
                    alpha = hermite((e - t1) / (t2 - t1), 0.0, 1.0);
                }
                mask_start = t1;
                intro_active = e <= intro.duration;
            }
            None if e < MASK_FADE_TIME => alpha = hermite(e / MASK_FADE_TIME, 0.0, 1.0),
            None => {}
        }

        let mut mask_end = duration;
        let mut outro_active = false;
        match outro {
            Some(outro) => {
                let t1 = duration - outro.duration;
                let t2 = t1 + outro.fade;
                if e > t2 {
                    alpha = 0.0;
                } else if e > t1 {
                    alpha = hermite((e - t1) / (t2 - t1), 1.0, 0.0);
                }
                mask_end = t2;
                outro_active = e >= t1 && e < duration;
            }
            None => {
                let t = duration - MASK_FADE_TIME;
                if e > duration {
                    alpha = 0.0;
                } else if e > t {
                    alpha = hermite((e - t) / MASK_FADE_TIME, 1.0, 0.0);
                }
            }
        }

        AlertFrame {
            mask_active: e >= mask_start && e <= mask_end,
            mask_alpha: alpha,
            intro_active,
            outro_active,
        }
    }
}
