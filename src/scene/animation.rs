//! Live animation state of a loaded scene

#[derive(Debug, Clone, PartialEq)]
pub struct Animation {
    time: f32,
    duration: f32,
    looping: bool,
    playing: bool,
    alpha: f32,
}

impl Animation {
    pub fn new(duration: f32, looping: bool) -> Self {
        Self {
            time: 0.0,
            duration: duration.max(f32::EPSILON),
            looping,
            playing: true,
            alpha: 1.0,
        }
    }

    /// Advance by `dt` seconds.
    ///
    /// Looping animations wrap; one-shot animations stop on the last frame.
    pub fn tick(&mut self, dt: f32) {
        if !self.playing || dt <= 0.0 {
            return;
        }
        self.time += dt;
        if self.time >= self.duration {
            if self.looping {
                self.time %= self.duration;
            } else {
                self.time = self.duration;
                self.playing = false;
            }
        }
    }

    pub fn rewind(&mut self) {
        self.time = 0.0;
        self.playing = true;
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }
}
