//! Scalar Kalman filter used to smooth landmark coordinates

/// One-dimensional constant-position Kalman filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarKalman {
    process_noise: f32,
    measurement_noise: f32,
    estimate: f32,
    error: f32,
    initialized: bool,
}

impl Default for ScalarKalman {
    fn default() -> Self {
        Self::new(0.05, 0.5)
    }
}

impl ScalarKalman {
    pub fn new(process_noise: f32, measurement_noise: f32) -> Self {
        Self {
            process_noise,
            measurement_noise,
            estimate: 0.0,
            error: 1.0,
            initialized: false,
        }
    }

    /// Feed one measurement, return the smoothed value.
    pub fn update(&mut self, measurement: f32) -> f32 {
        if !self.initialized {
            // First sample is taken as-is
            self.estimate = measurement;
            self.error = 1.0;
            self.initialized = true;
            return measurement;
        }
        let predicted_error = self.error + self.process_noise;
        let gain = predicted_error / (predicted_error + self.measurement_noise);
        self.estimate += gain * (measurement - self.estimate);
        self.error = (1.0 - gain) * predicted_error;
        self.estimate
    }

    pub fn value(&self) -> f32 {
        self.estimate
    }

    pub fn reset(&mut self) {
        self.initialized = false;
        self.estimate = 0.0;
        self.error = 1.0;
    }
}
