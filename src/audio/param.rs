//! Automatable parameters.

/// Linear ramp from `from` at `start` to `target` at `end` (seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ramp {
    from: f32,
    start: f64,
    target: f32,
    end: f64,
}

/// A parameter whose value can be ramped linearly over context time.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParam {
    value: f32,
    ramp: Option<Ramp>,
}

impl AudioParam {
    pub fn new(value: f32) -> Self {
        Self { value, ramp: None }
    }

    /// Set the value immediately, cancelling any ramp in progress.
    pub fn set_value(&mut self, value: f32) {
        self.value = value;
        self.ramp = None;
    }

    /// Ramp from the value at `now` to `target`, arriving exactly at `end_time`.
    pub fn linear_ramp_to_value_at_time(&mut self, target: f32, end_time: f64, now: f64) {
        if end_time <= now {
            self.set_value(target);
            return;
        }
        let from = self.value_at(now);
        self.value = from;
        self.ramp = Some(Ramp {
            from,
            start: now,
            target,
            end: end_time,
        });
    }

    pub fn value_at(&self, time: f64) -> f32 {
        match self.ramp {
            None => self.value,
            Some(ramp) if time >= ramp.end => ramp.target,
            Some(ramp) if time <= ramp.start => ramp.from,
            Some(ramp) => {
                let progress = ((time - ramp.start) / (ramp.end - ramp.start)) as f32;
                ramp.from + (ramp.target - ramp.from) * progress
            }
        }
    }

    /// The value the parameter is heading to.
    pub fn target(&self) -> f32 {
        self.ramp.map_or(self.value, |ramp| ramp.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_reaches_target_at_end_time() {
        let mut param = AudioParam::new(0.0);
        param.linear_ramp_to_value_at_time(1.0, 2.0, 1.0);

        assert_eq!(param.value_at(1.0), 0.0);
        assert!((param.value_at(1.5) - 0.5).abs() < 1e-6);
        assert_eq!(param.value_at(2.0), 1.0);
        assert_eq!(param.value_at(10.0), 1.0);
        assert_eq!(param.target(), 1.0);
    }

    #[test]
    fn new_ramp_starts_from_current_value() {
        let mut param = AudioParam::new(0.0);
        param.linear_ramp_to_value_at_time(1.0, 1.0, 0.0);
        param.linear_ramp_to_value_at_time(0.0, 1.5, 0.5);

        assert!((param.value_at(0.5) - 0.5).abs() < 1e-6);
        assert!((param.value_at(1.0) - 0.25).abs() < 1e-6);
        assert_eq!(param.value_at(1.5), 0.0);
    }

    #[test]
    fn elapsed_end_time_sets_immediately() {
        let mut param = AudioParam::new(0.3);
        param.linear_ramp_to_value_at_time(0.9, 1.0, 1.0);
        assert_eq!(param.target(), 0.9);
        assert_eq!(param.value_at(0.0), 0.9);

        param.set_value(0.1);
        assert_eq!(param.target(), 0.1);
    }
}
