use serde::{Deserialize, Serialize};

/// One client's control intent for one local tick.
///
/// Field order is the wire layout: five flag bytes followed by five
/// eight-byte little-endian values (see [`crate::protocol::INPUT_SAMPLE_SIZE`]).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSample {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub jump: bool,
    /// Raw horizontal pointer motion since the previous sample, in pixels
    pub look_dx: f64,
    /// Raw vertical pointer motion since the previous sample, in pixels
    pub look_dy: f64,
    pub client_id: u64,
    /// Monotonic insertion time in nanoseconds
    pub timestamp_ns: u64,
    /// Delta-time in seconds used when this sample was applied locally
    pub dt: f64,
}

impl InputSample {
    /// Returns true when no movement, jump or look input is present.
    pub fn is_idle(&self) -> bool {
        !(self.forward || self.backward || self.left || self.right || self.jump)
            && self.look_dx == 0.0
            && self.look_dy == 0.0
    }

    /// Names the first float field holding NaN or an infinity, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("look_dx", self.look_dx),
            ("look_dy", self.look_dy),
            ("dt", self.dt),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(field, _)| field)
    }

    /// Forward axis in {-1, 0, 1}; forward+backward cancels.
    pub fn forward_axis(&self) -> f32 {
        self.forward as i8 as f32 - self.backward as i8 as f32
    }

    /// Strafe axis in {-1, 0, 1}; right+left cancels.
    pub fn strafe_axis(&self) -> f32 {
        self.right as i8 as f32 - self.left as i8 as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sample_is_idle() {
        let sample = InputSample::default();
        assert!(sample.is_idle());
        assert_eq!(sample.forward_axis(), 0.0);
        assert_eq!(sample.strafe_axis(), 0.0);
    }

    #[test]
    fn test_conflicting_flags_cancel() {
        let sample = InputSample {
            forward: true,
            backward: true,
            left: true,
            ..Default::default()
        };

        assert!(!sample.is_idle());
        assert_eq!(sample.forward_axis(), 0.0);
        assert_eq!(sample.strafe_axis(), -1.0);
    }

    #[test]
    fn test_look_motion_is_not_idle() {
        let sample = InputSample {
            look_dx: 2.5,
            ..Default::default()
        };
        assert!(!sample.is_idle());
    }

    #[test]
    fn test_non_finite_field_named() {
        assert_eq!(InputSample::default().non_finite_field(), None);

        let sample = InputSample {
            look_dx: f64::NAN,
            dt: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(sample.non_finite_field(), Some("look_dx"));

        let sample = InputSample {
            dt: f64::NEG_INFINITY,
            ..Default::default()
        };
        assert_eq!(sample.non_finite_field(), Some("dt"));
    }
}
