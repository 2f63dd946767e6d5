//! Time-driven spring used to animate zoom and center.
//!
//! A spring moves `current` from a start value to a target over a fixed
//! animation duration, following an exponential ease-out shaped by
//! `stiffness`. The spring has no timer of its own: it only advances when
//! [`Spring::update`] is called with a new timestamp.

/// Default spring stiffness
pub const DEFAULT_SPRING_STIFFNESS: f64 = 6.5;

/// Default animation duration in milliseconds
pub const DEFAULT_ANIMATION_DURATION_MS: u64 = 1200;

/// Scalar spring.
#[derive(Debug, Clone, PartialEq)]
pub struct Spring {
    stiffness: f64,
    animation_ms: u64,

    start_value: f64,
    current_value: f64,
    target_value: f64,

    start_time: u64,
    current_time: u64,
    target_time: u64,
}

impl Spring {
    /// Create a spring at rest on `initial`, with its clock at zero.
    pub fn new(initial: f64, stiffness: f64, animation_ms: u64) -> Self {
        Self {
            stiffness,
            animation_ms,
            start_value: initial,
            current_value: initial,
            target_value: initial,
            start_time: 0,
            current_time: 0,
            target_time: 0,
        }
    }

    pub fn current(&self) -> f64 {
        self.current_value
    }

    pub fn target(&self) -> f64 {
        self.target_value
    }

    /// Start animating toward `target` from the current value.
    pub fn spring_to(&mut self, target: f64) {
        self.start_value = self.current_value;
        self.start_time = self.current_time;
        self.target_value = target;
        self.target_time = self.start_time + self.animation_ms;
    }

    /// Jump to `target` with no animation.
    pub fn reset_to(&mut self, target: f64) {
        self.start_value = target;
        self.current_value = target;
        self.target_value = target;
        self.start_time = self.current_time;
        self.target_time = self.current_time;
    }

    /// Move start and target by `delta`, keeping the animation phase.
    pub fn shift_by(&mut self, delta: f64) {
        self.start_value += delta;
        self.target_value += delta;
    }

    /// Advance to `now_ms`. Returns `true` while the spring is still moving.
    ///
    /// Once `now_ms` reaches the end of the animation, `current` equals
    /// `target` exactly. Timestamps earlier than the last update are ignored.
    pub fn update(&mut self, now_ms: u64) -> bool {
        self.current_time = self.current_time.max(now_ms);

        self.current_value = if self.current_time >= self.target_time {
            self.target_value
        } else {
            let span = (self.target_time - self.start_time) as f64;
            let progress = (self.current_time - self.start_time) as f64 / span;
            self.start_value
                + (self.target_value - self.start_value) * ease(self.stiffness, progress)
        };

        self.current_value != self.target_value
    }

    /// Whether the spring has settled on its target.
    pub fn is_at_target(&self) -> bool {
        self.current_value == self.target_value
    }
}

/// Normalized exponential ease-out: 0 at `x = 0`, 1 at `x = 1`.
fn ease(stiffness: f64, x: f64) -> f64 {
    if stiffness == 0.0 {
        return x;
    }
    (1.0 - (-stiffness * x).exp()) / (1.0 - (-stiffness).exp())
}
