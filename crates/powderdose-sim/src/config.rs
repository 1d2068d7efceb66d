use powderdose_frame::Direction;

/// Raw ADC counts per gram of the simulated load cell.
pub const DEFAULT_RAW_SLOPE: f64 = 32_591.490_262_430_038;

/// Raw ADC reading of the simulated load cell with an empty pan.
pub const DEFAULT_RAW_INTERCEPT: f64 = 421_737.026_294_600_86;

/// Behaviour of a [`crate::SimulatedRig`].
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Grams delivered per auger step.
    pub grams_per_step: f64,
    /// Auger direction that delivers powder. Steps the other way deliver none.
    pub direction: Direction,
    /// Powder left in the hopper; `None` never runs dry.
    pub hopper_grams: Option<f64>,
    pub raw_slope: f64,
    pub raw_intercept: f64,
    /// Emit an untagged acknowledgement before every measurement reply.
    pub chatter: bool,
    /// Number of `Meas` requests answered with an unparseable weight.
    pub malformed_weight_replies: usize,
    /// Never reply to anything, banner included.
    pub silent: bool,
    /// Send boot noise and the ready banner when the link opens.
    pub banner: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            grams_per_step: 0.01,
            direction: Direction::Forward,
            hopper_grams: None,
            raw_slope: DEFAULT_RAW_SLOPE,
            raw_intercept: DEFAULT_RAW_INTERCEPT,
            chatter: false,
            malformed_weight_replies: 0,
            silent: false,
            banner: true,
        }
    }
}

impl SimConfig {
    pub fn with_grams_per_step(mut self, grams_per_step: f64) -> Self {
        self.grams_per_step = grams_per_step;
        self
    }

    pub fn with_hopper(mut self, grams: f64) -> Self {
        self.hopper_grams = Some(grams);
        self
    }

    pub fn with_chatter(mut self) -> Self {
        self.chatter = true;
        self
    }

    pub fn with_malformed_weights(mut self, count: usize) -> Self {
        self.malformed_weight_replies = count;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}
