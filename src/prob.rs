/// Sentinel for probabilities too small to be worth representing
pub const SMALLEST_LOG_PROB: f64 = -99.0;

/// Log probabilities below this are clamped to [`SMALLEST_LOG_PROB`]
pub const LOG_PROB_FLOOR: f64 = -98.9;

/// Convert base-10 log probability to linear probability
pub fn log_to_linear(log_probability: f64) -> f64 {
    if log_probability < LOG_PROB_FLOOR {
        0.0
    } else {
        10f64.powf(log_probability)
    }
}

/// Convert linear probability to base-10 log probability. Non-positive
/// mass maps to [`SMALLEST_LOG_PROB`] rather than a NaN.
pub fn linear_to_log(probability: f64) -> f64 {
    if probability <= 0.0 {
        SMALLEST_LOG_PROB
    } else {
        probability.log10()
    }
}
