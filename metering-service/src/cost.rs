use std::time::Duration;

/// Converts power readings over a window into a monetary cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostCalculator {
    price_per_kwh: f64,
}

impl CostCalculator {
    pub fn new(price_per_kwh: f64) -> Self {
        Self { price_per_kwh }
    }

    pub fn price_per_kwh(&self) -> f64 {
        self.price_per_kwh
    }

    /// `(sum(watts) / 1000) * duration_hours * price_per_kwh`.
    ///
    /// Readings are summed, not averaged, so the result scales with the number
    /// of samples in the window. An empty slice costs nothing.
    pub fn compute_cost(&self, power_watts: &[f64], duration_hours: f64) -> f64 {
        if power_watts.is_empty() {
            return 0.0;
        }
        let total_energy_kwh = (power_watts.iter().sum::<f64>() / 1000.0) * duration_hours;
        total_energy_kwh * self.price_per_kwh
    }
}

pub fn window_hours(window: Duration) -> f64 {
    window.as_secs_f64() / 3_600.0
}
