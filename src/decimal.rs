//! Step-aware number formatting.
//!
//! Venues reject orders carrying more decimals than the symbol's tick, so
//! every price or size shown to a venue (or a human) goes through here.

/// Formats values at a fixed step (tick) with trailing zeros trimmed.
#[derive(Debug, Clone, Copy)]
pub struct Decimal {
    step: f64,
    places: usize,
}

impl Default for Decimal {
    fn default() -> Self {
        let mut decimal = Decimal {
            step: 0.0,
            places: 0,
        };
        decimal.precision(1e-8);
        decimal
    }
}

impl Decimal {
    /// Set the step and derive how many decimal places it needs.
    pub fn precision(&mut self, step: f64) {
        self.step = if step > 0.0 { step } else { 1e-8 };
        self.places = decimal_places(self.step);
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Round to the nearest step.
    pub fn round(&self, x: f64) -> f64 {
        (x / self.step).round() * self.step
    }

    /// Render `x` rounded to the step, without trailing zeros.
    pub fn str(&self, x: f64) -> String {
        let mut out = format!("{:.*}", self.places, self.round(x));
        if out.contains('.') {
            out.truncate(out.trim_end_matches('0').trim_end_matches('.').len());
        }
        if out == "-0" {
            out = "0".to_string();
        }
        out
    }
}

/// The formatters a gateway needs once the venue's ticks are known.
#[derive(Debug, Clone, Default)]
pub struct Decimals {
    pub funds: Decimal,
    pub price: Decimal,
    pub amount: Decimal,
    pub percent: Decimal,
}

fn decimal_places(step: f64) -> usize {
    let rendered = format!("{:.12}", step);
    let trimmed = rendered.trim_end_matches('0');
    match trimmed.find('.') {
        Some(dot) => trimmed.len() - dot - 1,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_step(step: f64) -> Decimal {
        let mut decimal = Decimal::default();
        decimal.precision(step);
        decimal
    }

    #[test]
    fn trims_trailing_zeros() {
        let funds = with_step(1e-8);
        assert_eq!(funds.str(0.1), "0.1");
        assert_eq!(funds.str(0.00000001), "0.00000001");
        assert_eq!(funds.str(12.0), "12");
    }

    #[test]
    fn rounds_to_step() {
        let price = with_step(0.5);
        assert_eq!(price.str(100.26), "100.5");
        assert_eq!(price.str(100.24), "100");

        let size = with_step(0.001);
        assert_eq!(size.str(0.12345), "0.123");
    }

    #[test]
    fn integer_step_has_no_fraction() {
        let lots = with_step(1.0);
        assert_eq!(lots.str(3.4), "3");
        assert_eq!(lots.str(3.6), "4");
    }

    #[test]
    fn str_round_trips_at_tick() {
        let price = with_step(0.01);
        for x in [0.07, 15.333, 1299.995, 0.004] {
            let parsed: f64 = price.str(x).parse().unwrap();
            assert!((parsed - price.round(x)).abs() < 1e-12, "x = {x}");
        }
    }

    #[test]
    fn zero_step_falls_back_to_funds_precision() {
        let broken = with_step(0.0);
        assert_eq!(broken.step(), 1e-8);
    }
}
