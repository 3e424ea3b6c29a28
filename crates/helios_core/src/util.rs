//! Small numeric helpers shared across the crate.

use serde::{Deserialize, Serialize};

/// Kahan compensated accumulator.
///
/// Simulated time is advanced tens of thousands of times per run; naive
/// `time += dt` accumulates enough rounding error to shift sampling and
/// conservation cadences. The compensation term keeps the accumulated sum
/// accurate to the last ulp over 10^5 additions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KahanSum {
    sum: f64,
    compensation: f64,
}

impl KahanSum {
    pub fn new(initial: f64) -> Self {
        Self {
            sum: initial,
            compensation: 0.0,
        }
    }

    pub fn add(&mut self, increment: f64) {
        let y = increment - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    /// The derived real time exposed to clients.
    pub fn value(&self) -> f64 {
        self.sum
    }
}

pub fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

pub fn linf_norm(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

#[cfg(test)]
mod tests {
    use super::{l2_norm, linf_norm, KahanSum};

    #[test]
    fn kahan_sum_beats_naive_accumulation() {
        let dt = 1.0e-4;
        let steps = 100_000;
        let mut kahan = KahanSum::new(0.0);
        let mut naive = 0.0_f64;
        for _ in 0..steps {
            kahan.add(dt);
            naive += dt;
        }
        let exact = dt * steps as f64;
        assert!((kahan.value() - exact).abs() <= (naive - exact).abs());
        assert!((kahan.value() - exact).abs() < 1e-12);
    }

    #[test]
    fn norms() {
        assert_eq!(l2_norm(&[3.0, 4.0]), 5.0);
        assert_eq!(linf_norm(&[-3.0, 2.0]), 3.0);
    }
}
