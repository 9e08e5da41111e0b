//! Cosine annealing with warm restarts.
//!
//! Cycle `i` lasts `t0 * t_mult^i` epochs. Within a cycle the learning rate
//! follows half a cosine from `base_lr` down to `eta_min`, then jumps back.
//! Positions are fractional epochs, so the schedule can advance per batch.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CosineWarmRestarts {
    pub base_lr: f64,
    pub eta_min: f64,
    pub t0: f64,
    pub t_mult: f64,
    /// Current position in (fractional) epochs.
    pub position: f64,
}

impl CosineWarmRestarts {
    pub fn new(base_lr: f64, t0: usize, t_mult: usize) -> Self {
        Self {
            base_lr,
            eta_min: 0.0,
            t0: t0.max(1) as f64,
            t_mult: t_mult.max(1) as f64,
            position: 0.0,
        }
    }

    /// `(offset into the current cycle, current cycle length)` at `epoch`.
    fn cycle(&self, epoch: f64) -> (f64, f64) {
        if epoch < self.t0 {
            return (epoch, self.t0);
        }
        if self.t_mult == 1.0 {
            return (epoch % self.t0, self.t0);
        }
        // Nudge before flooring so exact cycle boundaries land in the new cycle.
        let n = ((epoch / self.t0 * (self.t_mult - 1.0) + 1.0).ln() / self.t_mult.ln() + 1e-9)
            .floor();
        let start = self.t0 * (self.t_mult.powf(n) - 1.0) / (self.t_mult - 1.0);
        (epoch - start, self.t0 * self.t_mult.powf(n))
    }

    /// Learning rate at a given position.
    pub fn lr_at(&self, epoch: f64) -> f64 {
        let (t_cur, t_i) = self.cycle(epoch);
        self.eta_min
            + (self.base_lr - self.eta_min) * (1.0 + (std::f64::consts::PI * t_cur / t_i).cos())
                / 2.0
    }

    pub fn current_lr(&self) -> f64 {
        self.lr_at(self.position)
    }

    /// Advance by `epochs` (e.g. `1 / batches_per_epoch`) and return the new rate.
    pub fn advance(&mut self, epochs: f64) -> f64 {
        self.position += epochs;
        self.current_lr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn starts_at_base_rate() {
        let s = CosineWarmRestarts::new(1e-3, 10, 2);
        assert!(close(s.current_lr(), 1e-3));
    }

    #[test]
    fn halfway_through_first_cycle() {
        let s = CosineWarmRestarts::new(1.0, 10, 2);
        assert!(close(s.lr_at(5.0), 0.5));
    }

    #[test]
    fn restarts_with_doubled_period() {
        let s = CosineWarmRestarts::new(1.0, 10, 2);
        // Second cycle covers [10, 30): restart at 10, midpoint at 20.
        assert!(close(s.lr_at(10.0), 1.0));
        assert!(close(s.lr_at(20.0), 0.5));
        // Third cycle starts at 30 and lasts 40.
        assert!(close(s.lr_at(30.0), 1.0));
        assert!(close(s.lr_at(50.0), 0.5));
    }

    #[test]
    fn fractional_advance_accumulates() {
        let mut s = CosineWarmRestarts::new(1.0, 10, 2);
        for _ in 0..20 {
            s.advance(0.25);
        }
        assert!(close(s.position, 5.0));
        assert!(close(s.current_lr(), 0.5));
    }

    #[test]
    fn constant_period_when_mult_is_one() {
        let s = CosineWarmRestarts::new(1.0, 4, 1);
        assert!(close(s.lr_at(6.0), s.lr_at(2.0)));
    }
}
