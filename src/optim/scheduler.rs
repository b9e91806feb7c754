//! Learning-rate schedules
//!
//! Both schedules are pure functions of the (1-based) epoch index,
//! evaluated once per epoch before any of that epoch's batches run.

use serde::{Deserialize, Serialize};

/// Per-epoch learning-rate schedule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LrSchedule {
    /// Polynomial decay: `lr0 * (1 - (epoch-1)/total)^power`
    Poly {
        lr0: f32,
        total_epochs: usize,
        power: f32,
    },
    /// Step decay: multiply by `gamma` every `step_size` epochs
    Step {
        lr0: f32,
        step_size: usize,
        gamma: f32,
    },
}

impl LrSchedule {
    /// Polynomial decay with the conventional 0.9 exponent
    pub fn poly(lr0: f32, total_epochs: usize) -> Self {
        LrSchedule::Poly {
            lr0,
            total_epochs,
            power: 0.9,
        }
    }

    pub fn step(lr0: f32, step_size: usize, gamma: f32) -> Self {
        LrSchedule::Step {
            lr0,
            step_size,
            gamma,
        }
    }

    /// Learning rate for a 1-based epoch index
    pub fn lr_at(&self, epoch: usize) -> f32 {
        match *self {
            LrSchedule::Poly {
                lr0,
                total_epochs,
                power,
            } => {
                if total_epochs == 0 {
                    return lr0;
                }
                let progress = (epoch.saturating_sub(1)) as f32 / total_epochs as f32;
                lr0 * (1.0 - progress).max(0.0).powf(power)
            }
            LrSchedule::Step {
                lr0,
                step_size,
                gamma,
            } => {
                if step_size == 0 {
                    return lr0;
                }
                let decays = epoch.saturating_sub(1) / step_size;
                lr0 * gamma.powi(decays as i32)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_poly_starts_at_lr0() {
        let schedule = LrSchedule::poly(0.5, 100);
        assert_abs_diff_eq!(schedule.lr_at(1), 0.5, epsilon = 1e-7);
    }

    #[test]
    fn test_poly_matches_formula() {
        let schedule = LrSchedule::poly(1.0, 150);
        let expected = (1.0f32 - 49.0 / 150.0).powf(0.9);
        assert_abs_diff_eq!(schedule.lr_at(50), expected, epsilon = 1e-6);
    }

    #[test]
    fn test_poly_decreases_monotonically() {
        let schedule = LrSchedule::poly(1.0, 20);
        let mut prev = schedule.lr_at(1);
        for epoch in 2..=20 {
            let lr = schedule.lr_at(epoch);
            assert!(lr < prev, "lr must decrease: epoch {epoch}");
            prev = lr;
        }
    }

    #[test]
    fn test_step_decays_every_step_size() {
        let schedule = LrSchedule::step(0.1, 10, 0.1);
        assert_abs_diff_eq!(schedule.lr_at(1), 0.1, epsilon = 1e-8);
        assert_abs_diff_eq!(schedule.lr_at(10), 0.1, epsilon = 1e-8);
        assert_abs_diff_eq!(schedule.lr_at(11), 0.01, epsilon = 1e-8);
        assert_abs_diff_eq!(schedule.lr_at(21), 0.001, epsilon = 1e-9);
    }

    #[test]
    fn test_step_zero_step_size_is_constant() {
        let schedule = LrSchedule::step(0.1, 0, 0.1);
        assert_abs_diff_eq!(schedule.lr_at(100), 0.1, epsilon = 1e-8);
    }
}
