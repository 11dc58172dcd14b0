use crate::{common::*, config::LearningRateSchedule};

/// Yields the learning rate of every optimizer step.
#[derive(Debug, Clone)]
pub struct LrScheduler {
    /// `(first step, lr)` pairs with strictly increasing steps, starting at zero.
    steps: Vec<(usize, f64)>,
    step: usize,
    index: usize,
}

impl LrScheduler {
    pub fn new(config: &LearningRateSchedule) -> Result<Self> {
        let steps: Vec<(usize, f64)> = match *config {
            LearningRateSchedule::Constant { lr } => vec![(0, lr.raw())],
            LearningRateSchedule::StepWise { ref steps } => {
                ensure!(
                    steps.first().map(|&(step, _)| step) == Some(0),
                    "the steps must start from zero"
                );
                ensure!(
                    steps.windows(2).all(|pair| pair[0].0 < pair[1].0),
                    "the steps must be monotonic"
                );
                steps.iter().map(|&(step, lr)| (step, lr.raw())).collect()
            }
        };
        ensure!(
            steps.iter().all(|&(_, lr)| lr > 0.0),
            "lr must be positive"
        );

        Ok(Self {
            steps,
            step: 0,
            index: 0,
        })
    }

    /// The learning rate applied at the current step.
    pub fn lr(&self) -> f64 {
        self.steps[self.index].1
    }

    /// Returns the learning rate of the current step and advances a step.
    pub fn next(&mut self) -> f64 {
        let lr = self.lr();
        self.step += 1;
        if let Some(&(next_step, _)) = self.steps.get(self.index + 1) {
            if self.step >= next_step {
                self.index += 1;
            }
        }
        lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_schedule() -> Result<()> {
        let mut scheduler = LrScheduler::new(&LearningRateSchedule::Constant { lr: r64(5e-4) })?;
        assert_eq!(scheduler.lr(), 5e-4);
        assert_eq!(scheduler.next(), 5e-4);
        assert_eq!(scheduler.next(), 5e-4);
        Ok(())
    }

    #[test]
    fn step_wise_schedule() -> Result<()> {
        let config = LearningRateSchedule::StepWise {
            steps: vec![(0, r64(1e-3)), (2, r64(1e-4)), (4, r64(1e-5))],
        };
        let mut scheduler = LrScheduler::new(&config)?;
        assert_eq!(scheduler.lr(), 1e-3);
        let lrs: Vec<_> = (0..6).map(|_| scheduler.next()).collect();
        assert_eq!(lrs, [1e-3, 1e-3, 1e-4, 1e-4, 1e-5, 1e-5]);
        assert_eq!(scheduler.lr(), 1e-5);
        Ok(())
    }

    #[test]
    fn reject_invalid_steps() {
        let unordered = LearningRateSchedule::StepWise {
            steps: vec![(0, r64(1e-3)), (5, r64(1e-4)), (3, r64(1e-5))],
        };
        assert!(LrScheduler::new(&unordered).is_err());

        let late_start = LearningRateSchedule::StepWise {
            steps: vec![(1, r64(1e-3))],
        };
        assert!(LrScheduler::new(&late_start).is_err());

        let zero_lr = LearningRateSchedule::Constant { lr: r64(0.0) };
        assert!(LrScheduler::new(&zero_lr).is_err());
    }
}
