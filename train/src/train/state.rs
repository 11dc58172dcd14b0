use crate::common::*;

/// Progress of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingState {
    /// The last finished epoch, starting from 1.
    pub epoch: usize,
    /// Number of optimizer steps taken.
    pub step: usize,
    /// The best validation score and the epoch it was reached.
    pub best: Option<(usize, f64)>,
    /// Where the best model is saved.
    pub checkpoint_path: PathBuf,
}

impl TrainingState {
    pub fn new(checkpoint_path: impl AsRef<Path>) -> Self {
        Self {
            epoch: 0,
            step: 0,
            best: None,
            checkpoint_path: checkpoint_path.as_ref().to_owned(),
        }
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best.map(|(_, score)| score)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best.map(|(epoch, _)| epoch)
    }

    /// Records a validation score of the current epoch.
    ///
    /// Returns true if it beats all previous scores.
    pub fn update_best(&mut self, score: f64) -> bool {
        let improved = self.best_score().map_or(true, |best| score > best);
        if improved {
            self.best = Some((self.epoch, score));
        }
        improved
    }
}

/// Whether validation runs after the given epoch.
pub fn is_eval_epoch(epoch: usize, eval_interval: usize) -> bool {
    epoch == 1 || epoch % eval_interval == 0
}
