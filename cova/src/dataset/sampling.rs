use super::BoxRecord;
use crate::common::*;

/// The fraction of background boxes kept for training.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct SamplingFraction(f64);

impl SamplingFraction {
    /// Creates the fraction. Values outside `[0, 1]` fall back to `1`.
    pub fn new(fraction: f64) -> Self {
        if (0.0..=1.0).contains(&fraction) {
            Self(fraction)
        } else {
            warn!(
                "sampling fraction {} is not in range [0, 1], use 1 instead",
                fraction
            );
            Self(1.0)
        }
    }

    pub fn get(&self) -> f64 {
        self.0
    }
}

impl Default for SamplingFraction {
    fn default() -> Self {
        Self(1.0)
    }
}

impl From<f64> for SamplingFraction {
    fn from(fraction: f64) -> Self {
        Self::new(fraction)
    }
}

impl From<SamplingFraction> for f64 {
    fn from(fraction: SamplingFraction) -> Self {
        fraction.0
    }
}

/// Keeps a random subset of background boxes and all foreground boxes.
///
/// The number of kept background boxes is the rounded product of the fraction
/// and the background count. The relative box order is preserved.
pub fn sample_background<R>(
    boxes: &[BoxRecord],
    fraction: SamplingFraction,
    rng: &mut R,
) -> Vec<BoxRecord>
where
    R: Rng + ?Sized,
{
    let background: Vec<usize> = boxes
        .iter()
        .enumerate()
        .filter(|(_, bbox)| bbox.class.is_background())
        .map(|(index, _)| index)
        .collect();
    let num_kept = (fraction.get() * background.len() as f64).round() as usize;

    let kept: HashSet<usize> = rand::seq::index::sample(rng, background.len(), num_kept)
        .into_iter()
        .map(|nth| background[nth])
        .collect();

    boxes
        .iter()
        .enumerate()
        .filter(|(index, bbox)| !bbox.class.is_background() || kept.contains(index))
        .map(|(_, bbox)| bbox.clone())
        .collect()
}
