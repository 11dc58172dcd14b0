use crate::common::*;

/// Cross entropy over raw logits with sparse integer targets.
#[derive(Debug)]
pub struct CrossEntropyLoss {
    reduction: Reduction,
    weight: Option<Tensor>,
}

impl CrossEntropyLoss {
    /// Creates the loss with optional per-class weights.
    pub fn new(weight: Option<Tensor>, reduction: Reduction) -> Self {
        Self { reduction, weight }
    }

    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        // assume [batch_size, n_classes] input shape
        let (batch_size, num_classes) = input.size2().unwrap();

        debug_assert!(
            target.kind() == Kind::Int64 && target.size1().unwrap() == batch_size,
            "expect target a [{}] int64 tensor",
            batch_size
        );
        debug_assert!(
            batch_size == 0
                || (bool::from(target.ge(0).all()) && bool::from(target.lt(num_classes).all())),
            "target values must be in range of [0, {})",
            num_classes
        );
        if let Some(weight) = &self.weight {
            debug_assert!(weight.size1().unwrap() == num_classes);
        }

        // return zero tensor if the input is empty
        if batch_size == 0 {
            let zeros = Tensor::zeros(&[], (Kind::Float, input.device()));
            return match self.reduction {
                Reduction::None => Tensor::zeros(&[0], (Kind::Float, input.device())),
                _ => zeros,
            };
        }

        let weight = self
            .weight
            .as_ref()
            .map(|weight| weight.to_device(input.device()));

        input
            .log_softmax(1, Kind::Float)
            .g_nll_loss(target, weight.as_ref(), self.reduction, -100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::prelude::*;

    #[test]
    fn cross_entropy_loss_converges() -> Result<()> {
        let mut rng = rand::thread_rng();
        let device = Device::Cpu;

        let n_batch = 32;
        let n_class = rng.gen_range(2..10);

        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let loss_fn = CrossEntropyLoss::new(None, Reduction::Sum);

        let input = root.randn("input", &[n_batch, n_class], 0.0, 1.0);
        let target =
            Tensor::randint(n_class, &[n_batch], (Kind::Int64, device)).set_requires_grad(false);

        let mut optimizer = nn::Adam::default().build(&vs, 0.1)?;

        for _ in 0..500 {
            let loss = loss_fn.forward(&input, &target);
            optimizer.backward_step(&loss);
        }

        let accuracy = i64::from(
            input
                .max_dim(1, false)
                .1
                .eq_tensor(&target)
                .sum(Kind::Int64),
        ) as f64
            / n_batch as f64;
        ensure!(accuracy >= 0.99, "the loss does not coverage");

        Ok(())
    }

    #[test]
    fn weighted_sum_reduction() {
        let input = Tensor::of_slice(&[2.0f32, 0.0, 0.0, 1.0]).view([2, 2]);
        let target = Tensor::of_slice(&[0i64, 0]);
        let weight = Tensor::of_slice(&[3.0f32, 1.0]);

        let unweighted = CrossEntropyLoss::new(None, Reduction::Sum).forward(&input, &target);
        let weighted =
            CrossEntropyLoss::new(Some(weight), Reduction::Sum).forward(&input, &target);

        let nll = |logits: [f64; 2]| {
            let log_sum = (logits[0].exp() + logits[1].exp()).ln();
            log_sum - logits[0]
        };
        let expect = nll([2.0, 0.0]) + nll([0.0, 1.0]);

        assert_abs_diff_eq!(f64::from(&unweighted), expect, epsilon = 1e-5);
        // sum reduction does not normalize by the total weight
        assert_abs_diff_eq!(f64::from(&weighted), 3.0 * expect, epsilon = 1e-5);
    }

    #[test]
    fn empty_input_gives_zero_loss() {
        let input = Tensor::zeros(&[0, 4], (Kind::Float, Device::Cpu));
        let target = Tensor::zeros(&[0], (Kind::Int64, Device::Cpu));
        let loss = CrossEntropyLoss::new(None, Reduction::Sum).forward(&input, &target);
        assert_eq!(f64::from(&loss), 0.0);
    }
}
