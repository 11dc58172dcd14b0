use crate::common::*;

#[derive(Debug, Clone)]
pub struct ClassifierHeadInit {
    pub in_dim: usize,
    pub hidden_dims: Vec<usize>,
    pub num_classes: usize,
    /// Dropout probability applied after each hidden layer.
    pub dropout: R64,
}

impl ClassifierHeadInit {
    pub fn build<'p>(self, path: impl Borrow<nn::Path<'p>>) -> Result<ClassifierHead> {
        let path = path.borrow();
        let Self {
            in_dim,
            hidden_dims,
            num_classes,
            dropout,
        } = self;
        ensure!(in_dim > 0, "in_dim must be positive");
        ensure!(num_classes > 0, "num_classes must be positive");
        ensure!(
            (0.0..1.0).contains(&dropout.raw()),
            "dropout probability must be in range [0, 1)"
        );
        ensure!(
            hidden_dims.iter().all(|&dim| dim > 0),
            "hidden dimensions must be positive"
        );

        let hidden: Vec<_> = hidden_dims
            .iter()
            .scan(in_dim, |prev_dim, &dim| {
                let in_dim = *prev_dim;
                *prev_dim = dim;
                Some((in_dim, dim))
            })
            .enumerate()
            .map(|(index, (in_dim, out_dim))| {
                nn::linear(
                    path / format!("hidden_{}", index),
                    in_dim as i64,
                    out_dim as i64,
                    Default::default(),
                )
            })
            .collect();
        let last_dim = hidden_dims.last().copied().unwrap_or(in_dim);
        let output = nn::linear(
            path / "output",
            last_dim as i64,
            num_classes as i64,
            Default::default(),
        );

        Ok(ClassifierHead {
            hidden,
            output,
            dropout: dropout.raw(),
        })
    }
}

/// Fully connected layers producing raw class logits.
#[derive(Debug)]
pub struct ClassifierHead {
    hidden: Vec<nn::Linear>,
    output: nn::Linear,
    dropout: f64,
}

impl ClassifierHead {
    /// Maps `[num_boxes, in_dim]` features to `[num_boxes, num_classes]` logits.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let Self {
            ref hidden,
            ref output,
            dropout,
        } = *self;

        hidden
            .iter()
            .fold(xs.shallow_clone(), |xs, linear| {
                xs.apply(linear).relu().dropout(dropout, train)
            })
            .apply(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_logits_shape() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = ClassifierHeadInit {
            in_dim: 12,
            hidden_dims: vec![16, 8],
            num_classes: 4,
            dropout: r64(0.5),
        }
        .build(&vs.root())?;

        let xs = Tensor::randn(&[9, 12], (Kind::Float, Device::Cpu));
        assert_eq!(head.forward_t(&xs, true).size(), vec![9, 4]);

        // dropout is inactive in inference mode
        let lhs = head.forward_t(&xs, false);
        let rhs = head.forward_t(&xs, false);
        assert!(lhs.equal(&rhs));
        Ok(())
    }

    #[test]
    fn classifier_rejects_bad_dropout() {
        let vs = nn::VarStore::new(Device::Cpu);
        let result = ClassifierHeadInit {
            in_dim: 4,
            hidden_dims: vec![],
            num_classes: 4,
            dropout: r64(1.0),
        }
        .build(&vs.root());
        assert!(result.is_err());
    }
}
