//! Saving and restoring model parameters.

use crate::{common::*, model::CovaModel};

/// Saves all model variables to a checkpoint file.
pub fn save(model: &CovaModel, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let variables = model.named_variables();
    let named: Vec<(&str, &Tensor)> = variables
        .iter()
        .map(|(name, var)| (name.as_str(), var))
        .collect();
    Tensor::save_multi(&named, path)
        .with_context(|| format!("failed to save checkpoint '{}'", path.display()))?;
    Ok(())
}

/// Restores model variables from a checkpoint file.
///
/// The checkpoint must hold exactly the variables of the model with the same
/// shapes, i.e. it must be produced by a model of the same configuration.
pub fn load(model: &CovaModel, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut saved: HashMap<String, Tensor> = Tensor::load_multi(path)
        .with_context(|| format!("failed to load checkpoint '{}'", path.display()))?
        .into_iter()
        .collect();

    let pairs: Vec<_> = model
        .named_variables()
        .into_iter()
        .map(|(name, var)| {
            let value = saved.remove(&name).ok_or_else(|| {
                format_err!(
                    "variable '{}' is missing in checkpoint '{}'",
                    name,
                    path.display()
                )
            })?;
            ensure!(
                value.size() == var.size(),
                "variable '{}' has shape {:?} in checkpoint '{}', but the model expects {:?}",
                name,
                value.size(),
                path.display(),
                var.size()
            );
            Ok((var, value))
        })
        .try_collect()?;

    if !saved.is_empty() {
        let unknown = saved.keys().sorted().join(", ");
        bail!(
            "checkpoint '{}' has variables unknown to the model: {}",
            path.display(),
            unknown
        );
    }

    tch::no_grad(|| {
        pairs.into_iter().for_each(|(mut var, value)| {
            var.copy_(&value.to_device(var.device()));
        });
    });

    Ok(())
}
