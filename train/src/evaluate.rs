//! Evaluation passes and their breakdown files.

use crate::{
    common::*,
    logging::{foreground_class_names, format_outcome, format_ratio, CsvLog},
};
use cova::metrics::selection_score;

/// The result of an evaluation pass.
#[derive(Debug)]
pub struct EvalReport {
    pub predictions: Predictions,
    pub metrics: EvalMetrics,
    /// Present when domain information is available.
    pub domains: Option<DomainMetrics>,
    /// The model selection score.
    pub score: f64,
}

impl EvalReport {
    pub fn new(
        predictions: Predictions,
        domain_info: Option<&DomainInfo>,
        domain_filter: Option<&HashSet<String>>,
    ) -> Self {
        let metrics = EvalMetrics::compute(&predictions);
        let domains =
            domain_info.map(|info| DomainMetrics::compute(&predictions, info, domain_filter));
        let score = selection_score(&metrics, domains.as_ref());

        Self {
            predictions,
            metrics,
            domains,
            score,
        }
    }

    /// Logs a summary of the metrics.
    pub fn log_summary(&self, split: &str) {
        let per_class = izip!(CLASS_NAMES, self.metrics.per_class())
            .map(|(name, accuracy)| format!("{} {}", name, display_ratio(accuracy)))
            .join(", ");
        let per_image = izip!(ElementClass::ALL, self.metrics.image_accuracy())
            .filter(|(class, _)| !class.is_background())
            .map(|(class, accuracy)| format!("{} {}", class.name(), display_ratio(accuracy)))
            .join(", ");

        info!(
            "{}: loss {:.4}, accuracy {:.4} over {} boxes",
            split,
            self.metrics.mean_loss(),
            self.metrics.accuracy(),
            self.metrics.num_boxes()
        );
        info!("{} class accuracy: {}", split, per_class);
        info!("{} page top-1 accuracy: {}", split, per_image);

        if let Some(domains) = &self.domains {
            let macro_per_class = izip!(CLASS_NAMES, domains.macro_per_class())
                .map(|(name, accuracy)| format!("{} {}", name, display_ratio(accuracy)))
                .join(", ");
            info!(
                "{} macro accuracy over {} domains: {}",
                split,
                domains.domains.len(),
                macro_per_class
            );
        }
    }
}

fn display_ratio(value: Option<f64>) -> String {
    value
        .map(|value| format!("{:.4}", value))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Runs the model over all batches of a loader without gradient tracking.
pub fn evaluate_model(
    model: &CovaModel,
    loader: &mut BatchLoader,
    loss_fn: &CrossEntropyLoss,
) -> Result<Predictions> {
    let device = model.device();
    let mut predictions = Predictions::new();

    tch::no_grad(|| -> Result<_> {
        for batch in loader.epoch().iter() {
            let batch = batch?;
            let logits = model.forward_t(&batch, false)?;
            let loss = loss_fn.forward(&logits, &batch.labels.to_device(device));
            predictions.push_batch(&batch, &logits, f64::from(&loss))?;
        }
        Ok(())
    })?;

    Ok(predictions)
}

/// Writes the per-box predictions.
pub fn write_box_predictions(path: impl AsRef<Path>, predictions: &Predictions) -> Result<()> {
    let mut log = CsvLog::open(
        path,
        &["img_id", "box_index", "predicted", "target", "correct"],
    )?;
    for pred in predictions.boxes() {
        log.append([
            pred.image_id.clone(),
            pred.box_index.to_string(),
            pred.predicted.name().to_string(),
            pred.target.name().to_string(),
            format_outcome(Some(pred.is_correct())),
        ])?;
    }
    Ok(())
}

/// Writes the page-level top-1 outcomes per image.
pub fn write_image_predictions(
    path: impl AsRef<Path>,
    predictions: &Predictions,
    domain_info: Option<&DomainInfo>,
) -> Result<()> {
    let header: Vec<String> = ["img_id", "domain"]
        .into_iter()
        .map(String::from)
        .chain(foreground_class_names().map(String::from))
        .collect();
    let mut log = CsvLog::open(path, &header)?;

    for image in predictions.images() {
        let domain = domain_info
            .and_then(|info| info.domain_of(&image.image_id))
            .unwrap_or_default();
        let row: Vec<String> = [image.image_id.clone(), domain.to_string()]
            .into_iter()
            .chain(
                izip!(ElementClass::ALL, image.top1)
                    .filter(|(class, _)| !class.is_background())
                    .map(|(_, outcome)| format_outcome(outcome)),
            )
            .collect();
        log.append(row)?;
    }
    Ok(())
}

/// Writes per-domain accuracies followed by their macro average.
pub fn write_domain_metrics(path: impl AsRef<Path>, domains: &DomainMetrics) -> Result<()> {
    let header: Vec<String> = ["domain", "num_images"]
        .into_iter()
        .map(String::from)
        .chain(CLASS_NAMES.iter().map(|name| name.to_string()))
        .chain(foreground_class_names().map(|name| format!("img_{}", name)))
        .collect();
    let mut log = CsvLog::open(path, &header)?;

    let foreground = |values: [Option<f64>; N_CLASSES]| {
        izip!(ElementClass::ALL, values)
            .filter(|(class, _)| !class.is_background())
            .map(|(_, value)| format_ratio(value))
            .collect::<Vec<_>>()
    };

    for (domain, entry) in &domains.domains {
        let row: Vec<String> = [domain.clone(), entry.num_images.to_string()]
            .into_iter()
            .chain(entry.boxes.per_class().into_iter().map(format_ratio))
            .chain(foreground(entry.images.per_class()))
            .collect();
        log.append(row)?;
    }

    let num_images: usize = domains.domains.values().map(|entry| entry.num_images).sum();
    let row: Vec<String> = ["macro".to_string(), num_images.to_string()]
        .into_iter()
        .chain(domains.macro_per_class().into_iter().map(format_ratio))
        .chain(foreground(domains.macro_image_accuracy()))
        .collect();
    log.append(row)?;

    Ok(())
}
