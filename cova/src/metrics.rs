//! Box-level, page-level and domain-wise accuracy.

use crate::{
    class::{ElementClass, N_CLASSES},
    common::*,
    dataset::{Batch, DomainInfo},
};

/// Correct and total counts per class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassTally {
    correct: [usize; N_CLASSES],
    total: [usize; N_CLASSES],
}

impl ClassTally {
    pub fn add(&mut self, class: ElementClass, correct: bool) {
        let index = class.index();
        self.total[index] += 1;
        if correct {
            self.correct[index] += 1;
        }
    }

    pub fn merge(&mut self, other: &Self) {
        izip!(&mut self.correct, &other.correct).for_each(|(lhs, rhs)| *lhs += rhs);
        izip!(&mut self.total, &other.total).for_each(|(lhs, rhs)| *lhs += rhs);
    }

    pub fn total(&self, class: ElementClass) -> usize {
        self.total[class.index()]
    }

    pub fn num_samples(&self) -> usize {
        self.total.iter().sum()
    }

    /// Accuracy over samples of one class, `None` if there are none.
    pub fn accuracy(&self, class: ElementClass) -> Option<f64> {
        let index = class.index();
        (self.total[index] > 0).then(|| self.correct[index] as f64 / self.total[index] as f64)
    }

    pub fn per_class(&self) -> [Option<f64>; N_CLASSES] {
        ElementClass::ALL.map(|class| self.accuracy(class))
    }

    /// Accuracy over all samples, `None` if there are none.
    pub fn overall(&self) -> Option<f64> {
        let total = self.num_samples();
        (total > 0).then(|| self.correct.iter().sum::<usize>() as f64 / total as f64)
    }
}

/// The prediction of one box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxPrediction {
    pub image_id: String,
    /// Position of the box in its page.
    pub box_index: usize,
    pub predicted: ElementClass,
    pub target: ElementClass,
}

impl BoxPrediction {
    pub fn is_correct(&self) -> bool {
        self.predicted == self.target
    }
}

/// Page-level top-1 outcome.
///
/// For each foreground class present in the page, the box scoring highest for
/// that class is picked, and the page is correct for the class if that box
/// carries the class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePrediction {
    pub image_id: String,
    pub top1: [Option<bool>; N_CLASSES],
}

/// Predictions accumulated over an evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct Predictions {
    boxes: Vec<BoxPrediction>,
    images: Vec<ImagePrediction>,
    loss: f64,
}

impl Predictions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the `[num_boxes, N_CLASSES]` logits of a batch and its summed loss.
    pub fn push_batch(&mut self, batch: &Batch, logits: &Tensor, loss: f64) -> Result<()> {
        let num_boxes = batch.num_boxes();
        ensure!(
            logits.size() == [num_boxes as i64, N_CLASSES as i64],
            "expect logits of shape [{}, {}], but get {:?}",
            num_boxes,
            N_CLASSES,
            logits.size()
        );

        let logits = logits
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .contiguous()
            .view([-1]);
        let scores = Vec::<f32>::from(&logits);
        let labels = Vec::<i64>::from(&batch.labels.to_device(Device::Cpu));
        let targets: Vec<ElementClass> = labels
            .into_iter()
            .map(ElementClass::try_from)
            .try_collect()?;
        let row = |index: usize| &scores[index * N_CLASSES..(index + 1) * N_CLASSES];

        for (image_id, range) in izip!(&batch.image_ids, batch.index.ranges()) {
            for (box_index, index) in range.clone().enumerate() {
                // first maximum wins on ties
                let predicted = argmax(row(index).iter().copied()).unwrap_or(0);
                self.boxes.push(BoxPrediction {
                    image_id: image_id.clone(),
                    box_index,
                    predicted: ElementClass::ALL[predicted],
                    target: targets[index],
                });
            }

            let mut top1 = [None; N_CLASSES];
            ElementClass::ALL
                .iter()
                .filter(|class| !class.is_background())
                .filter(|&&class| targets[range.clone()].contains(&class))
                .for_each(|&class| {
                    let column = range.clone().map(|index| row(index)[class.index()]);
                    let best = argmax(column).map(|nth| range.start + nth);
                    top1[class.index()] = best.map(|index| targets[index] == class);
                });
            self.images.push(ImagePrediction {
                image_id: image_id.clone(),
                top1,
            });
        }

        self.loss += loss;
        Ok(())
    }

    pub fn boxes(&self) -> &[BoxPrediction] {
        &self.boxes
    }

    pub fn images(&self) -> &[ImagePrediction] {
        &self.images
    }

    /// Summed loss over all recorded boxes.
    pub fn loss(&self) -> f64 {
        self.loss
    }

    fn box_tally<'a>(boxes: impl IntoIterator<Item = &'a BoxPrediction>) -> ClassTally {
        let mut tally = ClassTally::default();
        boxes
            .into_iter()
            .for_each(|pred| tally.add(pred.target, pred.is_correct()));
        tally
    }

    fn image_tally<'a>(images: impl IntoIterator<Item = &'a ImagePrediction>) -> ClassTally {
        let mut tally = ClassTally::default();
        images.into_iter().for_each(|image| {
            izip!(ElementClass::ALL, image.top1)
                .filter_map(|(class, correct)| Some((class, correct?)))
                .for_each(|(class, correct)| tally.add(class, correct));
        });
        tally
    }
}

fn argmax(values: impl IntoIterator<Item = f32>) -> Option<usize> {
    values
        .into_iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (index, value)| match best {
            Some((_, best_value)) if best_value >= value => best,
            _ => Some((index, value)),
        })
        .map(|(index, _)| index)
}

/// Metrics over all evaluated boxes and pages.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalMetrics {
    pub boxes: ClassTally,
    /// Page-level top-1 counts of foreground classes.
    pub images: ClassTally,
    pub loss: f64,
}

impl EvalMetrics {
    pub fn compute(predictions: &Predictions) -> Self {
        Self {
            boxes: Predictions::box_tally(predictions.boxes()),
            images: Predictions::image_tally(predictions.images()),
            loss: predictions.loss(),
        }
    }

    pub fn num_boxes(&self) -> usize {
        self.boxes.num_samples()
    }

    /// Fraction of correctly classified boxes.
    pub fn accuracy(&self) -> f64 {
        self.boxes.overall().unwrap_or(0.0)
    }

    pub fn per_class(&self) -> [Option<f64>; N_CLASSES] {
        self.boxes.per_class()
    }

    pub fn image_accuracy(&self) -> [Option<f64>; N_CLASSES] {
        self.images.per_class()
    }

    /// Mean loss per box.
    pub fn mean_loss(&self) -> f64 {
        match self.num_boxes() {
            0 => 0.0,
            count => self.loss / count as f64,
        }
    }
}

/// Box and page counts of one domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainEntry {
    pub num_images: usize,
    pub boxes: ClassTally,
    pub images: ClassTally,
}

/// Accuracy broken down by website domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainMetrics {
    /// Entries sorted by domain name.
    pub domains: IndexMap<String, DomainEntry>,
    /// Number of pages without a known domain.
    pub num_unknown: usize,
}

impl DomainMetrics {
    /// Groups predictions by domain.
    ///
    /// With `filter`, only the listed domains are kept.
    pub fn compute(
        predictions: &Predictions,
        info: &DomainInfo,
        filter: Option<&HashSet<String>>,
    ) -> Self {
        let keep = |domain: &str| filter.map_or(true, |filter| filter.contains(domain));
        let mut domains: IndexMap<String, DomainEntry> = IndexMap::new();
        let mut unknown = HashSet::new();

        for image in predictions.images() {
            match info.domain_of(&image.image_id) {
                Some(domain) if keep(domain) => {
                    let entry = domains.entry(domain.to_string()).or_default();
                    entry.num_images += 1;
                    entry.images.merge(&Predictions::image_tally([image]));
                }
                Some(_) => {}
                None => {
                    unknown.insert(image.image_id.as_str());
                }
            }
        }

        for pred in predictions.boxes() {
            if let Some(entry) = info
                .domain_of(&pred.image_id)
                .and_then(|domain| domains.get_mut(domain))
            {
                entry.boxes.add(pred.target, pred.is_correct());
            }
        }

        if !unknown.is_empty() {
            warn!("{} pages have no domain information", unknown.len());
        }
        domains.sort_keys();

        Self {
            domains,
            num_unknown: unknown.len(),
        }
    }

    /// Unweighted mean of per-domain box accuracies for each class.
    pub fn macro_per_class(&self) -> [Option<f64>; N_CLASSES] {
        self.macro_average(|entry| &entry.boxes)
    }

    /// Unweighted mean of per-domain page-level accuracies for each class.
    pub fn macro_image_accuracy(&self) -> [Option<f64>; N_CLASSES] {
        self.macro_average(|entry| &entry.images)
    }

    fn macro_average<F>(&self, tally_of: F) -> [Option<f64>; N_CLASSES]
    where
        F: Fn(&DomainEntry) -> &ClassTally,
    {
        ElementClass::ALL.map(|class| {
            let values: Vec<f64> = self
                .domains
                .values()
                .filter_map(|entry| tally_of(entry).accuracy(class))
                .collect();
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        })
    }
}

/// The model selection score: mean foreground class accuracy.
///
/// Macro-domain accuracies are used when domain metrics are available.
pub fn selection_score(metrics: &EvalMetrics, domains: Option<&DomainMetrics>) -> f64 {
    let per_class = match domains {
        Some(domains) if !domains.domains.is_empty() => domains.macro_per_class(),
        _ => metrics.per_class(),
    };
    let values: Vec<f64> = izip!(ElementClass::ALL, per_class)
        .filter(|(class, _)| !class.is_background())
        .filter_map(|(_, accuracy)| accuracy)
        .collect();
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{BoxRecord, PageSample};
    use approx::assert_abs_diff_eq;
    use ElementClass::*;

    fn batch_of(pages: &[(&str, &[ElementClass])]) -> Result<Batch> {
        let samples = pages
            .iter()
            .map(|(id, classes)| PageSample {
                id: id.to_string(),
                image: Tensor::zeros(&[3, 32, 32], (Kind::Float, Device::Cpu)),
                boxes: classes
                    .iter()
                    .map(|&class| BoxRecord {
                        tlbr: TLBR::from_tlhw([0.0, 0.0, 4.0, 4.0]),
                        class,
                        extra: vec![],
                    })
                    .collect(),
            })
            .collect();
        Batch::collate(samples, 0)
    }

    /// One-hot logits voting for the given classes.
    fn logits_of(predicted: &[ElementClass]) -> Tensor {
        let indexes: Vec<i64> = predicted.iter().map(|class| class.index() as i64).collect();
        Tensor::of_slice(&indexes).onehot(N_CLASSES as i64).to_kind(Kind::Float)
    }

    #[test]
    fn box_and_page_accuracy() -> Result<()> {
        let batch = batch_of(&[
            ("a", &[Background, Price, Title, Image]),
            ("b", &[Background, Price, Background]),
        ])?;
        #[rustfmt::skip]
        let logits = Tensor::of_slice(&[
            5.0f32, 0.0, 0.0, 0.0, // page a
            0.0, 3.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 2.0,
            0.0, 0.0, 0.5, 4.0,
            0.0, 1.0, 0.0, 0.0, // page b
            0.0, 0.5, 0.0, 0.0,
            2.0, 0.0, 0.0, 0.0,
        ])
        .view([7, 4]);

        let mut predictions = Predictions::new();
        predictions.push_batch(&batch, &logits, 1.5)?;
        let metrics = EvalMetrics::compute(&predictions);

        assert_eq!(metrics.num_boxes(), 7);
        // the title box and the first background of page b are wrong
        assert_abs_diff_eq!(metrics.accuracy(), 5.0 / 7.0);
        assert_eq!(
            metrics.per_class(),
            [Some(2.0 / 3.0), Some(1.0), Some(0.0), Some(1.0)]
        );
        // the title is chosen by its own column, page b picks the wrong price box
        assert_eq!(predictions.images()[0].top1, [None, Some(true), Some(true), Some(true)]);
        assert_eq!(predictions.images()[1].top1, [None, Some(false), None, None]);
        assert_eq!(
            metrics.image_accuracy(),
            [None, Some(0.5), Some(1.0), Some(1.0)]
        );
        assert_abs_diff_eq!(metrics.mean_loss(), 1.5 / 7.0);
        Ok(())
    }

    #[test]
    fn overall_is_weighted_mean_of_classes() -> Result<()> {
        let targets = [Background, Background, Background, Price, Title, Title, Image];
        let predicted = [Background, Price, Background, Price, Background, Title, Title];
        let batch = batch_of(&[("a", &targets[..4]), ("b", &targets[4..])])?;

        let mut predictions = Predictions::new();
        predictions.push_batch(&batch, &logits_of(&predicted), 0.0)?;
        let metrics = EvalMetrics::compute(&predictions);

        let weighted: f64 = izip!(ElementClass::ALL, metrics.per_class())
            .map(|(class, accuracy)| {
                let accuracy = accuracy.unwrap_or(0.0);
                assert!((0.0..=1.0).contains(&accuracy));
                accuracy * metrics.boxes.total(class) as f64
            })
            .sum::<f64>()
            / metrics.num_boxes() as f64;
        assert_abs_diff_eq!(metrics.accuracy(), weighted, epsilon = 1e-12);
        assert_abs_diff_eq!(metrics.accuracy(), 4.0 / 7.0);
        Ok(())
    }

    #[test]
    fn macro_accuracy_balances_domains() -> Result<()> {
        // ten correct price boxes in domain x, two wrong price boxes in domain y
        let pages: Vec<(String, Vec<ElementClass>)> = (0..12)
            .map(|index| (format!("{}", index), vec![Price]))
            .collect();
        let page_refs: Vec<(&str, &[ElementClass])> = pages
            .iter()
            .map(|(id, classes)| (id.as_str(), classes.as_slice()))
            .collect();
        let batch = batch_of(&page_refs)?;
        let predicted: Vec<_> = (0..12)
            .map(|index| if index < 10 { Price } else { Background })
            .collect();

        let mut predictions = Predictions::new();
        predictions.push_batch(&batch, &logits_of(&predicted), 0.0)?;

        let info = DomainInfo::new(
            (0..12)
                .map(|index| {
                    let domain = if index < 10 { "x" } else { "y" };
                    (format!("{}", index), domain.to_string())
                })
                .collect(),
        );
        let metrics = EvalMetrics::compute(&predictions);
        let domains = DomainMetrics::compute(&predictions, &info, None);

        let micro = metrics.per_class()[Price.index()].unwrap();
        let macro_ = domains.macro_per_class()[Price.index()].unwrap();
        assert_abs_diff_eq!(micro, 10.0 / 12.0);
        assert_abs_diff_eq!(macro_, 0.5);
        assert!((micro - macro_).abs() > 0.3);
        assert_eq!(domains.domains.keys().collect::<Vec<_>>(), ["x", "y"]);
        assert_eq!(domains.domains["x"].num_images, 10);
        assert_abs_diff_eq!(domains.macro_image_accuracy()[Price.index()].unwrap(), 0.5);

        // the selection score follows the macro accuracy
        assert_abs_diff_eq!(selection_score(&metrics, Some(&domains)), 0.5);
        assert_abs_diff_eq!(selection_score(&metrics, None), 10.0 / 12.0);
        Ok(())
    }

    #[test]
    fn domain_filter_and_unknown_pages() -> Result<()> {
        let batch = batch_of(&[("1", &[Price]), ("2", &[Title]), ("3", &[Image])])?;
        let mut predictions = Predictions::new();
        predictions.push_batch(&batch, &logits_of(&[Price, Title, Image]), 0.0)?;

        let info = DomainInfo::new(
            [("1", "x"), ("2", "y")]
                .iter()
                .map(|(id, domain)| (id.to_string(), domain.to_string()))
                .collect(),
        );
        let filter: HashSet<String> = ["y".to_string()].into_iter().collect();
        let domains = DomainMetrics::compute(&predictions, &info, Some(&filter));

        assert_eq!(domains.domains.len(), 1);
        assert_eq!(domains.num_unknown, 1);
        assert_eq!(domains.macro_per_class()[Title.index()], Some(1.0));
        assert_eq!(domains.macro_per_class()[Price.index()], None);
        Ok(())
    }

    #[test]
    fn reject_mismatched_logits() -> Result<()> {
        let batch = batch_of(&[("a", &[Price, Title])])?;
        let mut predictions = Predictions::new();
        let logits = Tensor::zeros(&[3, 4], (Kind::Float, Device::Cpu));
        assert!(predictions.push_batch(&batch, &logits, 0.0).is_err());
        Ok(())
    }
}
