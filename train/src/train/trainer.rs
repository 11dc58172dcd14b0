use super::{is_eval_epoch, TrainingState};
use crate::{
    common::*,
    config::{Config, TrainingConfig},
    evaluate::{self, EvalReport},
    logging::MetricsLog,
    utils::{LrScheduler, RateCounter},
};

pub const BEST_CHECKPOINT_FILE: &str = "best.ckpt";
pub const FINAL_CHECKPOINT_FILE: &str = "final.ckpt";
pub const METRICS_FILE: &str = "metrics.csv";
pub const TEST_PREDICTIONS_FILE: &str = "test_predictions.csv";
pub const TEST_IMAGES_FILE: &str = "test_images.csv";
pub const TEST_DOMAINS_FILE: &str = "test_domains.csv";

/// Data loaders of the three splits.
#[derive(Debug)]
pub struct Loaders {
    pub train: BatchLoader,
    pub val: BatchLoader,
    pub test: BatchLoader,
}

/// Domain metadata used in evaluation.
#[derive(Debug, Default)]
pub struct DomainContext {
    pub info: Option<DomainInfo>,
    pub test_domains: Option<HashSet<String>>,
}

/// The outcome of a finished run.
#[derive(Debug)]
pub struct RunSummary {
    pub logging_dir: PathBuf,
    pub best_epoch: Option<usize>,
    pub best_score: f64,
    pub test: EvalReport,
}

/// Owns the model and everything that mutates during training.
pub struct Trainer {
    model: CovaModel,
    optimizer: ModelOptimizer,
    loss_fn: CrossEntropyLoss,
    lr_scheduler: LrScheduler,
    train_loader: BatchLoader,
    val_loader: BatchLoader,
    domain_info: Option<DomainInfo>,
    metrics_log: MetricsLog,
    num_epochs: usize,
    eval_interval: usize,
}

impl Trainer {
    pub fn new(
        config: &Config,
        extra_dim: usize,
        train_loader: BatchLoader,
        val_loader: BatchLoader,
        domain_info: Option<DomainInfo>,
        logging_dir: &Path,
    ) -> Result<Self> {
        let TrainingConfig {
            device,
            num_epochs,
            eval_interval,
            ref lr_schedule,
            weight_decay,
            ref class_weights,
            ..
        } = config.training;

        info!("initializing model on {:?}", device);
        let model = CovaModelInit {
            config: config.model.clone(),
            extra_dim,
            device,
        }
        .build()?;
        info!(
            "{} trainable parameters, backbone {}",
            model.num_trainable_parameters(),
            if model.trainable_backbone() {
                "trainable"
            } else {
                "frozen"
            }
        );

        let loss_fn = {
            let weight = class_weights.as_ref().map(|weights| {
                let weights: Vec<f32> = weights.iter().map(|weight| weight.raw() as f32).collect();
                Tensor::of_slice(&weights).to_device(device)
            });
            CrossEntropyLoss::new(weight, Reduction::Sum)
        };

        let lr_scheduler = LrScheduler::new(lr_schedule)?;
        let optimizer = model.optimizers(lr_scheduler.lr(), weight_decay.raw())?;
        let metrics_log = MetricsLog::open(logging_dir.join(METRICS_FILE))?;

        Ok(Self {
            model,
            optimizer,
            loss_fn,
            lr_scheduler,
            train_loader,
            val_loader,
            domain_info,
            metrics_log,
            num_epochs: num_epochs.get(),
            eval_interval: eval_interval.get(),
        })
    }

    pub fn model(&self) -> &CovaModel {
        &self.model
    }

    pub fn loss_fn(&self) -> &CrossEntropyLoss {
        &self.loss_fn
    }

    pub fn domain_info(&self) -> Option<&DomainInfo> {
        self.domain_info.as_ref()
    }

    /// Runs all epochs and returns the best validation score.
    ///
    /// The model is validated after the first epoch and every
    /// `eval_interval` epochs. Whenever the score improves, the model is saved
    /// to the checkpoint path of the state.
    pub fn train_model(&mut self, state: &mut TrainingState) -> Result<f64> {
        info!("start training for {} epochs", self.num_epochs);

        while state.epoch < self.num_epochs {
            state.epoch += 1;
            let epoch = state.epoch;

            let span = info_span!("train_epoch", epoch);
            let _enter = span.enter();
            self.train_epoch(state)?;

            if is_eval_epoch(epoch, self.eval_interval) {
                let span = info_span!("evaluate", epoch);
                let _enter = span.enter();

                let predictions =
                    evaluate::evaluate_model(&self.model, &mut self.val_loader, &self.loss_fn)?;
                let report = EvalReport::new(predictions, self.domain_info.as_ref(), None);
                report.log_summary("val");
                self.metrics_log
                    .append(epoch, "val", &report.metrics, Some(report.score))?;

                if state.update_best(report.score) {
                    checkpoint::save(&self.model, &state.checkpoint_path)?;
                    info!(
                        "new best score {:.4}, saved '{}'",
                        report.score,
                        state.checkpoint_path.display()
                    );
                }
            }
        }

        let best = state.best_score().unwrap_or(0.0);
        info!(
            "training finished, best score {:.4} at epoch {:?}",
            best,
            state.best_epoch()
        );
        Ok(best)
    }

    fn train_epoch(&mut self, state: &mut TrainingState) -> Result<()> {
        let device = self.model.device();
        let epoch = state.epoch;
        let mut rate_counter = RateCounter::with_second_interval();
        let mut predictions = Predictions::new();

        for batch in self.train_loader.epoch().iter() {
            let batch = batch?;
            let num_boxes = batch.num_boxes();
            if num_boxes == 0 {
                debug!("skip a batch without boxes at step {}", state.step);
                continue;
            }

            let logits = self.model.forward_t(&batch, true)?;
            let labels = batch.labels.to_device(device);
            let loss = self.loss_fn.forward(&logits, &labels);

            let lr = self.lr_scheduler.next();
            self.optimizer.set_lr(lr);
            self.optimizer.backward_step(&loss);
            state.step += 1;

            let loss = f64::from(&loss);
            predictions.push_batch(&batch, &logits.detach(), loss)?;

            rate_counter.add_batch(num_boxes);
            if let Some(throughput) = rate_counter.throughput() {
                info!(
                    "epoch: {}\tstep: {}\tlr: {:.6}\tloss: {:.4}\t{:.2} batches/s\t{:.2} boxes/s",
                    epoch,
                    state.step,
                    lr,
                    loss / num_boxes as f64,
                    throughput.batches_per_sec,
                    throughput.boxes_per_sec
                );
            }
        }

        let metrics = EvalMetrics::compute(&predictions);
        info!(
            "epoch {} finished: loss {:.4}, accuracy {:.4} over {} boxes",
            epoch,
            metrics.mean_loss(),
            metrics.accuracy(),
            metrics.num_boxes()
        );
        self.metrics_log.append(epoch, "train", &metrics, None)?;

        Ok(())
    }
}

/// Trains, validates and tests a model on prepared loaders.
///
/// It blocks on batch channels and must run outside of async tasks.
pub fn training_worker(
    config: Arc<Config>,
    logging_dir: PathBuf,
    extra_dim: usize,
    loaders: Loaders,
    domains: DomainContext,
) -> Result<RunSummary> {
    let Loaders {
        train,
        val,
        mut test,
    } = loaders;
    let DomainContext { info, test_domains } = domains;

    let mut trainer = Trainer::new(&config, extra_dim, train, val, info, &logging_dir)?;
    let mut state = TrainingState::new(logging_dir.join(BEST_CHECKPOINT_FILE));
    let best_score = trainer.train_model(&mut state)?;

    let final_path = logging_dir.join(FINAL_CHECKPOINT_FILE);
    checkpoint::save(trainer.model(), &final_path)?;
    info!("saved the final model to '{}'", final_path.display());

    // test the best model
    if state.best.is_some() {
        checkpoint::load(trainer.model(), &state.checkpoint_path)?;
        info!(
            "restored the best model from '{}'",
            state.checkpoint_path.display()
        );
    }

    let test_report = {
        let span = info_span!("test");
        let _enter = span.enter();

        let predictions =
            evaluate::evaluate_model(trainer.model(), &mut test, trainer.loss_fn())?;
        let report = EvalReport::new(predictions, trainer.domain_info(), None);
        report.log_summary("test");
        report
    };

    evaluate::write_box_predictions(
        logging_dir.join(TEST_PREDICTIONS_FILE),
        &test_report.predictions,
    )?;
    evaluate::write_image_predictions(
        logging_dir.join(TEST_IMAGES_FILE),
        &test_report.predictions,
        trainer.domain_info(),
    )?;
    if let Some(info) = trainer.domain_info() {
        // the breakdown file is limited to the held-out domains if listed
        let domains =
            DomainMetrics::compute(&test_report.predictions, info, test_domains.as_ref());
        evaluate::write_domain_metrics(logging_dir.join(TEST_DOMAINS_FILE), &domains)?;
    }
    trainer
        .metrics_log
        .append(
            state.epoch,
            "test",
            &test_report.metrics,
            Some(test_report.score),
        )?;

    Ok(RunSummary {
        logging_dir,
        best_epoch: state.best_epoch(),
        best_score,
        test: test_report,
    })
}
