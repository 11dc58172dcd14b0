//! The training program of the web element classifier.

pub mod common;
pub mod config;
pub mod evaluate;
pub mod logging;
pub mod train;
pub mod utils;

use crate::{
    common::*,
    train::{DomainContext, Loaders, RunSummary},
};
use cova::dataset::load_test_domains;

/// The file name of the saved configuration in a run directory.
pub const CONFIG_FILE: &str = "config.json";

/// The entry of training program.
pub async fn start(config: Arc<config::Config>) -> Result<RunSummary> {
    let start_time = Local::now();
    let logging_dir = config
        .logging
        .dir
        .join(format!("{}", start_time.format(utils::FILE_STRFTIME)));

    // create dirs and save config
    {
        tokio::fs::create_dir_all(&logging_dir).await?;
        let path = logging_dir.join(CONFIG_FILE);
        let text = serde_json::to_string_pretty(&*config)?;
        tokio::fs::write(&path, text).await?;
        info!("run directory '{}'", logging_dir.display());
    }

    let config::TrainingConfig {
        batch_size,
        sampling_fraction,
        seed,
        ..
    } = config.training;
    let config::DatasetConfig {
        ref data_dir,
        ref split_dir,
        img_height,
        ref domain_file,
        ref test_domain_file,
        num_workers,
        prefetch,
    } = config.dataset;
    tch::manual_seed(seed as i64);

    // load dataset
    info!("loading dataset");
    let splits = Splits::load(split_dir)?;
    info!(
        "{} train, {} val and {} test pages",
        splits.train.len(),
        splits.val.len(),
        splits.test.len()
    );
    let (train_set, val_set, test_set) = futures::try_join!(
        PageDataset::load(data_dir, &splits.train, img_height.get()),
        PageDataset::load(data_dir, &splits.val, img_height.get()),
        PageDataset::load(data_dir, &splits.test, img_height.get()),
    )?;
    info!("train class counts {:?}", train_set.class_counts());

    let extra_dim = {
        let dims: Vec<usize> = [&train_set, &val_set, &test_set]
            .iter()
            .map(|dataset| dataset.extra_dim())
            .filter(|&dim| dim > 0)
            .unique()
            .collect();
        match dims.as_slice() {
            [] => 0,
            &[dim] => dim,
            _ => bail!("splits have inconsistent additional feature sizes {:?}", dims),
        }
    };

    let domains = DomainContext {
        info: DomainInfo::load_optional(domain_file.as_deref())?,
        test_domains: load_test_domains(test_domain_file.as_deref())?,
    };

    let loaders = {
        let loader = |shuffle: bool, sampling: Option<SamplingFraction>, seed: u64| {
            BatchLoaderInit {
                batch_size: batch_size.get(),
                shuffle,
                sampling,
                num_workers: num_workers.get(),
                prefetch: prefetch.get(),
                seed,
            }
        };

        Loaders {
            train: loader(true, Some(sampling_fraction), seed).build(Arc::new(train_set))?,
            val: loader(false, None, seed).build(Arc::new(val_set))?,
            test: loader(false, None, seed).build(Arc::new(test_set))?,
        }
    };
    info!(
        "{} train, {} val and {} test batches per epoch",
        loaders.train.num_batches(),
        loaders.val.num_batches(),
        loaders.test.num_batches()
    );

    // training worker
    let summary = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            train::training_worker(config, logging_dir, extra_dim, loaders, domains)
        })
        .await??
    };

    Ok(summary)
}
