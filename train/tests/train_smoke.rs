use anyhow::Result;
use cova::dataset::{BoxAnnotation, PageAnnotation, Splits};
use cova::ElementClass;
use std::{fs, path::Path, sync::Arc};
use tch::{vision, Device, Kind, Tensor};
use train::{
    config::Config,
    train::{
        BEST_CHECKPOINT_FILE, FINAL_CHECKPOINT_FILE, METRICS_FILE, TEST_DOMAINS_FILE,
        TEST_IMAGES_FILE, TEST_PREDICTIONS_FILE,
    },
    CONFIG_FILE,
};

const CONFIG: &str = r#"{
    dataset: {
        data_dir: "",
        split_dir: "",
        img_height: 64,
        num_workers: 2,
        prefetch: 1,
    },
    model: {
        backbone: "alexnet",
        roi_output_size: 2,
        context_size: 2,
        context_proj_dim: 8,
        context_dim: 8,
        use_pos_feat: true,
        use_additional_feat: true,
        hidden_dims: [16],
        dropout: 0.2,
    },
    training: {
        device: "cpu",
        num_epochs: 2,
        eval_interval: 1,
        batch_size: 2,
        lr_schedule: { type: "StepWise", steps: [[0, 0.001], [2, 0.0005]] },
        class_weights: [1, 10, 10, 10],
        sampling_fraction: 0.5,
        seed: 7,
    },
    logging: { dir: "" },
}"#;

fn write_page(dir: &Path, id: &str) -> Result<()> {
    use ElementClass::*;

    let image = Tensor::randint(256, &[3, 64, 64], (Kind::Uint8, Device::Cpu));
    vision::image::save(&image, dir.join(format!("{}.png", id)))?;

    let boxes = [Title, Background, Price, Background, Image, Background]
        .iter()
        .enumerate()
        .map(|(nth, &label)| BoxAnnotation {
            tlbr: [nth as f64 * 10.0, 2.0, nth as f64 * 10.0 + 8.0, 50.0],
            label,
            extra: vec![nth as f32 / 6.0],
        })
        .collect();
    fs::write(
        dir.join(format!("{}.json", id)),
        serde_json::to_string(&PageAnnotation { boxes })?,
    )?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn train_and_test_end_to_end() -> Result<()> {
    let root = tempfile::tempdir()?;
    let root = root.path();
    let data_dir = root.join("data");
    let split_dir = root.join("splits");
    let output_dir = root.join("results");
    fs::create_dir_all(&data_dir)?;
    fs::create_dir_all(&split_dir)?;

    for index in 0..7 {
        write_page(&data_dir, &format!("{}", index))?;
    }
    fs::write(split_dir.join(Splits::TRAIN_FILE), "0\n1\n2\n")?;
    fs::write(split_dir.join(Splits::VAL_FILE), "3\n4\n")?;
    fs::write(split_dir.join(Splits::TEST_FILE), "5\n6\n")?;
    fs::write(
        root.join("webpage_info.csv"),
        "img_id,domain\n0,a\n1,a\n2,b\n3,a\n4,b\n5,a\n6,b\n",
    )?;
    fs::write(root.join("test_domains.txt"), "b\n")?;

    let mut config: Config = json5::from_str(CONFIG)?;
    config.dataset.data_dir = data_dir;
    config.dataset.split_dir = split_dir;
    config.dataset.domain_file = Some(root.join("webpage_info.csv"));
    config.dataset.test_domain_file = Some(root.join("test_domains.txt"));
    config.logging.dir = output_dir;
    config.validate()?;

    let summary = train::start(Arc::new(config)).await?;
    let run_dir = &summary.logging_dir;

    assert!(summary.best_epoch.is_some());
    assert!((0.0..=1.0).contains(&summary.best_score));
    assert_eq!(summary.test.metrics.num_boxes(), 12);
    assert!(summary.test.domains.is_some());

    for file in [
        CONFIG_FILE,
        BEST_CHECKPOINT_FILE,
        FINAL_CHECKPOINT_FILE,
        METRICS_FILE,
        TEST_PREDICTIONS_FILE,
        TEST_IMAGES_FILE,
        TEST_DOMAINS_FILE,
    ] {
        assert!(run_dir.join(file).is_file(), "'{}' is missing", file);
    }

    // train and val rows of two epochs, then the test row
    let metrics = fs::read_to_string(run_dir.join(METRICS_FILE))?;
    let splits: Vec<_> = metrics
        .lines()
        .skip(1)
        .map(|line| line.split(',').nth(1).unwrap_or_default().to_string())
        .collect();
    assert_eq!(splits, ["train", "val", "train", "val", "test"]);

    let predictions = fs::read_to_string(run_dir.join(TEST_PREDICTIONS_FILE))?;
    assert_eq!(predictions.lines().count(), 1 + 12);

    // only the held-out domain and the macro row
    let domains = fs::read_to_string(run_dir.join(TEST_DOMAINS_FILE))?;
    let names: Vec<_> = domains
        .lines()
        .skip(1)
        .map(|line| line.split(',').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, ["b", "macro"]);
    Ok(())
}
