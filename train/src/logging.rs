//! CSV logs of metrics and prediction breakdowns.

use crate::common::*;
use std::fs::OpenOptions;

/// An append-only CSV file with a fixed header.
///
/// The header is written only when the file is created or empty, so
/// repeated opening keeps appending rows under the same header.
#[derive(Debug)]
pub struct CsvLog {
    path: PathBuf,
    num_columns: usize,
    writer: csv::Writer<fs::File>,
}

impl CsvLog {
    pub fn open<S>(path: impl AsRef<Path>, header: &[S]) -> Result<Self>
    where
        S: AsRef<str>,
    {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file '{}'", path.display()))?;
        let is_empty = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_empty {
            writer.write_record(header.iter().map(|name| name.as_ref()))?;
            writer.flush()?;
        }

        Ok(Self {
            path: path.to_owned(),
            num_columns: header.len(),
            writer,
        })
    }

    /// Appends a row and flushes it to the file.
    pub fn append<I, S>(&mut self, row: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let row: Vec<String> = row.into_iter().map(|field| field.as_ref().to_string()).collect();
        ensure!(
            row.len() == self.num_columns,
            "expect {} columns in '{}', but get {}",
            self.num_columns,
            self.path.display(),
            row.len()
        );
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Formats an optional ratio, leaving the field empty when absent.
pub fn format_ratio(value: Option<f64>) -> String {
    value.map(|value| format!("{:.6}", value)).unwrap_or_default()
}

/// Formats an optional outcome as `1`, `0` or an empty field.
pub fn format_outcome(value: Option<bool>) -> String {
    value
        .map(|correct| if correct { "1" } else { "0" }.to_string())
        .unwrap_or_default()
}

/// Names of foreground classes, the columns of page-level accuracy.
pub fn foreground_class_names() -> impl Iterator<Item = &'static str> {
    ElementClass::ALL
        .into_iter()
        .filter(|class| !class.is_background())
        .map(|class| class.name())
}

/// The per-evaluation metrics log.
#[derive(Debug)]
pub struct MetricsLog {
    log: CsvLog,
}

impl MetricsLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let header: Vec<String> = ["epoch", "split", "loss", "accuracy"]
            .into_iter()
            .map(String::from)
            .chain(CLASS_NAMES.iter().map(|name| name.to_string()))
            .chain(foreground_class_names().map(|name| format!("img_{}", name)))
            .chain(["score".to_string()])
            .collect();
        Ok(Self {
            log: CsvLog::open(path, &header)?,
        })
    }

    pub fn append(
        &mut self,
        epoch: usize,
        split: &str,
        metrics: &EvalMetrics,
        score: Option<f64>,
    ) -> Result<()> {
        let image_accuracy = metrics.image_accuracy();
        let row: Vec<String> = [
            epoch.to_string(),
            split.to_string(),
            format!("{:.6}", metrics.mean_loss()),
            format!("{:.6}", metrics.accuracy()),
        ]
        .into_iter()
        .chain(metrics.per_class().into_iter().map(format_ratio))
        .chain(
            izip!(ElementClass::ALL, image_accuracy)
                .filter(|(class, _)| !class.is_background())
                .map(|(_, accuracy)| format_ratio(accuracy)),
        )
        .chain([format_ratio(score)])
        .collect();
        self.log.append(row)
    }
}
