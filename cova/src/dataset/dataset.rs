use super::{sample_background, BoxRecord, PageAnnotation, PageRecord, SamplingFraction};
use crate::{class::N_CLASSES, common::*};

/// ImageNet channel statistics expected by the pretrained backbones.
const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Annotated pages of one split, with images loaded on demand.
#[derive(Debug)]
pub struct PageDataset {
    data_dir: PathBuf,
    img_height: i64,
    pages: Vec<Arc<PageRecord>>,
    extra_dim: usize,
}

/// A page with its decoded image and the boxes selected for this pass.
#[derive(Debug)]
pub struct PageSample {
    pub id: String,
    /// `[3, img_height, img_height]` normalized image.
    pub image: Tensor,
    pub boxes: Vec<BoxRecord>,
}

impl PageDataset {
    /// Loads the annotations `<data_dir>/<id>.json` of the given pages.
    pub async fn load(
        data_dir: impl AsRef<Path>,
        ids: &[String],
        img_height: usize,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_owned();

        let pages: Vec<PageRecord> = stream::iter(ids.to_owned())
            .map(|id| {
                let path = data_dir.join(format!("{}.json", id));

                async move {
                    let text = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("failed to read '{}'", path.display()))?;
                    let annotation: PageAnnotation = serde_json::from_str(&text)
                        .with_context(|| format!("failed to parse '{}'", path.display()))?;
                    PageRecord::from_annotation(id, annotation)
                }
            })
            .buffered(num_cpus::get())
            .try_collect()
            .await?;

        Self::from_records(data_dir, pages, img_height)
    }

    pub fn from_records(
        data_dir: impl AsRef<Path>,
        pages: Vec<PageRecord>,
        img_height: usize,
    ) -> Result<Self> {
        ensure!(img_height > 0, "img_height must be positive");

        let dims: Vec<usize> = pages
            .iter()
            .map(|page| page.extra_dim())
            .filter_map_ok(|dim| dim)
            .try_collect()?;
        let dims: Vec<usize> = dims.into_iter().unique().collect();
        let extra_dim = match dims.as_slice() {
            [] => 0,
            &[dim] => dim,
            _ => bail!("pages have inconsistent extra feature sizes {:?}", dims),
        };

        Ok(Self {
            data_dir: data_dir.as_ref().to_owned(),
            img_height: img_height as i64,
            pages: pages.into_iter().map(Arc::new).collect(),
            extra_dim,
        })
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[Arc<PageRecord>] {
        &self.pages
    }

    /// The size of handcrafted features per box, zero if absent.
    pub fn extra_dim(&self) -> usize {
        self.extra_dim
    }

    /// Number of boxes per class over all pages.
    pub fn class_counts(&self) -> [usize; N_CLASSES] {
        let mut counts = [0; N_CLASSES];
        self.pages
            .iter()
            .flat_map(|page| &page.boxes)
            .for_each(|bbox| counts[bbox.class.index()] += 1);
        counts
    }

    pub fn image_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.png", id))
    }

    /// Decodes the page image and selects its boxes.
    ///
    /// With a sampling fraction, background boxes are subsampled with `rng`.
    pub fn load_sample<R>(
        &self,
        page: &PageRecord,
        sampling: Option<SamplingFraction>,
        rng: &mut R,
    ) -> Result<PageSample>
    where
        R: Rng + ?Sized,
    {
        let image = load_image(self.image_path(&page.id), self.img_height)?;
        let boxes = match sampling {
            Some(fraction) => sample_background(&page.boxes, fraction, rng),
            None => page.boxes.clone(),
        };

        Ok(PageSample {
            id: page.id.clone(),
            image,
            boxes,
        })
    }
}

/// Loads an image into a normalized `[3, size, size]` float tensor.
///
/// The image is cropped to its top-left `size × size` region and zero-padded
/// at the bottom and right when smaller.
pub fn load_image(path: impl AsRef<Path>, size: i64) -> Result<Tensor> {
    let path = path.as_ref();
    let image = vision::image::load(path)
        .with_context(|| format!("failed to load image '{}'", path.display()))?;
    let (channels, height, width) = image.size3()?;
    ensure!(
        channels == 3,
        "expect a 3-channel image, but '{}' has {} channels",
        path.display(),
        channels
    );

    let height = height.min(size);
    let width = width.min(size);
    let image = image
        .i((.., ..height, ..width))
        .constant_pad_nd(&[0, size - width, 0, size - height])
        .to_kind(Kind::Float)
        / 255.0;

    let mean = Tensor::of_slice(&CHANNEL_MEAN).view([3, 1, 1]);
    let std = Tensor::of_slice(&CHANNEL_STD).view([3, 1, 1]);
    Ok((image - mean) / std)
}
