use super::PageSample;
use crate::common::*;

/// Pages and their boxes packed into a ragged batch.
///
/// Boxes of all pages are flattened in page order, and `index` records which
/// flat range belongs to which page.
#[derive(Debug)]
pub struct Batch {
    pub image_ids: Vec<String>,
    /// `[num_pages, 3, h, w]` images.
    pub images: Tensor,
    /// Pixel-space boxes.
    pub boxes: Vec<TLBR<f64>>,
    pub index: RaggedIndex,
    /// `[num_boxes]` int64 class labels.
    pub labels: Tensor,
    /// `[num_boxes, 4]` normalized `[cx, cy, w, h]` positions.
    pub positions: Tensor,
    /// `[num_boxes, extra_dim]` handcrafted features, if the dataset has any.
    pub extra: Option<Tensor>,
}

impl Batch {
    pub fn collate(samples: Vec<PageSample>, extra_dim: usize) -> Result<Self> {
        ensure!(!samples.is_empty(), "cannot collate an empty batch");

        let index = RaggedIndex::from_counts(samples.iter().map(|sample| sample.boxes.len()));
        let num_boxes = index.num_items() as i64;
        let (_, image_h, image_w) = samples[0].image.size3()?;

        let mut image_ids = vec![];
        let mut images = vec![];
        let mut boxes = vec![];
        let mut labels = vec![];
        let mut positions = vec![];
        let mut extra = vec![];

        for sample in samples {
            let PageSample {
                id,
                image,
                boxes: sample_boxes,
            } = sample;
            ensure!(
                image.size3()? == (3, image_h, image_w),
                "images in a batch must have the same size"
            );

            for bbox in sample_boxes {
                ensure!(
                    bbox.extra.len() == extra_dim,
                    "expect {} extra features, but the page '{}' has {}",
                    extra_dim,
                    id,
                    bbox.extra.len()
                );
                let [cx, cy, w, h] = bbox
                    .tlbr
                    .normalized_cxcywh(image_h as f64, image_w as f64);
                positions.extend([cx as f32, cy as f32, w as f32, h as f32]);
                labels.push(bbox.class.index() as i64);
                extra.extend(bbox.extra);
                boxes.push(bbox.tlbr);
            }

            image_ids.push(id);
            images.push(image);
        }

        Ok(Self {
            image_ids,
            images: Tensor::stack(&images, 0),
            boxes,
            index,
            labels: Tensor::of_slice(&labels),
            positions: Tensor::of_slice(&positions).view([num_boxes, 4]),
            extra: (extra_dim > 0)
                .then(|| Tensor::of_slice(&extra).view([num_boxes, extra_dim as i64])),
        })
    }

    pub fn num_boxes(&self) -> usize {
        self.index.num_items()
    }
}
