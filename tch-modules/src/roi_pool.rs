use crate::{common::*, ragged::RaggedIndex};
use bbox::TLBR;

#[derive(Debug, Clone)]
pub struct RoiPoolInit {
    /// Side length of the square output map.
    pub output_size: usize,
    /// The ratio of image pixels to feature grid cells.
    pub downsample_factor: i64,
}

impl RoiPoolInit {
    pub fn build(self) -> Result<RoiPool> {
        let Self {
            output_size,
            downsample_factor,
        } = self;
        ensure!(output_size > 0, "output_size must be positive");
        ensure!(downsample_factor > 0, "downsample_factor must be positive");

        Ok(RoiPool {
            output_size: output_size as i64,
            downsample_factor: downsample_factor as f64,
        })
    }
}

/// Max pooling of box regions on a feature grid into fixed-size maps.
#[derive(Debug)]
pub struct RoiPool {
    output_size: i64,
    downsample_factor: f64,
}

impl RoiPool {
    pub fn output_size(&self) -> i64 {
        self.output_size
    }

    /// Pools every box of every image.
    ///
    /// `features` is a `[batch, c, h, w]` grid, `boxes` holds pixel-space boxes
    /// of all images flattened in image order, and `index` groups them by image.
    /// The output is a `[num_boxes, c, size, size]` tensor in the same box order.
    pub fn forward(
        &self,
        features: &Tensor,
        boxes: &[TLBR<f64>],
        index: &RaggedIndex,
    ) -> Result<Tensor> {
        let Self {
            output_size,
            downsample_factor,
        } = *self;
        let (batch_size, channels, grid_h, grid_w) = features.size4()?;
        ensure!(
            batch_size as usize == index.num_groups(),
            "expect {} feature grids, but get {}",
            index.num_groups(),
            batch_size
        );
        ensure!(
            boxes.len() == index.num_items(),
            "expect {} boxes, but get {}",
            index.num_items(),
            boxes.len()
        );

        if boxes.is_empty() {
            return Ok(Tensor::zeros(
                &[0, channels, output_size, output_size],
                (features.kind(), features.device()),
            ));
        }

        let pooled: Vec<Tensor> = index
            .ranges()
            .enumerate()
            .flat_map(|(image_index, range)| {
                let grid = features.select(0, image_index as i64);

                boxes[range].iter().map(move |tlbr| {
                    let cells = tlbr.to_grid_cells(downsample_factor, grid_h, grid_w);
                    let region = grid.i((.., cells.t..cells.b, cells.l..cells.r));
                    let (pooled, _argmax) = region.adaptive_max_pool2d(&[output_size, output_size]);
                    pooled
                })
            })
            .collect();

        Ok(Tensor::stack(&pooled, 0))
    }
}
