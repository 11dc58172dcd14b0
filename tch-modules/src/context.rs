use crate::{common::*, ragged::RaggedIndex};
use bbox::{prelude::*, TLBR};

/// The rule that arranges boxes of an image into a sequence for neighbor lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborOrder {
    /// Keep the order in which boxes are stored.
    Layout,
    /// Sort boxes top-to-bottom, then left-to-right by their centers.
    ReadingOrder,
}

impl Default for NeighborOrder {
    fn default() -> Self {
        Self::Layout
    }
}

impl NeighborOrder {
    /// Returns flat box indices, image by image, in the sequence order.
    pub fn arrange(&self, boxes: &[TLBR<f64>], index: &RaggedIndex) -> Vec<usize> {
        match self {
            Self::Layout => (0..index.num_items()).collect(),
            Self::ReadingOrder => index
                .ranges()
                .flat_map(|range| {
                    range
                        .sorted_by_key(|&flat| {
                            let tlbr = &boxes[flat];
                            (r64(tlbr.cy()), r64(tlbr.cx()))
                        })
                })
                .collect(),
        }
    }
}

/// The offsets of window slots relative to the candidate.
///
/// A window of size `k` covers `k / 2` preceding and `k - k / 2` following
/// boxes. The candidate itself is the slot at offset zero.
pub fn window_offsets(context_size: usize) -> Vec<i64> {
    let before = (context_size / 2) as i64;
    let after = (context_size - context_size / 2) as i64;
    (-before..=after).collect()
}

/// For each position of a sequence of length `len`, the sequence positions
/// of its window slots. Slots falling outside the sequence are `None`.
pub fn neighbor_window(len: usize, context_size: usize) -> Vec<Vec<Option<usize>>> {
    let offsets = window_offsets(context_size);
    (0..len as i64)
        .map(|pos| {
            offsets
                .iter()
                .map(|offset| {
                    let neighbor = pos + offset;
                    (0..len as i64)
                        .contains(&neighbor)
                        .then(|| neighbor as usize)
                })
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ContextAggregatorInit {
    /// Dimension of the per-box visual feature.
    pub in_dim: usize,
    /// Number of neighbors in the window.
    pub context_size: usize,
    /// Dimension of the projected neighbor feature.
    pub proj_dim: usize,
    /// Dimension of the output context vector.
    pub out_dim: usize,
    pub order: NeighborOrder,
}

impl ContextAggregatorInit {
    pub fn build<'p>(self, path: impl Borrow<nn::Path<'p>>) -> Result<ContextAggregator> {
        let path = path.borrow();
        let Self {
            in_dim,
            context_size,
            proj_dim,
            out_dim,
            order,
        } = self;
        ensure!(context_size > 0, "context_size must be positive");
        ensure!(
            in_dim > 0 && proj_dim > 0 && out_dim > 0,
            "feature dimensions must be positive"
        );

        let proj = nn::linear(
            path / "proj",
            in_dim as i64,
            proj_dim as i64,
            Default::default(),
        );
        // step input: [neighbor feature, relative position, candidate feature]
        let step_dim = proj_dim * 2 + POS_DIM;
        let gru = nn::gru(
            path / "gru",
            step_dim as i64,
            out_dim as i64,
            nn::RNNConfig {
                batch_first: true,
                ..Default::default()
            },
        );

        let offsets = window_offsets(context_size);
        debug!("context window offsets {:?}", offsets);

        Ok(ContextAggregator {
            proj,
            gru,
            offsets,
            out_dim: out_dim as i64,
            order,
        })
    }
}

const POS_DIM: usize = 4;

/// Summarizes each box's neighborhood into a fixed-size context vector.
///
/// The window slots are visited in sequence order by a GRU. Each step sees the
/// projected neighbor feature, the neighbor position relative to the candidate
/// and the projected candidate feature. Padding slots leave the hidden state
/// untouched.
#[derive(Debug)]
pub struct ContextAggregator {
    proj: nn::Linear,
    gru: nn::GRU,
    offsets: Vec<i64>,
    out_dim: i64,
    order: NeighborOrder,
}

impl ContextAggregator {
    pub fn out_dim(&self) -> i64 {
        self.out_dim
    }

    /// Computes context vectors.
    ///
    /// `features` is `[num_boxes, in_dim]`, `positions` is `[num_boxes, 4]`.
    /// Returns a `[num_boxes, out_dim]` tensor in the input box order.
    pub fn forward_t(
        &self,
        features: &Tensor,
        positions: &Tensor,
        boxes: &[TLBR<f64>],
        index: &RaggedIndex,
    ) -> Result<Tensor> {
        let num_boxes = index.num_items();
        let (num_features, _) = features.size2()?;
        let (num_positions, pos_dim) = positions.size2()?;
        ensure!(
            num_features as usize == num_boxes && num_positions as usize == num_boxes,
            "expect {} boxes, but get {} features and {} positions",
            num_boxes,
            num_features,
            num_positions
        );
        ensure!(
            pos_dim as usize == POS_DIM,
            "expect positional features of size {}",
            POS_DIM
        );
        let device = features.device();

        if num_boxes == 0 {
            return Ok(Tensor::zeros(&[0, self.out_dim], (features.kind(), device)));
        }

        // gather indices and validity of every window slot
        let (slot_indexes, slot_masks) = self.slot_table(boxes, index);
        let num_slots = self.offsets.len() as i64;
        let slot_indexes = Tensor::of_slice(&slot_indexes)
            .view([num_boxes as i64, num_slots])
            .to_device(device);
        let slot_masks = Tensor::of_slice(&slot_masks)
            .view([num_boxes as i64, num_slots])
            .to_device(device);

        let projected = features.apply(&self.proj).relu();

        let init_state = self.gru.zero_state(num_boxes as i64);
        let final_state = (0..num_slots).fold(init_state, |state, slot| {
            let neighbor_indexes = slot_indexes.select(1, slot);
            let mask = slot_masks.select(1, slot);
            let mask_float = mask.to_kind(Kind::Float).unsqueeze(1);

            let neighbor_features = projected.index_select(0, &neighbor_indexes) * &mask_float;
            let relative_positions =
                (positions.index_select(0, &neighbor_indexes) - positions) * &mask_float;
            let input = Tensor::cat(&[&neighbor_features, &relative_positions, &projected], 1);

            let next = self.gru.step(&input, &state);
            let keep = mask.view([1, -1, 1]);
            nn::GRUState(next.0.where_self(&keep, &state.0))
        });

        Ok(final_state.0.squeeze_dim(0))
    }

    /// Builds the flat gather index and the validity flag for each
    /// `(box, slot)` pair. Invalid slots point at the box itself.
    fn slot_table(&self, boxes: &[TLBR<f64>], index: &RaggedIndex) -> (Vec<i64>, Vec<bool>) {
        let num_boxes = index.num_items();
        let num_slots = self.offsets.len();
        let sequence = self.order.arrange(boxes, index);

        let mut slot_indexes = vec![0i64; num_boxes * num_slots];
        let mut slot_masks = vec![false; num_boxes * num_slots];

        index.ranges().for_each(|range| {
            let image_sequence = &sequence[range.clone()];
            let windows = neighbor_window(image_sequence.len(), num_slots - 1);

            izip!(image_sequence, windows).for_each(|(&candidate, window)| {
                let row = candidate * num_slots;
                window.into_iter().enumerate().for_each(|(slot, neighbor)| {
                    let (flat, valid) = match neighbor {
                        Some(pos) => (image_sequence[pos], true),
                        None => (candidate, false),
                    };
                    slot_indexes[row + slot] = flat as i64;
                    slot_masks[row + slot] = valid;
                });
            });
        });

        (slot_indexes, slot_masks)
    }
}
