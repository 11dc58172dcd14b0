use crate::{class::ElementClass, common::*};

/// A labeled box on a page, in pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxRecord {
    pub tlbr: TLBR<f64>,
    pub class: ElementClass,
    /// Handcrafted features. Empty if the dataset provides none.
    pub extra: Vec<f32>,
}

/// The annotation of a page. The box order is the page layout order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub id: String,
    pub boxes: Vec<BoxRecord>,
}

/// The on-disk annotation format, one JSON file per page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAnnotation {
    pub boxes: Vec<BoxAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxAnnotation {
    /// Top, left, bottom and right in pixels.
    pub tlbr: [f64; 4],
    pub label: ElementClass,
    #[serde(default)]
    pub extra: Vec<f32>,
}

impl PageRecord {
    pub fn from_annotation(id: impl Into<String>, annotation: PageAnnotation) -> Result<Self> {
        let id = id.into();
        let boxes: Vec<_> = annotation
            .boxes
            .into_iter()
            .enumerate()
            .map(|(index, annotation)| -> Result<_> {
                let BoxAnnotation { tlbr, label, extra } = annotation;
                ensure!(
                    tlbr.iter().all(|value| value.is_finite()),
                    "box {} of page '{}' has non-finite coordinates",
                    index,
                    id
                );
                let tlbr = TLBR::try_from_tlbr(tlbr)
                    .with_context(|| format!("invalid box {} of page '{}'", index, id))?;
                Ok(BoxRecord {
                    tlbr,
                    class: label,
                    extra,
                })
            })
            .try_collect()?;

        Ok(Self { id, boxes })
    }

    /// The common length of extra features of all boxes, or `None` for an
    /// empty page.
    pub fn extra_dim(&self) -> Result<Option<usize>> {
        let dims: Vec<_> = self.boxes.iter().map(|bbox| bbox.extra.len()).unique().collect();
        match dims.as_slice() {
            [] => Ok(None),
            &[dim] => Ok(Some(dim)),
            _ => bail!(
                "boxes of page '{}' have inconsistent extra feature sizes {:?}",
                self.id,
                dims
            ),
        }
    }
}
