use crate::common::*;

/// Number of element classes.
pub const N_CLASSES: usize = 4;

/// Class names, indexed by class label.
pub const CLASS_NAMES: [&str; N_CLASSES] = ["BG", "Price", "Title", "Image"];

/// The class of a visual element on a web page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ElementClass {
    Background = 0,
    Price = 1,
    Title = 2,
    Image = 3,
}

impl ElementClass {
    pub const ALL: [ElementClass; N_CLASSES] = [
        Self::Background,
        Self::Price,
        Self::Title,
        Self::Image,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        CLASS_NAMES[self.index()]
    }

    pub fn is_background(&self) -> bool {
        matches!(self, Self::Background)
    }
}

impl TryFrom<i64> for ElementClass {
    type Error = Error;

    fn try_from(label: i64) -> Result<Self, Self::Error> {
        usize::try_from(label)
            .ok()
            .and_then(|label| Self::ALL.get(label).copied())
            .ok_or_else(|| format_err!("invalid class label {}", label))
    }
}

impl From<ElementClass> for i64 {
    fn from(class: ElementClass) -> Self {
        class as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_label_conversion() {
        for class in ElementClass::ALL {
            assert_eq!(ElementClass::try_from(i64::from(class)).unwrap(), class);
        }
        assert!(ElementClass::try_from(4i64).is_err());
        assert!(ElementClass::try_from(-1i64).is_err());
        assert_eq!(ElementClass::Title.name(), "Title");
    }
}
