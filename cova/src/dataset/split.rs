use crate::common::*;

/// Disjoint train, validation and test page identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splits {
    pub train: Vec<String>,
    pub val: Vec<String>,
    pub test: Vec<String>,
}

impl Splits {
    pub const TRAIN_FILE: &'static str = "train_imgs.txt";
    pub const VAL_FILE: &'static str = "val_imgs.txt";
    pub const TEST_FILE: &'static str = "test_imgs.txt";

    /// Loads the three split files from a split directory.
    pub fn load(split_dir: impl AsRef<Path>) -> Result<Self> {
        let split_dir = split_dir.as_ref();
        let train = load_id_file(split_dir.join(Self::TRAIN_FILE))?;
        let val = load_id_file(split_dir.join(Self::VAL_FILE))?;
        let test = load_id_file(split_dir.join(Self::TEST_FILE))?;
        Self::new(train, val, test)
    }

    pub fn new(train: Vec<String>, val: Vec<String>, test: Vec<String>) -> Result<Self> {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (name, ids) in [("train", &train), ("val", &val), ("test", &test)] {
            for id in ids {
                if let Some(prev) = seen.insert(id.as_str(), name) {
                    bail!(
                        "the image '{}' appears in both {} and {} splits",
                        id,
                        prev,
                        name
                    );
                }
            }
        }

        Ok(Self { train, val, test })
    }
}

/// Reads one identifier per line, skipping blank lines.
pub fn load_id_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read split file '{}'", path.display()))?;
    let ids = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn splits_must_be_disjoint() {
        assert!(Splits::new(ids(&["1", "2"]), ids(&["3"]), ids(&["4", "5"])).is_ok());
        assert!(Splits::new(ids(&["1", "2"]), ids(&["3"]), ids(&["2"])).is_err());
        assert!(Splits::new(ids(&["1", "1"]), ids(&[]), ids(&[])).is_err());
    }
}
