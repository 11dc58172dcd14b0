use crate::common::*;

/// The mapping from page identifiers to the website domains they come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInfo {
    domains: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DomainEntry {
    img_id: String,
    domain: String,
}

impl DomainInfo {
    pub fn new(domains: HashMap<String, String>) -> Self {
        Self { domains }
    }

    /// Loads a CSV file with `img_id` and `domain` columns.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let entries: Vec<DomainEntry> = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_path(path)
            .with_context(|| format!("failed to open domain file '{}'", path.display()))?
            .deserialize()
            .try_collect()
            .with_context(|| format!("failed to parse domain file '{}'", path.display()))?;

        let domains = entries
            .into_iter()
            .map(|DomainEntry { img_id, domain }| (img_id, domain))
            .collect();
        Ok(Self { domains })
    }

    /// Loads the domain file if it is configured and exists.
    pub fn load_optional(path: Option<&Path>) -> Result<Option<Self>> {
        match path {
            Some(path) if path.is_file() => Ok(Some(Self::load(path)?)),
            Some(path) => {
                info!(
                    "domain file '{}' does not exist, domain-wise metrics are disabled",
                    path.display()
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn domain_of(&self, img_id: &str) -> Option<&str> {
        self.domains.get(img_id).map(String::as_str)
    }
}

/// Loads the list of domains held out for testing if it is configured and exists.
pub fn load_test_domains(path: Option<&Path>) -> Result<Option<HashSet<String>>> {
    let path = match path {
        Some(path) if path.is_file() => path,
        Some(path) => {
            info!(
                "test domain file '{}' does not exist, all domains are reported",
                path.display()
            );
            return Ok(None);
        }
        None => return Ok(None),
    };

    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read test domain file '{}'", path.display()))?;
    let domains = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    Ok(Some(domains))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_domain_csv() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.path();
        let path = dir.join("webpage_info.csv");
        fs::write(&path, "img_id,domain\n1, shop-a.com\n2,shop-b.com\n")?;

        let info = DomainInfo::load(&path)?;
        assert_eq!(info.domain_of("1"), Some("shop-a.com"));
        assert_eq!(info.domain_of("3"), None);

        let missing = dir.join("missing.csv");
        assert!(DomainInfo::load_optional(Some(&missing))?.is_none());
        assert!(load_test_domains(Some(&missing))?.is_none());

        let domains_path = dir.join("test_domains.txt");
        fs::write(&domains_path, "shop-b.com\n\n")?;
        let domains = load_test_domains(Some(&domains_path))?.unwrap();
        assert!(domains.contains("shop-b.com") && domains.len() == 1);
        Ok(())
    }
}
