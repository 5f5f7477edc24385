//! Scan-name mapping built from the BIDS import output.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

use crate::errors::Result;

/// Mapping file name, relative to the run root.
pub const MAPPING_FILE: &str = "hcp_mapping_file.txt";

#[allow(clippy::expect_used)]
static LINKED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"---> linked (\d+\.nii\.gz) <-- sub-[^_]+_(?:ses-[^_]+_)?(.*)\.nii\.gz")
        .expect("valid linked-scan pattern")
});

#[allow(clippy::expect_used)]
static DWI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(dir[\d_]*-[AP]{2})_dwi").expect("valid dwi pattern"));

/// Maps a BIDS scan label to the name the session-info step expects.
#[must_use]
pub fn map_label(label: &str) -> String {
    DWI_PATTERN.captures(label).map_or_else(
        || label.to_string(),
        |caps| format!("DWI:{}", &caps[1]),
    )
}

/// Ordered `scan number => label` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanMapping {
    entries: Vec<(String, String)>,
}

impl ScanMapping {
    /// Parses `---> linked <N>.nii.gz <-- sub-..._<label>.nii.gz` lines.
    ///
    /// Entries keep the order a scan number was first seen; a later line for
    /// the same number replaces its label.
    #[must_use]
    pub fn parse(output: &str) -> Self {
        let mut mapping = Self::default();
        for caps in LINKED_PATTERN.captures_iter(output) {
            let number = caps[1].split('.').next().unwrap_or_default().to_string();
            let label = map_label(&caps[2]);
            match mapping.entries.iter_mut().find(|(n, _)| *n == number) {
                Some(entry) => entry.1 = label,
                None => mapping.entries.push((number, label)),
            }
        }
        mapping
    }

    /// The parsed entries.
    #[must_use]
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Returns true if nothing was parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the mapping file contents.
    #[must_use]
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(number, label)| format!("{number} => {label}\n"))
            .collect()
    }

    /// Writes the mapping file into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MAPPING_FILE);
        std::fs::write(&path, self.render())?;
        debug!(path = %path.display(), entries = self.entries.len(), "Wrote scan mapping");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const IMPORT_OUTPUT: &str = "\
...
---> linked 11.nii.gz <-- sub-01_ses-1_T1w.nii.gz
---> linked 12.nii.gz <-- sub-01_ses-1_T2w.nii.gz
---> linked 13.nii.gz <-- sub-01_ses-1_dir98-AP_dwi.nii.gz
---> linked 14.nii.gz <-- sub-01_dir99_1-PA_dwi.nii.gz
---> linked 15.nii.gz <-- sub-01_task-rest_bold.nii.gz
=> done
";

    #[test]
    fn test_map_label() {
        assert_eq!(map_label("T1w"), "T1w");
        assert_eq!(map_label("dir98-AP_dwi"), "DWI:dir98-AP");
        assert_eq!(map_label("dir_99-PA_dwi"), "DWI:dir_99-PA");
        assert_eq!(map_label("acq-x_dir98-AP_dwi"), "acq-x_dir98-AP_dwi");
    }

    #[test]
    fn test_parse_import_output() {
        let mapping = ScanMapping::parse(IMPORT_OUTPUT);
        assert_eq!(
            mapping.render(),
            "11 => T1w\n12 => T2w\n13 => DWI:dir98-AP\n14 => DWI:dir99_1-PA\n15 => task-rest_bold\n"
        );
    }

    #[test]
    fn test_duplicate_numbers_keep_first_position() {
        let output = "---> linked 1.nii.gz <-- sub-a_T1w.nii.gz\n\
                      ---> linked 2.nii.gz <-- sub-a_T2w.nii.gz\n\
                      ---> linked 1.nii.gz <-- sub-a_dir1-AP_dwi.nii.gz\n";
        let mapping = ScanMapping::parse(output);
        assert_eq!(
            mapping.entries(),
            &[
                ("1".to_string(), "DWI:dir1-AP".to_string()),
                ("2".to_string(), "T2w".to_string()),
            ]
        );
    }

    #[test]
    fn test_write_mapping_file() {
        let dir = TempDir::new().unwrap();
        let path = ScanMapping::parse(IMPORT_OUTPUT).write_to(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(MAPPING_FILE));
        assert!(std::fs::read_to_string(path).unwrap().starts_with("11 => T1w\n"));
        assert!(ScanMapping::parse("nothing here").is_empty());
    }
}
