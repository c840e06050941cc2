//! Checksum listings and their on-disk audit trail.

use crate::error::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Pipeline stage a listing was collected from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Remote,
    Raw,
    Gzip,
    Storage,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Remote => "remote",
            Stage::Raw => "raw",
            Stage::Gzip => "gzip",
            Stage::Storage => "storage",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of file name → checksum for one stage.
///
/// Built once per collection pass and only ever replaced, never edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    entries: BTreeMap<String, String>,
}

impl Listing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn checksum(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl<N: Into<String>, C: Into<String>> FromIterator<(N, C)> for Listing {
    fn from_iter<I: IntoIterator<Item = (N, C)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, checksum)| (name.into(), checksum.into()))
                .collect(),
        }
    }
}

/// Parse `md5sum`-style output: one `<checksum>  <path>` per line.
///
/// The path is reduced to its file name. Blank lines are ignored and lines
/// without both fields are skipped with a warning.
pub fn parse_checksum_lines(output: &str) -> Listing {
    let mut entries = BTreeMap::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(checksum), Some(path)) = (fields.next(), fields.last()) else {
            tracing::warn!(line, "Skipping malformed checksum line");
            continue;
        };
        // md5sum marks binary-mode reads with a leading '*'
        let path = path.trim_start_matches('*');
        entries.insert(file_name(path).to_string(), checksum.to_lowercase());
    }
    Listing { entries }
}

/// Checksum field of a single-file `md5sum` output
pub fn first_checksum(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .next()
        .map(|checksum| checksum.to_lowercase())
}

/// Last path component of a `/`-separated remote path or object key
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// `<stage>_<pattern>_<count>.txt`
pub fn listing_file_name(stage: Stage, pattern: &str, count: usize) -> String {
    format!("{}_{}_{}.txt", stage, pattern, count)
}

/// Write one `<checksum>  <name>` line per entry into `output_dir`.
pub fn save_to_disk(
    output_dir: &Path,
    stage: Stage,
    pattern: &str,
    listing: &Listing,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(listing_file_name(stage, pattern, listing.len()));
    let mut writer = BufWriter::new(fs::File::create(&path)?);
    for (name, checksum) in listing.iter() {
        writeln!(writer, "{}  {}", checksum, name)?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), entries = listing.len(), "Saved listing");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_md5sum_output() {
        let output = "\
d41d8cd98f00b204e9800998ecf8427e  imp_log_V02_ded5128_2016-05-09_21_00.log
0CC175B9C0F1B6A831C399E269772661  /home/dk/log/imp_log_V02_ded5128_2016-05-09_21_10.log

900150983cd24fb0d6963f7d28e17f72 *imp_log_V02_ded5128_2016-05-09_21_20.log
garbage
";
        let listing = parse_checksum_lines(output);
        assert_eq!(listing.len(), 3);
        assert_eq!(
            listing.checksum("imp_log_V02_ded5128_2016-05-09_21_00.log"),
            Some("d41d8cd98f00b204e9800998ecf8427e")
        );
        assert_eq!(
            listing.checksum("imp_log_V02_ded5128_2016-05-09_21_10.log"),
            Some("0cc175b9c0f1b6a831c399e269772661")
        );
        assert!(listing.contains("imp_log_V02_ded5128_2016-05-09_21_20.log"));
    }

    #[test]
    fn test_first_checksum() {
        assert_eq!(
            first_checksum("D41D8CD98F00B204E9800998ECF8427E  /var/log/a.log\n").as_deref(),
            Some("d41d8cd98f00b204e9800998ecf8427e")
        );
        assert_eq!(first_checksum("  \n"), None);
    }

    #[test]
    fn test_save_to_disk_writes_sorted_lines() {
        let temp = TempDir::new().unwrap();
        let listing: Listing = [("b.log", "m2"), ("a.log", "m1")].into_iter().collect();

        let path = save_to_disk(temp.path(), Stage::Raw, "imp_log_V02_x_2016-05-09_21", &listing)
            .unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "raw_imp_log_V02_x_2016-05-09_21_2.txt"
        );
        assert_eq!(fs::read_to_string(path).unwrap(), "m1  a.log\nm2  b.log\n");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("impressions/2016/05/09/21/a.log.gz"), "a.log.gz");
        assert_eq!(file_name("a.log"), "a.log");
    }
}
