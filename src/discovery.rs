//! Locating test specification files.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::SpecError;

/// Extensions of specification files found in folders.
pub const TESTIE_EXTENSIONS: [&str; 2] = ["npf", "testie"];

/// Expand `path` into the specification files to run.
///
/// A file is returned as is. A folder is walked recursively for files with
/// a [`TESTIE_EXTENSIONS`] extension, sorted for a deterministic order. The
/// optional `filter` selects by testie name, see [`matches_filter`].
pub fn discover(path: &Path, filter: Option<&str>) -> Result<Vec<PathBuf>, SpecError> {
    let metadata = std::fs::metadata(path).map_err(|source| SpecError::Io {
        path: path.to_owned(),
        source,
    })?;
    if metadata.is_file() {
        return Ok(vec![path.to_owned()]);
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.map_err(|error| SpecError::Io {
            path: error.path().unwrap_or(path).to_owned(),
            source: error.into(),
        })?;
        if entry.file_type().is_file() && is_testie(entry.path()) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    if let Some(pattern) = filter {
        found.retain(|file| matches_filter(&testie_name(path, file), pattern));
    }
    debug!(root = %path.display(), count = found.len(), "discovered test specifications");
    Ok(found)
}

fn is_testie(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| TESTIE_EXTENSIONS.iter().any(|e| ext == *e))
}

/// `tcp/iperf` for `<root>/tcp/iperf.npf`.
pub fn testie_name(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether the testie `name` is selected by `pattern`.
///
/// A pattern with a `/` is matched against the whole relative name, any
/// other pattern against the last component. `*` matches any run of
/// characters and `?` a single one; without either the pattern only has to
/// occur in the name. Case is ignored.
pub fn matches_filter(name: &str, pattern: &str) -> bool {
    let subject = if pattern.contains('/') {
        name
    } else {
        name.rsplit('/').next().unwrap_or(name)
    };
    let subject = subject.to_lowercase();
    let pattern = pattern.to_lowercase();
    if !pattern.contains(['*', '?']) {
        return subject.contains(&pattern);
    }
    let subject: Vec<char> = subject.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    wildcard(&subject, &pattern)
}

fn wildcard(text: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => (0..=text.len()).any(|skip| wildcard(&text[skip..], rest)),
        Some(('?', rest)) => !text.is_empty() && wildcard(&text[1..], rest),
        Some((c, rest)) => text.first() == Some(c) && wildcard(&text[1..], rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, names: &[&str]) {
        for name in names {
            let path = root.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "").unwrap();
        }
    }

    fn names(root: &Path, found: &[PathBuf]) -> Vec<String> {
        found.iter().map(|f| testie_name(root, f)).collect()
    }

    #[test]
    fn should_select_by_fragment_of_the_file_name() {
        assert!(matches_filter("tcp/iperf_forward", "forward"));
        assert!(matches_filter("tcp/iperf_forward", "IPERF"));
        assert!(!matches_filter("tcp/iperf_forward", "tcp"));
        assert!(matches_filter("tcp/iperf_forward", ""));
    }

    #[test]
    fn should_anchor_wildcard_patterns() {
        assert!(matches_filter("forward_ipv6", "forward*"));
        assert!(matches_filter("forward_ipv6", "*ipv?"));
        assert!(!matches_filter("forward_ipv6", "ipv6*"));
        assert!(!matches_filter("forward_ipv6", "forward_ipv?4"));
    }

    #[test]
    fn should_match_patterns_with_folders_against_relative_name() {
        assert!(matches_filter("tcp/iperf", "tcp/*"));
        assert!(matches_filter("tcp/iperf", "tcp/iperf"));
        assert!(!matches_filter("udp/iperf", "tcp/*"));
    }

    #[test]
    fn should_return_single_file_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("anything.txt");
        std::fs::write(&file, "").unwrap();
        assert_eq!(discover(&file, None).unwrap(), vec![file]);
    }

    #[test]
    fn should_walk_folder_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["b.npf", "a.testie", "notes.md", "tcp/c.npf", "tcp/deep/d.npf"]);
        let found = discover(dir.path(), None).unwrap();
        assert_eq!(names(dir.path(), &found), vec!["a", "b", "tcp/c", "tcp/deep/d"]);
    }

    #[test]
    fn should_filter_folder_by_testie_name() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["iperf_tcp.npf", "iperf_udp.npf", "netperf.npf", "udp/iperf_rr.npf"]);
        let found = discover(dir.path(), Some("iperf*")).unwrap();
        assert_eq!(names(dir.path(), &found), vec!["iperf_tcp", "iperf_udp", "udp/iperf_rr"]);
        let found = discover(dir.path(), Some("udp/*")).unwrap();
        assert_eq!(names(dir.path(), &found), vec!["udp/iperf_rr"]);
    }

    #[test]
    fn should_fail_on_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover(&dir.path().join("missing"), None),
            Err(SpecError::Io { .. })
        ));
    }
}
