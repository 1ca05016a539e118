//! Filter engine: applies the size / extension / include / exclude gates in
//! spec order, plus a separate hidden-file predicate.

use std::collections::HashSet;
use std::path::Path;

use crate::core::errors::DsError;
use crate::scanner::patterns::{normalize_extension, GlobPattern};
use crate::scanner::walker::WalkEntry;

/// OS-metadata filenames dropped by the hidden-file predicate alongside
/// dot-prefixed names.
const OS_METADATA_NAMES: &[&str] = &["Thumbs.db", ".DS_Store", "desktop.ini"];

/// Compiled filter, built once per scan from `Config`.
pub struct FilterEngine {
    min_size: u64,
    extensions: HashSet<String>,
    include_patterns: Vec<GlobPattern>,
    exclude_patterns: Vec<GlobPattern>,
    skip_hidden: bool,
}

impl FilterEngine {
    /// Compile a filter engine. Extensions are normalized; patterns are
    /// compiled once and reused for every candidate.
    pub fn new(
        min_size: u64,
        extensions: &[String],
        include_patterns: &[String],
        exclude_patterns: &[String],
        skip_hidden: bool,
    ) -> Result<Self, DsError> {
        let extensions = extensions.iter().map(|e| normalize_extension(e)).collect();
        let include_patterns = include_patterns
            .iter()
            .map(|p| GlobPattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude_patterns = exclude_patterns
            .iter()
            .map(|p| GlobPattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            min_size,
            extensions,
            include_patterns,
            exclude_patterns,
            skip_hidden,
        })
    }

    /// True if `entry` survives every gate, in spec order: min size,
    /// extension allow-list, include allow-list, exclude deny-list, then
    /// (separately) the hidden-file predicate.
    #[must_use]
    pub fn accepts(&self, entry: &WalkEntry) -> bool {
        if entry.metadata.size_bytes < self.min_size {
            return false;
        }

        if !self.extensions.is_empty() && !self.matches_extension(&entry.path) {
            return false;
        }

        let filename = entry.path.file_name().map(|n| n.to_string_lossy());
        let full_path = entry.path.to_string_lossy();

        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|p| {
                filename.as_deref().is_some_and(|f| p.is_match(f)) || p.is_match(&full_path)
            })
        {
            return false;
        }

        if self.exclude_patterns.iter().any(|p| {
            filename.as_deref().is_some_and(|f| p.is_match(f)) || p.is_match(&full_path)
        }) {
            return false;
        }

        if self.skip_hidden && is_hidden(&entry.path) {
            return false;
        }

        true
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| normalize_extension(&e.to_string_lossy()))
            .is_some_and(|ext| self.extensions.contains(&ext))
    }
}

/// Hidden/OS-metadata predicate: dot-prefixed names or a small fixed set of
/// OS bookkeeping filenames.
#[must_use]
pub fn is_hidden(path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy();
    name.starts_with('.') || OS_METADATA_NAMES.iter().any(|n| n.eq_ignore_ascii_case(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::walker::EntryMetadata;
    use std::path::PathBuf;

    fn entry(path: &str, size: u64) -> WalkEntry {
        WalkEntry {
            path: PathBuf::from(path),
            metadata: EntryMetadata {
                size_bytes: size,
                modified_secs: 0,
                is_dir: false,
                inode: 1,
                device_id: 1,
            },
            depth: 1,
        }
    }

    #[test]
    fn min_size_gate() {
        let f = FilterEngine::new(100, &[], &[], &[], false).unwrap();
        assert!(!f.accepts(&entry("/a/small.txt", 10)));
        assert!(f.accepts(&entry("/a/big.txt", 200)));
    }

    #[test]
    fn extension_allow_list_is_case_and_dot_insensitive() {
        let f = FilterEngine::new(0, &[".TXT".to_string()], &[], &[], false).unwrap();
        assert!(f.accepts(&entry("/a/file.txt", 10)));
        assert!(f.accepts(&entry("/a/FILE.TXT", 10)));
        assert!(!f.accepts(&entry("/a/file.md", 10)));
    }

    #[test]
    fn empty_extension_list_means_all() {
        let f = FilterEngine::new(0, &[], &[], &[], false).unwrap();
        assert!(f.accepts(&entry("/a/anything.xyz", 10)));
    }

    #[test]
    fn include_pattern_gate() {
        let f = FilterEngine::new(0, &[], &["*.rs".to_string()], &[], false).unwrap();
        assert!(f.accepts(&entry("/a/main.rs", 10)));
        assert!(!f.accepts(&entry("/a/main.py", 10)));
    }

    #[test]
    fn exclude_pattern_gate_overrides_include() {
        let f = FilterEngine::new(
            0,
            &[],
            &["*.rs".to_string()],
            &["*_test.rs".to_string()],
            false,
        )
        .unwrap();
        assert!(f.accepts(&entry("/a/main.rs", 10)));
        assert!(!f.accepts(&entry("/a/main_test.rs", 10)));
    }

    #[test]
    fn hidden_file_predicate() {
        assert!(is_hidden(Path::new("/a/.bashrc")));
        assert!(is_hidden(Path::new("/a/Thumbs.db")));
        assert!(!is_hidden(Path::new("/a/visible.txt")));
    }

    #[test]
    fn skip_hidden_gate() {
        let f = FilterEngine::new(0, &[], &[], &[], true).unwrap();
        assert!(!f.accepts(&entry("/a/.hidden", 10)));
        assert!(f.accepts(&entry("/a/visible", 10)));
    }
}
