//! Ignore-rule matching.
//!
//! Three pattern layers are OR-combined: a fixed built-in set, patterns from
//! the configuration file, and patterns from a per-directory ignore file.
//! Patterns containing `/` match against the forward-slash-normalised path
//! relative to the tracked directory root; all other patterns match the
//! file's base name. The glob vocabulary is `*`, `?`, and character classes;
//! `*` does not cross path separators.

use std::io::{BufRead, BufReader};
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

use crate::error::FsResult;

/// Name of the per-directory ignore file. Always ignored itself.
pub const IGNORE_FILE_NAME: &str = ".btignore";

/// Patterns applied regardless of configuration.
const BUILTIN_PATTERNS: &[&str] = &[IGNORE_FILE_NAME];

enum MatchTarget {
    /// Match against the full relative path.
    Path,
    /// Match against the base name only.
    Basename,
}

struct CompiledPattern {
    matcher: GlobMatcher,
    target: MatchTarget,
}

/// Checks relative paths against a compiled set of ignore patterns.
pub struct IgnoreMatcher {
    patterns: Vec<CompiledPattern>,
}

impl IgnoreMatcher {
    /// Compiles raw pattern lines into a matcher.
    ///
    /// Blank lines and `#` comments are skipped; patterns that fail to
    /// compile are dropped with a warning rather than failing the whole set.
    pub fn new<I, S>(raw_patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns = Vec::new();
        for raw in raw_patterns {
            let raw = raw.as_ref().trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let glob = match GlobBuilder::new(raw).literal_separator(true).build() {
                Ok(glob) => glob,
                Err(err) => {
                    warn!(pattern = raw, error = %err, "dropping malformed ignore pattern");
                    continue;
                }
            };
            patterns.push(CompiledPattern {
                matcher: glob.compile_matcher(),
                target: if raw.contains('/') {
                    MatchTarget::Path
                } else {
                    MatchTarget::Basename
                },
            });
        }
        Self { patterns }
    }

    /// Reports whether `relative_path` should be ignored.
    pub fn matches(&self, relative_path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        let normalized = normalize(relative_path);
        let basename = relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.patterns.iter().any(|p| match p.target {
            MatchTarget::Path => p.matcher.is_match(normalized.as_str()),
            MatchTarget::Basename => p.matcher.is_match(basename.as_str()),
        })
    }

    /// The number of compiled patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when no patterns compiled.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Builds the layered matcher for one tracked directory root: built-ins,
/// config patterns, then the root's ignore file.
pub fn matcher_for_root(root: &Path, config_patterns: &[String]) -> FsResult<IgnoreMatcher> {
    let mut raw: Vec<String> = BUILTIN_PATTERNS.iter().map(|s| s.to_string()).collect();
    raw.extend(config_patterns.iter().cloned());
    raw.extend(parse_ignore_file(&root.join(IGNORE_FILE_NAME))?);
    Ok(IgnoreMatcher::new(raw))
}

/// Reads raw pattern lines from an ignore file.
///
/// A missing file yields no patterns and no error.
pub fn parse_ignore_file(path: &Path) -> FsResult<Vec<String>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut patterns = Vec::new();
    for line in BufReader::new(file).lines() {
        patterns.push(line?);
    }
    Ok(patterns)
}

fn normalize(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        s.into_owned()
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn matches(patterns: &[&str], path: &str) -> bool {
        IgnoreMatcher::new(patterns.iter().copied()).matches(&PathBuf::from(path))
    }

    #[test]
    fn test_empty_matcher_matches_nothing() {
        assert!(!matches(&[], "a.txt"));
        assert!(!matches(&[], "sub/a.txt"));
    }

    #[test]
    fn test_basename_pattern() {
        assert!(matches(&["*.log"], "debug.log"));
        assert!(matches(&["*.log"], "sub/dir/debug.log"));
        assert!(!matches(&["*.log"], "debug.txt"));
    }

    #[test]
    fn test_path_pattern() {
        assert!(matches(&["build/*.o"], "build/main.o"));
        assert!(!matches(&["build/*.o"], "src/main.o"));
        // `*` does not cross separators in path patterns.
        assert!(!matches(&["build/*.o"], "build/sub/main.o"));
    }

    #[test]
    fn test_question_mark_and_classes() {
        assert!(matches(&["?.txt"], "a.txt"));
        assert!(!matches(&["?.txt"], "ab.txt"));
        assert!(matches(&["[ab].txt"], "a.txt"));
        assert!(matches(&["[ab].txt"], "b.txt"));
        assert!(!matches(&["[ab].txt"], "c.txt"));
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let m = IgnoreMatcher::new(["# comment", "", "   ", "*.tmp"]);
        assert_eq!(m.len(), 1);
        assert!(m.matches(&PathBuf::from("x.tmp")));
    }

    #[test]
    fn test_malformed_pattern_dropped() {
        // Unclosed character class fails to compile and is skipped.
        let m = IgnoreMatcher::new(["[unclosed", "*.tmp"]);
        assert_eq!(m.len(), 1);
        assert!(m.matches(&PathBuf::from("x.tmp")));
        assert!(!m.matches(&PathBuf::from("[unclosed")));
    }

    #[test]
    fn test_builtin_ignore_file_always_matches() {
        let dir = tempfile::tempdir().unwrap();
        let m = matcher_for_root(dir.path(), &[]).unwrap();
        assert!(m.matches(&PathBuf::from(IGNORE_FILE_NAME)));
    }

    #[test]
    fn test_layers_combine() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(IGNORE_FILE_NAME), "*.cache\n").unwrap();

        let m = matcher_for_root(dir.path(), &["*.bak".to_string()]).unwrap();
        assert!(m.matches(&PathBuf::from("a.bak")));
        assert!(m.matches(&PathBuf::from("a.cache")));
        assert!(!m.matches(&PathBuf::from("a.txt")));
    }

    #[test]
    fn test_parse_ignore_file_missing_is_empty() {
        let patterns = parse_ignore_file(Path::new("/nonexistent/.btignore")).unwrap();
        assert!(patterns.is_empty());
    }

    #[test]
    fn test_parse_ignore_file_reads_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(IGNORE_FILE_NAME);
        std::fs::write(&path, "*.log\n# c\n\ntarget/*\n").unwrap();

        let patterns = parse_ignore_file(&path).unwrap();
        assert_eq!(patterns, vec!["*.log", "# c", "", "target/*"]);
    }
}
