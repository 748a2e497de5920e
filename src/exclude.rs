//! Exclusion filtering for snapshot file walking
//!
//! Patterns are glob strings matched against paths relative to the working
//! tree root, with forward-slash separators. Before compiling, every `/*` is
//! rewritten to `/**` so that a pattern such as `logs/*` also excludes
//! everything nested below `logs/`.

use crate::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, warn};

/// A compiled, immutable set of exclusion patterns
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl ExclusionSet {
    /// Compile the given patterns. Invalid patterns are skipped with a warning.
    pub fn compile<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut accepted = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            match compile_pattern(pattern) {
                Ok(globs) => {
                    for glob in globs {
                        builder.add(glob);
                    }
                    accepted.push(pattern.to_string());
                }
                Err(e) => warn!("Ignoring exclusion pattern: {}", e),
            }
        }

        let set = builder.build().unwrap_or_else(|e| {
            warn!("Failed to build exclusion set, nothing will be excluded: {}", e);
            GlobSet::empty()
        });

        debug!("Compiled {} exclusion patterns", accepted.len());
        Self {
            patterns: accepted,
            set,
        }
    }

    /// An exclusion set that matches nothing
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    /// Check if a root-relative path is excluded
    pub fn is_excluded<P: AsRef<Path>>(&self, relative_path: P) -> bool {
        if self.set.is_empty() {
            return false;
        }
        self.set.is_match(normalize(relative_path.as_ref()))
    }

    /// The patterns that compiled successfully, in their original form
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Convert a relative path to the forward-slash form patterns are matched against
pub fn normalize(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    text.trim_start_matches("./").to_string()
}

fn compile_pattern(pattern: &str) -> Result<Vec<globset::Glob>> {
    let mut rewritten = pattern.replace("/*", "/**");
    // an already recursive `/**` comes out as `/***`, which means the same thing
    while rewritten.contains("***") {
        rewritten = rewritten.replace("***", "**");
    }

    expand_glued_recursive(&rewritten)
        .iter()
        .map(|variant| {
            GlobBuilder::new(variant)
                .literal_separator(true)
                .build()
                .map_err(|e| Error::Pattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

/// Expand every `**` that is not a whole path component into globs that only
/// use component-level `**`.
///
/// A glued `**` matches any characters, separators included, so `a**b` is
/// `a*b` (no separator crossed) or `a*/**/*b` (at least one crossed). Lone `*`
/// elsewhere in the pattern keeps matching within a single component.
fn expand_glued_recursive(pattern: &str) -> Vec<String> {
    let bytes = pattern.as_bytes();
    let mut variants = vec![String::new()];
    let mut literal_start = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] != b'*' || bytes[i + 1] != b'*' {
            i += 1;
            continue;
        }

        let mut end = i + 2;
        while end < bytes.len() && bytes[end] == b'*' {
            end += 1;
        }
        let starts_component = i == 0 || bytes[i - 1] == b'/';
        let ends_component = end == bytes.len() || bytes[end] == b'/';

        if !(starts_component && ends_component) {
            let literal = &pattern[literal_start..i];
            variants = variants
                .into_iter()
                .flat_map(|v| [format!("{}{}*", v, literal), format!("{}{}*/**/*", v, literal)])
                .collect();
            literal_start = end;
        }
        i = end;
    }

    let tail = &pattern[literal_start..];
    variants.into_iter().map(|v| v + tail).collect()
}
