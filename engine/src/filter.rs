//! Include/exclude path filter for the indexer.
//!
//! Exclusion always wins over inclusion. Patterns use glob syntax (`*`, `**`,
//! `?`) and are matched against the `/`-separated relative path. `*` and `?`
//! stay inside one path segment; only `**` crosses separators. A pattern
//! without any `/` matches at every depth, so `*.png` selects `art/a.png`.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{EngineError, EngineResult};

/// Why a path was selected or rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// No patterns configured at all
    NoPatterns,
    /// Matched an include pattern (and no exclude)
    Included { pattern: String },
    /// Not excluded and no include patterns configured
    NotExcluded,
    /// Matched an exclude pattern
    Excluded { pattern: String },
    /// Include patterns exist but none matched
    NoIncludeMatch,
}

impl Selection {
    pub fn is_selected(&self) -> bool {
        matches!(
            self,
            Selection::NoPatterns | Selection::Included { .. } | Selection::NotExcluded
        )
    }
}

#[derive(Debug, Clone)]
struct PatternSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl PatternSet {
    fn build<S: AsRef<str>>(patterns: &[S]) -> EngineResult<Option<Self>> {
        if patterns.is_empty() {
            return Ok(None);
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(&anchored(pattern))
                .literal_separator(true)
                .build()
                .map_err(|e| EngineError::config(format!("invalid pattern '{}': {}", pattern, e)))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| EngineError::config(format!("invalid pattern set: {}", e)))?;

        Ok(Some(PatternSet {
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            set,
        }))
    }

    /// First configured pattern matching `path`.
    fn first_match(&self, path: &str) -> Option<&str> {
        self.set
            .matches(path)
            .into_iter()
            .min()
            .map(|i| self.patterns[i].as_str())
    }
}

/// Patterns naming no directory match a file name at any depth.
fn anchored(pattern: &str) -> String {
    if pattern.contains('/') || pattern.starts_with("**") {
        pattern.to_string()
    } else {
        format!("**/{}", pattern)
    }
}

/// Compiled include/exclude rules.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    includes: Option<PatternSet>,
    excludes: Option<PatternSet>,
}

impl PathFilter {
    /// Compile the patterns. Bad glob syntax is a configuration error.
    pub fn new<S: AsRef<str>>(includes: &[S], excludes: &[S]) -> EngineResult<Self> {
        Ok(PathFilter {
            includes: PatternSet::build(includes)?,
            excludes: PatternSet::build(excludes)?,
        })
    }

    /// A filter that selects everything.
    pub fn allow_all() -> Self {
        PathFilter::default()
    }

    /// Decide whether `path` is selected, and why.
    pub fn evaluate(&self, path: &str) -> Selection {
        let selection = self.decide(path);
        tracing::trace!(path, ?selection, "pattern filter");
        selection
    }

    pub fn is_selected(&self, path: &str) -> bool {
        self.evaluate(path).is_selected()
    }

    fn decide(&self, path: &str) -> Selection {
        if self.includes.is_none() && self.excludes.is_none() {
            return Selection::NoPatterns;
        }

        if let Some(pattern) = self.excludes.as_ref().and_then(|set| set.first_match(path)) {
            return Selection::Excluded {
                pattern: pattern.to_string(),
            };
        }

        match &self.includes {
            Some(includes) => match includes.first_match(path) {
                Some(pattern) => Selection::Included {
                    pattern: pattern.to_string(),
                },
                None => Selection::NoIncludeMatch,
            },
            None => Selection::NotExcluded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_patterns_selects_everything() {
        let filter = PathFilter::allow_all();
        assert_eq!(filter.evaluate("anything/at/all.bin"), Selection::NoPatterns);
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = PathFilter::new(&["*.png"], &["tmp/**"]).unwrap();

        assert_eq!(
            filter.evaluate("tmp/a.png"),
            Selection::Excluded {
                pattern: "tmp/**".to_string()
            }
        );
        assert_eq!(
            filter.evaluate("art/a.png"),
            Selection::Included {
                pattern: "*.png".to_string()
            }
        );
        assert_eq!(filter.evaluate("art/a.txt"), Selection::NoIncludeMatch);
        assert!(!filter.is_selected("art/a.txt"));
    }

    #[test]
    fn test_excludes_only() {
        let filter = PathFilter::new::<&str>(&[], &["**/*.tmp"]).unwrap();
        assert_eq!(filter.evaluate("a/b.png"), Selection::NotExcluded);
        assert!(!filter.is_selected("a/b/c.tmp"));
        assert!(!filter.is_selected("c.tmp"));
    }

    #[test]
    fn test_question_mark_and_double_star() {
        let filter = PathFilter::new(&["sounds/**/?.ogg"], &[]).unwrap();
        assert!(filter.is_selected("sounds/a.ogg"));
        assert!(filter.is_selected("sounds/fx/deep/b.ogg"));
        assert!(!filter.is_selected("sounds/ab.ogg"));
        assert!(!filter.is_selected("music/a.ogg"));
    }

    #[test]
    fn test_wildcards_stay_within_a_segment() {
        let filter = PathFilter::new(&["art/*.png"], &[]).unwrap();
        assert!(filter.is_selected("art/a.png"));
        assert!(!filter.is_selected("art/icons/i.png"));

        let filter = PathFilter::new(&["art?a.png"], &[]).unwrap();
        assert!(filter.is_selected("art_a.png"));
        assert!(!filter.is_selected("art/a.png"));
    }

    #[test]
    fn test_bare_file_pattern_matches_at_any_depth() {
        let filter = PathFilter::new(&["*.png"], &[]).unwrap();
        assert!(filter.is_selected("a.png"));
        assert!(filter.is_selected("art/a.png"));
        assert!(filter.is_selected("art/icons/i.png"));
        assert!(!filter.is_selected("art/a.txt"));
    }

    #[test]
    fn test_first_configured_pattern_is_reported() {
        let filter = PathFilter::new(&["**/*.png", "art/**"], &[]).unwrap();
        assert_eq!(
            filter.evaluate("art/a.png"),
            Selection::Included {
                pattern: "**/*.png".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_glob_is_config_error() {
        let result = PathFilter::new(&["art/[unclosed"], &[]);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
