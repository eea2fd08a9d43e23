//! Ignore matcher (C1): a pure predicate consulted by the walk loop,
//! loaded once from an optional rules file at the scan root.

use std::path::Path;

/// One parsed rule: a bare name (matches a basename exactly) or a
/// substring (matches anywhere in the path's string form).
enum Rule {
    Name(String),
    Substring(String),
}

/// Loaded rule set. Pure function of its rules; holds no other state.
pub struct IgnoreMatcher {
    rules: Vec<Rule>,
}

impl IgnoreMatcher {
    /// An empty matcher: excludes nothing beyond the unconditional
    /// hidden/underscore-prefixed directory rule.
    pub fn empty() -> IgnoreMatcher {
        IgnoreMatcher { rules: Vec::new() }
    }

    /// Parse rule text (one rule per line; blank lines and `#` comments
    /// ignored; a rule containing `/` is a substring rule, otherwise a
    /// name rule).
    pub fn parse(text: &str) -> IgnoreMatcher {
        let rules = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                if line.contains('/') {
                    Rule::Substring(line.to_string())
                } else {
                    Rule::Name(line.to_string())
                }
            })
            .collect();
        IgnoreMatcher { rules }
    }

    /// Load the rules file at `root` if `enabled`, else return an empty
    /// matcher. Missing file is not an error: equivalent to no rules.
    pub fn load(root: &Path, enabled: bool, filename: &str) -> IgnoreMatcher {
        if !enabled {
            return IgnoreMatcher::empty();
        }
        match std::fs::read_to_string(root.join(filename)) {
            Ok(text) => IgnoreMatcher::parse(&text),
            Err(_) => IgnoreMatcher::empty(),
        }
    }

    /// True when `path` should be excluded from the scan.
    pub fn excluded(&self, path: &Path, is_directory: bool) -> bool {
        if is_directory && is_hidden_or_underscored(path) {
            return true;
        }
        let name = path.file_name().and_then(|n| n.to_str());
        let path_str = path.to_str().unwrap_or("");
        for rule in &self.rules {
            match rule {
                Rule::Name(pattern) => {
                    if name == Some(pattern.as_str()) {
                        return true;
                    }
                }
                Rule::Substring(pattern) => {
                    if path_str.contains(pattern.as_str()) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

fn is_hidden_or_underscored(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with('.') || name.starts_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn name_rule_matches_basename_only() {
        let m = IgnoreMatcher::parse("node_modules\n");
        assert!(m.excluded(&PathBuf::from("/a/b/node_modules"), true));
        assert!(!m.excluded(&PathBuf::from("/a/b/node_modules_backup"), true));
    }

    #[test]
    fn substring_rule_matches_anywhere() {
        let m = IgnoreMatcher::parse("/build/\n");
        assert!(m.excluded(&PathBuf::from("/a/build/out.bin"), false));
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let m = IgnoreMatcher::parse("# comment\n\nfoo\n");
        assert!(m.excluded(&PathBuf::from("/x/foo"), true));
    }

    #[test]
    fn hidden_and_underscored_dirs_always_excluded() {
        let m = IgnoreMatcher::empty();
        assert!(m.excluded(&PathBuf::from("/x/.git"), true));
        assert!(m.excluded(&PathBuf::from("/x/_private"), true));
        assert!(!m.excluded(&PathBuf::from("/x/.git"), false));
    }
}
