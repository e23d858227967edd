use globset::{Glob, GlobSet, GlobSetBuilder};

#[derive(Debug, Clone, Default)]
pub struct NameMatcher {
    globset: Option<GlobSet>,
    substrings: Vec<String>,
}

impl NameMatcher {
    pub fn new(patterns: &[String], warnings: &mut Vec<String>) -> Self {
        if patterns.is_empty() {
            return Self::default();
        }

        let mut builder = GlobSetBuilder::new();
        let mut substrings = Vec::new();
        let mut glob_count = 0_usize;
        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }

            if is_plain_substring_pattern(pattern) {
                substrings.push(pattern.to_lowercase());
                continue;
            }

            match Glob::new(&pattern.to_lowercase()) {
                Ok(glob) => {
                    builder.add(glob);
                    glob_count += 1;
                }
                Err(err) => {
                    warnings.push(format!(
                        "invalid name pattern '{pattern}': {err}; using substring fallback."
                    ));
                    substrings.push(pattern.to_lowercase());
                }
            }
        }

        let globset = if glob_count == 0 {
            None
        } else {
            match builder.build() {
                Ok(set) => Some(set),
                Err(err) => {
                    warnings.push(format!(
                        "failed to compile name pattern set: {err}; glob patterns disabled."
                    ));
                    None
                }
            }
        };

        Self {
            globset,
            substrings,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.globset.is_none() && self.substrings.is_empty()
    }

    pub fn is_match(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        if let Some(globset) = &self.globset {
            if globset.is_match(lowered.as_str()) {
                return true;
            }
        }

        self.substrings
            .iter()
            .any(|pattern| lowered.contains(pattern.as_str()))
    }
}

fn is_plain_substring_pattern(pattern: &str) -> bool {
    !pattern
        .chars()
        .any(|ch| matches!(ch, '*' | '?' | '[' | ']' | '{' | '}'))
}
