use std::fmt;
use std::str::FromStr;

use regex::Regex;

use super::BusError;

/// Compiled matcher over topic categories.
///
/// Syntax: one or more `|`-separated globs, where `*` matches any run of
/// characters and every other character must be alphanumeric, `_` or `-`.
/// Examples: `*`, `download`, `download|transfer`, `work*`.
#[derive(Debug, Clone)]
pub struct CategoryPattern {
    source: String,
    regex: Regex,
}

impl CategoryPattern {
    pub fn compile(pattern: &str) -> Result<Self, BusError> {
        let source = pattern.trim();
        if source.is_empty() {
            return Err(BusError::invalid_pattern(pattern, "pattern is empty"));
        }

        let mut alternatives = Vec::new();
        for glob in source.split('|') {
            let glob = glob.trim();
            if glob.is_empty() {
                return Err(BusError::invalid_pattern(pattern, "empty alternative"));
            }
            if let Some(c) = glob
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '*')))
            {
                return Err(BusError::invalid_pattern(
                    pattern,
                    format!("unexpected character '{c}'"),
                ));
            }
            let translated = glob
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            alternatives.push(translated);
        }

        let regex = Regex::new(&format!("^(?:{})$", alternatives.join("|")))
            .map_err(|e| BusError::invalid_pattern(pattern, e.to_string()))?;

        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn matches(&self, category: &str) -> bool {
        self.regex.is_match(category)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for CategoryPattern {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for CategoryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
