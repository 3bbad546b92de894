// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Wildcard URL filters deciding which exchanges plugins act on.
//!
//! A pattern is a literal absolute URL where `*` stands for any run of
//! characters. Patterns starting with `!` exclude matching URLs. Patterns are
//! evaluated in configured order and the first one that matches decides.

use crate::error::ConfigError;
use regex::{Regex, RegexBuilder};

/// One compiled wildcard filter.
#[derive(Debug, Clone)]
pub struct WatchPattern {
    source: String,
    exclude: bool,
    regex: Regex,
}

impl WatchPattern {
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        let (exclude, body) = match pattern.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };

        let regex = RegexBuilder::new(&wildcard_to_regex(body))
            .case_insensitive(true)
            .build()
            .map_err(|source| ConfigError::InvalidWatchPattern {
                pattern: pattern.to_string(),
                source,
            })?;

        Ok(Self {
            source: pattern.to_string(),
            exclude,
            regex,
        })
    }

    /// The pattern as configured, including any `!` prefix.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_exclude(&self) -> bool {
        self.exclude
    }

    pub fn is_match(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}

/// Escape every literal piece and let `*` match anything.
fn wildcard_to_regex(pattern: &str) -> String {
    let pieces: Vec<String> = pattern.split('*').map(regex::escape).collect();
    format!("^{}$", pieces.join(".*"))
}

/// An ordered, immutable set of watch patterns.
#[derive(Debug, Clone, Default)]
pub struct UrlWatchMatcher {
    patterns: Vec<WatchPattern>,
}

impl UrlWatchMatcher {
    /// Compile all patterns, failing on the first invalid one.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| WatchPattern::compile(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> &[WatchPattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Decide whether `url` is watched.
    ///
    /// The URL is compared as given, without decoding. With `invert` set the
    /// answer is negated, which lets callers ask "which of these entries is
    /// not covered" without changing how exchanges are routed.
    pub fn matches(&self, url: &str, invert: bool) -> bool {
        let watched = self
            .patterns
            .iter()
            .find(|p| p.is_match(url))
            .map(|p| !p.is_exclude())
            .unwrap_or(false);
        watched != invert
    }

    /// Return the entries no watch pattern covers, in input order.
    pub fn unwatched<'a, I>(&self, entries: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        entries
            .into_iter()
            .filter(|entry| self.matches(entry, true))
            .collect()
    }
}
