// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Named reports registered by plugins when a recording stops.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// A report in one or more render forms.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub json: Option<serde_json::Value>,
    pub markdown: Option<String>,
    pub plain_text: Option<String>,
}

impl Report {
    pub fn json(value: serde_json::Value) -> Self {
        Self {
            json: Some(value),
            ..Self::default()
        }
    }

    pub fn with_markdown(mut self, markdown: impl Into<String>) -> Self {
        self.markdown = Some(markdown.into());
        self
    }

    pub fn with_plain_text(mut self, text: impl Into<String>) -> Self {
        self.plain_text = Some(text.into());
        self
    }

    /// True when no render form is present.
    pub fn is_empty(&self) -> bool {
        self.json.is_none() && self.markdown.is_none() && self.plain_text.is_none()
    }
}

/// Reports in registration order, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ReportSet {
    reports: Vec<(String, Report)>,
}

impl ReportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a report. Empty reports are refused; a repeated name replaces
    /// the earlier report in place.
    pub fn add(&mut self, name: impl Into<String>, report: Report) -> bool {
        let name = name.into();
        if report.is_empty() {
            tracing::warn!(report = %name, "ignoring report without any render form");
            return false;
        }
        if let Some(slot) = self.reports.iter_mut().find(|(n, _)| *n == name) {
            tracing::warn!(report = %name, "report registered twice, keeping the latest");
            slot.1 = report;
        } else {
            self.reports.push((name, report));
        }
        true
    }

    pub fn get(&self, name: &str) -> Option<&Report> {
        self.reports
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Report)> {
        self.reports.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn names(&self) -> Vec<&str> {
        self.reports.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

/// Writes each report form to `<dir>/<name>.{json,md,txt}`.
#[derive(Debug, Clone)]
pub struct FileReportWriter {
    dir: PathBuf,
}

impl FileReportWriter {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write all reports and return the files created.
    pub async fn write(&self, reports: &ReportSet) -> anyhow::Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut written = Vec::new();
        for (name, report) in reports.iter() {
            let stem = file_stem(name);
            if let Some(json) = &report.json {
                let path = self.dir.join(format!("{stem}.json"));
                tokio::fs::write(&path, serde_json::to_string_pretty(json)?).await?;
                written.push(path);
            }
            if let Some(md) = &report.markdown {
                let path = self.dir.join(format!("{stem}.md"));
                tokio::fs::write(&path, md).await?;
                written.push(path);
            }
            if let Some(txt) = &report.plain_text {
                let path = self.dir.join(format!("{stem}.txt"));
                tokio::fs::write(&path, txt).await?;
                written.push(path);
            }
            tracing::info!(report = %name, dir = %self.dir.display(), "report written");
        }
        Ok(written)
    }
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
