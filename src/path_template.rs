// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Matching concrete request URLs against templated API descriptions.
//!
//! An API description lists server base URLs, each owning path templates
//! such as `/users/{id}/messages`. Literal text is regex-escaped and every
//! `{name}` placeholder becomes a single path segment (`[^/]+`). When several
//! templates match the same URL the first one declared wins.

use crate::error::ConfigError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An API surface as configured: servers, their paths, and per-method scopes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiDescription {
    pub name: String,
    pub servers: Vec<ApiServer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiServer {
    /// Base URL, optionally templated, e.g. `https://{tenant}.contoso.com/v1`.
    pub url: String,
    #[serde(default)]
    pub paths: Vec<ApiPath>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiPath {
    pub template: String,
    /// Method -> scopes ordered narrowest first.
    #[serde(default)]
    pub operations: BTreeMap<String, Vec<String>>,
}

/// A successful match of a request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub api: String,
    pub server_url: String,
    pub template: String,
    /// Placeholder names with the values taken from the URL, in template order.
    pub parameters: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Param(String),
}

/// Split a template into literal and placeholder pieces.
fn parse_template(template: &str) -> Result<Vec<Piece>, String> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    match n {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' | '/' => return Err(format!("unexpected '{n}' inside placeholder")),
                        _ => name.push(n),
                    }
                }
                if !closed {
                    return Err("unclosed placeholder".into());
                }
                if name.trim().is_empty() {
                    return Err("empty placeholder".into());
                }
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(Piece::Param(name));
            }
            '}' => return Err("unbalanced '}'".into()),
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

fn build_regex(pieces: &[Piece], anchor_end: bool) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    for piece in pieces {
        match piece {
            Piece::Literal(s) => pattern.push_str(&regex::escape(s)),
            Piece::Param(_) => pattern.push_str("([^/]+)"),
        }
    }
    if anchor_end {
        pattern.push('$');
    }
    RegexBuilder::new(&pattern).case_insensitive(true).build()
}

fn param_names(pieces: &[Piece]) -> Vec<String> {
    pieces
        .iter()
        .filter_map(|p| match p {
            Piece::Param(name) => Some(name.clone()),
            Piece::Literal(_) => None,
        })
        .collect()
}

/// Trim a trailing slash but keep the root.
fn normalize_path(path: &str) -> String {
    let with_root = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let trimmed = with_root.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone)]
enum ServerBase {
    Plain(String),
    Templated(Regex),
}

impl ServerBase {
    /// Byte length of the prefix of `url` covered by this base, if it matches.
    fn prefix_len(&self, url: &str) -> Option<usize> {
        match self {
            ServerBase::Plain(base) => url
                .get(..base.len())
                .filter(|prefix| prefix.eq_ignore_ascii_case(base))
                .map(|_| base.len()),
            ServerBase::Templated(re) => re.find(url).map(|m| m.end()),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledPath {
    template: String,
    params: Vec<String>,
    regex: Regex,
}

#[derive(Debug, Clone)]
struct CompiledServer {
    api: String,
    url: String,
    base: ServerBase,
    paths: Vec<CompiledPath>,
}

/// Compiled form of one or more API descriptions.
#[derive(Debug, Clone, Default)]
pub struct PathTemplateMatcher {
    servers: Vec<CompiledServer>,
}

impl PathTemplateMatcher {
    /// Compile all servers and templates, rejecting malformed placeholders.
    pub fn compile(apis: &[ApiDescription]) -> Result<Self, ConfigError> {
        let mut servers = Vec::new();
        for api in apis {
            for server in &api.servers {
                servers.push(compile_server(api, server)?);
            }
        }
        Ok(Self { servers })
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Find the first server and template matching `url`.
    pub fn find(&self, url: &str) -> Option<PathMatch> {
        for server in &self.servers {
            let Some(end) = server.base.prefix_len(url) else {
                continue;
            };
            let rest = &url[end..];
            if !(rest.is_empty() || rest.starts_with(['/', '?', '#'])) {
                continue;
            }

            let path_only = rest.split(['?', '#']).next().unwrap_or("");
            let relative = normalize_path(path_only);

            for path in &server.paths {
                if let Some(caps) = path.regex.captures(&relative) {
                    let parameters = path
                        .params
                        .iter()
                        .enumerate()
                        .map(|(i, name)| {
                            let value = caps.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
                            (name.clone(), value.to_string())
                        })
                        .collect();
                    return Some(PathMatch {
                        api: server.api.clone(),
                        server_url: server.url.clone(),
                        template: path.template.clone(),
                        parameters,
                    });
                }
            }
        }
        None
    }
}

fn compile_server(api: &ApiDescription, server: &ApiServer) -> Result<CompiledServer, ConfigError> {
    let invalid = |template: &str, reason: String| ConfigError::InvalidTemplate {
        api: api.name.clone(),
        template: template.to_string(),
        reason,
    };

    let url = server.url.trim_end_matches('/').to_string();
    if url.is_empty() {
        return Err(invalid(&server.url, "empty server URL".into()));
    }
    let pieces = parse_template(&url).map_err(|reason| invalid(&server.url, reason))?;
    let base = if pieces.iter().any(|p| matches!(p, Piece::Param(_))) {
        let re = build_regex(&pieces, false).map_err(|e| invalid(&server.url, e.to_string()))?;
        ServerBase::Templated(re)
    } else {
        ServerBase::Plain(url.clone())
    };

    let mut paths = Vec::with_capacity(server.paths.len());
    for path in &server.paths {
        let template = normalize_path(&path.template);
        let pieces = parse_template(&template).map_err(|reason| invalid(&path.template, reason))?;
        let regex = build_regex(&pieces, true).map_err(|e| invalid(&path.template, e.to_string()))?;
        paths.push(CompiledPath {
            template: path.template.clone(),
            params: param_names(&pieces),
            regex,
        });
    }

    Ok(CompiledServer {
        api: api.name.clone(),
        url: server.url.clone(),
        base,
        paths,
    })
}
