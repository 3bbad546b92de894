// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Minimal permission set for the operations an application exercised.
//!
//! Each operation gets the narrowest scope from its catalog entry, then a
//! greedy coalescing pass lets a scope that is already selected somewhere
//! absorb other operations that list it as a broader alternative. The result
//! is deterministic but not guaranteed to be a minimum set cover: it depends
//! on the lexicographic order in which scopes and operations are visited.

use crate::path_template::ApiDescription;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Uppercase method plus a path template with placeholders tokenized.
///
/// `GET /Users/{id}` and `get /users/{user-id}/` produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationKey {
    method: String,
    path: String,
}

impl OperationKey {
    pub fn new(method: &str, template: &str) -> Self {
        Self {
            method: method.trim().to_ascii_uppercase(),
            path: tokenize_path(template),
        }
    }

    /// Parse `"METHOD /path"`.
    pub fn parse(s: &str) -> Option<Self> {
        let (method, path) = s.trim().split_once(char::is_whitespace)?;
        let path = path.trim();
        if method.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self::new(method, path))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

impl Serialize for OperationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn tokenize_path(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut in_placeholder = false;
    for c in template.trim().chars() {
        match c {
            '{' => {
                in_placeholder = true;
                out.push_str("{}");
            }
            '}' => in_placeholder = false,
            _ if in_placeholder => {}
            _ => out.extend(c.to_lowercase()),
        }
    }
    if !out.starts_with('/') {
        out.insert(0, '/');
    }
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Operation -> scopes ordered narrowest first. The order is never changed.
#[derive(Debug, Clone, Default)]
pub struct ScopeCatalog {
    entries: BTreeMap<OperationKey, Vec<String>>,
}

impl ScopeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from one API description in declaration order.
    pub fn from_description(api: &ApiDescription) -> Self {
        let mut catalog = Self::new();
        for server in &api.servers {
            for path in &server.paths {
                for (method, scopes) in &path.operations {
                    catalog.insert(OperationKey::new(method, &path.template), scopes.clone());
                }
            }
        }
        catalog
    }

    /// One catalog per API name. Operations never collide across APIs;
    /// descriptions repeating a name extend that API's catalog.
    pub fn per_api(apis: &[ApiDescription]) -> BTreeMap<String, ScopeCatalog> {
        let mut catalogs: BTreeMap<String, ScopeCatalog> = BTreeMap::new();
        for api in apis {
            let catalog = catalogs.entry(api.name.clone()).or_default();
            for (key, scopes) in Self::from_description(api).entries {
                catalog.insert(key, scopes);
            }
        }
        catalogs
    }

    /// Add an entry unless the key is already known. Empty lists are ignored.
    pub fn insert(&mut self, key: OperationKey, scopes: Vec<String>) -> bool {
        if scopes.is_empty() {
            tracing::debug!(operation = %key, "ignoring operation without scopes");
            return false;
        }
        if self.entries.contains_key(&key) {
            tracing::debug!(operation = %key, "duplicate operation, keeping first declaration");
            return false;
        }
        self.entries.insert(key, scopes);
        true
    }

    pub fn get(&self, key: &OperationKey) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(OperationKey, Vec<String>)> for ScopeCatalog {
    fn from_iter<I: IntoIterator<Item = (OperationKey, Vec<String>)>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for (key, scopes) in iter {
            catalog.insert(key, scopes);
        }
        catalog
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MinimalPermissions {
    /// Distinct recommended scopes, sorted.
    pub scopes: Vec<String>,
    /// The scope chosen for each matched operation.
    pub selections: BTreeMap<OperationKey, String>,
    /// Operations with no catalog entry, sorted.
    pub unmatched_operations: Vec<OperationKey>,
}

impl MinimalPermissions {
    /// Granted scopes the recommendation does not need.
    pub fn excess<'a>(&self, granted: &'a BTreeSet<String>) -> Vec<&'a str> {
        granted
            .iter()
            .filter(|s| !self.scopes.contains(s))
            .map(String::as_str)
            .collect()
    }

    /// Recommended scopes missing from the granted set.
    pub fn missing<'a>(&'a self, granted: &BTreeSet<String>) -> Vec<&'a str> {
        self.scopes
            .iter()
            .filter(|s| !granted.contains(*s))
            .map(String::as_str)
            .collect()
    }
}

/// Compute the minimal scopes for `operations` against `catalog`.
pub fn minimize<I>(operations: I, catalog: &ScopeCatalog) -> MinimalPermissions
where
    I: IntoIterator<Item = OperationKey>,
{
    let operations: BTreeSet<OperationKey> = operations.into_iter().collect();

    let mut selections = BTreeMap::new();
    let mut unmatched_operations = Vec::new();
    for op in operations {
        match catalog.get(&op).and_then(|scopes| scopes.first()) {
            Some(narrowest) => {
                selections.insert(op, narrowest.clone());
            }
            None => unmatched_operations.push(op),
        }
    }

    let baseline: BTreeSet<String> = selections.values().cloned().collect();
    for scope in &baseline {
        for (op, selected) in selections.iter_mut() {
            let broader = catalog
                .get(op)
                .and_then(|scopes| scopes.iter().position(|s| s == scope))
                .is_some_and(|i| i > 0);
            if broader && selected != scope {
                tracing::trace!(operation = %op, from = %selected, to = %scope, "coalescing");
                *selected = scope.clone();
            }
        }
    }

    let scopes: BTreeSet<&String> = selections.values().collect();
    MinimalPermissions {
        scopes: scopes.into_iter().cloned().collect(),
        selections,
        unmatched_operations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn op(s: &str) -> OperationKey {
        OperationKey::parse(s).expect("operation")
    }

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Entries as `("METHOD /path", "Scope.A Scope.B")`.
    fn catalog(entries: &[(&str, &str)]) -> ScopeCatalog {
        entries
            .iter()
            .map(|(k, v)| (op(k), v.split_whitespace().map(String::from).collect()))
            .collect()
    }

    #[rstest]
    #[case("GET", "/users/{id}", "GET /users/{}")]
    #[case("get", "/Users/{user-id}/", "GET /users/{}")]
    #[case("Patch", "users/{a}/Messages/{b}", "PATCH /users/{}/messages/{}")]
    #[case("GET", "/", "GET /")]
    #[case("GET", "/me/drive/root:/{path}:/content", "GET /me/drive/root:/{}:/content")]
    fn operation_keys_normalize(#[case] method: &str, #[case] template: &str, #[case] expected: &str) {
        assert_eq!(OperationKey::new(method, template).to_string(), expected);
    }

    #[test]
    fn parse_rejects_missing_path() {
        assert!(OperationKey::parse("GET").is_none());
        assert!(OperationKey::parse("").is_none());
    }

    #[test]
    fn baseline_picks_narrowest_scope() {
        let cat = catalog(&[
            ("GET /users/{id}", "User.Read User.ReadWrite"),
            ("GET /users", "User.Read.All"),
        ]);
        let result = minimize([op("GET /users/{id}"), op("GET /users")], &cat);
        assert_eq!(result.scopes, scopes(&["User.Read", "User.Read.All"]));
        assert!(result.unmatched_operations.is_empty());
    }

    #[test]
    fn broader_scope_absorbs_operation() {
        let cat = catalog(&[
            ("GET /users/{id}", "User.Read User.ReadWrite User.Read.All"),
            ("GET /users", "User.Read.All"),
        ]);
        let result = minimize([op("GET /users/{id}"), op("GET /users")], &cat);
        assert_eq!(result.scopes, scopes(&["User.Read.All"]));
        assert_eq!(
            result.selections.get(&op("GET /users/{id}")).map(String::as_str),
            Some("User.Read.All")
        );
    }

    #[test]
    fn unmatched_operations_never_contribute_scopes() {
        let cat = catalog(&[("GET /users", "User.Read.All")]);
        let result = minimize(
            [op("GET /users"), op("DELETE /users/{id}"), op("GET /groups")],
            &cat,
        );
        assert_eq!(result.scopes, scopes(&["User.Read.All"]));
        assert_eq!(
            result.unmatched_operations,
            vec![op("DELETE /users/{id}"), op("GET /groups")]
        );
        assert!(!result.selections.contains_key(&op("GET /groups")));
    }

    #[test]
    fn deterministic_regardless_of_input_order() {
        let entries = vec![
            ("GET /users/{id}", "User.Read User.Read.All"),
            ("GET /users", "User.Read.All Directory.Read.All"),
            ("GET /groups", "Group.Read.All Directory.Read.All"),
            ("POST /groups", "Group.ReadWrite.All"),
        ];
        let mut reversed = entries.clone();
        reversed.reverse();

        let ops = vec![
            op("GET /users/{id}"),
            op("GET /groups"),
            op("POST /groups"),
            op("GET /users"),
            op("GET /users/{id}"),
        ];
        let mut shuffled = ops.clone();
        shuffled.rotate_left(2);

        let a = minimize(ops, &catalog(&entries));
        let b = minimize(shuffled, &catalog(&reversed));
        assert_eq!(a, b);
    }

    #[test]
    fn every_matched_operation_is_covered() {
        let cat = catalog(&[
            ("GET /a", "A.Read All.Read"),
            ("GET /b", "B.Read All.Read"),
            ("GET /c", "C.Read"),
            ("PUT /c", "C.Write C.Read"),
            ("GET /d", "D.Read B.Read"),
        ]);
        let ops: Vec<_> = ["GET /a", "GET /b", "GET /c", "PUT /c", "GET /d", "GET /e"]
            .iter()
            .map(|s| op(s))
            .collect();
        let result = minimize(ops.clone(), &cat);

        for o in &ops {
            match cat.get(o) {
                Some(list) => {
                    let chosen = result.selections.get(o).expect("selection");
                    assert!(list.contains(chosen), "{o} got {chosen}");
                    assert!(result.scopes.contains(chosen));
                }
                None => assert!(result.unmatched_operations.contains(o)),
            }
        }
        // C.Read absorbs PUT /c, B.Read absorbs GET /d
        assert_eq!(result.scopes, scopes(&["A.Read", "B.Read", "C.Read"]));
    }

    #[test]
    fn first_declaration_of_an_operation_wins() {
        let mut cat = ScopeCatalog::new();
        assert!(cat.insert(op("GET /me"), scopes(&["User.Read"])));
        assert!(!cat.insert(op("get /ME/"), scopes(&["User.ReadWrite"])));
        assert!(!cat.insert(op("GET /empty"), Vec::new()));
        assert_eq!(cat.get(&op("GET /me")), Some(&scopes(&["User.Read"])[..]));
        assert_eq!(cat.len(), 1);
    }

    #[test]
    fn catalog_from_description_tokenizes_templates() -> anyhow::Result<()> {
        let api: ApiDescription = serde_json::from_value(serde_json::json!({
            "name": "graph",
            "servers": [{
                "url": "https://graph.microsoft.com/v1.0",
                "paths": [
                    {"template": "/users/{user-id}", "operations": {"get": ["User.Read"]}},
                    {"template": "/users/{id}", "operations": {"GET": ["User.ReadWrite"]}}
                ]
            }]
        }))?;
        let cat = ScopeCatalog::from_description(&api);
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.get(&op("GET /users/{x}")), Some(&scopes(&["User.Read"])[..]));
        Ok(())
    }

    #[test]
    fn apis_sharing_a_path_keep_their_own_scopes() -> anyhow::Result<()> {
        let apis: Vec<ApiDescription> = serde_json::from_value(serde_json::json!([
            {
                "name": "graph",
                "servers": [{
                    "url": "https://graph.microsoft.com/v1.0",
                    "paths": [{"template": "/me", "operations": {"GET": ["User.Read"]}}]
                }]
            },
            {
                "name": "contoso",
                "servers": [{
                    "url": "https://api.contoso.com",
                    "paths": [{"template": "/me", "operations": {"GET": ["Contoso.Profile.Read"]}}]
                }]
            },
            {
                "name": "graph",
                "servers": [{
                    "url": "https://graph.microsoft.com/beta",
                    "paths": [
                        {"template": "/me", "operations": {"GET": ["User.ReadWrite"]}},
                        {"template": "/me/events", "operations": {"GET": ["Calendars.Read"]}}
                    ]
                }]
            }
        ]))?;
        let catalogs = ScopeCatalog::per_api(&apis);
        assert_eq!(catalogs.len(), 2);

        let me = op("GET /me");
        assert_eq!(catalogs["graph"].get(&me), Some(&scopes(&["User.Read"])[..]));
        assert_eq!(
            catalogs["contoso"].get(&me),
            Some(&scopes(&["Contoso.Profile.Read"])[..])
        );
        assert_eq!(catalogs["graph"].len(), 2);
        Ok(())
    }

    #[test]
    fn excess_and_missing_compare_against_granted() {
        let cat = catalog(&[("GET /me", "User.Read")]);
        let result = minimize([op("GET /me")], &cat);
        let granted: BTreeSet<String> = ["User.Read.All", "Mail.Send"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(result.excess(&granted), vec!["Mail.Send", "User.Read.All"]);
        assert_eq!(result.missing(&granted), vec!["User.Read"]);
    }

    #[test]
    fn serializes_operation_keys_as_strings() -> anyhow::Result<()> {
        let cat = catalog(&[("GET /me", "User.Read")]);
        let v = serde_json::to_value(minimize([op("GET /me"), op("GET /x")], &cat))?;
        assert_eq!(v["selections"]["GET /me"], "User.Read");
        assert_eq!(v["unmatched_operations"][0], "GET /x");
        Ok(())
    }
}
