// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build properties: string-keyed values accumulated across a build.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Property map carried by requests and builds.
///
/// Keys are property names; values are arbitrary JSON. A build starts
/// from its requests' properties and each completed step may contribute
/// more through its completion message. A `BTreeMap` keeps serialization
/// and equality comparisons deterministic, which the request merge rule
/// relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    inner: BTreeMap<String, Value>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inner.get(name)
    }

    /// Get a property rendered as a plain string. JSON strings render
    /// without quotes; other values render as compact JSON.
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.inner.get(name).map(render_value)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner.insert(name.into(), value.into());
    }

    /// Merge `other` into self; later values win.
    pub fn merge(&mut self, other: &Properties) {
        for (k, v) in &other.inner {
            self.inner.insert(k.clone(), v.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.inner.iter()
    }

    /// Interpolate `${name}` references in a template with property
    /// values. Unknown names are left in place so the remote command's
    /// own error output points at the missing property.
    pub fn interpolate(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.inner.get(name) {
                        Some(v) => out.push_str(&render_value(v)),
                        None => {
                            out.push_str("${");
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    return out;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Properties {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self { inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

fn render_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "props_tests.rs"]
mod tests;
