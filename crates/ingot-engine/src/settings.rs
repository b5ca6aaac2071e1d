//! The hierarchical configuration model.
//!
//! Per-service settings live at three scope levels: global, per-connection,
//! and per-channel. [`SettingsStore::resolve`] folds the levels into one
//! effective value by [`combine`]-ing each more specific scope over the
//! broader ones. Typed field defaults apply lazily: the merged value is
//! deserialized into the service's config type, where `#[serde(default)]`
//! fills anything no scope provided.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::ConfigError;

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}

/// Structurally merges `base` with `donor`, producing a new value.
///
/// `base` is the more specific scope: its keys always win. `donor` fills the
/// gaps; mapping-valued keys present in both are deep-merged under the same
/// rule. Neither operand is mutated.
///
/// # Errors
///
/// Returns [`ConfigError::TypeMismatch`] when one scope holds a mapping and
/// the other holds a non-mapping for the same key — a schema bug between
/// scope levels, fatal at resolve time.
pub fn combine(base: &Value, donor: &Value) -> Result<Value, ConfigError> {
    combine_at(base, donor, String::new())
}

fn combine_at(base: &Value, donor: &Value, path: String) -> Result<Value, ConfigError> {
    match (base, donor) {
        (Value::Null, other) => Ok(other.clone()),
        (other, Value::Null) => Ok(other.clone()),
        (Value::Object(b), Value::Object(d)) => {
            let mut merged: Map<String, Value> = d.clone();
            for (key, bv) in b {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                let value = match d.get(key) {
                    Some(dv) => combine_at(bv, dv, child_path)?,
                    None => bv.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Ok(Value::Object(merged))
        }
        (Value::Object(_), _) | (_, Value::Object(_)) => Err(ConfigError::TypeMismatch {
            path,
            expected: kind(base),
            found: kind(donor),
        }),
        // Scalars and arrays: the more specific scope simply wins.
        (specific, _) => Ok(specific.clone()),
    }
}

/// Channel-level overrides within one connection scope.
#[derive(Debug, Clone, Default)]
pub struct ConnectionScope {
    /// Per-service settings at the connection level.
    pub services: HashMap<String, Value>,
    /// Channel name → per-service settings at the channel level.
    pub channels: HashMap<String, HashMap<String, Value>>,
}

/// All per-service settings known to the engine, organized by scope.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    services: HashMap<String, Value>,
    connections: HashMap<String, ConnectionScope>,
}

impl SettingsStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a service's global-scope settings.
    pub fn set_global(&mut self, service: impl Into<String>, value: Value) {
        self.services.insert(service.into(), value);
    }

    /// Sets a service's connection-scope settings.
    pub fn set_connection(
        &mut self,
        connection: impl Into<String>,
        service: impl Into<String>,
        value: Value,
    ) {
        self.connections
            .entry(connection.into())
            .or_default()
            .services
            .insert(service.into(), value);
    }

    /// Sets a service's channel-scope settings.
    pub fn set_channel(
        &mut self,
        connection: impl Into<String>,
        channel: impl Into<String>,
        service: impl Into<String>,
        value: Value,
    ) {
        self.connections
            .entry(connection.into())
            .or_default()
            .channels
            .entry(channel.into())
            .or_default()
            .insert(service.into(), value);
    }

    /// Resolves the effective settings for `service` at the given scope.
    ///
    /// Starts from the global scope, then lets the connection scope (when the
    /// connection is known) and finally the channel scope (when `target` is a
    /// known channel of that connection) override it. A missing scope level
    /// is treated as empty.
    pub fn resolve(
        &self,
        service: &str,
        connection: Option<&str>,
        target: Option<&str>,
    ) -> Result<Value, ConfigError> {
        let mut acc = self.services.get(service).cloned().unwrap_or(Value::Null);

        if let Some(connection) = connection
            && let Some(scope) = self.connections.get(connection)
        {
            if let Some(value) = scope.services.get(service) {
                acc = combine(value, &acc)?;
            }
            if let Some(target) = target
                && let Some(channel) = scope.channels.get(target)
                && let Some(value) = channel.get(service)
            {
                acc = combine(value, &acc)?;
            }
        }

        if acc.is_null() {
            acc = Value::Object(Map::new());
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn specific_scope_wins_and_gaps_fill() {
        let mut store = SettingsStore::new();
        store.set_global("quote", json!({ "x": 1, "enabled": true }));
        store.set_channel("freenode", "#foo", "quote", json!({ "x": 2 }));

        let resolved = store.resolve("quote", Some("freenode"), Some("#foo")).unwrap();
        assert_eq!(resolved, json!({ "x": 2, "enabled": true }));
    }

    #[test]
    fn connection_scope_sits_between_global_and_channel() {
        let mut store = SettingsStore::new();
        store.set_global("quote", json!({ "a": 1, "b": 1, "c": 1 }));
        store.set_connection("net", "quote", json!({ "b": 2, "c": 2 }));
        store.set_channel("net", "#chan", "quote", json!({ "c": 3 }));

        let resolved = store.resolve("quote", Some("net"), Some("#chan")).unwrap();
        assert_eq!(resolved, json!({ "a": 1, "b": 2, "c": 3 }));
    }

    #[test]
    fn absent_scopes_degrade_gracefully() {
        let mut store = SettingsStore::new();
        store.set_global("quote", json!({ "x": 1 }));

        // Unknown connection and channel fall back to the global scope.
        let resolved = store.resolve("quote", Some("nowhere"), Some("#nope")).unwrap();
        assert_eq!(resolved, json!({ "x": 1 }));

        // A service with no settings anywhere resolves to an empty mapping.
        let empty = store.resolve("ghost", None, None).unwrap();
        assert_eq!(empty, json!({}));
    }

    #[test]
    fn nested_mappings_deep_merge() {
        let base = json!({ "nested": { "a": 1 }, "top": true });
        let donor = json!({ "nested": { "a": 9, "b": 2 } });
        let merged = combine(&base, &donor).unwrap();
        assert_eq!(merged, json!({ "nested": { "a": 1, "b": 2 }, "top": true }));
        // Operands are untouched.
        assert_eq!(base, json!({ "nested": { "a": 1 }, "top": true }));
        assert_eq!(donor, json!({ "nested": { "a": 9, "b": 2 } }));
    }

    #[test]
    fn mapping_vs_scalar_is_fatal() {
        let base = json!({ "field": { "inner": 1 } });
        let donor = json!({ "field": 3 });
        let err = combine(&base, &donor).unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { ref path, .. } if path == "field"));
    }

    #[test]
    fn lazy_defaults_apply_after_merge() {
        #[derive(serde::Deserialize)]
        struct Cfg {
            x: i64,
            #[serde(default = "default_greeting")]
            greeting: String,
        }
        fn default_greeting() -> String {
            "hi".into()
        }

        let mut store = SettingsStore::new();
        store.set_global("svc", json!({ "x": 5 }));
        let resolved = store.resolve("svc", None, None).unwrap();
        let cfg: Cfg = serde_json::from_value(resolved).unwrap();
        assert_eq!(cfg.x, 5);
        assert_eq!(cfg.greeting, "hi");
    }
}
