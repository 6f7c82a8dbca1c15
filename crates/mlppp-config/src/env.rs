//! Environment variable fallbacks and `${VAR}` references.
//!
//! `MLPPP_*` variables are fallbacks, not overrides: they only apply to
//! fields that no configuration file set.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::hash::BuildHasher;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources};

#[derive(Debug, Clone, Copy)]
enum Kind {
    Text,
    Integer,
}

struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: Kind,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "MLPPP_LOG_LEVEL",
        field_path: "logging.level",
        kind: Kind::Text,
    },
    EnvMapping {
        var_name: "MLPPP_IDLE_TIMEOUT",
        field_path: "bundle.idle_timeout",
        kind: Kind::Integer,
    },
    EnvMapping {
        var_name: "MLPPP_SERVER_PORT",
        field_path: "server.port",
        kind: Kind::Integer,
    },
    EnvMapping {
        var_name: "MLPPP_SERVER_SOCKET",
        field_path: "server.socket",
        kind: Kind::Text,
    },
    EnvMapping {
        var_name: "MLPPP_AUTH_NAME",
        field_path: "bundle.auth_name",
        kind: Kind::Text,
    },
    EnvMapping {
        var_name: "MLPPP_AUTH_KEY",
        field_path: "bundle.auth_key",
        kind: Kind::Text,
    },
];

/// Snapshot of the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Apply `MLPPP_*` fallbacks to fields no file layer set.
///
/// Returns the number of variables applied.
///
/// # Errors
///
/// [`ConfigError::EnvError`] if a numeric variable does not parse.
pub fn apply_env_fallbacks<S: BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        if sources
            .get(mapping.field_path)
            .is_some_and(ConfigLayer::is_file)
        {
            continue;
        }
        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };

        let value = match mapping.kind {
            Kind::Text => toml::Value::String(raw.clone()),
            Kind::Integer => raw
                .trim()
                .parse::<i64>()
                .map(toml::Value::Integer)
                .map_err(|_| ConfigError::EnvError {
                    var_name: mapping.var_name.to_owned(),
                    message: format!("'{raw}' is not an integer"),
                })?,
        };

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var fallback"
        );
        set_field(merged, mapping.field_path, value);
        sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }

    Ok(count)
}

/// Replace `${VAR}` references inside every string value of the tree.
///
/// Unknown variables are left as written.
pub fn resolve_env_references<S: BuildHasher>(
    val: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) {
    match val {
        toml::Value::String(s) => {
            *s = resolve_string_refs(s, env_vars);
        },
        toml::Value::Table(table) => {
            for (_, child) in table.iter_mut() {
                resolve_env_references(child, env_vars);
            }
        },
        toml::Value::Array(arr) => {
            for child in arr.iter_mut() {
                resolve_env_references(child, env_vars);
            }
        },
        _ => {},
    }
}

fn resolve_string_refs<S: BuildHasher>(input: &str, env_vars: &HashMap<String, String, S>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();
        let mut var_name = String::new();
        let mut closed = false;
        for ch in chars.by_ref() {
            if ch == '}' {
                closed = true;
                break;
            }
            var_name.push(ch);
        }

        if closed && !var_name.is_empty() {
            if let Some(val) = env_vars.get(&var_name) {
                result.push_str(val);
            } else {
                debug!(var = var_name, "unresolved env var reference in config");
                let _ = write!(result, "${{{var_name}}}");
            }
        } else {
            result.push_str("${");
            result.push_str(&var_name);
        }
    }

    result
}

fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        if segments.peek().is_none() {
            table.insert(segment.to_owned(), value);
            return;
        }
        current = table
            .entry(segment)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
}
