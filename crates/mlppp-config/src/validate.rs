//! Post-merge configuration validation.
//!
//! Checks value ranges and the syntax of the operator-written strings (link
//! types, devices, gateways, filter rules) so that a bad file is rejected at
//! load time rather than when the bundle first needs the value.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Config, LinkSection};

/// Link type names accepted in `[[links]] type`.
pub const LINK_TYPES: [&str; 7] = [
    "interactive",
    "auto",
    "direct",
    "dedicated",
    "ddial",
    "background",
    "oneoff",
];

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 4] = ["pretty", "compact", "json", "full"];

/// Validate a merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_server(config)?;
    validate_links(config)?;
    validate_routes(config)?;
    validate_filters(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_server(config: &Config) -> ConfigResult<()> {
    let s = &config.server;
    s.mode()?;
    if s.max_sessions == 0 {
        return Err(ConfigError::invalid(
            "server.max_sessions",
            "must allow at least one session",
        ));
    }
    if s.port == Some(0) {
        return Err(ConfigError::invalid("server.port", "port 0 is not a listening port"));
    }
    if s.socket.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
        return Err(ConfigError::invalid("server.socket", "path is empty"));
    }
    Ok(())
}

fn validate_links(config: &Config) -> ConfigResult<()> {
    if config.links.is_empty() {
        return Err(ConfigError::invalid("links", "at least one link is required"));
    }
    let mut seen = HashSet::new();
    for (i, link) in config.links.iter().enumerate() {
        let field = |name: &str| format!("links[{i}].{name}");
        if link.name.trim().is_empty() {
            return Err(ConfigError::invalid(field("name"), "name is empty"));
        }
        if !seen.insert(link.name.as_str()) {
            return Err(ConfigError::invalid(
                field("name"),
                format!("duplicate link name '{}'", link.name),
            ));
        }
        check_link_type(link).map_err(|m| ConfigError::invalid(field("type"), m))?;
        check_device(&link.device).map_err(|m| ConfigError::invalid(field("device"), m))?;
    }
    Ok(())
}

fn check_link_type(link: &LinkSection) -> Result<(), String> {
    for part in link.kind.split('|').map(str::trim) {
        if !LINK_TYPES.iter().any(|t| t.eq_ignore_ascii_case(part)) {
            return Err(format!(
                "unknown link type '{part}'; expected one of: {}",
                LINK_TYPES.join(", ")
            ));
        }
    }
    Ok(())
}

fn check_device(device: &str) -> Result<(), String> {
    let device = device.trim();
    if let Some(rest) = device.strip_prefix("tcp:") {
        let Some((host, port)) = rest.rsplit_once(':') else {
            return Err(format!("'{device}': expected tcp:host:port"));
        };
        if host.is_empty() {
            return Err(format!("'{device}': missing host"));
        }
        if port.parse::<u16>().is_err() {
            return Err(format!("'{device}': invalid port '{port}'"));
        }
    } else if device.strip_prefix("unix:").is_some_and(str::is_empty) {
        return Err(format!("'{device}': missing socket path"));
    }
    Ok(())
}

fn validate_routes(config: &Config) -> ConfigResult<()> {
    for (i, route) in config.routes.iter().enumerate() {
        let gw = route.gateway.trim();
        if !gw.eq_ignore_ascii_case("hisaddr") && gw.parse::<Ipv4Addr>().is_err() {
            return Err(ConfigError::invalid(
                format!("routes[{i}].gateway"),
                format!("'{gw}' is neither HISADDR nor an IPv4 address"),
            ));
        }
    }
    Ok(())
}

fn validate_filters(config: &Config) -> ConfigResult<()> {
    for (name, rules) in config.filters.named() {
        for (i, rule) in rules.iter().enumerate() {
            check_rule(rule).map_err(|m| {
                ConfigError::invalid(format!("filters.{name}[{i}]"), format!("'{rule}': {m}"))
            })?;
        }
    }
    Ok(())
}

fn check_rule(rule: &str) -> Result<(), &'static str> {
    let mut words = rule.split_whitespace().map(str::to_ascii_lowercase);
    match words.next().as_deref() {
        Some("permit" | "deny") => {},
        Some(_) => return Err("action must be permit or deny"),
        None => return Err("empty rule"),
    }
    match words.next().as_deref() {
        None | Some("any" | "tcp" | "udp" | "icmp") => {},
        Some(other) => {
            if other.parse::<u8>().is_err() {
                return Err("unknown protocol");
            }
        },
    }
    if words.next().is_some() {
        return Err("trailing words");
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !LOG_LEVELS.contains(&l.level.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::invalid(
            "logging.level",
            format!("unknown level '{}'; expected one of: {}", l.level, LOG_LEVELS.join(", ")),
        ));
    }
    if !LOG_FORMATS.contains(&l.format.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::invalid(
            "logging.format",
            format!("unknown format '{}'; expected one of: {}", l.format, LOG_FORMATS.join(", ")),
        ));
    }
    Ok(())
}
