//! Conversion from configuration text to runtime types.
//!
//! The config crate validates syntax; this is where the strings become
//! [`PhysType`]s, [`Endpoint`]s, [`RouteSpec`]s and [`Filter`]s.

use mlppp_bundle::{
    AuthSettings, BundleSettings, Endpoint, Filter, FilterSet, LinkConfig, NullTunnel,
    RouteGateway, RouteSpec, TunDevice, Tunnel,
};
use mlppp_config::{BundleSection, Config, FiltersSection, LinkSection, LoggingSection, TunnelKind};
use mlppp_core::{BoundedText, PhysType};
use mlppp_telemetry::{LogConfig, LogFormat};
use tracing::warn;

use crate::error::{DaemonError, DaemonResult};

/// Bundle settings for `config`.
///
/// # Errors
///
/// [`DaemonError::Setting`] if a route gateway or filter rule does not parse.
pub fn bundle_settings(config: &Config) -> DaemonResult<BundleSettings> {
    let routes = config
        .routes
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let gateway: RouteGateway = r
                .gateway
                .trim()
                .parse()
                .map_err(|e| DaemonError::setting(format!("routes[{i}].gateway"), e))?;
            Ok(RouteSpec {
                dst: r.dst,
                mask: r.mask,
                gateway,
            })
        })
        .collect::<DaemonResult<Vec<_>>>()?;

    Ok(BundleSettings {
        idle_timeout: config.bundle.idle_timeout,
        auth: auth_settings(&config.bundle),
        routes,
        filters: filter_set(&config.filters)?,
        multilink: config.bundle.multilink,
    })
}

fn auth_settings(bundle: &BundleSection) -> AuthSettings {
    let key = bundle.auth_key.as_deref().unwrap_or_default();
    for (field, value) in [("bundle.auth_name", bundle.auth_name.as_str()), ("bundle.auth_key", key)] {
        if BoundedText::<{ mlppp_bundle::MAX_AUTH_LEN }>::would_truncate(value) {
            warn!(field, max = mlppp_bundle::MAX_AUTH_LEN, "value truncated");
        }
    }
    AuthSettings {
        name: BoundedText::new(&bundle.auth_name),
        key: BoundedText::new(key),
    }
}

fn filter_set(filters: &FiltersSection) -> DaemonResult<FilterSet> {
    let parse = |name: &str, rules: &[String]| {
        Filter::parse(rules).map_err(|e| DaemonError::setting(format!("filters.{name}"), e))
    };
    Ok(FilterSet {
        incoming: parse("in", &filters.incoming)?,
        outgoing: parse("out", &filters.outgoing)?,
        dial: parse("dial", &filters.dial)?,
        alive: parse("alive", &filters.alive)?,
    })
}

/// Link-layer configuration for one `[[links]]` entry.
///
/// # Errors
///
/// [`DaemonError::Setting`] if the type or device does not parse.
pub fn link_config(index: usize, link: &LinkSection) -> DaemonResult<LinkConfig> {
    let phys_type: PhysType = link
        .kind
        .parse()
        .map_err(|e| DaemonError::setting(format!("links[{index}].type"), e))?;
    let endpoint: Endpoint = link
        .device
        .parse()
        .map_err(|e: String| DaemonError::setting(format!("links[{index}].device"), e))?;
    Ok(LinkConfig {
        phys_type,
        endpoint,
    })
}

/// The tunnel the bundle runs over.
///
/// # Errors
///
/// [`DaemonError::Bundle`] if no tunnel device could be opened.
pub fn open_tunnel(bundle: &BundleSection) -> DaemonResult<Box<dyn Tunnel>> {
    match bundle.tunnel {
        TunnelKind::Device => Ok(Box::new(TunDevice::open(bundle.unit)?)),
        TunnelKind::None => Ok(Box::new(NullTunnel)),
    }
}

/// Logging setup for `[logging]`; `verbose` forces `debug`.
#[must_use]
pub fn log_config(logging: &LoggingSection, verbose: bool) -> LogConfig {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let format = match logging.format.to_ascii_lowercase().as_str() {
        "pretty" => LogFormat::Pretty,
        "json" => LogFormat::Json,
        "full" => LogFormat::Full,
        _ => LogFormat::Compact,
    };
    logging
        .directives
        .iter()
        .fold(LogConfig::new(level).with_format(format), |cfg, d| {
            cfg.with_directive(d.as_str())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlppp_config::RouteSection;
    use std::net::Ipv4Addr;

    #[test]
    fn test_bundle_settings_from_config() {
        let mut config = Config::default();
        config.bundle.idle_timeout = 60;
        config.bundle.auth_name = "a".repeat(60);
        config.bundle.auth_key = Some("secret".into());
        config.routes.push(RouteSection {
            dst: Ipv4Addr::new(10, 0, 0, 0),
            mask: Ipv4Addr::new(255, 0, 0, 0),
            gateway: "HISADDR".into(),
        });
        config.filters.dial = vec!["permit tcp".into()];

        let s = bundle_settings(&config).unwrap();
        assert_eq!(s.idle_timeout, 60);
        assert_eq!(s.auth.name.len(), mlppp_bundle::MAX_AUTH_LEN);
        assert_eq!(s.auth.key.as_str(), "secret");
        assert_eq!(s.routes[0].gateway, RouteGateway::Peer);
        assert_eq!(s.filters.dial.rules().len(), 1);
        assert!(s.filters.outgoing.is_empty());
    }

    #[test]
    fn test_bad_filter_names_the_field() {
        let mut config = Config::default();
        config.filters.outgoing = vec!["allow everything".into()];
        match bundle_settings(&config).unwrap_err() {
            DaemonError::Setting { field, .. } => assert_eq!(field, "filters.out"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_link_config() {
        let link = LinkSection {
            name: "modem".into(),
            kind: "auto|ddial".into(),
            device: "tcp:peer:6671".into(),
        };
        let c = link_config(0, &link).unwrap();
        assert!(c.phys_type.contains(PhysType::AUTO));
        assert!(c.phys_type.contains(PhysType::DDIAL));
        assert_eq!(
            c.endpoint,
            Endpoint::Tcp {
                host: "peer".into(),
                port: 6671
            }
        );

        let bad = LinkSection {
            kind: "never".into(),
            ..link
        };
        assert!(matches!(link_config(3, &bad), Err(DaemonError::Setting { ref field, .. }) if field == "links[3].type"));
    }

    #[test]
    fn test_log_config_mapping() {
        let logging = LoggingSection {
            level: "warn".into(),
            format: "json".into(),
            directives: vec!["mlppp::phase=info".into()],
        };
        let cfg = log_config(&logging, false);
        assert_eq!(cfg.level, "warn");
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.directives, vec!["mlppp::phase=info".to_owned()]);
        assert_eq!(log_config(&logging, true).level, "debug");
    }

    #[test]
    fn test_null_tunnel() {
        let section = BundleSection {
            tunnel: TunnelKind::None,
            ..BundleSection::default()
        };
        assert_eq!(open_tunnel(&section).unwrap().name(), "none");
    }
}
