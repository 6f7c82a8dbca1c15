//! Packet filters.
//!
//! A [`Filter`] is an ordered list of rules. The bundle only knows the
//! evaluation order; whether a rule matches a packet is decided by a
//! [`PacketMatcher`]. An empty filter passes everything. Otherwise the first
//! matching rule decides and a packet no rule matches is dropped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rule syntax error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid filter rule '{rule}': {reason}")]
pub struct FilterError {
    /// The offending rule text.
    pub rule: String,
    /// What is wrong with it.
    pub reason: &'static str,
}

/// What happens to a packet a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    /// Let it through.
    Permit,
    /// Drop it.
    Deny,
}

/// Which packets a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolPattern {
    /// Every packet.
    Any,
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// ICMP.
    Icmp,
    /// Any IP protocol number.
    Number(u8),
}

impl ProtocolPattern {
    /// IP protocol number, if the pattern names one.
    #[must_use]
    pub fn protocol(self) -> Option<u8> {
        match self {
            Self::Any => None,
            Self::Tcp => Some(6),
            Self::Udp => Some(17),
            Self::Icmp => Some(1),
            Self::Number(n) => Some(n),
        }
    }
}

/// One filter rule, e.g. `permit tcp` or `deny 47`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Action on match.
    pub action: FilterAction,
    /// What to match.
    pub pattern: ProtocolPattern,
}

impl FromStr for FilterRule {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| FilterError {
            rule: s.to_owned(),
            reason,
        };
        let mut words = s.split_whitespace();

        let action = match words.next().map(str::to_ascii_lowercase).as_deref() {
            Some("permit") => FilterAction::Permit,
            Some("deny") => FilterAction::Deny,
            Some(_) => return Err(err("action must be permit or deny")),
            None => return Err(err("empty rule")),
        };

        let pattern = match words.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("any") => ProtocolPattern::Any,
            Some("tcp") => ProtocolPattern::Tcp,
            Some("udp") => ProtocolPattern::Udp,
            Some("icmp") => ProtocolPattern::Icmp,
            Some(other) => other
                .parse()
                .map(ProtocolPattern::Number)
                .map_err(|_| err("unknown protocol"))?,
        };

        if words.next().is_some() {
            return Err(err("trailing words"));
        }
        Ok(Self { action, pattern })
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            FilterAction::Permit => "permit",
            FilterAction::Deny => "deny",
        };
        match self.pattern {
            ProtocolPattern::Any => write!(f, "{action} any"),
            ProtocolPattern::Tcp => write!(f, "{action} tcp"),
            ProtocolPattern::Udp => write!(f, "{action} udp"),
            ProtocolPattern::Icmp => write!(f, "{action} icmp"),
            ProtocolPattern::Number(n) => write!(f, "{action} {n}"),
        }
    }
}

/// Decides whether a rule matches a packet.
pub trait PacketMatcher: fmt::Debug + Send {
    /// Whether `rule` applies to `packet`.
    fn matches(&self, rule: &FilterRule, packet: &[u8]) -> bool;
}

/// Matches on the protocol field of an IPv4 header.
///
/// Anything that is not an IPv4 packet only matches `any`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolMatcher;

impl PacketMatcher for ProtocolMatcher {
    fn matches(&self, rule: &FilterRule, packet: &[u8]) -> bool {
        let Some(want) = rule.pattern.protocol() else {
            return true;
        };
        let is_v4 = packet.first().is_some_and(|b| b >> 4 == 4);
        is_v4 && packet.get(9) == Some(&want)
    }
}

/// Ordered rule list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    rules: Vec<FilterRule>,
}

impl Filter {
    /// Build a filter from rules.
    #[must_use]
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    /// Parse a filter from rule strings.
    ///
    /// # Errors
    ///
    /// Returns the first rule that does not parse.
    pub fn parse<S: AsRef<str>>(rules: &[S]) -> Result<Self, FilterError> {
        rules
            .iter()
            .map(|r| r.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// The rules, in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Whether the filter has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `packet` passes.
    #[must_use]
    pub fn apply(&self, matcher: &dyn PacketMatcher, packet: &[u8]) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        self.rules
            .iter()
            .find(|rule| matcher.matches(rule, packet))
            .is_some_and(|rule| rule.action == FilterAction::Permit)
    }
}

/// The four filters of a bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    /// Applied to packets arriving from the links.
    #[serde(rename = "in")]
    pub incoming: Filter,
    /// Applied to packets leaving through the links.
    #[serde(rename = "out")]
    pub outgoing: Filter,
    /// Packets that may bring a dead bundle up.
    pub dial: Filter,
    /// Packets that count as activity for the idle timer.
    pub alive: Filter,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4(proto: u8) -> Vec<u8> {
        let mut p = vec![0u8; 20];
        p[0] = 0x45;
        p[9] = proto;
        p
    }

    #[test]
    fn test_parse_rules() {
        let r: FilterRule = "permit tcp".parse().unwrap();
        assert_eq!(r.action, FilterAction::Permit);
        assert_eq!(r.pattern, ProtocolPattern::Tcp);

        let r: FilterRule = "DENY 47".parse().unwrap();
        assert_eq!(r.pattern, ProtocolPattern::Number(47));
        assert_eq!(r.to_string(), "deny 47");

        let r: FilterRule = "deny".parse().unwrap();
        assert_eq!(r.pattern, ProtocolPattern::Any);

        assert!("allow tcp".parse::<FilterRule>().is_err());
        assert!("permit carrier-pigeon".parse::<FilterRule>().is_err());
        assert!("permit tcp now".parse::<FilterRule>().is_err());
        assert!("".parse::<FilterRule>().is_err());
    }

    #[test]
    fn test_empty_filter_permits() {
        assert!(Filter::default().apply(&ProtocolMatcher, &ipv4(6)));
        assert!(Filter::default().apply(&ProtocolMatcher, b""));
    }

    #[test]
    fn test_first_match_decides() {
        let f = Filter::parse(&["deny icmp", "permit any"]).unwrap();
        assert!(!f.apply(&ProtocolMatcher, &ipv4(1)));
        assert!(f.apply(&ProtocolMatcher, &ipv4(6)));
    }

    #[test]
    fn test_no_match_denies() {
        let f = Filter::parse(&["permit tcp"]).unwrap();
        assert!(f.apply(&ProtocolMatcher, &ipv4(6)));
        assert!(!f.apply(&ProtocolMatcher, &ipv4(17)));
        // Not IPv4 at all.
        assert!(!f.apply(&ProtocolMatcher, &[0x60, 0, 0]));
    }

    #[test]
    fn test_parse_reports_bad_rule() {
        let err = Filter::parse(&["permit tcp", "maybe udp"]).unwrap_err();
        assert_eq!(err.rule, "maybe udp");
    }
}
