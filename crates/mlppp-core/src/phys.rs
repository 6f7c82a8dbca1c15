//! Physical link type flags.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Set of physical link types.
///
/// A bundle keeps the union of the types of every attached link, which
/// decides things like whether the idle timer applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysType(u8);

/// Unknown physical type name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown link type '{0}'")]
pub struct PhysTypeError(pub String);

const NAMES: [(PhysType, &str); 7] = [
    (PhysType::INTERACTIVE, "interactive"),
    (PhysType::AUTO, "auto"),
    (PhysType::DIRECT, "direct"),
    (PhysType::DEDICATED, "dedicated"),
    (PhysType::DDIAL, "ddial"),
    (PhysType::BACKGROUND, "background"),
    (PhysType::ONE_OFF, "oneoff"),
];

impl PhysType {
    /// Opened by an operator command.
    pub const INTERACTIVE: Self = Self(0x01);
    /// Dialled on demand when outgoing traffic matches the dial filter.
    pub const AUTO: Self = Self(0x02);
    /// Incoming connection on an already-open descriptor.
    pub const DIRECT: Self = Self(0x04);
    /// Permanently open, never times out.
    pub const DEDICATED: Self = Self(0x08);
    /// Redialled whenever it drops, never times out.
    pub const DDIAL: Self = Self(0x10);
    /// Dialled once in the background.
    pub const BACKGROUND: Self = Self(0x20);
    /// Used for a single session, then discarded.
    pub const ONE_OFF: Self = Self(0x40);
    /// Links that stay up regardless of traffic.
    pub const PERMANENT: Self = Self(0x08 | 0x10);
    /// Every type.
    pub const ALL: Self = Self(0x7f);

    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bit value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether no type is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every type in `other` is also in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether `self` and `other` share at least one type.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Every type in either set.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Names of the types present, in flag order.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for PhysType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PhysType {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromStr for PhysType {
    type Err = PhysTypeError;

    /// Parse a single name or a `|`-separated list (`"auto|ddial"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = Self::empty();
        for part in s.split('|').map(str::trim) {
            let flag = NAMES
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(part))
                .map(|(flag, _)| *flag)
                .ok_or_else(|| PhysTypeError(part.to_owned()))?;
            out |= flag;
        }
        Ok(out)
    }
}

impl fmt::Display for PhysType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_and_contains() {
        let t = PhysType::AUTO | PhysType::DDIAL;
        assert!(t.contains(PhysType::AUTO));
        assert!(t.intersects(PhysType::PERMANENT));
        assert!(!t.contains(PhysType::PERMANENT));
        assert!(!t.intersects(PhysType::DIRECT | PhysType::ONE_OFF));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("auto".parse::<PhysType>().unwrap(), PhysType::AUTO);
        assert_eq!(
            "direct | oneoff".parse::<PhysType>().unwrap(),
            PhysType::DIRECT | PhysType::ONE_OFF
        );
        assert!("modem".parse::<PhysType>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(PhysType::empty().to_string(), "none");
        assert_eq!(
            (PhysType::INTERACTIVE | PhysType::DEDICATED).to_string(),
            "interactive|dedicated"
        );
    }
}
