//! Permission level tables.
//!
//! GitLab uses one integer scale for access levels across members, protected branches,
//! protected tags and protected environments, but every endpoint accepts only a subset of it.
//! The symbol <-> wire mapping below is domain independent; the per-endpoint allow-lists live
//! on [`AccessDomain`] and are checked before anything is mapped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TanukiError;

/// Deprecated spelling of `maintainer`; accepted on input, never produced.
pub const LEGACY_MAINTAINER: &str = "master";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessLevel {
    NoOne,
    Minimal,
    Guest,
    Reporter,
    Developer,
    Maintainer,
    Owner,
}

const LEVELS: &[(AccessLevel, &str, i32)] = &[
    (AccessLevel::NoOne, "no one", 0),
    (AccessLevel::Minimal, "minimal", 5),
    (AccessLevel::Guest, "guest", 10),
    (AccessLevel::Reporter, "reporter", 20),
    (AccessLevel::Developer, "developer", 30),
    (AccessLevel::Maintainer, "maintainer", 40),
    (AccessLevel::Owner, "owner", 50),
];

impl AccessLevel {
    pub fn all() -> impl Iterator<Item = AccessLevel> { LEVELS.iter().map(|(l, _, _)| *l) }

    pub fn as_str(self) -> &'static str {
        LEVELS.iter().find(|(l, _, _)| *l == self).map(|(_, s, _)| *s).unwrap_or("no one")
    }

    pub fn wire(self) -> i32 {
        LEVELS.iter().find(|(l, _, _)| *l == self).map(|(_, _, w)| *w).unwrap_or(0)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for AccessLevel {
    type Err = TanukiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == LEGACY_MAINTAINER {
            return Ok(AccessLevel::Maintainer);
        }
        LEVELS
            .iter()
            .find(|(_, name, _)| *name == s)
            .map(|(l, _, _)| *l)
            .ok_or_else(|| TanukiError::validation(format!("unknown access level {:?}", s)))
    }
}

impl TryFrom<i32> for AccessLevel {
    type Error = TanukiError;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        LEVELS
            .iter()
            .find(|(_, _, w)| *w == v)
            .map(|(l, _, _)| *l)
            .ok_or_else(|| TanukiError::validation(format!("unknown access level value {}", v)))
    }
}

impl Serialize for AccessLevel {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> { s.serialize_str(self.as_str()) }
}

impl<'de> Deserialize<'de> for AccessLevel {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Symbol -> wire value. Accepts the legacy `master` alias; no domain restrictions.
pub fn to_wire(symbol: &str) -> Option<i32> { symbol.parse::<AccessLevel>().ok().map(AccessLevel::wire) }

/// Wire value -> canonical symbol. Never yields the legacy alias.
pub fn from_wire(value: i32) -> Option<&'static str> { AccessLevel::try_from(value).ok().map(AccessLevel::as_str) }

/// The endpoint families that accept access levels, each with its own allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessDomain {
    GroupMember,
    ProjectMember,
    /// push/merge levels of a protected branch
    BranchProtection,
    /// who may unprotect a protected branch
    BranchUnprotect,
    /// create level of a protected tag
    TagProtection,
    /// deploy level of a protected environment
    EnvironmentDeploy,
}

const MEMBER_NAMES: &[&str] = &["no one", "minimal", "guest", "reporter", "developer", "maintainer", "owner", LEGACY_MAINTAINER];
const PROTECTION_NAMES: &[&str] = &["no one", "developer", "maintainer"];
const ELEVATED_NAMES: &[&str] = &["developer", "maintainer"];

impl AccessDomain {
    pub fn all() -> &'static [AccessDomain] {
        &[
            AccessDomain::GroupMember,
            AccessDomain::ProjectMember,
            AccessDomain::BranchProtection,
            AccessDomain::BranchUnprotect,
            AccessDomain::TagProtection,
            AccessDomain::EnvironmentDeploy,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            AccessDomain::GroupMember => "group-member",
            AccessDomain::ProjectMember => "project-member",
            AccessDomain::BranchProtection => "branch-protection",
            AccessDomain::BranchUnprotect => "branch-unprotect",
            AccessDomain::TagProtection => "tag-protection",
            AccessDomain::EnvironmentDeploy => "environment-deploy",
        }
    }

    /// Symbols the endpoint accepts, in documentation order.
    pub fn valid_names(self) -> &'static [&'static str] {
        match self {
            AccessDomain::GroupMember | AccessDomain::ProjectMember => MEMBER_NAMES,
            AccessDomain::BranchProtection | AccessDomain::TagProtection => PROTECTION_NAMES,
            AccessDomain::BranchUnprotect | AccessDomain::EnvironmentDeploy => ELEVATED_NAMES,
        }
    }

    pub fn permits(self, symbol: &str) -> bool { self.valid_names().contains(&symbol) }

    /// Validate against the allow-list, then map to the wire value.
    pub fn encode(self, symbol: &str) -> Result<i32, TanukiError> {
        if !self.permits(symbol) {
            return Err(TanukiError::validation(format!(
                "access level {:?} is not valid for {}; valid values are: {}",
                symbol,
                self.name(),
                render_value_list(self.valid_names())
            )));
        }
        to_wire(symbol).ok_or_else(|| TanukiError::validation(format!("unknown access level {:?}", symbol)))
    }

    /// Map a wire value reported by the API back to a symbol this domain can express.
    pub fn decode(self, value: i32) -> Result<&'static str, TanukiError> {
        match from_wire(value) {
            Some(name) if self.permits(name) => Ok(name),
            _ => Err(TanukiError::validation(format!(
                "{} access level {} is not supported; supported are: {}",
                self.name(),
                value,
                render_value_list(self.valid_names())
            ))),
        }
    }
}

impl fmt::Display for AccessDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for AccessDomain {
    type Err = TanukiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccessDomain::all()
            .iter()
            .copied()
            .find(|d| d.name() == s)
            .ok_or_else(|| TanukiError::validation(format!("unknown access domain {:?}", s)))
    }
}

/// `a`, `b`, `c` rendering used in operator-facing messages.
pub fn render_value_list(values: &[&str]) -> String {
    values.iter().map(|v| format!("`{}`", v)).collect::<Vec<_>>().join(", ")
}
