//! Composite resource ids: `project:branch`, `group:user_id`, ...
//!
//! The encoded string is the only identity the configuration framework keeps for a resource
//! and doubles as the import key an operator types, so decoding must reject anything odd
//! without panicking.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::TanukiError;

pub const ID_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeId {
    parts: SmallVec<[String; 3]>,
}

impl CompositeId {
    /// Build an id from its parts. Fails on zero parts, an empty part or a part containing the separator.
    pub fn encode<I, S>(parts: I) -> Result<Self, TanukiError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: SmallVec<[String; 3]> = parts.into_iter().map(Into::into).collect();
        if parts.is_empty() {
            return Err(TanukiError::validation("composite id needs at least one part"));
        }
        if parts.iter().any(String::is_empty) {
            return Err(TanukiError::validation("composite id parts must not be empty"));
        }
        if let Some(bad) = parts.iter().find(|p| p.contains(ID_SEPARATOR)) {
            return Err(TanukiError::validation(format!(
                "id part {:?} contains the reserved separator '{}'",
                bad, ID_SEPARATOR
            )));
        }
        Ok(Self { parts })
    }

    /// Parse an id that must have exactly `arity` non-empty parts.
    pub fn decode(s: &str, arity: usize) -> Result<Self, TanukiError> {
        let parts: SmallVec<[String; 3]> = s.split(ID_SEPARATOR).map(str::to_string).collect();
        let found = parts.iter().filter(|p| !p.is_empty()).count();
        if arity == 0 || parts.len() != arity || found != arity {
            return Err(TanukiError::MalformedId { input: s.to_string(), expected: arity, found });
        }
        Ok(Self { parts })
    }

    pub fn two(a: impl Into<String>, b: impl Into<String>) -> Result<Self, TanukiError> { Self::encode([a.into(), b.into()]) }

    pub fn parts(&self) -> &[String] { &self.parts }

    pub fn part(&self, i: usize) -> Option<&str> { self.parts.get(i).map(String::as_str) }

    pub fn len(&self) -> usize { self.parts.len() }

    pub fn is_empty(&self) -> bool { self.parts.is_empty() }

    /// Split a two-part id into its halves.
    pub fn pair(&self) -> Result<(&str, &str), TanukiError> {
        match self.parts.as_slice() {
            [a, b] => Ok((a.as_str(), b.as_str())),
            _ => Err(TanukiError::MalformedId { input: self.to_string(), expected: 2, found: self.parts.len() }),
        }
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", ID_SEPARATOR)?;
            }
            f.write_str(p)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_inverts_encode() {
        let cases: &[&[&str]] = &[
            &["42", "main"],
            &["group/sub/project", "release/1.x"],
            &["7", "v1.0.0", "extra"],
            &["only"],
        ];
        for parts in cases {
            let id = CompositeId::encode(parts.iter().copied()).expect("encode");
            let back = CompositeId::decode(&id.to_string(), parts.len()).expect("decode");
            assert_eq!(back.parts(), *parts);
            assert_eq!(back, id);
        }
    }

    #[test]
    fn encode_rejects_separator_and_empty_input() {
        assert!(CompositeId::encode(["a:b", "c"]).is_err());
        assert!(CompositeId::encode(Vec::<String>::new()).is_err());
        assert!(CompositeId::encode(["", "empty-left"]).is_err());
        assert!(CompositeId::two("42", "").is_err());
    }

    #[test]
    fn wrong_arity_is_malformed() {
        for (input, arity) in [("a", 2), ("a:b:c", 2), ("a:b", 3), ("", 2), (":::", 2), ("a:b", 0)] {
            let err = CompositeId::decode(input, arity).unwrap_err();
            assert!(matches!(err, TanukiError::MalformedId { .. }), "{input:?} -> {err}");
        }
    }

    #[test]
    fn decode_never_panics_on_odd_input() {
        let long = "x:".repeat(1000);
        for input in ["\u{0}:\u{10FFFF}", "🦊:🦝", ":", "a:", "\n:\t", long.as_str()] {
            let _ = CompositeId::decode(input, 2);
        }
    }

    #[test]
    fn empty_parts_are_malformed() {
        for (input, arity, found) in [("", 1, 0), ("1:", 2, 1), (":main", 2, 1), ("7::x", 3, 2)] {
            let err = CompositeId::decode(input, arity).unwrap_err();
            assert!(
                matches!(err, TanukiError::MalformedId { expected, found: f, .. } if expected == arity && f == found),
                "{input:?} -> {err}"
            );
        }
    }

    #[test]
    fn pair_and_display() {
        let id = CompositeId::two("42", "main").unwrap();
        assert_eq!(id.to_string(), "42:main");
        assert_eq!(id.pair().unwrap(), ("42", "main"));
        assert!(CompositeId::encode(["a", "b", "c"]).unwrap().pair().is_err());
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!(["42", "main"]));
    }
}
