//! Allowed origins and the origin matching algorithm

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::de::{self, Deserialize, Deserializer, SeqAccess, Visitor};

use crate::Error;

/// A single allowed origin specifier
///
/// Patterns are parsed from strings with [`FromStr`]:
///
/// - `"*"` is the wildcard and allows any origin;
/// - a string wrapped in slashes, like `"/^https://.*\.acme\.com$/"`, is a regular expression;
/// - anything else is an origin that must match exactly, e.g. `"https://www.acme.com"`.
///
/// Regular expressions are matched from the start of the request origin. Add a `$` to
/// require the whole origin to match.
#[derive(Clone, Debug)]
pub enum OriginPattern {
    /// Any origin, `*`
    Any,
    /// An origin that has to match byte for byte
    Exact(String),
    /// Origins matching a regular expression
    Regex(Regex),
}

impl OriginPattern {
    /// An exact origin
    pub fn exact<S: Into<String>>(origin: S) -> Self {
        OriginPattern::Exact(origin.into())
    }

    /// Compile a regular expression origin
    pub fn regex(pattern: &str) -> Result<Self, Error> {
        Ok(OriginPattern::Regex(Regex::new(pattern)?))
    }

    /// Whether this is the wildcard
    pub fn is_any(&self) -> bool {
        matches!(*self, OriginPattern::Any)
    }

    /// Whether `origin` is allowed by this pattern
    pub fn matches(&self, origin: &str) -> bool {
        match *self {
            OriginPattern::Any => true,
            OriginPattern::Exact(ref exact) => exact == origin,
            OriginPattern::Regex(ref regex) => regex.find(origin).map_or(false, |m| m.start() == 0),
        }
    }
}

impl PartialEq for OriginPattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OriginPattern::Any, OriginPattern::Any) => true,
            (OriginPattern::Exact(a), OriginPattern::Exact(b)) => a == b,
            (OriginPattern::Regex(a), OriginPattern::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for OriginPattern {}

impl FromStr for OriginPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            Ok(OriginPattern::Any)
        } else if s.len() > 1 && s.starts_with('/') && s.ends_with('/') {
            OriginPattern::regex(&s[1..s.len() - 1])
        } else {
            Ok(OriginPattern::Exact(s.to_string()))
        }
    }
}

impl fmt::Display for OriginPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            OriginPattern::Any => f.write_str("*"),
            OriginPattern::Exact(ref exact) => f.write_str(exact),
            OriginPattern::Regex(ref regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

impl From<Regex> for OriginPattern {
    fn from(regex: Regex) -> Self {
        OriginPattern::Regex(regex)
    }
}

/// The set of origins that are allowed to make requests.
///
/// Duplicate patterns are ignored and patterns are tried in insertion order. Equality does not
/// depend on the order.
///
/// # Examples
/// ```rust
/// use rocket_cors_policy::{AllowedOrigins, OriginPattern};
///
/// let all = AllowedOrigins::all();
/// assert!(all.is_any());
///
/// let some = AllowedOrigins::some_exact(&["https://www.acme.com"]);
/// assert!(!some.is_any());
///
/// let mixed = AllowedOrigins::from(vec![
///     OriginPattern::exact("https://www.acme.com"),
///     OriginPattern::regex(r"^https://(.+\.)?acme\.dev$").unwrap(),
/// ]);
/// assert_eq!(mixed.len(), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct AllowedOrigins(Vec<OriginPattern>);

impl AllowedOrigins {
    /// Allows all origins
    pub fn all() -> Self {
        AllowedOrigins(vec![OriginPattern::Any])
    }

    /// Allows some exact origins
    pub fn some_exact<S: AsRef<str>>(origins: &[S]) -> Self {
        origins
            .iter()
            .map(|origin| OriginPattern::exact(origin.as_ref()))
            .collect()
    }

    /// Allows origins matching some regular expressions
    pub fn some_regex<S: AsRef<str>>(patterns: &[S]) -> Result<Self, Error> {
        patterns
            .iter()
            .map(|pattern| OriginPattern::regex(pattern.as_ref()))
            .collect()
    }

    /// Adds a pattern unless it is already present
    pub fn insert(&mut self, pattern: OriginPattern) -> bool {
        if self.0.contains(&pattern) {
            return false;
        }
        self.0.push(pattern);
        true
    }

    /// Whether the wildcard is one of the allowed origins
    pub fn is_any(&self) -> bool {
        self.0.iter().any(OriginPattern::is_any)
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no origin is allowed at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the patterns
    pub fn iter(&self) -> std::slice::Iter<'_, OriginPattern> {
        self.0.iter()
    }
}

impl PartialEq for AllowedOrigins {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().all(|pattern| other.0.contains(pattern))
    }
}

impl Eq for AllowedOrigins {}

impl FromIterator<OriginPattern> for AllowedOrigins {
    fn from_iter<I: IntoIterator<Item = OriginPattern>>(iter: I) -> Self {
        let mut origins = AllowedOrigins(Vec::new());
        for pattern in iter {
            let _ = origins.insert(pattern);
        }
        origins
    }
}

impl From<OriginPattern> for AllowedOrigins {
    fn from(pattern: OriginPattern) -> Self {
        AllowedOrigins(vec![pattern])
    }
}

impl From<Vec<OriginPattern>> for AllowedOrigins {
    fn from(patterns: Vec<OriginPattern>) -> Self {
        patterns.into_iter().collect()
    }
}

impl From<Regex> for AllowedOrigins {
    fn from(regex: Regex) -> Self {
        OriginPattern::Regex(regex).into()
    }
}

/// A single origin string. `"*"` is the wildcard; anything else is taken literally.
impl<'a> From<&'a str> for AllowedOrigins {
    fn from(origin: &'a str) -> Self {
        if origin == "*" {
            AllowedOrigins::all()
        } else {
            OriginPattern::exact(origin).into()
        }
    }
}

impl<'a> From<&'a [&'a str]> for AllowedOrigins {
    fn from(origins: &'a [&'a str]) -> Self {
        origins.iter().map(|origin| AllowedOrigins::from(*origin)).collect()
    }
}

impl<'a> From<Vec<&'a str>> for AllowedOrigins {
    fn from(origins: Vec<&'a str>) -> Self {
        AllowedOrigins::from(origins.as_slice())
    }
}

impl FromIterator<AllowedOrigins> for AllowedOrigins {
    fn from_iter<I: IntoIterator<Item = AllowedOrigins>>(iter: I) -> Self {
        iter.into_iter().flat_map(|origins| origins.0).collect()
    }
}

/// Deserializes from one pattern string or a list of them, see [`OriginPattern`]
impl<'de> Deserialize<'de> for AllowedOrigins {
    fn deserialize<D>(deserializer: D) -> Result<AllowedOrigins, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AllowedOriginsVisitor;
        impl<'de> Visitor<'de> for AllowedOriginsVisitor {
            type Value = AllowedOrigins;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("an origin pattern or a list of origin patterns")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let pattern = OriginPattern::from_str(s).map_err(de::Error::custom)?;
                Ok(pattern.into())
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut origins = AllowedOrigins::default();
                while let Some(pattern) = seq.next_element::<String>()? {
                    let pattern = OriginPattern::from_str(&pattern).map_err(de::Error::custom)?;
                    let _ = origins.insert(pattern);
                }
                Ok(origins)
            }
        }

        deserializer.deserialize_any(AllowedOriginsVisitor)
    }
}

/// Decides whether `origin` is allowed and what to send back in `Access-Control-Allow-Origin`.
///
/// Returns `None` when there is no (or an empty) origin, or when no pattern matches. The first
/// matching pattern wins: the wildcard yields `"*"` when `send_wildcard` is set and echoes the
/// origin otherwise; exact and regex patterns always echo the origin.
pub fn match_origin(
    origin: Option<&str>,
    allowed: &AllowedOrigins,
    send_wildcard: bool,
) -> Option<String> {
    let origin = match origin {
        None | Some("") => return None,
        Some(origin) => origin,
    };

    allowed
        .iter()
        .find(|pattern| pattern.matches(origin))
        .map(|pattern| {
            if pattern.is_any() && send_wildcard {
                "*".to_string()
            } else {
                origin.to_string()
            }
        })
}
