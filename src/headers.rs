//! CORS specific Request Headers and the case insensitive `HeaderSet`

use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use rocket::http::Status;
use rocket::request::{self, FromRequest};
use rocket::{self, outcome::Outcome};
use serde::de::{self, Deserialize, Deserializer, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeSeq, Serializer};
use unicase::UniCase;

/// A case insensitive header name
#[derive(Eq, PartialEq, Clone, Debug, Hash, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct HeaderFieldName(#[serde(with = "unicase_serde::unicase")] UniCase<String>);

impl Deref for HeaderFieldName {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl fmt::Display for HeaderFieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'a> From<&'a str> for HeaderFieldName {
    fn from(s: &'a str) -> Self {
        HeaderFieldName(From::from(s))
    }
}

impl From<String> for HeaderFieldName {
    fn from(s: String) -> Self {
        HeaderFieldName(From::from(s))
    }
}

impl FromStr for HeaderFieldName {
    type Err = <String as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(HeaderFieldName(FromStr::from_str(s)?))
    }
}

/// An ordered set of HTTP tokens compared ASCII case insensitively.
///
/// This is used for the allowed headers and methods, the exposed headers and the `Vary`
/// header. The first spelling of a token is kept and is what gets written to responses.
/// Two sets are equal when they hold the same tokens, in any order and any case.
///
/// Empty tokens are dropped, so `HeaderSet::from(&[""][..])` is an empty set.
///
/// ```rust
/// use rocket_cors_policy::HeaderSet;
///
/// let allowed = HeaderSet::from(&["X-Match", "X-Other"][..]);
/// let requested: HeaderSet = "x-match, X-No-Match".parse().unwrap();
///
/// let intersection = allowed.intersect(&requested);
/// assert_eq!(intersection.to_header_value(), "X-Match");
/// ```
#[derive(Clone, Debug, Default)]
pub struct HeaderSet(Vec<HeaderFieldName>);

impl HeaderSet {
    /// Create an empty set
    pub fn new() -> Self {
        HeaderSet(Vec::new())
    }

    /// Adds a token, unless it is empty or already present in some casing.
    ///
    /// Returns whether the token was added.
    pub fn insert<T: Into<HeaderFieldName>>(&mut self, token: T) -> bool {
        let token = token.into();
        if token.trim().is_empty() || self.0.contains(&token) {
            return false;
        }
        self.0.push(token);
        true
    }

    /// Whether `token` is in the set, ignoring case
    pub fn contains(&self, token: &str) -> bool {
        let token = UniCase::new(token);
        self.0.iter().any(|t| UniCase::new(t.as_str()) == token)
    }

    /// Whether the wildcard token `*` is in the set
    pub fn is_wildcard(&self) -> bool {
        self.contains("*")
    }

    /// Tokens of `self` that are also in `other`, in the casing of `self`
    pub fn intersect(&self, other: &HeaderSet) -> HeaderSet {
        HeaderSet(
            self.0
                .iter()
                .filter(|token| other.contains(token))
                .cloned()
                .collect(),
        )
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the tokens in their original casing
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|token| token.as_str())
    }

    /// The set as a comma separated header value
    pub fn to_header_value(&self) -> String {
        self.iter().collect::<Vec<_>>().join(", ")
    }
}

impl PartialEq for HeaderSet {
    fn eq(&self, other: &Self) -> bool {
        let ours: HashSet<&HeaderFieldName> = self.0.iter().collect();
        let theirs: HashSet<&HeaderFieldName> = other.0.iter().collect();
        ours == theirs
    }
}

impl Eq for HeaderSet {}

impl fmt::Display for HeaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_header_value())
    }
}

impl<T: Into<HeaderFieldName>> FromIterator<T> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = HeaderSet::new();
        for token in iter {
            let _ = set.insert(token);
        }
        set
    }
}

impl<T: Into<HeaderFieldName>> Extend<T> for HeaderSet {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for token in iter {
            let _ = self.insert(token);
        }
    }
}

impl<'a> From<&'a str> for HeaderSet {
    fn from(token: &'a str) -> Self {
        std::iter::once(token).collect()
    }
}

impl From<String> for HeaderSet {
    fn from(token: String) -> Self {
        std::iter::once(token).collect()
    }
}

impl<'a> From<&'a [&'a str]> for HeaderSet {
    fn from(tokens: &'a [&'a str]) -> Self {
        tokens.iter().copied().collect()
    }
}

impl<'a> From<Vec<&'a str>> for HeaderSet {
    fn from(tokens: Vec<&'a str>) -> Self {
        tokens.into_iter().collect()
    }
}

impl From<Vec<String>> for HeaderSet {
    fn from(tokens: Vec<String>) -> Self {
        tokens.into_iter().collect()
    }
}

/// Parses a comma separated header value. Will never fail.
impl FromStr for HeaderSet {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(value.split(',').map(|token| token.trim()).collect())
    }
}

impl Serialize for HeaderSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for token in &self.0 {
            seq.serialize_element(token)?;
        }
        seq.end()
    }
}

/// Deserializes from either a single token or a list of tokens
impl<'de> Deserialize<'de> for HeaderSet {
    fn deserialize<D>(deserializer: D) -> Result<HeaderSet, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HeaderSetVisitor;
        impl<'de> Visitor<'de> for HeaderSetVisitor {
            type Value = HeaderSet;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a header name or a list of header names")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(HeaderSet::from(s))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut set = HeaderSet::new();
                while let Some(token) = seq.next_element::<HeaderFieldName>()? {
                    let _ = set.insert(token);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_any(HeaderSetVisitor)
    }
}

/// The `Origin` request header used in CORS
///
/// The value is kept verbatim: origins are compared as case-sensitive strings and echoed back
/// unchanged.
///
/// You can use this as a rocket [Request Guard](https://rocket.rs/guide/requests/#request-guards)
/// to ensure that `Origin` is passed in.
///
/// Reference: [Mozilla](https://developer.mozilla.org/en-US/docs/Web/HTTP/Headers/Origin)
#[derive(Eq, PartialEq, Clone, Hash, Debug)]
pub struct Origin(pub String);

impl Origin {
    /// Derives an instance of `Self` from the incoming request metadata.
    ///
    /// `Forward` is returned when the request has no `Origin` header.
    pub fn from_request_sync(
        request: &'_ rocket::Request<'_>,
    ) -> request::Outcome<Self, crate::Error> {
        match request.headers().get_one("Origin") {
            Some(origin) => Outcome::Success(Origin(origin.to_string())),
            None => Outcome::Forward(Status::NotFound),
        }
    }
}

impl Deref for Origin {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Origin {
    type Error = crate::Error;

    async fn from_request(
        request: &'r rocket::Request<'_>,
    ) -> request::Outcome<Self, crate::Error> {
        Origin::from_request_sync(request)
    }
}

/// The `Access-Control-Request-Method` request header
///
/// The method is kept as a raw token, so that it can be compared against allowed methods that
/// include the wildcard.
///
/// You can use this as a rocket [Request Guard](https://rocket.rs/guide/requests/#request-guards)
/// to ensure that the header is passed in.
#[derive(Eq, PartialEq, Debug)]
pub struct AccessControlRequestMethod(pub String);

impl AccessControlRequestMethod {
    /// Derives an instance of `Self` from the incoming request metadata.
    ///
    /// `Forward` is returned when the header is missing or blank.
    pub fn from_request_sync(
        request: &'_ rocket::Request<'_>,
    ) -> request::Outcome<Self, crate::Error> {
        match request.headers().get_one("Access-Control-Request-Method") {
            Some(method) if !method.trim().is_empty() => {
                Outcome::Success(AccessControlRequestMethod(method.trim().to_string()))
            }
            _ => Outcome::Forward(Status::NotFound),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AccessControlRequestMethod {
    type Error = crate::Error;

    async fn from_request(
        request: &'r rocket::Request<'_>,
    ) -> request::Outcome<Self, crate::Error> {
        AccessControlRequestMethod::from_request_sync(request)
    }
}

/// The `Access-Control-Request-Headers` request header
///
/// All occurrences of the header are merged into one set, in request order and casing.
///
/// You can use this as a rocket [Request Guard](https://rocket.rs/guide/requests/#request-guards)
/// to ensure that the header is passed in.
#[derive(Eq, PartialEq, Debug)]
pub struct AccessControlRequestHeaders(pub HeaderSet);

impl AccessControlRequestHeaders {
    /// Derives an instance of `Self` from the incoming request metadata.
    ///
    /// `Forward` is returned when the header is missing.
    pub fn from_request_sync(
        request: &'_ rocket::Request<'_>,
    ) -> request::Outcome<Self, crate::Error> {
        let mut values = request
            .headers()
            .get("Access-Control-Request-Headers")
            .peekable();
        if values.peek().is_none() {
            return Outcome::Forward(Status::NotFound);
        }

        let mut headers = HeaderSet::new();
        for value in values {
            headers.extend(value.split(',').map(|token| token.trim()));
        }
        Outcome::Success(AccessControlRequestHeaders(headers))
    }
}

/// Will never fail
impl FromStr for AccessControlRequestHeaders {
    type Err = ();

    /// Will never fail
    fn from_str(headers: &str) -> Result<Self, Self::Err> {
        Ok(AccessControlRequestHeaders(HeaderSet::from_str(headers)?))
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AccessControlRequestHeaders {
    type Error = crate::Error;

    async fn from_request(
        request: &'r rocket::Request<'_>,
    ) -> request::Outcome<Self, crate::Error> {
        AccessControlRequestHeaders::from_request_sync(request)
    }
}
