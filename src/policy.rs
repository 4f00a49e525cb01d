//! Partial CORS options and their resolution into an effective `Policy`

use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserialize, Deserializer, Visitor};

use crate::headers::HeaderSet;
use crate::origin::AllowedOrigins;

/// Methods allowed when nothing else is configured
pub const DEFAULT_ALLOW_METHODS: &[&str] = &["GET", "HEAD", "POST", "OPTIONS", "PUT", "PATCH", "DELETE"];

/// Exposed headers when nothing else is configured. The empty token stands for "no headers".
pub const DEFAULT_EXPOSE_HEADERS: &[&str] = &[""];

/// The `Access-Control-Max-Age` value in whole seconds
///
/// Converting from a [`Duration`] truncates the sub-second part. When deserialized, integers,
/// non-negative floats (truncated) and numeric strings are accepted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MaxAge(pub u64);

impl MaxAge {
    /// The number of seconds
    pub fn as_secs(self) -> u64 {
        self.0
    }
}

impl From<Duration> for MaxAge {
    fn from(duration: Duration) -> Self {
        MaxAge(duration.as_secs())
    }
}

impl From<u64> for MaxAge {
    fn from(seconds: u64) -> Self {
        MaxAge(seconds)
    }
}

impl<'de> Deserialize<'de> for MaxAge {
    fn deserialize<D>(deserializer: D) -> Result<MaxAge, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MaxAgeVisitor;
        impl<'de> Visitor<'de> for MaxAgeVisitor {
            type Value = MaxAge;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a non-negative number of seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(MaxAge(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if v < 0 {
                    return Err(de::Error::custom(crate::Error::InvalidMaxAge(v.to_string())));
                }
                Ok(MaxAge(v as u64))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(de::Error::custom(crate::Error::InvalidMaxAge(v.to_string())));
                }
                Ok(MaxAge(v.trunc() as u64))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                match v.trim().parse::<f64>() {
                    Ok(seconds) => self.visit_f64(seconds),
                    Err(_) => Err(de::Error::custom(crate::Error::InvalidMaxAge(v.to_string()))),
                }
            }
        }

        deserializer.deserialize_any(MaxAgeVisitor)
    }
}

/// CORS options where every field may be left unset
///
/// This is used both for the options given to an attachment (a route wrapper or a fairing) and
/// for the application's configuration. Unset fields fall back, in order, to the application's
/// [`CorsConfig`](crate::CorsConfig) and to the defaults documented on [`Policy`].
///
/// You can either fill in the fields directly or use the builder methods:
///
/// ```rust
/// use std::time::Duration;
/// use rocket_cors_policy::CorsOptions;
///
/// let options = CorsOptions::default()
///     .allow_origin("https://www.acme.com")
///     .allow_methods(&["GET", "POST"][..])
///     .allow_credentials(true)
///     .max_age(Duration::from_secs(3600));
/// ```
///
/// It also deserializes from formats like JSON or TOML. Origins and header lists can be a single
/// string or a list:
///
/// ```json
/// {
///   "allow_origin": ["https://www.acme.com", "/^https://.*\\.acme\\.dev$/"],
///   "allow_headers": "Authorization",
///   "max_age": 42
/// }
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq, serde_derive::Deserialize)]
#[serde(default)]
pub struct CorsOptions {
    /// Sends `Access-Control-Allow-Credentials: true`. Cannot be combined with a wildcard origin.
    pub allow_credentials: Option<bool>,
    /// Headers a preflight may ask for. With the wildcard, whatever is requested is allowed.
    pub allow_headers: Option<HeaderSet>,
    /// Methods a preflight may ask for
    pub allow_methods: Option<HeaderSet>,
    /// Origins that may make cross origin requests
    pub allow_origin: Option<AllowedOrigins>,
    /// Headers the client is allowed to read from responses
    pub expose_headers: Option<HeaderSet>,
    /// How long a preflight result may be cached
    pub max_age: Option<MaxAge>,
    /// Whether a wildcard match is answered with `*` rather than the request's origin
    pub send_origin_wildcard: Option<bool>,
}

impl CorsOptions {
    /// Set `allow_credentials`
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = Some(allow);
        self
    }

    /// Set `allow_headers`
    pub fn allow_headers<H: Into<HeaderSet>>(mut self, headers: H) -> Self {
        self.allow_headers = Some(headers.into());
        self
    }

    /// Set `allow_methods`
    pub fn allow_methods<H: Into<HeaderSet>>(mut self, methods: H) -> Self {
        self.allow_methods = Some(methods.into());
        self
    }

    /// Set `allow_origin`
    pub fn allow_origin<O: Into<AllowedOrigins>>(mut self, origins: O) -> Self {
        self.allow_origin = Some(origins.into());
        self
    }

    /// Set `expose_headers`
    pub fn expose_headers<H: Into<HeaderSet>>(mut self, headers: H) -> Self {
        self.expose_headers = Some(headers.into());
        self
    }

    /// Set `max_age`
    pub fn max_age<M: Into<MaxAge>>(mut self, max_age: M) -> Self {
        self.max_age = Some(max_age.into());
        self
    }

    /// Set `send_origin_wildcard`
    pub fn send_origin_wildcard(mut self, send: bool) -> Self {
        self.send_origin_wildcard = Some(send);
        self
    }
}

/// The fully resolved settings used to answer one request
///
/// This is the `list of origins`, `list of methods`, `list of headers`, `list of exposed
/// headers` and `supports credentials flag` of the
/// [Resource Processing Model](https://www.w3.org/TR/cors/#resource-processing-model).
///
/// `Policy::default()` holds the defaults every unset option ends up with:
///
/// | field | default |
/// |---|---|
/// | `allow_credentials` | `false` |
/// | `allow_headers` | `*` |
/// | `allow_methods` | `GET, HEAD, POST, OPTIONS, PUT, PATCH, DELETE` |
/// | `allow_origin` | `*` |
/// | `expose_headers` | none |
/// | `max_age` | none |
/// | `send_origin_wildcard` | `true` |
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Policy {
    /// Whether credentials are allowed
    pub allow_credentials: bool,
    /// Allowed request headers
    pub allow_headers: HeaderSet,
    /// Allowed methods
    pub allow_methods: HeaderSet,
    /// Allowed origins
    pub allow_origin: AllowedOrigins,
    /// Exposed response headers
    pub expose_headers: HeaderSet,
    /// Preflight cache duration in seconds
    pub max_age: Option<u64>,
    /// Answer wildcard matches with `*`
    pub send_origin_wildcard: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            allow_credentials: false,
            allow_headers: HeaderSet::from("*"),
            allow_methods: HeaderSet::from(DEFAULT_ALLOW_METHODS),
            allow_origin: AllowedOrigins::all(),
            expose_headers: HeaderSet::from(DEFAULT_EXPOSE_HEADERS),
            max_age: None,
            send_origin_wildcard: true,
        }
    }
}

impl Policy {
    /// Merges explicit options with the application's configured options.
    ///
    /// Every field takes the explicit value if set, then the configured one, then the default.
    pub fn resolve(explicit: &CorsOptions, configured: &CorsOptions) -> Policy {
        let defaults = Policy::default();

        Policy {
            allow_credentials: explicit
                .allow_credentials
                .or(configured.allow_credentials)
                .unwrap_or(defaults.allow_credentials),
            allow_headers: pick(&explicit.allow_headers, &configured.allow_headers)
                .unwrap_or(defaults.allow_headers),
            allow_methods: pick(&explicit.allow_methods, &configured.allow_methods)
                .unwrap_or(defaults.allow_methods),
            allow_origin: pick(&explicit.allow_origin, &configured.allow_origin)
                .unwrap_or(defaults.allow_origin),
            expose_headers: pick(&explicit.expose_headers, &configured.expose_headers)
                .unwrap_or(defaults.expose_headers),
            max_age: explicit
                .max_age
                .or(configured.max_age)
                .map(MaxAge::as_secs)
                .or(defaults.max_age),
            send_origin_wildcard: explicit
                .send_origin_wildcard
                .or(configured.send_origin_wildcard)
                .unwrap_or(defaults.send_origin_wildcard),
        }
    }

    /// Whether this policy allows credentials for any origin, which CORS forbids
    pub fn is_credentialed_wildcard(&self) -> bool {
        self.allow_origin.is_any() && self.allow_credentials
    }
}

fn pick<T: Clone>(explicit: &Option<T>, configured: &Option<T>) -> Option<T> {
    explicit.as_ref().or(configured.as_ref()).cloned()
}
