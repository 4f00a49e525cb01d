//! Application level CORS configuration
//!
//! The configuration is read from Rocket's [figment](rocket::figment), so it can come from
//! `Rocket.toml` or `ROCKET_` prefixed environment variables like any other Rocket setting:
//!
//! ```toml
//! [default]
//! cors_allow_origin = ["https://www.acme.com", "/^https://.*\\.acme\\.dev$/"]
//! cors_allow_methods = ["GET", "POST"]
//! cors_max_age = 3600
//! ```
//!
//! or `ROCKET_CORS_ALLOW_CREDENTIALS=true`.

use std::sync::{PoisonError, RwLock};

use rocket::fairing::{AdHoc, Fairing};
use rocket::figment::Figment;
use rocket::{Build, Request, Rocket};

use crate::headers::HeaderSet;
use crate::origin::AllowedOrigins;
use crate::policy::{CorsOptions, MaxAge};
use crate::Error;

/// Configuration key for `allow_credentials`
pub const ALLOW_CREDENTIALS: &str = "cors_allow_credentials";
/// Configuration key for `allow_headers`
pub const ALLOW_HEADERS: &str = "cors_allow_headers";
/// Configuration key for `allow_methods`
pub const ALLOW_METHODS: &str = "cors_allow_methods";
/// Configuration key for `allow_origin`
pub const ALLOW_ORIGIN: &str = "cors_allow_origin";
/// Configuration key for `expose_headers`
pub const EXPOSE_HEADERS: &str = "cors_expose_headers";
/// Configuration key for `max_age`
pub const MAX_AGE: &str = "cors_max_age";
/// Configuration key for `send_origin_wildcard`
pub const SEND_ORIGIN_WILDCARD: &str = "cors_send_origin_wildcard";

/// The configuration keys as they appear in a figment
#[derive(Debug, Default, serde_derive::Deserialize)]
#[serde(default)]
struct ConfigKeys {
    #[serde(rename = "cors_allow_credentials")]
    allow_credentials: Option<bool>,
    #[serde(rename = "cors_allow_headers")]
    allow_headers: Option<HeaderSet>,
    #[serde(rename = "cors_allow_methods")]
    allow_methods: Option<HeaderSet>,
    #[serde(rename = "cors_allow_origin")]
    allow_origin: Option<AllowedOrigins>,
    #[serde(rename = "cors_expose_headers")]
    expose_headers: Option<HeaderSet>,
    #[serde(rename = "cors_max_age")]
    max_age: Option<MaxAge>,
    #[serde(rename = "cors_send_origin_wildcard")]
    send_origin_wildcard: Option<bool>,
}

impl From<ConfigKeys> for CorsOptions {
    fn from(keys: ConfigKeys) -> Self {
        CorsOptions {
            allow_credentials: keys.allow_credentials,
            allow_headers: keys.allow_headers,
            allow_methods: keys.allow_methods,
            allow_origin: keys.allow_origin,
            expose_headers: keys.expose_headers,
            max_age: keys.max_age,
            send_origin_wildcard: keys.send_origin_wildcard,
        }
    }
}

/// The CORS configuration of one Rocket application, kept in managed state.
///
/// Every CORS attachment reads a fresh [`snapshot`](CorsConfig::snapshot) when it handles a
/// request, so changes made with [`update`](CorsConfig::update) or
/// [`replace`](CorsConfig::replace) apply from the next request on.
///
/// The [`Cors`](crate::Cors) fairing manages a `CorsConfig` extracted from the figment when
/// none is managed yet. Routes wrapped by [`RouteCors`](crate::RouteCors) alone can use
/// [`CorsConfig::fairing`], or you can `manage` one yourself.
///
/// ```rust
/// use rocket_cors_policy::{CorsConfig, CorsOptions};
///
/// let config = CorsConfig::new(CorsOptions::default().allow_origin("https://www.acme.com"));
/// config.update(|options| options.allow_credentials = Some(true));
/// assert_eq!(config.snapshot().allow_credentials, Some(true));
///
/// let rocket = rocket::build().manage(config);
/// ```
#[derive(Debug, Default)]
pub struct CorsConfig {
    options: RwLock<CorsOptions>,
}

impl CorsConfig {
    /// A configuration holding `options`
    pub fn new(options: CorsOptions) -> Self {
        CorsConfig {
            options: RwLock::new(options),
        }
    }

    /// Extract the `cors_*` keys from a figment.
    ///
    /// Values of the wrong type, invalid regular expressions and negative max ages are errors.
    pub fn from_figment(figment: &Figment) -> Result<Self, Error> {
        let keys: ConfigKeys = figment.extract()?;
        Ok(CorsConfig::new(keys.into()))
    }

    /// A copy of the current options
    pub fn snapshot(&self) -> CorsOptions {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the options
    pub fn replace(&self, options: CorsOptions) {
        *self
            .options
            .write()
            .unwrap_or_else(PoisonError::into_inner) = options;
    }

    /// Modify the options in place
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut CorsOptions),
    {
        let mut options = self
            .options
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut options);
    }

    /// A fairing that manages a `CorsConfig` extracted from the figment, unless one is managed
    /// already. Ignition fails when the configuration is malformed.
    pub fn fairing() -> impl Fairing {
        AdHoc::try_on_ignite("CORS Configuration", |rocket| async move { ensure_managed(rocket) })
    }

    /// The options configured for the application handling `request`, or nothing
    pub(crate) fn for_request(request: &Request<'_>) -> CorsOptions {
        request
            .rocket()
            .state::<CorsConfig>()
            .map(CorsConfig::snapshot)
            .unwrap_or_default()
    }
}

/// Manages a `CorsConfig` from the figment if there is none yet
pub(crate) fn ensure_managed(rocket: Rocket<Build>) -> Result<Rocket<Build>, Rocket<Build>> {
    if rocket.state::<CorsConfig>().is_some() {
        return Ok(rocket);
    }

    match CorsConfig::from_figment(rocket.figment()) {
        Ok(config) => Ok(rocket.manage(config)),
        Err(e) => {
            log::error!("Invalid CORS configuration: {}", e);
            Err(rocket)
        }
    }
}

#[cfg(test)]
mod tests {
    use rocket::figment::Figment;

    use super::*;

    fn base_figment() -> Figment {
        rocket::Config::figment()
    }

    #[test]
    fn empty_figment_has_no_options() {
        let config = not_err!(CorsConfig::from_figment(&base_figment()));
        assert_eq!(config.snapshot(), CorsOptions::default());
    }

    #[test]
    fn keys_are_extracted() {
        let figment = base_figment()
            .merge((ALLOW_ORIGIN, vec!["https://www.acme.com", "/^https://.*\\.acme\\.dev$/"]))
            .merge((ALLOW_METHODS, vec!["GET", "POST"]))
            .merge((ALLOW_HEADERS, "Authorization"))
            .merge((EXPOSE_HEADERS, vec!["X-Special", "X-Other"]))
            .merge((ALLOW_CREDENTIALS, true))
            .merge((MAX_AGE, 42))
            .merge((SEND_ORIGIN_WILDCARD, false));

        let options = not_err!(CorsConfig::from_figment(&figment)).snapshot();
        assert_eq!(options.allow_origin.map(|origins| origins.len()), Some(2));
        assert_eq!(options.allow_methods, Some(HeaderSet::from(&["GET", "POST"][..])));
        assert_eq!(options.allow_headers, Some(HeaderSet::from("Authorization")));
        assert_eq!(
            options.expose_headers,
            Some(HeaderSet::from(&["X-Special", "X-Other"][..]))
        );
        assert_eq!(options.allow_credentials, Some(true));
        assert_eq!(options.max_age, Some(MaxAge(42)));
        assert_eq!(options.send_origin_wildcard, Some(false));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let figment = base_figment().merge((ALLOW_CREDENTIALS, vec!["yes", "no"]));
        let error = is_err!(CorsConfig::from_figment(&figment));
        assert_matches!(error, Error::Config(_));

        let figment = base_figment().merge((ALLOW_ORIGIN, "/(unclosed/"));
        let _ = is_err!(CorsConfig::from_figment(&figment));

        let figment = base_figment().merge((MAX_AGE, -5));
        let _ = is_err!(CorsConfig::from_figment(&figment));
    }

    #[test]
    fn updates_are_visible_in_the_next_snapshot() {
        let config = CorsConfig::default();
        let before = config.snapshot();

        config.update(|options| options.allow_methods = Some(HeaderSet::from("GET")));
        assert_eq!(before.allow_methods, None);
        assert_eq!(config.snapshot().allow_methods, Some(HeaderSet::from("GET")));

        config.replace(CorsOptions::default());
        assert_eq!(config.snapshot(), CorsOptions::default());
    }

    #[test]
    fn fairing_manages_configuration() {
        let rocket = rocket::custom(base_figment().merge((ALLOW_ORIGIN, "https://www.acme.com")))
            .attach(CorsConfig::fairing());
        let client = not_err!(rocket::local::blocking::Client::tracked(rocket));

        let config = client.rocket().state::<CorsConfig>().expect("to be managed");
        assert_eq!(
            config.snapshot().allow_origin,
            Some(AllowedOrigins::some_exact(&["https://www.acme.com"]))
        );
    }

    #[test]
    fn fairing_fails_ignition_on_malformed_configuration() {
        let rocket = rocket::custom(base_figment().merge((MAX_AGE, "never")))
            .attach(CorsConfig::fairing());
        let error = rocket::local::blocking::Client::tracked(rocket)
            .err()
            .expect("ignition to fail");
        assert_matches!(error.kind(), rocket::error::ErrorKind::FailedFairings(_));
    }
}
