//! Cross-origin resource sharing (CORS) policies for [Rocket](https://rocket.rs/) applications
//!
//! CORS can be attached at three levels, from the most to the least specific:
//!
//! - individual routes, with [`route_cors`] or [`RouteCors`];
//! - all routes under a mount base, with a scoped fairing, [`Cors::scoped`];
//! - the whole application, with the [`Cors`] fairing.
//!
//! Every CORS response is produced exactly once: whichever attachment handles a request first
//! wins and the others leave the response alone.
//!
//! Websocket handshakes get an origin check instead of CORS headers, with [`websocket_cors`]
//! on individual routes or automatically by the fairing. Routes mounted with
//! [`CorsExempt::mount_exempt`] are ignored by the fairings.
//!
//! ## Requirements
//!
//! - Rocket >= 0.5
//!
//! ## Installation
//!
//! Add the following to Cargo.toml:
//!
//! ```toml
//! rocket_cors_policy = "0.1.0"
//! ```
//!
//! ## Usage
//!
//! Each of the examples can be run off the repository via `cargo run --example xxx` where `xxx` is
//!
//! - `fairing`
//! - `route`
//! - `mix`
//!
//! ### `CorsOptions`
//!
//! All attachments take a [`CorsOptions`], where every field is optional:
//!
//! | field | meaning | default |
//! |---|---|---|
//! | `allow_credentials` | send `Access-Control-Allow-Credentials: true` | `false` |
//! | `allow_headers` | request headers a preflight may ask for | `*` |
//! | `allow_methods` | methods a preflight may ask for | `GET, HEAD, POST, OPTIONS, PUT, PATCH, DELETE` |
//! | `allow_origin` | origins that may make requests | `*` |
//! | `expose_headers` | response headers the client may read | none |
//! | `max_age` | how long a preflight may be cached | none |
//! | `send_origin_wildcard` | answer a wildcard match with `*` instead of the origin | `true` |
//!
//! Origins are either the wildcard `*`, exact strings compared byte for byte, or regular
//! expressions matched from the start of the origin (see [`OriginPattern`]).
//!
//! Fields left unset fall back to the application's configuration, then to the defaults above.
//! Allowing credentials for the wildcard origin is forbidden by CORS, and requests covered by
//! such a policy fail with `500 Internal Server Error`.
//!
//! ### Configuration
//!
//! The application configuration is read from Rocket's figment with the `cors_` keys listed in
//! [`config`], so it can be set in `Rocket.toml`:
//!
//! ```toml
//! [default]
//! cors_allow_origin = ["https://www.acme.com", "/^https://.*\\.acme\\.dev$/"]
//! cors_allow_credentials = true
//! ```
//!
//! or with environment variables like `ROCKET_CORS_MAX_AGE=3600`. The configuration lives in
//! managed state as a [`CorsConfig`] and can be changed at runtime.
//!
//! ### Fairing
//!
//! ```rust,no_run
//! #[macro_use]
//! extern crate rocket;
//!
//! use rocket_cors_policy::{Cors, CorsOptions};
//!
//! #[get("/")]
//! fn cors() -> &'static str {
//!     "Hello CORS"
//! }
//!
//! #[launch]
//! fn rocket() -> _ {
//!     let options = CorsOptions::default()
//!         .allow_origin("https://www.acme.com")
//!         .allow_methods(&["GET", "POST"][..])
//!         .allow_credentials(true);
//!
//!     rocket::build()
//!         .mount("/", routes![cors])
//!         .attach(Cors::new(options))
//! }
//! ```
//!
//! ### Routes
//!
//! ```rust,no_run
//! #[macro_use]
//! extern crate rocket;
//!
//! use rocket_cors_policy::{route_cors, CorsConfig, CorsExempt, CorsOptions};
//!
//! #[get("/")]
//! fn cors() -> &'static str {
//!     "Hello CORS"
//! }
//!
//! #[get("/internal")]
//! fn internal() -> &'static str {
//!     "No CORS"
//! }
//!
//! #[launch]
//! fn rocket() -> _ {
//!     let options = CorsOptions::default().allow_origin("https://www.acme.com");
//!
//!     rocket::build()
//!         .mount("/", route_cors(options, routes![cors]))
//!         .mount_exempt("/", routes![internal])
//!         .attach(CorsConfig::fairing())
//! }
//! ```

#![deny(
    missing_docs,
    non_camel_case_types,
    non_upper_case_globals,
    overflowing_literals,
    path_statements,
    unconditional_recursion,
    unused_must_use,
    unused_parens,
    while_true
)]
#![doc(test(attr(allow(unused_variables))))]

#[cfg(test)]
#[macro_use]
mod test_macros;

pub mod config;
mod engine;
mod exempt;
mod fairing;
pub mod headers;
mod origin;
mod policy;
mod route;

use std::error;
use std::fmt;

use rocket::http::Status;
use rocket::request::Request;
use rocket::response;

pub use crate::config::CorsConfig;
pub use crate::engine::{
    apply_cors, guard_websocket, is_websocket_handshake, Decision, Handshake, Preflight,
    RequestContext, ResponseHandle, TrackedResponse,
};
pub use crate::exempt::CorsExempt;
pub use crate::fairing::{cors, Cors};
pub use crate::headers::HeaderSet;
pub use crate::origin::{match_origin, AllowedOrigins, OriginPattern};
pub use crate::policy::{CorsOptions, MaxAge, Policy, DEFAULT_ALLOW_METHODS};
pub use crate::route::{route_cors, websocket_cors, RouteCors, WebsocketCors};

/// Errors during operations
///
/// Errors raised while answering a request are turned into an error status by the route
/// wrappers and the fairing. Because they come from the CORS policy itself, no CORS headers are
/// added to these responses and browsers will not show the status code to the requesting page.
#[derive(Debug)]
pub enum Error {
    /// Credentials are allowed, but the Origin is set to "*". This is not allowed by W3C
    ///
    /// This is a misconfiguration. Check the documentation for `CorsOptions`.
    CredentialsWithWildcardOrigin,
    /// An origin regular expression could not be compiled
    BadOriginPattern(regex::Error),
    /// A max age is negative or not a number
    InvalidMaxAge(String),
    /// The `cors_` configuration values could not be extracted
    Config(rocket::figment::Error),
}

impl Error {
    /// The HTTP status a request failing with this error is answered with
    pub fn status(&self) -> Status {
        match *self {
            Error::CredentialsWithWildcardOrigin
            | Error::BadOriginPattern(_)
            | Error::InvalidMaxAge(_)
            | Error::Config(_) => Status::InternalServerError,
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::BadOriginPattern(ref e) => Some(e),
            Error::Config(ref e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::CredentialsWithWildcardOrigin => write!(
                f,
                "Credentials are allowed, but the Origin is set to \"*\". \
                 This is not allowed by W3C"
            ),
            Error::BadOriginPattern(ref e) => write!(f, "Invalid origin pattern: {}", e),
            Error::InvalidMaxAge(ref value) => {
                write!(f, "Invalid max age {:?}: expected a non-negative number of seconds", value)
            }
            Error::Config(ref e) => write!(f, "Invalid CORS configuration: {}", e),
        }
    }
}

impl From<regex::Error> for Error {
    fn from(error: regex::Error) -> Self {
        Error::BadOriginPattern(error)
    }
}

impl From<rocket::figment::Error> for Error {
    fn from(error: rocket::figment::Error) -> Self {
        Error::Config(error)
    }
}

impl<'r, 'o: 'r> response::Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> Result<response::Response<'o>, Status> {
        log::error!("CORS Error: {}", self);
        Err(self.status())
    }
}
