//! The CORS decision engine
//!
//! Everything here is independent of how the CORS options were attached to the application:
//! the route wrappers and the fairing both build a [`RequestContext`], resolve a [`Policy`] and
//! hand a [`TrackedResponse`] to [`apply_cors`].

use std::sync::atomic::{AtomicBool, Ordering};

use rocket::http::Method;
use rocket::Request;

use crate::headers::{AccessControlRequestHeaders, AccessControlRequestMethod, HeaderSet, Origin};
use crate::origin::match_origin;
use crate::policy::Policy;
use crate::Error;

/// The CORS relevant parts of a request
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestContext {
    /// The `Origin` header, verbatim
    pub origin: Option<String>,
    /// The request method
    pub method: Method,
    /// The `Access-Control-Request-Method` header, if present and not blank
    pub request_method: Option<String>,
    /// All `Access-Control-Request-Headers` values merged into one set
    pub request_headers: Option<HeaderSet>,
}

impl RequestContext {
    /// Reads the CORS headers of `request`
    pub fn from_request(request: &Request<'_>) -> Self {
        RequestContext {
            origin: Origin::from_request_sync(request)
                .succeeded()
                .map(|origin| origin.0),
            method: request.method(),
            request_method: AccessControlRequestMethod::from_request_sync(request)
                .succeeded()
                .map(|method| method.0),
            request_headers: AccessControlRequestHeaders::from_request_sync(request)
                .succeeded()
                .map(|headers| headers.0),
        }
    }

    /// Whether this looks like a preflight: an `OPTIONS` request naming the method it wants
    /// to use. Whether the preflight succeeds depends on the policy's allowed methods.
    pub fn is_preflight(&self) -> bool {
        self.method == Method::Options && self.request_method.is_some()
    }
}

/// Headers only sent in reply to a successful preflight
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Preflight {
    /// `Access-Control-Allow-Headers`
    pub allow_headers: HeaderSet,
    /// `Access-Control-Allow-Methods`
    pub allow_methods: HeaderSet,
    /// `Access-Control-Max-Age`
    pub max_age: Option<u64>,
}

/// The CORS headers to put on one response.
///
/// A `Decision` is computed without touching the response. Use [`Decision::merge`] to write it
/// out, or [`apply_cors`] to do both while keeping track of responses that were already handled.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decision {
    /// `Access-Control-Allow-Origin`. When `None`, no CORS headers are sent.
    pub allow_origin: Option<String>,
    /// Sends `Access-Control-Allow-Credentials: true`
    pub allow_credentials: bool,
    /// `Access-Control-Expose-Headers`
    pub expose_headers: HeaderSet,
    /// Set when the request is a preflight the policy allows
    pub preflight: Option<Preflight>,
}

impl Decision {
    /// Decides how to answer the request described by `ctx`.
    ///
    /// Fails when the policy allows credentials for any origin, whatever the request is.
    pub fn new(ctx: &RequestContext, policy: &Policy) -> Result<Self, Error> {
        if policy.is_credentialed_wildcard() {
            return Err(Error::CredentialsWithWildcardOrigin);
        }

        let allow_origin = match_origin(
            ctx.origin.as_deref(),
            &policy.allow_origin,
            policy.send_origin_wildcard,
        );

        let preflight = match allow_origin {
            Some(_) => Self::preflight(ctx, policy),
            None => None,
        };

        Ok(Decision {
            allow_origin,
            allow_credentials: policy.allow_credentials,
            expose_headers: policy.expose_headers.clone(),
            preflight,
        })
    }

    fn preflight(ctx: &RequestContext, policy: &Policy) -> Option<Preflight> {
        if !ctx.is_preflight() {
            return None;
        }
        let method = ctx.request_method.as_deref()?;
        if !(policy.allow_methods.is_wildcard() || policy.allow_methods.contains(method)) {
            return None;
        }

        let requested = ctx.request_headers.clone().unwrap_or_default();
        let allow_headers = if policy.allow_headers.is_wildcard() {
            requested
        } else {
            policy.allow_headers.intersect(&requested)
        };

        Some(Preflight {
            allow_headers,
            allow_methods: policy.allow_methods.clone(),
            max_age: policy.max_age,
        })
    }

    /// Whether `Origin` has to be added to `Vary`
    pub fn vary_origin(&self) -> bool {
        self.allow_origin.as_deref() != Some("*")
    }

    /// Writes the headers to `response`
    pub fn merge<R: ResponseHandle + ?Sized>(&self, response: &mut R) {
        if let Some(ref origin) = self.allow_origin {
            response.set_header("Access-Control-Allow-Origin", origin.clone());

            if self.allow_credentials {
                response.set_header("Access-Control-Allow-Credentials", "true".to_string());
            } else {
                response.remove_header("Access-Control-Allow-Credentials");
            }

            if !self.expose_headers.is_empty() {
                response.set_header(
                    "Access-Control-Expose-Headers",
                    self.expose_headers.to_header_value(),
                );
            } else {
                response.remove_header("Access-Control-Expose-Headers");
            }

            if let Some(ref preflight) = self.preflight {
                if !preflight.allow_headers.is_empty() {
                    response.set_header(
                        "Access-Control-Allow-Headers",
                        preflight.allow_headers.to_header_value(),
                    );
                }
                if !preflight.allow_methods.is_empty() {
                    response.set_header(
                        "Access-Control-Allow-Methods",
                        preflight.allow_methods.to_header_value(),
                    );
                }
                if let Some(max_age) = preflight.max_age {
                    response.set_header("Access-Control-Max-Age", max_age.to_string());
                }
            }
        }

        if self.vary_origin() {
            response.add_vary("Origin");
        }
    }
}

/// A response the engine can write CORS headers to.
///
/// Besides the headers, a handle remembers whether CORS was already applied to the response so
/// that only the first of several attachments covering a request has an effect.
pub trait ResponseHandle {
    /// Replace the header `name` with `value`
    fn set_header(&mut self, name: &'static str, value: String);

    /// Remove every value of the header `name`
    fn remove_header(&mut self, name: &str);

    /// All values of the header `name`
    fn header_values(&self, name: &str) -> Vec<String>;

    /// Whether CORS was already applied to this response
    fn cors_applied(&self) -> bool;

    /// Remember that CORS was applied
    fn mark_cors_applied(&mut self);

    /// Adds `token` to the `Vary` header, keeping what is already there.
    fn add_vary(&mut self, token: &str) {
        let mut vary: HeaderSet = self
            .header_values("Vary")
            .iter()
            .flat_map(|value| value.split(','))
            .map(|token| token.trim().to_string())
            .collect();

        if vary.insert(token) {
            self.set_header("Vary", vary.to_header_value());
        }
    }
}

/// Request local flag telling that CORS was applied to the response of this request
#[derive(Debug, Default)]
pub(crate) struct AppliedMarker(AtomicBool);

impl AppliedMarker {
    pub(crate) fn of<'a>(request: &'a Request<'_>) -> &'a AppliedMarker {
        request.local_cache(AppliedMarker::default)
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// A Rocket response together with its request's [`AppliedMarker`]
pub struct TrackedResponse<'a, 'r> {
    response: &'a mut rocket::Response<'r>,
    marker: &'a AppliedMarker,
}

impl<'a, 'r> TrackedResponse<'a, 'r> {
    /// Track `response`, the response to `request`
    pub fn new(request: &'a Request<'_>, response: &'a mut rocket::Response<'r>) -> Self {
        TrackedResponse {
            response,
            marker: AppliedMarker::of(request),
        }
    }
}

impl<'a, 'r> ResponseHandle for TrackedResponse<'a, 'r> {
    fn set_header(&mut self, name: &'static str, value: String) {
        let _ = self.response.set_raw_header(name, value);
    }

    fn remove_header(&mut self, name: &str) {
        self.response.remove_header(name);
    }

    fn header_values(&self, name: &str) -> Vec<String> {
        self.response
            .headers()
            .get(name)
            .map(|value| value.to_string())
            .collect()
    }

    fn cors_applied(&self) -> bool {
        self.marker.is_set()
    }

    fn mark_cors_applied(&mut self) {
        self.marker.set();
    }
}

/// Applies `policy` to `response`.
///
/// A policy that allows credentials for any origin is an error, reported before anything is
/// written. A response that already had CORS applied is left alone. Otherwise the
/// [`Decision`] is merged into the response and the response is marked, even when the origin
/// was not allowed.
pub fn apply_cors<R: ResponseHandle + ?Sized>(
    ctx: &RequestContext,
    policy: &Policy,
    response: &mut R,
) -> Result<(), Error> {
    let decision = Decision::new(ctx, policy)?;

    if response.cors_applied() {
        log::debug!("CORS already applied, skipping");
        return Ok(());
    }

    log::debug!(
        "CORS decision for origin {:?}: allow origin {:?}, preflight {}",
        ctx.origin,
        decision.allow_origin,
        decision.preflight.is_some()
    );
    decision.merge(response);
    response.mark_cors_applied();
    Ok(())
}

/// Whether a websocket handshake may proceed
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Handshake {
    /// The origin is allowed
    Allow,
    /// The origin is missing or not allowed. Answered with `400 Bad Request`.
    Reject,
}

/// Checks the origin of a websocket handshake against the policy's allowed origins
pub fn guard_websocket(origin: Option<&str>, policy: &Policy) -> Handshake {
    match match_origin(origin, &policy.allow_origin, policy.send_origin_wildcard) {
        Some(_) => Handshake::Allow,
        None => Handshake::Reject,
    }
}

/// Whether `request` asks to be upgraded to a websocket
pub fn is_websocket_handshake(request: &Request<'_>) -> bool {
    request.headers().get("Upgrade").any(|value| {
        value
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rocket::http::Header;
    use rocket::local::blocking::Client;

    use super::*;
    use crate::origin::AllowedOrigins;
    use crate::policy::CorsOptions;

    #[derive(Debug, Default)]
    struct MockResponse {
        headers: Vec<(String, String)>,
        applied: bool,
    }

    impl MockResponse {
        fn get(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        }

        fn cors_headers(&self) -> Vec<&str> {
            self.headers
                .iter()
                .map(|(key, _)| key.as_str())
                .filter(|key| key.starts_with("Access-Control-"))
                .collect()
        }
    }

    impl ResponseHandle for MockResponse {
        fn set_header(&mut self, name: &'static str, value: String) {
            self.remove_header(name);
            self.headers.push((name.to_string(), value));
        }

        fn remove_header(&mut self, name: &str) {
            self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        }

        fn header_values(&self, name: &str) -> Vec<String> {
            self.headers
                .iter()
                .filter(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
                .collect()
        }

        fn cors_applied(&self) -> bool {
            self.applied
        }

        fn mark_cors_applied(&mut self) {
            self.applied = true;
        }
    }

    fn simple(origin: Option<&str>) -> RequestContext {
        RequestContext {
            origin: origin.map(str::to_string),
            method: Method::Get,
            request_method: None,
            request_headers: None,
        }
    }

    fn preflight(origin: &str, method: &str, headers: Option<&str>) -> RequestContext {
        RequestContext {
            origin: Some(origin.to_string()),
            method: Method::Options,
            request_method: Some(method.to_string()),
            request_headers: headers.map(|headers| headers.parse().unwrap()),
        }
    }

    fn policy(options: CorsOptions) -> Policy {
        Policy::resolve(&options, &CorsOptions::default())
    }

    #[test]
    fn simple_request_with_default_policy() {
        let mut response = MockResponse::default();
        not_err!(apply_cors(
            &simple(Some("http://example.com")),
            &Policy::default(),
            &mut response
        ));

        assert_eq!(response.get("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(response.get("Access-Control-Allow-Credentials"), None);
        assert_eq!(response.get("Access-Control-Expose-Headers"), None);
        assert_eq!(response.get("Access-Control-Allow-Methods"), None);
        assert_eq!(response.get("Vary"), None);
        assert!(response.cors_applied());
    }

    #[test]
    fn default_preflight() {
        let policy = policy(CorsOptions::default().max_age(Duration::from_secs(5)));
        let mut response = MockResponse::default();
        not_err!(apply_cors(
            &preflight("http://example.com", "DELETE", None),
            &policy,
            &mut response
        ));

        assert_eq!(response.get("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(
            response.get("Access-Control-Allow-Methods"),
            Some("GET, HEAD, POST, OPTIONS, PUT, PATCH, DELETE")
        );
        assert_eq!(response.get("Access-Control-Max-Age"), Some("5"));
        assert_eq!(response.get("Access-Control-Allow-Headers"), None);
    }

    #[test]
    fn wildcard_allow_headers_echo_the_request() {
        let mut response = MockResponse::default();
        not_err!(apply_cors(
            &preflight("http://example.com", "POST", Some("x-Custom, Content-Type")),
            &Policy::default(),
            &mut response
        ));

        assert_eq!(
            response.get("Access-Control-Allow-Headers"),
            Some("x-Custom, Content-Type")
        );
    }

    #[test]
    fn preflight_with_disallowed_method_only_gets_simple_headers() {
        let policy = policy(CorsOptions::default().allow_methods(&["GET", "POST"][..]));
        let mut response = MockResponse::default();
        not_err!(apply_cors(
            &preflight("http://example.com", "DELETE", Some("X-Special")),
            &policy,
            &mut response
        ));

        assert_eq!(response.cors_headers(), vec!["Access-Control-Allow-Origin"]);
    }

    #[test]
    fn wildcard_allow_methods_accepts_any_method() {
        let policy = policy(CorsOptions::default().allow_methods("*"));
        let decision = not_err!(Decision::new(
            &preflight("http://example.com", "PURGE", None),
            &policy
        ));
        let preflight = decision.preflight.expect("preflight headers");
        assert_eq!(preflight.allow_methods.to_header_value(), "*");
    }

    #[test]
    fn allow_headers_intersection_ignores_order_and_case() {
        let policy = policy(CorsOptions::default().allow_headers(&["X-Match", "X-Other"][..]));
        let decision = not_err!(Decision::new(
            &preflight("http://example.com", "GET", Some("X-No-Match, x-match")),
            &policy
        ));
        assert_eq!(
            decision.preflight.map(|p| p.allow_headers.to_header_value()),
            Some("X-Match".to_string())
        );

        let policy = policy_with_headers(&["X-match"]);
        let mut response = MockResponse::default();
        not_err!(apply_cors(
            &preflight("http://example.com", "GET", Some("X-Match, X-No-Match")),
            &policy,
            &mut response
        ));
        assert_eq!(response.get("Access-Control-Allow-Headers"), Some("X-match"));
    }

    fn policy_with_headers(headers: &[&str]) -> Policy {
        policy(CorsOptions::default().allow_headers(headers.to_vec()))
    }

    #[test]
    fn disjoint_allow_headers_are_not_sent() {
        let policy = policy_with_headers(&["X-Other"]);
        let mut response = MockResponse::default();
        not_err!(apply_cors(
            &preflight("http://example.com", "GET", Some("X-Match")),
            &policy,
            &mut response
        ));
        assert_eq!(response.get("Access-Control-Allow-Headers"), None);
        assert!(response.get("Access-Control-Allow-Methods").is_some());
    }

    #[test]
    fn no_origin_means_no_cors_headers() {
        let mut response = MockResponse::default();
        not_err!(apply_cors(&simple(None), &Policy::default(), &mut response));

        assert!(response.cors_headers().is_empty());
        assert_eq!(response.get("Vary"), Some("Origin"));
        assert!(response.cors_applied());
    }

    #[test]
    fn echoed_origin_varies_on_origin() {
        let policy = policy(
            CorsOptions::default()
                .allow_origin("http://example.com")
                .allow_credentials(true)
                .expose_headers(&["X-Special", "X-Other"][..]),
        );
        let mut response = MockResponse::default();
        response.set_header("Vary", "Accept-Encoding".to_string());
        not_err!(apply_cors(
            &simple(Some("http://example.com")),
            &policy,
            &mut response
        ));

        assert_eq!(
            response.get("Access-Control-Allow-Origin"),
            Some("http://example.com")
        );
        assert_eq!(response.get("Access-Control-Allow-Credentials"), Some("true"));
        assert_eq!(
            response.get("Access-Control-Expose-Headers"),
            Some("X-Special, X-Other")
        );
        assert_eq!(response.get("Vary"), Some("Accept-Encoding, Origin"));
    }

    #[test]
    fn vary_is_not_duplicated() {
        let mut response = MockResponse::default();
        response.set_header("Vary", "origin".to_string());
        response.add_vary("Origin");
        assert_eq!(response.get("Vary"), Some("origin"));
    }

    #[test]
    fn disallowed_origin_only_varies() {
        let policy = policy(CorsOptions::default().allow_origin("http://example.com"));
        let mut response = MockResponse::default();
        not_err!(apply_cors(
            &simple(Some("http://notexample.com")),
            &policy,
            &mut response
        ));

        assert!(response.cors_headers().is_empty());
        assert_eq!(response.get("Vary"), Some("Origin"));
        assert!(response.cors_applied());
    }

    #[test]
    fn apply_cors_is_idempotent() {
        let first = policy(CorsOptions::default().allow_origin("http://example.com"));
        let second = policy(CorsOptions::default().allow_methods("GET"));
        let ctx = preflight("http://example.com", "POST", None);

        let mut response = MockResponse::default();
        not_err!(apply_cors(&ctx, &first, &mut response));
        let after_first = response.headers.clone();

        not_err!(apply_cors(&ctx, &first, &mut response));
        not_err!(apply_cors(&ctx, &second, &mut response));
        assert_eq!(response.headers, after_first);
    }

    #[test]
    fn credentials_with_wildcard_fail_before_writing() {
        let policy = policy(
            CorsOptions::default()
                .allow_credentials(true)
                .send_origin_wildcard(false),
        );

        for origin in &[None, Some("http://example.com"), Some("")] {
            let mut response = MockResponse::default();
            let error = is_err!(apply_cors(&simple(*origin), &policy, &mut response));
            assert_matches!(error, Error::CredentialsWithWildcardOrigin);
            assert!(response.headers.is_empty());
            assert!(!response.cors_applied());
        }
    }

    #[test]
    fn credentials_conflict_is_reported_even_when_already_applied() {
        let policy = policy(CorsOptions::default().allow_credentials(true));
        let mut response = MockResponse::default();
        response.mark_cors_applied();

        let _ = is_err!(apply_cors(&simple(Some("http://example.com")), &policy, &mut response));
    }

    #[test]
    fn websocket_guard() {
        let policy = policy(CorsOptions::default().allow_origin("http://example.com"));
        assert_eq!(guard_websocket(Some("http://example.com"), &policy), Handshake::Allow);
        assert_eq!(guard_websocket(Some("http://evil.com"), &policy), Handshake::Reject);
        assert_eq!(guard_websocket(None, &policy), Handshake::Reject);

        let any = Policy {
            allow_origin: AllowedOrigins::all(),
            ..Default::default()
        };
        assert_eq!(guard_websocket(Some("http://evil.com"), &any), Handshake::Allow);
        assert_eq!(guard_websocket(None, &any), Handshake::Reject);
    }

    #[test]
    fn request_context_is_read_from_headers() {
        let client = not_err!(Client::tracked(rocket::build()));
        let mut request = client.options("/");
        request.add_header(Header::new("Origin", "http://example.com"));
        request.add_header(Header::new("Access-Control-Request-Method", "PUT"));
        request.add_header(Header::new("Access-Control-Request-Headers", "X-A, X-B"));

        let ctx = RequestContext::from_request(request.inner());
        assert_eq!(ctx.origin.as_deref(), Some("http://example.com"));
        assert_eq!(ctx.method, Method::Options);
        assert_eq!(ctx.request_method.as_deref(), Some("PUT"));
        assert_eq!(ctx.request_headers, Some(HeaderSet::from(&["X-A", "X-B"][..])));
        assert!(ctx.is_preflight());

        let request = client.get("/");
        let ctx = RequestContext::from_request(request.inner());
        assert_eq!(ctx, simple(None));
    }

    #[test]
    fn websocket_handshakes_are_detected() {
        let client = not_err!(Client::tracked(rocket::build()));
        let mut request = client.get("/");
        assert!(!is_websocket_handshake(request.inner()));

        request.add_header(Header::new("Upgrade", "WebSocket"));
        assert!(is_websocket_handshake(request.inner()));
    }

    #[test]
    fn tracked_responses_share_the_request_marker() {
        let client = not_err!(Client::tracked(rocket::build()));
        let request = client.get("/");
        let mut first = rocket::Response::new();
        let mut second = rocket::Response::new();

        not_err!(apply_cors(
            &simple(Some("http://example.com")),
            &Policy::default(),
            &mut TrackedResponse::new(request.inner(), &mut first)
        ));
        assert_eq!(
            first.headers().get_one("Access-Control-Allow-Origin"),
            Some("*")
        );

        let tracked = TrackedResponse::new(request.inner(), &mut second);
        assert!(tracked.cors_applied());
    }
}
