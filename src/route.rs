//! Per-route CORS: handler wrappers for regular routes and websocket routes
//!
//! Each wrapper replaces the [`Handler`] of the routes it is given, so the result can be
//! mounted like any other list of routes:
//!
//! ```rust,no_run
//! #[macro_use]
//! extern crate rocket;
//!
//! use rocket_cors_policy::{route_cors, CorsOptions};
//!
//! #[get("/")]
//! fn cors() -> &'static str {
//!     "Hello CORS"
//! }
//!
//! #[launch]
//! fn rocket() -> _ {
//!     let options = CorsOptions::default().allow_origin("https://www.acme.com");
//!     rocket::build().mount("/", route_cors(options, routes![cors]))
//! }
//! ```

use std::collections::HashMap;

use rocket::http::{Method, Status};
use rocket::route::{Handler, Outcome, Route};
use rocket::{Data, Request, Response};

use crate::config::CorsConfig;
use crate::engine::{apply_cors, guard_websocket, Handshake, RequestContext, TrackedResponse};
use crate::headers::{HeaderSet, Origin};
use crate::origin::AllowedOrigins;
use crate::policy::{CorsOptions, Policy};

/// Adds CORS to individual routes.
///
/// Options that are not set fall back to the application's [`CorsConfig`] and then to the
/// defaults, resolved again for every request.
///
/// By default, `OPTIONS` requests to the wrapped routes' URIs are answered automatically with
/// `200 OK` and an `Allow` header listing the methods of that URI. An `OPTIONS` route is added for
/// every URI that does not have one, and wrapped `OPTIONS` routes are answered the same way.
/// Turn this off with [`RouteCors::provide_automatic_options`] to handle `OPTIONS` yourself.
#[derive(Clone, Debug)]
pub struct RouteCors {
    options: CorsOptions,
    automatic_options: bool,
}

impl RouteCors {
    /// CORS with `options`
    pub fn new(options: CorsOptions) -> Self {
        RouteCors {
            options,
            automatic_options: true,
        }
    }

    /// Whether to answer `OPTIONS` requests automatically. Defaults to `true`.
    pub fn provide_automatic_options(mut self, provide: bool) -> Self {
        self.automatic_options = provide;
        self
    }

    /// Wraps the handlers of `routes`
    pub fn wrap(&self, routes: Vec<Route>) -> Vec<Route> {
        if !self.automatic_options {
            return routes
                .into_iter()
                .map(|route| self.wrap_handler(route, None))
                .collect();
        }

        let allowed = allowed_methods(&routes);
        let mut missing: Vec<(String, isize)> = Vec::new();
        for route in &routes {
            let uri = route.uri.as_str();
            let has_options = routes
                .iter()
                .any(|other| other.method == Method::Options && other.uri.as_str() == uri);
            if !has_options && !missing.iter().any(|(known, _)| known == uri) {
                missing.push((uri.to_string(), route.rank));
            }
        }

        let mut wrapped: Vec<Route> = routes
            .into_iter()
            .map(|route| {
                let allow = match route.method {
                    Method::Options => allowed.get(route.uri.as_str()).cloned(),
                    _ => None,
                };
                self.wrap_handler(route, allow)
            })
            .collect();

        for (uri, rank) in missing {
            let allow = allowed.get(&uri).cloned().unwrap_or_default();
            log::debug!("Adding automatic OPTIONS route for {}", uri);
            wrapped.push(Route::ranked(
                rank,
                Method::Options,
                &uri,
                CorsHandler {
                    options: self.options.clone(),
                    target: Target::AutomaticOptions(allow),
                },
            ));
        }

        wrapped
    }

    fn wrap_handler(&self, mut route: Route, automatic_allow: Option<String>) -> Route {
        let target = match automatic_allow {
            Some(allow) => Target::AutomaticOptions(allow),
            None => Target::Handler(route.handler.clone()),
        };
        route.handler = Box::new(CorsHandler {
            options: self.options.clone(),
            target,
        });
        route
    }
}

/// Wraps `routes` with [`RouteCors`] and automatic `OPTIONS` handling
pub fn route_cors(options: CorsOptions, routes: Vec<Route>) -> Vec<Route> {
    RouteCors::new(options).wrap(routes)
}

/// The `Allow` header value for every URI in `routes`
fn allowed_methods(routes: &[Route]) -> HashMap<String, String> {
    let mut methods: HashMap<&str, HeaderSet> = HashMap::new();
    for route in routes {
        let set = methods.entry(route.uri.as_str()).or_default();
        let _ = set.insert(route.method.as_str());
        if route.method == Method::Get {
            let _ = set.insert(Method::Head.as_str());
        }
    }

    methods
        .into_iter()
        .map(|(uri, mut set)| {
            let _ = set.insert(Method::Options.as_str());
            (uri.to_string(), set.to_header_value())
        })
        .collect()
}

#[derive(Clone)]
enum Target {
    Handler(Box<dyn Handler>),
    /// Answer with `200 OK` and this `Allow` header
    AutomaticOptions(String),
}

#[derive(Clone)]
struct CorsHandler {
    options: CorsOptions,
    target: Target,
}

#[rocket::async_trait]
impl Handler for CorsHandler {
    async fn handle<'r>(&self, request: &'r Request<'_>, data: Data<'r>) -> Outcome<'r> {
        let mut response = match self.target {
            Target::Handler(ref handler) => match handler.handle(request, data).await {
                Outcome::Success(response) => response,
                other => return other,
            },
            Target::AutomaticOptions(ref allow) => {
                log::info!("Answering OPTIONS {} automatically", request.uri());
                Response::build()
                    .status(Status::Ok)
                    .raw_header("Allow", allow.clone())
                    .finalize()
            }
        };

        let ctx = RequestContext::from_request(request);
        let policy = Policy::resolve(&self.options, &CorsConfig::for_request(request));
        let result = {
            let mut tracked = TrackedResponse::new(request, &mut response);
            apply_cors(&ctx, &policy, &mut tracked)
        };

        match result {
            Ok(()) => Outcome::Success(response),
            Err(e) => {
                log::error!("CORS Error: {}", e);
                Outcome::Error(e.status())
            }
        }
    }
}

/// Checks the origin of websocket handshakes on individual routes.
///
/// A handshake whose `Origin` is missing or not allowed fails with `400 Bad Request` before the
/// route's handler runs. Unset options fall back to the application's [`CorsConfig`].
#[derive(Clone, Debug, Default)]
pub struct WebsocketCors {
    options: CorsOptions,
}

impl WebsocketCors {
    /// Origins from the configuration or the default, which allows any origin
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the allowed origins
    pub fn allow_origin<O: Into<AllowedOrigins>>(mut self, origins: O) -> Self {
        self.options.allow_origin = Some(origins.into());
        self
    }

    /// Set `send_origin_wildcard`
    pub fn send_origin_wildcard(mut self, send: bool) -> Self {
        self.options.send_origin_wildcard = Some(send);
        self
    }

    /// Wraps the handlers of `routes`
    pub fn wrap(&self, routes: Vec<Route>) -> Vec<Route> {
        routes
            .into_iter()
            .map(|mut route| {
                route.handler = Box::new(WebsocketHandler {
                    options: self.options.clone(),
                    handler: route.handler.clone(),
                });
                route
            })
            .collect()
    }
}

/// Wraps websocket `routes` with a [`WebsocketCors`] allowing `allow_origin`
pub fn websocket_cors<O: Into<AllowedOrigins>>(allow_origin: O, routes: Vec<Route>) -> Vec<Route> {
    WebsocketCors::new().allow_origin(allow_origin).wrap(routes)
}

#[derive(Clone)]
struct WebsocketHandler {
    options: CorsOptions,
    handler: Box<dyn Handler>,
}

#[rocket::async_trait]
impl Handler for WebsocketHandler {
    async fn handle<'r>(&self, request: &'r Request<'_>, data: Data<'r>) -> Outcome<'r> {
        let policy = Policy::resolve(&self.options, &CorsConfig::for_request(request));
        let origin = Origin::from_request_sync(request).succeeded();

        match guard_websocket(origin.as_deref(), &policy) {
            Handshake::Allow => self.handler.handle(request, data).await,
            Handshake::Reject => {
                log::info!("Rejecting websocket handshake from origin {:?}", origin);
                Outcome::Error(Status::BadRequest)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rocket::route::BoxFuture;

    use super::*;

    fn ok<'r>(request: &'r Request<'_>, _: Data<'r>) -> BoxFuture<'r> {
        Outcome::from(request, "ok").pin()
    }

    fn route(method: Method, uri: &str) -> Route {
        Route::new(method, uri, ok)
    }

    #[test]
    fn allow_header_lists_uri_methods() {
        let routes = vec![
            route(Method::Get, "/a"),
            route(Method::Post, "/a"),
            route(Method::Delete, "/b"),
        ];
        let allowed = allowed_methods(&routes);

        assert_eq!(allowed["/a"], "GET, HEAD, POST, OPTIONS");
        assert_eq!(allowed["/b"], "DELETE, OPTIONS");
    }

    #[test]
    fn options_routes_are_added_once_per_uri() {
        let routes = route_cors(
            CorsOptions::default(),
            vec![
                route(Method::Get, "/a"),
                route(Method::Post, "/a"),
                route(Method::Get, "/b"),
                route(Method::Options, "/b"),
            ],
        );

        let options: Vec<&str> = routes
            .iter()
            .filter(|route| route.method == Method::Options)
            .map(|route| route.uri.as_str())
            .collect();
        assert_eq!(options, vec!["/b", "/a"]);
        assert_eq!(routes.len(), 5);
    }

    #[test]
    fn no_options_routes_without_automatic_options() {
        let routes = RouteCors::new(CorsOptions::default())
            .provide_automatic_options(false)
            .wrap(vec![route(Method::Get, "/a")]);

        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].method, Method::Get);
    }
}
