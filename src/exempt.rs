//! Routes exempt from the CORS fairings
//!
//! Exemptions are registration time metadata: [`CorsExempt::mount_exempt`] mounts routes like
//! [`Rocket::mount`] and records them in a managed registry. The fairings consult the registry
//! before routing, to skip the websocket origin check, and after routing, to leave the response
//! of an exempt route alone.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use rocket::http::uri::Origin;
use rocket::http::{MediaType, Method};
use rocket::{Build, Request, Rocket, Route};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Static(String),
    Dynamic,
    Trailing,
}

impl Segment {
    fn parse(segment: &str) -> Self {
        if segment.starts_with('<') && segment.ends_with("..>") {
            Segment::Trailing
        } else if segment.starts_with('<') && segment.ends_with('>') {
            Segment::Dynamic
        } else {
            Segment::Static(segment.to_string())
        }
    }
}

/// A mounted exempt route
#[derive(Clone, Debug, PartialEq)]
struct ExemptRoute {
    method: Method,
    uri: String,
    rank: isize,
    format: Option<MediaType>,
    path: Vec<Segment>,
}

impl ExemptRoute {
    fn new(route: &Route) -> Self {
        ExemptRoute {
            method: route.method,
            uri: route.uri.as_str().to_string(),
            rank: route.rank,
            format: route.format.clone(),
            path: route
                .uri
                .path()
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(Segment::parse)
                .collect(),
        }
    }

    fn is(&self, route: &Route) -> bool {
        self.method == route.method
            && self.rank == route.rank
            && self.uri == route.uri.as_str()
            && self.format == route.format
    }

    /// Whether the method and path of `request` fit this route. Queries and formats are not
    /// looked at, so the route may still forward.
    fn may_serve(&self, request: &Request<'_>) -> bool {
        if self.method != request.method() {
            return false;
        }

        let mut path = request.uri().path().segments();
        for segment in &self.path {
            match *segment {
                Segment::Trailing => return true,
                Segment::Dynamic => {
                    if path.next().is_none() {
                        return false;
                    }
                }
                Segment::Static(ref value) => {
                    if path.next() != Some(value.as_str()) {
                        return false;
                    }
                }
            }
        }
        path.next().is_none()
    }
}

/// Registry of the routes mounted with [`CorsExempt::mount_exempt`]
#[derive(Debug, Default)]
pub(crate) struct ExemptRoutes(RwLock<Vec<ExemptRoute>>);

impl ExemptRoutes {
    fn extend(&self, routes: Vec<ExemptRoute>) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(routes);
    }

    /// Whether the route that handled `request` is exempt
    pub(crate) fn served(request: &Request<'_>) -> bool {
        match (request.route(), request.rocket().state::<ExemptRoutes>()) {
            (Some(route), Some(exempt)) => exempt
                .0
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .any(|known| known.is(route)),
            _ => false,
        }
    }

    /// Whether an exempt route could handle `request`, which has not been routed yet
    pub(crate) fn may_serve(request: &Request<'_>) -> bool {
        match request.rocket().state::<ExemptRoutes>() {
            Some(exempt) => exempt
                .0
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .any(|known| known.may_serve(request)),
            None => false,
        }
    }
}

/// Mounts routes the [`Cors`](crate::Cors) fairings leave alone.
///
/// Neither CORS headers nor the websocket origin check of the fairings are applied to exempt
/// routes. Per-route wrappers such as [`route_cors`](crate::route_cors) still apply.
///
/// ```rust,no_run
/// #[macro_use]
/// extern crate rocket;
///
/// use rocket_cors_policy::{Cors, CorsExempt};
///
/// #[get("/health")]
/// fn health() -> &'static str {
///     "OK"
/// }
///
/// #[launch]
/// fn rocket() -> _ {
///     rocket::build()
///         .mount_exempt("/", routes![health])
///         .attach(Cors::default())
/// }
/// ```
pub trait CorsExempt {
    /// Mounts `routes` at `base` like [`Rocket::mount`] and exempts them from the fairings
    fn mount_exempt<'a, B, R>(self, base: B, routes: R) -> Self
    where
        B: TryInto<Origin<'a>> + Clone + fmt::Display,
        B::Error: fmt::Display,
        R: Into<Vec<Route>>;
}

impl CorsExempt for Rocket<Build> {
    fn mount_exempt<'a, B, R>(self, base: B, routes: R) -> Self
    where
        B: TryInto<Origin<'a>> + Clone + fmt::Display,
        B::Error: fmt::Display,
        R: Into<Vec<Route>>,
    {
        let mounted = self.routes().count();
        let rocket = self.mount(base, routes);
        let exempt: Vec<ExemptRoute> = rocket.routes().skip(mounted).map(ExemptRoute::new).collect();

        let rocket = if rocket.state::<ExemptRoutes>().is_some() {
            rocket
        } else {
            rocket.manage(ExemptRoutes::default())
        };
        if let Some(registry) = rocket.state::<ExemptRoutes>() {
            log::debug!("Exempting {} routes from CORS fairings", exempt.len());
            registry.extend(exempt);
        }
        rocket
    }
}

#[cfg(test)]
mod tests {
    use rocket::local::blocking::Client;
    use rocket::route::{BoxFuture, Outcome};
    use rocket::Data;

    use super::*;

    fn ok<'r>(request: &'r Request<'_>, _: Data<'r>) -> BoxFuture<'r> {
        Outcome::from(request, "ok").pin()
    }

    fn exempt(route: Route) -> ExemptRoute {
        ExemptRoute::new(&route)
    }

    #[test]
    fn segments_are_parsed() {
        let route = exempt(Route::new(Method::Get, "/a/<b>/<c..>", ok));
        assert_eq!(
            route.path,
            vec![
                Segment::Static("a".to_string()),
                Segment::Dynamic,
                Segment::Trailing
            ]
        );
        assert!(exempt(Route::new(Method::Get, "/", ok)).path.is_empty());
    }

    #[test]
    fn paths_are_matched_before_routing() {
        let client = not_err!(Client::untracked(rocket::build()));
        let static_route = exempt(Route::new(Method::Get, "/health", ok));
        let dynamic = exempt(Route::new(Method::Get, "/x/<id>", ok));
        let trailing = exempt(Route::new(Method::Get, "/files/<path..>", ok));

        assert!(static_route.may_serve(client.get("/health").inner()));
        assert!(!static_route.may_serve(client.get("/health/more").inner()));
        assert!(!static_route.may_serve(client.post("/health").inner()));

        assert!(dynamic.may_serve(client.get("/x/1").inner()));
        assert!(!dynamic.may_serve(client.get("/x").inner()));
        assert!(!dynamic.may_serve(client.get("/y/1").inner()));

        assert!(trailing.may_serve(client.get("/files").inner()));
        assert!(trailing.may_serve(client.get("/files/a/b").inner()));
    }

    #[test]
    fn mounted_routes_are_registered_with_their_base() {
        let rocket = rocket::build()
            .mount("/", vec![Route::new(Method::Get, "/plain", ok)])
            .mount_exempt("/api", vec![Route::new(Method::Get, "/health", ok)])
            .mount_exempt("/", vec![Route::new(Method::Post, "/hook", ok)]);

        let registry = rocket.state::<ExemptRoutes>().expect("to be managed");
        let uris: Vec<String> = registry
            .0
            .read()
            .expect("not poisoned")
            .iter()
            .map(|route| route.uri.clone())
            .collect();
        assert_eq!(uris, vec!["/api/health".to_string(), "/hook".to_string()]);
    }
}
