//! Fairing implementation
//!
//! A [`Cors`] fairing applies CORS to every response of the application, or of one of its
//! mount bases when it is [scoped](Cors::scoped).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use rocket::fairing::{self, Fairing, Info, Kind};
use rocket::http::uri::Origin;
use rocket::http::{Method, Status};
use rocket::route::{BoxFuture, Outcome};
use rocket::{Build, Data, Request, Response, Rocket, Route};

use crate::config::{ensure_managed, CorsConfig};
use crate::engine::{
    apply_cors, guard_websocket, is_websocket_handshake, Handshake, RequestContext,
    TrackedResponse,
};
use crate::exempt::ExemptRoutes;
use crate::headers;
use crate::policy::{CorsOptions, Policy};

/// Mount base of the route rejected handshakes are sent to
const FAIRING_ROUTE_BASE: &str = "/cors_fairing_error";

/// Route for Fairing error handling
fn fairing_error_route<'r>(request: &'r Request<'_>, _: Data<'r>) -> BoxFuture<'r> {
    let status = match request.param::<u16>(0) {
        Some(Ok(status)) => status,
        _ => {
            log::error!("Fairing error route called with {}", request.uri());
            500
        }
    };
    let status = Status::from_code(status).unwrap_or(Status::InternalServerError);
    Outcome::Error(status).pin()
}

/// Create a new `Route` for Fairing handling
fn fairing_route() -> Route {
    Route::ranked(isize::MIN, Method::Get, "/<status>", fairing_error_route)
}

/// Modifies a `Request` to route to Fairing error handler
fn route_to_fairing_error_handler(status: Status, request: &mut Request<'_>) {
    match Origin::parse_owned(format!("{}/{}", FAIRING_ROUTE_BASE, status.code)) {
        Ok(uri) => {
            request.set_method(Method::Get);
            request.set_uri(uri);
        }
        Err(e) => log::error!("Invalid fairing error route: {}", e),
    }
}

/// Request local flag for handshakes rejected before routing
#[derive(Debug, Default)]
struct Rejected(AtomicBool);

impl Rejected {
    fn of<'a>(request: &'a Request<'_>) -> &'a Rejected {
        request.local_cache(Rejected::default)
    }

    fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Mount bases with a scoped `Cors` fairing attached
#[derive(Debug, Default)]
pub(crate) struct Scopes(RwLock<Vec<String>>);

impl Scopes {
    fn register(&self, base: &str) {
        let mut bases = self.0.write().unwrap_or_else(PoisonError::into_inner);
        if !bases.iter().any(|known| known == base) {
            bases.push(base.to_string());
        }
    }

    /// The most specific registered base covering `path`
    fn owner(&self, path: &str) -> Option<String> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|base| covers(base, path))
            .max_by_key(|base| base.len())
            .cloned()
    }
}

fn covers(base: &str, path: &str) -> bool {
    base == "/"
        || path == base
        || (path.starts_with(base) && path[base.len()..].starts_with('/'))
}

/// Normalizes a mount base to start with a `/` and not end with one
fn normalize_base(base: &str) -> String {
    let trimmed = base.trim_matches('/');
    format!("/{}", trimmed)
}

/// CORS for a whole application, or for the routes under one mount base.
///
/// Options that are not set fall back to the application's [`CorsConfig`] and then to the
/// defaults. The configuration is extracted from Rocket's figment when the fairing ignites,
/// unless a `CorsConfig` is already managed; a malformed configuration aborts ignition.
///
/// When several CORS attachments cover a request, only the first one to handle it has an
/// effect. A per-route wrapper runs before any fairing. A scoped fairing handles the requests
/// under its base, and an application wide fairing handles the requests no scope covers.
///
/// Besides CORS headers, the fairing checks the `Origin` of websocket handshakes before routing
/// and answers `400 Bad Request` without running any handler when the origin is not allowed.
/// Routes mounted with [`CorsExempt::mount_exempt`](crate::CorsExempt::mount_exempt) are
/// skipped entirely.
///
/// `OPTIONS` requests that do not match any route get a `204 No Content` response when CORS
/// headers were sent, so that preflights succeed without `OPTIONS` routes.
///
/// ```rust,no_run
/// #[macro_use]
/// extern crate rocket;
///
/// use rocket_cors_policy::{Cors, CorsOptions};
///
/// #[get("/")]
/// fn index() -> &'static str {
///     "Hello CORS"
/// }
///
/// #[launch]
/// fn rocket() -> _ {
///     rocket::build()
///         .mount("/", routes![index])
///         .mount("/api", routes![index])
///         .attach(Cors::new(CorsOptions::default()))
///         .attach(Cors::new(CorsOptions::default().allow_origin("https://www.acme.com")).scoped("/api"))
/// }
/// ```
#[derive(Clone, Debug, Default)]
pub struct Cors {
    options: CorsOptions,
    base: Option<String>,
}

impl Cors {
    /// An application wide fairing with `options`
    pub fn new(options: CorsOptions) -> Self {
        Cors {
            options,
            base: None,
        }
    }

    /// Restrict the fairing to requests under the mount base `base`
    pub fn scoped(mut self, base: &str) -> Self {
        self.base = Some(normalize_base(base));
        self
    }

    /// Whether this fairing is responsible for `request`
    fn handles(&self, request: &Request<'_>) -> bool {
        let path = request.uri().path();
        let owner = request
            .rocket()
            .state::<Scopes>()
            .and_then(|scopes| scopes.owner(path.as_str()));
        owner.as_deref() == self.base.as_deref()
    }
}

/// An application wide [`Cors`] fairing with `options`
pub fn cors(options: CorsOptions) -> Cors {
    Cors::new(options)
}

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Ignite | Kind::Request | Kind::Response,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> fairing::Result {
        let rocket = ensure_managed(rocket)?;
        let rocket = if rocket.state::<Scopes>().is_some() {
            rocket
        } else {
            rocket
                .manage(Scopes::default())
                .mount(FAIRING_ROUTE_BASE, vec![fairing_route()])
        };

        if let (Some(base), Some(scopes)) = (self.base.as_deref(), rocket.state::<Scopes>()) {
            log::info!("CORS scoped to {}", base);
            scopes.register(base);
        }
        Ok(rocket)
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        if !is_websocket_handshake(request)
            || Rejected::of(request).is_set()
            || !self.handles(request)
            || ExemptRoutes::may_serve(request)
        {
            return;
        }

        let policy = Policy::resolve(&self.options, &CorsConfig::for_request(request));
        let origin = headers::Origin::from_request_sync(request).succeeded();
        if guard_websocket(origin.as_deref(), &policy) == Handshake::Reject {
            log::info!("Rejecting websocket handshake from origin {:?}", origin);
            Rejected::of(request).set();
            route_to_fairing_error_handler(Status::BadRequest, request);
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        if Rejected::of(request).is_set()
            || !self.handles(request)
            || ExemptRoutes::served(request)
        {
            return;
        }

        let ctx = RequestContext::from_request(request);
        let policy = Policy::resolve(&self.options, &CorsConfig::for_request(request));

        if is_websocket_handshake(request) {
            // Reached when an exempt route forwarded the handshake to one that is not
            if guard_websocket(ctx.origin.as_deref(), &policy) == Handshake::Reject {
                log::info!("Rejecting websocket handshake from origin {:?}", ctx.origin);
                *response = Response::build().status(Status::BadRequest).finalize();
            }
            return;
        }

        let result = {
            let mut tracked = TrackedResponse::new(request, response);
            apply_cors(&ctx, &policy, &mut tracked)
        };
        if let Err(e) = result {
            log::error!("CORS Error: {}", e);
            response.set_status(e.status());
            let _ = response.body_mut().take();
            return;
        }

        // An OPTIONS request without a route is a preflight nobody else answers
        if request.method() == Method::Options
            && request.route().is_none()
            && response.headers().contains("Access-Control-Allow-Origin")
        {
            response.set_status(Status::NoContent);
            let _ = response.body_mut().take();
        }
    }
}
