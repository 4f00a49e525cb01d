//! This is an example of how you can mix and match the application wide fairing, a fairing for
//! the routes under one mount base and per-route CORS.
//!
//! In this example, the application only allows one origin, the `/public` routes allow every
//! origin, the `ping` route allows one more origin and `health` has no CORS at all.

use rocket::error::Error;
use rocket::{get, routes};
use rocket_cors_policy::{cors, route_cors, AllowedOrigins, Cors, CorsExempt, CorsOptions};

/// The "usual" app route
#[get("/")]
fn app<'a>() -> &'a str {
    "Hello CORS!"
}

/// The special "ping" route
#[get("/ping")]
fn ping<'a>() -> &'a str {
    "Pong!"
}

#[get("/")]
fn public<'a>() -> &'a str {
    "Hello everyone!"
}

/// Not meant for browsers
#[get("/health")]
fn health<'a>() -> &'a str {
    "OK"
}

/// Returns the "application wide" options
fn cors_options() -> CorsOptions {
    CorsOptions::default()
        .allow_origin("https://www.acme.com")
        .allow_headers(&["Authorization", "Accept"][..])
        .allow_credentials(true)
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let ping_origins = AllowedOrigins::some_exact(&["https://www.acme.com", "https://status.acme.com"]);

    let _ = rocket::build()
        .mount("/", routes![app])
        .mount("/", route_cors(cors_options().allow_origin(ping_origins), routes![ping]))
        .mount_exempt("/", routes![health])
        .mount("/public", routes![public])
        .attach(cors(cors_options()))
        .attach(Cors::new(CorsOptions::default()).scoped("/public"))
        .launch()
        .await?;

    Ok(())
}
