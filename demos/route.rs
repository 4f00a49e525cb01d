//! CORS on individual routes, with the rest taken from the application configuration.
//!
//! Try running it with `ROCKET_CORS_ALLOW_ORIGIN=https://www.acme.com`.

use std::error::Error;

use rocket::{get, post, routes};
use rocket_cors_policy::{route_cors, websocket_cors, CorsConfig, CorsOptions};

#[get("/")]
fn hello<'a>() -> &'a str {
    "Hello CORS"
}

#[post("/")]
fn create<'a>() -> &'a str {
    "Created"
}

/// Stands in for a websocket route; only the handshake's origin is checked
#[get("/ws")]
fn ws<'a>() -> &'a str {
    "Websocket"
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let options = CorsOptions::default()
        .expose_headers("X-Request-Id")
        .max_age(3600u64);

    let _ = rocket::build()
        // An `OPTIONS /` route is added automatically
        .mount("/", route_cors(options, routes![hello, create]))
        .mount("/", websocket_cors("https://www.acme.com", routes![ws]))
        .attach(CorsConfig::fairing())
        .launch()
        .await?;

    Ok(())
}
