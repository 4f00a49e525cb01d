use std::error::Error;

use rocket::{get, routes};
use rocket_cors_policy::{AllowedOrigins, Cors, CorsOptions};

#[get("/")]
fn cors<'a>() -> &'a str {
    "Hello CORS"
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let allow_origin = AllowedOrigins::some_exact(&["https://www.acme.com"]);

    // You can also deserialize this, or leave it to the `cors_` keys in Rocket.toml
    let options = CorsOptions::default()
        .allow_origin(allow_origin)
        .allow_methods(&["GET"][..])
        .allow_headers(&["Authorization", "Accept"][..])
        .allow_credentials(true);

    let _ = rocket::build()
        .mount("/", routes![cors])
        .attach(Cors::new(options))
        .launch()
        .await?;

    Ok(())
}
