use dotenv::dotenv;
use handlebars::Handlebars;
use log::*;
use sqlx::postgres::{PgPool, PgPoolOptions};

use std::env;
use std::sync::Arc;

mod api_models;
mod models;
/**
 * The routes module contains all the tide routes and the logic to fulfill the responses for each
 * route.
 *
 * Modules are nested for cleaner organization here
 */
mod routes;

/**
 * Struct for carrying application state into tide request handlers
 */
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub hb: Arc<Handlebars<'static>>,
}

/**
 * Create the sqlx connection pool for postgresql
 */
async fn create_pool() -> Result<PgPool, sqlx::Error> {
    dotenv().ok();

    let database_url = env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set");

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
}

/**
 * Register every .hbs file under views/ with the handlebars registry
 *
 * Note: this is done once at startup and shared in the tide app state
 */
fn load_templates() -> Result<Handlebars<'static>, handlebars::TemplateFileError> {
    let mut hb = Handlebars::new();
    hb.register_templates_directory(".hbs", "views")?;
    Ok(hb)
}

#[async_std::main]
async fn main() -> Result<(), std::io::Error> {
    pretty_env_logger::init();

    let hb = load_templates()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;

    match create_pool().await {
        Ok(db) => {
            let state = AppState {
                db,
                hb: Arc::new(hb),
            };
            let mut app = tide::with_state(state);
            app.with(driftwood::ApacheCombinedLogger);
            app.at("/").get(routes::index);
            app.at("/about").get(routes::about);
            app.at("/contact").get(routes::contact);
            app.at("/poll/:id").get(routes::polls::detail);
            app.at("/poll/:id/results").get(routes::polls::results);
            app.at("/poll/:id/vote").post(routes::polls::vote);
            app.at("/questions").get(routes::questions::all);
            app.at("/questions/:poll_id").get(routes::questions::by_poll);
            app.at("/seed").get(routes::seed);

            let listen = env::var("HTTP_LISTEN")
                .unwrap_or_else(|_| "127.0.0.1:8000".to_string());
            info!("Listening on {}", listen);
            app.listen(listen).await?;
            Ok(())
        },
        Err(err) => {
            error!("Could not initialize pool! {:?}", err);
            Err(std::io::Error::new(std::io::ErrorKind::Other, err))
        },
    }
}
