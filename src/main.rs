use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use utoipa_swagger_ui::SwaggerUi;

mod error;
mod karma;
mod models;
mod openapi;
mod rate_limit;
mod repo;
mod report;
mod routes;
mod transport;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use openapi::ApiDoc;
use rate_limit::{KarmaThrottle, ThrottleConfig, ThrottleFacade};
#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
use repo::inmem::InMemRepo;
use routes::{config, AppConfig, AppState};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use transport::build_message_sink;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()

async fn metrics_endpoint(handle: web::Data<PrometheusHandle>) -> String {
    handle.render()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Environment comes from the deployment (shell, systemd, Docker);
    // .env is loaded automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars();

    // Structured logging initialisation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping karmad server");

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = InMemRepo::new();
    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    info!("Using in-memory repository backend");

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let db_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres-store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&db_url)
            .expect("Failed to create Pg pool");
        info!("Using Postgres repository backend");
        repo::pg::PgRepo::new(pool)
    };

    let recorder = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    let app_config = AppConfig::from_env();
    info!(
        "Report reward: {}, cleanup delay: {:?}",
        app_config.report_reward, app_config.cleanup_delay
    );

    let throttle = ThrottleFacade::new(KarmaThrottle::new(true), ThrottleConfig::from_env());
    let sink = build_message_sink();
    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let server = HttpServer::new(move || {
        // The service fronts a bot transport, not browsers; permissive CORS
        // keeps local tooling and the Swagger UI working.
        let cors = Cors::permissive();

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .configure(config)
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
            .route("/metrics", web::get().to(metrics_endpoint))
            .app_data(web::Data::new(recorder.clone()))
            .app_data(web::Data::new(AppState {
                repo: Arc::new(repo.clone()),
                sink: sink.clone(),
                throttle: throttle.clone(),
                cfg: app_config.clone(),
            }))
    })
    .bind(("0.0.0.0", 8080))?;

    info!("Listening on http://0.0.0.0:8080");

    server.run().await
}

/// Validate that required environment variables are set
fn validate_env_vars() {
    #[cfg(feature = "postgres-store")]
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL must be set for the postgres-store backend");
        std::process::exit(1);
    }

    if std::env::var("KARMAD_SELF_TG_ID").is_err() {
        eprintln!("Warning: KARMAD_SELF_TG_ID not set; rewards will be issued by tg id 0");
    }
}
