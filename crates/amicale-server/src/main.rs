use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use amicale_api::middleware::require_auth;
use amicale_api::{articles, auth, communications, memberships, parameters, preferences};
use amicale_api::{AppState, AppStateInner};
use amicale_mailer::dispatcher::DispatchConfig;
use amicale_mailer::provider::{EmailClient, MailConfig, OrgAssets, SenderIdentity};
use amicale_scheduler::{Runner, RunnerConfig};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amicale=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("AMICALE_JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        eprintln!("FATAL: AMICALE_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    let host = std::env::var("AMICALE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("AMICALE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let db_path = std::env::var("AMICALE_DB_PATH").unwrap_or_else(|_| "amicale.db".into());

    let mail = mail_config_from_env();
    let dispatch = DispatchConfig {
        batch_size: std::env::var("AMICALE_MAIL_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        batch_delay: Duration::from_millis(
            std::env::var("AMICALE_MAIL_BATCH_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
        ),
    };

    // Init database
    let db = Arc::new(amicale_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let mailer = Arc::new(EmailClient::new(mail.api_key.clone(), mail.base_url.clone()));
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        mailer: mailer.clone(),
        mail: mail.clone(),
        dispatch: dispatch.clone(),
        jwt_secret,
    });

    // Background sweeps (article publication, scheduled sends, calendar)
    let runner = Runner::start(
        db,
        mailer,
        mail,
        dispatch,
        RunnerConfig::default(),
    );

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users/me", get(auth::me))
        .route(
            "/preferences",
            get(preferences::get_preferences).put(preferences::update_preferences),
        )
        .route("/memberships", get(memberships::my_memberships))
        .route("/admin/memberships", get(memberships::list_memberships))
        .route(
            "/parameters",
            get(parameters::list_parameters).post(parameters::create_parameter),
        )
        .route("/parameters/{org}/{year}/fees", put(parameters::update_fees))
        .route(
            "/parameters/{org}/{year}/window",
            put(parameters::update_window),
        )
        .route(
            "/articles",
            get(articles::list_articles).post(articles::create_article),
        )
        .route(
            "/articles/{id}",
            get(articles::get_article)
                .put(articles::update_article)
                .delete(articles::delete_article),
        )
        .route(
            "/communications",
            get(communications::list_communications).post(communications::create_communication),
        )
        .route(
            "/communications/{id}",
            get(communications::get_communication)
                .put(communications::update_communication)
                .delete(communications::delete_communication),
        )
        .route(
            "/communications/{id}/send",
            post(communications::send_communication),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Amicale server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    runner.shutdown();
    Ok(())
}

fn mail_config_from_env() -> MailConfig {
    let assets = |prefix: &str, default_name: &str| OrgAssets {
        sender: SenderIdentity {
            name: std::env::var(format!("AMICALE_SENDER_NAME_{prefix}"))
                .unwrap_or_else(|_| default_name.into()),
            email: std::env::var(format!("AMICALE_SENDER_EMAIL_{prefix}"))
                .unwrap_or_else(|_| "no-reply@example.org".into()),
        },
        header_image_url: std::env::var(format!("AMICALE_HEADER_IMAGE_{prefix}"))
            .unwrap_or_default(),
    };

    MailConfig {
        api_key: std::env::var("AMICALE_MAIL_API_KEY").unwrap_or_default(),
        base_url: std::env::var("AMICALE_MAIL_BASE_URL")
            .unwrap_or_else(|_| "https://api.brevo.com".into()),
        org_a: assets("A", "Org A"),
        org_b: assets("B", "Org B"),
    }
}
