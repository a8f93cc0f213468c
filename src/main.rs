use std::sync::Arc;
use std::time::Duration;

use gatekeep::app::{AppState, router};
use gatekeep::core::auth::{AuthBackends, BcryptHasher, RequestContext};
use gatekeep::core::clock::SystemClock;
use gatekeep::core::config::AppConfig;
use gatekeep::core::db::{
    CredentialStore, DbConfig, EmailTemplateRepository, EmailTemplateStore, MemoryStore,
    PgCredentialStore, PgPool, create_pool_with_migrations,
};
use gatekeep::core::files::LocalFileStore;
use gatekeep::core::mail::{EmailSender, HttpEmailSender, LogEmailSender};
use tracing_subscriber::EnvFilter;

type Stores = (
    Arc<dyn CredentialStore>,
    Arc<dyn EmailTemplateStore>,
    Option<PgPool>,
);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gatekeep=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let in_memory = std::env::args().any(|arg| arg == "--memory");

    // Log config status (without revealing secrets)
    tracing::info!(
        "Config loaded: database={}, mail_relay={}, in_memory={}",
        config.database_url.is_some(),
        config.mail.is_some(),
        in_memory
    );

    let (store, templates, db): Stores = if in_memory {
        tracing::warn!("Using the in-memory store; data is lost on exit");
        let store = MemoryStore::seeded();
        let credentials: Arc<dyn CredentialStore> = Arc::new(store.clone());
        let templates: Arc<dyn EmailTemplateStore> = Arc::new(store);
        (credentials, templates, None)
    } else {
        let pool = create_pool_with_migrations(&DbConfig::from_app_config(&config)?).await?;
        let credentials: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(pool.clone()));
        let templates: Arc<dyn EmailTemplateStore> =
            Arc::new(EmailTemplateRepository::new(pool.clone()));
        (credentials, templates, Some(pool))
    };

    let mailer: Arc<dyn EmailSender> = match &config.mail {
        Some(mail) => Arc::new(HttpEmailSender::new(
            &mail.api_url,
            &mail.api_key,
            &mail.from_email,
            Duration::from_secs(config.external_call_timeout_secs),
        )?),
        None => {
            tracing::warn!("MAIL_API_URL not set; outgoing email is only logged");
            Arc::new(LogEmailSender)
        }
    };

    let backends = AuthBackends {
        store,
        templates,
        hasher: Arc::new(BcryptHasher::new(config.bcrypt_cost)),
        mailer,
        files: Arc::new(LocalFileStore::new(
            &config.uploads_dir,
            &config.public_base_url,
        )),
        clock: Arc::new(SystemClock),
    };

    let state = AppState::new(
        backends,
        &config.auth_settings(),
        RequestContext::new(&config.public_base_url),
        config.uploads_dir.clone(),
        db,
    );
    let app = router(state);

    tracing::info!("listening on http://{}", config.bind_addr);
    tracing::info!("Public base URL: {}", config.public_base_url);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
