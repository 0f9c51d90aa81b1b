use mimalloc::MiMalloc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use wa_auth_store::{AuthCreds, AuthKeyStorage, AuthState, AuthStateOptions};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &wa_auth_store::config::CONFIG;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_url = %cfg.database_url,
        session_id = %cfg.session_id,
        sessions_dir = %cfg.sessions_dir.display(),
        routing = ?cfg.routing,
        error_policy = ?cfg.error_policy,
        loglevel = %cfg.loglevel
    );

    let reset = std::env::args().any(|a| a == "--reset");
    let list = std::env::args().any(|a| a == "--list");

    let storage = AuthKeyStorage::connect(&cfg.database_url, cfg.max_connections).await?;
    storage.ensure_schema().await?;

    if list {
        for s in storage.list_sessions().await? {
            println!("{}\t{}", s.session_id, s.key_count);
        }
        storage.close().await;
        return Ok(());
    }

    let opts = AuthStateOptions::from_config(cfg);
    let mut state = AuthState::<AuthCreds>::load(storage.clone(), opts.clone()).await?;

    if reset && !state.is_fresh() {
        warn!(session_id = %cfg.session_id, "Reset requested; discarding stored session");
        state.clear().await?;
        state = AuthState::load(storage.clone(), opts).await?;
    }

    {
        let creds = state.creds();
        let creds = creds.read().await;
        info!(
            session_id = state.session_id(),
            registration_id = creds.registration_id,
            registered = creds.registered,
            fresh = state.is_fresh(),
            "Auth state ready"
        );
    }

    state.save_creds().await?;
    storage.close().await;
    Ok(())
}
