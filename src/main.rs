use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{error, info, warn};
use std::convert::Infallible;
use std::sync::Arc;
use todo_reminders::api::{self, AppState};
use todo_reminders::config::{env_lookup, load_env_file, ServerConfig};
use todo_reminders::cors::Cors;
use todo_reminders::error::ConfigError;
use todo_reminders::oauth::OAuthClient;
use todo_reminders::session::SessionCodec;
use todo_reminders::store::PgStore;
use tokio::net::TcpListener;

type GenericError = Box<dyn std::error::Error + Send + Sync>;
type Result<T> = std::result::Result<T, GenericError>;

fn build_state(config: ServerConfig, store: PgStore) -> Result<AppState> {
    let current_keys = match config.session_keys {
        Some(keys) => keys,
        None => {
            warn!("No session keys configured, sessions will not survive a restart");
            SessionCodec::random_keys()
        }
    };
    let sessions = SessionCodec::new(&current_keys, config.previous_session_keys.as_ref());

    let auth_url = config.oauth.auth_url.clone();
    let oauth = OAuthClient::new(config.oauth, reqwest::Client::new()).map_err(|_| {
        ConfigError::Invalid {
            var: "OAUTH_AUTH_URL",
            value: auth_url,
        }
    })?;

    Ok(AppState {
        store: Arc::new(store),
        sessions,
        oauth,
        cors: Cors::new(config.allowed_origins),
        app_url: config.app_url,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    load_env_file("stack.env");
    load_env_file(".env");

    let config = ServerConfig::from_lookup(env_lookup)?;
    let host = config.host.clone();
    let port = config.port;

    info!("Connecting to database");
    let store = PgStore::connect(&config.database_url)?;
    info!("Database ok!");

    let state = Arc::new(build_state(config, store)?);
    let listener = TcpListener::bind((host.as_str(), port)).await?;

    info!("Listening on http://{}", listener.local_addr()?);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                // Clone again so the state outlives this request.
                let state = state.clone();
                async move { Ok::<_, Infallible>(api::serve(state, req).await) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving connection: {:?}", err);
            }
        });
    }
}
