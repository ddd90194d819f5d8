//! autocc
//!
//! Command-line front end:
//! 1. `videos` lists a user's own videos, to find ids for `process`
//! 2. `process` translates a video's captions and metadata into every
//!    supported language, spending pooled quota
//! 3. `credentials` manages the pooled API credentials
//! 4. `auth` runs the consent flow that creates user sessions
//! 5. `sessions` lists and revokes user sessions

mod accounts;
mod client;
mod config;
mod deepl;
mod error;
mod metrics;
mod orchestrator;
mod youtube;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cache::{Cache, MemoryCache};
use clap::{Args, Parser, Subcommand};
use provider::VideoProvider;
use quota_pool::{Credential, PoolKind, QuotaBroker, Session, Store, StoreCache};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::accounts::AccountService;
use crate::client::ClientFactory;
use crate::config::Config;
use crate::deepl::DeepLProvider;
use crate::orchestrator::Orchestrator;
use crate::youtube::YouTubeProvider;

#[derive(Parser, Debug)]
#[command(name = "autocc", version, about = "Caption and metadata translation over pooled API quota")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the user's own videos, one page at a time
    Videos {
        #[arg(long)]
        user: String,
        /// `next_page_token` from the previous page
        #[arg(long, default_value = "")]
        page_token: String,
    },
    /// Translate captions and metadata of one video
    Process {
        #[arg(long)]
        user: String,
        #[arg(long)]
        video: String,
    },
    /// Manage pooled credentials
    #[command(subcommand)]
    Credentials(CredentialsCommand),
    /// Authorize a user against a video credential
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Manage user sessions
    #[command(subcommand)]
    Sessions(SessionsCommand),
}

#[derive(Subcommand, Debug)]
enum CredentialsCommand {
    Add(AddCredential),
    List {
        #[arg(long)]
        pool: Option<PoolKind>,
    },
    Remove {
        id: String,
    },
    /// Zero the usage of every credential in a pool
    ResetUsage {
        #[arg(long)]
        pool: PoolKind,
    },
}

#[derive(Args, Debug)]
struct AddCredential {
    #[arg(long)]
    pool: PoolKind,
    /// OAuth client id (video) or API key (translation)
    #[arg(long)]
    key: String,
    /// OAuth client secret, video only
    #[arg(long, env = "AUTOCC_CLIENT_SECRET", hide_env_values = true)]
    secret: Option<String>,
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Issue an authorization URL
    Url {
        #[arg(long)]
        user: String,
        #[arg(long)]
        credential: String,
        /// Where to send the user after the callback
        #[arg(long)]
        redirect: String,
    },
    /// Exchange the callback's state and code for a session
    Complete {
        #[arg(long)]
        state: String,
        #[arg(long)]
        code: String,
    },
}

#[derive(Subcommand, Debug)]
enum SessionsCommand {
    List {
        #[arg(long)]
        user: Option<String>,
    },
    Remove {
        id: String,
    },
}

/// Shared wiring for every command.
struct App {
    config: Config,
    store: Arc<Store>,
    factory: ClientFactory,
    cache: Arc<dyn Cache>,
    /// Outlives the process; keeps caption uploads idempotent across runs
    upload_cache: Arc<dyn Cache>,
    video_http: reqwest::Client,
    translation_http: reqwest::Client,
}

impl App {
    async fn build(config: Config) -> Result<Self> {
        let store = Store::load(config.store.path.clone())
            .await
            .with_context(|| format!("failed to load store {}", config.store.path.display()))?
            .with_reset_period(
                PoolKind::Video,
                Duration::from_secs(config.video.quota_reset_secs),
            )
            .with_reset_period(
                PoolKind::Translation,
                Duration::from_secs(config.translation.quota_reset_secs),
            );
        let store = Arc::new(store);

        let video_http = http_client(config.video.timeout_secs)?;
        let translation_http = http_client(config.translation.timeout_secs)?;
        let factory = ClientFactory::new(QuotaBroker::new(Arc::clone(&store)), video_http.clone());
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(config.cache.max_entries));
        let upload_cache: Arc<dyn Cache> = Arc::new(StoreCache::new(Arc::clone(&store)));

        Ok(Self {
            config,
            store,
            factory,
            cache,
            upload_cache,
            video_http,
            translation_http,
        })
    }

    fn deepl(&self) -> DeepLProvider {
        let cache = &self.config.cache;
        DeepLProvider::new(
            self.translation_http.clone(),
            &self.config.translation.api_base_url,
            self.factory.clone(),
            Arc::clone(&self.cache),
        )
        .with_ttls(
            Duration::from_secs(cache.translation_ttl_secs),
            Duration::from_secs(cache.languages_ttl_secs),
        )
    }

    fn youtube(&self) -> YouTubeProvider {
        YouTubeProvider::new(
            self.video_http.clone(),
            &self.config.video.api_base_url,
            &self.config.video.upload_base_url,
            self.factory.clone(),
            Arc::clone(&self.upload_cache),
            Duration::from_secs(self.config.cache.upload_ttl_secs),
        )
    }

    fn accounts(&self) -> AccountService {
        AccountService::new(
            Arc::clone(&self.store),
            self.video_http.clone(),
            self.config.oauth.redirect_uri.clone(),
            Arc::new(self.deepl()),
        )
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("failed to build HTTP client")
}

/// An explicitly named config file must exist; the default one is optional.
fn load_config(cli_path: Option<&std::path::Path>) -> Result<Config> {
    let explicit = cli_path.is_some() || std::env::var_os("CONFIG_PATH").is_some();
    let path = Config::resolve_path(cli_path);
    if path.exists() || explicit {
        info!(path = %path.display(), "loading configuration");
        return Config::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()));
    }
    info!(path = %path.display(), "no config file, using defaults");
    Config::from_env().context("invalid configuration from environment")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    if let Some(metrics_config) = &config.metrics {
        metrics::install_exporter(metrics_config.listen_addr)
            .context("failed to install Prometheus exporter")?;
        info!(listen_addr = %metrics_config.listen_addr, "metrics exporter listening");
    }

    let app = App::build(config).await?;
    match cli.command {
        Command::Videos { user, page_token } => videos(&app, &user, &page_token).await,
        Command::Process { user, video } => process(&app, &user, &video).await,
        Command::Credentials(command) => credentials(&app, command).await,
        Command::Auth(command) => auth(&app, command).await,
        Command::Sessions(command) => sessions(&app, command).await,
    }
}

async fn videos(app: &App, user_id: &str, page_token: &str) -> Result<()> {
    let page = app
        .youtube()
        .videos(user_id, page_token)
        .await
        .with_context(|| format!("failed to list videos of {user_id}"))?;
    print_json(&serde_json::to_value(&page)?)
}

async fn process(app: &App, user_id: &str, video_id: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_signal(
        cancel.clone(),
        app.config.orchestrator.deadline(),
    ));

    let orchestrator = Orchestrator::new(Arc::new(app.youtube()), Arc::new(app.deepl()))
        .with_cancel_on_failure(app.config.orchestrator.cancel_on_failure);
    let result = orchestrator.process(user_id, video_id, &cancel).await;

    watcher.abort();

    let report = result.with_context(|| format!("failed to process video {video_id}"))?;
    print_json(&serde_json::to_value(&report)?)
}

/// Cancel `cancel` on Ctrl-C or when `deadline` passes.
async fn cancel_on_signal(cancel: CancellationToken, deadline: Option<Duration>) {
    let deadline = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => warn!("interrupted, cancelling run"),
            Err(e) => {
                warn!(error = %e, "failed to listen for Ctrl-C");
                return;
            }
        },
        _ = deadline => warn!("deadline reached, cancelling run"),
    }
    cancel.cancel();
}

async fn credentials(app: &App, command: CredentialsCommand) -> Result<()> {
    let accounts = app.accounts();
    match command {
        CredentialsCommand::Add(add) => {
            let credential = match add.pool {
                PoolKind::Video => {
                    let secret = add
                        .secret
                        .context("--secret is required for video credentials")?;
                    accounts.add_video_credential(&add.key, &secret).await?
                }
                PoolKind::Translation => accounts.add_translation_credential(&add.key).await?,
            };
            print_json(&credential_json(&credential))
        }
        CredentialsCommand::List { pool } => {
            let listed: Vec<_> = accounts
                .credentials(pool)
                .await
                .iter()
                .map(credential_json)
                .collect();
            print_json(&json!(listed))
        }
        CredentialsCommand::Remove { id } => {
            let removed = accounts.remove_credential(&id).await?;
            print_json(&json!({ "id": removed.id, "status": "removed" }))
        }
        CredentialsCommand::ResetUsage { pool } => {
            let reset = app.store.reset_usage(pool).await?;
            print_json(&json!({ "pool": pool.label(), "reset": reset }))
        }
    }
}

async fn auth(app: &App, command: AuthCommand) -> Result<()> {
    let accounts = app.accounts();
    match command {
        AuthCommand::Url {
            user,
            credential,
            redirect,
        } => {
            let request = accounts
                .authorization_url(&user, &credential, &redirect)
                .await?;
            print_json(&json!({
                "authorization_url": request.url,
                "state": request.state,
                "instructions": "Open the URL in a browser, authorize, then run `autocc auth complete` with the callback's state and code"
            }))
        }
        AuthCommand::Complete { state, code } => {
            let completed = accounts.complete_authorization(&state, &code).await?;
            print_json(&json!({
                "session": session_json(&completed.session),
                "redirect_url": completed.redirect_url,
            }))
        }
    }
}

async fn sessions(app: &App, command: SessionsCommand) -> Result<()> {
    let accounts = app.accounts();
    match command {
        SessionsCommand::List { user } => {
            let listed: Vec<_> = accounts
                .sessions(user.as_deref())
                .await
                .iter()
                .map(session_json)
                .collect();
            print_json(&json!(listed))
        }
        SessionsCommand::Remove { id } => {
            let removed = accounts.remove_session(&id).await?;
            print_json(&json!({ "id": removed.id, "status": "removed" }))
        }
    }
}

/// Listing form: key masked, secret omitted.
fn credential_json(credential: &Credential) -> serde_json::Value {
    json!({
        "id": credential.id,
        "pool": credential.pool,
        "key": credential.masked_key(),
        "usage": credential.usage,
        "ceiling": credential.ceiling,
        "remaining": credential.remaining(),
    })
}

/// Listing form: no tokens.
fn session_json(session: &Session) -> serde_json::Value {
    json!({
        "id": session.id,
        "user_id": session.user_id,
        "credential_id": session.credential_id,
        "expires_at": session.tokens.expires_at,
        "scopes": session.scopes,
    })
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use quota_pool::SessionTokens;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_process_with_global_config() {
        let cli = Cli::try_parse_from([
            "autocc", "process", "--user", "u1", "--video", "dQw4w9WgXcQ", "--config", "x.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        match cli.command {
            Command::Process { user, video } => {
                assert_eq!(user, "u1");
                assert_eq!(video, "dQw4w9WgXcQ");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_credentials_add_pool() {
        let cli = Cli::try_parse_from([
            "autocc",
            "credentials",
            "add",
            "--pool",
            "translation",
            "--key",
            "abc:fx",
        ])
        .unwrap();
        match cli.command {
            Command::Credentials(CredentialsCommand::Add(add)) => {
                assert_eq!(add.pool, PoolKind::Translation);
                assert_eq!(add.key, "abc:fx");
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(
            Cli::try_parse_from(["autocc", "credentials", "list", "--pool", "audio"]).is_err()
        );
    }

    #[test]
    fn videos_page_token_defaults_to_first_page() {
        let cli = Cli::try_parse_from(["autocc", "videos", "--user", "u1"]).unwrap();
        match cli.command {
            Command::Videos { user, page_token } => {
                assert_eq!(user, "u1");
                assert!(page_token.is_empty());
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli =
            Cli::try_parse_from(["autocc", "videos", "--user", "u1", "--page-token", "CAUQAA"])
                .unwrap();
        assert!(matches!(cli.command, Command::Videos { page_token, .. } if page_token == "CAUQAA"));
    }

    #[test]
    fn process_requires_user_and_video() {
        assert!(Cli::try_parse_from(["autocc", "process", "--user", "u1"]).is_err());
    }

    #[test]
    fn credential_listing_masks_key() {
        let credential = Credential {
            id: "c1".into(),
            pool: PoolKind::Translation,
            key: "123456789".into(),
            secret: String::new(),
            usage: 10,
            ceiling: 100,
            created_at: 0,
        };
        let value = credential_json(&credential);
        assert_eq!(value["key"], "123******");
        assert_eq!(value["pool"], "translation");
        assert_eq!(value["remaining"], 90);
        assert!(value.get("secret").is_none());
    }

    #[test]
    fn session_listing_omits_tokens() {
        let session = Session {
            id: "s1".into(),
            user_id: "u1".into(),
            credential_id: "c1".into(),
            tokens: SessionTokens {
                access_token: "ya29.secret".into(),
                refresh_token: "1//secret".into(),
                expires_at: 5,
            },
            scopes: vec![oauth::SCOPES.into()],
            created_at: 0,
        };
        let rendered = session_json(&session).to_string();
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("\"expires_at\":5"));
    }
}
