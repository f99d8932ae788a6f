//! `folio` command line: credential management, manifest inspection and the
//! interactive editing session.

mod input;
mod operator;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use folio_core::credential::{forget_token, load_token, save_token};
use folio_core::{ConfigLoader, FolioConfig, Manifest, RemoteLayout, StagingState, manifest};
use folio_keyring_store::{CredentialStore, KeyringCredentialStore};
use folio_store_client::{AccessToken, ContentStore, GitHubConnector, StoreConnector, StoreError};

pub use input::SharedInput;
pub use operator::TerminalOperator;
pub use session::{SessionCommand, parse_line};

#[derive(Debug, Parser)]
#[command(
    name = "folio",
    version,
    about = "Stage portfolio media and publish it to the content store"
)]
pub struct Cli {
    /// Configuration file; `./folio.toml` is used when present.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Edit the collections interactively and synchronize them.
    Session,
    /// Validate and save an access token.
    Login(LoginArgs),
    /// Forget the saved access token.
    Logout,
    /// Print the remote manifest in canonical form.
    Manifest,
    /// Print the effective configuration.
    Config,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Token to save; prompted for when omitted.
    #[arg(long)]
    pub token: Option<String>,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConfigLoader::resolve(cli.config).load()?;
    match cli.command {
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Login(args) => login(&config, args).await,
        Command::Logout => {
            let credentials = credential_store(&config);
            if forget_token(credentials.as_ref(), &config.credential.account)? {
                println!("Access token forgotten.");
            } else {
                println!("No access token was saved.");
            }
            Ok(())
        }
        Command::Manifest => {
            let credentials = credential_store(&config);
            let token = load_token(credentials.as_ref(), &config.credential.account)?
                .context("no saved access token; run `folio login` first")?;
            let store = connector(&config).connect(&token)?;
            let state = load_state(store.as_ref(), config.layout.clone()).await?;
            println!("{}", manifest::encode(state.committed()));
            Ok(())
        }
        Command::Session => session::run(config, SharedInput::stdin()).await,
    }
}

async fn login(config: &FolioConfig, args: LoginArgs) -> anyhow::Result<()> {
    let raw = match args.token {
        Some(token) => token,
        None => SharedInput::stdin()
            .read_line("Access token: ")
            .await?
            .context("no access token provided")?,
    };
    let token = AccessToken::parse(&raw)?;
    save_token(credential_store(config).as_ref(), &config.credential.account, &token)?;
    println!("Access token saved.");
    Ok(())
}

pub(crate) fn credential_store(config: &FolioConfig) -> Arc<dyn CredentialStore> {
    Arc::new(KeyringCredentialStore::new(
        config.credential.keyring_service.clone(),
    ))
}

pub(crate) fn connector(config: &FolioConfig) -> Arc<dyn StoreConnector> {
    Arc::new(GitHubConnector::new(config.store.clone(), config.retry.clone()))
}

/// Reads the committed manifest. A missing manifest is an empty portfolio; a
/// malformed one is reported and replaced by empty collections.
pub async fn load_state(
    store: &dyn ContentStore,
    layout: RemoteLayout,
) -> anyhow::Result<StagingState> {
    match store.read(&layout.manifest_path).await {
        Ok(object) => {
            let text = String::from_utf8_lossy(&object.content);
            let (state, parse_error) = StagingState::from_manifest_text(layout, &text);
            if let Some(err) = parse_error {
                eprintln!(
                    "warning: remote manifest is malformed ({err}); starting with empty collections"
                );
            }
            Ok(state)
        }
        Err(StoreError::NotFound { .. }) => {
            tracing::info!(path = %layout.manifest_path, "no remote manifest yet");
            Ok(StagingState::new(layout, Manifest::default()))
        }
        Err(err) => Err(err).context("failed to load the remote manifest"),
    }
}
