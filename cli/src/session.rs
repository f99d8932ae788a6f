//! Interactive editing session.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use clap::{Parser, Subcommand};
use folio_core::credential::{forget_token, load_token, save_token};
use folio_core::media::{check_media_type, suggested_collection};
use folio_core::{
    CollectionId, FolioConfig, Operator, StagingState, SyncOptions, SyncOrchestrator, SyncOutcome,
    export_bundle, manifest,
};
use folio_store_client::{AccessToken, StoreError};
use tokio_util::sync::CancellationToken;

use crate::input::SharedInput;
use crate::operator::TerminalOperator;

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct SessionLine {
    #[command(subcommand)]
    command: SessionCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum SessionCommand {
    /// Show the records of one or all collections.
    #[command(alias = "ls")]
    List { collection: Option<CollectionId> },
    /// Stage local files for upload.
    Add {
        collection: CollectionId,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Remove the record at INDEX.
    Rm { collection: CollectionId, index: usize },
    /// Move a record from one position to another.
    Mv {
        collection: CollectionId,
        from: usize,
        to: usize,
    },
    /// Change the display title of a record.
    Title {
        collection: CollectionId,
        index: usize,
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
    },
    /// Summarize what is staged.
    Status,
    /// Print the manifest as it would be committed.
    Manifest,
    /// Write staged files and the manifest to DIR for manual publishing.
    Export { dir: PathBuf },
    /// Commit staged changes to the content store.
    Sync,
    /// Leave the session.
    #[command(alias = "exit")]
    Quit,
}

/// Parses one session line. `Ok(None)` for blank input.
pub fn parse_line(line: &str) -> Result<Option<SessionCommand>, String> {
    let words = shlex::split(line).ok_or_else(|| "unbalanced quotes".to_string())?;
    if words.is_empty() {
        return Ok(None);
    }
    SessionLine::try_parse_from(words)
        .map(|parsed| Some(parsed.command))
        .map_err(|err| err.render().to_string())
}

enum Flow {
    Continue,
    Quit,
}

/// Ctrl-C handling for a whole session: an interrupt cancels the running
/// synchronization when there is one and ends the session otherwise.
#[derive(Debug, Default)]
struct Interrupts {
    sync: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl Interrupts {
    fn lock(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_sync(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.lock() = Some(token.clone());
        token
    }

    fn end_sync(&self) {
        self.lock().take();
    }

    fn interrupt(&self) {
        match self.lock().as_ref() {
            Some(sync) => sync.cancel(),
            None => self.shutdown.cancel(),
        }
    }
}

struct Session {
    state: StagingState,
    orchestrator: SyncOrchestrator,
    operator: Arc<dyn Operator>,
    interrupts: Arc<Interrupts>,
    quit_armed: bool,
}

pub(crate) async fn run(config: FolioConfig, input: SharedInput) -> anyhow::Result<()> {
    let credentials = crate::credential_store(&config);
    let account = config.credential.account.clone();
    let operator = Arc::new(TerminalOperator::new(input.clone()));

    let token = match load_token(credentials.as_ref(), &account)? {
        Some(token) => token,
        None => {
            let raw = operator
                .request_credential()
                .await
                .context("an access token is required to load the manifest")?;
            let token = AccessToken::parse(&raw)?;
            save_token(credentials.as_ref(), &account, &token)?;
            token
        }
    };

    let connector = crate::connector(&config);
    let store = connector.connect(&token)?;
    let state = match crate::load_state(store.as_ref(), config.layout.clone()).await {
        Ok(state) => state,
        Err(err) => {
            if err
                .downcast_ref::<StoreError>()
                .is_some_and(StoreError::is_unauthorized)
            {
                forget_token(credentials.as_ref(), &account)?;
            }
            return Err(err);
        }
    };

    let orchestrator = SyncOrchestrator::new(
        connector,
        credentials,
        SyncOptions {
            attempt_timeout: config.sync.attempt_timeout(),
            credential_account: account,
        },
    );
    let interrupts = Arc::new(Interrupts::default());
    let listener = {
        let interrupts = Arc::clone(&interrupts);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                interrupts.interrupt();
            }
        })
    };
    let mut session = Session {
        state,
        orchestrator,
        operator,
        interrupts: Arc::clone(&interrupts),
        quit_armed: false,
    };

    println!(
        "Loaded {} records from {}/{}. Type `help` for commands.",
        session.state.collections().len(),
        config.store.owner,
        config.store.repo
    );
    loop {
        let line = tokio::select! {
            biased;
            _ = interrupts.shutdown.cancelled() => None,
            line = input.read_line("folio> ") => line?,
        };
        let Some(line) = line else {
            break;
        };
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        match session.execute(command).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(err) => eprintln!("error: {err:#}"),
        }
        if interrupts.shutdown.is_cancelled() {
            break;
        }
    }
    listener.abort();
    Ok(())
}

impl Session {
    async fn execute(&mut self, command: SessionCommand) -> anyhow::Result<Flow> {
        if command != SessionCommand::Quit {
            self.quit_armed = false;
        }
        match command {
            SessionCommand::List { collection } => {
                let ids = match collection {
                    Some(id) => vec![id],
                    None => CollectionId::ALL.to_vec(),
                };
                for id in ids {
                    print!("{}", render_collection(&self.state, id));
                }
            }
            SessionCommand::Add { collection, files } => {
                for file in files {
                    self.add_file(collection, &file).await?;
                }
            }
            SessionCommand::Rm { collection, index } => {
                let removed = self.state.remove(collection, index)?;
                println!("removed {collection}/{}", removed.source);
            }
            SessionCommand::Mv {
                collection,
                from,
                to,
            } => {
                self.state.move_record(collection, from, to)?;
                println!("moved {collection}[{from}] to position {to}");
            }
            SessionCommand::Title {
                collection,
                index,
                title,
            } => {
                self.state.set_title(collection, index, &title.join(" "))?;
            }
            SessionCommand::Status => print!("{}", render_status(&self.state)),
            SessionCommand::Manifest => println!("{}", manifest::encode(&self.state.manifest())),
            SessionCommand::Export { dir } => {
                let summary = export_bundle(&self.state, &dir).await?;
                println!(
                    "exported {} file(s) and the manifest to {}; see {}",
                    summary.files.len(),
                    dir.display(),
                    summary.instructions.display()
                );
            }
            SessionCommand::Sync => self.sync().await?,
            SessionCommand::Quit => {
                if self.state.is_dirty() && !self.quit_armed {
                    self.quit_armed = true;
                    println!(
                        "There are unsynchronized changes. Type `quit` again to discard them."
                    );
                    return Ok(Flow::Continue);
                }
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    async fn add_file(&mut self, collection: CollectionId, path: &Path) -> anyhow::Result<()> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?;
        let mime = check_media_type(&name)?;
        let suggested = suggested_collection(mime);
        if (suggested == CollectionId::Motion) != (collection == CollectionId::Motion) {
            println!("note: {name} is {mime}, which usually belongs in {suggested}");
        }
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let inserted = self.state.stage_upload(collection, &name, content)?;
        if let Some(notice) = inserted.notice() {
            println!("{notice}");
        }
        println!("staged {collection}/{}", inserted.source);
        Ok(())
    }

    async fn sync(&mut self) -> anyhow::Result<()> {
        let cancel = self.interrupts.begin_sync();
        let outcome = self
            .orchestrator
            .synchronize(&mut self.state, self.operator.as_ref(), &cancel)
            .await;
        self.interrupts.end_sync();

        match outcome? {
            SyncOutcome::NoChanges => println!("Nothing to commit."),
            SyncOutcome::Cancelled => println!("Synchronization cancelled; changes remain staged."),
            SyncOutcome::Committed(report) => {
                println!(
                    "Committed \"{}\": {} uploaded, {} deleted.",
                    report.message.title,
                    report.uploaded.len(),
                    report.deleted.len() + report.already_absent.len()
                );
                for warning in &report.warnings {
                    println!("warning: could not delete {}: {}", warning.path, warning.error);
                }
            }
        }
        Ok(())
    }
}

fn render_collection(state: &StagingState, id: CollectionId) -> String {
    let records = state.collection(id);
    let mut out = format!("{id} ({}) -> {}/\n", records.len(), state.layout().directory(id));
    for (index, record) in records.iter().enumerate() {
        let marker = if record.is_pending() { "  (new)" } else { "" };
        out.push_str(&format!(
            "  [{index}] {}  \"{}\"{marker}\n",
            record.source, record.title
        ));
    }
    out
}

fn render_status(state: &StagingState) -> String {
    if !state.is_dirty() {
        return "No staged changes.\n".to_string();
    }
    let mut out = format!("Uploads pending: {}\n", state.pending_upload_count());
    out.push_str(&format!(
        "Deletions pending: {}\n",
        state.pending_deletions().len()
    ));
    for path in state.pending_deletions() {
        out.push_str(&format!("  {path}\n"));
    }
    out
}
