use std::io::{self, Write};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::Mutex;

type LineSource = Lines<BufReader<Box<dyn AsyncRead + Unpin + Send>>>;

/// Line-oriented operator input shared by the session loop and the prompts
/// raised during synchronization.
#[derive(Clone)]
pub struct SharedInput {
    lines: Arc<Mutex<LineSource>>,
}

impl SharedInput {
    pub fn stdin() -> Self {
        Self::from_reader(tokio::io::stdin())
    }

    pub fn from_reader(reader: impl AsyncRead + Unpin + Send + 'static) -> Self {
        let reader: Box<dyn AsyncRead + Unpin + Send> = Box::new(reader);
        Self {
            lines: Arc::new(Mutex::new(BufReader::new(reader).lines())),
        }
    }

    /// Prints `prompt` and returns the next line, or `None` at end of input.
    pub async fn read_line(&self, prompt: &str) -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        stdout.write_all(prompt.as_bytes())?;
        stdout.flush()?;
        self.lines.lock().await.next_line().await
    }
}
