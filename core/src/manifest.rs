//! Text form of the manifest.
//!
//! The manifest is a small script declaring one list per collection:
//!
//! ```text
//! const PhotoshopFiles = [
//!   { src: "a.png", title: "A" }
//! ];
//! ```
//!
//! [`encode`] always produces the canonical form. [`decode`] also accepts
//! hand-edited variations: `let`/`var`, single quotes, quoted keys, trailing
//! commas and comments.

use thiserror::Error;

use crate::asset::{AssetEntry, CollectionId, Manifest, default_title};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("manifest line {line}: {message}")]
pub struct ManifestError {
    pub line: usize,
    pub message: String,
}

pub fn encode(manifest: &Manifest) -> String {
    manifest
        .iter()
        .map(|(id, entries)| encode_collection(id, entries))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn encode_collection(id: CollectionId, entries: &[AssetEntry]) -> String {
    let items = entries
        .iter()
        .map(|entry| {
            format!(
                "  {{ src: \"{}\", title: \"{}\" }}",
                escape(&entry.src),
                escape(&entry.title)
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!("const {} = [\n{items}\n];", id.manifest_identifier())
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

pub fn decode(text: &str) -> Result<Manifest, ManifestError> {
    let mut cursor = Cursor::new(text);
    let mut manifest = Manifest::default();
    let mut seen = Vec::new();

    loop {
        cursor.skip_trivia()?;
        match cursor.peek() {
            None => break,
            Some(';') => {
                cursor.bump();
                continue;
            }
            Some(_) => {}
        }

        let keyword = cursor.identifier()?;
        if !matches!(keyword.as_str(), "const" | "let" | "var") {
            return Err(cursor.error(format!("expected a declaration, found `{keyword}`")));
        }
        cursor.skip_trivia()?;
        let name = cursor.identifier()?;
        let id = CollectionId::from_manifest_identifier(&name)
            .ok_or_else(|| cursor.error(format!("unknown collection `{name}`")))?;
        if seen.contains(&id) {
            return Err(cursor.error(format!("`{name}` is declared more than once")));
        }
        seen.push(id);

        cursor.skip_trivia()?;
        cursor.expect('=')?;
        *manifest.get_mut(id) = cursor.list()?;
        cursor.skip_trivia()?;
        if cursor.peek() == Some(';') {
            cursor.bump();
        }
    }

    Ok(manifest)
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> ManifestError {
        ManifestError {
            line: self.line,
            message: message.into(),
        }
    }

    fn describe_next(&self) -> String {
        match self.peek() {
            Some(ch) => format!("`{ch}`"),
            None => "end of input".to_string(),
        }
    }

    fn expect(&mut self, wanted: char) -> Result<(), ManifestError> {
        if self.peek() == Some(wanted) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(format!("expected `{wanted}`, found {}", self.describe_next())))
        }
    }

    /// Skips whitespace and both comment styles.
    fn skip_trivia(&mut self) -> Result<(), ManifestError> {
        loop {
            match (self.peek(), self.peek_next()) {
                (Some(ch), _) if ch.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.bump() {
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.line;
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(ManifestError {
                                    line: start,
                                    message: "unterminated comment".to_string(),
                                });
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn identifier(&mut self) -> Result<String, ManifestError> {
        let mut ident = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                ident.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        if ident.is_empty() {
            return Err(self.error(format!(
                "expected an identifier, found {}",
                self.describe_next()
            )));
        }
        Ok(ident)
    }

    fn string(&mut self) -> Result<String, ManifestError> {
        let start = self.line;
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => {
                return Err(self.error(format!(
                    "expected a string, found {}",
                    self.describe_next()
                )));
            }
        };
        self.bump();

        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(ManifestError {
                        line: start,
                        message: "unterminated string".to_string(),
                    });
                }
                Some(ch) if ch == quote => return Ok(value),
                Some('\\') => value.push(self.escape_sequence()?),
                Some(ch) => value.push(ch),
            }
        }
    }

    fn escape_sequence(&mut self) -> Result<char, ManifestError> {
        match self.bump() {
            Some('n') => Ok('\n'),
            Some('r') => Ok('\r'),
            Some('t') => Ok('\t'),
            Some('0') => Ok('\0'),
            Some('u') => {
                let mut code = 0u32;
                for _ in 0..4 {
                    let digit = self
                        .bump()
                        .and_then(|ch| ch.to_digit(16))
                        .ok_or_else(|| self.error("invalid \\u escape"))?;
                    code = code * 16 + digit;
                }
                char::from_u32(code).ok_or_else(|| self.error("invalid \\u escape"))
            }
            Some(other) => Ok(other),
            None => Err(self.error("unterminated string")),
        }
    }

    fn list(&mut self) -> Result<Vec<AssetEntry>, ManifestError> {
        self.skip_trivia()?;
        self.expect('[')?;
        let mut entries = Vec::new();
        loop {
            self.skip_trivia()?;
            if self.peek() == Some(']') {
                self.bump();
                return Ok(entries);
            }
            entries.push(self.record()?);
            self.skip_trivia()?;
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(']') => {}
                _ => {
                    return Err(self.error(format!(
                        "expected `,` or `]`, found {}",
                        self.describe_next()
                    )));
                }
            }
        }
    }

    fn record(&mut self) -> Result<AssetEntry, ManifestError> {
        let line = self.line;
        self.expect('{')?;
        let mut src = None;
        let mut title = None;
        loop {
            self.skip_trivia()?;
            if self.peek() == Some('}') {
                self.bump();
                break;
            }

            let key = match self.peek() {
                Some('"' | '\'') => self.string()?,
                _ => self.identifier()?,
            };
            self.skip_trivia()?;
            self.expect(':')?;
            self.skip_trivia()?;
            let value = self.string()?;
            let slot = match key.as_str() {
                "src" => &mut src,
                "title" => &mut title,
                other => return Err(self.error(format!("unknown key `{other}`"))),
            };
            if slot.replace(value).is_some() {
                return Err(self.error(format!("duplicate key `{key}`")));
            }

            self.skip_trivia()?;
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some('}') => {}
                _ => {
                    return Err(self.error(format!(
                        "expected `,` or `}}`, found {}",
                        self.describe_next()
                    )));
                }
            }
        }

        let src = src.ok_or(ManifestError {
            line,
            message: "record is missing `src`".to_string(),
        })?;
        let title = title.unwrap_or_else(|| default_title(&src));
        Ok(AssetEntry { src, title })
    }
}
