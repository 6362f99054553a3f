//! Splits a dump text stream into logical SQL statements.
//!
//! Statements are terminated by a delimiter at the end of a line and may span
//! any number of physical lines. Dumps store embedded line breaks as the two
//! literal characters `\r` / `\n`; those are turned back into real control
//! characters before a statement is handed out.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::io::{BufRead, Read};
use std::sync::Arc;

pub const DEFAULT_DELIMITER: &str = ";";

/// Lazy statement iterator over a dump stream.
///
/// With a delimiter, a trailing statement that never reaches its delimiter is
/// dropped when the stream ends. Without a delimiter the whole remaining
/// stream is yielded as a single statement, line breaks restored as well.
pub struct DumpStatementReader<R: BufRead> {
    reader: R,
    delimiter: Option<Arc<str>>,
    done: bool,
}

impl<R: BufRead> DumpStatementReader<R> {
    pub fn new<D: Into<Arc<str>>>(reader: R, delimiter: Option<D>) -> Self {
        Self {
            reader,
            delimiter: delimiter.map(Into::into),
            done: false,
        }
    }

    pub fn with_default_delimiter(reader: R) -> Self {
        Self::new(reader, Some(DEFAULT_DELIMITER))
    }

    fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<Option<String>> {
        buf.clear();
        if self.reader.read_until(b'\n', buf)? == 0 {
            return Ok(None);
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(buf).into_owned()))
    }

    fn read_whole(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf)?;
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(restore_line_breaks(&String::from_utf8_lossy(&buf))))
    }

    fn read_statement(&mut self, delimiter: &str) -> Result<Option<String>> {
        let mut statement = String::new();
        let mut buf = Vec::new();
        while let Some(line) = self.read_line(&mut buf)? {
            if statement.is_empty() && line.trim().is_empty() {
                continue;
            }
            if !statement.is_empty() {
                statement.push('\n');
            }
            statement.push_str(&line);
            if statement.trim_end().ends_with(delimiter) {
                return Ok(Some(restore_line_breaks(&statement)));
            }
        }

        if !statement.trim().is_empty() {
            tracing::debug!(
                "Dropping unterminated trailing statement of {} bytes",
                statement.len()
            );
        }
        Ok(None)
    }
}

impl<R: BufRead> Iterator for DumpStatementReader<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let res = match self.delimiter.clone() {
            Some(delimiter) => self.read_statement(&delimiter),
            None => {
                self.done = true;
                self.read_whole()
            }
        };
        match res {
            Ok(Some(statement)) => Some(Ok(statement)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Turns the literal escape pairs `\r` and `\n` into CR and LF.
pub fn restore_line_breaks(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_string();
    }
    text.replace("\\r", "\r").replace("\\n", "\n")
}

/// Reads one line and returns the token of a `DELIMITER <token>` directive.
pub fn read_delimiter_directive<R: BufRead>(reader: &mut R) -> Result<Option<Arc<str>>> {
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).map_err(Error::from)?;
    Ok(parse_delimiter_directive(&String::from_utf8_lossy(&line)))
}

pub fn parse_delimiter_directive(line: &str) -> Option<Arc<str>> {
    let mut parts = line.split_whitespace();
    let keyword = parts.next()?;
    if !keyword.eq_ignore_ascii_case("DELIMITER") {
        return None;
    }
    let token = parts.next()?;
    match parts.next() {
        Some(_) => None,
        None => Some(token.into()),
    }
}
