//! Interactive question loop.
//!
//! Reads one line at a time, dispatches it as a question and prints the
//! answer. Failures are per turn: an unreachable service or an empty store is
//! reported and the loop keeps going until end of input or an exit word.

use std::io::{BufRead, Write};
use tracing::warn;

use crate::ask::Conversation;
use crate::error::{DocqError, Result};
use crate::models::{Answer, StoreHandle};

/// Words that end the session (compared case-insensitively).
pub const EXIT_WORDS: &[&str] = &["exit", "quit", "q"];

const PROMPT: &str = "question> ";

/// Turn counts for one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub answered: u32,
    pub failed: u32,
}

/// Whether `line` is one of [`EXIT_WORDS`], ignoring surrounding whitespace.
pub fn is_exit_command(line: &str) -> bool {
    let line = line.trim();
    EXIT_WORDS.iter().any(|w| line.eq_ignore_ascii_case(w))
}

/// Render an answer for the terminal, with a sources line when cited.
pub fn format_answer(answer: &Answer) -> String {
    let mut out = if answer.text.trim().is_empty() {
        "No response from assistant.".to_string()
    } else {
        answer.text.trim().to_string()
    };
    let cited = answer.cited_files();
    if !cited.is_empty() {
        out.push_str("\n\nSources: ");
        out.push_str(&cited.join(", "));
    }
    out
}

/// Run the loop over `input` until EOF or an exit word.
///
/// # Errors
///
/// Only I/O failures on `input` or `output` end the session; every
/// per-question failure is printed and counted in [`SessionSummary::failed`].
pub async fn run_session<R, W>(
    conversation: &mut Conversation<'_>,
    store: &StoreHandle,
    mut input: R,
    output: &mut W,
) -> Result<SessionSummary>
where
    R: BufRead,
    W: Write,
{
    let mut summary = SessionSummary::default();
    writeln!(
        output,
        "Ask questions about your documents. Type 'exit' to quit."
    )?;

    loop {
        write!(output, "\n{}", PROMPT)?;
        output.flush()?;

        let mut raw = Vec::new();
        if input.read_until(b'\n', &mut raw)? == 0 {
            writeln!(output)?;
            break;
        }
        let Ok(line) = String::from_utf8(raw) else {
            summary.failed += 1;
            writeln!(output, "Error: input is not valid UTF-8; please retype the question.")?;
            continue;
        };
        if is_exit_command(&line) {
            writeln!(output, "Goodbye!")?;
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        match conversation.ask(store, &line).await {
            Ok(answer) => {
                summary.answered += 1;
                writeln!(output, "\n{}", format_answer(&answer))?;
            }
            Err(DocqError::EmptyStore { .. }) => {
                summary.failed += 1;
                writeln!(
                    output,
                    "No documents are indexed yet. Add PDFs to the documents directory and run `docq sync`."
                )?;
            }
            Err(e) => {
                summary.failed += 1;
                warn!("question failed: {}", e);
                writeln!(output, "Error: {}", e)?;
            }
        }
    }

    Ok(summary)
}
