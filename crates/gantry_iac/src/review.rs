//! Operator review of change sets.

use std::io::{self, BufRead, Write};

use crate::error::{IacError, IacResult};

pub const PROMPT: &str = "Execute(e), Delete (d), or Keep(k) change set? ";
pub const VALID_ANSWERS: &str = "Valid answers: e, d, k";

/// What happens to a reviewed change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSetDecision {
    Execute,
    Discard,
    Keep,
}

impl ChangeSetDecision {
    /// The answer must be exactly one letter; only the line ending is
    /// dropped.
    pub fn parse(answer: &str) -> Option<Self> {
        let answer = answer.strip_suffix('\n').unwrap_or(answer);
        match answer.strip_suffix('\r').unwrap_or(answer) {
            "e" => Some(ChangeSetDecision::Execute),
            "d" => Some(ChangeSetDecision::Discard),
            "k" => Some(ChangeSetDecision::Keep),
            _ => None,
        }
    }
}

/// The operator's terminal.
pub trait ReviewConsole: Send + Sync {
    fn show(&self, text: &str);

    /// One line of input; `None` once input is closed.
    fn ask(&self, prompt: &str) -> IacResult<Option<String>>;
}

/// Standard output and standard input.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConsole;

impl ReviewConsole for TerminalConsole {
    fn show(&self, text: &str) {
        println!("{}", text);
    }

    fn ask(&self, prompt: &str) -> IacResult<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Prompt until the operator gives a valid answer.
///
/// Invalid answers are reported and asked again without side effects.
pub fn ask_decision(console: &dyn ReviewConsole, change_set: &str) -> IacResult<ChangeSetDecision> {
    loop {
        let answer = console
            .ask(PROMPT)?
            .ok_or_else(|| IacError::ReviewAborted {
                change_set: change_set.to_string(),
            })?;

        match ChangeSetDecision::parse(&answer) {
            Some(decision) => return Ok(decision),
            None => console.show(VALID_ANSWERS),
        }
    }
}
