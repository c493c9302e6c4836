//! Interactive confirmation for destructive actions.

use serde::Serialize;
use std::io::{BufRead, Write};
use std::sync::mpsc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationPrompt {
    pub pid: u32,
    pub name: String,
    pub command: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Approved,
    Declined,
    TimedOut,
}

/// Source of the external confirmation signal.
pub trait Confirmer {
    fn confirm(&self, prompt: &ConfirmationPrompt, timeout: Duration) -> Confirmation;
}

/// Asks on stderr and reads one line from stdin. Only `y`/`yes` approves.
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &ConfirmationPrompt, timeout: Duration) -> Confirmation {
        let mut err = std::io::stderr();
        let _ = write!(
            err,
            "Terminate pid {} ({})?\n  command: {}\n  reason: {}\nType 'yes' within {}s: ",
            prompt.pid,
            prompt.name,
            prompt.command,
            prompt.reason,
            timeout.as_secs()
        );
        let _ = err.flush();

        let (tx, rx) = mpsc::channel();
        // The reader thread is left behind on timeout; it holds only stdin.
        std::thread::spawn(move || {
            let mut line = String::new();
            let read = std::io::stdin().lock().read_line(&mut line);
            let _ = tx.send(read.map(|_| line));
        });
        match rx.recv_timeout(timeout) {
            Ok(Ok(line)) => parse_answer(&line),
            Ok(Err(_)) => Confirmation::Declined,
            Err(_) => Confirmation::TimedOut,
        }
    }
}

fn parse_answer(line: &str) -> Confirmation {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Confirmation::Approved,
        _ => Confirmation::Declined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_approves() {
        assert_eq!(parse_answer("yes\n"), Confirmation::Approved);
        assert_eq!(parse_answer(" Y "), Confirmation::Approved);
        assert_eq!(parse_answer("\n"), Confirmation::Declined);
        assert_eq!(parse_answer("yep"), Confirmation::Declined);
    }
}
