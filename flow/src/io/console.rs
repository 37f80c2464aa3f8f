//! Operator-facing output and input ports.
//!
//! Product output goes through [`Console`] rather than `tracing`, so it is
//! stable regardless of `RUST_LOG` and can be captured in tests.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

/// Output channel (stdout) and error channel (stderr).
pub trait Console {
    fn out(&self, line: &str);
    fn err(&self, line: &str);
}

/// Console writing to the process's stdout and stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdConsole;

impl Console for StdConsole {
    fn out(&self, line: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }

    fn err(&self, line: &str) {
        let _ = writeln!(io::stderr().lock(), "{line}");
    }
}

/// Interactive line source. `Ok(None)` means end of input.
pub trait LineReader {
    fn read_line(&self) -> Result<Option<String>>;
}

/// `y` or `yes` in any case. Anything else, end of input included, is a no.
pub fn is_yes(answer: Option<&str>) -> bool {
    answer.is_some_and(|line| {
        let line = line.trim();
        line.eq_ignore_ascii_case("y") || line.eq_ignore_ascii_case("yes")
    })
}

/// Reads lines from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinLineReader;

impl LineReader for StdinLineReader {
    fn read_line(&self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .context("read line from stdin")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_y_and_yes_confirm() {
        assert!(is_yes(Some("y")));
        assert!(is_yes(Some(" YES ")));
        assert!(!is_yes(Some("")));
        assert!(!is_yes(Some("yep")));
        assert!(!is_yes(None));
    }
}
