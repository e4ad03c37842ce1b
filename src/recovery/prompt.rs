//! Line based [Selector] for terminals.

use std::io::{self, BufRead, Write};

use super::{Answer, Selector};

/// Asks on `output` and reads answers line by line from `input`.
///
/// An empty line, `q` or the end of the input cancels a selection. The
/// confirmation defaults to "no".
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompt<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Reads one trimmed line, `None` at the end of the input.
    fn read_answer(&mut self) -> io::Result<Option<String>> {
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

impl<R: BufRead, W: Write> Selector for TerminalPrompt<R, W> {
    fn choose(&mut self, message: &str, options: &[String]) -> io::Result<Answer<usize>> {
        writeln!(self.output, "{message}")?;
        for (i, option) in options.iter().enumerate() {
            writeln!(self.output, "  {:>2}) {option}", i + 1)?;
        }

        loop {
            write!(self.output, "Enter a number (empty to cancel): ")?;
            let Some(answer) = self.read_answer()? else {
                return Ok(Answer::Cancelled);
            };
            if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
                return Ok(Answer::Cancelled);
            }

            match answer.parse::<usize>() {
                Ok(n) if (1..=options.len()).contains(&n) => return Ok(Answer::Chosen(n - 1)),
                _ => writeln!(self.output, "Please enter a number between 1 and {}", options.len())?,
            }
        }
    }

    fn confirm(&mut self, message: &str) -> io::Result<Answer<bool>> {
        loop {
            write!(self.output, "{message} [y/N]: ")?;
            let Some(answer) = self.read_answer()? else {
                return Ok(Answer::Cancelled);
            };

            match answer.to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(Answer::Chosen(true)),
                "" | "n" | "no" => return Ok(Answer::Chosen(false)),
                _ => writeln!(self.output, "Please answer yes or no")?,
            }
        }
    }
}
