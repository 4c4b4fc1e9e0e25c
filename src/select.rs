//! Choosing which epics an export covers

use anyhow::{bail, Context, Result};
use std::io::{BufRead, Write};

/// Source of the epic subset for one project
pub trait EpicSelector {
    fn select(&mut self, project: &str, available: &[String]) -> Result<Vec<String>>;
}

/// A fixed list, typically from `--epics`; `all` selects everything
pub struct StaticSelection(pub Vec<String>);

impl EpicSelector for StaticSelection {
    fn select(&mut self, _project: &str, available: &[String]) -> Result<Vec<String>> {
        if self.0.iter().any(|name| name.eq_ignore_ascii_case("all")) {
            return Ok(available.to_vec());
        }
        Ok(self.0.clone())
    }
}

/// Interactive prompt over any reader/writer pair
pub struct PromptSelection<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptSelection<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> EpicSelector for PromptSelection<R, W> {
    fn select(&mut self, project: &str, available: &[String]) -> Result<Vec<String>> {
        if available.is_empty() {
            writeln!(self.output, "Project {} has no epics", project)?;
            return Ok(Vec::new());
        }

        writeln!(self.output, "Epics in {}:", project)?;
        for (i, name) in available.iter().enumerate() {
            writeln!(self.output, "  {}. {}", i + 1, name)?;
        }

        loop {
            write!(
                self.output,
                "Select epics (numbers or names, comma-separated, or 'all'): "
            )?;
            self.output.flush()?;

            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .context("Failed to read selection")?;
            if read == 0 {
                bail!("No epic selection given");
            }

            match parse_selection(&line, available) {
                Ok(selected) if !selected.is_empty() => return Ok(selected),
                Ok(_) => writeln!(self.output, "Nothing selected")?,
                Err(msg) => writeln!(self.output, "{}", msg)?,
            }
        }
    }
}

/// Parse a comma-separated answer of 1-based numbers, names or `all`
pub fn parse_selection(answer: &str, available: &[String]) -> Result<Vec<String>, String> {
    let mut selected: Vec<String> = Vec::new();
    for token in answer.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if token.eq_ignore_ascii_case("all") {
            return Ok(available.to_vec());
        }

        let name = match token.parse::<usize>() {
            Ok(n) if n >= 1 && n <= available.len() => &available[n - 1],
            Ok(n) => return Err(format!("No epic number {}", n)),
            Err(_) => available
                .iter()
                .find(|name| name.as_str() == token)
                .ok_or_else(|| format!("Unknown epic: {}", token))?,
        };
        if !selected.contains(name) {
            selected.push(name.clone());
        }
    }
    Ok(selected)
}
