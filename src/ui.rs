#![allow(dead_code)]

use colored::Colorize;
use declarative::ConfirmCallback;
use std::io;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// `1 resource`, `3 resources`
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// Terminal width, or 100 when not attached to a terminal
pub fn width() -> usize {
    let (_, cols) = console::Term::stdout().size();
    if cols == 0 { 100 } else { usize::from(cols) }
}

/// Confirmation through a dialoguer prompt.
///
/// With `assume_yes`, or when nobody is at the terminal, the prompt is
/// skipped: the former confirms, the latter refuses.
pub struct Prompt {
    pub assume_yes: bool,
}

impl ConfirmCallback for Prompt {
    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        if !console::user_attended() {
            warn("Not running interactively; pass --yes to proceed");
            return Ok(false);
        }
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| match e {
                dialoguer::Error::IO(io) => io,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural() {
        assert_eq!(plural(0, "resource"), "0 resources");
        assert_eq!(plural(1, "resource"), "1 resource");
        assert_eq!(plural(4, "output"), "4 outputs");
    }

    #[test]
    fn test_prompt_assume_yes() {
        let mut prompt = Prompt { assume_yes: true };
        assert!(prompt.confirm("Apply?").unwrap());
    }
}
