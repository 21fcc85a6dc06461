use anyhow::{Result, bail};
use std::io::{self, IsTerminal, Write};

/// Ask a yes/no question on stderr. `assume_yes` answers it without asking.
pub fn confirm(question: &str, assume_yes: bool) -> Result<bool> {
  if assume_yes {
    return Ok(true);
  }

  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    bail!("Refusing to prompt in non-interactive mode. Pass --force to proceed.");
  }

  write!(io::stderr(), "{} [y/N] ", question)?;
  io::stderr().flush()?;

  let mut answer = String::new();
  io::stdin().read_line(&mut answer)?;

  Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
