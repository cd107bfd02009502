use std::io::{self, IsTerminal, Write};
use std::process::{Command, Stdio};

const DEFAULT_PAGER: &str = "less -RS";

/// `SQLTUNE_PAGER`, then `PAGER`, then `less -RS` (no wrapping for wide tables).
fn pager_command(sqltune_pager: Option<String>, pager: Option<String>) -> Vec<String> {
    let chosen = sqltune_pager
        .into_iter()
        .chain(pager)
        .find(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PAGER.to_string());
    chosen.split_whitespace().map(str::to_string).collect()
}

/// Print `output`, through a pager when it is taller than the terminal.
pub fn print_with_pager(output: &str) -> io::Result<()> {
    if !io::stdout().is_terminal() {
        println!("{output}");
        return Ok(());
    }

    let (_, term_height) = crossterm::terminal::size().unwrap_or((80, 24));
    if output.lines().count() <= term_height as usize {
        println!("{output}");
        return Ok(());
    }

    let command = pager_command(
        std::env::var("SQLTUNE_PAGER").ok(),
        std::env::var("PAGER").ok(),
    );
    let Some((program, args)) = command.split_first() else {
        println!("{output}");
        return Ok(());
    };

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(_) => {
            println!("{output}");
            return Ok(());
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        // the pager may exit before reading everything
        let _ = writeln!(stdin, "{output}");
    }
    let _ = child.wait();
    Ok(())
}
