//! Colored output for control-socket responses, grounded on the teacher's
//! `Terminal` color-scheme style (`cli/src/terminal.rs`).

use std::io::{self, Write};

use anyhow::Result;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::execute;

struct Colors;

impl Colors {
    const OK: Color = Color::Green;
    const ERROR: Color = Color::Red;
    const LINE: Color = Color::Cyan;
}

pub fn print_ok(lines: &[String]) -> Result<()> {
    let mut stdout = io::stdout();
    if lines.is_empty() {
        execute!(stdout, SetForegroundColor(Colors::OK), Print("OK\n"), ResetColor)?;
        return Ok(());
    }
    for line in lines {
        execute!(stdout, SetForegroundColor(Colors::LINE), Print(line), Print("\n"), ResetColor)?;
    }
    Ok(())
}

pub fn print_error(message: &str) -> Result<()> {
    let mut stderr = io::stderr();
    execute!(
        stderr,
        SetForegroundColor(Colors::ERROR),
        Print("error: "),
        Print(message),
        Print("\n"),
        ResetColor
    )?;
    stderr.flush()?;
    Ok(())
}
