use std::io::{self, Write};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

#[derive(Debug, PartialEq, Eq)]
enum Edit {
    Typing,
    Submit,
    Cancel,
}

fn apply_key(buf: &mut String, key: &KeyEvent) -> Edit {
    if key.kind == KeyEventKind::Release {
        return Edit::Typing;
    }
    match key.code {
        KeyCode::Enter => Edit::Submit,
        KeyCode::Esc => Edit::Cancel,
        KeyCode::Char('c' | 'd') if key.modifiers.contains(KeyModifiers::CONTROL) => Edit::Cancel,
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            buf.clear();
            Edit::Typing
        }
        KeyCode::Backspace => {
            buf.pop();
            Edit::Typing
        }
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            buf.push(c);
            Edit::Typing
        }
        _ => Edit::Typing,
    }
}

/// Raw mode for as long as this lives.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Read one line from the terminal without echoing it. `None` when the
/// rater cancels with Esc, Ctrl-C or Ctrl-D. Blocks; run it off the
/// async runtime.
pub fn read_hidden(prompt: &str) -> io::Result<Option<String>> {
    let mut out = io::stdout();
    write!(out, "{prompt}")?;
    out.flush()?;

    let mut buf = String::new();
    let entered = {
        let _raw = RawMode::enable()?;
        loop {
            if let Event::Key(key) = event::read()? {
                match apply_key(&mut buf, &key) {
                    Edit::Typing => {}
                    Edit::Submit => break Some(buf),
                    Edit::Cancel => break None,
                }
            }
        }
    };
    writeln!(out)?;
    Ok(entered)
}
