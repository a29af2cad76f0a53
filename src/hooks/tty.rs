use std::io::{BufRead, BufReader, Write};

use crate::utils::is_interactive_terminal;

/// Capability for asking the user a yes/no question on the controlling
/// terminal. Hooks run with stdin/stdout owned by git, so the prompt goes to
/// `/dev/tty` directly; tests inject deterministic outcomes instead.
pub trait Confirm {
    fn has_tty(&self) -> bool;
    fn confirm(&self, question: &str, context: &str, default: bool) -> bool;
}

pub struct DevTty;

impl Confirm for DevTty {
    fn has_tty(&self) -> bool {
        is_interactive_terminal()
    }

    fn confirm(&self, question: &str, context: &str, default: bool) -> bool {
        let Ok(mut tty_out) = std::fs::OpenOptions::new().write(true).open("/dev/tty") else {
            return default;
        };
        let Ok(tty_in) = std::fs::File::open("/dev/tty") else {
            return default;
        };

        let hint = if default { "[Y/n]" } else { "[y/N]" };
        if !context.is_empty() {
            let _ = writeln!(tty_out, "{}", context);
        }
        let _ = write!(tty_out, "{} {} ", question, hint);
        let _ = tty_out.flush();

        let mut line = String::new();
        if BufReader::new(tty_in).read_line(&mut line).is_err() {
            return default;
        }
        match line.trim().to_lowercase().as_str() {
            "" => default,
            "y" | "yes" => true,
            "n" | "no" => false,
            _ => default,
        }
    }
}

/// Fixed-outcome Confirm for tests.
pub struct FixedConfirm {
    pub tty: bool,
    pub answer: bool,
}

impl Confirm for FixedConfirm {
    fn has_tty(&self) -> bool {
        self.tty
    }

    fn confirm(&self, _question: &str, _context: &str, _default: bool) -> bool {
        self.answer
    }
}
