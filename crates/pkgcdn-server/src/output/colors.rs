//! Terminal color support.
//!
//! Colors are used only when both standard streams are terminals and
//! `NO_COLOR` is not set.

use std::env;
use std::io::{self, IsTerminal};

const RESET: &str = "\x1b[0m";

/// Paints text with ANSI escapes when the terminal supports it
#[derive(Debug, Clone, Copy)]
pub struct ColorSupport {
    enabled: bool,
}

impl ColorSupport {
    pub fn detect() -> Self {
        let enabled = env::var_os("NO_COLOR").is_none() && io::stderr().is_terminal() && io::stdout().is_terminal();
        Self { enabled }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("{}{}{}", code, text, RESET)
        } else {
            text.to_string()
        }
    }

    pub fn bold(&self, text: &str) -> String {
        self.paint("\x1b[1m", text)
    }

    pub fn cyan(&self, text: &str) -> String {
        self.paint("\x1b[36m", text)
    }

    pub fn yellow(&self, text: &str) -> String {
        self.paint("\x1b[33m", text)
    }

    pub fn red(&self, text: &str) -> String {
        self.paint("\x1b[31m", text)
    }

    pub fn dim(&self, text: &str) -> String {
        self.paint("\x1b[2m", text)
    }
}
