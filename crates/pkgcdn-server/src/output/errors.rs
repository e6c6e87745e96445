//! Formatting for errors that stop the server from starting.

use pkgcdn_core::error::CdnError;

use super::colors::ColorSupport;

/// Renders startup failures with their cause chain and a hint
pub struct ErrorFormatter {
    colors: ColorSupport,
}

impl ErrorFormatter {
    pub fn new(colors: ColorSupport) -> Self {
        Self { colors }
    }

    pub fn format_error(&self, error: &anyhow::Error) -> String {
        let mut output = format!("{}: {}\n", self.colors.red("error"), error);

        for cause in error.chain().skip(1) {
            output.push_str(&format!("  {}: {}\n", self.colors.dim("caused by"), cause));
        }

        if let Some(hint) = error.downcast_ref::<CdnError>().and_then(hint) {
            output.push_str(&format!("\n{}: {}\n", self.colors.yellow("help"), hint));
        }

        output
    }
}

fn hint(error: &CdnError) -> Option<&'static str> {
    match error {
        CdnError::ConfigParse { .. } => Some("fix the config file at the reported location"),
        CdnError::ConfigValidation { .. } => Some("run `pkgcdn --help` to see accepted values"),
        CdnError::Io { .. } => Some("check that the storage directory exists and is writable"),
        _ => None,
    }
}
