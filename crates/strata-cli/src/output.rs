//! Colored terminal output for CLI commands
//!
//! Respects the `NO_COLOR` environment variable and the `--color` flag.

use std::io::Write;
use strata_engine::Diagnostics;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` from the CLI flag and environment.
///
/// Priority: `NO_COLOR` env > `--color` flag > auto-detect TTY.
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// Styled writer over stdout and stderr
pub struct StyledOutput {
    stdout: StandardStream,
    stderr: StandardStream,
}

impl StyledOutput {
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
            stderr: StandardStream::stderr(choice),
        }
    }

    fn styled(stream: &mut StandardStream, text: &str, color: Option<Color>, bold: bool) {
        let mut spec = ColorSpec::new();
        spec.set_fg(color).set_bold(bold);
        let _ = stream.set_color(&spec);
        let _ = write!(stream, "{}", text);
        let _ = stream.reset();
    }

    /// `name: Type = value` on stdout
    pub fn binding(&mut self, name: &str, ty: &str, value: &str) {
        Self::styled(&mut self.stdout, name, None, true);
        Self::styled(&mut self.stdout, &format!(": {}", ty), Some(Color::Cyan), false);
        let _ = writeln!(self.stdout, " = {}", value);
    }

    /// A value that could not be read, on stdout
    pub fn unavailable(&mut self, name: &str, ty: &str, reason: &str) {
        Self::styled(&mut self.stdout, name, None, true);
        Self::styled(&mut self.stdout, &format!(": {}", ty), Some(Color::Cyan), false);
        Self::styled(&mut self.stdout, &format!(" ({})", reason), Some(Color::Yellow), false);
        let _ = writeln!(self.stdout);
    }

    /// One-line result of a check, on stderr
    pub fn summary(&mut self, path: &str, diagnostics: &Diagnostics) {
        let (errors, warnings) = (diagnostics.error_count(), diagnostics.warning_count());
        if errors > 0 {
            Self::styled(&mut self.stderr, "error", Some(Color::Red), true);
            let _ = writeln!(
                self.stderr,
                ": {} has {} error(s) and {} warning(s)",
                path, errors, warnings
            );
        } else {
            Self::styled(&mut self.stderr, "ok", Some(Color::Green), true);
            let _ = writeln!(self.stderr, ": {} ({} warning(s))", path, warnings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_choices() {
        if std::env::var_os("NO_COLOR").is_some() {
            return;
        }
        assert_eq!(resolve_color_choice(Some("always")), ColorChoice::Always);
        assert_eq!(resolve_color_choice(Some("never")), ColorChoice::Never);
        assert_eq!(resolve_color_choice(None), ColorChoice::Auto);
    }
}
