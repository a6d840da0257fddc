//! Output format of the host's own diagnostics.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How log events are rendered on stderr.
///
/// Parsing accepts either case, so `"JSON"` from a hand-edited options file
/// selects [`LogFormat::Json`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event, for the editor's log collector.
    #[default]
    Json,
    /// Single-line text for reading in a terminal.
    Compact,
}

impl LogFormat {
    /// Whether ANSI colours belong in the output when writing to a terminal.
    ///
    /// JSON output never carries escape codes.
    #[must_use]
    pub const fn uses_ansi(self, terminal: bool) -> bool {
        matches!(self, Self::Compact) && terminal
    }
}

/// Error returned when a [`LogFormat`] name is not recognised.
pub type LogFormatParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(LogFormat::Json, true, false)]
    #[case(LogFormat::Compact, true, true)]
    #[case(LogFormat::Compact, false, false)]
    fn colours_only_compact_terminal_output(
        #[case] format: LogFormat,
        #[case] terminal: bool,
        #[case] expected: bool,
    ) {
        assert_eq!(format.uses_ansi(terminal), expected);
    }

    #[rstest]
    fn displays_snake_case_names() {
        assert_eq!(LogFormat::Compact.to_string(), "compact");
    }
}
