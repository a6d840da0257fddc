//! Editor command table.

use std::fmt;
use std::str::FromStr;

use crate::errors::CommandError;
use crate::protocol::ProtocolOperation;

/// Commands the Vue completer answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Alias of [`Command::GoToDefinition`].
    GoToDeclaration,
    /// Alias of [`Command::GoToDefinition`].
    GoTo,
    /// Jump to the definition under the cursor.
    GoToDefinition,
    /// List references to the symbol under the cursor.
    GoToReferences,
    /// Code actions at the cursor.
    FixIt,
    /// Rename the symbol under the cursor.
    RefactorRename,
    /// Format the whole buffer.
    Format,
    /// Stop and start the server.
    RestartServer,
    /// Stop the server.
    StopServer,
}

impl Command {
    /// Every command, in table order.
    pub const ALL: [Self; 9] = [
        Self::GoToDeclaration,
        Self::GoTo,
        Self::GoToDefinition,
        Self::GoToReferences,
        Self::FixIt,
        Self::RefactorRename,
        Self::Format,
        Self::RestartServer,
        Self::StopServer,
    ];

    /// Name the editor uses for this command.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GoToDeclaration => "GoToDeclaration",
            Self::GoTo => "GoTo",
            Self::GoToDefinition => "GoToDefinition",
            Self::GoToReferences => "GoToReferences",
            Self::FixIt => "FixIt",
            Self::RefactorRename => "RefactorRename",
            Self::Format => "Format",
            Self::RestartServer => "RestartServer",
            Self::StopServer => "StopServer",
        }
    }

    /// What running this command does.
    #[must_use]
    pub const fn operation(self) -> Operation {
        match self {
            Self::GoToDeclaration | Self::GoTo | Self::GoToDefinition => {
                Operation::Passthrough(ProtocolOperation::Definition)
            }
            Self::GoToReferences => Operation::Passthrough(ProtocolOperation::References),
            Self::FixIt => Operation::Passthrough(ProtocolOperation::CodeActions),
            Self::RefactorRename => Operation::Passthrough(ProtocolOperation::Rename),
            Self::Format => Operation::Passthrough(ProtocolOperation::Format),
            Self::RestartServer => Operation::RestartServer,
            Self::StopServer => Operation::StopServer,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|command| command.name() == name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_owned()))
    }
}

/// The closed set of things a command can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Forward a request to the server unchanged.
    Passthrough(ProtocolOperation),
    /// Restart the server.
    RestartServer,
    /// Stop the server.
    StopServer,
}

/// Resolves command names to operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandRouter;

impl CommandRouter {
    /// Looks up `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::UnknownCommand`] for names outside the table.
    pub fn route(self, name: &str) -> Result<Operation, CommandError> {
        name.parse::<Command>().map(Command::operation)
    }

    /// Command names, sorted.
    #[must_use]
    pub fn defined_subcommands(self) -> Vec<&'static str> {
        let mut names: Vec<_> = Command::ALL.into_iter().map(Command::name).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("GoToDeclaration", Operation::Passthrough(ProtocolOperation::Definition))]
    #[case("GoTo", Operation::Passthrough(ProtocolOperation::Definition))]
    #[case("GoToDefinition", Operation::Passthrough(ProtocolOperation::Definition))]
    #[case("GoToReferences", Operation::Passthrough(ProtocolOperation::References))]
    #[case("FixIt", Operation::Passthrough(ProtocolOperation::CodeActions))]
    #[case("RefactorRename", Operation::Passthrough(ProtocolOperation::Rename))]
    #[case("Format", Operation::Passthrough(ProtocolOperation::Format))]
    #[case("RestartServer", Operation::RestartServer)]
    #[case("StopServer", Operation::StopServer)]
    fn routes_known_commands(#[case] name: &str, #[case] expected: Operation) {
        assert_eq!(CommandRouter.route(name).expect("known command"), expected);
    }

    #[rstest]
    #[case("GetDoc")]
    #[case("gotodefinition")]
    #[case("")]
    fn rejects_unknown_commands(#[case] name: &str) {
        let error = CommandRouter.route(name).expect_err("unknown command");

        assert!(matches!(error, CommandError::UnknownCommand(found) if found == name));
    }

    #[rstest]
    fn lists_subcommands_sorted() {
        let names = CommandRouter.defined_subcommands();

        assert_eq!(
            names,
            vec![
                "FixIt",
                "Format",
                "GoTo",
                "GoToDeclaration",
                "GoToDefinition",
                "GoToReferences",
                "RefactorRename",
                "RestartServer",
                "StopServer",
            ]
        );
    }

    #[rstest]
    fn names_round_trip_through_display() {
        for command in Command::ALL {
            assert_eq!(command.to_string().parse::<Command>().ok(), Some(command));
        }
    }
}
