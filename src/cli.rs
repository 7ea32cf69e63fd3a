use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "dvgate",
    version,
    about = "Pre-commit access gate: evaluates staged changes against the repository policy"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    pub json: bool,
    /// No subcommand runs the gate, which is what the pre-commit hook does.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate the staged change set (the pre-commit entry point).
    Check,
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum TokenCommands {
    /// Print the SHA-256 hex of a secret for pasting into a policy token.
    /// Pass `-` to read the secret from stdin (keeps it out of history).
    Hash { secret: String },
}

#[derive(Subcommand, Debug)]
pub enum LedgerCommands {
    /// Print the bypass ledger records.
    List,
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    /// Load and validate the policy, printing a normalized summary.
    Check,
}
