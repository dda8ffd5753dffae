use std::path::PathBuf;

use clap::{Parser, Subcommand};
use warden_core::auth::policy::SecurityLevel;

/// Credential tooling for Warden. Passwords are read from stdin.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a password against a policy preset and report its strength
    Check {
        #[arg(long, env = "PASSWORD_POLICY", default_value = "medium")]
        policy: SecurityLevel,
    },

    /// Hash a password that satisfies the policy
    Hash {
        #[arg(long, env = "PASSWORD_POLICY", default_value = "medium")]
        policy: SecurityLevel,

        /// bcrypt cost; defaults to the preset's cost
        #[arg(long, env = "BCRYPT_COST", value_parser = clap::value_parser!(u32).range(4..=31))]
        cost: Option<u32>,
    },

    /// Verify a password against a stored hash
    Verify {
        #[arg(long, required_unless_present = "hash_file", conflicts_with = "hash_file")]
        hash: Option<String>,

        /// File holding the stored hash
        #[arg(long)]
        hash_file: Option<PathBuf>,
    },

    /// Print version information
    Version,
}
