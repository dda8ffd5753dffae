// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::io::Read;
use std::path::Path;

use clap::Parser;
use cli::{Cli, Commands};
use warden_core::auth::password::CredentialHasher;
use warden_core::auth::policy::{PasswordPolicy, SecurityLevel, strength};

mod cli;
mod logging;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    logging::init()?;

    let args = Cli::parse();

    match &args.command {
        Commands::Check { policy } => check(*policy),
        Commands::Hash { policy, cost } => hash(*policy, *cost),
        Commands::Verify { hash, hash_file } => {
            let stored = match (hash, hash_file) {
                (Some(hash), _) => hash.clone(),
                (None, Some(path)) => read_hash_file(path)?,
                (None, None) => {
                    return Err(Error::Custom("--hash or --hash-file is required".into()));
                }
            };
            verify(&stored)
        }
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            println!("warden_core {}", warden_core::version());
            Ok(())
        }
    }
}

fn read_password() -> Result<String> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    Ok(input)
}

fn read_hash_file(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

fn check(level: SecurityLevel) -> Result<()> {
    let password = read_password()?;
    let policy = PasswordPolicy::preset(level);
    let result = policy.validate(&password);
    let report = strength(&password, &policy);

    if result.is_valid {
        println!("valid ({level} policy)");
    } else {
        println!("invalid ({level} policy)");
        for violation in &result.violations {
            println!("  - {violation}");
        }
    }
    println!("strength: {}/5 ({})", report.score, report.band);
    for hint in &report.feedback {
        println!("  * {hint}");
    }

    if result.is_valid {
        Ok(())
    } else {
        Err(Error::Custom("password does not satisfy the policy".into()))
    }
}

fn hash(level: SecurityLevel, cost: Option<u32>) -> Result<()> {
    let password = read_password()?;
    let mut policy = PasswordPolicy::preset(level);
    if let Some(cost) = cost {
        policy = policy.with_cost(cost);
    }

    let result = policy.validate(&password);
    if !result.is_valid {
        return Err(Error::Custom(format!(
            "password does not satisfy the {level} policy: {}",
            result.violations.join(", ")
        )));
    }

    log::debug!("hashing with cost {}", policy.cost());
    let hasher = CredentialHasher::new(policy.cost());
    let hashed = runtime()?.block_on(hasher.hash(&password))?;
    println!("{hashed}");
    Ok(())
}

fn verify(stored: &str) -> Result<()> {
    let password = read_password()?;
    let hasher = CredentialHasher::new(warden_core::auth::password::DEFAULT_COST);
    if runtime()?.block_on(hasher.verify(&password, stored))? {
        println!("match");
        Ok(())
    } else {
        println!("mismatch");
        Err(Error::Custom("password does not match".into()))
    }
}
