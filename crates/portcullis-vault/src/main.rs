//! Portcullis Admin - Credential administration CLI

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portcullis_core::{EnrollmentState, UserId};
use portcullis_vault::{
    CredentialStore, EnrollmentPolicy, EnrollmentTracker, RotationAck, StoreConfig, VaultPaths,
};

/// Portcullis Admin - manage users, tokens and the pepper
#[derive(Parser)]
#[command(name = "portcullis-admin")]
#[command(about = "Administration for the Portcullis access controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the credential and enrollment files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Pepper file (keep it off the data volume)
    #[arg(long, global = true)]
    pepper_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the credential files and set the admin password
    Init {
        #[arg(long)]
        admin_password: String,
    },

    /// Show store status
    Status,

    /// Issue a single-use registration code for a new user
    IssueToken {
        #[arg(long)]
        admin_password: String,

        /// Code lifetime in minutes
        #[arg(long, default_value = "10")]
        ttl_minutes: u64,
    },

    /// List registered users
    ListUsers,

    /// Show progressive enrollment progress
    Progress,

    /// Remove one user
    RemoveUser {
        #[arg(long)]
        id: UserId,

        #[arg(long)]
        admin_password: String,
    },

    /// Remove every user
    ClearUsers {
        #[arg(long)]
        admin_password: String,
    },

    /// Generate a new pepper (DESTRUCTIVE - every PIN must be re-registered)
    RotatePepper {
        /// Required acknowledgement
        #[arg(long)]
        invalidate_all_pins: bool,

        #[arg(long)]
        admin_password: String,
    },

    /// Change the progressive enrollment thresholds
    SetPolicy {
        #[arg(long)]
        samples_required: u32,

        #[arg(long)]
        min_quality: f32,

        #[arg(long)]
        max_session_attempts: u32,

        #[arg(long)]
        admin_password: String,
    },

    /// Change the admin password
    ChangeAdminPassword {
        #[arg(long)]
        admin_password: String,

        #[arg(long)]
        new_password: String,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portcullis_vault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut paths = match &cli.data_dir {
        Some(dir) => VaultPaths::in_dir(dir, VaultPaths::default().pepper),
        None => VaultPaths::default(),
    };
    if let Some(pepper) = cli.pepper_file.clone() {
        paths.pepper = pepper;
    }

    let ttl = match &cli.command {
        Commands::IssueToken { ttl_minutes, .. } => Duration::from_secs(ttl_minutes * 60),
        _ => portcullis_vault::DEFAULT_TOKEN_TTL,
    };

    if !matches!(cli.command, Commands::Init { .. }) && !paths.credentials.exists() {
        bail!("No credential file at {:?}. Run 'portcullis-admin init' first.", paths.credentials);
    }

    let store = CredentialStore::open(StoreConfig::from_paths(&paths).with_token_ttl(ttl))
        .context("Failed to open credential store")?;
    let tracker = EnrollmentTracker::open(&paths.enrollment, EnrollmentPolicy::default())
        .context("Failed to open enrollment tracker")?;

    match cli.command {
        Commands::Init { admin_password } => {
            if store.admin_configured()? {
                bail!("Admin credential already set. Use change-admin-password instead.");
            }
            store.initialize_admin(&admin_password)?;

            println!("\n=== Portcullis Initialized ===\n");
            println!("Credential file: {:?}", store.path());
            println!("Pepper file:     {:?}", paths.pepper);
            println!("Pepper:          {}", store.pepper_fingerprint()?);
            println!("\n⚠️  Back up the pepper file separately. Without it no PIN can be verified.");
        }

        Commands::Status => {
            let users = store.list_users()?;
            let with_pin = users.iter().filter(|u| u.has_pin()).count();
            let policy = tracker.policy()?;

            println!("\n=== Portcullis Status ===\n");
            println!("Credential file: {:?}", store.path());
            println!("Pepper:          {}", store.pepper_fingerprint()?);
            println!("Admin set:       {}", store.admin_configured()?);
            println!("Users:           {} ({} with PIN)", users.len(), with_pin);
            println!("Queued deletes:  {}", store.orphaned_templates()?.len());
            println!(
                "Enrollment:      {} samples >= {:.2}, {} attempts per session",
                policy.samples_required, policy.min_quality, policy.max_session_attempts
            );
        }

        Commands::IssueToken { admin_password, .. } => {
            let token = store.issue_registration_token(&admin_password)?;

            println!("\n=== Registration Code ===\n");
            println!("Code:    {}", token.code());
            println!("User ID: {}", token.target_user_id());
            println!("Expires: {}", token.expires_at().format("%Y-%m-%d %H:%M:%S UTC"));
            println!("\nAt the keypad press A, enter the code, then #.");
            println!("⚠️  The code is shown only once.");
        }

        Commands::ListUsers => {
            let users = store.list_users()?;
            if users.is_empty() {
                println!("No users registered.");
                return Ok(());
            }

            println!("\n=== Registered Users ===\n");
            println!("{:>4}  {:<10}  {:<4}  {:<8}  Created", "ID", "Enrollment", "PIN", "Template");
            for user in users {
                let template = match user.fingerprint_template_id {
                    Some(template) => template.to_string(),
                    None => "-".into(),
                };
                println!(
                    "{:>4}  {:<10}  {:<4}  {:<8}  {}",
                    user.user_id,
                    user.enrollment_state.to_string(),
                    if user.has_pin() { "yes" } else { "no" },
                    template,
                    user.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::Progress => {
            let ids = store.user_ids()?;
            let summary = tracker.progress_for(&ids)?;

            println!("\n=== Enrollment Progress ===\n");
            for progress in tracker.list_progress()? {
                let marker = match progress.state {
                    EnrollmentState::Complete => "✓",
                    EnrollmentState::Collecting if progress.session_open => "●",
                    _ => "○",
                };
                println!(
                    "{} user {:>3}: {}/{} samples ({:.0}%), {} submitted",
                    marker,
                    progress.user_id,
                    progress.samples_collected,
                    progress.samples_required,
                    progress.fraction() * 100.0,
                    progress.quality_scores.len()
                );
            }
            println!(
                "\nUsers: {}  Complete: {}  Collecting: {}  Pending: {}  Untracked: {}",
                summary.total,
                summary.complete,
                summary.collecting,
                summary.pending,
                summary.untracked
            );
        }

        Commands::RemoveUser { id, admin_password } => {
            let removed = store.remove_user(&admin_password, id)?;
            tracker.remove_user(id)?;

            println!("Removed user {}", id);
            if let Some(template) = removed.fingerprint_template_id {
                println!(
                    "Template {} is queued; the daemon deletes it from the sensor when idle.",
                    template
                );
            }
        }

        Commands::ClearUsers { admin_password } => {
            let removed = store.clear_all_users(&admin_password)?;
            let progress = tracker.clear_all()?;
            println!(
                "Removed {} users and {} enrollment records",
                removed.len(),
                progress
            );
            let queued = store.orphaned_templates()?;
            if !queued.is_empty() {
                println!(
                    "{} templates are queued for deletion from the sensor.",
                    queued.len()
                );
            }
        }

        Commands::RotatePepper {
            invalidate_all_pins,
            admin_password,
        } => {
            if !invalidate_all_pins {
                bail!("Pepper rotation invalidates every PIN. Pass --invalidate-all-pins to proceed.");
            }
            if !store.verify_admin(&admin_password)? {
                bail!("Not authorized");
            }

            let invalidated = store.rotate_pepper(RotationAck::InvalidateAllPins)?;
            warn!("Pepper rotated");
            println!("\n=== Pepper Rotated ===\n");
            println!("New pepper:      {}", store.pepper_fingerprint()?);
            println!("PINs invalidated: {}", invalidated);
            println!("\n⚠️  Every user must register a new PIN.");
        }

        Commands::SetPolicy {
            samples_required,
            min_quality,
            max_session_attempts,
            admin_password,
        } => {
            if !store.verify_admin(&admin_password)? {
                bail!("Not authorized");
            }

            tracker.set_policy(EnrollmentPolicy {
                samples_required,
                min_quality,
                max_session_attempts,
            })?;
            info!("Enrollment policy updated");
            println!("Policy applies to enrollments started from now on.");
            println!("A policy set in the daemon config replaces it at the next daemon start.");
        }

        Commands::ChangeAdminPassword {
            admin_password,
            new_password,
        } => {
            store.set_admin_password(&admin_password, &new_password)?;
            println!("Admin password changed.");
        }
    }

    Ok(())
}
