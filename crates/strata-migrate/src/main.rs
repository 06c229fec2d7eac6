//! strata CLI
//!
//! Command-line tool for running migrations and seeds.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use strata_migrate::prelude::*;

/// Transactional database migrations and seeds.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file.
    #[arg(short, long, env = "STRATA_CONFIG", default_value = "strata.toml")]
    config: PathBuf,

    /// Connect with a DSN (e.g. `sqlite:db.sqlite` or `pgsql:host=localhost;dbname=app`)
    /// instead of the configured connection.
    #[arg(long, env = "STRATA_DSN")]
    dsn: Option<String>,

    /// User name for --dsn.
    #[arg(short, long)]
    username: Option<String>,

    /// Password for --dsn.
    #[arg(short, long, env = "STRATA_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Print the elapsed time.
    #[arg(short, long, global = true)]
    time: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage migrations.
    Migrations {
        #[command(subcommand)]
        action: MigrationsAction,
    },

    /// Manage seeds.
    Seeds {
        #[command(subcommand)]
        action: SeedsAction,
    },

    /// Work with the database directly.
    Database {
        #[command(subcommand)]
        action: DatabaseAction,
    },
}

#[derive(Subcommand)]
enum DatabaseAction {
    /// Open an interactive client session (mysql, psql or sqlite3).
    Use {
        /// Connection name; defaults to the configured one.
        connection: Option<String>,
    },
}

#[derive(Subcommand)]
enum MigrationsAction {
    /// Create the migrations history table.
    Init,

    /// Write a new migration file.
    Create {
        /// Migration name, e.g. "create users table".
        name: String,
    },

    /// List pending migrations.
    Todo,

    /// Apply every pending migration as one batch.
    Do,

    /// List completed migrations.
    Done,

    /// Revert the most recent batch.
    Undo,

    /// Drop the migrations history table.
    Drop {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SeedsAction {
    /// Write a new seed file.
    Create {
        /// Seed name, e.g. "users".
        name: String,
    },

    /// List seed files.
    List,

    /// Run one seed file.
    Run {
        /// Seed file name.
        name: String,
    },
}

fn open(cli: &Cli, settings: &Settings, name: &str) -> strata_migrate::Result<Connection> {
    if let Some(dsn) = &cli.dsn {
        let config =
            ConnectionConfig::from_dsn(dsn, cli.username.as_deref(), cli.password.as_deref())?;
        return Ok(Connection::new("dsn", config));
    }
    ConnectionRegistry::from_settings(settings)?.take(name)
}

fn confirm(question: &str) -> io::Result<bool> {
    print!("{question}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().to_ascii_lowercase().starts_with('y'))
}

fn print_list(title: &str, items: &[String], empty: &str) {
    println!("\n{title}");
    println!("{:-<60}", "");
    if items.is_empty() {
        println!("{empty}");
    }
    for (i, item) in items.iter().enumerate() {
        println!("{}. {item}", i + 1);
    }
    println!();
}

async fn migrations(
    cli: &Cli,
    settings: &Settings,
    action: &MigrationsAction,
) -> anyhow::Result<()> {
    let db = open(cli, settings, &settings.default_connection())?;
    let mut migrator = Migrator::new(
        db,
        LocalFiles::new(settings.migrations_path()),
        SqlUnitLoader,
    )
    .with_table(settings.migrations_table()?);

    match action {
        MigrationsAction::Init => {
            let table = migrator.history_table().table().to_string();
            if migrator.init().await? {
                info!("Created the migrations table '{table}', now create and run your migrations.");
            } else {
                info!("The migrations table '{table}' has already been created.");
            }
        }

        MigrationsAction::Create { name } => {
            let filename = migrator.create(name).await?;
            let path = migrator.files().path(&filename);
            info!("Created migration at '{}'", path.display());
        }

        MigrationsAction::Todo => {
            let pending = migrator.pending().await?;
            print_list("Pending migrations", &pending, "No migrations todo");
        }

        MigrationsAction::Do => {
            let applied = migrator.apply().await?;
            print_list("Applied migrations", &applied, "No migrations to do");
        }

        MigrationsAction::Done => {
            let history = migrator.history().await?;
            println!("\nCompleted migrations");
            println!("{:-<60}", "");
            if history.is_empty() {
                println!("No completed migrations");
            }
            for (i, record) in history.iter().enumerate() {
                println!(
                    "{}. {} (batch {}, {})",
                    i + 1,
                    record.filename,
                    record.sequence,
                    record.applied_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            println!();
        }

        MigrationsAction::Undo => {
            let reverted = migrator.revert().await?;
            print_list("Reverted migrations", &reverted, "No migrations to undo");
        }

        MigrationsAction::Drop { yes } => {
            let question = "Are you sure you want to remove the migrations table? (NO/yes) ";
            if !yes && !confirm(question)? {
                warn!("Aborted, the migrations table was not dropped.");
                return Ok(());
            }
            migrator.drop_history().await?;
            info!("Dropped the migrations table, run 'strata migrations init' to create it again.");
        }
    }
    Ok(())
}

async fn seeds(cli: &Cli, settings: &Settings, action: &SeedsAction) -> anyhow::Result<()> {
    // Connections open lazily, so create and list never touch the database.
    let db = open(cli, settings, &settings.seeds_connection())?;
    let mut seeder = Seeder::new(db, LocalFiles::new(settings.seeds_path()), SqlUnitLoader);

    match action {
        SeedsAction::Create { name } => {
            let filename = seeder.create(name)?;
            info!("Created seed at '{}'", seeder.files().path(&filename).display());
        }

        SeedsAction::List => {
            let list = seeder.list()?;
            if list.is_empty() {
                anyhow::bail!("No seeds found in '{}'", seeder.files().root().display());
            }
            print_list("Seeds", &list, "");
        }

        SeedsAction::Run { name } => {
            seeder.run(name).await?;
            info!("Seed '{name}' done.");
        }
    }
    Ok(())
}

fn database(cli: &Cli, settings: &Settings, action: &DatabaseAction) -> anyhow::Result<()> {
    match action {
        DatabaseAction::Use { connection } => {
            let name = connection
                .clone()
                .unwrap_or_else(|| settings.default_connection());
            let db = open(cli, settings, &name)?;
            let client = db.config().client_command();
            info!(connection = %db.name(), program = client.program, "Opening client session");

            let status = Command::new(client.program)
                .args(&client.args)
                .envs(client.env.iter().map(|(key, value)| (*key, value.as_str())))
                .status()
                .with_context(|| format!("Unable to start '{}'", client.program))?;
            if !status.success() {
                anyhow::bail!("'{}' exited with {status}", client.program);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = if cli.config.exists() {
        Settings::load(&cli.config)?
    } else {
        if cli.dsn.is_none() {
            warn!("Settings file '{}' not found, using defaults", cli.config.display());
        }
        Settings::default()
    };

    let started = Instant::now();
    match &cli.command {
        Commands::Migrations { action } => migrations(&cli, &settings, action).await?,
        Commands::Seeds { action } => seeds(&cli, &settings, action).await?,
        Commands::Database { action } => database(&cli, &settings, action)?,
    }

    if cli.time {
        info!("Time: {:.2}s", started.elapsed().as_secs_f64());
    }
    Ok(())
}
