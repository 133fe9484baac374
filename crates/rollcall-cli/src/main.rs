use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_hw::Camera;
use rollcall_store::{import_roster, AttendanceStore, SqliteStore, DATE_FORMAT};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn status(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Attendance database (default: $ROLLCALL_DB_PATH or the data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Stop the daemon's capture loop
    Stop,
    /// List attendance for a day
    List {
        /// Day to list, YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<String>,
        /// List every record instead of a single day
        #[arg(long, conflicts_with = "date")]
        all: bool,
    },
    /// Add a student to the roster
    Register {
        name: String,
    },
    /// Register every name in a file, one per line; existing names are skipped
    Import {
        file: PathBuf,
    },
    /// Remove a student and their attendance history
    Remove {
        name: String,
    },
    /// Rename a student, keeping their attendance history
    Rename {
        old: String,
        new: String,
    },
    /// List students on the roster
    Students,
    /// Delete all attendance records (the roster is kept)
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
    /// List video capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db = cli.db.unwrap_or_else(db_path);

    match cli.command {
        Commands::Status => {
            let proxy = daemon().await?;
            let status = proxy.status().await.context("Status() call failed")?;
            let value: serde_json::Value =
                serde_json::from_str(&status).context("daemon returned invalid JSON")?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Stop => {
            let proxy = daemon().await?;
            if proxy.stop().await.context("Stop() call failed")? {
                println!("capture loop stopping");
            } else {
                println!("capture loop already stopped");
            }
        }
        Commands::List { date, all } => {
            let store = SqliteStore::open(&db)?;
            let records = if all {
                store.all_attendance()?
            } else {
                let day = match date {
                    Some(value) => parse_day(&value)?,
                    None => chrono::Local::now().date_naive(),
                };
                store.attendance_on(day)?
            };
            if records.is_empty() {
                println!("no attendance recorded");
            }
            for record in records {
                println!("{}  {}", record.date.format(DATE_FORMAT), record.student_name);
            }
        }
        Commands::Register { name } => {
            let mut store = SqliteStore::open(&db)?;
            if store.register(name.trim())? {
                println!("registered {}", name.trim());
            } else {
                println!("{} is already on the roster", name.trim());
            }
        }
        Commands::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let mut store = SqliteStore::open(&db)?;
            let summary = import_roster(&mut store, &text)?;
            for name in &summary.skipped {
                println!("{name} is already on the roster");
            }
            println!(
                "registered {} students, skipped {}",
                summary.added.len(),
                summary.skipped.len()
            );
        }
        Commands::Remove { name } => {
            let mut store = SqliteStore::open(&db)?;
            if store.remove(&name)? {
                println!("removed {name}");
            } else {
                anyhow::bail!("{name} is not on the roster");
            }
        }
        Commands::Rename { old, new } => {
            let mut store = SqliteStore::open(&db)?;
            if store.rename(&old, new.trim())? {
                println!("renamed {old} to {}", new.trim());
            } else {
                anyhow::bail!("{old} is not on the roster");
            }
        }
        Commands::Students => {
            let store = SqliteStore::open(&db)?;
            for name in store.students()? {
                println!("{name}");
            }
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to clear attendance without --yes");
            }
            let mut store = SqliteStore::open(&db)?;
            let removed = store.clear_attendance()?;
            tracing::info!(removed, db = %db.display(), "attendance cleared");
            println!("removed {removed} attendance records");
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
    }

    Ok(())
}

async fn daemon() -> Result<AttendanceProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable on D-Bus")
}

fn db_path() -> PathBuf {
    std::env::var("ROLLCALL_DB_PATH")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| rollcall_store::default_data_dir().join(rollcall_store::DB_FILE_NAME))
}

fn parse_day(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .with_context(|| format!("invalid date '{value}', expected YYYY-MM-DD"))
}
