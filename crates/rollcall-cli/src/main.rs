use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn enroll(&self, id: &str, name: &str, images: Vec<String>) -> zbus::Result<u32>;
    async fn enroll_descriptors(
        &self,
        id: &str,
        name: &str,
        descriptors: Vec<Vec<f64>>,
    ) -> zbus::Result<u32>;
    async fn remove_person(&self, id: &str) -> zbus::Result<bool>;
    async fn list_people(&self) -> zbus::Result<String>;
    async fn start_session(&self, activity: &str) -> zbus::Result<()>;
    async fn stop_session(&self) -> zbus::Result<String>;
    async fn recognize(&self) -> zbus::Result<String>;
    async fn list_records(&self, activity: &str, date: &str) -> zbus::Result<String>;
    async fn export_records(&self, activity: &str, date: &str) -> zbus::Result<String>;
    async fn clear_records(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from registration photos
    Enroll {
        /// Stable person identifier (e.g. student number)
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Registration photos, one face each
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Enroll a person from a JSON file holding an array of descriptors
    EnrollDescriptors {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Remove an enrolled person
    Remove {
        id: String,
    },
    /// List enrolled people
    People,
    /// Start an attendance session for an activity
    Start {
        activity: String,
    },
    /// Stop the running session and save its record
    Stop,
    /// Show daemon status
    Status,
    /// Recognize faces in a single capture
    Recognize,
    /// List attendance records
    Records {
        /// Exact activity name
        #[arg(long)]
        activity: Option<String>,
        /// Date fragment, e.g. 2024-03 or 2024-03-14
        #[arg(long)]
        date: Option<String>,
    },
    /// Export attendance records as CSV
    Export {
        #[arg(long)]
        activity: Option<String>,
        #[arg(long)]
        date: Option<String>,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete all attendance records
    ClearRecords,
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = RollcallProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    match cli.command {
        Commands::Enroll { id, name, images } => {
            // The daemon resolves paths itself, so hand it absolute ones.
            let images = images
                .iter()
                .map(|p| {
                    std::fs::canonicalize(p)
                        .with_context(|| format!("cannot read {}", p.display()))
                        .map(|p| p.to_string_lossy().into_owned())
                })
                .collect::<Result<Vec<_>>>()?;
            let stored = proxy.enroll(&id, &name, images).await?;
            println!("Enrolled {name} ({id}) with {stored} descriptor(s)");
        }
        Commands::EnrollDescriptors { id, name, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let descriptors: Vec<Vec<f64>> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not an array of descriptors", file.display()))?;
            let stored = proxy.enroll_descriptors(&id, &name, descriptors).await?;
            println!("Enrolled {name} ({id}) with {stored} descriptor(s)");
        }
        Commands::Remove { id } => {
            if proxy.remove_person(&id).await? {
                println!("Removed {id}");
            } else {
                println!("No enrolled person with id {id}");
            }
        }
        Commands::People => print_json(&proxy.list_people().await?)?,
        Commands::Start { activity } => {
            proxy.start_session(&activity).await?;
            println!("Session started for {activity}");
        }
        Commands::Stop => {
            let record = proxy.stop_session().await?;
            if record == "null" {
                println!("Session stopped; nobody was recognized, no record written");
            } else {
                print_json(&record)?;
            }
        }
        Commands::Status => print_json(&proxy.status().await?)?,
        Commands::Recognize => print_json(&proxy.recognize().await?)?,
        Commands::Records { activity, date } => {
            let raw = proxy
                .list_records(activity.as_deref().unwrap_or(""), date.as_deref().unwrap_or(""))
                .await?;
            print_json(&raw)?;
        }
        Commands::Export {
            activity,
            date,
            output,
        } => {
            let csv = proxy
                .export_records(activity.as_deref().unwrap_or(""), date.as_deref().unwrap_or(""))
                .await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, csv)
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    println!("Exported to {}", path.display());
                }
                None => print!("{csv}"),
            }
        }
        Commands::ClearRecords => {
            let removed = proxy.clear_records().await?;
            println!("Deleted {removed} record(s)");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_records_filters() {
        let cli = Cli::try_parse_from(["rollcall", "records", "--activity", "CS101", "--date", "2024-03"]).unwrap();
        match cli.command {
            Commands::Records { activity, date } => {
                assert_eq!(activity.as_deref(), Some("CS101"));
                assert_eq!(date.as_deref(), Some("2024-03"));
            }
            _ => panic!("expected records"),
        }
    }

    #[test]
    fn test_enroll_requires_images() {
        assert!(Cli::try_parse_from(["rollcall", "enroll", "--id", "S1", "--name", "Alice"]).is_err());
    }
}
