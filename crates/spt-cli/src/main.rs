use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use spt_core::{Goal, ViewerContext, ViewerRole};
use spt_engine::{
    company_rollups, goal_progress, notifications, visible_to, GoalBook, GoalRejection,
    PipelineSnapshot,
};
use spt_import::{load_alias_tables, load_import_rows, map_rows};
use spt_storage::SnapshotStore;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "spt-cli")]
#[command(about = "Sales Pipeline Tracker command-line interface")]
struct Cli {
    /// Path of the persisted pipeline snapshot.
    #[arg(long, default_value = "pipeline.json", global = true)]
    snapshot: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Elevated,
    Standard,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Map a spreadsheet export and preview it; --commit replaces the
    /// working opportunity list wholesale.
    Import {
        file: PathBuf,
        #[arg(long)]
        commit: bool,
        /// YAML file overriding the built-in field alias tables.
        #[arg(long)]
        aliases: Option<PathBuf>,
    },
    /// Print company, goal and notification views for a viewer.
    Report {
        #[arg(long, value_enum, default_value = "elevated")]
        role: RoleArg,
        #[arg(long, default_value = "admin")]
        name: String,
    },
    /// Add a goal to the snapshot; duplicate scopes and non-positive
    /// targets are refused without touching the stored data.
    AddGoal {
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        supplier: Option<String>,
        #[arg(long)]
        target: f64,
    },
    /// Serve the JSON view API.
    Serve,
}

fn add_goal_to(
    snapshot: PipelineSnapshot,
    customer: Option<String>,
    supplier: Option<String>,
    target: f64,
) -> Result<PipelineSnapshot, GoalRejection> {
    let PipelineSnapshot {
        opportunities,
        goals,
        contacts,
    } = snapshot;
    let mut book = GoalBook::new(goals);
    book.add(Goal::new(customer, supplier, target))?;
    Ok(PipelineSnapshot {
        opportunities,
        goals: book.into_goals(),
        contacts,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = SnapshotStore::new(&cli.snapshot);

    match cli.command {
        Commands::Import {
            file,
            commit,
            aliases,
        } => {
            let tables = load_alias_tables(aliases.as_deref())?;
            let rows = load_import_rows(&file)?;
            let batch = map_rows(&rows, &tables);
            println!(
                "mapped {} row(s) in batch {}",
                batch.opportunities.len(),
                batch.batch_id
            );
            for opp in &batch.opportunities {
                println!(
                    "  {} | {} | {} | {:.2} | confidence {}",
                    opp.id, opp.customer, opp.owner, opp.amount, opp.confidence
                );
            }
            if commit {
                let snapshot = store
                    .load_or_default()
                    .await?
                    .with_opportunities(batch.opportunities);
                let saved = store.save(&snapshot).await?;
                info!(hash = %saved.content_hash, "snapshot committed");
                println!("committed to {}", saved.path.display());
            } else {
                println!("preview only; re-run with --commit to accept the batch");
            }
        }
        Commands::Report { role, name } => {
            let snapshot = store.load_or_default().await?;
            let viewer = ViewerContext::new(
                match role {
                    RoleArg::Elevated => ViewerRole::Elevated,
                    RoleArg::Standard => ViewerRole::Standard,
                },
                name,
            );
            let visible = visible_to(&snapshot.opportunities, &viewer);
            println!("visible opportunities: {}", visible.len());

            println!("\ncompanies:");
            for rollup in company_rollups(&visible) {
                println!(
                    "  {} | {} deal(s) | total {:.2}",
                    rollup.customer, rollup.count, rollup.total_amount
                );
            }

            println!("\ngoals:");
            for progress in goal_progress(&snapshot.goals, &visible) {
                println!(
                    "  {:?}/{:?} | target {:.2} | realized {:.2} | {:.1}%",
                    progress.goal.customer,
                    progress.goal.supplier,
                    progress.goal.target,
                    progress.realized,
                    progress.percent
                );
            }

            println!("\nnotifications:");
            for alert in notifications(&visible) {
                println!("  [{:?}] {}", alert.severity, alert.message);
            }
        }
        Commands::AddGoal {
            customer,
            supplier,
            target,
        } => {
            let snapshot = store.load_or_default().await?;
            match add_goal_to(snapshot, customer, supplier, target) {
                Ok(updated) => {
                    let saved = store.save(&updated).await?;
                    info!(hash = %saved.content_hash, "goal added");
                    println!(
                        "added goal; {} goal(s) in {}",
                        updated.goals.len(),
                        saved.path.display()
                    );
                }
                Err(rejection) => {
                    println!("goal refused: {rejection}");
                }
            }
        }
        Commands::Serve => {
            spt_web::serve_from_env().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_goal_appends_to_the_snapshot() {
        let snapshot = add_goal_to(PipelineSnapshot::default(), Some("ACME".into()), None, 500.0)
            .expect("first goal");
        assert_eq!(snapshot.goals.len(), 1);
        assert_eq!(snapshot.goals[0].customer.as_deref(), Some("ACME"));
    }

    #[test]
    fn add_goal_refuses_a_duplicate_scope() {
        let snapshot = add_goal_to(PipelineSnapshot::default(), Some("ACME".into()), None, 500.0)
            .expect("first goal");
        let err = add_goal_to(snapshot, Some("acme ".into()), None, 900.0)
            .expect_err("same scope, case and whitespace aside");
        assert_eq!(err, GoalRejection::DuplicateScope);
    }

    #[test]
    fn add_goal_refuses_a_non_positive_target() {
        let err = add_goal_to(PipelineSnapshot::default(), None, Some("Vendor".into()), 0.0)
            .expect_err("zero target");
        assert_eq!(err, GoalRejection::NonPositiveTarget);
    }
}
