//! Roster command-line tool.
//!
//! Seeds, lists, pages and bulk-updates members of one roster database.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use roster_core::{
    default_log_level, init_logging, Database, Direction, Member, MemberField, MemberRepository,
    PageRequest, Repository, Sort, StoreConfig, Team, TeamRepository,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "roster")]
#[command(author, version, about = "Member and team roster store")]
#[command(propagate_version = true)]
struct Cli {
    /// SQLite database file (created when missing)
    #[arg(long, global = true, env = "ROSTER_DB", default_value = "roster.db")]
    db: PathBuf,

    /// Absolute directory for rolling log files; logging is off when unset
    #[arg(long, global = true, env = "ROSTER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(long, global = true, env = "ROSTER_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Insert two teams and four members
    Seed,

    /// List members, optionally only those of one age
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        age: Option<i32>,
    },

    /// Show one page of members of an age, sorted by username descending
    Page {
        #[arg(long)]
        age: i32,

        /// Zero-based page index
        #[arg(long, default_value_t = 0)]
        page: u32,

        #[arg(long, default_value_t = 3)]
        size: u32,
    },

    /// Add one year to every member at least `min_age` old
    BumpAge {
        #[arg(long)]
        min_age: i32,
    },

    /// Print the schema and tool versions
    Version,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir).context("failed to initialize logging")?;
    }

    let config = StoreConfig::from_env().context("invalid ROSTER_* configuration")?;
    let db = Database::open_with_config(&cli.db, config)
        .with_context(|| format!("failed to open {}", cli.db.display()))?;

    match cli.command {
        Commands::Seed => seed(&db),
        Commands::List { age } => list(&db, age),
        Commands::Page { age, page, size } => show_page(&db, age, page, size),
        Commands::BumpAge { min_age } => bump_age(&db, min_age),
        Commands::Version => {
            println!("roster {}", roster_core::core_version());
            println!("schema {}", db.schema_version()?);
            Ok(())
        }
    }
}

fn seed(db: &Database) -> Result<()> {
    let members = db.transaction(|uow| {
        let teams = TeamRepository::new(uow);
        let team_a = teams.save(Team::new("teamA"))?;
        let team_b = teams.save(Team::new("teamB"))?;

        let members = MemberRepository::new(uow);
        for (username, age, team) in [
            ("member1", 10, &team_a),
            ("member2", 20, &team_a),
            ("member3", 30, &team_b),
            ("member4", 40, &team_b),
        ] {
            members.save(Member::with_team(username, age, team))?;
        }
        members.count()
    })?;
    info!("event=cli_seed module=cli status=ok members={members}");
    println!("seeded; {members} member(s) stored");
    Ok(())
}

fn list(db: &Database, age: Option<i32>) -> Result<()> {
    let rows = db.transaction(|uow| {
        let members = MemberRepository::new(uow);
        match age {
            Some(age) => {
                let request = PageRequest::of(0, u32::MAX)?
                    .with_sort(Sort::by(MemberField::Username, Direction::Asc));
                Ok(members.find_by_age(age, &request)?.content)
            }
            None => members.find_all_sorted(&Sort::asc(MemberField::Username)),
        }
    })?;
    for member in &rows {
        print_member(member);
    }
    Ok(())
}

fn show_page(db: &Database, age: i32, page: u32, size: u32) -> Result<()> {
    let request = PageRequest::of(page, size)?.with_sort(Sort::desc(MemberField::Username));
    let page = db.transaction(|uow| MemberRepository::new(uow).find_by_age(age, &request))?;

    println!(
        "page {}/{} ({} total)",
        page.number + 1,
        page.total_pages().max(1),
        page.total_elements
    );
    for member in &page.content {
        print_member(member);
    }
    Ok(())
}

fn bump_age(db: &Database, min_age: i32) -> Result<()> {
    let affected = db.transaction(|uow| MemberRepository::new(uow).bulk_age_plus(min_age))?;
    println!("{affected} member(s) updated");
    Ok(())
}

fn print_member(member: &Member) {
    let id = member.id.map(|id| id.to_string()).unwrap_or_default();
    println!("{id}  {:<16} {:>3}", member.username, member.age);
}
