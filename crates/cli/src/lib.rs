pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "supplyq",
    about = "SupplyQ operator CLI",
    long_about = "Operate the SupplyQ query gateway: readiness checks, migrations, dataset loading, \
                  config inspection, guard dry-runs, and one-shot questions.",
    after_help = "Examples:\n  supplyq doctor --json\n  supplyq seed --csv data/supply_chain.csv\n  \
                  supplyq guard --role Finance --region India --sql \"SELECT sales FROM supply_chain\"\n  \
                  supplyq ask --role Finance --region India --question \"top 5 orders by sales\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the supply-chain CSV into a fresh supply_chain table")]
    Seed {
        #[arg(long, help = "Path to the supply-chain CSV export")]
        csv: PathBuf,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, access policy, text generator, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the schema text a role is allowed to see")]
    Schema {
        #[arg(long)]
        role: String,
    },
    #[command(about = "Run the query guard on a statement without executing it")]
    Guard {
        #[arg(long)]
        role: String,
        #[arg(long, default_value = "All")]
        region: String,
        #[arg(long)]
        sql: String,
    },
    #[command(about = "Answer a single question through the agent runtime")]
    Ask {
        #[arg(long)]
        role: String,
        #[arg(long, default_value = "All")]
        region: String,
        #[arg(long, default_value = "cli")]
        user: String,
        #[arg(long)]
        question: String,
        #[arg(long, help = "Force a tool: database, documents, or web")]
        tool: Option<String>,
        #[arg(long, help = "Additional caller claims as a JSON document")]
        claims: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { csv } => commands::seed::run(&csv),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Schema { role } => commands::schema::run(&role),
        Command::Guard { role, region, sql } => commands::guard::run(&role, &region, &sql),
        Command::Ask { role, region, user, question, tool, claims } => {
            commands::ask::run(commands::ask::AskArgs {
                question,
                user_id: user,
                role,
                region,
                tool,
                claims,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
