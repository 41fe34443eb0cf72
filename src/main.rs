//! `sprintctl` entry point.

use clap::Parser;

use sprintforge::cli::commands::{init, serve, sprint};
use sprintforge::cli::{Cli, Commands, SprintCommands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force, path } => init::execute(force, path, cli.json).await,
        Commands::Serve { port } => serve::execute(port).await,
        Commands::Sprint(cmd) => match cmd {
            SprintCommands::Create { spec_path, target_dir, developer_count, autonomy_mode, sprint_id, name } => {
                sprint::create(&cli.server, spec_path, target_dir, developer_count, autonomy_mode, sprint_id, name, cli.json).await
            }
            SprintCommands::List => sprint::list(&cli.server, cli.json).await,
            SprintCommands::Show { sprint_id } => sprint::show(&cli.server, &sprint_id, cli.json).await,
            SprintCommands::Start { sprint_id } => sprint::start(&cli.server, &sprint_id, cli.json).await,
            SprintCommands::Approve { sprint_id } => sprint::approve(&cli.server, &sprint_id, cli.json).await,
            SprintCommands::Pause { sprint_id } => sprint::pause(&cli.server, &sprint_id, cli.json).await,
            SprintCommands::Resume { sprint_id } => sprint::resume(&cli.server, &sprint_id, cli.json).await,
            SprintCommands::Cancel { sprint_id } => sprint::cancel(&cli.server, &sprint_id, cli.json).await,
            SprintCommands::Restart { sprint_id } => sprint::restart(&cli.server, &sprint_id, cli.json).await,
            SprintCommands::Complete { sprint_id } => sprint::complete(&cli.server, &sprint_id, cli.json).await,
            SprintCommands::MergeLocal { sprint_id } => sprint::merge_local(&cli.server, &sprint_id, cli.json).await,
            SprintCommands::RetryTask { sprint_id, task_id } => sprint::retry_task(&cli.server, &sprint_id, task_id, cli.json).await,
            SprintCommands::Logs { sprint_id } => sprint::logs(&cli.server, &sprint_id, cli.json).await,
        },
    }
}
