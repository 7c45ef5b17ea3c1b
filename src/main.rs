use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forge_fleet::bot::Bot;
use forge_fleet::bots::{DependencyEdge, MirrorBot, TopologicalBot};
use forge_fleet::config::{BotDefinition, Config};
use forge_fleet::host::git::GitRemote;
use forge_fleet::host::HostedRepository;
use forge_fleet::runner::Runner;
use forge_fleet::types::{BotName, Branch};
use forge_fleet::vcs::CommitIdentity;

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_fleet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(config_path) = std::env::args().nth(1) else {
        eprintln!("usage: forge-fleet <config.json>");
        return ExitCode::FAILURE;
    };

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %config_path, error = %e, "cannot load configuration");
            return ExitCode::FAILURE;
        }
    };

    let mut bots = Vec::new();
    for definition in &config.bots {
        match build_bot(definition) {
            Ok(bot) => bots.push(bot),
            Err(reason) => {
                tracing::error!(bot = definition.name(), %reason, "cannot build bot");
                return ExitCode::FAILURE;
            }
        }
    }

    tracing::info!(bots = bots.len(), "configuration loaded");
    let runner = match Runner::new(config.runner.to_runner_config(), bots) {
        Ok(runner) => runner,
        Err(e) => {
            tracing::error!(error = %e, "cannot start runner");
            return ExitCode::FAILURE;
        }
    };
    runner.run();
    ExitCode::SUCCESS
}

fn build_bot(definition: &BotDefinition) -> Result<Bot, String> {
    match definition {
        BotDefinition::Mirror {
            name,
            source,
            destination,
            branches,
        } => {
            let source: Arc<dyn HostedRepository> =
                Arc::new(GitRemote::new(&source.name, &source.url));
            let destination: Arc<dyn HostedRepository> =
                Arc::new(GitRemote::new(&destination.name, &destination.url));
            let branches = branches.iter().map(Branch::new).collect();
            Ok(Bot::Mirror(MirrorBot::new(
                BotName::new(name),
                source,
                destination,
                branches,
            )))
        }
        BotDefinition::Topological {
            name,
            repository,
            edges,
            committer,
        } => {
            let repository: Arc<dyn HostedRepository> =
                Arc::new(GitRemote::new(&repository.name, &repository.url));
            let edges = edges
                .iter()
                .map(|edge| DependencyEdge::new(edge.branch.as_str(), edge.depends_on.as_str()))
                .collect();
            let identity = CommitIdentity::new(&committer.name, &committer.email);
            Ok(Bot::Topological(TopologicalBot::new(
                BotName::new(name),
                repository,
                edges,
                identity,
            )))
        }
        BotDefinition::Issues { project, .. } => Err(format!(
            "issue project {} needs a tracker client; none is built in - construct \
             an IssueBot against your client through the library interface",
            project
        )),
    }
}
