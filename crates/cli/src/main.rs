//! Infrastructure Optimizer CLI
//!
//! A command-line tool for creating and triggering audits, reviewing and
//! launching action plans, and checking the health of an optimizer.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{audits, health, plans};
use uuid::Uuid;

/// Infrastructure Optimizer CLI
#[derive(Parser)]
#[command(name = "optctl")]
#[command(author, version, about = "CLI for the Infrastructure Optimizer", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via OPTCTL_API_URL env var)
    #[arg(long, env = "OPTCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage audits
    #[command(subcommand)]
    Audit(AuditCommands),

    /// Manage action plans
    #[command(subcommand)]
    Plan(PlanCommands),

    /// Show service health and readiness
    Health,

    /// Show or change the saved CLI settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the saved settings
    Show,

    /// Save settings used when no flag or environment variable is given
    Set {
        /// Default API endpoint URL
        #[arg(long)]
        api_url: Option<String>,

        /// Default output format
        #[arg(long)]
        format: Option<output::OutputFormat>,
    },
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Create an audit
    Create {
        /// Goal to optimize for
        #[arg(required_unless_present = "template")]
        goal: Option<String>,

        /// Audit name (generated if not specified)
        #[arg(long)]
        name: Option<String>,

        /// Strategy to run (selected from the goal if not specified)
        #[arg(long, short)]
        strategy: Option<String>,

        /// Run continuously, every INTERVAL seconds
        #[arg(long)]
        interval: Option<u64>,

        /// Strategy parameter as name=value, repeatable
        #[arg(long = "param", short = 'p')]
        parameters: Vec<String>,

        /// Audit scope as a JSON document
        #[arg(long)]
        scope: Option<String>,

        /// Launch the resulting action plan immediately
        #[arg(long)]
        auto_trigger: bool,

        /// Audit template to start from
        #[arg(long)]
        template: Option<Uuid>,
    },

    /// Run an audit now
    Trigger {
        /// Audit UUID
        uuid: Uuid,
    },

    /// Cancel an audit and its recommended plans
    Cancel {
        /// Audit UUID
        uuid: Uuid,
    },

    /// Show one audit
    Show {
        /// Audit UUID
        uuid: Uuid,
    },

    /// List audits
    List {
        /// Filter by state (pending, ongoing, succeeded, failed, cancelled, suspended)
        #[arg(long)]
        state: Option<String>,

        /// Filter by goal
        #[arg(long, short)]
        goal: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// List action plans
    List {
        /// Filter by audit UUID
        #[arg(long, short)]
        audit: Option<Uuid>,

        /// Filter by state (recommended, ongoing, succeeded, ...)
        #[arg(long)]
        state: Option<String>,
    },

    /// Show an action plan with its actions and efficacy
    Show {
        /// Action plan UUID
        uuid: Uuid,
    },

    /// Launch a recommended action plan
    Launch {
        /// Action plan UUID
        uuid: Uuid,
    },

    /// Cancel an action plan
    Cancel {
        /// Action plan UUID
        uuid: Uuid,
    },
}

fn run_config(command: ConfigCommands, config: config::Config) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            output::print_json(&config);
            Ok(())
        }
        ConfigCommands::Set { api_url, format } => {
            let path = config::Config::config_path()?;
            let updated = config.with_overrides(api_url, format)?;
            updated.save_to(&path)?;
            output::print_success(&format!("Saved settings to {}", path.display()));
            Ok(())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    if let Commands::Config(command) = cli.command {
        return run_config(command, config);
    }
    let api_url = cli.api_url.unwrap_or_else(|| config.api_url_or_default());
    let format = match cli.format {
        Some(format) => format,
        None => config
            .default_format
            .as_deref()
            .and_then(|f| output::OutputFormat::from_str(f, true).ok())
            .unwrap_or_default(),
    };
    if cli.verbose {
        output::print_info(&format!("Using optimizer at {}", api_url));
    }

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Audit(audit_cmd) => match audit_cmd {
            AuditCommands::Create {
                goal,
                name,
                strategy,
                interval,
                parameters,
                scope,
                auto_trigger,
                template,
            } => {
                let options = audits::CreateOptions {
                    goal,
                    name,
                    strategy,
                    interval,
                    parameters,
                    scope,
                    auto_trigger,
                    template,
                };
                audits::create_audit(&client, options, format).await?;
            }
            AuditCommands::Trigger { uuid } => audits::trigger_audit(&client, uuid, format).await?,
            AuditCommands::Cancel { uuid } => audits::cancel_audit(&client, uuid, format).await?,
            AuditCommands::Show { uuid } => audits::show_audit(&client, uuid, format).await?,
            AuditCommands::List { state, goal } => {
                audits::list_audits(&client, state, goal, format).await?;
            }
        },
        Commands::Plan(plan_cmd) => match plan_cmd {
            PlanCommands::List { audit, state } => plans::list_plans(&client, audit, state, format).await?,
            PlanCommands::Show { uuid } => plans::show_plan(&client, uuid, format).await?,
            PlanCommands::Launch { uuid } => plans::launch_plan(&client, uuid, format).await?,
            PlanCommands::Cancel { uuid } => plans::cancel_plan(&client, uuid, format).await?,
        },
        Commands::Health => health::show_health(&client, format).await?,
        // Handled before the client is built.
        Commands::Config(_) => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
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
    fn test_audit_create_parses_options() {
        let cli = Cli::try_parse_from([
            "optctl",
            "--format",
            "json",
            "audit",
            "create",
            "server_consolidation",
            "--interval",
            "600",
            "-p",
            "period=3600",
            "--auto-trigger",
        ])
        .unwrap();

        assert_eq!(cli.format, Some(output::OutputFormat::Json));
        match cli.command {
            Commands::Audit(AuditCommands::Create {
                goal,
                interval,
                parameters,
                auto_trigger,
                ..
            }) => {
                assert_eq!(goal.as_deref(), Some("server_consolidation"));
                assert_eq!(interval, Some(600));
                assert_eq!(parameters, vec!["period=3600".to_string()]);
                assert!(auto_trigger);
            }
            _ => panic!("expected audit create"),
        }
    }

    #[test]
    fn test_audit_create_needs_goal_or_template() {
        assert!(Cli::try_parse_from(["optctl", "audit", "create"]).is_err());
        assert!(Cli::try_parse_from([
            "optctl",
            "audit",
            "create",
            "--template",
            "0f8fad5b-d9cb-469f-a165-70867728950e",
        ])
        .is_ok());
    }

    #[test]
    fn test_config_set_parses_format() {
        let cli = Cli::try_parse_from(["optctl", "config", "set", "--format", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigCommands::Set {
                api_url: None,
                format: Some(output::OutputFormat::Json)
            })
        ));
        assert!(Cli::try_parse_from(["optctl", "config", "set", "--format", "yaml"]).is_err());
    }

    #[test]
    fn test_plan_commands_require_uuid() {
        assert!(Cli::try_parse_from(["optctl", "plan", "launch", "not-a-uuid"]).is_err());
        let cli = Cli::try_parse_from([
            "optctl",
            "plan",
            "list",
            "--audit",
            "0f8fad5b-d9cb-469f-a165-70867728950e",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Plan(PlanCommands::List { audit: Some(_), state: None })
        ));
    }
}
