//! CLI subcommands: init, validate, plan, launch-stacks, create-image, status.

use crate::backend::{file, FileBackend};
use crate::core::types::{value_to_string, RollbackPolicy, RunReport};
use crate::core::{config, executor, planner};
use crate::imaging::{self, ImageBuild};
use crate::stacks::{self, MachineType};
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where the configuration comes from.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to the cluster config
    #[arg(short, long, default_value = "cluster.yaml")]
    pub config: PathBuf,

    /// Config profile to use
    #[arg(short, long, env = "STRATA_PROFILE", default_value = "accumulo")]
    pub profile: String,

    /// Override a config key (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// AWS credentials profile the run and imaging tool act under
    #[arg(long, env = "AWS_PROFILE")]
    pub aws_profile: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a sample cluster config and state directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Load the config and check every input can be resolved
    Validate {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Show the execution order and where each input comes from
    Plan {
        #[command(flatten)]
        config: ConfigArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Provision the cluster stacks in dependency order
    LaunchStacks {
        #[command(flatten)]
        config: ConfigArgs,

        /// What to do with completed nodes when a later one fails
        #[arg(long, value_enum, default_value_t = RollbackPolicy::Retain)]
        rollback: RollbackPolicy,

        /// Show the plan without touching the backend
        #[arg(long)]
        dry_run: bool,

        /// Backend state file
        #[arg(long, default_value = "state/backend.yaml")]
        backend_state: PathBuf,
    },

    /// Build a machine image for the leader or follower
    CreateImage {
        /// mesos-leader or mesos-follower
        machine_type: MachineType,

        #[command(flatten)]
        config: ConfigArgs,

        /// Imaging tool template
        #[arg(long, default_value = "packer/template.js")]
        template: PathBuf,

        /// Refresh provisioning roles first
        #[arg(long)]
        update_roles: bool,

        /// Directory holding roles.txt
        #[arg(long, default_value = "ansible")]
        ansible_dir: PathBuf,

        /// Print the commands instead of running them
        #[arg(long)]
        print_only: bool,

        /// Backend state file (image catalog)
        #[arg(long, default_value = "state/backend.yaml")]
        backend_state: PathBuf,
    },

    /// Show stacks and managed resources recorded in the backend state
    Status {
        /// Backend state file
        #[arg(long, default_value = "state/backend.yaml")]
        backend_state: PathBuf,
    },
}

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    // Already installed (tests, embedding) is fine
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Plan { config, json } => cmd_plan(&config, json),
        Commands::LaunchStacks {
            config,
            rollback,
            dry_run,
            backend_state,
        } => {
            if dry_run {
                cmd_plan(&config, false)
            } else {
                cmd_launch(&config, &backend_state, rollback)
            }
        }
        Commands::CreateImage {
            machine_type,
            config,
            template,
            update_roles,
            ansible_dir,
            print_only,
            backend_state,
        } => cmd_create_image(
            machine_type,
            &config,
            &ImageOptions {
                template: &template,
                update_roles: update_roles.then_some(ansible_dir.as_path()),
                print_only,
                backend_state: &backend_state,
            },
        ),
        Commands::Status { backend_state } => cmd_status(&backend_state),
    }
}

const SAMPLE_CONFIG: &str = r#"# Cluster configuration. `default` is merged beneath the chosen profile.
default:
  Region: us-east-1
  KeyName: my-key
  IPAccess: 203.0.113.7
  PrivateHostedZoneName: geotrellis-spark.internal
  Tags:
    Project: geotrellis-spark

accumulo:
  StackType: accumulo
  NumFollowers: 2
  MesosLeaderInstanceType: r3.large
  MesosFollowerInstanceType: i2.2xlarge

cassandra:
  StackType: cassandra
  NumFollowers: 3
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join("cluster.yaml");
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("cannot create {}", state_dir.display()))?;
    std::fs::write(&config_path, SAMPLE_CONFIG)
        .with_context(|| format!("cannot write {}", config_path.display()))?;

    println!("Initialized cluster project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

/// `--aws-profile` sits beneath explicit `--set` overrides.
fn load_config(args: &ConfigArgs) -> Result<config::GlobalConfig> {
    let overrides: Vec<String> = args
        .aws_profile
        .iter()
        .map(|p| format!("{}={}", config::CREDENTIALS_KEY, p))
        .chain(args.overrides.iter().cloned())
        .collect();
    config::load(&args.config, &args.profile, &overrides)
        .with_context(|| format!("loading profile '{}'", args.profile))
}

fn cmd_validate(args: &ConfigArgs) -> Result<()> {
    let config = load_config(args)?;
    let graph = stacks::build_graph()?;
    let plan = planner::plan(&graph, &config);

    let missing = plan.unresolvable();
    if missing.is_empty() {
        println!(
            "OK: profile {} ({} nodes, {} config keys)",
            config.profile(),
            graph.len(),
            config.len()
        );
        return Ok(());
    }
    for (node, input) in &missing {
        eprintln!("  ERROR: {} needs '{}' and nothing provides it", node, input);
    }
    bail!("{} unresolvable input(s)", missing.len())
}

fn cmd_plan(args: &ConfigArgs, json: bool) -> Result<()> {
    let config = load_config(args)?;
    let graph = stacks::build_graph()?;
    let plan = planner::plan(&graph, &config);

    if json {
        println!("{}", planner::to_json(&plan)?);
        return Ok(());
    }

    println!("Planning: profile {} ({} nodes)", plan.profile, plan.steps.len());
    println!();
    print!("{}", planner::describe(&plan));
    Ok(())
}

fn cmd_launch(args: &ConfigArgs, backend_state: &Path, rollback: RollbackPolicy) -> Result<()> {
    let config = load_config(args)?;
    let graph = stacks::build_graph()?;
    let mut backend = FileBackend::open(backend_state)?.with_credentials(config.credential_profile());

    let options = executor::RunOptions { rollback };
    let report = executor::run(&graph, &config, &mut backend, &options);
    print_report(&report);

    report.into_result()?;
    Ok(())
}

/// Display a run report to stdout.
fn print_report(report: &RunReport) {
    for name in &report.completed {
        println!("  + {}", name);
        if let Some(outputs) = report.outputs.get(name) {
            for (key, value) in outputs {
                println!("      {} = {}", key, value_to_string(value));
            }
        }
    }
    if let Some(failure) = &report.failure {
        println!("  ! {}: {}", failure.node, failure.error);
    }
    for name in &report.skipped {
        println!("  - {} (skipped)", name);
    }
    for name in &report.torn_down {
        println!("  x {} (torn down)", name);
    }
    for failure in &report.teardown_errors {
        println!("  ! {} teardown: {}", failure.node, failure.error);
    }

    println!();
    if report.is_success() {
        println!(
            "Launch complete: {} node(s) in {:.1}s.",
            report.completed.len(),
            report.duration.as_secs_f64()
        );
    } else {
        println!(
            "Launch stopped: {} completed, 1 failed, {} skipped, {} torn down.",
            report.completed.len(),
            report.skipped.len(),
            report.torn_down.len()
        );
    }
}

struct ImageOptions<'a> {
    template: &'a Path,
    update_roles: Option<&'a Path>,
    print_only: bool,
    backend_state: &'a Path,
}

fn cmd_create_image(machine: MachineType, args: &ConfigArgs, opts: &ImageOptions) -> Result<()> {
    let config = load_config(args)?;
    let catalog = FileBackend::open(opts.backend_state)?;
    let build = ImageBuild::from_config(
        machine,
        &config,
        &catalog,
        opts.template,
        config.credential_profile(),
    )?;

    if opts.print_only {
        for cmd in imaging::commands(&build, opts.update_roles) {
            println!("{}", cmd);
        }
        return Ok(());
    }
    imaging::create_image(&build, opts.update_roles)?;
    println!("Image build for {} finished.", machine);
    Ok(())
}

fn cmd_status(backend_state: &Path) -> Result<()> {
    let Some(state) = file::load_state(backend_state)? else {
        println!("No backend state at {}. Run launch-stacks first.", backend_state.display());
        return Ok(());
    };

    println!("Stacks ({}):", state.stacks.len());
    for (name, stack) in &state.stacks {
        match &stack.credentials {
            Some(profile) => println!("  {} (revision {}, as {})", name, stack.revision, profile),
            None => println!("  {} (revision {})", name, stack.revision),
        }
        for (key, value) in &stack.outputs {
            println!("      {} = {}", key, value);
        }
    }
    println!("Resources ({}):", state.resources.len());
    for resource in &state.resources {
        println!("  {} {} [{}]", resource.kind, resource.name, resource.id);
    }
    println!("Images: {}", state.images.len());
    Ok(())
}
