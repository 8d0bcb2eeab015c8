//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use deliverykit_core::{DeliveryContext, Pipeline, characteristics_report};
use deliverykit_shared::{AppConfig, BuildConfig, ProfileSet, init_config, load_config};
use deliverykit_store::MemoryStore;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// DeliveryKit: resolve content delivery pipelines from resource descriptors.
#[derive(Parser)]
#[command(
    name = "deliverykit",
    version,
    about = "Build and inspect per-profile content delivery pipelines.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build the pipeline for a profile and print how it was resolved.
    Plan {
        /// Resource descriptor files (TOML). Defaults to `build.resources` from config.
        #[arg(short, long, num_args = 1..)]
        resources: Vec<PathBuf>,

        /// Base profile (defaults to `defaults.profile` from config).
        #[arg(short, long)]
        profile: Option<String>,

        /// Sub-profile of the base profile (can be specified multiple times).
        #[arg(long = "sub-profile")]
        sub_profiles: Vec<String>,

        /// Cap on descriptors yielded by self-expanding handlers.
        #[arg(long, env = "DELIVERYKIT_MAX_EXPANSIONS")]
        max_expansions: Option<usize>,

        /// Print the pipeline summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "deliverykit=info",
        1 => "deliverykit=debug",
        _ => "deliverykit=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Plan {
            resources,
            profile,
            sub_profiles,
            max_expansions,
            json,
        } => cmd_plan(PlanArgs {
            resources,
            profile,
            sub_profiles,
            max_expansions,
            json,
        }),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

struct PlanArgs {
    resources: Vec<PathBuf>,
    profile: Option<String>,
    sub_profiles: Vec<String>,
    max_expansions: Option<usize>,
    json: bool,
}

fn cmd_plan(args: PlanArgs) -> Result<()> {
    let config = load_config()?;

    let resources: Vec<PathBuf> = if args.resources.is_empty() {
        config.build.resources.iter().map(PathBuf::from).collect()
    } else {
        args.resources
    };
    if resources.is_empty() {
        return Err(eyre!(
            "no resource files given: pass --resources or set build.resources in the config"
        ));
    }

    let profiles = resolve_profiles(&config, args.profile, args.sub_profiles);

    let mut build = BuildConfig::from(&config);
    if let Some(max) = args.max_expansions {
        build.max_expansions = max;
    }

    let store = MemoryStore::from_files(resources.as_slice()).wrap_err("failed to load resource files")?;
    info!(
        files = resources.len(),
        descriptors = store.len(),
        profile = %profiles,
        "resources loaded"
    );

    let context = DeliveryContext::new(Arc::new(store)).with_config(build);
    let pipeline = context
        .get_or_build(&profiles, None)
        .wrap_err_with(|| format!("failed to build the pipeline for profile '{profiles}'"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&pipeline.summary())?);
    } else {
        print_plan(&pipeline);
    }
    Ok(())
}

/// CLI flags win over config values.
fn resolve_profiles(config: &AppConfig, profile: Option<String>, subs: Vec<String>) -> ProfileSet {
    let base = profile.unwrap_or_else(|| config.defaults.profile.clone());
    let subs = if subs.is_empty() {
        config.defaults.sub_profiles.clone()
    } else {
        subs
    };

    subs.into_iter()
        .fold(ProfileSet::new(base), ProfileSet::with_sub_profile)
}

fn print_plan(pipeline: &Pipeline) {
    println!("Pipeline:  {}", pipeline.id());
    println!("Profile:   {}", pipeline.profile());
    println!("Strategy:  {}", pipeline.strategy());
    println!("Digest:    {}", pipeline.digest());
    println!(
        "Schema:    {}",
        if pipeline.schema().is_some() { "yes" } else { "none" }
    );

    println!();
    println!("Targets ({}):", pipeline.table().len());
    for (target, descriptors) in pipeline.table().iter() {
        println!("  {target}");
        for descriptor in descriptors {
            println!("    - {descriptor}");
        }
    }

    println!();
    println!(
        "Handlers ({} classified, {} unclassified):",
        pipeline.handlers().len(),
        pipeline.handlers().unclassified().len()
    );
    print!("{}", characteristics_report(pipeline.handlers()));

    let tables = pipeline.role_tables();
    for (role, table) in tables.roles() {
        println!("  {role}:");
        for (target, bindings) in table {
            let names: Vec<&str> = bindings.iter().map(|b| b.handler.name()).collect();
            println!("    {target}: {}", names.join(", "));
        }
    }

    let events = pipeline.events();
    if !events.is_empty() {
        println!();
        println!("Events ({}):", events.len());
        for event in events {
            let first_line = event.message.lines().next().unwrap_or_default();
            match (&event.descriptor, &event.cause) {
                (Some(d), Some(cause)) => println!("  - {first_line} [{d}]: {cause}"),
                (Some(d), None) => println!("  - {first_line} [{d}]"),
                (None, _) => println!("  - {first_line}"),
            }
        }
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
