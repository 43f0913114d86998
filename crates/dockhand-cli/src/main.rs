mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{exit_code_for, Workspace};
use dockhand_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "dockhand",
    version,
    about = "Build, run, and ship multi-service container projects"
)]
struct Cli {
    /// Directory containing the project.
    #[arg(long, default_value = ".", global = true)]
    project_dir: PathBuf,

    /// Provisioning directory, relative to the project directory.
    #[arg(long, default_value = "ansible", global = true)]
    provisioning_dir: PathBuf,

    /// YAML file of variables substituted into the project file.
    #[arg(long, global = true)]
    var_file: Option<PathBuf>,

    /// Container engine: docker or mock.
    #[arg(long, env = "DOCKHAND_ENGINE", global = true)]
    engine: Option<String>,

    /// State file shared between invocations of the mock engine.
    #[arg(long, env = "DOCKHAND_ENGINE_STATE", global = true)]
    engine_state: Option<PathBuf>,

    /// Enable debug logging output.
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,

    /// Enable trace-level logging (more detailed than --debug).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision service images inside a conductor container and export them.
    Build {
        /// Export each image as a single layer.
        #[arg(long, default_value_t = false)]
        flatten: bool,
        /// Keep the build containers and the conductor after the build.
        #[arg(long, default_value_t = false)]
        save_build_container: bool,
        /// Extra variables (key=value) passed to provisioning; they win over --var-file.
        #[arg(long, num_args = 1..)]
        with_variables: Vec<String>,
        /// Extra mounts (src:dst[:mode]) for the conductor.
        #[arg(long, num_args = 1..)]
        with_volumes: Vec<String>,
    },
    /// Start service containers.
    Run {
        /// Services to start; all when omitted.
        services: Vec<String>,
        /// Return once the containers are started instead of following them.
        #[arg(short, long, default_value_t = false)]
        detached: bool,
    },
    /// Stop running service containers.
    Stop {
        /// Services to stop; all when omitted.
        services: Vec<String>,
        /// Kill the containers instead of stopping them gracefully.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Restart service containers.
    Restart {
        /// Services to restart; all when omitted.
        services: Vec<String>,
    },
    /// Generate deployment manifests for an orchestration platform.
    Shipit {
        /// Target platform (kubernetes, kube, k8s, openshift, oc).
        platform: String,
        /// Write the manifests under the provisioning directory instead of submitting them.
        #[arg(long, default_value_t = false)]
        save_config: bool,
        /// Image tag referenced by built services.
        #[arg(long, default_value = "latest")]
        tag: String,
        /// Cluster API URL (overrides the cluster config file).
        #[arg(long)]
        url: Option<String>,
        /// Cluster namespace for submitted resources.
        #[arg(long)]
        namespace: Option<String>,
        /// Bearer token for the cluster API.
        #[arg(long, env = "DOCKHAND_CLUSTER_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.debug {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DOCKHAND_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let workspace = Workspace {
        project_dir: cli.project_dir,
        provisioning_dir: cli.provisioning_dir,
        var_file: cli.var_file,
        engine: cli.engine,
        engine_state: cli.engine_state,
    };

    let result = match cli.command {
        Commands::Build {
            flatten,
            save_build_container,
            with_variables,
            with_volumes,
        } => commands::build::run(
            &workspace,
            &commands::build::BuildArgs {
                flatten,
                save_build_container,
                with_variables,
                with_volumes,
            },
        ),
        Commands::Run { services, detached } => commands::run::run(&workspace, &services, detached),
        Commands::Stop { services, force } => commands::stop::run(&workspace, &services, force),
        Commands::Restart { services } => commands::restart::run(&workspace, &services),
        Commands::Shipit {
            platform,
            save_config,
            tag,
            url,
            namespace,
            token,
        } => commands::shipit::run(
            &workspace,
            &platform,
            &commands::shipit::ShipitArgs {
                save_config,
                tag,
                url,
                namespace,
                token,
            },
        ),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
