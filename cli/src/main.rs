//! file: cli/src/main.rs
//! description: command-line interface for the transmute conversion driver.
//!
//! This binary is a thin dispatcher: it discovers plugins, parses the
//! pipeline expression and hands everything to `transmute_core`. Subcommands
//! cover running pipelines, inspecting plugins and formats, probing files
//! and managing per-plugin dependency environments.

use clap::{Arg, ArgAction, ArgMatches, Command};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, Level};
use std::io::Write;
use std::path::PathBuf;
use transmute_core::discovery::PluginDiscovery;
use transmute_core::executor::PipelineExecutor;
use transmute_core::types::{CoreOptions, EtlKind};
use transmute_core::{parse_pipeline, Context};

mod output;

fn main() {
    // Clean, human-friendly log format with colored level tags.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format(|buf, record| {
            let lvl = match record.level() {
                Level::Error => style("error").red().bold(),
                Level::Warn => style("warn").yellow().bold(),
                Level::Info => style("info").green().bold(),
                Level::Debug => style("debug").cyan(),
                Level::Trace => style("trace").magenta(),
            };
            writeln!(buf, "{}: {}", lvl, record.args())
        })
        .init();

    let cli = setup_cli(
        Command::new("transmute")
            .version("0.1.0")
            .about("Universal file conversion driver: pipelines over plugins")
            .subcommand_required(true)
            .arg_required_else_help(true),
    )
    .arg(
        Arg::new("plugin-dir")
            .help("Directory to load plugins from (replaces the search path)")
            .short('P')
            .long("plugin-dir")
            .value_parser(clap::value_parser!(String))
            .value_name("DIR")
            .global(true),
    );

    let matches = cli.get_matches();
    std::process::exit(dispatch_commands(&matches));
}

fn setup_cli(cli: Command) -> Command {
    cli.subcommand(
        Command::new("run")
            .about("Run a conversion pipeline over a source file")
            .arg(Arg::new("source").help("Source file or directory").required(true).index(1))
            .arg(
                Arg::new("pipeline")
                    .help("Pipeline expression, e.g. 'jpg --quality 85 | clipboard'")
                    .required(true)
                    .index(2)
                    .num_args(1..)
                    .allow_hyphen_values(true)
                    .trailing_var_arg(true),
            )
            .arg(
                Arg::new("output")
                    .help("Final output path (extension optional)")
                    .short('o')
                    .long("output")
                    .value_name("PATH"),
            )
            .arg(
                Arg::new("force")
                    .help("Overwrite existing files")
                    .short('f')
                    .long("force")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("json")
                    .help("Print the structured result as JSON")
                    .long("json")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("quiet")
                    .help("Suppress progress and tables")
                    .long("quiet")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("verbose")
                    .help("Verbose output")
                    .long("verbose")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("dry-run")
                    .help("Resolve and report without converting or writing")
                    .long("dry-run")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("default")
                    .help("Default plugin group for a target, as target=group (repeatable)")
                    .short('D')
                    .long("default")
                    .value_name("TARGET=GROUP")
                    .action(ArgAction::Append),
            ),
    )
    .subcommand(
        Command::new("plugin")
            .about("Inspect and manage plugins")
            .subcommand_required(true)
            .subcommand(Command::new("list").about("List loaded plugins"))
            .subcommand(
                Command::new("info")
                    .about("Show a plugin manifest in full")
                    .arg(Arg::new("name").required(true).index(1)),
            )
            .subcommand(
                Command::new("deps")
                    .about("Check a plugin's declared dependencies")
                    .arg(Arg::new("name").required(true).index(1)),
            )
            .subcommand(
                Command::new("install-deps")
                    .about("Create the plugin's isolated environment and install its deps")
                    .arg(Arg::new("name").required(true).index(1)),
            )
            .subcommand(
                Command::new("clean-deps")
                    .about("Remove dependency environments of plugins that no longer exist"),
            ),
    )
    .subcommand(Command::new("formats").about("List supported targets and input formats"))
    .subcommand(
        Command::new("info")
            .about("Probe a file: format, MIME type, category, size")
            .arg(Arg::new("file").required(true).index(1)),
    )
}

fn dispatch_commands(matches: &ArgMatches) -> i32 {
    let plugin_dir: Option<PathBuf> =
        matches.get_one::<String>("plugin-dir").map(PathBuf::from);

    match matches.subcommand() {
        Some(("run", sub)) => run_pipeline(sub, plugin_dir),
        Some(("plugin", sub)) => plugin_command(sub, plugin_dir),
        Some(("formats", _)) => {
            let ctx = Context::discover(plugin_dir);
            for etl in [EtlKind::Transform, EtlKind::Extract, EtlKind::Load] {
                let targets = ctx.registry.supported_targets(etl);
                let inputs = ctx.registry.supported_inputs(etl);
                if targets.is_empty() && inputs.is_empty() {
                    continue;
                }
                println!("{}", style(etl).bold());
                println!("  targets: {}", targets.join(", "));
                if !inputs.is_empty() {
                    println!("  inputs:  {}", inputs.join(", "));
                }
            }
            0
        }
        Some(("info", sub)) => {
            let file = PathBuf::from(sub.get_one::<String>("file").map(String::as_str).unwrap_or(""));
            match transmute_core::sniff::probe(&file) {
                Ok(info) => {
                    output::print_file_info(&info);
                    0
                }
                Err(e) => {
                    error!("cannot probe {}: {}", file.display(), e);
                    1
                }
            }
        }
        _ => {
            error!("no valid subcommand; use --help");
            1
        }
    }
}

fn run_pipeline(sub: &ArgMatches, plugin_dir: Option<PathBuf>) -> i32 {
    let source = PathBuf::from(sub.get_one::<String>("source").map(String::as_str).unwrap_or(""));
    let expr = sub
        .get_many::<String>("pipeline")
        .map(|vals| vals.cloned().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let core_options = CoreOptions {
        output: sub.get_one::<String>("output").map(PathBuf::from),
        force: sub.get_flag("force"),
        json_output: sub.get_flag("json"),
        quiet: sub.get_flag("quiet"),
        verbose: sub.get_flag("verbose"),
        dry_run: sub.get_flag("dry-run"),
    };

    if !source.exists() {
        error!("source does not exist: {}", source.display());
        return 1;
    }

    let plugin_dir_copy = plugin_dir.clone();
    let mut ctx = Context::discover(plugin_dir);
    if ctx.registry.is_empty() {
        error!("no plugins loaded; set --plugin-dir or install plugins");
        return 1;
    }

    if let Some(defaults) = sub.get_many::<String>("default") {
        for entry in defaults {
            match entry.split_once('=') {
                Some((target, group)) => ctx.registry.set_default(target, group),
                None => {
                    error!("invalid --default '{}', expected target=group", entry);
                    return 1;
                }
            }
        }
    }

    let json = core_options.json_output;
    let quiet = core_options.quiet;

    let pipeline = match parse_pipeline(&expr, &source, core_options) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("invalid pipeline: {}", e);
            return 1;
        }
    };

    let bar = if quiet || json {
        None
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{bar:24} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(bar)
    };
    let progress = |done: usize, total: usize, label: &str| {
        if let Some(bar) = &bar {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
            bar.set_message(label.to_string());
        }
    };

    let executor = PipelineExecutor::new(&ctx).with_progress(&progress);
    let mut result = executor.execute(&pipeline);

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    // Non-fatal dependency warnings, once per invocation, for the plugins
    // that actually ran.
    let mut checked: Vec<String> = Vec::new();
    let mut dep_warnings: Vec<String> = Vec::new();
    for stage in &result.pipeline {
        if stage.plugin.is_empty()
            || stage.plugin == "builtin"
            || checked.contains(&stage.plugin)
        {
            continue;
        }
        checked.push(stage.plugin.clone());
        let Some(manifest) = find_manifest(&discovery_for(&plugin_dir_copy), &stage.plugin)
        else {
            continue;
        };
        if manifest.dependencies.is_empty() {
            continue;
        }
        for (dep, check) in ctx.deps.check_all(&manifest) {
            if !check.satisfied {
                dep_warnings.push(format!(
                    "plugin '{}': [{}] {} unsatisfied: {}",
                    stage.plugin,
                    dep.r#type.as_str(),
                    dep.name,
                    check.message
                ));
            }
        }
    }
    result.warnings.extend(dep_warnings);

    if json {
        output::print_pipeline_result_json(&result);
    } else {
        output::print_pipeline_result(&result, quiet);
    }

    if result.success {
        0
    } else {
        1
    }
}

fn plugin_command(sub: &ArgMatches, plugin_dir: Option<PathBuf>) -> i32 {
    let discovery = discovery_for(&plugin_dir);

    match sub.subcommand() {
        Some(("list", _)) => {
            let ctx = Context::discover(plugin_dir);
            output::print_plugin_list(&ctx.registry.list_info());
            0
        }
        Some(("info", args)) => {
            let name = args.get_one::<String>("name").map(String::as_str).unwrap_or("");
            match find_manifest(&discovery, name) {
                Some(manifest) => {
                    output::print_plugin_info(&manifest);
                    0
                }
                None => {
                    error!("no plugin named '{}'", name);
                    1
                }
            }
        }
        Some(("deps", args)) => {
            let name = args.get_one::<String>("name").map(String::as_str).unwrap_or("");
            let ctx = Context::discover(plugin_dir);
            match find_manifest(&discovery, name) {
                Some(manifest) => {
                    let checks = ctx.deps.check_all(&manifest);
                    output::print_dep_checks(name, &checks);
                    0
                }
                None => {
                    error!("no plugin named '{}'", name);
                    1
                }
            }
        }
        Some(("install-deps", args)) => {
            let name = args.get_one::<String>("name").map(String::as_str).unwrap_or("");
            let ctx = Context::discover(plugin_dir);
            match find_manifest(&discovery, name) {
                Some(manifest) => match ctx.deps.install_all(&manifest) {
                    Ok(report) => {
                        for pkg in &report.installed {
                            println!("{} {}", style("installed").green(), pkg);
                        }
                        for pkg in &report.skipped {
                            println!("{} {} (system dependency)", style("skipped").yellow(), pkg);
                        }
                        for pkg in &report.failed {
                            println!("{} {}", style("failed").red(), pkg);
                        }
                        if report.success() {
                            0
                        } else {
                            error!("dependency install failed; '{}' is unusable until resolved", name);
                            1
                        }
                    }
                    Err(e) => {
                        error!("install failed: {}", e);
                        1
                    }
                },
                None => {
                    error!("no plugin named '{}'", name);
                    1
                }
            }
        }
        Some(("clean-deps", _)) => {
            let ctx = Context::discover(plugin_dir);
            let known: Vec<String> =
                discovery.discover_all().into_iter().map(|m| m.name).collect();
            match ctx.deps.clean_orphans(&known) {
                Ok(removed) => {
                    if removed.is_empty() {
                        println!("no orphaned environments");
                    } else {
                        for name in removed {
                            println!("{} {}", style("removed").green(), name);
                        }
                    }
                    0
                }
                Err(e) => {
                    error!("cleanup failed: {}", e);
                    1
                }
            }
        }
        _ => {
            error!("no valid plugin subcommand; use --help");
            1
        }
    }
}

fn discovery_for(plugin_dir: &Option<PathBuf>) -> PluginDiscovery {
    match plugin_dir {
        Some(dir) => PluginDiscovery::with_dirs(vec![dir.clone()]),
        None => PluginDiscovery::new(),
    }
}

fn find_manifest(
    discovery: &PluginDiscovery,
    name: &str,
) -> Option<transmute_core::PluginManifest> {
    discovery
        .discover_all()
        .into_iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
}
