//! file: cli/src/output.rs
//! description: human and JSON rendering of results and listings.

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use console::style;
use transmute_core::deps::DepCheckResult;
use transmute_core::manifest::DependencySpec;
use transmute_core::sniff::FileInfo;
use transmute_core::types::{PluginInfo, ResultStatus};
use transmute_core::{PipelineResult, PluginManifest};

/// Render the pipeline result as a table plus a status line.
pub fn print_pipeline_result(result: &PipelineResult, quiet: bool) {
    if !quiet && !result.pipeline.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["stage", "target", "plugin", "output", "status", "ms"]);
        for stage in &result.pipeline {
            let status = match stage.status {
                ResultStatus::Success => style("success").green().to_string(),
                ResultStatus::Skipped => style("skipped").yellow().to_string(),
                ResultStatus::Error => style("error").red().to_string(),
            };
            table.add_row(vec![
                Cell::new(stage.stage),
                Cell::new(&stage.target),
                Cell::new(&stage.plugin),
                Cell::new(stage.output.display()),
                Cell::new(status),
                Cell::new(stage.duration_ms),
            ]);
        }
        println!("{}", table);
    }

    for warning in &result.warnings {
        eprintln!("{} {}", style("warning:").yellow().bold(), warning);
    }

    if result.success {
        if !quiet {
            for output in &result.final_outputs {
                println!("{} {}", style("->").green().bold(), output.display());
            }
            println!(
                "{} in {} ms",
                style("done").green().bold(),
                result.total_duration_ms
            );
        }
    } else if let Some(error) = &result.error {
        eprintln!("{} {}", style("error:").red().bold(), error);
    }
}

pub fn print_pipeline_result_json(result: &PipelineResult) {
    match result.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("{} cannot serialize result: {}", style("error:").red().bold(), e),
    }
}

/// Table of loaded plugins.
pub fn print_plugin_list(plugins: &[PluginInfo]) {
    if plugins.is_empty() {
        println!("no plugins loaded");
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["id", "name", "etl", "targets", "inputs", "version"]);
    for info in plugins {
        let inputs = if info.input_formats.is_empty() {
            "*".to_string()
        } else {
            info.input_formats.join(", ")
        };
        table.add_row(vec![
            Cell::new(&info.id),
            Cell::new(&info.name),
            Cell::new(info.etl),
            Cell::new(info.targets.join(", ")),
            Cell::new(inputs),
            Cell::new(&info.version),
        ]);
    }
    println!("{}", table);
}

/// Detailed manifest view for `plugin info`.
pub fn print_plugin_info(manifest: &PluginManifest) {
    println!("{}", style(&manifest.name).bold());
    println!("  id:          {}", manifest.id());
    println!("  version:     {}", manifest.version);
    println!("  interface:   {}", manifest.interface.as_str());
    println!("  etl:         {}", manifest.etl);
    println!("  targets:     {}", manifest.targets.join(", "));
    if manifest.input_formats.is_empty() {
        println!("  inputs:      * (accepts all)");
    } else {
        println!("  inputs:      {}", manifest.input_formats.join(", "));
    }
    if !manifest.description.is_empty() {
        println!("  about:       {}", manifest.description);
    }
    println!("  manifest:    {}", manifest.manifest_path.display());

    if !manifest.options.is_empty() {
        println!("  options:");
        for opt in &manifest.options {
            let default = opt
                .default
                .as_ref()
                .map(|d| format!(" (default {})", d))
                .unwrap_or_default();
            println!("    {} <{}>{} {}", opt.name, opt.r#type, default, opt.description);
        }
    }
    if !manifest.dependencies.is_empty() {
        println!("  dependencies:");
        for dep in &manifest.dependencies {
            let version = dep.version.as_deref().unwrap_or("any");
            println!("    [{}] {} {}", dep.r#type.as_str(), dep.name, version);
        }
    }
}

/// Dependency check report for `plugin deps`.
pub fn print_dep_checks(plugin: &str, checks: &[(DependencySpec, DepCheckResult)]) {
    if checks.is_empty() {
        println!("{}: no declared dependencies", plugin);
        return;
    }
    let mut missing = 0;
    for (dep, check) in checks {
        let mark = if check.satisfied {
            style("ok").green()
        } else {
            missing += 1;
            style("missing").red()
        };
        println!("  [{}] {} {}: {}", dep.r#type.as_str(), dep.name, mark, check.message);
    }
    if missing > 0 {
        eprintln!(
            "{} {} unsatisfied dependencies; the plugin may not work until they are resolved",
            style("warning:").yellow().bold(),
            missing
        );
    }
}

/// File probe view for `info`.
pub fn print_file_info(info: &FileInfo) {
    println!("{}", style(info.path.display()).bold());
    println!("  format:    {}", info.format);
    println!("  mime:      {}", info.mime_type);
    println!("  category:  {}", info.category);
    println!("  size:      {} bytes", info.size);
}
