//! file: core/src/executor.rs
//! description: sequential topological pipeline execution and finalization.
//!
//! Three phases over the execution graph: run every node in topological
//! order with all conversion outputs staged into the run workspace, then a
//! finalize pass that moves effectively-terminal outputs to user-visible
//! paths and lets the workspace drop discard the rest. A node failure
//! aborts the run: downstream nodes are not attempted and the workspace is
//! removed.
//!
//! Width tracking: a plugin returning several outputs (or a directory
//! source) widens the stream; the following conversion runs once per
//! scattered input. `collect` contracts the width to 1. `tee` and
//! `clipboard` refuse a widened stream and ask for a `collect` first.

use crate::builtins;
use crate::context::Context;
use crate::error::{PipelineError, PluginError};
use crate::graph::ExecutionGraph;
use crate::pipeline::{Pipeline, PipelineResult, StageResult};
use crate::resolver::{PluginResolver, ResolutionContext};
use crate::sniff;
use crate::types::{ConvertRequest, EtlKind, ResultStatus};
use crate::workspace::RunWorkspace;
use futures::executor::block_on;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::Instant;

const BUILTIN_PLUGIN: &str = "builtin";

/// Progress callback: (completed conversions, total conversions, label).
pub type ProgressFn<'a> = dyn Fn(usize, usize, &str) + 'a;

pub struct PipelineExecutor<'a> {
    ctx: &'a Context,
    progress: Option<&'a ProgressFn<'a>>,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        PipelineExecutor { ctx, progress: None }
    }

    pub fn with_progress(mut self, progress: &'a ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run a validated pipeline to completion. Never panics on plugin
    /// failure; the outcome is always a structured `PipelineResult`.
    pub fn execute(&self, pipeline: &Pipeline) -> PipelineResult {
        let started = Instant::now();
        let mut result = PipelineResult::default();

        if let Err(e) = pipeline.validate() {
            result.error = Some(e.to_string());
            return result;
        }

        let workspace = match RunWorkspace::create() {
            Ok(ws) => ws,
            Err(e) => {
                result.error = Some(format!("cannot create run workspace: {}", e));
                return result;
            }
        };
        debug!("run workspace: {}", workspace.run_dir().display());

        let mut graph = ExecutionGraph::build_from_pipeline(pipeline);
        let order = graph.execution_order();
        let total_conversions = graph.file_producing_nodes().len();
        let mut done_conversions = 0usize;

        for node_id in order {
            let step = if graph.node(node_id).is_tee {
                self.run_tee(&mut graph, node_id)
            } else if graph.node(node_id).is_collect {
                self.run_collect(&mut graph, node_id, pipeline, &workspace, &mut result)
            } else if graph.node(node_id).is_clipboard {
                self.run_clipboard(&mut graph, node_id, pipeline, &mut result)
            } else if graph.node(node_id).is_passthrough {
                self.run_passthrough(&mut graph, node_id)
            } else {
                if let Some(progress) = self.progress {
                    let label = format!(
                        "stage {} element {}: {}",
                        graph.node(node_id).stage_idx,
                        graph.node(node_id).element_idx,
                        graph.node(node_id).target
                    );
                    progress(done_conversions, total_conversions, &label);
                }
                let outcome =
                    self.run_conversion(&mut graph, node_id, pipeline, &workspace, &mut result);
                done_conversions += 1;
                outcome
            };

            if let Err(error) = step {
                let node = graph.node_mut(node_id);
                node.status = Some(ResultStatus::Error);
                node.error = Some(error.to_string());
                result.pipeline.push(StageResult {
                    stage: node.stage_idx,
                    target: node.target.clone(),
                    plugin: node.plugin_used.clone(),
                    input: node.input.clone(),
                    output: PathBuf::new(),
                    status: ResultStatus::Error,
                    error: Some(error.to_string()),
                    duration_ms: 0,
                });
                result.success = false;
                result.error = Some(error.to_string());
                result.total_duration_ms = started.elapsed().as_millis() as u64;
                // Workspace drops here: temp files are removed, nothing was
                // finalized.
                return result;
            }
        }

        match self.finalize(&graph, pipeline, &workspace) {
            Ok(final_outputs) => {
                result.final_outputs = final_outputs;
                result.success = true;
            }
            Err(error) => {
                result.success = false;
                result.error = Some(error.to_string());
            }
        }

        result.total_duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    /// The files flowing into a node, scatter-aware, each with a preferred
    /// display name.
    fn effective_inputs(
        &self,
        graph: &ExecutionGraph,
        node_id: usize,
    ) -> Result<Vec<(PathBuf, String)>, PipelineError> {
        let node = graph.node(node_id);

        if node.input_nodes.is_empty() {
            if node.input.as_os_str().is_empty() {
                return Err(PipelineError::Stage {
                    stage: node.stage_idx,
                    target: node.target.clone(),
                    message: "node has no input".to_string(),
                });
            }
            if node.input.is_dir() && !node.is_collect {
                let files = builtins::enumerate_directory(&node.input, None)
                    .map_err(|e| PipelineError::io(&node.input, e))?;
                if files.is_empty() {
                    return Err(PipelineError::Stage {
                        stage: node.stage_idx,
                        target: node.target.clone(),
                        message: format!("directory {} has no files", node.input.display()),
                    });
                }
                return Ok(files.into_iter().map(|p| (p.clone(), file_name_of(&p))).collect());
            }
            return Ok(vec![(node.input.clone(), file_name_of(&node.input))]);
        }

        let pred = graph.node(node.input_nodes[0]);
        if !pred.scatter_outputs.is_empty() {
            Ok(pred
                .scatter_outputs
                .iter()
                .enumerate()
                .map(|(i, path)| {
                    let name = pred
                        .scatter_names
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| file_name_of(path));
                    (path.clone(), name)
                })
                .collect())
        } else {
            Ok(vec![(pred.temp_output.clone(), file_name_of(&pred.temp_output))])
        }
    }

    fn run_conversion(
        &self,
        graph: &mut ExecutionGraph,
        node_id: usize,
        pipeline: &Pipeline,
        workspace: &RunWorkspace,
        result: &mut PipelineResult,
    ) -> Result<(), PipelineError> {
        let inputs = self.effective_inputs(graph, node_id)?;
        let (stage_idx, element_idx, target, plugin_hint, extension, options, raw_options) = {
            let node = graph.node(node_id);
            (
                node.stage_idx,
                node.element_idx,
                node.target.clone(),
                node.plugin_hint.clone(),
                node.extension.clone(),
                node.options.clone(),
                node.raw_options.clone(),
            )
        };

        let started = Instant::now();
        let scattered = inputs.len() > 1;
        let mut outputs: Vec<PathBuf> = Vec::new();
        let mut names: Vec<String> = Vec::new();
        let mut plugin_used = String::new();
        let mut status = ResultStatus::Success;

        for (k, (input, input_name)) in inputs.iter().enumerate() {
            let info = sniff::probe(input).map_err(|e| PipelineError::io(input, e))?;

            let resolution = PluginResolver::resolve(
                &self.ctx.registry,
                &ResolutionContext {
                    target: target.clone(),
                    input_format: Some(info.format.clone()),
                    input_types: vec![info.category],
                    explicit_plugin: plugin_hint.clone(),
                },
            )
            .map_err(|e| PipelineError::Resolve {
                stage: stage_idx,
                target: target.clone(),
                source: e,
            })?;

            let plugin_info = resolution.plugin.info();
            if self.ctx.registry.is_unusable(&plugin_info.name) {
                return Err(PipelineError::Plugin {
                    stage: stage_idx,
                    target: target.clone(),
                    source: PluginError::Unusable(plugin_info.name),
                });
            }
            plugin_used = plugin_info.name.clone();

            let ext = extension.clone().unwrap_or_else(|| target.clone());
            let temp = if scattered {
                workspace.scatter_temp_path(stage_idx, element_idx, k, &ext)
            } else {
                workspace.temp_path(stage_idx, element_idx, &ext)
            };

            let etl = etl_kind_for_target(self.ctx, &target);
            let mut request = ConvertRequest::new(etl, input.clone(), target.clone());
            request.output = Some(temp.clone());
            request.force = pipeline.core_options.force;
            request.dry_run = pipeline.core_options.dry_run;
            request.core_options = pipeline.core_options.to_map();
            request.plugin_options = options.clone();
            request.raw_options = raw_options.clone();

            info!(
                "stage {} element {}: {} -> {} via '{}' ({})",
                stage_idx,
                element_idx,
                input.display(),
                target,
                plugin_used,
                resolution.matched_by.as_str()
            );

            let outcome = block_on(resolution.plugin.execute(&request)).map_err(|e| {
                PipelineError::Plugin { stage: stage_idx, target: target.clone(), source: e }
            })?;

            match outcome.status() {
                ResultStatus::Error => {
                    return Err(PipelineError::Plugin {
                        stage: stage_idx,
                        target: target.clone(),
                        source: PluginError::Reported(
                            outcome.error.unwrap_or_else(|| "unspecified plugin error".into()),
                        ),
                    });
                }
                ResultStatus::Skipped => {
                    status = ResultStatus::Skipped;
                    let out = outcome.output.unwrap_or_else(|| temp.clone());
                    names.push(renamed(input_name, &out));
                    outputs.push(out);
                }
                ResultStatus::Success => {
                    // Honor whatever paths the plugin reported, even when
                    // they differ from the requested output.
                    let mut reported = outcome.all_outputs();
                    if reported.is_empty() {
                        if temp.exists() || pipeline.core_options.dry_run {
                            reported.push(temp.clone());
                        } else {
                            return Err(PipelineError::Plugin {
                                stage: stage_idx,
                                target: target.clone(),
                                source: PluginError::Protocol(
                                    "plugin reported success without an output path".into(),
                                ),
                            });
                        }
                    }
                    if reported.len() == 1 {
                        names.push(renamed(input_name, &reported[0]));
                    } else {
                        // Plugin-level scatter: its own file names carry the
                        // meaning.
                        names.extend(reported.iter().map(|p| file_name_of(p)));
                    }
                    outputs.extend(reported);
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let node = graph.node_mut(node_id);
        node.plugin_used = plugin_used.clone();
        node.status = Some(status);
        node.duration_ms = duration_ms;
        node.executed = true;
        node.temp_output = outputs[0].clone();
        if outputs.len() > 1 {
            node.scatter_outputs = outputs;
            node.scatter_names = names;
        }

        result.pipeline.push(StageResult {
            stage: stage_idx,
            target,
            plugin: plugin_used,
            input: inputs[0].0.clone(),
            output: graph.node(node_id).temp_output.clone(),
            status,
            error: None,
            duration_ms,
        });

        Ok(())
    }

    /// Tee replicates its single input path; each downstream node reads the
    /// same file, no copy.
    fn run_tee(&self, graph: &mut ExecutionGraph, node_id: usize) -> Result<(), PipelineError> {
        let inputs = self.effective_inputs(graph, node_id)?;
        if inputs.len() > 1 {
            let node = graph.node(node_id);
            return Err(PipelineError::Stage {
                stage: node.stage_idx,
                target: node.target.clone(),
                message: "stream was widened by scattered outputs; add 'collect' before 'tee'"
                    .to_string(),
            });
        }
        let node = graph.node_mut(node_id);
        node.temp_output = inputs[0].0.clone();
        node.status = Some(ResultStatus::Success);
        node.executed = true;
        Ok(())
    }

    /// Passthrough is identity; a widened stream stays widened.
    fn run_passthrough(
        &self,
        graph: &mut ExecutionGraph,
        node_id: usize,
    ) -> Result<(), PipelineError> {
        let inputs = self.effective_inputs(graph, node_id)?;
        let node = graph.node_mut(node_id);
        node.temp_output = inputs[0].0.clone();
        if inputs.len() > 1 {
            node.scatter_outputs = inputs.iter().map(|(p, _)| p.clone()).collect();
            node.scatter_names = inputs.iter().map(|(_, n)| n.clone()).collect();
        }
        node.status = Some(ResultStatus::Success);
        node.executed = true;
        Ok(())
    }

    fn run_clipboard(
        &self,
        graph: &mut ExecutionGraph,
        node_id: usize,
        pipeline: &Pipeline,
        result: &mut PipelineResult,
    ) -> Result<(), PipelineError> {
        let inputs = self.effective_inputs(graph, node_id)?;
        if inputs.len() > 1 {
            let node = graph.node(node_id);
            return Err(PipelineError::Stage {
                stage: node.stage_idx,
                target: node.target.clone(),
                message:
                    "stream was widened by scattered outputs; add 'collect' before 'clipboard'"
                        .to_string(),
            });
        }
        let (input, _) = &inputs[0];
        let started = Instant::now();

        let mut copied_content = false;
        if !pipeline.core_options.dry_run {
            let write = builtins::clipboard_write(self.ctx.clipboard.as_ref(), input)
                .map_err(|e| PipelineError::io(input, e))?;
            copied_content = write == builtins::ClipboardWrite::Content;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let (stage_idx, target) = {
            let node = graph.node_mut(node_id);
            node.temp_output = input.clone();
            node.content_copied_to_clipboard = copied_content;
            node.status = Some(ResultStatus::Success);
            node.executed = true;
            node.duration_ms = duration_ms;
            node.plugin_used = BUILTIN_PLUGIN.to_string();
            (node.stage_idx, node.target.clone())
        };

        result.pipeline.push(StageResult {
            stage: stage_idx,
            target,
            plugin: BUILTIN_PLUGIN.to_string(),
            input: input.clone(),
            output: input.clone(),
            status: ResultStatus::Success,
            error: None,
            duration_ms,
        });
        Ok(())
    }

    fn run_collect(
        &self,
        graph: &mut ExecutionGraph,
        node_id: usize,
        pipeline: &Pipeline,
        workspace: &RunWorkspace,
        result: &mut PipelineResult,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        let (stage_idx, target, pattern) = {
            let node = graph.node(node_id);
            let pattern = node
                .options
                .get("glob")
                .or_else(|| node.options.get("pattern"))
                .cloned();
            (node.stage_idx, node.target.clone(), pattern)
        };

        // Gather every predecessor's files in predecessor order; a collect
        // at the head of the pipeline gathers the source directory instead.
        let mut files: Vec<(PathBuf, String)> = Vec::new();
        let input_nodes = graph.node(node_id).input_nodes.clone();
        if input_nodes.is_empty() {
            let source = graph.node(node_id).input.clone();
            if source.is_dir() {
                let listed = builtins::enumerate_directory(&source, pattern.as_deref())
                    .map_err(|e| PipelineError::io(&source, e))?;
                files.extend(listed.into_iter().map(|p| (p.clone(), file_name_of(&p))));
            } else {
                files.push((source.clone(), file_name_of(&source)));
            }
        } else {
            for pred_id in input_nodes {
                let pred = graph.node(pred_id);
                if !pred.scatter_outputs.is_empty() {
                    for (i, path) in pred.scatter_outputs.iter().enumerate() {
                        let name = pred
                            .scatter_names
                            .get(i)
                            .cloned()
                            .unwrap_or_else(|| file_name_of(path));
                        files.push((path.clone(), name));
                    }
                } else {
                    files.push((pred.temp_output.clone(), file_name_of(&pred.temp_output)));
                }
            }
        }

        if files.is_empty() {
            return Err(PipelineError::Stage {
                stage: stage_idx,
                target,
                message: "collect has nothing to gather".to_string(),
            });
        }

        let output = if files.len() == 1 {
            // Single predecessor: identity.
            files[0].0.clone()
        } else if pipeline.core_options.dry_run {
            workspace.collected_dir()
        } else {
            builtins::collect_files(&files, &workspace.collected_dir())
                .map_err(|e| PipelineError::io(workspace.collected_dir(), e))?
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        {
            let node = graph.node_mut(node_id);
            node.collect_inputs = files.iter().map(|(p, _)| p.clone()).collect();
            node.temp_output = output.clone();
            node.status = Some(ResultStatus::Success);
            node.executed = true;
            node.duration_ms = duration_ms;
            node.plugin_used = BUILTIN_PLUGIN.to_string();
        }

        result.pipeline.push(StageResult {
            stage: stage_idx,
            target,
            plugin: BUILTIN_PLUGIN.to_string(),
            input: files[0].0.clone(),
            output,
            status: ResultStatus::Success,
            error: None,
            duration_ms,
        });
        Ok(())
    }

    /// Finalize pass: move effectively-terminal outputs to user-visible
    /// paths, keep clipboard-consumed files only when required, and let the
    /// workspace drop delete every intermediate.
    fn finalize(
        &self,
        graph: &ExecutionGraph,
        pipeline: &Pipeline,
        workspace: &RunWorkspace,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let mut final_outputs = Vec::new();
        if pipeline.core_options.dry_run {
            return Ok(final_outputs);
        }

        for node in graph.nodes() {
            if !node.executed {
                continue;
            }
            // Only conversion and collect nodes own files worth finalizing.
            if !node.has_file_output() && !node.is_collect {
                continue;
            }

            let terminal = graph.is_effectively_terminal(node.id);
            let clipboard_only = graph.is_effectively_only_consumed_by_clipboard(node.id);
            if !terminal && !clipboard_only {
                // Intermediate: stays in the workspace and is removed with
                // it.
                continue;
            }

            if clipboard_only {
                let copied = graph.was_content_copied_to_clipboard(node.id);
                let save = graph.clipboard_consumer_has_save(node.id);
                if copied && !save {
                    // Content is on the clipboard; the file is disposable.
                    continue;
                }
            }

            let outputs: Vec<(PathBuf, String)> = if node.scatter_outputs.is_empty() {
                vec![(node.temp_output.clone(), file_name_of(&node.temp_output))]
            } else {
                node.scatter_outputs
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        let name = node
                            .scatter_names
                            .get(i)
                            .cloned()
                            .unwrap_or_else(|| file_name_of(p));
                        (p.clone(), name)
                    })
                    .collect()
            };

            for (path, name) in &outputs {
                // A Skipped node points at a pre-existing user file; report
                // it without moving anything.
                if !workspace.contains(path) {
                    final_outputs.push(path.clone());
                    continue;
                }
                let destination =
                    resolve_final_path(pipeline, node, path, name, outputs.len())?;
                move_path(path, &destination, pipeline.core_options.force)
                    .map_err(|e| PipelineError::io(path, e))?;
                final_outputs.push(destination);
            }
        }

        Ok(final_outputs)
    }
}

/// ETL kind for a target, by what the loaded plugins offer. Extract targets
/// are more specific than transform, load least.
fn etl_kind_for_target(ctx: &Context, target: &str) -> EtlKind {
    let candidates = ctx.registry.list_for_target(target);
    for kind in [EtlKind::Extract, EtlKind::Transform, EtlKind::Load] {
        if candidates.iter().any(|info| info.etl == kind) {
            return kind;
        }
    }
    EtlKind::Transform
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// New display name after a conversion: the input's stem with the output's
/// extension.
fn renamed(input_name: &str, output: &Path) -> String {
    let stem = Path::new(input_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| input_name.to_string());
    match output.extension() {
        Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
        None => stem,
    }
}

/// Resolve the user-visible destination for a finalized output.
fn resolve_final_path(
    pipeline: &Pipeline,
    node: &crate::graph::ExecutionNode,
    path: &Path,
    name: &str,
    sibling_count: usize,
) -> Result<PathBuf, PipelineError> {
    let source_stem = pipeline
        .source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    // A collect directory keeps its shape; an identity collect (single
    // gathered file) falls through to regular file naming.
    if node.is_collect && path.is_dir() {
        return Ok(match &pipeline.core_options.output {
            Some(requested) => requested.clone(),
            None => PathBuf::from(format!("{}_collected", source_stem)),
        });
    }

    if let Some(requested) = &pipeline.core_options.output {
        if sibling_count > 1 {
            if requested.extension().is_some() {
                return Err(PipelineError::Stage {
                    stage: node.stage_idx,
                    target: node.target.clone(),
                    message: format!(
                        "--output {} collides for {} scattered outputs",
                        requested.display(),
                        sibling_count
                    ),
                });
            }
            // Extension-less --output becomes a directory holding the
            // scattered files under their own names.
            return Ok(requested.join(name));
        }
        if requested.extension().is_some() {
            return Ok(requested.clone());
        }
        let ext = node.extension.clone().unwrap_or_else(|| node.target.clone());
        let mut with_ext = requested.clone().into_os_string();
        with_ext.push(".");
        with_ext.push(&ext);
        return Ok(PathBuf::from(with_ext));
    }

    // Default: current working directory, source stem, target extension.
    if sibling_count > 1 {
        return Ok(PathBuf::from(name));
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .or_else(|| node.extension.clone())
        .unwrap_or_else(|| node.target.clone());
    Ok(PathBuf::from(format!("{}.{}", source_stem, ext)))
}

/// Move a file or directory, creating parent directories, falling back to
/// copy+delete across devices. Refuses to clobber without force.
fn move_path(src: &Path, dest: &Path, force: bool) -> std::io::Result<()> {
    if dest.exists() {
        if !force {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists (use --force)", dest.display()),
            ));
        }
        if dest.is_dir() {
            std::fs::remove_dir_all(dest)?;
        } else {
            std::fs::remove_file(dest)?;
        }
    }
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            if src.is_dir() {
                copy_dir_recursive(src, dest)?;
                std::fs::remove_dir_all(src)
            } else {
                std::fs::copy(src, dest)?;
                std::fs::remove_file(src)
            }
        }
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)?.flatten() {
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
