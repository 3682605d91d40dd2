//! file: core/src/cli_loader.rs
//! description: CLI loader backend — one fresh subprocess per execute.
//!
//! Argv convention: `--input <src> --target <tgt> [--output <out>] [--force]
//! [--dry-run] -- <raw plugin options...>`. The child must print a single
//! JSON object `{success, output?, outputs?, output_size?, error?, extra?}`
//! on stdout; stderr is free-form diagnostics and gets attached to error
//! results. Non-zero exit means error even when the JSON claims success.

use crate::error::PluginError;
use crate::manifest::PluginManifest;
use crate::plugin::Plugin;
use crate::subprocess;
use crate::types::{ConvertOutcome, ConvertRequest, PluginInfo, ResultStatus};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default per-invocation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

pub struct CliPlugin {
    manifest: PluginManifest,
    timeout: Duration,
    /// Dependency environment root for this plugin, when one exists.
    dep_env_dir: Option<PathBuf>,
}

/// Shape of the JSON object a CLI plugin prints on stdout.
#[derive(Debug, Deserialize)]
struct CliResponse {
    success: bool,
    #[serde(default)]
    skipped: bool,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    outputs: Option<Vec<String>>,
    #[serde(default)]
    output_size: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    extra: Option<serde_json::Value>,
}

impl CliPlugin {
    pub fn new(manifest: PluginManifest) -> Self {
        CliPlugin { manifest, timeout: DEFAULT_TIMEOUT, dep_env_dir: None }
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Point this plugin at its isolated dependency environment. The env's
    /// runtime binaries are prepended to PATH for every invocation.
    pub fn set_dep_env_dir(&mut self, dir: Option<PathBuf>) {
        self.dep_env_dir = dir;
    }

    /// Locate the executable: absolute paths as-is, then relative to the
    /// plugin directory, then PATH.
    fn resolve_executable(&self) -> Result<PathBuf, PluginError> {
        let exe = PathBuf::from(&self.manifest.executable);
        if exe.is_absolute() {
            if exe.is_file() {
                return Ok(exe);
            }
            return Err(PluginError::ExecutableNotFound(exe));
        }

        let beside_manifest = self.manifest.plugin_dir.join(&exe);
        if beside_manifest.is_file() {
            return Ok(beside_manifest);
        }

        which::which(&self.manifest.executable)
            .map_err(|_| PluginError::ExecutableNotFound(exe))
    }

    fn build_arguments(&self, request: &ConvertRequest) -> Vec<String> {
        let mut args = Vec::new();
        args.push("--input".to_string());
        args.push(request.source.display().to_string());
        args.push("--target".to_string());
        args.push(request.target.clone());
        if let Some(output) = &request.output {
            args.push("--output".to_string());
            args.push(output.display().to_string());
        }
        if request.force {
            args.push("--force".to_string());
        }
        if request.dry_run {
            args.push("--dry-run".to_string());
        }
        if !request.raw_options.is_empty() {
            args.push("--".to_string());
            args.extend(request.raw_options.iter().cloned());
        }
        args
    }

    /// Environment additions that sandbox the plugin's per-language deps:
    /// runtime binaries on PATH, runtime-specific variables pointing at the
    /// isolated package trees.
    fn build_environment(&self) -> BTreeMap<String, String> {
        let mut envs = BTreeMap::new();
        let Some(env_dir) = &self.dep_env_dir else {
            return envs;
        };

        let python_dir = env_dir.join("python");
        let node_dir = env_dir.join("node");

        let mut path_entries: Vec<String> = Vec::new();
        let python_bin = if cfg!(windows) {
            python_dir.join("Scripts")
        } else {
            python_dir.join("bin")
        };
        if python_bin.is_dir() {
            path_entries.push(python_bin.display().to_string());
            envs.insert("VIRTUAL_ENV".to_string(), python_dir.display().to_string());
        }
        let node_bin = node_dir.join("node_modules").join(".bin");
        if node_bin.is_dir() {
            path_entries.push(node_bin.display().to_string());
        }
        if node_dir.join("node_modules").is_dir() {
            envs.insert(
                "NODE_PATH".to_string(),
                node_dir.join("node_modules").display().to_string(),
            );
        }

        if !path_entries.is_empty() {
            let sep = if cfg!(windows) { ';' } else { ':' };
            let current = std::env::var("PATH").unwrap_or_default();
            path_entries.push(current);
            envs.insert("PATH".to_string(), path_entries.join(&sep.to_string()));
        }

        envs
    }

    fn parse_response(
        &self,
        result: subprocess::SubprocessResult,
    ) -> Result<ConvertOutcome, PluginError> {
        if result.timed_out {
            return Err(PluginError::Timeout(self.timeout.as_secs()));
        }

        let stdout = result.stdout.trim();
        let parsed: Result<CliResponse, _> = serde_json::from_str(stdout);

        let response = match parsed {
            Ok(response) => response,
            Err(e) => {
                // Non-zero exit with unparseable stdout is a plain plugin
                // failure; a clean exit with garbage stdout is a protocol
                // violation.
                if result.exit_code != 0 {
                    let mut message =
                        format!("plugin exited with code {}", result.exit_code);
                    if !result.stderr.trim().is_empty() {
                        message.push_str(": ");
                        message.push_str(result.stderr.trim());
                    }
                    return Ok(ConvertOutcome::failure(message));
                }
                return Err(PluginError::Protocol(format!(
                    "stdout is not a JSON result object: {}",
                    e
                )));
            }
        };

        let mut outcome = ConvertOutcome {
            status: Some(if response.skipped {
                ResultStatus::Skipped
            } else if response.success && result.exit_code == 0 {
                ResultStatus::Success
            } else {
                ResultStatus::Error
            }),
            output: response.output.map(PathBuf::from),
            outputs: response
                .outputs
                .unwrap_or_default()
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            output_size: response.output_size,
            error: response.error,
            extra: response.extra,
        };

        if result.exit_code != 0 && outcome.error.is_none() {
            let mut message = format!("plugin exited with code {}", result.exit_code);
            if !result.stderr.trim().is_empty() {
                message.push_str(": ");
                message.push_str(result.stderr.trim());
            }
            outcome.error = Some(message);
        }

        // Plugins are not required to report the size; stat the output when
        // they did not.
        if outcome.output_size.is_none() {
            if let Some(output) = &outcome.output {
                if let Ok(meta) = std::fs::metadata(output) {
                    outcome.output_size = Some(meta.len());
                }
            }
        }

        Ok(outcome)
    }
}

#[async_trait]
impl Plugin for CliPlugin {
    fn info(&self) -> PluginInfo {
        self.manifest.to_info()
    }

    async fn execute(&self, request: &ConvertRequest) -> Result<ConvertOutcome, PluginError> {
        let exe = self.resolve_executable()?;
        let args = self.build_arguments(request);
        let envs = self.build_environment();

        log::debug!(
            "spawning cli plugin '{}': {} {}",
            self.manifest.name,
            exe.display(),
            args.join(" ")
        );

        let result = subprocess::run_with_timeout(&exe, &args, &envs, None, self.timeout)?;
        self.parse_response(result)
    }
}

/// Check whether a manifest describes a CLI plugin this loader can handle.
pub fn is_cli_manifest(manifest: &PluginManifest) -> bool {
    manifest.interface == crate::manifest::InterfaceKind::Cli
        && !manifest.executable.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::InterfaceKind;
    use crate::types::EtlKind;

    fn manifest() -> PluginManifest {
        PluginManifest {
            name: "img".to_string(),
            group: "img".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            etl: EtlKind::Transform,
            targets: vec!["jpg".to_string(), "png".to_string()],
            input_formats: vec!["heic".to_string()],
            interface: InterfaceKind::Cli,
            executable: "convert.sh".to_string(),
            library: String::new(),
            options: Vec::new(),
            dependencies: Vec::new(),
            input_types: Vec::new(),
            output_types: Vec::new(),
            manifest_path: PathBuf::new(),
            plugin_dir: PathBuf::new(),
        }
    }

    #[test]
    fn argv_follows_the_protocol_order() {
        let plugin = CliPlugin::new(manifest());
        let mut request = ConvertRequest::new(EtlKind::Transform, "in.heic", "jpg");
        request.output = Some(PathBuf::from("out.jpg"));
        request.force = true;
        request.raw_options = vec!["--quality".to_string(), "85".to_string()];

        let args = plugin.build_arguments(&request);
        assert_eq!(
            args,
            vec![
                "--input", "in.heic", "--target", "jpg", "--output", "out.jpg", "--force",
                "--", "--quality", "85"
            ]
        );
    }

    #[test]
    fn supports_target_is_case_insensitive() {
        let plugin = CliPlugin::new(manifest());
        assert!(plugin.supports_target("JPG"));
        assert!(!plugin.supports_target("webp"));
    }

    #[test]
    fn empty_input_formats_accept_all() {
        let mut m = manifest();
        m.input_formats.clear();
        let plugin = CliPlugin::new(m);
        assert!(plugin.supports_input("anything"));

        let strict = CliPlugin::new(manifest());
        assert!(strict.supports_input("HEIC"));
        assert!(!strict.supports_input("gif"));
    }

    #[test]
    fn nonzero_exit_beats_success_json() {
        let plugin = CliPlugin::new(manifest());
        let result = subprocess::SubprocessResult {
            exit_code: 2,
            stdout: r#"{"success": true, "output": "out.jpg"}"#.to_string(),
            stderr: "boom".to_string(),
            timed_out: false,
        };
        let outcome = plugin.parse_response(result).unwrap();
        assert_eq!(outcome.status(), ResultStatus::Error);
        assert!(outcome.error.unwrap().contains("boom"));
    }

    #[test]
    fn garbage_stdout_with_clean_exit_is_a_protocol_error() {
        let plugin = CliPlugin::new(manifest());
        let result = subprocess::SubprocessResult {
            exit_code: 0,
            stdout: "progress: 50%".to_string(),
            stderr: String::new(),
            timed_out: false,
        };
        assert!(matches!(
            plugin.parse_response(result),
            Err(PluginError::Protocol(_))
        ));
    }

    #[test]
    fn timeout_is_a_plugin_error() {
        let plugin = CliPlugin::new(manifest());
        let result = subprocess::SubprocessResult {
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        };
        assert!(matches!(
            plugin.parse_response(result),
            Err(PluginError::Timeout(300))
        ));
    }

    #[test]
    fn scatter_outputs_are_collected() {
        let plugin = CliPlugin::new(manifest());
        let result = subprocess::SubprocessResult {
            exit_code: 0,
            stdout: r#"{"success": true, "outputs": ["p0.jpg", "p1.jpg"]}"#.to_string(),
            stderr: String::new(),
            timed_out: false,
        };
        let outcome = plugin.parse_response(result).unwrap();
        assert_eq!(outcome.all_outputs().len(), 2);
    }
}
