// Drives the CLI loader backend end to end: a shell-script plugin is
// discovered from a manifest, resolved, executed as a subprocess and its
// JSON result honored. Unix only (the plugin is a /bin/sh script).
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use transmute_core::clipboard::CaptureClipboard;
use transmute_core::discovery::PluginDiscovery;
use transmute_core::executor::PipelineExecutor;
use transmute_core::registry::PluginRegistry;
use transmute_core::types::CoreOptions;
use transmute_core::{parse_pipeline, Context};

/// A copying converter that speaks the argv/JSON protocol.
const SCRIPT: &str = r#"#!/bin/sh
input=""
output=""
target=""
dry=0
while [ $# -gt 0 ]; do
  case "$1" in
    --input) input="$2"; shift 2 ;;
    --target) target="$2"; shift 2 ;;
    --output) output="$2"; shift 2 ;;
    --dry-run) dry=1; shift ;;
    --force) shift ;;
    --) shift; break ;;
    *) shift ;;
  esac
done
if [ -z "$output" ]; then
  output="converted.$target"
fi
if [ "$dry" = "1" ]; then
  echo "{\"success\": true, \"output\": \"$output\"}"
  exit 0
fi
cp "$input" "$output" || {
  echo "{\"success\": false, \"error\": \"copy failed\"}"
  exit 1
}
size=$(wc -c < "$output" | tr -d ' ')
echo "{\"success\": true, \"output\": \"$output\", \"output_size\": $size}"
"#;

fn write_plugin(dir: &Path, name: &str, targets: &[&str]) {
    let plugin_dir = dir.join(name);
    std::fs::create_dir_all(&plugin_dir).unwrap();

    let script_path = plugin_dir.join("convert.sh");
    std::fs::write(&script_path, SCRIPT).unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();

    let targets_json: Vec<String> = targets.iter().map(|t| format!("\"{}\"", t)).collect();
    let manifest = format!(
        r#"{{
            "name": "{}",
            "interface": "cli",
            "executable": "convert.sh",
            "targets": [{}],
            "input_types": ["file"],
            "output_types": ["file"]
        }}"#,
        name,
        targets_json.join(", ")
    );
    std::fs::write(plugin_dir.join("plugin.json"), manifest).unwrap();
}

fn context_for(plugin_root: &Path) -> Context {
    let discovery = PluginDiscovery::with_dirs(vec![plugin_root.to_path_buf()]);
    let mut registry = PluginRegistry::new();
    registry.load_manifests(discovery.discover_all(), None);
    Context::new(registry).with_clipboard(Arc::new(CaptureClipboard::new()))
}

#[test]
fn discovered_script_plugin_runs_a_pipeline() {
    let plugins = tempfile::tempdir().unwrap();
    write_plugin(plugins.path(), "shcopy", &["jpg", "png"]);

    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("photo.heic");
    std::fs::write(&source, b"pretend image bytes").unwrap();

    let ctx = context_for(plugins.path());
    assert_eq!(ctx.registry.len(), 1);

    let options = CoreOptions {
        output: Some(work.path().join("out.jpg")),
        ..Default::default()
    };
    let pipeline = parse_pipeline("jpg", &source, options).unwrap();
    let result = PipelineExecutor::new(&ctx).execute(&pipeline);

    assert!(result.success, "run failed: {:?}", result.error);
    let produced = work.path().join("out.jpg");
    assert!(produced.is_file());
    assert_eq!(
        std::fs::read(&produced).unwrap(),
        b"pretend image bytes".to_vec()
    );
    assert_eq!(result.pipeline[0].plugin, "shcopy");
}

#[test]
fn failing_script_surfaces_stderr() {
    let plugins = tempfile::tempdir().unwrap();
    let plugin_dir = plugins.path().join("shfail");
    std::fs::create_dir_all(&plugin_dir).unwrap();
    let script_path = plugin_dir.join("fail.sh");
    std::fs::write(
        &script_path,
        "#!/bin/sh\necho 'encoder not installed' >&2\nexit 3\n",
    )
    .unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
    std::fs::write(
        plugin_dir.join("plugin.json"),
        r#"{"name": "shfail", "interface": "cli", "executable": "fail.sh", "targets": ["gif"]}"#,
    )
    .unwrap();

    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("photo.heic");
    std::fs::write(&source, b"bytes").unwrap();

    let ctx = context_for(plugins.path());
    let options = CoreOptions {
        output: Some(work.path().join("out.gif")),
        ..Default::default()
    };
    let pipeline = parse_pipeline("gif", &source, options).unwrap();
    let result = PipelineExecutor::new(&ctx).execute(&pipeline);

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("exited with code 3"), "error was: {}", error);
    assert!(error.contains("encoder not installed"), "error was: {}", error);
}

#[test]
fn dry_run_spawns_without_writing() {
    let plugins = tempfile::tempdir().unwrap();
    write_plugin(plugins.path(), "shcopy", &["jpg"]);

    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("photo.heic");
    std::fs::write(&source, b"bytes").unwrap();

    let ctx = context_for(plugins.path());
    let options = CoreOptions {
        output: Some(work.path().join("out.jpg")),
        dry_run: true,
        ..Default::default()
    };
    let pipeline = parse_pipeline("jpg", &source, options).unwrap();
    let result = PipelineExecutor::new(&ctx).execute(&pipeline);

    assert!(result.success, "run failed: {:?}", result.error);
    assert!(!work.path().join("out.jpg").exists());
}
