// Drives the transmute binary end to end with assert_cmd. The pipeline run
// uses a shell-script plugin, so those tests are unix-only.

use assert_cmd::Command;
use predicates::prelude::*;

fn transmute() -> Command {
    Command::cargo_bin("transmute").expect("binary builds")
}

#[test]
fn help_lists_subcommands() {
    transmute()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plugin"))
        .stdout(predicate::str::contains("formats"));
}

#[test]
fn missing_source_exits_nonzero() {
    let empty = tempfile::tempdir().unwrap();
    transmute()
        .args(["-P", empty.path().to_str().unwrap()])
        .args(["run", "definitely-missing.heic", "jpg"])
        .assert()
        .failure();
}

#[test]
fn plugin_list_on_empty_dir() {
    let empty = tempfile::tempdir().unwrap();
    transmute()
        .args(["-P", empty.path().to_str().unwrap()])
        .args(["plugin", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no plugins loaded"));
}

#[test]
fn info_probes_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, "hello").unwrap();
    transmute()
        .args(["info", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("text"));
}

#[cfg(unix)]
mod with_script_plugin {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn install_plugin(root: &Path) {
        let plugin_dir = root.join("shcopy");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let script = plugin_dir.join("convert.sh");
        std::fs::write(
            &script,
            r#"#!/bin/sh
input=""
output=""
target=""
while [ $# -gt 0 ]; do
  case "$1" in
    --input) input="$2"; shift 2 ;;
    --target) target="$2"; shift 2 ;;
    --output) output="$2"; shift 2 ;;
    --) shift; break ;;
    *) shift ;;
  esac
done
[ -z "$output" ] && output="converted.$target"
cp "$input" "$output" || { echo '{"success": false, "error": "copy failed"}'; exit 1; }
echo "{\"success\": true, \"output\": \"$output\"}"
"#,
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.json"),
            r#"{"name": "shcopy", "interface": "cli", "executable": "convert.sh", "targets": ["txt", "copy"]}"#,
        )
        .unwrap();
    }

    #[test]
    fn run_converts_and_exits_zero() {
        let plugins = tempfile::tempdir().unwrap();
        install_plugin(plugins.path());
        let work = tempfile::tempdir().unwrap();
        std::fs::write(work.path().join("note.md"), "hello pipeline").unwrap();

        transmute()
            .current_dir(work.path())
            .args(["-P", plugins.path().to_str().unwrap()])
            .args(["run", "note.md", "--quiet", "txt"])
            .assert()
            .success();

        assert!(work.path().join("note.txt").is_file());
    }

    #[test]
    fn json_output_reports_stages() {
        let plugins = tempfile::tempdir().unwrap();
        install_plugin(plugins.path());
        let work = tempfile::tempdir().unwrap();
        std::fs::write(work.path().join("note.md"), "hello pipeline").unwrap();

        transmute()
            .current_dir(work.path())
            .args(["-P", plugins.path().to_str().unwrap()])
            .args(["run", "note.md", "--json", "txt"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"success\": true"))
            .stdout(predicate::str::contains("\"target\": \"txt\""));
    }

    #[test]
    fn invalid_pipeline_exits_one() {
        let plugins = tempfile::tempdir().unwrap();
        install_plugin(plugins.path());
        let work = tempfile::tempdir().unwrap();
        std::fs::write(work.path().join("note.md"), "hello").unwrap();

        transmute()
            .current_dir(work.path())
            .args(["-P", plugins.path().to_str().unwrap()])
            .args(["run", "note.md", "txt", "|", "tee"])
            .assert()
            .failure();
    }

    #[test]
    fn plugin_info_shows_manifest() {
        let plugins = tempfile::tempdir().unwrap();
        install_plugin(plugins.path());

        transmute()
            .args(["-P", plugins.path().to_str().unwrap()])
            .args(["plugin", "info", "shcopy"])
            .assert()
            .success()
            .stdout(predicate::str::contains("shcopy"))
            .stdout(predicate::str::contains("cli"));
    }
}
