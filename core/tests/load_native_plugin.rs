// This test is ignored by default; it exercises the example
// `plugin/rot13_native` cdylib through the native loader. Build the plugin
// first with:
//   cargo build -p rot13_native --release
// Then run manually: `cargo test --test load_native_plugin -- --ignored`

use std::path::PathBuf;
use transmute_core::manifest::PluginManifest;
use transmute_core::native_loader::NativePlugin;
use transmute_core::plugin::Plugin;
use transmute_core::types::{ConvertRequest, EtlKind, ResultStatus};

#[test]
#[ignore]
fn rot13_native_round_trip() {
    let repo = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..");
    let mut manifest =
        PluginManifest::load_from_file(repo.join("plugin/rot13_native/plugin.json"))
            .expect("manifest loads");
    // point the loader at the built artifact instead of the plugin dir
    manifest.plugin_dir = repo.join("target/release");

    let plugin = NativePlugin::new(manifest);
    assert!(plugin.supports_target("rot13"));

    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("note.txt");
    std::fs::write(&source, "Attack at dawn").unwrap();
    let output = work.path().join("note.rot13.txt");

    let mut request = ConvertRequest::new(EtlKind::Transform, &source, "rot13");
    request.output = Some(output.clone());

    let outcome = futures::executor::block_on(plugin.execute(&request)).expect("executes");
    assert_eq!(outcome.status(), ResultStatus::Success);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "Nggnpx ng qnja");
}
