// Example CLI-interface plugin: copies the input to the target path.
//
// Protocol: argv is `--input P --target T [--output P] [--force]
// [--dry-run] -- <raw options...>`; the single stdout line is a JSON object
// `{success, output?, output_size?, skipped?, error?}`. Diagnostics go to
// stderr; exit code 0 on success.

use std::path::PathBuf;
use std::process::exit;

struct Args {
    input: PathBuf,
    target: String,
    output: Option<PathBuf>,
    force: bool,
    dry_run: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut input = None;
    let mut target = None;
    let mut output = None;
    let mut force = false;
    let mut dry_run = false;

    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--input" => input = argv.next().map(PathBuf::from),
            "--target" => target = argv.next(),
            "--output" => output = argv.next().map(PathBuf::from),
            "--force" => force = true,
            "--dry-run" => dry_run = true,
            // everything after the separator is plugin options; none used
            "--" => break,
            _ => {}
        }
    }

    Ok(Args {
        input: input.ok_or("missing --input")?,
        target: target.ok_or("missing --target")?,
        output,
        force,
        dry_run,
    })
}

fn fail(message: &str) -> ! {
    let body = serde_json::json!({ "success": false, "error": message });
    println!("{}", body);
    eprintln!("copy_cli: {}", message);
    exit(1);
}

fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => fail(&e),
    };

    if !args.input.is_file() {
        fail(&format!("input does not exist: {}", args.input.display()));
    }

    let output = args.output.unwrap_or_else(|| {
        let stem = args
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        PathBuf::from(format!("{}.{}", stem, args.target))
    });

    if output.exists() && !args.force {
        let body = serde_json::json!({
            "success": true,
            "skipped": true,
            "output": output.display().to_string(),
        });
        println!("{}", body);
        return;
    }

    if args.dry_run {
        let body = serde_json::json!({
            "success": true,
            "output": output.display().to_string(),
        });
        println!("{}", body);
        return;
    }

    match std::fs::copy(&args.input, &output) {
        Ok(bytes) => {
            let body = serde_json::json!({
                "success": true,
                "output": output.display().to_string(),
                "output_size": bytes,
            });
            println!("{}", body);
        }
        Err(e) => fail(&format!("copy failed: {}", e)),
    }
}
