// tests/integration/error_handling.rs

use std::io::Write;

use tempfile::NamedTempFile;

use commitflow::cli::CliArgs;
use commitflow::config::load_and_validate;
use commitflow::errors::{CommitflowError, ErrorKind};

fn config_file(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{body}").unwrap();
    file
}

#[test]
fn test_pipeline_cycle_returns_structured_error() {
    let file = config_file(
        r#"
[pipeline.A]
transform = { cmd = ["true"] }
inputs = [{ repo = "B" }]

[pipeline.B]
transform = { cmd = ["true"] }
inputs = [{ repo = "A" }]
"#,
    );

    match load_and_validate(file.path()) {
        Err(CommitflowError::DagCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains('A') || msg.contains('B'));
        }
        Err(e) => panic!("Expected DagCycle error, got: {e:?}"),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_unknown_input_repo_returns_config_error() {
    let file = config_file(
        r#"
repos = ["data"]

[pipeline.sum]
transform = { cmd = ["true"] }
inputs = [{ repo = "NonExistent" }]
"#,
    );

    match load_and_validate(file.path()) {
        Err(CommitflowError::ConfigError(msg)) => {
            assert!(msg.contains("unknown input repo"));
            assert!(msg.contains("NonExistent"));
        }
        Err(e) => panic!("Expected ConfigError, got: {e:?}"),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_bad_manifests_are_config_errors() {
    let cases = [
        // Reads its own output.
        r#"
[pipeline.loop]
transform = { cmd = ["true"] }
inputs = [{ repo = "loop" }]
"#,
        // Empty command.
        r#"
repos = ["data"]
[pipeline.sum]
transform = { cmd = [] }
inputs = [{ repo = "data" }]
"#,
        // Zero constant parallelism.
        r#"
repos = ["data"]
[pipeline.sum]
transform = { cmd = ["true"] }
inputs = [{ repo = "data" }]
parallelism_spec = { strategy = "CONSTANT", constant = 0 }
"#,
        // Seed into an undeclared repo.
        r#"
repos = ["data"]
[[seed]]
repo = "elsewhere"
path = "x"
file = "x.txt"
"#,
        // Nothing declared at all.
        "",
    ];

    for body in cases {
        let file = config_file(body);
        let err = load_and_validate(file.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config, "{body}: {err:?}");
    }
}

#[test]
fn test_malformed_toml_is_toml_error() {
    let file = config_file("repos = [\"data\"\n[pipeline.x");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, CommitflowError::TomlError(_)), "{err:?}");
}

#[test]
fn test_missing_file_is_io_error() {
    let err = load_and_validate("/definitely/not/here/Commitflow.toml").unwrap_err();
    assert!(matches!(err, CommitflowError::IoError(_)), "{err:?}");
}

#[test]
fn test_pipelines_come_out_in_dependency_order() {
    let file = config_file(
        r#"
repos = ["data"]

[pipeline.z_last]
transform = { cmd = ["true"] }
inputs = [{ repo = "a_middle" }]

[pipeline.a_middle]
transform = { cmd = ["true"] }
inputs = [{ repo = "m_first" }]

[pipeline.m_first]
transform = { cmd = ["true"] }
inputs = [{ repo = "data" }]
"#,
    );
    let cfg = load_and_validate(file.path()).unwrap();
    let order: Vec<String> = cfg
        .pipelines_in_order()
        .iter()
        .map(|m| m.name().to_string())
        .collect();
    assert_eq!(order, vec!["m_first", "a_middle", "z_last"]);
}

#[tokio::test]
async fn test_run_seeds_and_flushes_from_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("set1.txt"), "apple 5\n").unwrap();
    std::fs::write(
        dir.path().join("Commitflow.toml"),
        r#"
repos = ["data"]

[config]
worker_count = 2

[pipeline.copy]
transform = { cmd = ["sh", "-c", "cp -r data/. out/"] }
inputs = [{ repo = "data" }]

[[seed]]
repo = "data"
path = "sales/set1"
file = "set1.txt"
"#,
    )
    .unwrap();

    let args = CliArgs {
        config: dir.path().join("Commitflow.toml").display().to_string(),
        to_repo: vec!["copy".to_string()],
        log_level: None,
        dry_run: false,
    };
    commitflow::run(args).await.unwrap();
}

#[tokio::test]
async fn test_run_reports_failed_jobs() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("in.txt"), "x").unwrap();
    std::fs::write(
        dir.path().join("Commitflow.toml"),
        r#"
repos = ["data"]

[pipeline.broken]
transform = { cmd = ["sh", "-c", "exit 2"] }
inputs = [{ repo = "data" }]

[[seed]]
repo = "data"
path = "in"
file = "in.txt"
"#,
    )
    .unwrap();

    let args = CliArgs {
        config: dir.path().join("Commitflow.toml").display().to_string(),
        to_repo: Vec::new(),
        log_level: None,
        dry_run: false,
    };
    let err = commitflow::run(args).await.unwrap_err();
    assert!(format!("{err:#}").contains("exited with code 2"), "{err:#}");
}
