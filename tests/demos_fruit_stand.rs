// tests/demos_fruit_stand.rs

mod common;
use crate::common::init_tracing;

use std::path::PathBuf;

use commitflow::cli::CliArgs;
use commitflow::config::load_and_validate;

fn demo_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/fruit_stand/Commitflow.toml")
}

fn args(dry_run: bool) -> CliArgs {
    CliArgs {
        config: demo_config().display().to_string(),
        to_repo: Vec::new(),
        log_level: None,
        dry_run,
    }
}

#[test]
fn demo_config_validates() {
    let cfg = load_and_validate(demo_config()).unwrap();
    assert_eq!(cfg.repos, vec!["data"]);
    assert_eq!(cfg.config.worker_count, 2);

    let names: Vec<String> = cfg
        .pipelines_in_order()
        .iter()
        .map(|m| m.name().to_string())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"sum".to_string()) && names.contains(&"filter".to_string()));

    for seed in &cfg.seed {
        assert!(cfg.seed_path(seed).is_file(), "{seed:?}");
    }
}

#[tokio::test]
async fn demo_dry_run_and_run() {
    init_tracing();
    commitflow::run(args(true)).await.unwrap();
    commitflow::run(args(false)).await.unwrap();
}
