// tests/job_failure.rs

mod common;
use crate::common::{ManifestBuilder, commit_in, push, repos_of, start_fake, stop, with_timeout};

use commitflow::engine::{JobState, OutputFile};
use commitflow::errors::CommitflowError;
use commitflow::flush::ensure_all_finished;
use commitflow::store::ListCommitRequest;
use commitflow::types::{CommitState, CommitStatus};

#[tokio::test]
async fn failing_job_cancels_output_and_stops_downstream() {
    let (service, runtime) = start_fake(2, |exec| exec.with_body("bad", |_| Err(3)));
    service.create_repo("data").unwrap();
    service
        .create_pipeline(ManifestBuilder::new("bad").map("data").build())
        .await
        .unwrap();
    service
        .create_pipeline(ManifestBuilder::new("after_bad").map("bad").build())
        .await
        .unwrap();

    let c1 = push(&service, "data", &[("x", "1")]);
    let infos = with_timeout(service.flush_commit(&[c1], &[])).await.unwrap();
    assert_eq!(repos_of(&infos), vec!["data", "bad"]);

    let bad = commit_in(&infos, "bad");
    assert_eq!(bad.state, CommitState::Cancelled);
    let reason = bad.failure.as_deref().unwrap_or_default();
    assert!(reason.contains("exited with code 3"), "{reason}");

    match ensure_all_finished(&infos) {
        Err(CommitflowError::JobFailed(msg)) => assert!(msg.contains(&bad.commit.to_string())),
        other => panic!("expected JobFailed, got {other:?}"),
    }

    // Cancelled commits are hidden from normal listings.
    let normal = service
        .list_commit(&ListCommitRequest::new(["bad"]))
        .await
        .unwrap();
    assert!(normal.is_empty());
    let all = service
        .list_commit(&ListCommitRequest::new(["bad"]).status(CommitStatus::All))
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert!(service.list_commit(&ListCommitRequest::new(["after_bad"])).await.unwrap().is_empty());

    let jobs = service.list_job(Some("bad")).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::Failure(3));

    stop(service, runtime).await;
}

#[tokio::test]
async fn accepted_return_code_counts_as_success() {
    let (service, runtime) = start_fake(1, |exec| exec.with_body("lenient", |_| Err(4)));
    service.create_repo("data").unwrap();
    service
        .create_pipeline(
            ManifestBuilder::new("lenient")
                .map("data")
                .accept_return_code(4)
                .accept_return_code(5)
                .build(),
        )
        .await
        .unwrap();

    let c1 = push(&service, "data", &[("x", "1")]);
    let infos = with_timeout(service.flush_commit(&[c1], &[])).await.unwrap();
    ensure_all_finished(&infos).unwrap();
    assert_eq!(commit_in(&infos, "lenient").state, CommitState::Finished);

    stop(service, runtime).await;
}

#[tokio::test]
async fn one_failed_shard_fails_the_whole_commit() {
    let (service, runtime) = start_fake(4, |exec| {
        exec.with_body("picky", |job| {
            let poisoned = job
                .inputs
                .iter()
                .any(|i| i.files.keys().any(|p| p == "poison"));
            if poisoned { Err(1) } else { Ok(Vec::new()) }
        })
    });
    service.create_repo("data").unwrap();
    service
        .create_pipeline(ManifestBuilder::new("picky").map("data").constant(4).build())
        .await
        .unwrap();

    let files: Vec<(String, String)> = (0..20)
        .map(|i| (format!("f{i}"), "ok".to_string()))
        .chain(std::iter::once(("poison".to_string(), "!".to_string())))
        .collect();
    let refs: Vec<(&str, &str)> = files.iter().map(|(p, d)| (p.as_str(), d.as_str())).collect();
    let c1 = push(&service, "data", &refs);

    let infos = with_timeout(service.flush_commit(&[c1], &[])).await.unwrap();
    let picky = commit_in(&infos, "picky");
    assert_eq!(picky.state, CommitState::Cancelled);

    let jobs = service.list_job(Some("picky")).await.unwrap();
    assert_eq!(
        jobs.iter()
            .filter(|j| j.state == JobState::Failure(1))
            .count(),
        1
    );

    stop(service, runtime).await;
}

#[tokio::test]
async fn unwritable_output_path_cancels_the_commit() {
    let (service, runtime) = start_fake(1, |exec| {
        exec.with_body("escape", |_| Ok(vec![OutputFile::new("../escape", "x")]))
    });
    service.create_repo("data").unwrap();
    service
        .create_pipeline(ManifestBuilder::new("escape").map("data").build())
        .await
        .unwrap();
    service
        .create_pipeline(ManifestBuilder::new("after_escape").map("escape").build())
        .await
        .unwrap();

    let c1 = push(&service, "data", &[("x", "1")]);
    let infos = with_timeout(service.flush_commit(&[c1], &[])).await.unwrap();
    assert_eq!(repos_of(&infos), vec!["data", "escape"]);

    let escape = commit_in(&infos, "escape");
    assert_eq!(escape.state, CommitState::Cancelled);
    let reason = escape.failure.as_deref().unwrap_or_default();
    assert!(reason.contains("../escape"), "{reason}");
    assert!(ensure_all_finished(&infos).is_err());

    stop(service, runtime).await;
}

#[tokio::test]
async fn bad_output_in_one_shard_is_not_finished_by_the_others() {
    let (service, runtime) = start_fake(4, |exec| {
        exec.with_body("sharded", |job| {
            let poisoned = job
                .inputs
                .iter()
                .any(|i| i.files.keys().any(|p| p == "poison"));
            let path = if poisoned { "/" } else { "ok" };
            Ok(vec![OutputFile::new(path, "x")])
        })
    });
    service.create_repo("data").unwrap();
    service
        .create_pipeline(ManifestBuilder::new("sharded").map("data").constant(4).build())
        .await
        .unwrap();

    let files: Vec<(String, String)> = (0..20)
        .map(|i| (format!("f{i}"), "ok".to_string()))
        .chain(std::iter::once(("poison".to_string(), "!".to_string())))
        .collect();
    let refs: Vec<(&str, &str)> = files.iter().map(|(p, d)| (p.as_str(), d.as_str())).collect();
    let c1 = push(&service, "data", &refs);

    let infos = with_timeout(service.flush_commit(&[c1], &[])).await.unwrap();
    assert_eq!(commit_in(&infos, "sharded").state, CommitState::Cancelled);

    stop(service, runtime).await;
}
