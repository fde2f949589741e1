// tests/run_pipeline.rs

mod common;
use crate::common::{ManifestBuilder, commit_in, read, repos_of, start_fake, stop, with_timeout};

use commitflow::engine::OutputFile;
use commitflow::errors::CommitflowError;
use commitflow::types::CommitState;

#[tokio::test]
async fn source_pipeline_runs_on_demand_and_feeds_downstream() {
    let (service, runtime) = start_fake(2, |exec| {
        exec.with_body("generator", |job| {
            assert!(job.inputs.is_empty());
            Ok(vec![OutputFile::new("numbers", "1 2 3\n")])
        })
    });

    service
        .create_pipeline(ManifestBuilder::new("generator").build())
        .await
        .unwrap();
    service
        .create_pipeline(ManifestBuilder::new("mirror").map("generator").build())
        .await
        .unwrap();

    let produced = with_timeout(service.run_pipeline("generator")).await.unwrap();
    assert_eq!(produced.repo, "generator");
    let state = with_timeout(service.wait_until_terminal(&produced))
        .await
        .unwrap();
    assert_eq!(state, CommitState::Finished);
    assert!(service.inspect_commit(&produced).unwrap().provenance.is_empty());

    let infos = with_timeout(service.flush_commit(&[produced.clone()], &[]))
        .await
        .unwrap();
    assert_eq!(repos_of(&infos), vec!["generator", "mirror"]);
    assert_eq!(read(&service, &commit_in(&infos, "mirror").commit, "numbers"), "1 2 3\n");

    // A second run appends to the generator's previous output.
    let again = with_timeout(service.run_pipeline("generator")).await.unwrap();
    with_timeout(service.wait_until_terminal(&again)).await.unwrap();
    assert_eq!(read(&service, &again, "numbers"), "1 2 3\n1 2 3\n");

    stop(service, runtime).await;
}

#[tokio::test]
async fn unknown_pipeline_and_stopped_runtime() {
    let (service, runtime) = start_fake(1, |exec| exec);

    let err = service.run_pipeline("missing").await.unwrap_err();
    assert!(matches!(err, CommitflowError::PipelineNotFound(_)), "{err:?}");

    service.shutdown().unwrap();
    with_timeout(runtime.join()).await.unwrap();

    let err = service.run_pipeline("missing").await.unwrap_err();
    assert!(matches!(err, CommitflowError::RuntimeStopped), "{err:?}");
    let err = service.list_job(None).await.unwrap_err();
    assert!(matches!(err, CommitflowError::RuntimeStopped), "{err:?}");
}
