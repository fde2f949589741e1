#![allow(dead_code)]

pub use commitflow_test_utils::{
    ConfigFileBuilder, FnExecutor, ManifestBuilder, init_tracing, with_timeout,
};

use commitflow::service::{RuntimeHandle, Service, ServiceOptions};
use commitflow::store::{Commit, CommitInfo};
use commitflow::types::PutMode;

/// Start a service whose jobs run as closures registered on the executor.
pub fn start_fake<F>(worker_count: usize, configure: F) -> (Service, RuntimeHandle)
where
    F: FnOnce(FnExecutor) -> FnExecutor,
{
    init_tracing();
    Service::start(ServiceOptions { worker_count }, move |tx| {
        configure(FnExecutor::new(tx))
    })
}

/// Open a commit on `repo`, append `files`, finish it.
pub fn push(service: &Service, repo: &str, files: &[(&str, &str)]) -> Commit {
    let commit = service.start_commit(repo, None).unwrap();
    for (path, data) in files {
        service
            .put_file(&commit, path, data.as_bytes(), PutMode::Append)
            .unwrap();
    }
    service.finish_commit(&commit).unwrap();
    commit
}

pub fn read(service: &Service, commit: &Commit, path: &str) -> String {
    let data = service.get_file(commit, path, 0, 0).unwrap();
    String::from_utf8(data).unwrap()
}

pub fn repos_of(infos: &[CommitInfo]) -> Vec<&str> {
    infos.iter().map(|i| i.commit.repo.as_str()).collect()
}

pub fn commit_in<'a>(infos: &'a [CommitInfo], repo: &str) -> &'a CommitInfo {
    infos
        .iter()
        .find(|i| i.commit.repo == repo)
        .unwrap_or_else(|| panic!("no commit for repo {repo} in {:?}", repos_of(infos)))
}

pub async fn stop(service: Service, runtime: RuntimeHandle) {
    service.shutdown().unwrap();
    with_timeout(runtime.join()).await.unwrap();
}
