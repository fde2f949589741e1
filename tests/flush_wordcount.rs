// tests/flush_wordcount.rs

mod common;
use crate::common::{ManifestBuilder, commit_in, push, read, repos_of, start_fake, stop, with_timeout};

use std::collections::BTreeMap;

use commitflow::engine::{JobState, OutputFile, ScheduledJob};
use commitflow::flush::ensure_all_finished;
use commitflow::types::ShardKey;

/// One file per word, one line per occurrence.
fn map_words(job: &ScheduledJob) -> Result<Vec<OutputFile>, i32> {
    let mut counts: BTreeMap<String, String> = BTreeMap::new();
    for input in &job.inputs {
        for data in input.files.values() {
            let text = std::str::from_utf8(data).map_err(|_| 2)?;
            for word in text.split_whitespace() {
                counts.entry(word.to_lowercase()).or_default().push_str("1\n");
            }
        }
    }
    Ok(counts
        .into_iter()
        .map(|(word, ones)| OutputFile::new(word, ones))
        .collect())
}

/// Collapse each word file into its count.
fn reduce_words(job: &ScheduledJob) -> Result<Vec<OutputFile>, i32> {
    Ok(job
        .inputs
        .iter()
        .flat_map(|input| input.files.iter())
        .map(|(word, ones)| {
            let n = ones.iter().filter(|b| **b == b'\n').count();
            OutputFile::new(word.clone(), n.to_string())
        })
        .collect())
}

fn corpus(words: usize, offset: usize) -> String {
    (0..words)
        .map(|i| format!("word{:03}", i + offset))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn wordcount_chain_produces_one_file_per_word() {
    let (service, runtime) = start_fake(4, |exec| {
        exec.with_body("wordcount_map", map_words)
            .with_body("wordcount_reduce", reduce_words)
    });

    service.create_repo("wordcount_input").unwrap();
    service
        .create_pipeline(
            ManifestBuilder::new("wordcount_map")
                .image("wordcount-map:latest")
                .map("wordcount_input")
                .constant(3)
                .build(),
        )
        .await
        .unwrap();
    service
        .create_pipeline(
            ManifestBuilder::new("wordcount_reduce")
                .reduce("wordcount_map", ShardKey::Path)
                .coefficient(1.0)
                .build(),
        )
        .await
        .unwrap();

    // 150 distinct words; word050..word099 appear in two documents.
    let docs = [
        ("docs/a.txt", corpus(100, 0)),
        ("docs/b.txt", corpus(100, 50)),
    ];
    let files: Vec<(&str, &str)> = docs.iter().map(|(p, d)| (*p, d.as_str())).collect();
    let input = push(&service, "wordcount_input", &files);

    let infos = with_timeout(service.flush_commit(&[input], &[]))
        .await
        .unwrap();
    assert_eq!(
        repos_of(&infos),
        vec!["wordcount_input", "wordcount_map", "wordcount_reduce"]
    );
    ensure_all_finished(&infos).unwrap();

    let reduced = &commit_in(&infos, "wordcount_reduce").commit;
    let listing = service.list_file(reduced, "").unwrap();
    assert!(listing.len() >= 100, "only {} word files", listing.len());
    assert_eq!(listing.len(), 150);
    assert_eq!(read(&service, reduced, "word000"), "1");
    assert_eq!(read(&service, reduced, "word075"), "2");
    assert_eq!(read(&service, reduced, "word149"), "1");

    let map_jobs = service.list_job(Some("wordcount_map")).await.unwrap();
    assert!(!map_jobs.is_empty() && map_jobs.len() <= 3);
    assert!(map_jobs.iter().all(|j| j.state == JobState::Success));

    let reduce_jobs = service.list_job(Some("wordcount_reduce")).await.unwrap();
    assert!(reduce_jobs.len() <= 4);
    assert!(
        reduce_jobs
            .iter()
            .all(|j| j.output == *reduced && j.inputs == vec![commit_in(&infos, "wordcount_map").commit.clone()])
    );

    let all = service.list_job(None).await.unwrap();
    assert_eq!(all.len(), map_jobs.len() + reduce_jobs.len());

    stop(service, runtime).await;
}

#[tokio::test]
async fn reduce_recounts_on_new_input() {
    let (service, runtime) = start_fake(2, |exec| {
        exec.with_body("wordcount_map", map_words)
            .with_body("wordcount_reduce", reduce_words)
    });
    service.create_repo("wordcount_input").unwrap();
    service
        .create_pipeline(ManifestBuilder::new("wordcount_map").map("wordcount_input").build())
        .await
        .unwrap();
    service
        .create_pipeline(
            ManifestBuilder::new("wordcount_reduce")
                .reduce("wordcount_map", ShardKey::Path)
                .build(),
        )
        .await
        .unwrap();

    let first = push(&service, "wordcount_input", &[("one", "fox dog fox")]);
    with_timeout(service.flush_commit(&[first], &[])).await.unwrap();

    let second = push(&service, "wordcount_input", &[("two", "fox")]);
    let infos = with_timeout(service.flush_commit(&[second], &["wordcount_reduce".to_string()]))
        .await
        .unwrap();
    let reduced = &infos[0].commit;
    assert_eq!(read(&service, reduced, "fox"), "3");
    assert_eq!(read(&service, reduced, "dog"), "1");

    stop(service, runtime).await;
}
