use std::collections::BTreeSet;
use std::time::Duration;

use proptest::prelude::*;

use commitflow::flush::ensure_all_finished;
use commitflow::service::{Service, ServiceOptions};
use commitflow::types::{PutMode, ShardKey};
use commitflow_test_utils::{FnExecutor, ManifestBuilder, with_timeout};

/// One generated pipeline: its inputs (indices into the source list) and
/// how it reads them.
#[derive(Debug, Clone)]
struct GenPipeline {
    inputs: BTreeSet<usize>,
    reduce: bool,
    shards: u64,
    /// Milliseconds before each job of this pipeline reports back.
    delay_ms: u64,
}

// Sources are `data` (0), `idle` (1, never written) and the pipelines
// generated before this one (2..), so the graph is acyclic by construction.
fn pipelines_strategy(max: usize) -> impl Strategy<Value = Vec<GenPipeline>> {
    proptest::collection::vec(
        (
            proptest::collection::vec(any::<usize>(), 1..3),
            any::<bool>(),
            1..4u64,
            prop::bool::weighted(0.15),
            prop_oneof![Just(0u64), 1..15u64],
        ),
        1..=max,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (picks, reduce, shards, read_idle, delay_ms))| {
                // Mostly upstream pipelines or `data`; occasionally `idle`.
                let mut inputs: BTreeSet<usize> = picks
                    .into_iter()
                    .map(|p| match p % (i + 1) {
                        0 => 0,
                        k => k + 1,
                    })
                    .collect();
                if read_idle {
                    inputs.insert(1);
                }
                GenPipeline {
                    inputs,
                    reduce,
                    shards,
                    delay_ms,
                }
            })
            .collect()
    })
}

fn source_name(idx: usize) -> String {
    match idx {
        0 => "data".to_string(),
        1 => "idle".to_string(),
        k => format!("p{}", k - 2),
    }
}

/// Repos that end up with a commit: `data`, plus every pipeline whose inputs
/// all have one.
fn expected_repos(pipelines: &[GenPipeline]) -> BTreeSet<String> {
    let mut live: BTreeSet<usize> = BTreeSet::from([0]);
    for (i, p) in pipelines.iter().enumerate() {
        if p.inputs.iter().all(|s| live.contains(s)) {
            live.insert(i + 2);
        }
    }
    live.into_iter().map(source_name).collect()
}

/// Push `generations` seed commits one after another and flush each.
async fn flush_generations(
    pipelines: Vec<GenPipeline>,
    generations: usize,
) -> (BTreeSet<String>, Vec<Vec<commitflow::store::CommitInfo>>) {
    let delays: Vec<(String, u64)> = pipelines
        .iter()
        .enumerate()
        .filter(|(_, p)| p.delay_ms > 0)
        .map(|(i, p)| (format!("p{i}"), p.delay_ms))
        .collect();
    let (service, runtime) = Service::start(ServiceOptions { worker_count: 3 }, move |tx| {
        delays
            .iter()
            .fold(FnExecutor::new(tx), |exec, (name, ms)| {
                exec.with_delay(name, Duration::from_millis(*ms))
            })
    });
    service.create_repo("data").unwrap();
    service.create_repo("idle").unwrap();

    for (i, p) in pipelines.iter().enumerate() {
        let mut manifest = ManifestBuilder::new(&format!("p{i}")).constant(p.shards);
        for &input in &p.inputs {
            let repo = source_name(input);
            manifest = if p.reduce {
                manifest.reduce(&repo, ShardKey::TopDir)
            } else {
                manifest.map(&repo)
            };
        }
        service.create_pipeline(manifest.build()).await.unwrap();
    }

    let mut flushed = Vec::with_capacity(generations);
    for generation in 0..generations {
        let commit = service.start_commit("data", None).unwrap();
        for path in ["a/1", "a/2", "b/1", "c"] {
            let data = format!("{path}@{generation}");
            service
                .put_file(&commit, path, data.as_bytes(), PutMode::Append)
                .unwrap();
        }
        service.finish_commit(&commit).unwrap();

        let infos = with_timeout(service.flush_commit(&[commit], &[]))
            .await
            .unwrap();
        flushed.push(infos);
    }

    service.shutdown().unwrap();
    with_timeout(runtime.join()).await.unwrap();
    (expected_repos(&pipelines), flushed)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn flush_returns_exactly_the_reachable_repos(pipelines in pipelines_strategy(8)) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let (expected, generations) = rt.block_on(flush_generations(pipelines, 3));

        for infos in &generations {
            let repos: Vec<String> = infos.iter().map(|i| i.commit.repo.clone()).collect();
            let unique: BTreeSet<String> = repos.iter().cloned().collect();

            // One commit per reachable repo, every generation.
            prop_assert_eq!(repos.len(), unique.len());
            prop_assert_eq!(&unique, &expected);
            prop_assert!(ensure_all_finished(infos).is_ok());

            // Provenance parents come from the same generation and are
            // listed before the commits they feed.
            for (pos, info) in infos.iter().enumerate() {
                for parent in &info.provenance {
                    let parent_pos = infos.iter().position(|i| &i.commit == parent);
                    prop_assert!(parent_pos.is_some_and(|p| p < pos));
                }
            }
        }
    }
}
