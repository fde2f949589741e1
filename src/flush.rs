// src/flush.rs

//! Blocking wait over the provenance closure of a set of commits.
//!
//! Discovery and waiting are interleaved: a commit's provenance children are
//! only read once the commit has *settled* (it is terminal and the trigger
//! has evaluated it), because only then are all of its direct children
//! guaranteed to exist. Waits run concurrently on a `JoinSet`; each wake-up
//! feeds newly found children back into the frontier.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::errors::{CommitflowError, Result};
use crate::store::{Commit, CommitInfo, Store};
use crate::types::CommitState;

type Wait = (u64, Result<CommitState>);

/// Wait until every commit provenance-derived from `commits` is terminal and
/// return their infos.
///
/// With a non-empty `to_repos` only commits in those repos are returned, but
/// the whole closure is still awaited. Order: repos by dependency depth from
/// the start commits, then repo name, then creation order.
pub async fn flush_commit(
    store: &Arc<Store>,
    commits: &[Commit],
    to_repos: &[String],
) -> Result<Vec<CommitInfo>> {
    let mut visited: BTreeMap<u64, Commit> = BTreeMap::new();
    let mut waits: JoinSet<Wait> = JoinSet::new();

    for commit in commits {
        let seq = store.commit_seq(commit)?;
        if visited.insert(seq, commit.clone()).is_none() {
            spawn_wait(store, &mut waits, seq);
        }
    }
    debug!(start = commits.len(), "flush started");

    loop {
        while let Some(joined) = waits.join_next().await {
            let (seq, state) = joined
                .map_err(|e| CommitflowError::Other(anyhow::anyhow!("flush wait task failed: {e}")))?;
            let state = state?;
            trace!(seq, %state, "flush: commit settled");
            discover_children(store, &mut visited, &mut waits, seq)?;
        }

        // Children can be attached after their parent settled (another input
        // of a multi-input pipeline finishing later); pick those up too.
        let settled: Vec<u64> = visited.keys().copied().collect();
        for seq in settled {
            discover_children(store, &mut visited, &mut waits, seq)?;
        }
        if waits.is_empty() {
            break;
        }
        debug!(pending = waits.len(), "flush: rescan found late children");
    }

    let infos = collect_results(store, &visited, to_repos);
    debug!(visited = visited.len(), returned = infos.len(), "flush finished");
    Ok(infos)
}

/// Fail with `JobFailed` if any of `infos` was cancelled.
pub fn ensure_all_finished(infos: &[CommitInfo]) -> Result<()> {
    let failed: Vec<String> = infos
        .iter()
        .filter(|i| i.is_failed())
        .map(|i| match &i.failure {
            Some(reason) => format!("{} ({reason})", i.commit),
            None => i.commit.to_string(),
        })
        .collect();

    if failed.is_empty() {
        Ok(())
    } else {
        Err(CommitflowError::JobFailed(failed.join(", ")))
    }
}

fn spawn_wait(store: &Arc<Store>, waits: &mut JoinSet<Wait>, seq: u64) {
    let subscription = store.subscribe_settled(seq);
    waits.spawn(async move { (seq, subscription.wait().await) });
}

fn discover_children(
    store: &Arc<Store>,
    visited: &mut BTreeMap<u64, Commit>,
    waits: &mut JoinSet<Wait>,
    seq: u64,
) -> Result<()> {
    for (child_seq, child) in store.graph().children(seq) {
        if child_seq <= seq {
            return Err(CommitflowError::ProvenanceCycle(format!(
                "{child} (#{child_seq}) derives from a later commit (#{seq})"
            )));
        }
        if !visited.contains_key(&child_seq) {
            trace!(parent = seq, child = %child, "flush: discovered commit");
            visited.insert(child_seq, child);
            spawn_wait(store, waits, child_seq);
        }
    }
    Ok(())
}

fn collect_results(
    store: &Arc<Store>,
    visited: &BTreeMap<u64, Commit>,
    to_repos: &[String],
) -> Vec<CommitInfo> {
    // Longest path from a start commit; `visited` iterates in creation order,
    // which is a topological order of the provenance graph.
    let mut depth: HashMap<u64, usize> = HashMap::new();
    for &seq in visited.keys() {
        let d = store
            .graph()
            .parents(seq)
            .into_iter()
            .filter_map(|(parent, _)| depth.get(&parent).map(|d| d + 1))
            .max()
            .unwrap_or(0);
        depth.insert(seq, d);
    }

    let mut repo_depth: HashMap<&str, usize> = HashMap::new();
    for (seq, commit) in visited {
        let d = depth.get(seq).copied().unwrap_or(0);
        let entry = repo_depth.entry(commit.repo.as_str()).or_insert(d);
        *entry = (*entry).max(d);
    }

    let mut infos: Vec<CommitInfo> = visited
        .values()
        .filter(|c| to_repos.is_empty() || to_repos.contains(&c.repo))
        // Commits of repos deleted while we waited are gone.
        .filter_map(|c| store.inspect_commit(c).ok())
        .collect();

    infos.sort_by_key(|info| {
        (
            repo_depth.get(info.commit.repo.as_str()).copied().unwrap_or(0),
            info.commit.repo.clone(),
            info.sequence,
        )
    });
    infos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PutMode;

    #[tokio::test]
    async fn lone_commit_flushes_to_itself() {
        let store = Arc::new(Store::new());
        store.create_repo("data").unwrap();
        let c = store.start_commit("data", None).unwrap();
        store.put_file(&c, "a", b"1", PutMode::Append).unwrap();
        store.finish_commit(&c).unwrap();

        let infos = flush_commit(&store, &[c.clone()], &[]).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].commit, c);
        ensure_all_finished(&infos).unwrap();
    }

    #[tokio::test]
    async fn unknown_commit_is_not_found() {
        let store = Arc::new(Store::new());
        store.create_repo("data").unwrap();
        let err = flush_commit(&store, &[Commit::new("data", "nope")], &[])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn waits_for_manually_linked_children() {
        let store = Arc::new(Store::new());
        store.create_repo("a").unwrap();
        store.create_repo("b").unwrap();
        let src = store.start_commit("a", None).unwrap();
        store.finish_commit(&src).unwrap();
        let derived = store.start_commit("b", None).unwrap();
        store.add_provenance(&src, &derived).unwrap();

        let flush = {
            let store = Arc::clone(&store);
            let src = src.clone();
            tokio::spawn(async move { flush_commit(&store, &[src], &[]).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!flush.is_finished());

        store.cancel_commit(&derived, "no data").unwrap();
        let infos = flush.await.unwrap().unwrap();
        let repos: Vec<&str> = infos.iter().map(|i| i.commit.repo.as_str()).collect();
        assert_eq!(repos, vec!["a", "b"]);
        assert!(infos[1].is_failed());
        assert!(matches!(
            ensure_all_finished(&infos),
            Err(CommitflowError::JobFailed(_))
        ));
    }
}
