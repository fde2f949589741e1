// src/pipeline/partition.rs

//! Split the input data of one trigger into per-job shards.

use std::collections::BTreeMap;

use crate::store::Commit;
use crate::types::ShardKey;

/// Position of a job among the jobs of one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardIndex {
    pub index: u64,
    pub count: u64,
}

/// The files of one input commit that a job sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
    pub repo: String,
    pub commit: Commit,
    pub files: BTreeMap<String, Vec<u8>>,
}

/// Files of one input, already filtered, waiting to be sharded.
#[derive(Debug, Clone)]
pub struct InputSnapshot {
    pub commit: Commit,
    pub files: BTreeMap<String, Vec<u8>>,
    pub key: ShardKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub shard: ShardIndex,
    pub inputs: Vec<JobInput>,
}

impl WorkUnit {
    pub fn is_empty(&self) -> bool {
        self.inputs.iter().all(|i| i.files.is_empty())
    }
}

pub fn shard_of(key: &str, count: u64) -> u64 {
    if count <= 1 {
        return 0;
    }
    let hash = blake3::hash(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix) % count
}

/// Partition every input into `count` shards and drop the empty ones.
///
/// Shard `i` receives partition `i` of every input, so files sharing a key
/// always land in the same job.
pub fn plan_work(snapshots: Vec<InputSnapshot>, count: u64) -> Vec<WorkUnit> {
    let count = count.max(1);
    let mut units: Vec<WorkUnit> = (0..count)
        .map(|index| WorkUnit {
            shard: ShardIndex { index, count },
            inputs: snapshots
                .iter()
                .map(|s| JobInput {
                    repo: s.commit.repo.clone(),
                    commit: s.commit.clone(),
                    files: BTreeMap::new(),
                })
                .collect(),
        })
        .collect();

    for (slot, snapshot) in snapshots.into_iter().enumerate() {
        for (path, data) in snapshot.files {
            let shard = shard_of(snapshot.key.key_of(&path), count) as usize;
            units[shard].inputs[slot].files.insert(path, data);
        }
    }

    units.retain(|u| !u.is_empty());
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(paths: &[&str], key: ShardKey) -> InputSnapshot {
        InputSnapshot {
            commit: Commit::new("data", "c1"),
            files: paths
                .iter()
                .map(|p| (p.to_string(), p.as_bytes().to_vec()))
                .collect(),
            key,
        }
    }

    #[test]
    fn every_file_lands_in_exactly_one_shard() {
        let paths: Vec<String> = (0..50).map(|i| format!("f{i}")).collect();
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let units = plan_work(vec![snapshot(&refs, ShardKey::Path)], 4);

        let total: usize = units.iter().map(|u| u.inputs[0].files.len()).sum();
        assert_eq!(total, 50);
        assert!(units.len() <= 4);
        assert!(units.iter().all(|u| u.shard.count == 4));
    }

    #[test]
    fn top_dir_keeps_directory_together() {
        let units = plan_work(
            vec![snapshot(
                &["apple/1", "apple/2", "apple/3", "pear/1", "pear/2"],
                ShardKey::TopDir,
            )],
            8,
        );
        for unit in &units {
            let dirs: std::collections::BTreeSet<&str> = unit.inputs[0]
                .files
                .keys()
                .map(|p| ShardKey::TopDir.key_of(p))
                .collect();
            for dir in dirs {
                let count = unit.inputs[0]
                    .files
                    .keys()
                    .filter(|p| p.starts_with(dir))
                    .count();
                assert!(count == 3 || count == 2);
            }
        }
    }

    #[test]
    fn empty_input_yields_no_work() {
        assert!(plan_work(vec![snapshot(&[], ShardKey::Path)], 3).is_empty());
        assert_eq!(shard_of("anything", 1), 0);
    }
}
