use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One stored vector's provenance, keyed by its slot id (§4.7 C7,
/// "VectorMapping entry", §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRef {
    pub contract_id: i64,
    pub chunk_id: i64,
    pub chunk_index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

#[derive(Debug)]
pub struct VectorSearchHit {
    pub slot_id: u64,
    pub score: f32,
    pub vector_ref: VectorRef,
}

struct Inner {
    vectors: Vec<Vec<f32>>,
    mapping: HashMap<u64, VectorRef>,
}

/// In-process inner-product flat index over unit-normalized vectors
/// (§4.7). `AddVectors`/`RemoveByContract`/`ClearMapping` take the write
/// lock, `Search` the read lock (§5 "Vector index (C7) is the only
/// mutable in-process shared state").
pub struct VectorIndex {
    inner: RwLock<Inner>,
    dimension: usize,
    index_path: PathBuf,
    mapping_path: PathBuf,
}

impl VectorIndex {
    /// Loads `{dir}/contract_vectors.index` and `{dir}/vector_mapping.json`
    /// if both exist; otherwise starts an empty index (§4.7 `Load()`).
    pub fn load(dir: &Path, dimension: usize) -> Result<Self> {
        fs::create_dir_all(dir).context("failed to create vector index directory")?;

        let index_path = dir.join("contract_vectors.index");
        let mapping_path = dir.join("vector_mapping.json");

        let (vectors, mapping) = if index_path.exists() && mapping_path.exists() {
            let index_bytes = fs::read(&index_path).context("failed to read vector index")?;
            let persisted: PersistedIndex = serde_json::from_slice(&index_bytes)
                .context("failed to parse vector index")?;

            let mapping_bytes =
                fs::read(&mapping_path).context("failed to read vector mapping")?;
            let raw_mapping: HashMap<String, VectorRef> =
                serde_json::from_slice(&mapping_bytes).context("failed to parse vector mapping")?;
            let mapping = raw_mapping
                .into_iter()
                .filter_map(|(k, v)| k.parse::<u64>().ok().map(|id| (id, v)))
                .collect();

            (persisted.vectors, mapping)
        } else {
            (Vec::new(), HashMap::new())
        };

        Ok(Self {
            inner: RwLock::new(Inner { vectors, mapping }),
            dimension,
            index_path,
            mapping_path,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.read().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// L2-normalizes each vector, appends to the index, assigns slot ids
    /// `old_size, old_size+1, ...`, extends the mapping, and persists both
    /// files atomically (write-temp-then-rename) — all inside the write
    /// lock (§4.7 `AddVectors`).
    pub fn add_vectors(&self, vectors: Vec<Vec<f32>>, refs: Vec<VectorRef>) -> Result<Vec<u64>> {
        anyhow::ensure!(
            vectors.len() == refs.len(),
            "vector/ref count mismatch: {} vectors, {} refs",
            vectors.len(),
            refs.len()
        );

        let mut guard = self.inner.write();
        let start_id = guard.vectors.len() as u64;
        let mut assigned = Vec::with_capacity(vectors.len());

        for (i, vector) in vectors.into_iter().enumerate() {
            anyhow::ensure!(
                vector.len() == self.dimension,
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            );
            let normalized = l2_normalize(vector);
            let slot_id = start_id + i as u64;
            guard.vectors.push(normalized);
            guard.mapping.insert(slot_id, refs[i].clone());
            assigned.push(slot_id);
        }

        self.persist(&guard)?;
        Ok(assigned)
    }

    /// Normalizes the query, scores every stored vector by inner product,
    /// and returns the top `top_k` hits whose slot still resolves in the
    /// mapping — orphaned slots left behind by `RemoveByContract` are
    /// skipped rather than causing an error (§4.7 `Search`).
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorSearchHit>> {
        anyhow::ensure!(
            query.len() == self.dimension,
            "query dimension mismatch: expected {}, got {}",
            self.dimension,
            query.len()
        );

        let guard = self.inner.read();
        let normalized_query = l2_normalize(query.to_vec());

        let mut scored: Vec<(u64, f32)> = guard
            .vectors
            .iter()
            .enumerate()
            .filter(|(slot_id, _)| guard.mapping.contains_key(&(*slot_id as u64)))
            .map(|(slot_id, vector)| (slot_id as u64, dot(&normalized_query, vector)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(slot_id, score)| VectorSearchHit {
                slot_id,
                score,
                vector_ref: guard.mapping[&slot_id].clone(),
            })
            .collect())
    }

    /// Removes mapping entries for `contract_id`. The underlying flat
    /// index is not rewritten — those slots become orphans that `Search`
    /// filters out (§4.7 `RemoveByContract`).
    pub fn remove_by_contract(&self, contract_id: i64) -> Result<usize> {
        let mut guard = self.inner.write();
        let before = guard.mapping.len();
        guard.mapping.retain(|_, v| v.contract_id != contract_id);
        let removed = before - guard.mapping.len();
        self.persist(&guard)?;
        Ok(removed)
    }

    pub fn clear_mapping(&self) -> Result<()> {
        let mut guard = self.inner.write();
        guard.mapping.clear();
        self.persist(&guard)?;
        Ok(())
    }

    fn persist(&self, guard: &Inner) -> Result<()> {
        let persisted = PersistedIndex {
            dimension: self.dimension,
            vectors: guard.vectors.clone(),
        };
        write_atomic(&self.index_path, &serde_json::to_vec(&persisted)?)?;

        let string_keyed: HashMap<String, &VectorRef> = guard
            .mapping
            .iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        write_atomic(
            &self.mapping_path,
            &serde_json::to_vec_pretty(&string_keyed)?,
        )?;

        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    fs::write(&tmp_path, bytes)
        .with_context(|| format!("failed to write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename into place {}", path.display()))?;
    Ok(())
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vref(contract_id: i64, chunk_id: i64, chunk_index: i32) -> VectorRef {
        VectorRef {
            contract_id,
            chunk_id,
            chunk_index,
        }
    }

    #[test]
    fn add_and_search_round_trip() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::load(dir.path(), 3).unwrap();

        let ids = index
            .add_vectors(
                vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
                vec![vref(1, 10, 0), vref(1, 11, 1)],
            )
            .unwrap();
        assert_eq!(ids, vec![0, 1]);

        let hits = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].slot_id, 0);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempdir().unwrap();
        {
            let index = VectorIndex::load(dir.path(), 2).unwrap();
            index
                .add_vectors(vec![vec![1.0, 1.0]], vec![vref(5, 50, 0)])
                .unwrap();
        }

        let reloaded = VectorIndex::load(dir.path(), 2).unwrap();
        assert_eq!(reloaded.len(), 1);
        let hits = reloaded.search(&[1.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].vector_ref.contract_id, 5);
    }

    #[test]
    fn remove_by_contract_orphans_slots_without_rewriting_index() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::load(dir.path(), 2).unwrap();
        index
            .add_vectors(
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                vec![vref(1, 1, 0), vref(2, 2, 0)],
            )
            .unwrap();

        let removed = index.remove_by_contract(1).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 2); // underlying index untouched

        let hits = index.search(&[1.0, 0.0], 5).unwrap();
        assert!(hits.iter().all(|h| h.vector_ref.contract_id != 1));
    }

    #[test]
    fn clear_mapping_empties_without_touching_vectors() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::load(dir.path(), 2).unwrap();
        index
            .add_vectors(vec![vec![1.0, 0.0]], vec![vref(1, 1, 0)])
            .unwrap();
        index.clear_mapping().unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::load(dir.path(), 3).unwrap();
        let err = index.add_vectors(vec![vec![1.0, 0.0]], vec![vref(1, 1, 0)]);
        assert!(err.is_err());
    }
}
