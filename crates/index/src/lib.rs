mod exact;
mod hnsw;

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use contract_miner_core::{Chunk, Embedder, MinerError, Result};

use exact::ExactIndex;
use hnsw::HnswBackend;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Exact,
    Hnsw,
}

impl BackendKind {
    /// Backend choice is an environment/deployment concern, never a
    /// per-caller one.
    pub fn from_env() -> Self {
        match env::var("VECTOR_BACKEND")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "hnsw" | "approximate" => BackendKind::Hnsw,
            _ => BackendKind::Exact,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexMeta {
    dimension: Option<usize>,
    backend: BackendKind,
    ids: Vec<String>,
    texts: Vec<String>,
}

enum Backend {
    Exact(ExactIndex),
    Hnsw(HnswBackend),
}

struct Inner {
    meta: IndexMeta,
    backend: Backend,
}

/// Durable nearest-neighbor store over chunk embeddings. Two artifacts sit
/// next to each other on disk: the vector artifact (per backend) and the
/// metadata artifact (dimension, ids, texts). The metadata artifact is
/// written last and is authoritative on reload, so a crash between the two
/// writes can never surface vectors without matching metadata.
pub struct VectorIndex {
    base: PathBuf,
    inner: RwLock<Inner>,
}

impl VectorIndex {
    pub fn open<P: AsRef<Path>>(path: P, kind: BackendKind) -> Result<Self> {
        let base = path.as_ref().to_path_buf();
        if let Some(parent) = base.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let meta_path = meta_path(&base);
        let inner = if meta_path.exists() {
            let meta: IndexMeta = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;
            // an existing index keeps the backend it was built with
            let backend = match meta.backend {
                BackendKind::Exact => {
                    let vectors_path = vectors_path(&base);
                    let mut index = if vectors_path.exists() {
                        serde_json::from_str::<ExactIndex>(&fs::read_to_string(&vectors_path)?)?
                    } else {
                        ExactIndex::default()
                    };
                    index.truncate(meta.ids.len());
                    Backend::Exact(index)
                }
                BackendKind::Hnsw => {
                    let graph_path = graph_path(&base);
                    if graph_path.exists() {
                        Backend::Hnsw(HnswBackend::load(&graph_path.to_string_lossy())?)
                    } else {
                        Backend::Hnsw(HnswBackend::empty())
                    }
                }
            };
            info!(
                backend = ?meta.backend,
                vectors = meta.ids.len(),
                "vector index reloaded"
            );
            Inner { meta, backend }
        } else {
            let backend = match kind {
                BackendKind::Exact => Backend::Exact(ExactIndex::default()),
                BackendKind::Hnsw => Backend::Hnsw(HnswBackend::empty()),
            };
            Inner {
                meta: IndexMeta {
                    backend: kind,
                    ..IndexMeta::default()
                },
                backend,
            }
        };
        Ok(Self {
            base,
            inner: RwLock::new(inner),
        })
    }

    /// Embeds and appends `chunks`, then rewrites both artifacts. Embedding
    /// happens before any state is touched, so an `Embedding` error leaves
    /// disk exactly as it was.
    pub fn add<E: Embedder + ?Sized>(&self, chunks: &[Chunk], embedder: &E) -> Result<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            embeddings.push(embedder.embed(&chunk.text)?);
        }

        let mut inner = self.inner.write();
        let dimension = match inner.meta.dimension {
            Some(dim) => dim,
            None => embeddings[0].len(),
        };
        for embedding in &embeddings {
            if embedding.len() != dimension {
                return Err(MinerError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
        }
        inner.meta.dimension = Some(dimension);

        let start_label = inner.meta.ids.len();
        for chunk in chunks {
            inner.meta.ids.push(chunk.id.clone());
            inner.meta.texts.push(chunk.text.clone());
        }
        match &mut inner.backend {
            Backend::Exact(index) => index.insert_all(&embeddings),
            Backend::Hnsw(index) => index.insert_all(&embeddings, start_label, dimension)?,
        }
        self.persist(&mut inner)?;
        debug!(added = chunks.len(), total = inner.meta.ids.len(), "chunks indexed");
        Ok(chunks.iter().map(|chunk| chunk.id.clone()).collect())
    }

    pub fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let inner = self.inner.read();
        let Some(dimension) = inner.meta.dimension else {
            return Ok(Vec::new());
        };
        if embedding.len() != dimension {
            return Err(MinerError::DimensionMismatch {
                expected: dimension,
                actual: embedding.len(),
            });
        }
        let hits = match &inner.backend {
            Backend::Exact(index) => index.search(embedding, top_k),
            Backend::Hnsw(index) => index.search(embedding, top_k),
        };
        Ok(hits
            .into_iter()
            .filter_map(|(label, score)| {
                // labels past the metadata arena have no record; drop them
                let id = inner.meta.ids.get(label)?;
                let text = inner.meta.texts.get(label)?;
                Some(RetrievedChunk {
                    id: id.clone(),
                    text: text.clone(),
                    score,
                })
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.inner.read().meta.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> Option<usize> {
        self.inner.read().meta.dimension
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.read().meta.backend
    }

    fn persist(&self, inner: &mut Inner) -> Result<()> {
        match &mut inner.backend {
            Backend::Exact(index) => {
                write_json_atomic(&vectors_path(&self.base), index)?;
            }
            Backend::Hnsw(index) => {
                if !index.is_empty() {
                    let graph_path = graph_path(&self.base);
                    let tmp = graph_path.with_extension("hnsw.tmp");
                    index.dump(&tmp.to_string_lossy())?;
                    fs::rename(&tmp, &graph_path)?;
                }
            }
        }
        // metadata goes last; it is the commit point for the add
        write_json_atomic(&meta_path(&self.base), &inner.meta)
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match parent {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    tmp.write_all(&serde_json::to_vec(value)?)?;
    tmp.persist(path)
        .map_err(|e| MinerError::Index(e.to_string()))?;
    Ok(())
}

fn meta_path(base: &Path) -> PathBuf {
    with_suffix(base, ".meta.json")
}

fn vectors_path(base: &Path) -> PathBuf {
    with_suffix(base, ".vectors.json")
}

fn graph_path(base: &Path) -> PathBuf {
    with_suffix(base, ".hnsw")
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
