// Similarity retrieval: score embeddings, nearest-neighbor index backends,
// and the retriever that turns a score row into ranked comps.

pub mod chroma;
pub mod embedding;
pub mod index;
pub mod retriever;
