//! DDL for the per-Cube database file, declared once at open.
//!
//! Node tables (`data`, `documents`, `chunks`, `graph_nodes`) and relationship tables
//! (`structural_edges` covering HAS_DOCUMENT/HAS_CHUNK/NEXT_CHUNK, `graph_edges`
//! covering GraphEdge). `graph_nodes` carries every typed variant (Entity, Summary,
//! Rule, Unknown, Capability, DocumentChunk) distinguished by `node_type`, since they
//! share one identity scheme.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS data (
    id TEXT PRIMARY KEY,
    memory_group TEXT NOT NULL,
    name TEXT NOT NULL,
    raw_location TEXT NOT NULL,
    original_location TEXT,
    extension TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (content_hash, memory_group)
);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    memory_group TEXT NOT NULL,
    data_id TEXT NOT NULL REFERENCES data(id),
    text TEXT NOT NULL,
    metadata TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_data ON documents(data_id);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    memory_group TEXT NOT NULL,
    document_id TEXT NOT NULL REFERENCES documents(id),
    text TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    embedding BLOB
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_chunks_group ON chunks(memory_group);

-- HAS_DOCUMENT / HAS_CHUNK / NEXT_CHUNK: structural relationships recorded alongside
-- content inserts. Not part of the knowledge graph proper, so kept out of graph_edges.
CREATE TABLE IF NOT EXISTS structural_edges (
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    memory_group TEXT NOT NULL,
    PRIMARY KEY (source, target, edge_type, memory_group)
);

CREATE TABLE IF NOT EXISTS graph_nodes (
    id TEXT PRIMARY KEY,
    memory_group TEXT NOT NULL,
    node_type TEXT NOT NULL,
    name TEXT NOT NULL,
    properties TEXT NOT NULL,
    embedding BLOB,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_graph_nodes_type ON graph_nodes(node_type, memory_group);

CREATE TABLE IF NOT EXISTS graph_edges (
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    memory_group TEXT NOT NULL,
    properties TEXT NOT NULL,
    weight REAL NOT NULL,
    confidence REAL NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (source, target, edge_type, memory_group)
);
CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source, memory_group);
CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target, memory_group);

-- Manual BM25 inverted index backing KeywordStorage's FTS entity expansion.
CREATE TABLE IF NOT EXISTS keyword_terms (
    term TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    memory_group TEXT NOT NULL,
    term_freq INTEGER NOT NULL,
    PRIMARY KEY (term, doc_id, memory_group)
);
CREATE INDEX IF NOT EXISTS idx_keyword_terms_term ON keyword_terms(term, memory_group);

CREATE TABLE IF NOT EXISTS keyword_docs (
    doc_id TEXT PRIMARY KEY,
    memory_group TEXT NOT NULL,
    doc_length INTEGER NOT NULL
);
"#;
