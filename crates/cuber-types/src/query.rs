//! Query Engine request/response types and the eleven retrieval strategies.

use serde::{Deserialize, Serialize};

/// The eleven query strategies the Query Engine composes retrieval primitives into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    GetGraph,
    GetChunks,
    GetPreMadeSummaries,
    GraphAndChunks,
    GraphAndSummaries,
    GraphAndChunksAndSummaries,
    GraphExplanation,
    GraphSummary,
    GraphSummaryToAnswer,
    AnswerBySummariesAndGraphSummary,
    AnswerByChunksAndGraphSummary,
}

impl QueryType {
    pub fn uses_graph(&self) -> bool {
        !matches!(self, QueryType::GetChunks | QueryType::GetPreMadeSummaries)
    }

    pub fn uses_chunks(&self) -> bool {
        matches!(
            self,
            QueryType::GetChunks
                | QueryType::GraphAndChunks
                | QueryType::GraphAndChunksAndSummaries
                | QueryType::AnswerByChunksAndGraphSummary
        )
    }

    pub fn uses_summaries(&self) -> bool {
        matches!(
            self,
            QueryType::GetPreMadeSummaries
                | QueryType::GraphAndSummaries
                | QueryType::GraphAndChunksAndSummaries
                | QueryType::AnswerBySummariesAndGraphSummary
        )
    }

    /// Whether the query type must invoke the chat provider to synthesize an answer.
    pub fn requires_answer_synthesis(&self) -> bool {
        matches!(
            self,
            QueryType::GraphSummary
                | QueryType::GraphSummaryToAnswer
                | QueryType::AnswerBySummariesAndGraphSummary
                | QueryType::AnswerByChunksAndGraphSummary
        )
    }
}

/// Which content-word layer FTS expansion considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FtsLayer {
    Nouns,
    NounsAndVerbs,
    All,
}

/// Parameters for one Query Engine call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub memory_group: String,
    pub text: String,
    pub query_type: QueryType,
    #[serde(default = "default_topk")]
    pub summary_topk: usize,
    #[serde(default = "default_topk")]
    pub chunk_topk: usize,
    #[serde(default = "default_topk")]
    pub entity_topk: usize,
    #[serde(default)]
    pub fts_layer: Option<FtsLayer>,
    #[serde(default)]
    pub fts_topk: usize,
    #[serde(default = "default_thickness")]
    pub thickness_threshold: f32,
    #[serde(default)]
    pub conflict_resolution_stage: u8,
    #[serde(default = "default_true")]
    pub is_en: bool,
    pub chat_model_id: String,
    #[serde(default)]
    pub stream: bool,
}

fn default_topk() -> usize {
    5
}

fn default_thickness() -> f32 {
    0.3
}

fn default_true() -> bool {
    true
}

/// Result of a Query Engine call; which fields are populated depends on `query_type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<crate::Chunk>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summaries: Option<Vec<crate::GraphNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<Vec<crate::Triple>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_explanation: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Remaining `query_limit` after this call, if the grant is not unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_query_limit: Option<i64>,
}
