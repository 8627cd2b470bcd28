//! Query Engine: composes graph/chunk/summary retrieval primitives into the
//! eleven `QueryType` strategies, synthesizing an answer via the chat provider where
//! the strategy calls for one, with an optional word-streamed variant.

use cuber_types::{
    consume_limit, CubeStorage, ChatProvider, Embedder, FtsLayer, GraphNode, PermissionGrant,
    QueryError, QueryRequest, QueryResponse, QueryType, TokenUsage, Triple,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::render::render_triples;

const FTS_STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "on", "is", "are", "was", "were", "for",
];

fn tokenize_for_fts(text: &str, _layer: FtsLayer) -> Vec<String> {
    // No POS tagger is in scope, so every `FtsLayer` variant expands using the same
    // content-word heuristic; see the design notes on this tradeoff.
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 2 && !FTS_STOPWORDS.contains(&w.as_str()))
        .collect()
}

const CHUNK_TABLE: &str = "chunk";
const ENTITY_TABLE: &str = "entity";
const SUMMARY_TABLE: &str = "summary";

const SYNTHESIS_SYSTEM_PROMPT: &str =
    "Answer the question using only the context provided below. If the context is \
insufficient to answer, say so plainly rather than guessing.";

pub struct QueryEngine<S, E: ?Sized, C: ?Sized> {
    storage: Arc<S>,
    embedder: Arc<E>,
    chat: Arc<C>,
}

impl<S, E: ?Sized, C: ?Sized> Clone for QueryEngine<S, E, C> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            embedder: Arc::clone(&self.embedder),
            chat: Arc::clone(&self.chat),
        }
    }
}

impl<S, E, C> QueryEngine<S, E, C>
where
    S: CubeStorage + 'static,
    E: Embedder + ?Sized + 'static,
    C: ChatProvider + ?Sized + 'static,
{
    pub fn new(storage: Arc<S>, embedder: Arc<E>, chat: Arc<C>) -> Self {
        Self {
            storage,
            embedder,
            chat,
        }
    }

    pub async fn execute(
        &self,
        req: &QueryRequest,
        permissions: &PermissionGrant,
    ) -> Result<QueryResponse, QueryError> {
        self.execute_cancellable(req, permissions, &CancellationToken::new()).await
    }

    /// Same as [`Self::execute`], but aborts the chat-provider call (rather than only
    /// discarding its result) as soon as `cancel` fires.
    async fn execute_cancellable(
        &self,
        req: &QueryRequest,
        permissions: &PermissionGrant,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse, QueryError> {
        if permissions.query_limit < 0 {
            return Err(QueryError::Permission("query_limit is exhausted".to_string()));
        }
        if !permissions.allows_query_type(req.query_type) {
            return Err(QueryError::Permission(format!(
                "query type {:?} is not permitted for this grant",
                req.query_type
            )));
        }

        let mut usage = TokenUsage::default();
        let mut response = QueryResponse::default();

        let entity_ids = if req.query_type.uses_graph() {
            Some(self.search_entities(req, &mut usage).await?)
        } else {
            None
        };

        let triples = match &entity_ids {
            Some(ids) => Some(self.graph_pull(ids, req).await?),
            None => None,
        };

        if req.query_type.uses_chunks() {
            response.chunks = Some(self.search_chunks(req, &mut usage).await?);
        }
        if req.query_type.uses_summaries() {
            response.summaries = Some(self.search_summaries(req, &mut usage).await?);
        }

        let rendering = triples.as_ref().map(|t| render_triples(t, req.is_en));

        match req.query_type {
            QueryType::GetGraph
            | QueryType::GraphAndChunks
            | QueryType::GraphAndSummaries
            | QueryType::GraphAndChunksAndSummaries => {
                response.graph = triples;
            }
            QueryType::GraphExplanation => {
                response.graph_explanation = rendering.clone();
                response.graph = triples;
            }
            QueryType::GraphSummary => {
                let (answer, delta) = self
                    .summarize_graph(&rendering.unwrap_or_default(), req, false, cancel)
                    .await?;
                usage.add(delta);
                response.answer = Some(answer);
            }
            QueryType::GraphSummaryToAnswer => {
                let (answer, delta) = self
                    .summarize_graph(&rendering.unwrap_or_default(), req, true, cancel)
                    .await?;
                usage.add(delta);
                response.answer = Some(answer);
            }
            QueryType::AnswerBySummariesAndGraphSummary => {
                let (graph_summary, delta1) = self
                    .summarize_graph(&rendering.unwrap_or_default(), req, true, cancel)
                    .await?;
                usage.add(delta1);
                let (answer, delta2) = self
                    .compose_answer(req, response.summaries.as_deref(), None, Some(&graph_summary), cancel)
                    .await?;
                usage.add(delta2);
                response.answer = Some(answer);
            }
            QueryType::AnswerByChunksAndGraphSummary => {
                let (graph_summary, delta1) = self
                    .summarize_graph(&rendering.unwrap_or_default(), req, true, cancel)
                    .await?;
                usage.add(delta1);
                let (answer, delta2) = self
                    .compose_answer(req, None, response.chunks.as_deref(), Some(&graph_summary), cancel)
                    .await?;
                usage.add(delta2);
                response.answer = Some(answer);
            }
            QueryType::GetChunks | QueryType::GetPreMadeSummaries => {}
        }

        response.input_tokens = usage.input_tokens;
        response.output_tokens = usage.output_tokens;
        response.remaining_query_limit = consume_limit(permissions.query_limit).map(|c| c.remaining);
        Ok(response)
    }

    /// Run `execute` and forward the synthesized answer one word at a time. If `cancel`
    /// fires while the chat provider call is in flight, that call is aborted and the
    /// stream closes without ever emitting a word; if it fires after the answer is in
    /// hand, emission stops mid-stream instead.
    ///
    /// `report_to`, if given, receives the full [`QueryResponse`] (usage and
    /// `remaining_query_limit` included) as soon as `execute` itself returns, before any
    /// word is forwarded — callers that must persist a decremented limit do not have to
    /// wait for the caller to drain the whole stream first.
    pub fn execute_streaming(
        &self,
        req: QueryRequest,
        permissions: PermissionGrant,
        cancel: CancellationToken,
        report_to: Option<tokio::sync::oneshot::Sender<Result<QueryResponse, QueryError>>>,
    ) -> ReceiverStream<Result<String, QueryError>> {
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let engine = self.clone();
        let cancel_for_call = cancel.clone();
        tokio::spawn(async move {
            let outcome = engine.execute_cancellable(&req, &permissions, &cancel_for_call).await;
            let to_stream = match &outcome {
                Ok(response) => Ok(response.answer.clone().unwrap_or_default()),
                Err(err) => Err(err.to_string()),
            };
            if let Some(report_to) = report_to {
                let _ = report_to.send(outcome);
            }
            match to_stream {
                Ok(answer) => {
                    for word in answer.split_whitespace() {
                        if cancel.is_cancelled() {
                            return;
                        }
                        if tx.send(Ok(word.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                Err(message) => {
                    let _ = tx.send(Err(QueryError::Validation(message))).await;
                }
            }
        });
        ReceiverStream::new(rx)
    }

    async fn search_entities(
        &self,
        req: &QueryRequest,
        usage: &mut TokenUsage,
    ) -> Result<Vec<String>, QueryError> {
        let (vector, delta) = self.embedder.embed(&req.text).await?;
        usage.add(delta);
        let hits = self
            .storage
            .query(ENTITY_TABLE, &vector, req.entity_topk, &req.memory_group)
            .await?;
        let mut ids: Vec<String> = hits.into_iter().map(|h| h.id).collect();

        if let Some(layer) = req.fts_layer {
            if req.fts_topk > 0 {
                let mut seen: HashSet<String> = ids.iter().cloned().collect();
                for term in tokenize_for_fts(&req.text, layer) {
                    let fts_hits = self
                        .storage
                        .search(&term, req.fts_topk, &req.memory_group)
                        .await?;
                    for (id, _score) in fts_hits {
                        if seen.insert(id.clone()) {
                            ids.push(id);
                        }
                    }
                }
            }
        }
        Ok(ids)
    }

    async fn graph_pull(&self, ids: &[String], req: &QueryRequest) -> Result<Vec<Triple>, QueryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut triples = self.storage.get_triples(ids, &req.memory_group).await?;
        triples.retain(|t| t.edge.survival_score() >= req.thickness_threshold);
        triples.sort_by(|a, b| {
            b.edge
                .survival_score()
                .partial_cmp(&a.edge.survival_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(triples)
    }

    async fn search_chunks(
        &self,
        req: &QueryRequest,
        usage: &mut TokenUsage,
    ) -> Result<Vec<cuber_types::Chunk>, QueryError> {
        let (vector, delta) = self.embedder.embed(&req.text).await?;
        usage.add(delta);
        let hits = self
            .storage
            .query(CHUNK_TABLE, &vector, req.chunk_topk, &req.memory_group)
            .await?;
        let ids: Vec<String> = hits.into_iter().map(|h| h.id).collect();
        Ok(self.storage.get_chunks_by_ids(&ids, &req.memory_group).await?)
    }

    async fn search_summaries(
        &self,
        req: &QueryRequest,
        usage: &mut TokenUsage,
    ) -> Result<Vec<GraphNode>, QueryError> {
        let (vector, delta) = self.embedder.embed(&req.text).await?;
        usage.add(delta);
        let hits = self
            .storage
            .query(SUMMARY_TABLE, &vector, req.summary_topk, &req.memory_group)
            .await?;
        let mut summaries = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(node) = self.storage.get_node(&hit.id, &req.memory_group).await? {
                summaries.push(node);
            }
        }
        Ok(summaries)
    }

    async fn summarize_graph(
        &self,
        rendering: &str,
        req: &QueryRequest,
        steer_to_question: bool,
        cancel: &CancellationToken,
    ) -> Result<(String, TokenUsage), QueryError> {
        let system_prompt = if steer_to_question {
            "Summarize the knowledge graph connections below as context for answering the \
             question that follows. Be concise."
        } else {
            "Summarize the knowledge graph connections below in a few sentences."
        };
        let user_prompt = if steer_to_question {
            format!("Question: {}\n\nGraph connections:\n{}", req.text, rendering)
        } else {
            rendering.to_string()
        };
        Ok(self.chat.generate(system_prompt, &user_prompt, cancel).await?)
    }

    async fn compose_answer(
        &self,
        req: &QueryRequest,
        summaries: Option<&[GraphNode]>,
        chunks: Option<&[cuber_types::Chunk]>,
        graph_summary: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(String, TokenUsage), QueryError> {
        let mut sections = Vec::new();
        if let Some(chunks) = chunks.filter(|c| !c.is_empty()) {
            let body = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n\n");
            sections.push(format!("### Relevant Text Chunks\n{body}"));
        }
        if let Some(summaries) = summaries.filter(|s| !s.is_empty()) {
            let body = summaries.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join("\n");
            sections.push(format!("### Summaries\n{body}"));
        }
        if let Some(graph_summary) = graph_summary.filter(|g| !g.is_empty()) {
            sections.push(format!("### Knowledge Graph Connections\n{graph_summary}"));
        }
        let context = if sections.is_empty() {
            "No relevant context was found.".to_string()
        } else {
            sections.join("\n\n")
        };
        let user_prompt = format!("Question: {}\n\n{}", req.text, context);
        Ok(self.chat.generate(SYNTHESIS_SYSTEM_PROMPT, &user_prompt, cancel).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cuber_provider::mock::{MockChatProvider, MockEmbedder};
    use cuber_sqlite::SqliteStore;
    use cuber_types::{GraphEdge, NodeType};
    use futures::StreamExt;
    use std::collections::HashMap;

    async fn seeded_engine() -> (QueryEngine<SqliteStore, MockEmbedder, MockChatProvider>, String) {
        let storage = SqliteStore::open_in_memory(4).unwrap();
        let embedder = MockEmbedder::new(4);
        let now = Utc::now().to_rfc3339();

        let alpha = GraphNode {
            id: "alpha::g".into(),
            memory_group: "g".into(),
            node_type: NodeType::Entity,
            name: "Alpha".into(),
            properties: HashMap::new(),
            embedding: vec![],
            created_at: now.clone(),
        };
        let beta = GraphNode {
            id: "beta::g".into(),
            memory_group: "g".into(),
            node_type: NodeType::Entity,
            name: "Beta".into(),
            properties: HashMap::new(),
            embedding: vec![],
            created_at: now.clone(),
        };
        storage.add_nodes(&[alpha.clone(), beta.clone()]).await.unwrap();
        storage
            .add_edges(&[GraphEdge {
                source: "alpha::g".into(),
                target: "beta::g".into(),
                edge_type: "ORBITS".into(),
                memory_group: "g".into(),
                properties: HashMap::new(),
                weight: 1.0,
                confidence: 1.0,
                created_at: now,
            }])
            .await
            .unwrap();

        let (vector, _) = embedder.embed("Alpha").await.unwrap();
        storage
            .save_embedding("entity", "alpha::g", "Alpha", &vector, "g")
            .await
            .unwrap();

        let chat = MockChatProvider::new("Alpha orbits Beta.");
        (
            QueryEngine::new(Arc::new(storage), Arc::new(embedder), Arc::new(chat)),
            "alpha::g".to_string(),
        )
    }

    #[tokio::test]
    async fn get_graph_returns_triples_above_threshold() {
        let (engine, _) = seeded_engine().await;
        let req = QueryRequest {
            memory_group: "g".into(),
            text: "Alpha".into(),
            query_type: QueryType::GetGraph,
            summary_topk: 5,
            chunk_topk: 5,
            entity_topk: 5,
            fts_layer: None,
            fts_topk: 0,
            thickness_threshold: 0.3,
            conflict_resolution_stage: 0,
            is_en: true,
            chat_model_id: "mock".into(),
            stream: false,
        };
        let response = engine.execute(&req, &PermissionGrant::default()).await.unwrap();
        assert!(response.graph.unwrap().len() >= 1);
    }

    #[tokio::test]
    async fn forbidden_query_type_is_rejected() {
        let (engine, _) = seeded_engine().await;
        let mut permissions = PermissionGrant::default();
        permissions.allowed_query_types = vec![QueryType::GetChunks];
        let req = QueryRequest {
            memory_group: "g".into(),
            text: "Alpha".into(),
            query_type: QueryType::GetGraph,
            summary_topk: 5,
            chunk_topk: 5,
            entity_topk: 5,
            fts_layer: None,
            fts_topk: 0,
            thickness_threshold: 0.3,
            conflict_resolution_stage: 0,
            is_en: true,
            chat_model_id: "mock".into(),
            stream: false,
        };
        let err = engine.execute(&req, &permissions).await.unwrap_err();
        assert!(matches!(err, QueryError::Permission(_)));
    }

    #[tokio::test]
    async fn exhausted_query_limit_is_rejected() {
        let (engine, _) = seeded_engine().await;
        let mut permissions = PermissionGrant::default();
        permissions.query_limit = -1;
        let req = QueryRequest {
            memory_group: "g".into(),
            text: "Alpha".into(),
            query_type: QueryType::GetGraph,
            summary_topk: 5,
            chunk_topk: 5,
            entity_topk: 5,
            fts_layer: None,
            fts_topk: 0,
            thickness_threshold: 0.3,
            conflict_resolution_stage: 0,
            is_en: true,
            chat_model_id: "mock".into(),
            stream: false,
        };
        let err = engine.execute(&req, &permissions).await.unwrap_err();
        assert!(matches!(err, QueryError::Permission(_)));
    }

    #[tokio::test]
    async fn graph_summary_to_answer_synthesizes_via_chat() {
        let (engine, _) = seeded_engine().await;
        let req = QueryRequest {
            memory_group: "g".into(),
            text: "How are Alpha and Beta related?".into(),
            query_type: QueryType::GraphSummaryToAnswer,
            summary_topk: 5,
            chunk_topk: 5,
            entity_topk: 5,
            fts_layer: None,
            fts_topk: 0,
            thickness_threshold: 0.3,
            conflict_resolution_stage: 0,
            is_en: true,
            chat_model_id: "mock".into(),
            stream: false,
        };
        let response = engine.execute(&req, &PermissionGrant::default()).await.unwrap();
        assert!(response.answer.is_some());
        assert!(response.output_tokens > 0);
    }

    #[tokio::test]
    async fn cancelling_before_the_provider_call_aborts_it_without_emitting_a_word() {
        let (engine, _) = seeded_engine().await;
        let req = QueryRequest {
            memory_group: "g".into(),
            text: "How are Alpha and Beta related?".into(),
            query_type: QueryType::GraphSummaryToAnswer,
            summary_topk: 5,
            chunk_topk: 5,
            entity_topk: 5,
            fts_layer: None,
            fts_topk: 0,
            thickness_threshold: 0.3,
            conflict_resolution_stage: 0,
            is_en: true,
            chat_model_id: "mock".into(),
            stream: true,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (report_tx, report_rx) = tokio::sync::oneshot::channel();
        let mut stream =
            engine.execute_streaming(req, PermissionGrant::default(), cancel, Some(report_tx));

        let first = stream.next().await.expect("stream reports the abort, then closes");
        assert!(first.is_err(), "no word should be emitted once cancelled");
        assert!(stream.next().await.is_none());

        let reported = report_rx.await.unwrap();
        let err = reported.unwrap_err();
        assert!(matches!(err, QueryError::Provider(_)));
    }
}
