//! Deterministic natural-language rendering of graph triples, English or Japanese.
//! Used both for Absorb's extraction log and the GRAPH_EXPLANATION query type.

use cuber_types::{GraphNode, Triple};

fn humanize_edge_type(edge_type: &str, is_en: bool) -> String {
    if is_en {
        edge_type.replace(['_', '-'], " ").to_lowercase()
    } else {
        edge_type.to_string()
    }
}

fn node_label(node: &GraphNode) -> &str {
    if node.name.is_empty() {
        &node.id
    } else {
        &node.name
    }
}

/// Render one triple as a single sentence.
pub fn render_triple(triple: &Triple, is_en: bool) -> String {
    let relation = humanize_edge_type(&triple.edge.edge_type, is_en);
    if is_en {
        format!(
            "{} {} {}.",
            node_label(&triple.source),
            relation,
            node_label(&triple.target)
        )
    } else {
        format!(
            "{}は{}と「{}」の関係にあります。",
            node_label(&triple.source),
            node_label(&triple.target),
            relation
        )
    }
}

/// Fold a set of triples into one rendered passage, one sentence per triple, in
/// input order (callers sort by survival score beforehand if a ranking is wanted).
pub fn render_triples(triples: &[Triple], is_en: bool) -> String {
    if triples.is_empty() {
        return if is_en {
            "No relevant graph connections were found.".to_string()
        } else {
            "関連するグラフの関係は見つかりませんでした。".to_string()
        };
    }
    triples
        .iter()
        .map(|t| render_triple(t, is_en))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cuber_types::{GraphEdge, NodeType};
    use std::collections::HashMap;

    fn node(id: &str, name: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            memory_group: "g".into(),
            node_type: NodeType::Entity,
            name: name.to_string(),
            properties: HashMap::new(),
            embedding: vec![],
            created_at: Utc::now().to_rfc3339(),
        }
    }

    fn edge(edge_type: &str) -> GraphEdge {
        GraphEdge {
            source: "a::g".into(),
            target: "b::g".into(),
            edge_type: edge_type.to_string(),
            memory_group: "g".into(),
            properties: HashMap::new(),
            weight: 1.0,
            confidence: 1.0,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn english_template_humanizes_the_edge_type() {
        let triple = Triple {
            source: node("a::g", "Alpha"),
            edge: edge("TREATS_DISEASE"),
            target: node("b::g", "Headache"),
        };
        assert_eq!(render_triple(&triple, true), "Alpha treats disease Headache.");
    }

    #[test]
    fn empty_triples_render_a_no_context_marker() {
        assert!(render_triples(&[], true).contains("No relevant"));
        assert!(render_triples(&[], false).contains("見つかりません"));
    }
}
