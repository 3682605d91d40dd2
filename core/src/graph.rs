//! file: core/src/graph.rs
//! description: execution graph derived from a validated pipeline.
//!
//! The graph is a DAG of node records addressed by stable indices; edges are
//! id lists on the nodes. It is built once from the pipeline and mutated only
//! by the executor to record status and outputs.

use crate::pipeline::Pipeline;
use crate::types::ResultStatus;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct ExecutionNode {
    pub id: usize,
    pub stage_idx: usize,
    pub element_idx: usize,

    pub target: String,
    pub plugin_hint: Option<String>,
    /// Explicit extension from the element spec.
    pub extension: Option<String>,
    pub options: BTreeMap<String, String>,
    pub raw_options: Vec<String>,

    /// Input path; set at build time for root nodes, resolved from the
    /// predecessor at execution time otherwise.
    pub input: PathBuf,
    pub temp_output: PathBuf,
    pub final_output: PathBuf,

    pub plugin_used: String,
    pub status: Option<ResultStatus>,
    pub error: Option<String>,
    pub duration_ms: u64,

    pub input_nodes: Vec<usize>,
    pub output_nodes: Vec<usize>,

    pub is_tee: bool,
    pub is_collect: bool,
    pub is_clipboard: bool,
    pub is_passthrough: bool,

    /// Populated at runtime when the plugin returned multiple files.
    pub scatter_outputs: Vec<PathBuf>,
    /// Preferred display names for scattered outputs, parallel to
    /// `scatter_outputs`; collect uses them instead of the temp file names.
    pub scatter_names: Vec<String>,
    /// Populated by the executor for collect nodes, in predecessor order.
    pub collect_inputs: Vec<PathBuf>,

    pub executed: bool,
    pub content_copied_to_clipboard: bool,
}

impl ExecutionNode {
    pub fn is_builtin(&self) -> bool {
        self.is_tee || self.is_collect || self.is_clipboard || self.is_passthrough
    }

    pub fn is_terminal(&self) -> bool {
        self.output_nodes.is_empty()
    }

    /// Only conversion nodes produce new files; the builtins replicate,
    /// gather or consume existing ones.
    pub fn has_file_output(&self) -> bool {
        !self.is_builtin()
    }
}

#[derive(Debug, Default)]
pub struct ExecutionGraph {
    nodes: Vec<ExecutionNode>,
    source: PathBuf,
}

impl ExecutionGraph {
    /// Build the graph by walking the stage list with a running list of the
    /// previous stage's logical outputs.
    pub fn build_from_pipeline(pipeline: &Pipeline) -> ExecutionGraph {
        let mut graph = ExecutionGraph { nodes: Vec::new(), source: pipeline.source.clone() };

        let mut prev_outputs: Vec<usize> = Vec::new();

        for (stage_idx, stage) in pipeline.stages.iter().enumerate() {
            let mut current_outputs: Vec<usize> = Vec::new();

            if stage.has_tee() {
                let tee_id = graph.add_node();
                {
                    let node = &mut graph.nodes[tee_id];
                    node.stage_idx = stage_idx;
                    node.target = crate::pipeline::TEE_TARGET.to_string();
                    node.is_tee = true;
                    node.options = stage.elements[0].options.clone();
                    node.raw_options = stage.elements[0].raw_options.clone();
                }
                if prev_outputs.is_empty() {
                    graph.nodes[tee_id].input = graph.source.clone();
                } else {
                    graph.connect(&prev_outputs, tee_id);
                }

                // The tee's logical outputs are itself, replicated once per
                // element of the next stage.
                let replicas = pipeline
                    .stages
                    .get(stage_idx + 1)
                    .map(|next| next.cardinality())
                    .unwrap_or(1);
                for _ in 0..replicas {
                    current_outputs.push(tee_id);
                }
                prev_outputs = current_outputs;
                continue;
            }

            if stage.has_collect() {
                let collect_id = graph.add_node();
                {
                    let node = &mut graph.nodes[collect_id];
                    node.stage_idx = stage_idx;
                    node.target = crate::pipeline::COLLECT_TARGET.to_string();
                    node.is_collect = true;
                    node.options = stage.elements[0].options.clone();
                    node.raw_options = stage.elements[0].raw_options.clone();
                }
                if prev_outputs.is_empty() {
                    graph.nodes[collect_id].input = graph.source.clone();
                } else {
                    graph.connect(&prev_outputs, collect_id);
                }
                current_outputs.push(collect_id);
                prev_outputs = current_outputs;
                continue;
            }

            for (elem_idx, element) in stage.elements.iter().enumerate() {
                let node_id = graph.add_node();
                {
                    let node = &mut graph.nodes[node_id];
                    node.stage_idx = stage_idx;
                    node.element_idx = elem_idx;
                    node.target = element.target.clone();
                    node.plugin_hint = element.plugin.clone();
                    node.extension = element.extension.clone();
                    node.options = element.options.clone();
                    node.raw_options = element.raw_options.clone();
                    node.is_clipboard = element.is_clipboard();
                    node.is_passthrough = element.is_passthrough();
                }

                if prev_outputs.is_empty() {
                    graph.nodes[node_id].input = graph.source.clone();
                } else if let Some(&prev_id) = prev_outputs.get(elem_idx) {
                    graph.connect(&[prev_id], node_id);
                }

                current_outputs.push(node_id);
            }

            prev_outputs = current_outputs;
        }

        graph
    }

    fn add_node(&mut self) -> usize {
        let id = self.nodes.len();
        self.nodes.push(ExecutionNode { id, ..Default::default() });
        id
    }

    fn connect(&mut self, predecessors: &[usize], successor: usize) {
        for &prev_id in predecessors {
            self.nodes[successor].input_nodes.push(prev_id);
            // A tee appears once per replica in prev_outputs; only one edge
            // per distinct predecessor pair.
            if !self.nodes[prev_id].output_nodes.contains(&successor) {
                self.nodes[prev_id].output_nodes.push(successor);
            }
        }
    }

    pub fn source(&self) -> &PathBuf {
        &self.source
    }

    pub fn nodes(&self) -> &[ExecutionNode] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &ExecutionNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: usize) -> &mut ExecutionNode {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn terminal_nodes(&self) -> Vec<usize> {
        self.nodes.iter().filter(|n| n.is_terminal()).map(|n| n.id).collect()
    }

    pub fn file_producing_nodes(&self) -> Vec<usize> {
        self.nodes.iter().filter(|n| n.has_file_output()).map(|n| n.id).collect()
    }

    /// Kahn's algorithm over the edge lists. Dedupe of multi-edges (a tee
    /// replica contributes several input entries) happens via the in-degree
    /// count being derived from input_nodes length.
    pub fn execution_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.input_nodes.len()).collect();
        let mut ready: VecDeque<usize> = self
            .nodes
            .iter()
            .filter(|n| n.input_nodes.is_empty())
            .map(|n| n.id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(current) = ready.pop_front() {
            order.push(current);
            for &consumer in &self.nodes[current].output_nodes {
                let repeats = self.nodes[consumer]
                    .input_nodes
                    .iter()
                    .filter(|&&p| p == current)
                    .count();
                in_degree[consumer] = in_degree[consumer].saturating_sub(repeats);
                if in_degree[consumer] == 0 {
                    ready.push_back(consumer);
                }
            }
        }

        order
    }

    /// A node is effectively terminal when every descendant along
    /// passthrough chains is terminal; any non-passthrough consumer makes
    /// it intermediate.
    pub fn is_effectively_terminal(&self, node_id: usize) -> bool {
        let node = &self.nodes[node_id];
        if node.output_nodes.is_empty() {
            return true;
        }
        node.output_nodes.iter().all(|&consumer_id| {
            let consumer = &self.nodes[consumer_id];
            consumer.is_passthrough && self.is_effectively_terminal(consumer_id)
        })
    }

    /// Every terminal descendant along non-passthrough edges is a clipboard
    /// node.
    pub fn is_effectively_only_consumed_by_clipboard(&self, node_id: usize) -> bool {
        let node = &self.nodes[node_id];
        if node.output_nodes.is_empty() {
            return false;
        }
        node.output_nodes.iter().all(|&consumer_id| {
            let consumer = &self.nodes[consumer_id];
            if consumer.is_clipboard {
                true
            } else if consumer.is_passthrough {
                self.is_effectively_only_consumed_by_clipboard(consumer_id)
            } else {
                false
            }
        })
    }

    /// Did any clipboard consumer of this node actually copy content?
    pub fn was_content_copied_to_clipboard(&self, node_id: usize) -> bool {
        self.nodes[node_id].output_nodes.iter().any(|&consumer_id| {
            let consumer = &self.nodes[consumer_id];
            (consumer.is_clipboard && consumer.content_copied_to_clipboard)
                || (consumer.is_passthrough && self.was_content_copied_to_clipboard(consumer_id))
        })
    }

    /// Does any clipboard consumer carry the `--save` option?
    pub fn clipboard_consumer_has_save(&self, node_id: usize) -> bool {
        self.nodes[node_id].output_nodes.iter().any(|&consumer_id| {
            let consumer = &self.nodes[consumer_id];
            if consumer.is_clipboard {
                match consumer.options.get("save") {
                    Some(v) => v.is_empty() || v == "true" || v == "1",
                    None => false,
                }
            } else if consumer.is_passthrough {
                self.clipboard_consumer_has_save(consumer_id)
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    fn graph_of(expr: &str) -> ExecutionGraph {
        let mut pipeline = parse_expression(expr).unwrap();
        pipeline.source = PathBuf::from("photo.heic");
        pipeline.validate().unwrap();
        ExecutionGraph::build_from_pipeline(&pipeline)
    }

    #[test]
    fn one_node_per_element_plus_builtin_stages() {
        // tee(1) + 2 conversions + collect(1)
        let graph = graph_of("tee | jpg, png | collect");
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.file_producing_nodes().len(), 2);
    }

    #[test]
    fn tee_feeds_every_next_element() {
        let graph = graph_of("tee | jpg, png");
        let tee = &graph.nodes()[0];
        assert!(tee.is_tee);
        assert_eq!(tee.output_nodes.len(), 2);
        assert_eq!(graph.node(1).input_nodes, vec![0]);
        assert_eq!(graph.node(2).input_nodes, vec![0]);
    }

    #[test]
    fn collect_consumes_every_predecessor_in_order() {
        let graph = graph_of("tee | jpg, png, webp | collect");
        let collect = graph.nodes().last().unwrap();
        assert!(collect.is_collect);
        assert_eq!(collect.input_nodes, vec![1, 2, 3]);
    }

    #[test]
    fn topological_order_exists_and_respects_edges() {
        let graph = graph_of("tee | jpg, png | collect | pdf");
        let order = graph.execution_order();
        assert_eq!(order.len(), graph.len());
        let position: Vec<usize> = {
            let mut pos = vec![0; order.len()];
            for (i, &id) in order.iter().enumerate() {
                pos[id] = i;
            }
            pos
        };
        for node in graph.nodes() {
            for &consumer in &node.output_nodes {
                assert!(position[node.id] < position[consumer]);
            }
        }
    }

    #[test]
    fn effectively_terminal_walks_passthrough_chains() {
        let graph = graph_of("jpg | _ | pass");
        assert!(graph.is_effectively_terminal(0));
        let graph = graph_of("jpg | webp");
        assert!(!graph.is_effectively_terminal(0));
        assert!(graph.is_effectively_terminal(1));
    }

    #[test]
    fn clipboard_only_consumption_sees_through_passthrough() {
        let graph = graph_of("jpg | _ | clipboard");
        assert!(graph.is_effectively_only_consumed_by_clipboard(0));
        let graph = graph_of("tee | clipboard, webp");
        assert!(!graph.is_effectively_only_consumed_by_clipboard(0));
    }

    #[test]
    fn clipboard_save_option_is_visible_to_the_producer() {
        let graph = graph_of("jpg | clipboard --save");
        assert!(graph.clipboard_consumer_has_save(0));
        let graph = graph_of("jpg | clipboard");
        assert!(!graph.clipboard_consumer_has_save(0));
    }

    #[test]
    fn first_stage_reads_the_source() {
        let graph = graph_of("jpg");
        assert_eq!(graph.node(0).input, PathBuf::from("photo.heic"));
    }
}
