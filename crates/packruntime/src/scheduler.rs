use crate::fanin::aggregate_input;
use crate::registry::ExecutorRegistry;
use crate::report::{ExecutionReport, NodeReport};
use chrono::Utc;
use packcore::validate::validate_graph;
use packcore::{
    Connection, CounterRegistry, EventBus, ExecutionEvent, ExecutionId, FanIn, Graph, GraphError,
    NodeContext, NodeInput, NodeSpec, RunOptions, Services,
};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Everything a run borrows from its owner besides the graph itself.
/// `counters` holds the sequences carried between runs; each run works on
/// its own copy and writes it back when it completes.
#[derive(Clone)]
pub struct RunEnvironment {
    pub services: Arc<Services>,
    pub counters: Arc<Mutex<CounterRegistry>>,
    pub event_bus: Arc<EventBus>,
    pub cancellation: CancellationToken,
}

/// Runs graphs node by node from a FIFO ready-queue.
#[derive(Debug, Default)]
pub struct GraphScheduler;

impl GraphScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Execute `graph` to completion. Node failures stay inside the report;
    /// structural problems abort the run before any node executes.
    pub async fn execute(
        &self,
        graph: &Graph,
        registry: &ExecutorRegistry,
        env: &RunEnvironment,
        options: RunOptions,
    ) -> ExecutionReport {
        let execution_id = ExecutionId::new_v4();
        let start_time = Instant::now();
        let mut report = ExecutionReport::new(execution_id);

        env.event_bus.emit(ExecutionEvent::RunStarted {
            execution_id,
            node_count: graph.nodes.len(),
            timestamp: Utc::now(),
        });
        tracing::info!("Starting graph run {} ({} nodes)", execution_id, graph.nodes.len());

        if let Err(e) = self.check_structure(graph, &options) {
            tracing::error!("Run {} aborted: {}", execution_id, e);
            env.event_bus.emit(ExecutionEvent::RunAborted {
                execution_id,
                error: e.to_string(),
                timestamp: Utc::now(),
            });
            report.error = Some(e.to_string());
            report.skipped = graph.nodes.iter().map(|n| n.id.clone()).collect();
            report.finalize();
            return report;
        }

        // Runs that draw counters hold the shared sequences until they finish,
        // so a concurrent reset cannot rewind them mid-run.
        let draws_counters = graph.nodes.iter().any(|n| n.kind.draws_counters());
        let mut counter_lease = None;
        if draws_counters || options.reset_counters {
            let mut shared = env.counters.clone().lock_owned().await;
            if options.reset_counters {
                shared.reset();
            }
            if draws_counters {
                counter_lease = Some(shared);
            }
        }
        let run_counters = counter_lease
            .as_deref()
            .cloned()
            .unwrap_or_default();
        let env = &RunEnvironment {
            counters: Arc::new(Mutex::new(run_counters)),
            ..env.clone()
        };

        let options = Arc::new(options);
        let incoming = graph.incoming();
        let outgoing = graph.outgoing();
        let mut queue: VecDeque<(&NodeSpec, NodeInput)> = VecDeque::new();
        let mut queued: HashSet<&str> = HashSet::new();

        for node in graph.starting_nodes() {
            queued.insert(node.id.as_str());
            queue.push_back((node, NodeInput::None));
        }

        let mut sequence = 0;
        while let Some((node, input)) = queue.pop_front() {
            if env.cancellation.is_cancelled() {
                tracing::warn!("Run {} cancelled", execution_id);
                report.error = Some(GraphError::Cancelled.to_string());
                break;
            }
            if report.per_node.contains_key(&node.id) {
                continue;
            }

            let result = self
                .run_node(node, input, registry, env, &options, execution_id, sequence)
                .await;
            sequence += 1;
            report.per_node.insert(node.id.clone(), result);

            // A settled node may complete the dependency set of its targets.
            for conn in outgoing.get(node.id.as_str()).into_iter().flatten() {
                let target_id = conn.target_id.as_str();
                if report.per_node.contains_key(target_id) || queued.contains(target_id) {
                    continue;
                }
                let Some(target) = graph.find_node(target_id) else {
                    continue;
                };
                let target_incoming: &[&Connection] =
                    incoming.get(target_id).map(Vec::as_slice).unwrap_or_default();
                if is_ready(target, target_incoming, &report.per_node) {
                    let input = aggregate_input(target, target_incoming, &report.per_node);
                    queued.insert(target_id);
                    queue.push_back((target, input));
                }
            }
        }

        for node in &graph.nodes {
            if !report.per_node.contains_key(&node.id) {
                tracing::debug!("Node {} ({}) skipped", node.id, node.kind);
                env.event_bus.emit(ExecutionEvent::NodeSkipped {
                    execution_id,
                    node_id: node.id.clone(),
                    kind: node.kind,
                    timestamp: Utc::now(),
                });
                report.skipped.push(node.id.clone());
            }
        }

        if let Some(mut shared) = counter_lease {
            *shared = env.counters.lock().await.clone();
        }

        report.finalize();
        report.duration_ms = start_time.elapsed().as_millis() as u64;

        env.event_bus.emit(ExecutionEvent::RunCompleted {
            execution_id,
            success: report.success,
            success_count: report.success_count,
            failure_count: report.failure_count,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Run {} finished: {} succeeded, {} failed, {} skipped in {}ms",
            execution_id,
            report.success_count,
            report.failure_count,
            report.skipped.len(),
            report.duration_ms
        );

        report
    }

    /// Checks that abort the whole run: no starting nodes, cycles, and (when
    /// enabled) port validation.
    pub fn check_structure(&self, graph: &Graph, options: &RunOptions) -> Result<(), GraphError> {
        if graph.starting_nodes().is_empty() {
            return Err(GraphError::NoStartingNodes);
        }
        let cyclic = find_cycles(graph);
        if !cyclic.is_empty() {
            return Err(GraphError::Cycle { nodes: cyclic });
        }
        if options.validate_ports {
            validate_graph(graph).map_err(GraphError::Validation)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_node(
        &self,
        node: &NodeSpec,
        input: NodeInput,
        registry: &ExecutorRegistry,
        env: &RunEnvironment,
        options: &Arc<RunOptions>,
        execution_id: ExecutionId,
        sequence: usize,
    ) -> NodeReport {
        let Some(executor) = registry.get(node.kind) else {
            let error = format!("No executor registered for kind {}", node.kind);
            tracing::error!("Node {} failed: {}", node.id, error);
            return NodeReport::failed(node.kind, error, sequence, 0);
        };

        if let Err(e) = executor.validate_config(&node.configuration) {
            tracing::error!("Node {} ({}) rejected its configuration: {}", node.id, node.kind, e);
            env.event_bus.emit(ExecutionEvent::NodeFailed {
                execution_id,
                node_id: node.id.clone(),
                kind: node.kind,
                error: e.to_string(),
                timestamp: Utc::now(),
            });
            return NodeReport::failed(node.kind, e.to_string(), sequence, 0);
        }

        let ctx = NodeContext {
            node_id: node.id.clone(),
            kind: node.kind,
            execution_id,
            input,
            config: node.configuration.clone(),
            options: options.clone(),
            services: env.services.clone(),
            counters: env.counters.clone(),
            events: env.event_bus.create_emitter(execution_id, &node.id),
            cancellation: env.cancellation.clone(),
        };

        env.event_bus.emit(ExecutionEvent::NodeStarted {
            execution_id,
            node_id: node.id.clone(),
            kind: node.kind,
            timestamp: Utc::now(),
        });
        tracing::debug!("Executing node {} ({})", node.id, node.kind);

        let start = Instant::now();
        // Spawned so a panicking executor fails its node instead of the run.
        let outcome = match tokio::spawn(async move { executor.execute(ctx).await }).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(join_error) => Err(panic_message(join_error)),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(mut output) => {
                output.metadata.execution_time_ms = duration_ms;
                tracing::info!("Node {} ({}) completed in {}ms", node.id, node.kind, duration_ms);
                env.event_bus.emit(ExecutionEvent::NodeCompleted {
                    execution_id,
                    node_id: node.id.clone(),
                    kind: node.kind,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                NodeReport::succeeded(node.kind, output, sequence, duration_ms)
            }
            Err(error) => {
                tracing::error!("Node {} ({}) failed: {}", node.id, node.kind, error);
                env.event_bus.emit(ExecutionEvent::NodeFailed {
                    execution_id,
                    node_id: node.id.clone(),
                    kind: node.kind,
                    error: error.clone(),
                    timestamp: Utc::now(),
                });
                NodeReport::failed(node.kind, error, sequence, duration_ms)
            }
        }
    }
}

/// A node is ready once every source has settled and, for merge nodes, at
/// least one succeeded, or for every other kind, all succeeded.
fn is_ready(target: &NodeSpec, incoming: &[&Connection], results: &BTreeMap<String, NodeReport>) -> bool {
    let mut outcomes = Vec::with_capacity(incoming.len());
    for conn in incoming {
        match results.get(&conn.source_id) {
            Some(report) => outcomes.push(report.success),
            None => return false,
        }
    }
    match target.kind.fan_in() {
        FanIn::Merge => outcomes.iter().any(|ok| *ok),
        _ => outcomes.iter().all(|ok| *ok),
    }
}

/// Ids of every node on a cycle, sorted.
pub fn find_cycles(graph: &Graph) -> Vec<String> {
    let mut dag: DiGraph<&str, ()> = DiGraph::new();
    let mut index = HashMap::new();
    for node in &graph.nodes {
        index.insert(node.id.as_str(), dag.add_node(node.id.as_str()));
    }
    for conn in &graph.connections {
        if let (Some(&from), Some(&to)) = (
            index.get(conn.source_id.as_str()),
            index.get(conn.target_id.as_str()),
        ) {
            dag.add_edge(from, to, ());
        }
    }

    let mut cyclic: Vec<String> = tarjan_scc(&dag)
        .into_iter()
        .filter(|component| {
            component.len() > 1 || dag.contains_edge(component[0], component[0])
        })
        .flatten()
        .map(|idx| dag[idx].to_string())
        .collect();
    cyclic.sort();
    cyclic
}

fn panic_message(error: tokio::task::JoinError) -> String {
    if error.is_cancelled() {
        return "Node task was cancelled".to_string();
    }
    match error.try_into_panic() {
        Ok(payload) => {
            if let Some(msg) = payload.downcast_ref::<&str>() {
                format!("Node panicked: {}", msg)
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                format!("Node panicked: {}", msg)
            } else {
                "Node panicked".to_string()
            }
        }
        Err(e) => format!("Task join error: {}", e),
    }
}
