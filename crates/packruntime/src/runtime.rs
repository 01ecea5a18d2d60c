use crate::registry::ExecutorRegistry;
use crate::report::ExecutionReport;
use crate::scheduler::{GraphScheduler, RunEnvironment};
use packcore::{
    CounterRegistry, EventBus, ExecutionEvent, FlowError, Graph, GraphDocument, GraphError,
    RunOptions, Services,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Main runtime for executing graphs
pub struct GraphRuntime {
    registry: Arc<ExecutorRegistry>,
    scheduler: GraphScheduler,
    services: Arc<Services>,
    event_bus: Arc<EventBus>,
    counters: Arc<Mutex<CounterRegistry>>,
    graphs: Arc<RwLock<HashMap<Uuid, GraphDocument>>>,
}

impl GraphRuntime {
    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<ExecutorRegistry>, services: Services, config: RuntimeConfig) -> Self {
        Self {
            registry,
            scheduler: GraphScheduler::new(),
            services: Arc::new(services),
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            counters: Arc::new(Mutex::new(CounterRegistry::new())),
            graphs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get access to the executor registry
    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Counter sequences carried between runs
    pub fn counters(&self) -> &Arc<Mutex<CounterRegistry>> {
        &self.counters
    }

    fn environment(&self, cancellation: CancellationToken) -> RunEnvironment {
        RunEnvironment {
            services: self.services.clone(),
            counters: self.counters.clone(),
            event_bus: self.event_bus.clone(),
            cancellation,
        }
    }

    /// Execute a graph directly (without registration)
    pub async fn execute(&self, graph: &Graph, options: RunOptions) -> ExecutionReport {
        self.execute_with_cancellation(graph, options, CancellationToken::new())
            .await
    }

    /// Execute a graph; cancelling `token` stops the run between nodes
    pub async fn execute_with_cancellation(
        &self,
        graph: &Graph,
        options: RunOptions,
        token: CancellationToken,
    ) -> ExecutionReport {
        let env = self.environment(token);
        self.scheduler
            .execute(graph, &self.registry, &env, options)
            .await
    }

    /// Execute a persisted document with its own options
    pub async fn execute_document(&self, document: &GraphDocument) -> ExecutionReport {
        self.execute(&document.graph(), document.options.clone()).await
    }

    /// Register a graph document, returning its id
    pub async fn register_graph(&self, document: GraphDocument) -> Uuid {
        let id = Uuid::new_v4();
        self.graphs.write().await.insert(id, document);
        id
    }

    pub async fn get_graph(&self, id: Uuid) -> Option<GraphDocument> {
        self.graphs.read().await.get(&id).cloned()
    }

    pub async fn remove_graph(&self, id: Uuid) -> Option<GraphDocument> {
        self.graphs.write().await.remove(&id)
    }

    pub async fn list_graphs(&self) -> Vec<(Uuid, GraphDocument)> {
        self.graphs
            .read()
            .await
            .iter()
            .map(|(id, doc)| (*id, doc.clone()))
            .collect()
    }

    /// Execute a registered graph by ID
    pub async fn execute_registered(&self, id: Uuid) -> Result<ExecutionReport, FlowError> {
        let document = self
            .get_graph(id)
            .await
            .ok_or_else(|| GraphError::NotFound(id.to_string()))?;
        Ok(self.execute_document(&document).await)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
        }
    }
}
