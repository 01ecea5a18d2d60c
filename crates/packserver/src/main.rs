use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use packcore::archive::JsonArchiveStore;
use packcore::{FlowError, GraphDocument, GraphError, InMemorySchemaRegistry, Services};
use packruntime::{ExecutionReport, GraphRuntime, GraphScheduler, RuntimeConfig};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<GraphRuntime>,
}

/// Response for graph creation
#[derive(Debug, Serialize)]
struct GraphResponse {
    id: Uuid,
    message: String,
}

/// Short form of a report; the full one is returned with `?full=true`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionResponse {
    execution_id: Uuid,
    success: bool,
    total_executed: usize,
    success_count: usize,
    failure_count: usize,
    skipped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    duration_ms: u64,
}

impl From<&ExecutionReport> for ExecutionResponse {
    fn from(report: &ExecutionReport) -> Self {
        Self {
            execution_id: report.execution_id,
            success: report.success,
            total_executed: report.total_executed,
            success_count: report.success_count,
            failure_count: report.failure_count,
            skipped: report.skipped.clone(),
            error: report.error.clone(),
            duration_ms: report.duration_ms,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct ReportQuery {
    #[serde(default)]
    full: bool,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn report_response(report: &ExecutionReport, full: bool) -> HttpResponse {
    if full {
        HttpResponse::Ok().json(report)
    } else {
        HttpResponse::Ok().json(ExecutionResponse::from(report))
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "packflow"
    }))
}

/// List registered graphs
#[get("/api/graphs")]
async fn list_graphs(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let graphs: Vec<_> = data
        .runtime
        .list_graphs()
        .await
        .into_iter()
        .map(|(id, doc)| {
            serde_json::json!({
                "id": id,
                "version": doc.version,
                "nodes": doc.nodes.len(),
                "connections": doc.connections.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(graphs))
}

/// Register a graph document
#[post("/api/graphs")]
async fn create_graph(data: web::Data<AppState>, body: String) -> ActixResult<impl Responder> {
    // Parsed by hand so newer document versions get a clear rejection.
    let document = match GraphDocument::from_json(&body) {
        Ok(doc) => doc,
        Err(e) => {
            return Ok(HttpResponse::BadRequest().json(ErrorResponse { error: e.to_string() }));
        }
    };
    let id = data.runtime.register_graph(document).await;
    info!("Registered graph {}", id);

    Ok(HttpResponse::Created().json(GraphResponse {
        id,
        message: "Graph registered successfully".to_string(),
    }))
}

/// Get a specific graph
#[get("/api/graphs/{id}")]
async fn get_graph(data: web::Data<AppState>, path: web::Path<Uuid>) -> ActixResult<impl Responder> {
    let id = path.into_inner();
    match data.runtime.get_graph(id).await {
        Some(doc) => Ok(HttpResponse::Ok().json(doc)),
        None => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: GraphError::NotFound(id.to_string()).to_string(),
        })),
    }
}

/// Delete a graph
#[actix_web::delete("/api/graphs/{id}")]
async fn delete_graph(data: web::Data<AppState>, path: web::Path<Uuid>) -> ActixResult<impl Responder> {
    let id = path.into_inner();
    match data.runtime.remove_graph(id).await {
        Some(_) => {
            info!("Deleted graph {}", id);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "Graph deleted successfully"
            })))
        }
        None => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: GraphError::NotFound(id.to_string()).to_string(),
        })),
    }
}

/// Execute a registered graph
#[post("/api/graphs/{id}/execute")]
async fn execute_graph(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<ReportQuery>,
) -> ActixResult<impl Responder> {
    let id = path.into_inner();
    info!("Executing graph {}", id);

    match data.runtime.execute_registered(id).await {
        Ok(report) => {
            info!(
                "Graph {} finished: {} ok, {} failed",
                id, report.success_count, report.failure_count
            );
            Ok(report_response(&report, query.full))
        }
        Err(FlowError::Graph(e @ GraphError::NotFound(_))) => {
            Ok(HttpResponse::NotFound().json(ErrorResponse { error: e.to_string() }))
        }
        Err(e) => {
            error!("Graph {} execution failed: {}", id, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse { error: e.to_string() }))
        }
    }
}

/// Execute a document without registering it
#[post("/api/execute")]
async fn execute_document(
    data: web::Data<AppState>,
    query: web::Query<ReportQuery>,
    body: String,
) -> ActixResult<impl Responder> {
    let document = match GraphDocument::from_json(&body) {
        Ok(doc) => doc,
        Err(e) => {
            return Ok(HttpResponse::BadRequest().json(ErrorResponse { error: e.to_string() }));
        }
    };
    let report = data.runtime.execute_document(&document).await;
    Ok(report_response(&report, query.full))
}

/// Structural and configuration checks without running anything
#[post("/api/validate")]
async fn validate_document(data: web::Data<AppState>, body: String) -> ActixResult<impl Responder> {
    let document = match GraphDocument::from_json(&body) {
        Ok(doc) => doc,
        Err(e) => {
            return Ok(HttpResponse::BadRequest().json(ErrorResponse { error: e.to_string() }));
        }
    };
    let graph = document.graph();
    let registry = data.runtime.registry();

    let mut problems = Vec::new();
    if let Err(e) = GraphScheduler::new().check_structure(&graph, &document.options) {
        problems.push(e.to_string());
    }
    for node in &graph.nodes {
        match registry.get(node.kind) {
            Some(executor) => {
                if let Err(e) = executor.validate_config(&node.configuration) {
                    problems.push(format!("Node {} ({}): {}", node.id, node.kind, e));
                }
            }
            None => problems.push(format!("No executor registered for kind {}", node.kind)),
        }
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "valid": problems.is_empty(),
        "problems": problems,
    })))
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("WebSocket client lagged, dropped {} events", n);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available node kinds
#[get("/api/nodes")]
async fn list_node_kinds(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();
    let nodes: Vec<_> = registry
        .list_node_kinds()
        .into_iter()
        .filter_map(|kind| registry.get_metadata(kind))
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting packflow server");

    let archive_root = std::env::var("ARCHIVE_ROOT").unwrap_or_else(|_| ".".to_string());
    let schemas = match std::env::var("SCHEMAS_FILE") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)?;
            info!("Loaded table schemas from {}", path);
            InMemorySchemaRegistry::from_json(&json)?
        }
        Err(_) => InMemorySchemaRegistry::new(),
    };
    let services = Services::new(Arc::new(JsonArchiveStore::new(&archive_root)), Arc::new(schemas));

    let runtime = GraphRuntime::with_registry(
        Arc::new(packnodes::default_registry()),
        services,
        RuntimeConfig::default(),
    );
    info!("Runtime initialized, archives under {}", archive_root);

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_graphs)
            .service(create_graph)
            .service(get_graph)
            .service(delete_graph)
            .service(execute_graph)
            .service(execute_document)
            .service(validate_document)
            .service(websocket_events)
            .service(list_node_kinds)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
