use actix_cors::Cors;
use actix_web::{
    get, post, put, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use actix_ws::Message;
use clap::Parser;
use nodecore::RegistryError;
use noderegistry::{
    AppConfig, ConfigOverrides, CreateNodeRequest, NodeDefinitionService, ParameterInput,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nodeserver")]
#[command(about = "HTTP server for the custom node registry", long_about = None)]
struct Args {
    /// Directory holding the node definition files
    #[arg(long)]
    nodes_dir: Option<PathBuf>,

    /// Working directory used to locate the config file and node directory
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Show debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Application state shared across handlers
struct AppState {
    service: Arc<NodeDefinitionService>,
}

/// Request body for source code updates
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCodeRequest {
    #[serde(alias = "pythonCode", alias = "code")]
    source_code: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

fn error_response(err: RegistryError) -> HttpResponse {
    let body = ErrorResponse {
        error: err.to_string(),
        kind: err.kind(),
    };
    match err {
        RegistryError::DuplicateId(_) | RegistryError::InvalidDefinition(_) => {
            HttpResponse::BadRequest().json(body)
        }
        RegistryError::NotFound(_) => HttpResponse::NotFound().json(body),
        RegistryError::RenameConflict { .. } => HttpResponse::Conflict().json(body),
        _ => {
            error!("Request failed: {}", body.error);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "nodeserver",
        "nodesDir": data.service.nodes_dir(),
    }))
}

/// List all custom nodes
#[get("/api/nodes/custom")]
async fn list_nodes(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    match data.service.list().await {
        Ok(nodes) => Ok(HttpResponse::Ok().json(nodes)),
        Err(e) => Ok(error_response(e)),
    }
}

/// Register a new custom node
#[post("/api/nodes/custom")]
async fn create_node(
    data: web::Data<AppState>,
    req: web::Json<CreateNodeRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    info!("Creating node: {}", req.node_id);

    match data.service.create(req).await {
        Ok(entry) => Ok(HttpResponse::Created().json(entry)),
        Err(e) => Ok(error_response(e)),
    }
}

/// Rescan the node directory
#[post("/api/nodes/custom/rescan")]
async fn rescan_nodes(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    match data.service.rescan().await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "nodes": outcome.registry.ids(),
            "changed": outcome.changed,
            "conflicts": outcome.conflicts,
        }))),
        Err(e) => Ok(error_response(e)),
    }
}

/// Get a specific node
#[get("/api/nodes/custom/{id}")]
async fn get_node(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    match data.service.get(&path.into_inner()).await {
        Ok(info) => Ok(HttpResponse::Ok().json(info)),
        Err(e) => Ok(error_response(e)),
    }
}

/// Replace a node's source and return its new descriptor
#[put("/api/nodes/custom/{id}")]
async fn update_node(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<UpdateCodeRequest>,
) -> ActixResult<impl Responder> {
    let id = path.into_inner();
    let entry = match data.service.update_code(&id, &req.source_code).await {
        Ok(entry) => entry,
        Err(e) => return Ok(error_response(e)),
    };
    match data.service.get(&entry.id).await {
        Ok(info) => Ok(HttpResponse::Ok().json(info)),
        Err(e) => Ok(error_response(e)),
    }
}

/// Delete a node
#[actix_web::delete("/api/nodes/custom/{id}")]
async fn delete_node(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let id = path.into_inner();
    match data.service.delete(&id).await {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "message": format!("Node {} deleted successfully", id)
        }))),
        Err(e) => Ok(error_response(e)),
    }
}

/// Get a node's source code
#[get("/api/nodes/custom/{id}/code")]
async fn get_node_code(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let id = path.into_inner();
    match data.service.get_code(&id).await {
        Ok(code) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "id": id,
            "sourceCode": code,
        }))),
        Err(e) => Ok(error_response(e)),
    }
}

/// Replace a node's source code
#[put("/api/nodes/custom/{id}/code")]
async fn update_node_code(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<UpdateCodeRequest>,
) -> ActixResult<impl Responder> {
    match data
        .service
        .update_code(&path.into_inner(), &req.source_code)
        .await
    {
        Ok(entry) => Ok(HttpResponse::Ok().json(entry)),
        Err(e) => Ok(error_response(e)),
    }
}

/// Replace a node's input and output parameters
#[put("/api/nodes/custom/{id}/parameters")]
async fn update_node_parameters(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<ParameterInput>,
) -> ActixResult<impl Responder> {
    match data
        .service
        .update_parameters(&path.into_inner(), &req.inputs, &req.outputs)
        .await
    {
        Ok(entry) => Ok(HttpResponse::Ok().json(entry)),
        Err(e) => Ok(error_response(e)),
    }
}

/// WebSocket endpoint for registry events
#[get("/api/nodes/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.service.subscribe_events();

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
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} events skipped", skipped);
                        }
                        Err(RecvError::Closed) => break,
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

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|level| EnvFilter::try_new(level).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    info!("🚀 Starting Node Registry Server");

    let config = AppConfig::resolve(ConfigOverrides {
        work_dir: args.work_dir,
        nodes_dir: args.nodes_dir,
        config_file: args.config,
        host: args.host,
        port: args.port,
    })?;
    if let Some(file) = &config.config_file {
        info!("📄 Loaded config from {}", file.display());
    }
    info!("📁 Node directory: {}", config.registry.nodes_dir.display());

    let bind_address = config.bind_address();
    let service = Arc::new(NodeDefinitionService::new(config.registry));

    let outcome = service.rescan().await?;
    info!("✅ Registry loaded with {} nodes", outcome.registry.len());
    for conflict in &outcome.conflicts {
        warn!("⚠️  {}", conflict);
    }

    let app_state = web::Data::new(AppState { service });

    info!("🌐 Server starting on http://{}", bind_address);

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
            .service(list_nodes)
            .service(create_node)
            .service(rescan_nodes)
            .service(get_node)
            .service(update_node)
            .service(delete_node)
            .service(get_node_code)
            .service(update_node_code)
            .service(update_node_parameters)
            .service(websocket_events)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
