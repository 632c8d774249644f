mod config;
mod error;

use actix_cors::Cors;
use actix_web::{delete, get, patch, post, put, web, App, HttpResponse, HttpServer, Responder};
use anyhow::Context;
use clap::Parser;
use config::ServerConfig;
use error::ApiError;
use pipecore::services::{Collaborators, StaticCredentials};
use pipecore::{
    CanvasPayload, NewPipeline, NodeValues, Page, Paginated, PipelineError, PipelineStatus,
    PipelineUpdate, ValueMap,
};
use pipenodes::clients::{HttpAiClient, LocalFileStorage};
use pipenodes::HttpTemplateRenderer;
use piperuntime::PipelineEngine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const PIPELINES_PER_PAGE: usize = 20;
const RUNS_PER_PAGE: usize = 10;

/// Application state shared across handlers
struct AppState {
    engine: PipelineEngine,
}

type ApiResult = Result<HttpResponse, ApiError>;

#[derive(Debug, Serialize)]
struct DataResponse<T: Serialize> {
    data: T,
}

fn data<T: Serialize>(value: T) -> HttpResponse {
    HttpResponse::Ok().json(DataResponse { data: value })
}

#[derive(Debug, Serialize)]
struct PageMeta {
    current_page: usize,
    per_page: usize,
    total: usize,
    last_page: usize,
}

#[derive(Debug, Serialize)]
struct PagedResponse<T: Serialize> {
    data: Vec<T>,
    meta: PageMeta,
}

fn paged<T: Serialize>(page: Paginated<T>) -> HttpResponse {
    let meta = PageMeta {
        current_page: page.page,
        per_page: page.per_page,
        total: page.total,
        last_page: page.last_page(),
    };
    HttpResponse::Ok().json(PagedResponse { data: page.items, meta })
}

/// An empty body means "no options"; anything else has to parse.
fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError(PipelineError::InvalidRequest(format!("invalid JSON body: {}", e))))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<PipelineStatus>,
    page: Option<usize>,
    per_page: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<usize>,
    per_page: Option<usize>,
}

fn page_of(page: Option<usize>, per_page: Option<usize>, default_per_page: usize) -> Page {
    Page::new(page.unwrap_or(1), per_page.unwrap_or(default_per_page))
}

#[derive(Debug, Default, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    input_data: NodeValues,
}

#[derive(Debug, Default, Deserialize)]
struct PreviewRequest {
    #[serde(default)]
    inputs: ValueMap,
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    filename: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    image_path: String,
    image_url: String,
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "pipeline-engine"
    }))
}

#[get("/api/brands/{brand_id}/pipelines")]
async fn list_pipelines(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<ListQuery>,
) -> ApiResult {
    let query = query.into_inner();
    let page = page_of(query.page, query.per_page, PIPELINES_PER_PAGE);
    let pipelines = state
        .engine
        .list_pipelines(path.into_inner(), query.status, page)
        .await?;
    Ok(paged(pipelines))
}

#[post("/api/brands/{brand_id}/pipelines")]
async fn create_pipeline(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<NewPipeline>,
) -> ApiResult {
    let pipeline = state
        .engine
        .create_pipeline(path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(DataResponse { data: pipeline }))
}

#[get("/api/brands/{brand_id}/pipelines/{pipeline_id}")]
async fn get_pipeline(state: web::Data<AppState>, path: web::Path<(Uuid, Uuid)>) -> ApiResult {
    let (brand_id, pipeline_id) = path.into_inner();
    Ok(data(state.engine.get_pipeline(brand_id, pipeline_id).await?))
}

#[patch("/api/brands/{brand_id}/pipelines/{pipeline_id}")]
async fn update_pipeline(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<PipelineUpdate>,
) -> ApiResult {
    let (brand_id, pipeline_id) = path.into_inner();
    let pipeline = state
        .engine
        .update_pipeline(brand_id, pipeline_id, body.into_inner())
        .await?;
    Ok(data(pipeline))
}

#[delete("/api/brands/{brand_id}/pipelines/{pipeline_id}")]
async fn delete_pipeline(state: web::Data<AppState>, path: web::Path<(Uuid, Uuid)>) -> ApiResult {
    let (brand_id, pipeline_id) = path.into_inner();
    state.engine.delete_pipeline(brand_id, pipeline_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Replace the whole graph in one step
#[put("/api/brands/{brand_id}/pipelines/{pipeline_id}/canvas")]
async fn save_canvas(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<CanvasPayload>,
) -> ApiResult {
    let (brand_id, pipeline_id) = path.into_inner();
    let pipeline = state
        .engine
        .save_canvas(brand_id, pipeline_id, body.into_inner())
        .await?;
    Ok(data(pipeline))
}

#[get("/api/brands/{brand_id}/pipeline-node-types")]
async fn list_node_types(state: web::Data<AppState>) -> impl Responder {
    data(state.engine.node_types())
}

#[post("/api/brands/{brand_id}/pipelines/{pipeline_id}/execute")]
async fn execute_pipeline(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Bytes,
) -> ApiResult {
    let (brand_id, pipeline_id) = path.into_inner();
    let request: ExecuteRequest = optional_json(&body)?;

    info!(pipeline_id = %pipeline_id, brand_id = %brand_id, "Executing pipeline");
    let run = state
        .engine
        .execute(brand_id, pipeline_id, request.input_data)
        .await?;

    if run.is_finished() {
        Ok(data(run))
    } else {
        Ok(HttpResponse::Accepted().json(DataResponse { data: run }))
    }
}

#[get("/api/brands/{brand_id}/pipelines/{pipeline_id}/runs")]
async fn list_runs(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    query: web::Query<PageQuery>,
) -> ApiResult {
    let (brand_id, pipeline_id) = path.into_inner();
    let page = page_of(query.page, query.per_page, RUNS_PER_PAGE);
    Ok(paged(state.engine.list_runs(brand_id, pipeline_id, page).await?))
}

#[get("/api/brands/{brand_id}/pipelines/{pipeline_id}/runs/{run_id}")]
async fn get_run(state: web::Data<AppState>, path: web::Path<(Uuid, Uuid, Uuid)>) -> ApiResult {
    let (brand_id, pipeline_id, run_id) = path.into_inner();
    Ok(data(state.engine.run_status(brand_id, pipeline_id, run_id).await?))
}

#[post("/api/brands/{brand_id}/pipelines/{pipeline_id}/runs/{run_id}/cancel")]
async fn cancel_run(state: web::Data<AppState>, path: web::Path<(Uuid, Uuid, Uuid)>) -> ApiResult {
    let (brand_id, pipeline_id, run_id) = path.into_inner();
    let run = state.engine.cancel_run(brand_id, pipeline_id, run_id).await?;
    Ok(HttpResponse::Accepted().json(DataResponse { data: run }))
}

/// Execute one node and its ancestors without recording a run
#[post("/api/brands/{brand_id}/pipelines/{pipeline_id}/nodes/{node_id}/preview")]
async fn preview_node(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid, String)>,
    body: web::Bytes,
) -> ApiResult {
    let (brand_id, pipeline_id, node_id) = path.into_inner();
    let request: PreviewRequest = optional_json(&body)?;

    let outputs = state
        .engine
        .execute_up_to(brand_id, pipeline_id, &node_id, request.inputs)
        .await?;
    Ok(data(outputs))
}

#[post("/api/brands/{brand_id}/pipelines/{pipeline_id}/images")]
async fn upload_image(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    query: web::Query<UploadQuery>,
    body: web::Bytes,
) -> ApiResult {
    let (brand_id, pipeline_id) = path.into_inner();
    let stored = state
        .engine
        .upload_node_image(brand_id, pipeline_id, &query.filename, body.to_vec())
        .await?;
    Ok(data(UploadResponse {
        image_path: stored.path,
        image_url: stored.url,
    }))
}

async fn load_credentials(config: &ServerConfig) -> anyhow::Result<StaticCredentials> {
    let Some(path) = &config.brand_credentials_file else {
        return Ok(StaticCredentials::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES + 1))
        .service(health_check)
        .service(list_node_types)
        .service(list_pipelines)
        .service(create_pipeline)
        .service(get_pipeline)
        .service(update_pipeline)
        .service(delete_pipeline)
        .service(save_canvas)
        .service(execute_pipeline)
        .service(list_runs)
        .service(get_run)
        .service(cancel_run)
        .service(preview_node)
        .service(upload_image);
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting Pipeline Engine Server");

    let config = ServerConfig::parse();
    let runtime_config = config.runtime_config();

    let mut services = Collaborators::offline()
        .with_files(Arc::new(LocalFileStorage::new(
            config.storage_root.clone(),
            config.public_base_url.clone(),
        )))
        .with_credentials(Arc::new(load_credentials(&config).await?));
    match &config.ai_gateway_url {
        Some(url) => services = services.with_ai(Arc::new(HttpAiClient::new(url.clone()))),
        None => tracing::warn!("AI_GATEWAY_URL not set, AI nodes will fail"),
    }

    let renderer = Arc::new(HttpTemplateRenderer::new(config.template_renderer_url.clone()));
    let registry = pipenodes::default_registry(renderer);

    let (engine, worker) = PipelineEngine::start(Arc::new(registry), services, runtime_config);
    info!(node_types = engine.node_types().len(), "✅ Engine initialized");

    let app_state = web::Data::new(AppState {
        engine: engine.clone(),
    });

    info!("🌐 Server starting on http://{}", config.bind_address);

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
            .configure(routes)
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    engine.shutdown();
    let _ = worker.await;
    info!("Server stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use pipecore::PipelineNode;
    use piperuntime::RuntimeConfig;
    use serde_json::{json, Value};

    async fn engine_with_pipeline() -> (PipelineEngine, Uuid, Uuid) {
        let renderer = Arc::new(HttpTemplateRenderer::new("http://127.0.0.1:9"));
        let registry = pipenodes::default_registry(renderer);
        let (engine, _worker) =
            PipelineEngine::start(Arc::new(registry), Collaborators::offline(), RuntimeConfig::default());

        let brand_id = Uuid::new_v4();
        let pipeline = engine
            .create_pipeline(
                brand_id,
                NewPipeline {
                    name: "Caption".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap();
        engine
            .save_canvas(
                brand_id,
                pipeline.id,
                CanvasPayload {
                    canvas_state: None,
                    nodes: vec![
                        PipelineNode::new("text", "text_input").with_data("text", "hello"),
                        PipelineNode::new("out", "output"),
                    ],
                    edges: vec![pipecore::PipelineEdge {
                        edge_id: "e1".to_string(),
                        source_node_id: "text".to_string(),
                        source_handle: Some("text".to_string()),
                        target_node_id: "out".to_string(),
                        target_handle: Some("text".to_string()),
                    }],
                },
            )
            .await
            .unwrap();
        (engine, brand_id, pipeline.id)
    }

    macro_rules! app {
        ($engine:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(AppState {
                        engine: $engine.clone(),
                    }))
                    .configure(routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_malformed_execute_body_is_rejected() {
        let (engine, brand_id, pipeline_id) = engine_with_pipeline().await;
        let app = app!(engine);

        let req = test::TestRequest::post()
            .uri(&format!("/api/brands/{}/pipelines/{}/execute", brand_id, pipeline_id))
            .insert_header(("content-type", "application/json"))
            .set_payload(r#"{"input_data": "not-an-object""#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("invalid JSON body"));

        let runs = engine.list_runs(brand_id, pipeline_id, Page::first(10)).await.unwrap();
        assert_eq!(runs.total, 0);
    }

    #[actix_web::test]
    async fn test_execute_without_body_runs_pipeline() {
        let (engine, brand_id, pipeline_id) = engine_with_pipeline().await;
        let app = app!(engine);

        let req = test::TestRequest::post()
            .uri(&format!("/api/brands/{}/pipelines/{}/execute", brand_id, pipeline_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["status"], json!("succeeded"));
        assert_eq!(body["data"]["output_data"], json!({ "text": "hello" }));
    }

    #[actix_web::test]
    async fn test_preview_rejects_wrongly_typed_inputs() {
        let (engine, brand_id, pipeline_id) = engine_with_pipeline().await;
        let app = app!(engine);
        let uri = format!("/api/brands/{}/pipelines/{}/nodes/out/preview", brand_id, pipeline_id);

        let req = test::TestRequest::post()
            .uri(&uri)
            .set_json(json!({ "inputs": ["not", "a", "map"] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let req = test::TestRequest::post()
            .uri(&uri)
            .set_json(json!({ "inputs": { "text": "override" } }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"], json!({ "text": "override" }));
    }

    #[actix_web::test]
    async fn test_run_listing_is_paged() {
        let (engine, brand_id, pipeline_id) = engine_with_pipeline().await;
        for _ in 0..3 {
            engine.execute(brand_id, pipeline_id, NodeValues::new()).await.unwrap();
        }
        let app = app!(engine);

        let req = test::TestRequest::get()
            .uri(&format!(
                "/api/brands/{}/pipelines/{}/runs?page=2&per_page=2",
                brand_id, pipeline_id
            ))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["meta"]["total"], json!(3));
        assert_eq!(body["meta"]["last_page"], json!(2));

        let req = test::TestRequest::get()
            .uri(&format!("/api/brands/{}/pipelines", brand_id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["meta"]["per_page"], json!(20));
        assert_eq!(body["data"][0]["runs_count"], json!(3));
        assert_eq!(body["data"][0]["nodes_count"], json!(2));
    }
}
