//! HTTP API for the benchmark
//!
//! Thin JSON routing over [`Services`]. All bodies are JSON; list endpoints
//! take camelCase query parameters.
//!
//! ## Public API
//! - `GET /health` - Health check with table counts
//! - `POST /api/submit` - Record a submission (`Authorization: Bearer pk_...`)
//! - `GET /api/submissions` - List (`model`, `sortBy`, `limit`, `offset`)
//! - `GET /api/submissions/{id}` - One submission
//! - `GET /api/recent` - Newest submissions
//! - `GET /api/entities/{id}/submissions` - Submissions claiming an entity
//! - `GET /api/models/{model}/submissions` - Submissions of one model
//! - `GET /api/leaderboard` - Ranked by visual net score (`model`, `limit`)
//! - `GET /api/random` - Unvoted sample (`clientId`, `exclude`, `limit`)
//! - `GET /api/search` - Name search (`q`, `model`, `limit`)
//! - `GET /api/stats` - Platform and model aggregates
//! - `GET /api/models` - Model names
//! - `POST /api/votes` - Cast a vote
//! - `POST /api/votes/batch` - Cast several votes of one kind
//! - `DELETE /api/votes` - Retract an active vote
//! - `GET /api/votes` - A client's active votes (`clientId`, `ids`)
//!
//! ## Admin API
//! - `POST /admin/reference` - Seed reference entries
//! - `POST /admin/keys` - Issue an API key
//! - `POST /admin/maintenance/{sweep,recompute,backfill,reflag}`
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:8095/api/votes \
//!      -H "Content-Type: application/json" \
//!      -d '{"clientId":"c-1","submissionId":"...","kind":"visual","polarity":"up"}'
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::MaintenanceConfig;
use crate::db::reference::ReferenceEntry;
use crate::db::SubmissionQuery;
use crate::error::StorageError;
use crate::services::{
    self, error_response, from_create_result, from_option, from_result, BatchVoteRequest, CastVoteRequest,
    RemoveVoteRequest, Services, SubmitInput,
};

const MAX_LIST_LIMIT: u32 = 100;
const DEFAULT_REFLAG_BATCH: u32 = 500;

type HttpResponse = Response<Full<Bytes>>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardParams {
    model: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RandomParams {
    client_id: Option<String>,
    /// Comma-separated submission ids
    exclude: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    q: Option<String>,
    model: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientVotesParams {
    client_id: Option<String>,
    /// Comma-separated submission ids; omitted means "ids voted on"
    ids: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LimitParams {
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SweepParams {
    batch_size: Option<u32>,
    max_batches: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyBody {
    model: String,
    ttl_days: Option<u32>,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
    admin_token: Option<String>,
    maintenance: MaintenanceConfig,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        Self {
            services,
            bind_addr,
            admin_token: None,
            maintenance: MaintenanceConfig::default(),
        }
    }

    /// Require a bearer token on admin routes
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    /// Defaults for maintenance requests without explicit batch parameters
    pub fn with_maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = maintenance;
        self
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), StorageError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    async fn handle_request(&self, req: Request<Incoming>) -> Result<HttpResponse, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        let mut response = self.route(req, method.clone(), &path).await.unwrap_or_else(|e| {
            warn!(method = %method, path = %path, error = %e, "Request rejected");
            error_response(e)
        });
        if path.starts_with("/api/") {
            add_cors_headers(&mut response);
        }
        Ok(response)
    }

    /// Route requests to handlers
    async fn route(&self, req: Request<Incoming>, method: Method, path: &str) -> Result<HttpResponse, StorageError> {
        match (method, path) {
            (Method::GET, "/health") => self.handle_health(),

            (Method::OPTIONS, p) if p.starts_with("/api/") => Ok(services::no_content()),

            // Submissions
            (Method::POST, "/api/submit") => self.handle_submit(req).await,
            (Method::GET, "/api/submissions") => self.handle_list(&req),
            (Method::GET, p) if p.starts_with("/api/submissions/") => {
                let id = &p["/api/submissions/".len()..];
                Ok(from_option(self.services.submissions.get(id), "Submission not found"))
            }
            (Method::GET, "/api/recent") => {
                let params: LimitParams = parse_query(&req)?;
                Ok(from_result(self.services.submissions.recent(capped(params.limit, 10))))
            }
            (Method::GET, p) if path_param(p, "/api/entities/", "/submissions").is_some() => {
                self.handle_by_entity(path_param(p, "/api/entities/", "/submissions").unwrap_or_default())
            }
            (Method::GET, p) if path_param(p, "/api/models/", "/submissions").is_some() => {
                let model = path_param(p, "/api/models/", "/submissions").unwrap_or_default();
                let params: LimitParams = parse_query(&req)?;
                Ok(from_result(self.services.submissions.by_model(model, capped(params.limit, 50))))
            }
            (Method::GET, "/api/leaderboard") => {
                let params: LeaderboardParams = parse_query(&req)?;
                Ok(from_result(
                    self.services
                        .submissions
                        .leaderboard(params.model.as_deref(), capped(params.limit, 20)),
                ))
            }
            (Method::GET, "/api/random") => self.handle_random(&req),
            (Method::GET, "/api/search") => {
                let params: SearchParams = parse_query(&req)?;
                Ok(from_result(self.services.submissions.search(
                    params.q.as_deref().unwrap_or(""),
                    params.model.as_deref(),
                    capped(params.limit, 20),
                )))
            }

            // Statistics
            (Method::GET, "/api/stats") => Ok(from_result(self.services.stats.platform_stats())),
            (Method::GET, "/api/models") => Ok(from_result(self.services.stats.models())),

            // Votes
            (Method::POST, "/api/votes") => {
                let body: CastVoteRequest = read_json(req).await?;
                Ok(from_result(self.services.votes.cast_vote(&body)))
            }
            (Method::POST, "/api/votes/batch") => {
                let body: BatchVoteRequest = read_json(req).await?;
                Ok(from_result(self.services.votes.cast_votes_batch(&body)))
            }
            (Method::DELETE, "/api/votes") => {
                let body: RemoveVoteRequest = read_json(req).await?;
                Ok(from_result(self.services.votes.remove_vote(&body)))
            }
            (Method::GET, "/api/votes") => self.handle_client_votes(&req),

            // Admin
            (Method::POST, p) if p.starts_with("/admin/") => self.handle_admin(req, p).await,

            (_, p) if is_known_path(p) => Ok(services::method_not_allowed()),
            _ => Ok(services::not_found("Not Found")),
        }
    }

    /// Health check endpoint
    fn handle_health(&self) -> Result<HttpResponse, StorageError> {
        let stats = self.services.stats.db_stats()?;
        Ok(services::ok(&serde_json::json!({
            "status": "ok",
            "referenceEntries": stats.reference_entries,
            "submissions": stats.submissions,
            "ledgerRows": stats.ledger_rows,
            "models": stats.models,
            "trackedClients": self.services.limiter.tracked_clients(),
        })))
    }

    /// POST /api/submit
    async fn handle_submit(&self, req: Request<Incoming>) -> Result<HttpResponse, StorageError> {
        let key = bearer_token(&req)
            .ok_or_else(|| StorageError::Unauthorized("missing bearer API key".into()))?
            .to_string();
        let input: SubmitInput = read_json(req).await?;
        Ok(from_create_result(self.services.submissions.create_with_key(&key, input)))
    }

    /// GET /api/submissions
    fn handle_list(&self, req: &Request<Incoming>) -> Result<HttpResponse, StorageError> {
        let mut query: SubmissionQuery = parse_query(req)?;
        query.limit = query.limit.min(MAX_LIST_LIMIT);
        Ok(from_result(self.services.submissions.list(&query)))
    }

    /// GET /api/entities/{id}/submissions
    fn handle_by_entity(&self, raw: &str) -> Result<HttpResponse, StorageError> {
        let entity_id: i64 = raw
            .parse()
            .map_err(|_| StorageError::Validation(format!("invalid entity id '{}'", raw)))?;
        Ok(from_result(self.services.submissions.by_entity(entity_id)))
    }

    /// GET /api/random
    fn handle_random(&self, req: &Request<Incoming>) -> Result<HttpResponse, StorageError> {
        let params: RandomParams = parse_query(req)?;
        let exclude = split_ids(params.exclude.as_deref());
        let client_id = params.client_id.as_deref().filter(|c| !c.trim().is_empty());
        Ok(from_result(self.services.submissions.random_unvoted(
            client_id,
            &exclude,
            capped(params.limit, 5),
        )))
    }

    /// GET /api/votes
    fn handle_client_votes(&self, req: &Request<Incoming>) -> Result<HttpResponse, StorageError> {
        let params: ClientVotesParams = parse_query(req)?;
        let client_id = params.client_id.unwrap_or_default();

        match params.ids {
            Some(ids) => {
                let ids = split_ids(Some(&ids));
                Ok(from_result(self.services.votes.client_votes(&client_id, &ids)))
            }
            None => Ok(from_result(self.services.votes.client_voted_ids(&client_id))),
        }
    }

    /// POST /admin/*
    async fn handle_admin(&self, req: Request<Incoming>, path: &str) -> Result<HttpResponse, StorageError> {
        if let Some(expected) = &self.admin_token {
            match bearer_token(&req) {
                None => return Err(StorageError::Unauthorized("admin token required".into())),
                Some(token) if token != expected.as_str() => {
                    return Err(StorageError::Forbidden("invalid admin token".into()))
                }
                Some(_) => {}
            }
        }

        let maintenance = &self.services.maintenance;
        match path {
            "/admin/reference" => {
                let entries: Vec<ReferenceEntry> = read_json(req).await?;
                Ok(from_result(self.services.reference.seed_if_absent(&entries)))
            }
            "/admin/keys" => {
                let body: CreateKeyBody = read_json(req).await?;
                Ok(from_create_result(self.services.api_keys.create_key(&body.model, body.ttl_days)))
            }
            "/admin/maintenance/sweep" => {
                let params: SweepParams = parse_query(&req)?;
                Ok(from_result(maintenance.sweep_expired_votes(
                    params.batch_size.unwrap_or(self.maintenance.sweep_batch_size),
                    params.max_batches.unwrap_or(self.maintenance.sweep_max_batches),
                )))
            }
            "/admin/maintenance/recompute" => Ok(from_result(maintenance.recompute_all_aggregates())),
            "/admin/maintenance/backfill" => Ok(from_result(maintenance.backfill_missing_timestamps())),
            "/admin/maintenance/reflag" => {
                let params: SweepParams = parse_query(&req)?;
                Ok(from_result(
                    maintenance.reflag_invalid_submissions(params.batch_size.unwrap_or(DEFAULT_REFLAG_BATCH)),
                ))
            }
            _ => Ok(services::not_found("Not Found")),
        }
    }
}

/// Paths served by some method, used to tell 405 from 404
fn is_known_path(path: &str) -> bool {
    const FIXED: &[&str] = &[
        "/health",
        "/api/submit",
        "/api/submissions",
        "/api/recent",
        "/api/leaderboard",
        "/api/random",
        "/api/search",
        "/api/stats",
        "/api/models",
        "/api/votes",
        "/api/votes/batch",
    ];
    FIXED.contains(&path)
        || path.starts_with("/api/submissions/")
        || path.starts_with("/admin/")
        || path_param(path, "/api/entities/", "/submissions").is_some()
        || path_param(path, "/api/models/", "/submissions").is_some()
}

/// Segment between `prefix` and `suffix`, if the path has that shape
fn path_param<'a>(path: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)?.strip_suffix(suffix)
}

fn capped(limit: Option<u32>, default: u32) -> u32 {
    limit.unwrap_or(default).min(MAX_LIST_LIMIT)
}

fn split_ids(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn bearer_token<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn parse_query<T: DeserializeOwned, B>(req: &Request<B>) -> Result<T, StorageError> {
    serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
        .map_err(|e| StorageError::Validation(format!("invalid query: {}", e)))
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, StorageError> {
    let body = req
        .collect()
        .await
        .map_err(|e| StorageError::Internal(format!("Failed to read body: {}", e)))?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

fn add_cors_headers(response: &mut HttpResponse) {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}
