use axum::{
    Json, Router as HttpRouter,
    extract::{Extension, Query},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;

use super::protocol::*;
use crate::dmap::{DMapService, ReplicaMessage, Request, Response};
use crate::error::DMapError;
use crate::lock::{LockContext, LockManager};
use crate::membership::Node;
use crate::routing::RoutingTable;
use crate::stats::Stats;

/// HTTP status for a failed request. The JSON body carries the exact variant.
pub fn status_for(error: &DMapError) -> StatusCode {
    match error {
        DMapError::KeyNotFound | DMapError::NoSuchLock => StatusCode::NOT_FOUND,
        DMapError::KeyFound | DMapError::LockNotAcquired => StatusCode::CONFLICT,
        DMapError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        DMapError::RoutingNotReady | DMapError::StaleRouting { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DMapError::ReplicationIncomplete { .. } | DMapError::Transport(_) => {
            StatusCode::BAD_GATEWAY
        }
        DMapError::Storage(_) | DMapError::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn handle_dmap(
    Extension(service): Extension<Arc<DMapService>>,
    Json(request): Json<Request>,
) -> (StatusCode, Json<ReplyBody>) {
    match service.execute(request, true).await {
        Ok(response) => (StatusCode::OK, Json(ReplyBody::ok(response))),
        Err(e) => {
            tracing::debug!("Forwarded request failed: {}", e);
            (status_for(&e), Json(ReplyBody::err(e.to_body())))
        }
    }
}

pub async fn handle_replicate(
    Extension(service): Extension<Arc<DMapService>>,
    Json(message): Json<ReplicaMessage>,
) -> (StatusCode, Json<AckResponse>) {
    let partition = message.partition;
    match service.apply_replica(message).await {
        Ok(_) => (
            StatusCode::OK,
            Json(AckResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to store replica for partition {}: {}", partition, e);
            (
                status_for(&e),
                Json(AckResponse {
                    success: false,
                    error: Some(e.to_body()),
                }),
            )
        }
    }
}

pub async fn handle_destroy(
    Extension(service): Extension<Arc<DMapService>>,
    Json(req): Json<DestroyRequest>,
) -> (StatusCode, Json<AckResponse>) {
    service.destroy_local(&req.dmap);
    (
        StatusCode::OK,
        Json(AckResponse {
            success: true,
            error: None,
        }),
    )
}

pub async fn handle_join(
    Extension(service): Extension<Arc<DMapService>>,
    Json(req): Json<JoinRequest>,
) -> (StatusCode, Json<JoinResponse>) {
    service.membership().join(req.node);
    (
        StatusCode::OK,
        Json(JoinResponse {
            members: service.membership().members(),
        }),
    )
}

pub async fn handle_leave(
    Extension(service): Extension<Arc<DMapService>>,
    Json(req): Json<LeaveRequest>,
) -> (StatusCode, Json<AckResponse>) {
    let removed = service.membership().leave(&req.id);
    if !removed {
        tracing::debug!("Leave for unknown or local member {}", req.id);
    }
    (
        StatusCode::OK,
        Json(AckResponse {
            success: true,
            error: None,
        }),
    )
}

pub async fn handle_members(
    Extension(service): Extension<Arc<DMapService>>,
) -> (StatusCode, Json<Vec<Node>>) {
    (StatusCode::OK, Json(service.membership().members()))
}

pub async fn handle_routing(
    Extension(service): Extension<Arc<DMapService>>,
) -> (StatusCode, Json<Option<RoutingTable>>) {
    match service.router().snapshot() {
        Ok(table) => (StatusCode::OK, Json(Some(table.as_ref().clone()))),
        Err(e) => (status_for(&e), Json(None)),
    }
}

pub async fn handle_stats(
    Extension(service): Extension<Arc<DMapService>>,
    Query(params): Query<StatsParams>,
) -> (StatusCode, Json<Stats>) {
    (StatusCode::OK, Json(service.stats(params.runtime)))
}

pub async fn handle_ping(Json(req): Json<PingRequest>) -> (StatusCode, Json<PingResponse>) {
    let message = req.message.unwrap_or_else(|| "PONG".to_string());
    (StatusCode::OK, Json(PingResponse { message }))
}

// --- Client-facing handlers ---

fn reply(result: Result<Response, DMapError>) -> (StatusCode, Json<ReplyBody>) {
    match result {
        Ok(response) => (StatusCode::OK, Json(ReplyBody::ok(response))),
        Err(e) => (status_for(&e), Json(ReplyBody::err(e.to_body()))),
    }
}

fn ack(result: Result<(), DMapError>) -> (StatusCode, Json<AckResponse>) {
    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(AckResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(AckResponse {
                success: false,
                error: Some(e.to_body()),
            }),
        ),
    }
}

fn lock_reply(result: Result<LockContext, DMapError>) -> (StatusCode, Json<LockReply>) {
    match result {
        Ok(context) => (
            StatusCode::OK,
            Json(LockReply {
                context: Some(context),
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(LockReply {
                context: None,
                error: Some(e.to_body()),
            }),
        ),
    }
}

/// Runs a client request, forwarding it to the key's primary when needed.
/// Reserved DMap names are refused.
pub async fn handle_client_dmap(
    Extension(service): Extension<Arc<DMapService>>,
    Json(request): Json<Request>,
) -> (StatusCode, Json<ReplyBody>) {
    if let Err(e) = service.dmap(request.dmap()) {
        return reply(Err(e));
    }
    reply(service.execute(request, false).await)
}

pub async fn handle_client_destroy(
    Extension(service): Extension<Arc<DMapService>>,
    Json(req): Json<DestroyRequest>,
) -> (StatusCode, Json<AckResponse>) {
    let result = match service.dmap(&req.dmap) {
        Ok(dmap) => dmap.destroy().await,
        Err(e) => Err(e),
    };
    ack(result)
}

pub async fn handle_lock(
    Extension(locks): Extension<Arc<LockManager>>,
    Json(req): Json<LockRequest>,
) -> (StatusCode, Json<LockReply>) {
    let ttl = Duration::from_millis(req.ttl_ms);
    let result = match req.timeout_ms {
        Some(timeout_ms) => {
            locks
                .lock_with_timeout(&req.dmap, &req.name, ttl, Duration::from_millis(timeout_ms))
                .await
        }
        None => locks.lock(&req.dmap, &req.name, ttl).await,
    };
    lock_reply(result)
}

pub async fn handle_lease(
    Extension(locks): Extension<Arc<LockManager>>,
    Json(req): Json<LeaseRequest>,
) -> (StatusCode, Json<LockReply>) {
    let mut context = req.context;
    let result = locks
        .lease(&mut context, Duration::from_millis(req.ttl_ms))
        .await
        .map(|()| context);
    lock_reply(result)
}

pub async fn handle_unlock(
    Extension(locks): Extension<Arc<LockManager>>,
    Json(req): Json<UnlockRequest>,
) -> (StatusCode, Json<AckResponse>) {
    ack(locks.unlock(&req.context).await)
}

/// Every endpoint a member serves.
pub fn app(service: Arc<DMapService>, locks: Arc<LockManager>) -> HttpRouter {
    HttpRouter::new()
        .route(ENDPOINT_DMAP, post(handle_dmap))
        .route(ENDPOINT_REPLICATE, post(handle_replicate))
        .route(ENDPOINT_DESTROY, post(handle_destroy))
        .route(ENDPOINT_JOIN, post(handle_join))
        .route(ENDPOINT_LEAVE, post(handle_leave))
        .route(ENDPOINT_MEMBERS, get(handle_members))
        .route(ENDPOINT_ROUTING, get(handle_routing))
        .route(ENDPOINT_STATS, get(handle_stats))
        .route(ENDPOINT_PING, post(handle_ping))
        .route(ENDPOINT_CLIENT_DMAP, post(handle_client_dmap))
        .route(ENDPOINT_CLIENT_DESTROY, post(handle_client_destroy))
        .route(ENDPOINT_LOCK, post(handle_lock))
        .route(ENDPOINT_LEASE, post(handle_lease))
        .route(ENDPOINT_UNLOCK, post(handle_unlock))
        .layer(Extension(service))
        .layer(Extension(locks))
}
