//! HTTP / WebSocket 路由
//!
//! - `POST /pengine/:actor`: JSON 请求, 按 `format` 回复 JSON 或纯文本
//! - `GET /pengine/:actor/ws`: 实时会话, 入站为 JSON 请求, 出站为 `Frame`
//! - `GET /pengine/:actor/dump`: 模块源码
//! - `GET /healthz`

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use ll_core::{LogicEngine, LogicLoomError};
use ll_pengine::{Format, Frame, PengineHost, Reply, Request};

/// 把库错误映射为 HTTP 状态码与 JSON 错误体
pub struct ApiError(pub LogicLoomError);

impl From<LogicLoomError> for ApiError {
    fn from(err: LogicLoomError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            LogicLoomError::Protocol(_)
            | LogicLoomError::Syntax { .. }
            | LogicLoomError::Serialization(_) => StatusCode::BAD_REQUEST,
            LogicLoomError::IdentityConflict { .. } => StatusCode::CONFLICT,
            LogicLoomError::Actor(_) => StatusCode::SERVICE_UNAVAILABLE,
            LogicLoomError::Fetch { .. }
            | LogicLoomError::Consult { .. }
            | LogicLoomError::ForeignTransaction { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(%status, "Request failed: {}", self.0);
        }
        let body = json!({
            "status": status.as_u16(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// 构建路由
pub fn router<E: LogicEngine>(host: PengineHost<E>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/pengine/:actor", post(post_request::<E>))
        .route("/pengine/:actor/ws", get(ws_session::<E>))
        .route("/pengine/:actor/dump", get(get_dump::<E>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(host)
}

/// 在 `addr` 上提供服务直到进程退出
pub async fn serve<E: LogicEngine>(addr: SocketAddr, host: PengineHost<E>) -> ll_core::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "LogicLoom listening");
    axum::serve(listener, router(host)).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn post_request<E: LogicEngine>(
    Path(actor): Path<String>,
    State(host): State<PengineHost<E>>,
    Json(request): Json<Request>,
) -> Result<Response, ApiError> {
    let format = request.format;
    let reply = host.request(&actor, request).await?;
    Ok(render(&reply, format))
}

fn render(reply: &Reply, format: Format) -> Response {
    match format {
        Format::Json => Json(reply).into_response(),
        Format::Text => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            reply.to_text(),
        )
            .into_response(),
    }
}

async fn get_dump<E: LogicEngine>(
    Path(actor): Path<String>,
    State(host): State<PengineHost<E>>,
) -> Result<Response, ApiError> {
    let dump = host.dump(&actor).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], dump).into_response())
}

async fn ws_session<E: LogicEngine>(
    Path(actor): Path<String>,
    State(host): State<PengineHost<E>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_socket(socket, host, actor).await {
            warn!("WebSocket session ended with error: {}", e);
        }
    })
}

async fn handle_socket<E: LogicEngine>(
    socket: WebSocket,
    host: PengineHost<E>,
    actor: String,
) -> ll_core::Result<()> {
    let connection = host.connect(&actor).await?;
    let session = connection.session;
    let frames = connection.frames;
    let (mut sink, mut stream) = socket.split();
    debug!(actor = %actor, session = %session, "WebSocket session open");

    loop {
        tokio::select! {
            frame = frames.recv_async() => {
                let Ok(frame) = frame else { break };
                let text = serde_json::to_string(&frame)?;
                if sink.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame = answer(&host, &actor, &session, &text).await;
                        let text = serde_json::to_string(&frame)?;
                        if sink.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
        }
    }

    host.disconnect(&actor, &session).await;
    debug!(actor = %actor, session = %session, "WebSocket session closed");
    Ok(())
}

/// 处理会话里的一条请求; 失败也以 `error` 回复返回给该会话
pub async fn answer<E: LogicEngine>(
    host: &PengineHost<E>,
    actor: &str,
    session: &str,
    text: &str,
) -> Frame {
    let request: Request = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => return Frame::Reply(Reply::from_error("", &LogicLoomError::Serialization(e))),
    };
    let id = request.id.clone().unwrap_or_default();
    match host.request_from(actor, session, request).await {
        Ok(reply) => Frame::Reply(reply),
        Err(e) => Frame::Reply(Reply::from_error(id, &e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    use ll_durable::MemoryKv;
    use ll_engine::MiniLog;
    use ll_pengine::{Event, PengineConfig, StaticFetcher};

    fn host() -> PengineHost<MiniLog> {
        PengineHost::new(
            PengineConfig::default(),
            Arc::new(MemoryKv::default()),
            Arc::new(StaticFetcher::new()),
            MiniLog::new,
        )
    }

    fn post_json(uri: &str, body: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = router(host())
            .oneshot(HttpRequest::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn test_post_json_and_text() {
        let app = router(host());
        let response = app
            .clone()
            .oneshot(post_json(
                "/pengine/alice",
                r#"{"ask": "member(X, [a, b])", "chunk": 1, "id": "q"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let reply: Reply = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(reply.event, Event::Success);
        assert_eq!(reply.more, Some(true));

        let response = app
            .oneshot(post_json(
                "/pengine/alice",
                r#"{"next": true, "id": "q", "format": "text"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "X = \"b\"\ntrue.\n");
    }

    #[tokio::test]
    async fn test_malformed_requests_are_rejected() {
        let app = router(host());

        let response = app
            .clone()
            .oneshot(HttpRequest::get("/pengine/alice").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/pengine/alice")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("ask=true"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let response = app
            .oneshot(post_json("/pengine/alice", r#"{"ask": "true", "chunk": 0}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn test_dump_route() {
        let host = host();
        host.request("alice", Request::create().with_src_text("p(1)."))
            .await
            .unwrap();
        let response = router(host)
            .oneshot(HttpRequest::get("/pengine/alice/dump").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let dump = body_text(response).await;
        assert!(dump.starts_with(":- module(user).\n"));
        assert!(dump.contains("p(1).\n"));
    }

    #[tokio::test]
    async fn test_socket_answers() {
        let host = host();
        let peer = host.connect("alice").await.unwrap();

        let frame = answer(&host, "alice", "me", r#"{"ask": "X = 1"}"#).await;
        let Frame::Reply(reply) = frame else {
            panic!("expected a reply frame");
        };
        assert_eq!(reply.event, Event::Success);
        assert_eq!(peer.frames.try_recv().unwrap(), Frame::Reply(reply));

        let frame = answer(&host, "alice", "me", "not json").await;
        let Frame::Reply(reply) = frame else {
            panic!("expected a reply frame");
        };
        assert!(reply.is_error());

        let frame = answer(&host, "alice", "me", r#"{"next": true}"#).await;
        assert!(matches!(frame, Frame::Reply(ref r) if r.is_error()));
    }
}
