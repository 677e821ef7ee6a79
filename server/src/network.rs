//! Server network layer: HTTP routing, WebSocket upgrade and frame pumping

use crate::config::RoomConfig;
use crate::endpoint::{Connection, Outbound};
use crate::gateway::Gateway;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use shared::{close_code, Frame, RelayError, RoomId, UpgradeResponse, CREATE_ROUTE};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Query parameters accepted when joining a room
#[derive(Debug, Default, Deserialize)]
pub struct JoinParams {
    /// Player name; defaults to the room identifier
    pub name: Option<String>,
}

/// Builds the gateway's HTTP surface
///
/// Every method is answered. The create route may also sit below a prefix,
/// as in `/lobby/paranoia/create/<room-id>`; those requests reach the
/// fallback, which serves them the same way.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route(&format!("{}/{{room_id}}", CREATE_ROUTE), any(create_handler))
        .fallback(fallback_handler)
        .with_state(gateway)
}

async fn create_handler(
    State(gateway): State<Arc<Gateway>>,
    Path(room_id): Path<String>,
    Query(params): Query<JoinParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    serve_create(&gateway, &room_id, params, upgrade).await
}

/// Joins a room over WebSocket, or describes the room to plain HTTP callers
///
/// Plain callers never create a room; an unknown room reports no connections.
async fn serve_create(
    gateway: &Gateway,
    room_id: &str,
    params: JoinParams,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let room = match RoomId::parse(room_id) {
        Ok(room) => room,
        Err(e) => return error_response(e),
    };

    let Ok(upgrade) = upgrade else {
        let connections = gateway.find(&room).map_or(0, |handle| handle.member_count());
        return Json(UpgradeResponse::new(&room, connections)).into_response();
    };

    let name = params.name.unwrap_or_else(|| room.to_string());
    match gateway.resolve(&room).join(&name).await {
        Ok(connection) => upgrade.on_upgrade(move |socket| pump(socket, connection)),
        Err(e) => error_response(e),
    }
}

/// Serves prefixed create paths; anything else naming the create route is a malformed id
async fn fallback_handler(
    State(gateway): State<Arc<Gateway>>,
    uri: Uri,
    Query(params): Query<JoinParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let path = uri.path();
    if !path.contains(CREATE_ROUTE) {
        debug!("No route for {}", path);
        return StatusCode::NOT_FOUND.into_response();
    }

    match prefixed_room_id(path) {
        Some(room_id) => serve_create(&gateway, room_id, params, upgrade).await,
        None => {
            let raw = path.rsplit('/').next().unwrap_or_default();
            error_response(RelayError::InvalidIdentifier(raw.to_string()))
        }
    }
}

/// Room id of a path ending in `<anything>/paranoia/create/<room-id>`
fn prefixed_room_id(path: &str) -> Option<&str> {
    let marker = format!("{}/", CREATE_ROUTE);
    let start = path.rfind(&marker)? + marker.len();
    let room_id = &path[start..];

    RoomId::parse(room_id).is_ok().then_some(room_id)
}

fn error_response(error: RelayError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, error.to_string()).into_response()
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
    }
}

/// Moves frames between one WebSocket and its room connection until either side closes
async fn pump(socket: WebSocket, mut connection: Connection) {
    let (mut sink, mut stream) = socket.split();
    let id = connection.id();
    let room = connection.room_id().clone();
    let mut peer_closed = false;

    info!("WebSocket connection {} established in room {}", id, room);

    loop {
        tokio::select! {
            outbound = connection.recv() => match outbound {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = sink.send(to_message(frame)).await {
                        warn!("Failed to send to connection {}: {}", id, e);
                        let _ = connection.close(close_code::ABNORMAL, &e.to_string());
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: close_code::sendable(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!("Close frame for connection {} not sent: {}", id, e);
                    }
                    break;
                }
                None => break,
            },

            inbound = stream.next(), if !peer_closed => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if connection.send(Frame::Text(text.as_str().to_string())).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if connection.send(Frame::Binary(data.to_vec())).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (f.code, f.reason.as_str().to_string()))
                        .unwrap_or((close_code::NO_STATUS, String::new()));
                    peer_closed = true;
                    if connection.close(code, &reason).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error on connection {}: {}", id, e);
                    peer_closed = true;
                    if connection.close(close_code::ABNORMAL, &e.to_string()).is_err() {
                        break;
                    }
                }
                None => {
                    peer_closed = true;
                    if connection.close(close_code::ABNORMAL, "stream ended").is_err() {
                        break;
                    }
                }
            },
        }
    }

    info!("WebSocket connection {} in room {} finished", id, room);
}

/// HTTP server fronting a [`Gateway`]
pub struct Server {
    listener: TcpListener,
    gateway: Arc<Gateway>,
}

impl Server {
    pub async fn new(addr: &str, config: RoomConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            gateway: Arc::new(Gateway::new(config)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        Arc::clone(&self.gateway)
    }

    /// Serves requests until the listener fails
    pub async fn run(self) -> std::io::Result<()> {
        info!("Server started successfully");
        axum::serve(self.listener, router(self.gateway)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_path(app: Router, path: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn test_app() -> (Router, Arc<Gateway>) {
        let gateway = Arc::new(Gateway::new(RoomConfig::default()));
        (router(Arc::clone(&gateway)), gateway)
    }

    #[tokio::test]
    async fn test_invalid_room_id_is_bad_request() {
        let (app, gateway) = test_app();

        let (status, body) = get_path(app, "/paranoia/create/not-valid-id!").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8(body).unwrap().starts_with("Invalid UUID format"));
        assert_eq!(gateway.room_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_or_nested_room_id_is_bad_request() {
        for path in ["/paranoia/create", "/paranoia/create/", "/paranoia/create/ab/cd"] {
            let (app, _gateway) = test_app();
            let (status, _) = get_path(app, path).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "path {}", path);
        }
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        for path in ["/", "/paranoia", "/questions", "/paranoia/join/1a2b3c"] {
            let (app, _gateway) = test_app();
            let (status, body) = get_path(app, path).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "path {}", path);
            assert!(body.is_empty());
        }
    }

    #[tokio::test]
    async fn test_plain_request_returns_upgrade_description() {
        let (app, gateway) = test_app();

        let (status, body) = get_path(app, "/paranoia/create/1a2b3c").await;

        assert_eq!(status, StatusCode::OK);
        let response: UpgradeResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.id, "1a2b3c");
        assert_eq!(response.status, 101);
        assert_eq!(response.web_socket.path, "/paranoia/create/1a2b3c");
        assert_eq!(response.web_socket.connections, 0);
        assert_eq!(gateway.room_count(), 0);
    }

    #[tokio::test]
    async fn test_plain_requests_never_create_rooms() {
        let (_app, gateway) = test_app();

        for i in 0..50 {
            let app = router(Arc::clone(&gateway));
            let (status, _) = get_path(app, &format!("/paranoia/create/{:x}", i + 0x100)).await;
            assert_eq!(status, StatusCode::OK);
        }

        assert_eq!(gateway.room_count(), 0);
    }

    #[tokio::test]
    async fn test_plain_request_reports_members_of_existing_room() {
        let (app, gateway) = test_app();
        let _a = gateway.request_connection("1a2b3c", "alice").await.unwrap();
        let _b = gateway.request_connection("1a2b3c", "bob").await.unwrap();

        let (status, body) = get_path(app, "/paranoia/create/1a2b3c").await;

        assert_eq!(status, StatusCode::OK);
        let response: UpgradeResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.web_socket.connections, 2);
    }

    #[tokio::test]
    async fn test_prefixed_create_path_is_served() {
        let (app, gateway) = test_app();

        let (status, body) = get_path(app, "/x/paranoia/create/abc").await;

        assert_eq!(status, StatusCode::OK);
        let response: UpgradeResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.id, "abc");
        assert_eq!(gateway.room_count(), 0);
    }

    #[tokio::test]
    async fn test_any_method_reaches_create_route() {
        let (app, _gateway) = test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/paranoia/create/1a2b3c")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_prefixed_room_id() {
        assert_eq!(prefixed_room_id("/x/paranoia/create/abc"), Some("abc"));
        assert_eq!(prefixed_room_id("/paranoia/create/abc/paranoia/create/de-f"), Some("de-f"));
        assert_eq!(prefixed_room_id("/x/paranoia/create/ab/cd"), None);
        assert_eq!(prefixed_room_id("/x/paranoia/create/"), None);
        assert_eq!(prefixed_room_id("/x/paranoia/create"), None);
    }

    #[tokio::test]
    async fn test_uppercase_room_id_is_accepted() {
        let (app, _gateway) = test_app();

        let (status, _) = get_path(app, "/paranoia/create/ABC-123").await;

        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(RelayError::RoomFull {
            room: "1a".to_string(),
            capacity: 4,
        });
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_frame_to_message() {
        assert!(matches!(to_message(Frame::text("a")), Message::Text(_)));
        assert!(matches!(to_message(Frame::Binary(vec![1])), Message::Binary(_)));
    }
}
