use crate::error::AppError;
use crate::middleware::auth::bearer_token;
use crate::services::MessageLedger;
use crate::state::AppState;
use crate::websocket::message_types::{WsInboundEvent, WsOutboundNotice};
use crate::websocket::{ChannelRegistry, SubscriberId};
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

// Frame produced outside the actor (e.g. an async handler) for this socket
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct TextMessage(String);

// WebSocket Actor: one per connection, joined to its user's channel
struct WsSession {
    user_id: Uuid,
    subscriber_id: SubscriberId,
    frames: Option<UnboundedReceiver<String>>,
    registry: ChannelRegistry,
    ledger: Arc<MessageLedger>,
    hb: Instant,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user_id = %act.user_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_event(&self, evt: WsInboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let ledger = self.ledger.clone();
        let user_id = self.user_id;
        let addr = ctx.address();

        actix::spawn(async move {
            let result = match evt {
                WsInboundEvent::Typing { recipient_id } => {
                    ledger.relay_typing(user_id, recipient_id).await
                }
                WsInboundEvent::Receipt { message_id, status } => ledger
                    .update_status(user_id, message_id, status)
                    .await
                    .map(|_| ()),
            };

            if let Err(e) = result {
                tracing::debug!(user_id = %user_id, error = %e, "WebSocket event rejected");
                if let Ok(notice) = serde_json::to_string(&WsOutboundNotice::Error {
                    message: e.to_string(),
                }) {
                    addr.do_send(TextMessage(notice));
                }
            }
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.user_id, "WebSocket session started");

        self.hb(ctx);

        // Frames routed to this user's channel are written to the socket
        if let Some(rx) = self.frames.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.user_id, "WebSocket session stopped");
        self.registry.leave(self.user_id, self.subscriber_id);
    }
}

impl StreamHandler<String> for WsSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }
}

impl Handler<TextMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: TextMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<WsInboundEvent>(&text) {
                    Ok(evt) => self.handle_event(evt, ctx),
                    Err(e) => {
                        tracing::warn!(user_id = %self.user_id, error = %e, "Failed to parse WS message");
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::debug!(user_id = %self.user_id, "binary frame ignored");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(user_id = %self.user_id, ?reason, "client closed the socket");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// GET /ws?token=<jwt> - Open the caller's live delivery channel
///
/// The token may also be sent as `Authorization: Bearer`. Authentication
/// fails before the upgrade, so a rejected client never joins a channel.
#[get("/ws")]
pub async fn ws_handler(
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
    req: HttpRequest,
    stream: web::Payload,
) -> Result<HttpResponse, Error> {
    let token = query
        .token
        .as_deref()
        .or_else(|| bearer_token(&req))
        .ok_or(AppError::Unauthorized)?;
    let user_id = state.jwt.verify(token)?;

    let (subscriber_id, frames) = state.registry.join(user_id);
    let session = WsSession {
        user_id,
        subscriber_id,
        frames: Some(frames),
        registry: state.registry.clone(),
        ledger: state.ledger.clone(),
        hb: Instant::now(),
    };

    let resp = ws::start(session, &req, stream);
    if resp.is_err() {
        // Upgrade failed; the actor never started, so leave here.
        state.registry.leave(user_id, subscriber_id);
    }
    resp
}
