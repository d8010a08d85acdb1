//! WebSocket invocation plumbing.
//!
//! The transport (upgrade handshake, frame codec) is an external
//! collaborator; what the core owns is the lifecycle seam. A matched
//! websocket endpoint whose middleware chain completes without error yields
//! a [`WebSocketSession`]: the bundle of context plus handler that the
//! transport drives callback-by-callback. A chain error instead yields a
//! close frame carrying the structured error payload and "going away".

use crate::context::RequestContext;
use crate::error::{Result, WrapError};

pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint-side websocket lifecycle. Every callback receives the request
/// context; defaults are no-ops so handlers implement only what they use.
pub trait WebSocketHandler: Send + Sync {
    fn on_open(&self, _ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn on_text(&self, ctx: &mut RequestContext, text: &str) -> Result<()>;

    fn on_binary(&self, _ctx: &mut RequestContext, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn on_ping(&self, _ctx: &mut RequestContext, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    fn on_pong(&self, _ctx: &mut RequestContext, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    fn on_close(&self, _ctx: &mut RequestContext, _code: u16, _reason: &str) -> Result<()> {
        Ok(())
    }
}

/// A close frame handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub payload: String,
}

impl CloseFrame {
    /// The structured error close sent when middleware rejects the upgrade.
    pub fn from_error(err: &WrapError) -> Self {
        CloseFrame {
            code: CLOSE_GOING_AWAY,
            payload: err.json_body().to_string(),
        }
    }
}

/// Installed lifecycle callbacks: context + handler, driven by the
/// transport for the life of one connection.
pub struct WebSocketSession {
    ctx: RequestContext,
    handler: std::sync::Arc<dyn WebSocketHandler>,
}

impl WebSocketSession {
    pub(crate) fn new(
        ctx: RequestContext,
        handler: std::sync::Arc<dyn WebSocketHandler>,
    ) -> Self {
        WebSocketSession { ctx, handler }
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn open(&mut self) -> Result<()> {
        self.handler.clone().on_open(&mut self.ctx)
    }

    pub fn text(&mut self, text: &str) -> Result<()> {
        self.handler.clone().on_text(&mut self.ctx, text)
    }

    pub fn binary(&mut self, data: &[u8]) -> Result<()> {
        self.handler.clone().on_binary(&mut self.ctx, data)
    }

    pub fn ping(&mut self, payload: &[u8]) -> Result<()> {
        self.handler.clone().on_ping(&mut self.ctx, payload)
    }

    pub fn pong(&mut self, payload: &[u8]) -> Result<()> {
        self.handler.clone().on_pong(&mut self.ctx, payload)
    }

    pub fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.handler.clone().on_close(&mut self.ctx, code, reason)
    }
}
