//! Per-connection request metadata carried through the lifecycle pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};

/// Negotiated TLS parameters for connections arriving over HTTPS.
#[derive(Debug, Clone)]
pub struct TlsInfo {
    pub protocol: String,
    pub cipher: String,
}

/// Sends early informational (1xx) responses on the open connection.
///
/// Transports that cannot emit interim responses leave the context without
/// a responder, which turns `send_informational` into a no-op.
#[async_trait]
pub trait InformationalResponder: Send + Sync {
    async fn send(&self, status: StatusCode, headers: &HeaderMap) -> Result<()>;
}

/// Identity of one connection-request pairing.
///
/// Built by the transport when a request arrives, handed through hooks,
/// middleware, and handlers unchanged, and dropped once the response has
/// been written out. Cloning is cheap; the responder is shared.
#[derive(Clone)]
pub struct ConnectionContext {
    pub worker_id: Option<usize>,
    pub client_id: u64,
    pub remote_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
    pub tls: Option<TlsInfo>,
    informational: Option<Arc<dyn InformationalResponder>>,
}

impl ConnectionContext {
    pub fn new(client_id: u64) -> Self {
        Self {
            worker_id: None,
            client_id,
            remote_addr: None,
            local_addr: None,
            tls: None,
            informational: None,
        }
    }

    pub fn with_worker_id(mut self, worker_id: usize) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn with_tls(mut self, tls: TlsInfo) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_informational_responder(
        mut self,
        responder: Arc<dyn InformationalResponder>,
    ) -> Self {
        self.informational = Some(responder);
        self
    }

    /// Emits an interim 1xx response if the transport supports it.
    pub async fn send_informational(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Result<()> {
        match &self.informational {
            Some(responder) => responder.send(status, headers).await,
            None => Ok(()),
        }
    }
}
