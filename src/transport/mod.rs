//! Request/response channel between the page context and the store host.
//!
//! Every request resolves to a value: success, a store failure, or a local
//! failure when the host is unreachable or the page context is gone.

pub mod host;

pub use host::{HostLauncher, LaunchError, StoreHost};

use crate::context::PageContext;
use crate::error::TransportError;
use crate::records::ImageRecord;
use crate::store::PutOutcome;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};

/// Queries against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbOperation {
    Count,
    ListAll,
    Clear,
}

#[derive(Debug)]
pub enum Request {
    CacheImage(ImageRecord),
    Db(DbOperation),
}

#[derive(Debug)]
pub enum Response {
    Cached(Result<PutOutcome, String>),
    Count(Result<u64, String>),
    Images(Result<Vec<ImageRecord>, String>),
    Cleared(Result<(), String>),
}

/// A request and the slot its reply goes to
#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// Lifecycle of the store host as seen from the page side
#[derive(Debug, Clone)]
pub enum ActivationState {
    NotStarted,
    Starting,
    Running(mpsc::Sender<Envelope>),
    Failed(String),
}

/// Page-side handle. Cheap to clone; clones share activation state.
#[derive(Clone)]
pub struct Transport {
    ctx: PageContext,
    launcher: Arc<dyn HostLauncher>,
    state: Arc<Mutex<ActivationState>>,
}

impl Transport {
    pub fn new(ctx: PageContext, launcher: Arc<dyn HostLauncher>) -> Self {
        Self {
            ctx,
            launcher,
            state: Arc::new(Mutex::new(ActivationState::NotStarted)),
        }
    }

    pub fn context(&self) -> &PageContext {
        &self.ctx
    }

    pub async fn activation_state(&self) -> ActivationState {
        self.state.lock().await.clone()
    }

    /// Make sure the host is running and return its inbox.
    ///
    /// Concurrent first callers queue on the state lock, so only one launch
    /// runs and the rest observe its result.
    async fn ensure_running(&self) -> Result<mpsc::Sender<Envelope>, TransportError> {
        let mut state = self.state.lock().await;

        match &*state {
            ActivationState::Running(tx) if !tx.is_closed() => return Ok(tx.clone()),
            ActivationState::Running(_) => return Err(self.torn_down()),
            ActivationState::Failed(reason) => {
                return Err(TransportError::Activation(reason.clone()));
            }
            ActivationState::NotStarted | ActivationState::Starting => {}
        }

        *state = ActivationState::Starting;
        let launched = match self.launcher.launch().await {
            Ok(()) => Ok(()),
            Err(LaunchError::AlreadyActive) => {
                ::log::debug!("Store host already active");
                Ok(())
            }
            Err(LaunchError::Failed(reason)) => Err(reason),
        };

        let result = launched.and_then(|()| {
            self.launcher
                .connect()
                .ok_or_else(|| "host reported running but has no inbox".to_string())
        });

        match result {
            Ok(tx) => {
                *state = ActivationState::Running(tx.clone());
                Ok(tx)
            }
            Err(reason) => {
                ::log::error!("Error starting store host: {}", reason);
                *state = ActivationState::Failed(reason.clone());
                Err(TransportError::Activation(reason))
            }
        }
    }

    /// The host side disappeared: latch the context so nothing else is sent
    fn torn_down(&self) -> TransportError {
        self.ctx.invalidate();
        TransportError::ChannelClosed
    }

    async fn request(&self, request: Request) -> Result<Response, TransportError> {
        self.ctx.check()?;
        let inbox = self.ensure_running().await?;
        self.ctx.check()?;

        let (reply, response) = oneshot::channel();
        if inbox.send(Envelope { request, reply }).await.is_err() {
            return Err(self.torn_down());
        }

        response.await.map_err(|_| self.torn_down())
    }

    /// Send a captured image to the store
    pub async fn submit(&self, record: ImageRecord) -> Result<PutOutcome, TransportError> {
        match self.request(Request::CacheImage(record)).await? {
            Response::Cached(result) => result.map_err(TransportError::Rejected),
            _ => Err(TransportError::UnexpectedReply),
        }
    }

    /// Run a query and return the raw response
    pub async fn query(&self, operation: DbOperation) -> Result<Response, TransportError> {
        self.request(Request::Db(operation)).await
    }

    pub async fn count(&self) -> Result<u64, TransportError> {
        match self.query(DbOperation::Count).await? {
            Response::Count(result) => result.map_err(TransportError::Rejected),
            _ => Err(TransportError::UnexpectedReply),
        }
    }

    pub async fn list_all(&self) -> Result<Vec<ImageRecord>, TransportError> {
        match self.query(DbOperation::ListAll).await? {
            Response::Images(result) => result.map_err(TransportError::Rejected),
            _ => Err(TransportError::UnexpectedReply),
        }
    }

    pub async fn clear(&self) -> Result<(), TransportError> {
        match self.query(DbOperation::Clear).await? {
            Response::Cleared(result) => result.map_err(TransportError::Rejected),
            _ => Err(TransportError::UnexpectedReply),
        }
    }
}
