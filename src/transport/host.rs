use super::{DbOperation, Envelope, Request, Response};
use crate::store::ImageStore;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Why a launch did not start a new host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// A host is already serving; callers should just connect
    AlreadyActive,
    Failed(String),
}

/// Starts the privileged side and hands out its inbox
#[async_trait]
pub trait HostLauncher: Send + Sync {
    async fn launch(&self) -> Result<(), LaunchError>;

    /// Inbox of the running host, if any
    fn connect(&self) -> Option<mpsc::Sender<Envelope>>;
}

struct Running {
    inbox: mpsc::Sender<Envelope>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The long-lived owner of the image store.
///
/// Requests are handled one at a time by a single task, which serializes
/// every write to the store.
pub struct StoreHost {
    store: Arc<dyn ImageStore>,
    capacity: usize,
    running: Mutex<Option<Running>>,
}

impl StoreHost {
    pub fn new(store: Arc<dyn ImageStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            running: Mutex::new(None),
        }
    }

    /// Stop the host. Requests already queued are still answered; later
    /// ones find the channel closed.
    pub async fn shutdown(&self) {
        let running = match self.running.lock() {
            Ok(mut running) => running.take(),
            Err(_) => None,
        };

        if let Some(running) = running {
            let _ = running.stop.send(());
            if let Err(e) = running.task.await {
                ::log::error!("Store host task failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl HostLauncher for StoreHost {
    async fn launch(&self) -> Result<(), LaunchError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| LaunchError::Failed("host state poisoned".to_string()))?;

        if running.as_ref().is_some_and(|r| !r.inbox.is_closed()) {
            return Err(LaunchError::AlreadyActive);
        }

        let (inbox, rx) = mpsc::channel(self.capacity);
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(serve(Arc::clone(&self.store), rx, stop_rx));
        *running = Some(Running { inbox, stop, task });

        ::log::info!("Store host started");
        Ok(())
    }

    fn connect(&self) -> Option<mpsc::Sender<Envelope>> {
        self.running
            .lock()
            .ok()
            .and_then(|running| running.as_ref().map(|r| r.inbox.clone()))
    }
}

async fn serve(
    store: Arc<dyn ImageStore>,
    mut rx: mpsc::Receiver<Envelope>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                rx.close();
                while let Some(envelope) = rx.recv().await {
                    respond(store.as_ref(), envelope).await;
                }
                break;
            }
            envelope = rx.recv() => match envelope {
                Some(envelope) => respond(store.as_ref(), envelope).await,
                None => break,
            },
        }
    }
    ::log::info!("Store host stopped");
}

async fn respond(store: &dyn ImageStore, envelope: Envelope) {
    let response = handle(store, envelope.request).await;
    if envelope.reply.send(response).is_err() {
        ::log::debug!("Requester went away before the reply was sent");
    }
}

async fn handle(store: &dyn ImageStore, request: Request) -> Response {
    match request {
        Request::CacheImage(record) => match store.put(&record).await {
            Ok(outcome) => {
                ::log::debug!("Stored in cache: {:.8} ({:?})", record.content_hash, outcome);
                Response::Cached(Ok(outcome))
            }
            Err(e) => {
                ::log::error!("Cache error for {:.8}: {}", record.content_hash, e);
                Response::Cached(Err(e.to_string()))
            }
        },
        Request::Db(DbOperation::Count) => {
            Response::Count(store.count().await.map_err(|e| e.to_string()))
        }
        Request::Db(DbOperation::ListAll) => {
            Response::Images(store.list_all().await.map_err(|e| e.to_string()))
        }
        Request::Db(DbOperation::Clear) => {
            Response::Cleared(store.clear().await.map_err(|e| e.to_string()))
        }
    }
}
