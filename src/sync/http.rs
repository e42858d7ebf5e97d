//! Remote session store client
//!
//! Talks to an `encounterd` server: REST for load/save/clear and one
//! WebSocket per watched campaign for pushed changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode, Url};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{ChangeHub, SessionChange, SessionStore, SyncError};
use crate::combat::{CombatSessionState, SessionPatch};

/// How often an idle feed checks whether anyone is still listening
const FEED_IDLE_CHECK: Duration = Duration::from_secs(15);

type FeedSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running WebSocket feed for one campaign
struct Feed {
    id: u64,
    task: JoinHandle<()>,
}

type FeedMap = Arc<Mutex<HashMap<String, Feed>>>;

/// Session store served by a remote `encounterd`
pub struct HttpSessionStore {
    client: Client,
    base_url: Url,
    hub: Arc<ChangeHub>,
    feeds: FeedMap,
    next_feed_id: AtomicU64,
}

impl std::fmt::Debug for HttpSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSessionStore")
            .field("base_url", &self.base_url.as_str())
            .field("feeds", &self.feed_count())
            .finish()
    }
}

impl HttpSessionStore {
    /// Create a client for the server at `base_url` (e.g. "http://127.0.0.1:8080")
    pub fn new(base_url: &str) -> Result<Self, SyncError> {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a client reusing an existing HTTP client
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, SyncError> {
        let base_url =
            Url::parse(base_url).map_err(|e| SyncError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "{}: expected http or https",
                base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            hub: Arc::new(ChangeHub::default()),
            feeds: Arc::new(Mutex::new(HashMap::new())),
            next_feed_id: AtomicU64::new(0),
        })
    }

    /// Number of campaigns with an open WebSocket feed
    pub fn feed_count(&self) -> usize {
        self.feeds
            .lock()
            .values()
            .filter(|feed| !feed.task.is_finished())
            .count()
    }

    /// `<base>/campaigns/<id>/combat`
    fn document_url(&self, campaign_id: &str) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["campaigns", campaign_id, "combat"]);
        Ok(url)
    }

    /// `ws(s)://.../campaigns/<id>/combat/ws`
    fn feed_url(&self, campaign_id: &str) -> Result<Url, SyncError> {
        let mut url = self.document_url(campaign_id)?;
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?
            .push("ws");

        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| SyncError::InvalidUrl(url.to_string()))?;
        Ok(url)
    }

    /// Open the campaign's WebSocket unless one is already running
    async fn ensure_feed(&self, campaign_id: &str) -> Result<(), SyncError> {
        let running = self
            .feeds
            .lock()
            .get(campaign_id)
            .is_some_and(|feed| !feed.task.is_finished());
        if running {
            return Ok(());
        }

        let url = self.feed_url(campaign_id)?;
        let (socket, _) = connect_async(url.as_str()).await?;
        info!("Watching campaign {} at {}", campaign_id, url);

        let id = self.next_feed_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(run_feed(
            socket,
            campaign_id.to_string(),
            id,
            Arc::clone(&self.hub),
            Arc::clone(&self.feeds),
        ));

        let previous = self
            .feeds
            .lock()
            .insert(campaign_id.to_string(), Feed { id, task });
        if let Some(previous) = previous {
            previous.task.abort();
        }
        Ok(())
    }
}

impl Drop for HttpSessionStore {
    fn drop(&mut self) {
        for (_, feed) in self.feeds.lock().drain() {
            feed.task.abort();
        }
    }
}

/// Why a feed stopped
enum FeedEnd {
    /// Nobody is listening any more
    Abandoned,
    /// The server closed the socket or it failed
    Lost,
}

/// Relay one campaign's pushed changes into the local hub
async fn run_feed(
    socket: FeedSocket,
    campaign: String,
    id: u64,
    hub: Arc<ChangeHub>,
    feeds: FeedMap,
) {
    let (_write, mut read) = socket.split();
    let mut idle_check = tokio::time::interval(FEED_IDLE_CHECK);
    idle_check.tick().await;

    loop {
        let end = tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<SessionChange>(&text) {
                    Ok(change) => (hub.publish(&campaign, change) == 0).then_some(FeedEnd::Abandoned),
                    Err(e) => {
                        warn!("Bad change for campaign {}: {}", campaign, e);
                        None
                    }
                },
                Some(Ok(Message::Close(_))) | None => Some(FeedEnd::Lost),
                Some(Ok(_)) => None,
                Some(Err(e)) => {
                    warn!("Feed for campaign {} failed: {}", campaign, e);
                    Some(FeedEnd::Lost)
                }
            },
            _ = idle_check.tick() => {
                (hub.subscriber_count(&campaign) == 0).then_some(FeedEnd::Abandoned)
            }
        };

        let Some(end) = end else {
            continue;
        };

        // Decide under the feeds lock so a concurrent subscribe either sees
        // this feed running or finds it gone and connects a new one
        let stop = {
            let mut running = feeds.lock();
            let stop = match end {
                FeedEnd::Abandoned if hub.subscriber_count(&campaign) > 0 => false,
                FeedEnd::Abandoned => {
                    debug!("Feed for campaign {} has no listeners", campaign);
                    true
                }
                FeedEnd::Lost => {
                    warn!("Lost feed for campaign {}", campaign);
                    hub.close(&campaign);
                    true
                }
            };
            if stop && running.get(&campaign).is_some_and(|feed| feed.id == id) {
                running.remove(&campaign);
            }
            stop
        };
        if stop {
            break;
        }
    }
    debug!("Feed for campaign {} ended", campaign);
}

/// Turn a non-success reply into an error
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn load(&self, campaign_id: &str) -> Result<Option<CombatSessionState>, SyncError> {
        let response = self
            .client
            .get(self.document_url(campaign_id)?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check_status(response).await?.json().await?))
    }

    async fn save(
        &self,
        campaign_id: &str,
        patch: &SessionPatch,
    ) -> Result<CombatSessionState, SyncError> {
        let response = self
            .client
            .patch(self.document_url(campaign_id)?)
            .json(patch)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn clear(&self, campaign_id: &str) -> Result<(), SyncError> {
        let response = self
            .client
            .delete(self.document_url(campaign_id)?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        campaign_id: &str,
    ) -> Result<broadcast::Receiver<SessionChange>, SyncError> {
        // Subscribe locally first so nothing the feed delivers is missed
        let receiver = self.hub.subscribe(campaign_id);
        self.ensure_feed(campaign_id).await?;
        Ok(receiver)
    }
}
