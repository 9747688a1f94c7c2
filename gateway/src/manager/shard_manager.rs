use super::{FatalError, GatewayBot, IdentifyQueue, LocalIdentifyQueue, ManagerOptions, ShardCount};
use crate::dispatch::{EventDispatchQueue, EventHandler};
use crate::gateway::{ConnectionState, GatewayError, Result, Shard, ShardOptions, StatusUpdate};
use parking_lot::Mutex;
use rest::RequestDispatcher;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Runs a range of shards, feeding their dispatches into one
/// [`EventDispatchQueue`].
pub struct ShardManager {
    options: ManagerOptions,
    rest: Arc<RequestDispatcher>,
    queue: EventDispatchQueue,
    shards: Mutex<HashMap<u16, ShardHandle>>,
    running: Mutex<Option<Running>>,
    error_tx: mpsc::Sender<FatalError>,
    error_rx: tokio::sync::Mutex<mpsc::Receiver<FatalError>>,
}

struct ShardHandle {
    shard: Arc<Shard>,
    task: JoinHandle<()>,
}

/// Settings resolved by [`ShardManager::start`], reused for restarts.
#[derive(Clone)]
struct Running {
    total: u16,
    shard_options: Arc<ShardOptions>,
    identify_queue: Arc<dyn IdentifyQueue>,
}

impl ShardManager {
    pub fn new<H: EventHandler>(options: ManagerOptions, rest: Arc<RequestDispatcher>, handler: H) -> ShardManager {
        let queue = EventDispatchQueue::new(handler, options.event_queue_capacity);
        let (error_tx, error_rx) = mpsc::channel(16);

        ShardManager {
            options,
            rest,
            queue,
            shards: Mutex::new(HashMap::new()),
            running: Mutex::new(None),
            error_tx,
            error_rx: tokio::sync::Mutex::new(error_rx),
        }
    }

    /// Spawns the shards selected by `count`. Identifies are spread out by the
    /// identify queue, so this returns before the shards are ready.
    pub async fn start(&self, count: ShardCount) -> Result<()> {
        if self.running.lock().is_some() {
            warn!("Shard manager already started");
            return Ok(());
        }

        let mut shard_options = self.options.shard.clone();

        let (total, identify_queue): (u16, Arc<dyn IdentifyQueue>) = match count {
            ShardCount::Auto => {
                let bot = GatewayBot::fetch(&self.rest).await?;
                info!(
                    shards = bot.shards,
                    max_concurrency = bot.session_start_limit.max_concurrency,
                    remaining = bot.session_start_limit.remaining,
                    "Fetched gateway info"
                );

                shard_options.gateway_url = bot.url;

                let queue = match &self.options.identify_queue {
                    Some(queue) => Arc::clone(queue),
                    None => Arc::new(LocalIdentifyQueue::from_limit(
                        &bot.session_start_limit,
                        self.options.identify_interval,
                    )),
                };

                (bot.shards.max(1), queue)
            }
            ShardCount::Fixed { total, .. } => {
                let queue = match &self.options.identify_queue {
                    Some(queue) => Arc::clone(queue),
                    None => Arc::new(LocalIdentifyQueue::new(
                        self.options.max_concurrency,
                        self.options.identify_interval,
                    )),
                };

                (total, queue)
            }
        };

        let running = Running {
            total,
            shard_options: Arc::new(shard_options),
            identify_queue,
        };

        let range = count.range(total);
        if range.is_empty() {
            warn!(?count, total, "No shards to start");
        }

        info!(lowest = range.start, highest = range.end, total, "Starting shards");

        {
            let mut shards = self.shards.lock();
            for shard_id in range {
                shards.insert(shard_id, self.spawn_shard(shard_id, &running));
            }
        }

        *self.running.lock() = Some(running);
        Ok(())
    }

    fn spawn_shard(&self, shard_id: u16, running: &Running) -> ShardHandle {
        let events = self.queue.register(shard_id, running.total);

        let shard = Shard::new(
            shard_id,
            running.total,
            Arc::clone(&running.shard_options),
            Arc::clone(&running.identify_queue),
            events,
        );

        let error_tx = self.error_tx.clone();
        let task = tokio::spawn({
            let shard = Arc::clone(&shard);
            async move {
                if let Err(e) = shard.run().await {
                    error!(shard_id, error = %e, "Shard stopped");

                    if error_tx.send(FatalError::new(shard_id, e)).await.is_err() {
                        warn!(shard_id, "Fatal error receiver dropped");
                    }
                }
            }
        });

        ShardHandle { shard, task }
    }

    /// Shuts every shard down and waits for their tasks to finish.
    pub async fn stop(&self) {
        let handles: Vec<_> = self.shards.lock().drain().collect();

        for (_, handle) in &handles {
            handle.shard.shutdown();
        }

        for (shard_id, handle) in handles {
            if let Err(e) = handle.task.await {
                warn!(shard_id, error = %e, "Shard task panicked");
            }
        }

        *self.running.lock() = None;
        info!("Stopped all shards");
    }

    /// Starts a shard again after it stopped. Returns false if the shard is
    /// unknown or still running.
    pub fn restart_shard(&self, shard_id: u16) -> bool {
        let running = match self.running.lock().clone() {
            Some(running) => running,
            None => return false,
        };

        let mut shards = self.shards.lock();
        match shards.get(&shard_id) {
            Some(handle) if handle.task.is_finished() => {}
            _ => return false,
        }

        info!(shard_id, "Restarting shard");
        shards.insert(shard_id, self.spawn_shard(shard_id, &running));
        true
    }

    /// Next error that made a shard give up.
    pub async fn recv_fatal_error(&self) -> Option<FatalError> {
        self.error_rx.lock().await.recv().await
    }

    pub fn state(&self, shard_id: u16) -> Option<ConnectionState> {
        self.shards.lock().get(&shard_id).map(|handle| handle.shard.state())
    }

    pub fn states(&self) -> BTreeMap<u16, ConnectionState> {
        self.shards
            .lock()
            .iter()
            .map(|(shard_id, handle)| (*shard_id, handle.shard.state()))
            .collect()
    }

    pub fn shard(&self, shard_id: u16) -> Option<Arc<Shard>> {
        self.shards.lock().get(&shard_id).map(|handle| Arc::clone(&handle.shard))
    }

    /// Total shard count across all processes, once started.
    pub fn total_shards(&self) -> Option<u16> {
        self.running.lock().as_ref().map(|running| running.total)
    }

    /// Resolves once every local shard is ready. Fails if a shard closes first.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let receivers: Vec<_> = self
            .shards
            .lock()
            .iter()
            .map(|(shard_id, handle)| (*shard_id, handle.shard.subscribe_state()))
            .collect();

        for (shard_id, mut rx) in receivers {
            let state = *rx
                .wait_for(|state| state.is_ready() || *state == ConnectionState::Closed)
                .await
                .map_err(|_| GatewayError::ShardClosed { shard_id })?;

            if state == ConnectionState::Closed {
                return GatewayError::ShardClosed { shard_id }.into();
            }
        }

        Ok(())
    }

    pub fn update_presence(&self, presence: StatusUpdate) {
        for handle in self.shards.lock().values() {
            handle.shard.update_presence(presence.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ShardEvent;
    use common::BackoffOptions;
    use futures_util::{SinkExt, StreamExt};
    use rest::DispatcherOptions;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    /// Accepts connections forever. Each one gets hello and, after identify,
    /// READY, unless `reject` is set, in which case it is closed with 4004.
    fn serve(listener: TcpListener, reject: Arc<Mutex<bool>>) {
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let reject = Arc::clone(&reject);
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    let reject = *reject.lock();
                    handle_connection(&mut ws, reject).await;
                });
            }
        });
    }

    async fn handle_connection(ws: &mut WebSocketStream<tokio::net::TcpStream>, reject: bool) {
        let hello = json!({"op": 10, "d": {"heartbeat_interval": 45000}});
        ws.send(Message::Text(hello.to_string())).await.unwrap();

        while let Some(Ok(message)) = ws.next().await {
            let text = match message {
                Message::Text(text) => text,
                _ => continue,
            };

            let payload: Value = serde_json::from_str(&text).unwrap();
            if payload["op"] != 2 {
                continue;
            }

            if reject {
                let frame = CloseFrame {
                    code: CloseCode::Library(4004),
                    reason: "Authentication failed.".into(),
                };
                let _ = ws.close(Some(frame)).await;
                continue;
            }

            let shard_id = payload["d"]["shard"][0].as_u64().unwrap();
            let ready = json!({
                "op": 0,
                "s": 1,
                "t": "READY",
                "d": {"session_id": format!("session-{shard_id}")}
            });
            ws.send(Message::Text(ready.to_string())).await.unwrap();
        }
    }

    async fn manager(reject: bool) -> (ShardManager, Arc<Mutex<bool>>, mpsc::Receiver<ShardEvent>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let reject = Arc::new(Mutex::new(reject));
        serve(listener, Arc::clone(&reject));

        let mut shard = ShardOptions::new("token", 1);
        shard.gateway_url = url;
        shard.backoff = BackoffOptions::from_millis(10, 50);

        let mut options = ManagerOptions::new(shard);
        options.identify_interval = Duration::ZERO;

        let rest = Arc::new(RequestDispatcher::new(DispatcherOptions::new("token")).unwrap());
        let (tx, rx) = mpsc::channel(64);

        (ShardManager::new(options, rest, tx), reject, rx)
    }

    #[tokio::test]
    async fn test_start_fixed_range() {
        let (manager, _, mut events) = manager(false).await;

        manager
            .start(ShardCount::Fixed {
                total: 4,
                lowest: 1,
                highest: 3,
            })
            .await
            .unwrap();

        timeout(Duration::from_secs(5), manager.wait_until_ready())
            .await
            .unwrap()
            .unwrap();

        let states = manager.states();
        assert_eq!(states.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert!(states.values().all(|state| state.is_ready()));
        assert_eq!(manager.total_shards(), Some(4));

        let mut seen = vec![events.recv().await.unwrap(), events.recv().await.unwrap()];
        seen.sort_by_key(|event| event.shard_id);
        assert_eq!(seen[0].shard_id, 1);
        assert_eq!(seen[1].shard_id, 2);
        assert!(seen.iter().all(|event| event.name == "READY" && event.shard_count == 4));

        assert_eq!(
            manager.shard(2).unwrap().session().session_id.as_deref(),
            Some("session-2")
        );

        manager.stop().await;
        assert!(manager.states().is_empty());
        assert_eq!(manager.state(1), None);
    }

    #[tokio::test]
    async fn test_fatal_error_and_restart() {
        let (manager, reject, _events) = manager(true).await;
        manager.start(ShardCount::all(1)).await.unwrap();

        let fatal = timeout(Duration::from_secs(5), manager.recv_fatal_error())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fatal.shard_id, 0);
        assert!(matches!(fatal.error, GatewayError::AuthenticationFailed));

        *reject.lock() = false;

        // the task finishes right after reporting
        timeout(Duration::from_secs(5), async {
            while !manager.restart_shard(0) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        timeout(Duration::from_secs(5), manager.wait_until_ready())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(manager.state(0), Some(ConnectionState::Ready));
        assert!(!manager.restart_shard(0));
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_wait_until_ready_fails_on_closed_shard() {
        let (manager, _, _events) = manager(true).await;
        manager.start(ShardCount::all(1)).await.unwrap();

        let err = timeout(Duration::from_secs(5), manager.wait_until_ready())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, GatewayError::ShardClosed { shard_id: 0 }));
    }
}
