use gateway::{await_shutdown, configure_observability, handler_fn, Config, HandlerError, ShardEvent, ShardManager};
use rest::RequestDispatcher;
use std::sync::Arc;
use tracing::{debug, error, info};

#[cfg(feature = "use-mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> gateway::Result<()> {
    let config = Config::from_envvar()?;
    let _guard = configure_observability(&config);

    #[cfg(feature = "metrics")]
    let _metrics = common::prometheus_server::start_server(config.metrics_addr.clone()).await?;

    let rest = Arc::new(RequestDispatcher::new(config.dispatcher_options())?);

    let handler = handler_fn(|event: ShardEvent| async move {
        debug!(shard_id = event.shard_id, seq = event.seq, event = %event.name, "Received event");
        Ok::<(), HandlerError>(())
    });

    let manager = Arc::new(ShardManager::new(config.manager_options(), Arc::clone(&rest), handler));
    manager.start(config.shard_count()).await?;

    let error_loop = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move {
            while let Some(fatal) = manager.recv_fatal_error().await {
                error!(shard_id = fatal.shard_id, error = %fatal.error, "Shard gave up");
            }
        }
    });

    await_shutdown().await?;

    info!("Shutting down");
    error_loop.abort();
    manager.stop().await;
    rest.close();

    Ok(())
}
