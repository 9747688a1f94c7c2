use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Sends a tick every `duration`, the first one after `first_delay`. Stops
/// once the receiver is dropped.
pub fn timer(tx: mpsc::Sender<()>, duration: Duration, first_delay: Duration) {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + first_delay, duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = interval.tick() => {
                    if tx.send(()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_delay() {
        let (tx, mut rx) = mpsc::channel(1);
        let start = Instant::now();
        timer(tx, Duration::from_secs(10), Duration::from_secs(3));

        rx.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        rx.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(13));
    }
}
