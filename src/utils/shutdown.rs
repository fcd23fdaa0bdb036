use tokio::sync::watch;

/// Resolves once shutdown has been requested, or once every sender is gone.
pub async fn wait(signal: &mut watch::Receiver<bool>) {
    // An error means the sender was dropped, which also ends the task.
    let _ = signal.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::watch;

    use super::wait;

    #[tokio::test]
    async fn resolves_when_signalled() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait(&mut rx).await });

        tx.send(true).expect("receiver alive");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .expect("waiter task");
    }

    #[tokio::test]
    async fn resolves_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), wait(&mut rx))
            .await
            .expect("waiter finished");
    }

    #[tokio::test(start_paused = true)]
    async fn stays_pending_while_not_signalled() {
        let (_tx, mut rx) = watch::channel(false);

        let outcome = tokio::time::timeout(Duration::from_secs(5), wait(&mut rx)).await;

        assert!(outcome.is_err());
    }
}
