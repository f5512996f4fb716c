//! Shutdown coordinator behavior under concurrent waiters

use std::time::Duration;

use podcast_batch_processor::shutdown::ShutdownCoordinator;

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownCoordinator::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    // Give the task time to start waiting
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// Requesting shutdown immediately before waiting must not deadlock: the
/// notified future is registered before the flag check.
#[tokio::test]
async fn shutdown_request_before_wait_returns_immediately() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_for_shutdown().await;
        true
    });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(
        result.is_ok(),
        "wait_for_shutdown() hung despite shutdown already requested"
    );
}

/// All concurrent waiters observe a single request.
#[tokio::test]
async fn shutdown_concurrent_waiters_all_notified() {
    let shutdown = ShutdownCoordinator::shared();

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let handle = shutdown.clone();
            tokio::spawn(async move {
                handle.wait_for_shutdown().await;
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "a waiter missed the shutdown notification");
    }
}

#[tokio::test]
async fn repeated_requests_are_harmless() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    shutdown.request_shutdown();
    assert!(shutdown.is_shutdown_requested());

    // Waiting after the fact still returns immediately.
    let result =
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait_for_shutdown()).await;
    assert!(result.is_ok());
}
