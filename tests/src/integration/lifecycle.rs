//! # Supervisor Lifecycle
//!
//! Start/stop state machine, the aggregate active signal and the write-once
//! exit signal, driven through in-memory collaborators.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bridge_runtime::testing::{BridgeFixture, TEST_TIMEOUT};
    use bridge_runtime::{LifecycleState, StopReason, Supervisor, SupervisorError};
    use shared_bus::{BridgeEvent, EventFilter, EventTopic};
    use shared_types::{BridgeMode, ServiceId};
    use tokio::time::timeout;

    fn supervisor(fixture: &BridgeFixture, mode: BridgeMode) -> Arc<Supervisor> {
        Supervisor::new(fixture.config(mode), fixture.collaborators())
    }

    #[tokio::test]
    async fn test_second_start_is_already_running_in_every_mode() {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        for mode in BridgeMode::ALL {
            let supervisor = supervisor(&fixture, mode);
            supervisor.start().await.unwrap();
            assert!(matches!(
                supervisor.start().await,
                Err(SupervisorError::AlreadyRunning)
            ));
            supervisor.stop().await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_starts_admit_one_caller_in_every_mode() {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        for mode in BridgeMode::ALL {
            let collaborators = fixture.collaborators();
            let supervisor = Supervisor::new(fixture.config(mode), collaborators.clone());

            let mut starts = Vec::new();
            for _ in 0..16 {
                let supervisor = Arc::clone(&supervisor);
                starts.push(tokio::spawn(async move { supervisor.start().await }));
            }
            let mut admitted = 0;
            for start in starts {
                match start.await.unwrap() {
                    Ok(()) => admitted += 1,
                    Err(e) => assert!(matches!(e, SupervisorError::AlreadyRunning), "{e}"),
                }
            }

            assert_eq!(admitted, 1, "{mode}");
            // One topology: two collaborators in every mode.
            assert_eq!(collaborators.created(), 2, "{mode}");
            supervisor.stop().await;
        }
    }

    #[tokio::test]
    async fn test_active_follows_every_service() {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        let collaborators = fixture.collaborators();
        let supervisor = Supervisor::new(
            fixture.config(BridgeMode::SenderReceiver),
            collaborators.clone(),
        );
        let mut health = supervisor
            .event_bus()
            .subscribe(EventFilter::topics(vec![EventTopic::Health]));

        supervisor.start().await.unwrap();
        timeout(TEST_TIMEOUT, supervisor.active_signal().wait_for(true))
            .await
            .unwrap();

        collaborators.listeners()[0].set_ready(false);
        assert!(!supervisor.is_active());

        collaborators.listeners()[0].set_ready(true);
        timeout(TEST_TIMEOUT, supervisor.active_signal().wait_for(true))
            .await
            .unwrap();

        let mut float_changes = Vec::new();
        while let Ok(Some(event)) = health.try_recv() {
            if let BridgeEvent::ServiceActiveChanged {
                service: ServiceId::FloatSupervisor,
                active,
            } = event
            {
                float_changes.push(active);
            }
        }
        assert_eq!(float_changes, vec![true, false, true]);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_exit_resolves_once() {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        let supervisor = supervisor(&fixture, BridgeMode::FloatInner);
        let exit = supervisor.exit_signal();

        supervisor.stop().await;
        assert!(!exit.is_resolved());

        supervisor.start().await.unwrap();
        supervisor.stop().await;
        supervisor.stop().await;
        supervisor.stop().await;

        assert_eq!(exit.resolutions(), 1);
        assert_eq!(supervisor.state(), LifecycleState::Stopped);
        assert!(matches!(
            supervisor.start().await,
            Err(SupervisorError::Terminated)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stop_and_termination_resolve_once() {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        let collaborators = fixture.collaborators();
        let hook = collaborators.termination_hook();
        let supervisor = Supervisor::new(
            fixture.config(BridgeMode::SenderReceiver),
            collaborators.clone(),
        );
        supervisor.start().await.unwrap();
        let exit = supervisor.exit_signal();

        let mut stops = Vec::new();
        for _ in 0..16 {
            let supervisor = Arc::clone(&supervisor);
            stops.push(tokio::spawn(async move { supervisor.stop().await }));
        }
        hook.trigger();
        for stop in stops {
            stop.await.unwrap();
        }

        timeout(TEST_TIMEOUT, exit.wait()).await.unwrap().unwrap();
        assert_eq!(exit.resolutions(), 1);
        assert_eq!(collaborators.listeners()[0].stop_count(), 1);
        assert_eq!(collaborators.queues()[0].stop_count(), 1);
    }

    #[tokio::test]
    async fn test_termination_before_start_completes_still_stops() {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        let collaborators = fixture.collaborators();
        collaborators.termination_hook().trigger();
        let supervisor = Supervisor::new(
            fixture.config(BridgeMode::FloatOuter),
            collaborators.clone(),
        );

        supervisor.start().await.unwrap();
        let status = timeout(TEST_TIMEOUT, supervisor.exit_signal().wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.reason, StopReason::TerminationSignal);
        assert!(supervisor.is_terminated());
        assert_eq!(collaborators.endpoints()[0].stop_count(), 1);
    }

    #[tokio::test]
    async fn test_listener_start_failure_unwinds_audit() {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        let collaborators = fixture.collaborators();
        collaborators.fail_listener_start();
        let supervisor = Supervisor::new(
            fixture.config(BridgeMode::SenderReceiver),
            collaborators.clone(),
        );
        let mut lifecycle = supervisor
            .event_bus()
            .subscribe(EventFilter::topics(vec![EventTopic::Lifecycle]));

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::StartFailed {
                service: ServiceId::FloatSupervisor,
                ..
            }
        ));
        assert_eq!(supervisor.state(), LifecycleState::Stopped);
        assert!(collaborators.queues().iter().all(|q| q.start_count() == 0));

        let mut stopped = Vec::new();
        while let Ok(Some(event)) = lifecycle.try_recv() {
            if let BridgeEvent::ServiceStopped { service } = event {
                stopped.push(service);
            }
        }
        assert_eq!(stopped, vec![ServiceId::FloatSupervisor, ServiceId::Audit]);

        // The termination hook was released with the failed start.
        let hook = collaborators.termination_hook();
        timeout(TEST_TIMEOUT, async {
            while hook.waiting() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_exit_signal_without_supervisor_resolves_none() {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        let supervisor = supervisor(&fixture, BridgeMode::SenderReceiver);
        let exit = supervisor.exit_signal();
        drop(supervisor);

        assert!(exit.supervisor().is_none());
        assert_eq!(exit.wait().await, None);
    }
}
