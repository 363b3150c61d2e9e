//! # Split-Trust Topology per Mode
//!
//! Each mode gets exactly the services it is allowed to hold, every framing
//! collaborator is built with the verified `max_message_size`, and the
//! listener is only ever reachable from the bridge through a weak handle.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Weak};

    use bridge_runtime::testing::{BridgeFixture, InMemoryCollaborators, TEST_TIMEOUT};
    use bridge_runtime::Supervisor;
    use shared_bus::{ActiveSignal, BridgeEvent, EventFilter, EventTopic};
    use shared_types::{BridgeMode, ControlCommand, ServiceId};
    use tokio::time::timeout;

    const MAX_MESSAGE_SIZE: u32 = 10_000;

    async fn start(
        mode: BridgeMode,
    ) -> (BridgeFixture, Arc<InMemoryCollaborators>, Arc<Supervisor>) {
        let fixture = BridgeFixture::new(MAX_MESSAGE_SIZE, 1).unwrap();
        let collaborators = fixture.collaborators();
        let supervisor = Supervisor::new(fixture.config(mode), collaborators.clone());
        supervisor.start().await.unwrap();
        (fixture, collaborators, supervisor)
    }

    fn float_listening(supervisor: &Supervisor) -> ActiveSignal {
        supervisor
            .with_topology(|t| t.float().map(|float| float.listening()))
            .flatten()
            .expect("topology has a float")
    }

    // =========================================================================
    // SENDER/RECEIVER
    // =========================================================================

    #[tokio::test]
    async fn test_sender_receiver_holds_float_and_bridge() {
        let (_fixture, collaborators, supervisor) = start(BridgeMode::SenderReceiver).await;

        assert_eq!(
            supervisor.running_services(),
            vec![
                ServiceId::Audit,
                ServiceId::FloatSupervisor,
                ServiceId::BridgeSupervisor
            ]
        );

        let (float_max, bridge_max, same_listener) = supervisor
            .with_topology(|t| {
                let float = t.float().unwrap();
                let bridge = t.bridge().unwrap();
                let from_bridge = bridge.listener_control().unwrap();
                (
                    float.max_message_size(),
                    bridge.max_message_size(),
                    Weak::ptr_eq(&from_bridge, &float.listener_control()),
                )
            })
            .unwrap();
        assert_eq!(float_max, MAX_MESSAGE_SIZE);
        assert_eq!(bridge_max, MAX_MESSAGE_SIZE);
        assert!(same_listener);

        assert_eq!(collaborators.listeners()[0].max_message_size_seen(), MAX_MESSAGE_SIZE);
        assert_eq!(collaborators.queues()[0].max_message_size_seen(), MAX_MESSAGE_SIZE);
        assert!(collaborators.tunnels().is_empty());
        assert!(collaborators.endpoints().is_empty());

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_sender_receiver_activates_local_listener() {
        let (_fixture, collaborators, supervisor) = start(BridgeMode::SenderReceiver).await;
        let listening = float_listening(&supervisor);

        timeout(TEST_TIMEOUT, listening.wait_for(true)).await.unwrap();
        let listener = &collaborators.listeners()[0];
        assert!(listener.activation_count() >= 1);
        assert!(listener.keys().is_some());

        collaborators.queues()[0].set_connected(false);
        timeout(TEST_TIMEOUT, listening.wait_for(false)).await.unwrap();
        assert!(listener.keys().is_none());
        assert!(!supervisor.is_active());

        collaborators.queues()[0].set_connected(true);
        timeout(TEST_TIMEOUT, supervisor.active_signal().wait_for(true))
            .await
            .unwrap();

        supervisor.stop().await;
        assert!(!listening.is_active());
    }

    // =========================================================================
    // FLOAT INNER (bridge controller)
    // =========================================================================

    #[tokio::test]
    async fn test_float_inner_never_holds_a_listener() {
        let (_fixture, collaborators, supervisor) = start(BridgeMode::FloatInner).await;

        assert_eq!(
            supervisor.running_services(),
            vec![ServiceId::Audit, ServiceId::BridgeSupervisor]
        );
        let (has_float, listener_handle) = supervisor
            .with_topology(|t| (t.float().is_some(), t.bridge().unwrap().listener_control()))
            .unwrap();
        assert!(!has_float);
        assert!(listener_handle.is_none());
        assert!(collaborators.listeners().is_empty());
        assert_eq!(collaborators.tunnels().len(), 1);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_float_inner_activates_remote_float() {
        let (_fixture, collaborators, supervisor) = start(BridgeMode::FloatInner).await;
        let tunnel = Arc::clone(&collaborators.tunnels()[0]);

        timeout(TEST_TIMEOUT, tunnel.wait_for_sent(1)).await.unwrap();
        let hash = supervisor.verified_parameters().unwrap().hash_hex();
        match &tunnel.sent()[0] {
            ControlCommand::Activate {
                max_message_size,
                parameters_hash,
                ..
            } => {
                assert_eq!(*max_message_size, MAX_MESSAGE_SIZE);
                assert_eq!(parameters_hash, &hash);
            }
            other => panic!("expected activation, got {other:?}"),
        }

        supervisor.stop().await;
        assert_eq!(tunnel.sent().last(), Some(&ControlCommand::Deactivate));
        assert_eq!(tunnel.stop_count(), 1);
    }

    // =========================================================================
    // FLOAT OUTER (public float)
    // =========================================================================

    #[tokio::test]
    async fn test_float_outer_holds_only_the_float() {
        let (_fixture, collaborators, supervisor) = start(BridgeMode::FloatOuter).await;

        assert_eq!(
            supervisor.running_services(),
            vec![ServiceId::Audit, ServiceId::FloatSupervisor]
        );
        assert!(collaborators.queues().is_empty());
        assert!(collaborators.tunnels().is_empty());
        assert_eq!(collaborators.endpoints().len(), 1);
        assert!(supervisor
            .with_topology(|t| t.float().unwrap().remotely_activated())
            .unwrap());

        timeout(TEST_TIMEOUT, supervisor.active_signal().wait_for(true))
            .await
            .unwrap();
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_float_outer_applies_matching_activation_only() {
        let (_fixture, collaborators, supervisor) = start(BridgeMode::FloatOuter).await;
        let mut control = supervisor
            .event_bus()
            .subscribe(EventFilter::topics(vec![EventTopic::Control]));
        let endpoint = Arc::clone(&collaborators.endpoints()[0]);
        let hash = supervisor.verified_parameters().unwrap().hash_hex();
        let keys = bridge_runtime::testing::test_keys();

        endpoint.push(ControlCommand::Activate {
            max_message_size: MAX_MESSAGE_SIZE * 2,
            parameters_hash: hash.clone(),
            keys: keys.clone(),
        });
        let rejected = timeout(TEST_TIMEOUT, control.recv()).await.unwrap();
        assert_eq!(
            rejected,
            Some(BridgeEvent::ControlCommandReceived {
                command: "activate".to_string(),
                accepted: false,
            })
        );
        assert_eq!(collaborators.listeners()[0].activation_count(), 0);

        endpoint.push(ControlCommand::Activate {
            max_message_size: MAX_MESSAGE_SIZE,
            parameters_hash: hash,
            keys,
        });
        timeout(TEST_TIMEOUT, float_listening(&supervisor).wait_for(true))
            .await
            .unwrap();

        endpoint.push(ControlCommand::Deactivate);
        timeout(TEST_TIMEOUT, float_listening(&supervisor).wait_for(false))
            .await
            .unwrap();

        supervisor.stop().await;
    }
}
