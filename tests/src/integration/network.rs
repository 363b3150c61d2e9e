//! # TCP End to End
//!
//! Supervisors wired with the production TCP collaborators:
//!
//! ```text
//! SenderReceiver:  broker ◄── queue ─ bridge ──weak──► listener ◄── client
//!
//! FloatInner ── control tunnel ──► FloatOuter ──► listener ◄── client
//!      │
//!      └── queue ──► broker
//! ```

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bridge_runtime::adapters::{generate_dev_keys, write_key_material, TcpCollaborators};
    use bridge_runtime::testing::{BridgeFixture, TEST_TIMEOUT};
    use bridge_runtime::{BridgeConfig, Supervisor};
    use shared_bus::{
        ActiveSignal, BridgeEvent, EventFilter, EventTopic, InMemoryEventBus,
        Subscription,
    };
    use shared_types::BridgeMode;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    const IDENTITY: &str = "O=Bridge E2E, L=London, C=GB";

    async fn free_address() -> String {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap().to_string()
    }

    fn fixture() -> BridgeFixture {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        let config = fixture.config(BridgeMode::SenderReceiver);
        write_key_material(&config.key_material_path(), &generate_dev_keys(IDENTITY)).unwrap();
        fixture
    }

    fn tcp_supervisor(config: BridgeConfig) -> Arc<Supervisor> {
        let bus = Arc::new(InMemoryEventBus::new());
        let factory = TcpCollaborators::new(config.clone(), Arc::clone(&bus));
        Supervisor::with_bus(config, factory, bus)
    }

    fn float_listening(supervisor: &Supervisor) -> ActiveSignal {
        supervisor
            .with_topology(|t| t.float().map(|float| float.listening()))
            .flatten()
            .expect("topology has a float")
    }

    fn listener_address(supervisor: &Supervisor) -> String {
        supervisor
            .with_topology(|t| {
                let control = t.float()?.listener_control().upgrade()?;
                Some(control.address())
            })
            .flatten()
            .expect("listener is alive")
    }

    async fn wait_for_event<F>(events: &mut Subscription, mut matches: F) -> BridgeEvent
    where
        F: FnMut(&BridgeEvent) -> bool,
    {
        timeout(TEST_TIMEOUT, async {
            loop {
                match events.recv().await {
                    Some(event) if matches(&event) => return event,
                    Some(_) => {}
                    None => panic!("event bus closed"),
                }
            }
        })
        .await
        .expect("event not published in time")
    }

    #[tokio::test]
    async fn test_sender_receiver_over_tcp() {
        let fixture = fixture();
        let broker = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let mut config = fixture.config(BridgeMode::SenderReceiver);
        config.network.listen_address = "127.0.0.1:0".to_string();
        config.network.broker_address = broker.local_addr().unwrap().to_string();
        let supervisor = tcp_supervisor(config);
        let mut network = supervisor
            .event_bus()
            .subscribe(EventFilter::topics(vec![EventTopic::Network]));

        supervisor.start().await.unwrap();
        let (broker_side, _) = timeout(TEST_TIMEOUT, broker.accept()).await.unwrap().unwrap();

        let activated = wait_for_event(&mut network, |e| {
            matches!(e, BridgeEvent::ListenerActivated { .. })
        })
        .await;
        assert!(matches!(
            activated,
            BridgeEvent::ListenerActivated { identity, .. } if identity == IDENTITY
        ));
        timeout(TEST_TIMEOUT, supervisor.active_signal().wait_for(true))
            .await
            .unwrap();

        let _client = TcpStream::connect(listener_address(&supervisor)).await.unwrap();
        wait_for_event(&mut network, |e| {
            matches!(e, BridgeEvent::ConnectionAccepted { .. })
        })
        .await;

        // Losing the broker closes the public socket.
        drop(broker);
        drop(broker_side);
        timeout(TEST_TIMEOUT, float_listening(&supervisor).wait_for(false))
            .await
            .unwrap();
        timeout(TEST_TIMEOUT, supervisor.active_signal().wait_for(false))
            .await
            .unwrap();

        supervisor.stop().await;
        assert!(supervisor.exit_signal().is_resolved());
    }

    #[tokio::test]
    async fn test_split_float_over_control_channel() {
        let fixture = fixture();
        let broker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let control_address = free_address().await;

        let mut outer_config = fixture.config(BridgeMode::FloatOuter);
        outer_config.network.listen_address = "127.0.0.1:0".to_string();
        outer_config.network.control_address = control_address.clone();
        let outer = tcp_supervisor(outer_config);
        let mut outer_network = outer
            .event_bus()
            .subscribe(EventFilter::topics(vec![EventTopic::Network]));
        outer.start().await.unwrap();

        let mut inner_config = fixture.config(BridgeMode::FloatInner);
        inner_config.network.control_address = control_address;
        inner_config.network.broker_address = broker.local_addr().unwrap().to_string();
        let inner = tcp_supervisor(inner_config);
        inner.start().await.unwrap();
        let (broker_side, _) = timeout(TEST_TIMEOUT, broker.accept()).await.unwrap().unwrap();

        let activated = wait_for_event(&mut outer_network, |e| {
            matches!(e, BridgeEvent::ListenerActivated { .. })
        })
        .await;
        assert!(matches!(
            activated,
            BridgeEvent::ListenerActivated { identity, .. } if identity == IDENTITY
        ));
        timeout(TEST_TIMEOUT, inner.active_signal().wait_for(true))
            .await
            .unwrap();
        timeout(TEST_TIMEOUT, outer.active_signal().wait_for(true))
            .await
            .unwrap();

        let _client = TcpStream::connect(listener_address(&outer)).await.unwrap();
        wait_for_event(&mut outer_network, |e| {
            matches!(e, BridgeEvent::ConnectionAccepted { .. })
        })
        .await;

        // The controller loses its broker and tells the float to close.
        drop(broker);
        drop(broker_side);
        timeout(TEST_TIMEOUT, float_listening(&outer).wait_for(false))
            .await
            .unwrap();

        inner.stop().await;
        outer.stop().await;
        assert_eq!(inner.exit_signal().resolutions(), 1);
        assert_eq!(outer.exit_signal().resolutions(), 1);
    }

    #[tokio::test]
    async fn test_outer_float_follows_controller_restart() {
        let fixture = fixture();
        let broker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let control_address = free_address().await;

        let mut outer_config = fixture.config(BridgeMode::FloatOuter);
        outer_config.network.listen_address = "127.0.0.1:0".to_string();
        outer_config.network.control_address = control_address.clone();
        let outer = tcp_supervisor(outer_config);
        outer.start().await.unwrap();
        let listening = float_listening(&outer);

        let mut inner_config = fixture.config(BridgeMode::FloatInner);
        inner_config.network.control_address = control_address;
        inner_config.network.broker_address = broker.local_addr().unwrap().to_string();

        let inner = tcp_supervisor(inner_config.clone());
        inner.start().await.unwrap();
        let _first_broker_side = timeout(TEST_TIMEOUT, broker.accept()).await.unwrap().unwrap();
        timeout(TEST_TIMEOUT, listening.wait_for(true)).await.unwrap();

        // Without a live controller the float holds no keys.
        inner.stop().await;
        timeout(TEST_TIMEOUT, listening.wait_for(false)).await.unwrap();
        assert!(outer.is_active());

        let replacement = tcp_supervisor(inner_config);
        replacement.start().await.unwrap();
        let _second_broker_side = timeout(TEST_TIMEOUT, broker.accept()).await.unwrap().unwrap();
        timeout(TEST_TIMEOUT, listening.wait_for(true)).await.unwrap();

        replacement.stop().await;
        outer.stop().await;
    }
}
