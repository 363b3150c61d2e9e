//! # Parameter Verification Gates Startup
//!
//! Nothing network-facing is constructed unless the signed parameters verify
//! against the locally trusted root and the local platform is new enough.

#[cfg(test)]
mod tests {
    use bridge_runtime::parameters::{DevNetworkAuthority, NETWORK_PARAMETERS_FILE};
    use bridge_runtime::testing::BridgeFixture;
    use bridge_runtime::{
        LifecycleState, ParameterError, Supervisor, SupervisorError, PLATFORM_VERSION,
    };
    use shared_bus::{BridgeEvent, EventFilter, EventTopic};
    use shared_crypto::SignatureScheme;
    use shared_types::{BridgeMode, SignedNetworkParameters};

    fn assert_nothing_started(supervisor: &Supervisor) {
        assert_eq!(supervisor.state(), LifecycleState::Stopped);
        assert!(!supervisor.is_active());
        assert!(supervisor.running_services().is_empty());
        assert!(!supervisor.exit_signal().is_resolved());
    }

    #[tokio::test]
    async fn test_untrusted_signer_is_rejected_before_any_collaborator() {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        let collaborators = fixture.collaborators();
        let stranger = DevNetworkAuthority::generate(SignatureScheme::EcdsaSecp256k1);
        collaborators.trust(stranger.trust_root());

        for mode in BridgeMode::ALL {
            let supervisor = Supervisor::new(fixture.config(mode), collaborators.clone());
            let err = supervisor.start().await.unwrap_err();
            assert!(
                matches!(err, SupervisorError::Parameters(ParameterError::SignatureInvalid(_))),
                "{mode}: {err}"
            );
            assert_nothing_started(&supervisor);
        }
        assert_eq!(collaborators.created(), 0);
    }

    #[tokio::test]
    async fn test_newer_network_is_rejected() {
        let fixture = BridgeFixture::new(10_000, PLATFORM_VERSION + 1).unwrap();
        let collaborators = fixture.collaborators();
        let supervisor = Supervisor::new(
            fixture.config(BridgeMode::SenderReceiver),
            collaborators.clone(),
        );

        match supervisor.start().await {
            Err(SupervisorError::Parameters(ParameterError::VersionIncompatible {
                required,
                local,
            })) => {
                assert_eq!(required, PLATFORM_VERSION + 1);
                assert_eq!(local, PLATFORM_VERSION);
            }
            other => panic!("expected version rejection, got {other:?}"),
        }
        assert_nothing_started(&supervisor);
        assert_eq!(collaborators.created(), 0);
    }

    #[tokio::test]
    async fn test_tampered_parameters_are_rejected() {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        let path = fixture.path().join(NETWORK_PARAMETERS_FILE);
        let mut artifact: SignedNetworkParameters =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        // Keep the original signature, swap in different parameters.
        artifact.raw = fixture
            .authority()
            .sign(&DevNetworkAuthority::default_parameters(99_999, 1))
            .unwrap()
            .raw;
        std::fs::write(&path, serde_json::to_vec(&artifact).unwrap()).unwrap();

        let supervisor = Supervisor::new(
            fixture.config(BridgeMode::FloatOuter),
            fixture.collaborators(),
        );
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Parameters(ParameterError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_configuration_missing() {
        let fixture = BridgeFixture::new(10_000, 1).unwrap();
        std::fs::remove_file(fixture.path().join(NETWORK_PARAMETERS_FILE)).unwrap();

        let supervisor = Supervisor::new(
            fixture.config(BridgeMode::SenderReceiver),
            fixture.collaborators(),
        );
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Parameters(ParameterError::ConfigurationMissing(_))
        ));
        assert_nothing_started(&supervisor);

        // A failed start leaves the supervisor startable.
        fixture
            .authority()
            .write_artifacts(
                fixture.path(),
                &DevNetworkAuthority::default_parameters(10_000, 1),
            )
            .unwrap();
        supervisor.start().await.unwrap();
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_verified_parameters_are_announced() {
        let fixture = BridgeFixture::new(4_096, 1).unwrap();
        let supervisor = Supervisor::new(
            fixture.config(BridgeMode::FloatOuter),
            fixture.collaborators(),
        );
        let mut lifecycle = supervisor
            .event_bus()
            .subscribe(EventFilter::topics(vec![EventTopic::Lifecycle]));

        supervisor.start().await.unwrap();
        let verified = supervisor.verified_parameters().unwrap();
        assert_eq!(
            lifecycle.try_recv().unwrap(),
            Some(BridgeEvent::ParametersVerified {
                hash: verified.hash_hex(),
                epoch: verified.epoch(),
                max_message_size: 4_096,
            })
        );
        supervisor.stop().await;
    }
}
