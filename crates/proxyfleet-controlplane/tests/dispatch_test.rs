use async_trait::async_trait;
use proxyfleet_config::MessageFormat;
use proxyfleet_container::mock::{Call, MockRuntime};
use proxyfleet_controlplane::{DispatchOutcome, Dispatcher, Inbound, Unacked};
use proxyfleet_core::{FleetController, Lifecycle, ProvisionPlan, WorkerTemplate};
use std::sync::atomic::{AtomicUsize, Ordering};

struct FakeDelivery {
    body: Vec<u8>,
    acks: AtomicUsize,
}

impl FakeDelivery {
    fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            acks: AtomicUsize::new(0),
        }
    }

    fn restart(endpoint: &str) -> Self {
        Self::new(format!(
            r#"{{"action":"restart","endpoint":"{}"}}"#,
            endpoint
        ))
    }

    fn acks(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Inbound for FakeDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn acknowledge(&self) -> proxyfleet_controlplane::Result<()> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn fleet(runtime: MockRuntime) -> FleetController<MockRuntime> {
    let lifecycle = Lifecycle::new();
    let mut controller = FleetController::new(runtime, WorkerTemplate::default());
    let plan = ProvisionPlan::new(3, 8000, "10.0.0.5").unwrap();
    controller.provision(&plan, &lifecycle.token()).await.unwrap();
    controller
}

#[tokio::test]
async fn test_restart_known_endpoint_is_acked() {
    let mut controller = fleet(MockRuntime::new()).await;
    let mut dispatcher = Dispatcher::new(MessageFormat::Auto);
    let delivery = FakeDelivery::restart("http://10.0.0.5:8001");

    let outcome = dispatcher.dispatch(&mut controller, &delivery).await;

    assert!(outcome.is_acked());
    assert_eq!(delivery.acks(), 1);
    assert_eq!(controller.runtime().restarts(), vec![8001]);
    assert_eq!(dispatcher.stats().acked, 1);
}

#[tokio::test]
async fn test_envelope_message_is_acked() {
    let mut controller = fleet(MockRuntime::new()).await;
    let mut dispatcher = Dispatcher::new(MessageFormat::Envelope);
    let delivery = FakeDelivery::new(
        r#"{"message":{"action":"restart","endpoint":"http://10.0.0.5:8002"}}"#,
    );

    assert!(dispatcher.dispatch(&mut controller, &delivery).await.is_acked());
    assert_eq!(controller.runtime().restarts(), vec![8002]);
}

#[tokio::test]
async fn test_unknown_endpoint_is_left_unacked() {
    let mut controller = fleet(MockRuntime::new()).await;
    let mut dispatcher = Dispatcher::new(MessageFormat::Auto);
    let delivery = FakeDelivery::restart("http://10.0.0.5:9999");

    let outcome = dispatcher.dispatch(&mut controller, &delivery).await;

    assert!(matches!(
        outcome,
        DispatchOutcome::Unacked(Unacked::UnknownEndpoint(ref e)) if e == "http://10.0.0.5:9999"
    ));
    assert_eq!(delivery.acks(), 0);
    assert!(controller.runtime().restarts().is_empty());
}

#[tokio::test]
async fn test_endpoint_must_match_exactly() {
    let mut controller = fleet(MockRuntime::new()).await;
    let mut dispatcher = Dispatcher::new(MessageFormat::Auto);

    for endpoint in ["10.0.0.5:8001", "http://10.0.0.5:8001/", "http://other:8001"] {
        let delivery = FakeDelivery::restart(endpoint);
        let outcome = dispatcher.dispatch(&mut controller, &delivery).await;
        assert!(!outcome.is_acked(), "{} should not match", endpoint);
    }
    assert!(controller.runtime().restarts().is_empty());
    assert_eq!(dispatcher.stats().unacked, 3);
}

#[tokio::test]
async fn test_unknown_action_is_left_unacked() {
    let mut controller = fleet(MockRuntime::new()).await;
    let mut dispatcher = Dispatcher::new(MessageFormat::Auto);
    let delivery =
        FakeDelivery::new(r#"{"action":"stop","endpoint":"http://10.0.0.5:8001"}"#);

    let outcome = dispatcher.dispatch(&mut controller, &delivery).await;

    assert!(matches!(
        outcome,
        DispatchOutcome::Unacked(Unacked::UnknownAction(ref a)) if a == "stop"
    ));
    assert_eq!(delivery.acks(), 0);
    assert!(controller.runtime().restarts().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_left_unacked() {
    let mut controller = fleet(MockRuntime::new()).await;
    let mut dispatcher = Dispatcher::new(MessageFormat::Auto);

    for body in [&b"not json"[..], b"\xff\xfe", br#"{"endpoint":"http://10.0.0.5:8001"}"#] {
        let delivery = FakeDelivery::new(body);
        let outcome = dispatcher.dispatch(&mut controller, &delivery).await;
        assert!(matches!(outcome, DispatchOutcome::Unacked(Unacked::Malformed(_))));
        assert_eq!(delivery.acks(), 0);
    }
    assert!(controller.runtime().restarts().is_empty());
}

#[tokio::test]
async fn test_strict_format_rejects_other_shape() {
    let mut controller = fleet(MockRuntime::new()).await;
    let mut dispatcher = Dispatcher::new(MessageFormat::Flat);
    let delivery = FakeDelivery::new(
        r#"{"message":{"action":"restart","endpoint":"http://10.0.0.5:8001"}}"#,
    );

    let outcome = dispatcher.dispatch(&mut controller, &delivery).await;

    assert!(matches!(outcome, DispatchOutcome::Unacked(Unacked::Malformed(_))));
    assert!(controller.runtime().restarts().is_empty());
}

#[tokio::test]
async fn test_failed_restart_is_left_unacked_and_fleet_survives() {
    let mut controller = fleet(MockRuntime::new().fail_restart_on(8001)).await;
    let mut dispatcher = Dispatcher::new(MessageFormat::Auto);

    let failing = FakeDelivery::restart("http://10.0.0.5:8001");
    let outcome = dispatcher.dispatch(&mut controller, &failing).await;
    assert!(matches!(outcome, DispatchOutcome::Unacked(Unacked::RestartFailed(_))));
    assert_eq!(failing.acks(), 0);

    // 後続のメッセージは通常通り処理される
    let next = FakeDelivery::restart("http://10.0.0.5:8002");
    assert!(dispatcher.dispatch(&mut controller, &next).await.is_acked());
    assert_eq!(controller.registry().len(), 3);
}

#[tokio::test]
async fn test_redelivery_restarts_again() {
    let mut controller = fleet(MockRuntime::new()).await;
    let mut dispatcher = Dispatcher::new(MessageFormat::Auto);

    for _ in 0..2 {
        let delivery = FakeDelivery::restart("http://10.0.0.5:8000");
        assert!(dispatcher.dispatch(&mut controller, &delivery).await.is_acked());
    }
    assert_eq!(controller.runtime().restarts(), vec![8000, 8000]);
}

#[tokio::test]
async fn test_restart_then_shutdown_tears_down_once() {
    let lifecycle = Lifecycle::new();
    let mut controller = FleetController::new(MockRuntime::new(), WorkerTemplate::default());
    let plan = ProvisionPlan::new(3, 8000, "10.0.0.5").unwrap();
    controller.provision(&plan, &lifecycle.token()).await.unwrap();

    let mut dispatcher = Dispatcher::new(MessageFormat::Auto);
    let known = FakeDelivery::restart("http://10.0.0.5:8001");
    let unknown = FakeDelivery::restart("http://10.0.0.5:9999");
    assert!(dispatcher.dispatch(&mut controller, &known).await.is_acked());
    assert!(!dispatcher.dispatch(&mut controller, &unknown).await.is_acked());
    assert_eq!((known.acks(), unknown.acks()), (1, 0));
    assert_eq!(controller.runtime().restarts(), vec![8001]);

    let report = lifecycle.finish(&mut controller, None).await.unwrap();
    assert_eq!(report.teardown.unwrap(), 3);
    assert!(lifecycle.finish(&mut controller, None).await.is_none());

    let runtime = controller.runtime();
    assert_eq!(runtime.count(|c| matches!(c, Call::Stop(_))), 3);
    assert_eq!(runtime.count(|c| matches!(c, Call::Remove(_))), 3);
}
