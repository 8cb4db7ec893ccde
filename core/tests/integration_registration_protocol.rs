// Integration test: registration with the BlueZ managers
//
// Drives application and advertisement registration against scripted
// manager responses:
// - Stale registrations are dropped and retried once
// - Topology is frozen from publication until unpublish
// - Unregister always clears local state
// - Advertising falls back through the configured steps

use async_trait::async_trait;
use gattkit_core::advertising::AdvertisingFallback;
use gattkit_core::bus::mock::MockBus;
use gattkit_core::bus::{BusConnection, BusError, ManagerCall, ObjectPath};
use gattkit_core::gatt::uuid;
use gattkit_core::{
    bluez, Advertisement, AdvertisementData, AdvertisementType, AdvertisingMode, Application,
    ApplicationState, BusContext, CharacteristicFlags, GattError, Permissions,
    RegistrationOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn context(mock: &Arc<MockBus>) -> BusContext {
    BusContext::new(mock.clone(), ObjectPath::new(bluez::DEFAULT_ADAPTER_PATH).unwrap())
        .with_options(RegistrationOptions {
            retry_delay: Duration::from_millis(5),
            ..RegistrationOptions::default()
        })
}

fn battery_app() -> Arc<Application> {
    let app = Application::new(ObjectPath::new("/com/gattkit").unwrap());
    let service = app.create_service(uuid::BATTERY_SERVICE, true).unwrap();
    let level = service
        .create_characteristic(
            uuid::BATTERY_LEVEL,
            CharacteristicFlags::READ | CharacteristicFlags::NOTIFY,
            Permissions::READ,
        )
        .unwrap();
    level.set_value(&[100]);
    app
}

fn member_names(mock: &MockBus) -> Vec<&'static str> {
    mock.calls().iter().map(|c| c.member()).collect()
}

#[tokio::test]
async fn test_stale_registration_is_replaced() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init()
        .ok();

    let mock = MockBus::new();
    let ctx = context(&mock);
    let app = battery_app();

    app.publish(ctx.bus()).await.unwrap();
    mock.push_response(Err(BusError::remote(
        bluez::ERROR_ALREADY_EXISTS,
        "Already Exists",
    )));

    app.register(&ctx).await.unwrap();
    assert_eq!(app.state(), ApplicationState::Registered);
    assert_eq!(
        member_names(&mock),
        vec![
            bluez::REGISTER_APPLICATION,
            bluez::UNREGISTER_APPLICATION,
            bluez::REGISTER_APPLICATION
        ]
    );
    println!("✓ AlreadyExists → unregister → retry");

    for call in mock.calls() {
        assert_eq!(call.path(), app.path());
    }
}

#[tokio::test]
async fn test_second_conflict_is_reported() {
    let mock = MockBus::new();
    let ctx = context(&mock);
    let app = battery_app();

    app.publish(ctx.bus()).await.unwrap();
    let conflict = BusError::remote(bluez::ERROR_ALREADY_EXISTS, "Already Exists");
    mock.push_response(Err(conflict.clone()));
    mock.push_response(Ok(()));
    mock.push_response(Err(conflict.clone()));

    let err = app.register(&ctx).await.unwrap_err();
    assert_eq!(err, GattError::Bus(conflict));
    assert_eq!(app.state(), ApplicationState::Published);
}

#[tokio::test]
async fn test_timeout_surfaces_without_retry() {
    let mock = MockBus::new();
    let ctx = context(&mock);
    let app = battery_app();

    app.publish(ctx.bus()).await.unwrap();
    mock.push_response(Err(BusError::Timeout(Duration::from_secs(10))));

    let err = app.register(&ctx).await.unwrap_err();
    assert!(matches!(err, GattError::Bus(BusError::Timeout(_))));
    assert_eq!(mock.calls().len(), 1);
    assert!(!app.is_registered());
}

#[tokio::test]
async fn test_topology_frozen_from_publish_until_unpublish() {
    let mock = MockBus::new();
    let ctx = context(&mock);
    let app = battery_app();

    app.publish(ctx.bus()).await.unwrap();

    // A late notify characteristic would be registered unexported and
    // without its CCCD
    let service = app.service(&uuid::BATTERY_SERVICE).unwrap();
    assert_eq!(
        service
            .create_characteristic(
                uuid::DEVICE_NAME,
                CharacteristicFlags::READ | CharacteristicFlags::NOTIFY,
                Permissions::READ,
            )
            .unwrap_err(),
        GattError::TopologyFrozen
    );
    println!("✓ Topology frozen once published");

    app.register(&ctx).await.unwrap();
    assert_eq!(
        app.create_service(uuid::DEVICE_INFORMATION_SERVICE, true)
            .unwrap_err(),
        GattError::TopologyFrozen
    );
    // Existing nodes are still handed back
    let existing = app.create_service(uuid::BATTERY_SERVICE, true).unwrap();
    assert_eq!(existing.uuid(), uuid::BATTERY_SERVICE);
    assert_eq!(
        existing
            .characteristics()[0]
            .create_descriptor(uuid::USER_DESCRIPTION, Permissions::READ)
            .unwrap_err(),
        GattError::TopologyFrozen
    );

    // Everything BlueZ can enumerate is exported
    let snapshot = app.managed_objects();
    assert_eq!(snapshot.len(), 3);
    for path in snapshot.keys() {
        assert!(mock.is_exported(path), "{} not exported", path);
    }
    println!("✓ Registered snapshot matches exported objects");

    app.unregister(&ctx).await.unwrap();
    assert_eq!(app.state(), ApplicationState::Published);
    assert_eq!(
        app.create_service(uuid::DEVICE_INFORMATION_SERVICE, true)
            .unwrap_err(),
        GattError::TopologyFrozen
    );

    app.unpublish(&ctx).await.unwrap();
    app.create_service(uuid::DEVICE_INFORMATION_SERVICE, true)
        .unwrap();
    println!("✓ Topology editable again after unpublish");
}

#[tokio::test]
async fn test_unregister_failure_still_clears_state() {
    let mock = MockBus::new();
    let ctx = context(&mock);
    let app = battery_app();

    app.publish(ctx.bus()).await.unwrap();
    app.register(&ctx).await.unwrap();

    mock.push_response(Err(BusError::remote(bluez::ERROR_FAILED, "adapter gone")));
    assert!(app.unregister(&ctx).await.is_err());
    assert!(!app.is_registered());

    // A second unregister is a no-op
    let before = mock.calls().len();
    app.unregister(&ctx).await.unwrap();
    assert_eq!(mock.calls().len(), before);
}

#[tokio::test]
async fn test_concurrent_register_calls_register_once() {
    let mock = MockBus::new();
    let ctx = context(&mock);
    let app = battery_app();
    app.publish(ctx.bus()).await.unwrap();

    let (a, b) = tokio::join!(app.register(&ctx), app.register(&ctx));
    a.unwrap();
    b.unwrap();

    let registrations = mock
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ManagerCall::RegisterApplication { .. }))
        .count();
    assert_eq!(registrations, 1);
}

struct CountingStep {
    name: &'static str,
    succeed: bool,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl AdvertisingFallback for CountingStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn enable(&self) -> Result<(), GattError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(())
        } else {
            Err(GattError::Failed(format!("{} unavailable", self.name)))
        }
    }
}

fn advertisement() -> Arc<Advertisement> {
    let mut data = AdvertisementData::new(AdvertisementType::Peripheral);
    data.set_local_name("GattKit");
    data.add_service_uuid(uuid::BATTERY_SERVICE);
    Advertisement::new(ObjectPath::new("/com/gattkit/advertisement0").unwrap(), data)
}

#[tokio::test]
async fn test_advertising_falls_back_in_order() {
    let mock = MockBus::new();
    let ctx = context(&mock);
    let adv = advertisement();
    adv.publish(ctx.bus()).await.unwrap();

    let first_runs = Arc::new(AtomicUsize::new(0));
    let second_runs = Arc::new(AtomicUsize::new(0));
    let third_runs = Arc::new(AtomicUsize::new(0));
    let steps: Vec<Arc<dyn AdvertisingFallback>> = vec![
        Arc::new(CountingStep {
            name: "first",
            succeed: false,
            runs: first_runs.clone(),
        }),
        Arc::new(CountingStep {
            name: "second",
            succeed: true,
            runs: second_runs.clone(),
        }),
        Arc::new(CountingStep {
            name: "third",
            succeed: true,
            runs: third_runs.clone(),
        }),
    ];
    adv.set_fallbacks(steps);

    mock.push_response(Err(BusError::remote(bluez::ERROR_FAILED, "Failed to register")));
    let mode = adv.register(&ctx).await.unwrap();

    assert_eq!(mode, AdvertisingMode::Fallback("second"));
    assert_eq!(first_runs.load(Ordering::SeqCst), 1);
    assert_eq!(second_runs.load(Ordering::SeqCst), 1);
    assert_eq!(third_runs.load(Ordering::SeqCst), 0);
    assert!(!adv.is_registered());
    println!("✓ Advertising enabled via {}", mode);
}

#[tokio::test]
async fn test_advertising_unavailable_when_every_step_fails() {
    let mock = MockBus::new();
    let ctx = context(&mock);
    let adv = advertisement();
    adv.publish(ctx.bus()).await.unwrap();

    adv.set_fallbacks(vec![Arc::new(CountingStep {
        name: "only",
        succeed: false,
        runs: Arc::new(AtomicUsize::new(0)),
    })]);

    mock.push_response(Err(BusError::remote(bluez::ERROR_FAILED, "Failed to register")));
    assert_eq!(
        adv.register(&ctx).await.unwrap_err(),
        GattError::AdvertisingUnavailable
    );
}

#[tokio::test]
async fn test_advertisement_release_and_reconfigure() {
    let mock = MockBus::new();
    let ctx = context(&mock);
    let adv = advertisement();
    adv.publish(ctx.bus()).await.unwrap();

    assert_eq!(adv.register(&ctx).await.unwrap(), AdvertisingMode::Registered);
    assert!(matches!(
        adv.configure(|data| data.set_appearance(0x0341)),
        Err(GattError::InvalidState(_))
    ));

    // BlueZ calls Release when it drops the advertisement
    adv.release();
    assert!(!adv.is_registered());
    adv.configure(|data| data.set_appearance(0x0341)).unwrap();
    assert!(adv.data().includes().iter().any(|i| i == "appearance"));
    assert_eq!(adv.data().local_name(), Some("GattKit"));
}

#[tokio::test]
async fn test_bus_handle_is_shared() {
    let mock = MockBus::new();
    let ctx = context(&mock);
    let bus: &Arc<dyn BusConnection> = ctx.bus();
    assert!(bus.managed_objects().await.unwrap().is_empty());
    assert_eq!(ctx.adapter_path().as_str(), "/org/bluez/hci0");
}
