use super::*;
use crate::feeder::{Category, MemoryFeeder, StaticTagger};
use crate::models::FieldValue;
use crate::profile::definition::{DeviceMeta, MetricsConfig, SymbolConfig};
use crate::profile::{ProfileConfig, ProfileDefinition, ProfileDefinitionMap};
use crate::scheduler::JobHandler;
use crate::session::mock::{MockSession, MockSessionFactory};
use crate::session::{SnmpValue, SnmpVersion};
use std::path::PathBuf;

fn profiles() -> ProfileDefinitionMap {
    let mut map = ProfileDefinitionMap::new();
    map.insert(
        "cisco".to_string(),
        ProfileConfig {
            definition_file: PathBuf::from("cisco.yaml"),
            definition: ProfileDefinition {
                metrics: vec![MetricsConfig {
                    symbol: SymbolConfig::new("1.3.6.1.4.1.9.9.48.1.1.1.5.1", "memory.used"),
                    ..Default::default()
                }],
                device: DeviceMeta {
                    vendor: "cisco".to_string(),
                },
                sys_object_ids: vec!["1.3.6.1.4.1.9.1.*".to_string()],
                ..Default::default()
            },
        },
    );
    map
}

fn agent() -> MockSession {
    MockSession::new(SnmpVersion::V2c)
        .with("1.3.6.1.2.1.1.2.0", SnmpValue::ObjectIdentifier("1.3.6.1.4.1.9.1.1208".into()))
        .with("1.3.6.1.2.1.1.3.0", SnmpValue::TimeTicks(4200))
        .with("1.3.6.1.2.1.1.5.0", SnmpValue::OctetString(b"core-1".to_vec()))
        .with("1.3.6.1.4.1.9.9.48.1.1.1.5.1", SnmpValue::Gauge32(30))
}

fn config() -> SnmpConfig {
    let mut config = SnmpConfig::default();
    config.profile = "cisco".to_string();
    config.tags.insert("site".to_string(), "lab".to_string());
    config
}

fn input(config: SnmpConfig, factory: &MockSessionFactory, feeder: &Arc<MemoryFeeder>) -> SnmpInput {
    SnmpInput::builder(config)
        .feeder(feeder.clone())
        .tagger(Arc::new(StaticTagger::with_host("agent-1")))
        .session_factory(Arc::new(factory.clone()))
        .profiles(ProfileStore::with_profiles(profiles()))
        .node_name("node-1")
        .build()
        .unwrap()
}

fn collector(input: &SnmpInput) -> Collector {
    let mut config = input.config.clone();
    config.validate().unwrap();
    Collector::new(input, DeviceConfig::from_config(&config), Arc::new(profiles())).unwrap()
}

#[test]
fn test_builder_requires_collaborators() {
    let err = SnmpInput::builder(SnmpConfig::default())
        .tagger(Arc::new(StaticTagger::default()))
        .session_factory(Arc::new(MockSessionFactory::new()))
        .build()
        .err()
        .unwrap();
    assert_eq!(err.to_string(), "feeder is required");

    let err = SnmpInput::builder(SnmpConfig::default())
        .feeder(Arc::new(MemoryFeeder::new()))
        .session_factory(Arc::new(MockSessionFactory::new()))
        .build()
        .err()
        .unwrap();
    assert_eq!(err.to_string(), "tagger is required");

    let err = SnmpInput::builder(SnmpConfig::default())
        .feeder(Arc::new(MemoryFeeder::new()))
        .tagger(Arc::new(StaticTagger::default()))
        .build()
        .err()
        .unwrap();
    assert_eq!(err.to_string(), "session_factory is required");
}

#[tokio::test]
async fn test_run_polls_static_devices_until_shutdown() {
    let ip: IpAddr = "10.0.0.1".parse().unwrap();
    let session = agent();
    let factory = MockSessionFactory::new();
    factory.register(ip, session.clone());
    let feeder = Arc::new(MemoryFeeder::new());

    let mut config = config();
    config.specific_devices = vec![ip.to_string()];
    let input = input(config, &factory, &feeder);
    let health = input.health();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(input.run(shutdown_rx));

    for _ in 0..200 {
        if !feeder.points(Category::Object).is_empty() && !feeder.points(Category::Metric).is_empty()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(health.readiness().await.ready);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert!(session.is_closed());
    assert!(!health.readiness().await.ready);

    let objects = feeder.points(Category::Object);
    assert_eq!(objects[0].measurement, "snmp_object");
    assert_eq!(objects[0].tags["host"], "10.0.0.1");
    assert_eq!(objects[0].tags["snmp_profile"], "cisco");
    assert_eq!(objects[0].tags["site"], "lab");
    let FieldValue::Str(meta) = &objects[0].fields["device_meta"] else {
        panic!("device_meta is not a string");
    };
    assert!(meta.contains("core-1"));

    let metrics = feeder.points(Category::Metric);
    assert_eq!(metrics[0].measurement, "snmp_metric");
    assert_eq!(metrics[0].tags["ip"], "10.0.0.1");
    assert!(!metrics[0].tags.contains_key("agent_host"));
    assert_eq!(metrics[0].fields["memoryUsed"], FieldValue::Float(30.0));
    assert!(feeder.errors().is_empty(), "{:?}", feeder.errors());
}

#[tokio::test]
async fn test_run_fails_on_invalid_config() {
    let factory = MockSessionFactory::new();
    let feeder = Arc::new(MemoryFeeder::new());
    let mut config = config();
    config.auto_discovery = vec!["10.0.0.0/99".to_string()];

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let err = input(config, &factory, &feeder).run(shutdown_rx).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn test_discovery_promotes_then_demotes() {
    let ip: IpAddr = "10.0.0.7".parse().unwrap();
    let session = agent();
    let factory = MockSessionFactory::new();
    factory.register(ip, session.clone());
    let feeder = Arc::new(MemoryFeeder::new());
    let input = input(config(), &factory, &feeder);
    let collector = collector(&input);
    let registry = input.registry();

    let discover = || Job::Discovery {
        ip,
        subnet: "10.0.0.0/24".to_string(),
    };

    collector.handle(discover()).await;
    assert!(registry.contains(&ip));
    let device = registry.get(&ip).unwrap();
    assert_eq!(device.lock().await.subnet(), "10.0.0.0/24");

    // already known
    collector.handle(discover()).await;
    assert_eq!(registry.len(), 1);

    collector
        .handle(Job::CollectMetric {
            ip,
            device: device.clone(),
        })
        .await;
    let metrics = feeder.points(Category::Metric);
    assert_eq!(metrics[0].tags["autodiscovery_subnet"], "10.0.0.0/24");

    session.fail_get_next(true);
    collector.handle(discover()).await;
    assert!(registry.is_empty());
    assert!(session.is_closed());

    // a job queued before the demotion stays quiet
    collector
        .handle(Job::CollectMetric { ip, device })
        .await;
    assert!(feeder.errors().is_empty(), "{:?}", feeder.errors());
}

#[tokio::test]
async fn test_unreachable_static_device_reports_error_and_object() {
    let ip: IpAddr = "10.0.0.9".parse().unwrap();
    let factory = MockSessionFactory::new();
    let feeder = Arc::new(MemoryFeeder::new());
    let input = input(config(), &factory, &feeder);
    let collector = collector(&input);

    let mut device = collector.new_device(ip, "");
    device.initialize().unwrap();
    let device = Arc::new(Mutex::new(device));

    collector
        .handle(Job::CollectObject {
            ip,
            device: device.clone(),
        })
        .await;
    let errors = feeder.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("10.0.0.9: snmp connection error"));

    let objects = feeder.points(Category::Object);
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].tags["host"], "10.0.0.9");

    collector.handle(Job::CollectMetric { ip, device }).await;
    assert!(feeder.points(Category::Metric).is_empty());
    assert_eq!(feeder.errors().len(), 2);
}

#[tokio::test]
async fn test_points_follow_key_mapping_and_tags_ignore() {
    let ip: IpAddr = "10.0.0.8".parse().unwrap();
    let factory = MockSessionFactory::new();
    factory.register(ip, agent());
    let feeder = Arc::new(MemoryFeeder::new());

    let mut config = config();
    config
        .oid_keys
        .insert("1.3.6.1.2.1.1.3.0".to_string(), "netUptime".to_string());
    config
        .key_mapping
        .insert("memory.used".to_string(), "used_memory".to_string());
    config
        .key_mapping
        .insert("site".to_string(), "location".to_string());
    config.tags_ignore = vec!["autodiscovery_subnet".to_string()];
    config.tags_ignore_regexp = vec!["^device_".to_string()];
    let input = input(config, &factory, &feeder);
    let collector = collector(&input);

    collector
        .handle(Job::Discovery {
            ip,
            subnet: "10.0.0.0/24".to_string(),
        })
        .await;
    let device = input.registry().get(&ip).unwrap();
    collector.handle(Job::CollectMetric { ip, device }).await;

    let metrics = feeder.points(Category::Metric);
    let row = metrics
        .iter()
        .find(|p| p.fields.contains_key("netUptime"))
        .unwrap();
    assert_eq!(row.fields["netUptime"], FieldValue::Float(4200.0));
    assert_eq!(row.fields["used_memory"], FieldValue::Float(30.0));
    assert!(!row.fields.contains_key("sysUpTimeInstance"));
    assert_eq!(row.tags["location"], "lab");
    assert!(!row.tags.contains_key("site"));
    assert!(!row.tags.contains_key("autodiscovery_subnet"));
    assert!(row.tags.keys().all(|k| !k.starts_with("device_")));
    assert_eq!(row.tags["ip"], "10.0.0.8");
}
