//! Cluster configuration loading and wiring.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rangelink::{
    AddressParseError, ClusterConfig, ConfigError, FileRangeRepository, NEXT_RANGE_ATTRIBUTE,
    RangeRepository, RecordDn, RepositoryError, TokioTimeProvider, TransportError,
};
use rangelink_sim::{CapturingAuditSink, Providers, SimProviders};
use secrecy::SecretString;

fn document(repository: &Path, connectors: &str) -> String {
    format!(
        r#"{{
            "local_address": "ca1.example.com",
            "database": {{
                "base_dn": "o=pki-tomcat-CA",
                "serial": {{ "rdn": "ou=certificateRepository,ou=ca", "range_width": 1000, "low_water_mark": 100 }},
                "request": {{ "rdn": "ou=requests,ou=ca", "range_width": 500, "manual_increment": 1 }}
            }},
            "retry": {{ "max_attempts": 2, "initial_backoff_ms": 10, "max_backoff_ms": 20 }},
            "repository": {{ "path": {path} }},
            "connectors": {{ {connectors} }}
        }}"#,
        path = serde_json::to_string(&repository.display().to_string()).expect("path json"),
    )
}

fn write_config(dir: &Path, connectors: &str) -> std::path::PathBuf {
    let path = dir.join("cluster.json");
    std::fs::write(&path, document(&dir.join("ranges.json"), connectors)).expect("write config");
    path
}

#[test]
fn test_load_resolves_connectors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        r#""KRA": {
            "host": "kra1.example.com:8443 kra2.example.com:8443",
            "uri": "/kra/agent/kra/connector",
            "content_type": "application/json",
            "connect_timeout_secs": 5,
            "min_sessions": 1,
            "max_sessions": 4
        },
        "TKS": { "host": "tks.example.com", "port": 8443 }"#,
    );

    let config = ClusterConfig::load(&path).expect("load");
    assert_eq!(config.connectors.len(), 2);

    let (kra, kra_config) = config.connector_settings("KRA").expect("KRA");
    assert_eq!(kra.targets.len(), 2);
    assert_eq!(kra.uri.as_deref(), Some("/kra/agent/kra/connector"));
    assert_eq!(kra_config.connect_timeout, Duration::from_secs(5));
    assert_eq!(kra_config.send_timeout, Duration::from_secs(30));
    assert_eq!((kra_config.min_sessions, kra_config.max_sessions), (1, 4));
    assert_eq!(kra_config.local_address, "ca1.example.com");

    let (tks, tks_config) = config.connector_settings("TKS").expect("TKS");
    assert_eq!(tks.targets.get(0).map(|a| a.port), Some(8443));
    assert_eq!((tks_config.min_sessions, tks_config.max_sessions), (3, 15));

    assert!(matches!(
        config.connector_settings("OCSP"),
        Err(ConfigError::UnknownConnector(_))
    ));
}

#[test]
fn test_missing_port_in_list_fails_at_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        r#""KRA": { "host": "kra1.example.com:8443 kra2.example.com" }"#,
    );

    let err = ClusterConfig::load(&path).expect_err("malformed peer");
    match err {
        ConfigError::InvalidPeer { name, source } => {
            assert_eq!(name, "KRA");
            assert!(matches!(source, AddressParseError::MissingPort(_)));
        }
        other => panic!("expected InvalidPeer, got {other:?}"),
    }
}

#[test]
fn test_inverted_pool_fails_at_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        r#""KRA": { "host": "kra.example.com", "port": 8443, "min_sessions": 5, "max_sessions": 2 }"#,
    );

    let err = ClusterConfig::load(&path).expect_err("bad pool");
    assert!(matches!(
        err,
        ConfigError::InvalidConnector {
            source: TransportError::InvalidConfig(_),
            ..
        }
    ));
}

#[test]
fn test_counter_validation() {
    let zero_width = r#"{
        "database": {
            "base_dn": "o=ca",
            "serial": { "rdn": "ou=certs", "range_width": 0 },
            "request": { "rdn": "ou=requests", "range_width": 10 }
        },
        "repository": { "path": "ranges.json" }
    }"#;
    assert!(matches!(
        ClusterConfig::from_json(zero_width),
        Err(ConfigError::InvalidCounter {
            counter: "serial",
            ..
        })
    ));

    let half_range = r#"{
        "database": {
            "base_dn": "o=ca",
            "serial": { "rdn": "ou=certs", "range_width": 10 },
            "request": { "rdn": "ou=requests", "range_width": 10, "begin": 1 }
        },
        "repository": { "path": "ranges.json" }
    }"#;
    assert!(matches!(
        ClusterConfig::from_json(half_range),
        Err(ConfigError::InvalidCounter {
            counter: "request",
            ..
        })
    ));

    let typo = r#"{
        "database": {
            "base_dn": "o=ca",
            "serial": { "rdn": "ou=certs", "range_width": 10, "low_watermark": 2 },
            "request": { "rdn": "ou=requests", "range_width": 10 }
        },
        "repository": { "path": "ranges.json" }
    }"#;
    assert!(matches!(
        ClusterConfig::from_json(typo),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = ClusterConfig::load(dir.path().join("absent.json")).expect_err("missing");
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[tokio::test]
async fn test_allocator_extends_configured_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ClusterConfig::load(write_config(dir.path(), "")).expect("load");
    let secret = SecretString::from("Secret.123".to_string());
    FileRangeRepository::create(&config.repository.path, Some(&secret)).expect("create store");

    let repository = config.open_repository(Some(&secret)).expect("bind");
    let audit = Arc::new(CapturingAuditSink::new());
    let allocator = config
        .allocator(repository.clone(), TokioTimeProvider::new(), audit.clone())
        .expect("allocator");

    assert_eq!(allocator.allocate("serial").await.expect("serial"), 1);
    let request = allocator.force_extend("request").await.expect("bump");
    assert_eq!((request.start, request.end), (1, 1));

    let serial_record = RecordDn::compose("ou=certificateRepository,ou=ca", "o=pki-tomcat-CA");
    let request_record = RecordDn::compose("ou=requests,ou=ca", "o=pki-tomcat-CA");
    assert_eq!(
        repository
            .read(&serial_record, NEXT_RANGE_ATTRIBUTE)
            .await
            .expect("read"),
        Some("1001".to_string())
    );
    assert_eq!(
        repository
            .read(&request_record, NEXT_RANGE_ATTRIBUTE)
            .await
            .expect("read"),
        Some("2".to_string())
    );
    assert!(
        audit
            .events()
            .iter()
            .all(|event| event.local_address == "ca1.example.com")
    );
}

#[test]
fn test_open_repository_rejects_wrong_credential() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ClusterConfig::load(write_config(dir.path(), "")).expect("load");
    let secret = SecretString::from("Secret.123".to_string());
    FileRangeRepository::create(&config.repository.path, Some(&secret)).expect("create store");

    let wrong = SecretString::from("letmein".to_string());
    let err = config.open_repository(Some(&wrong)).expect_err("rejected");
    assert!(matches!(err, RepositoryError::AuthenticationFailed(_)));
}

#[tokio::test]
async fn test_start_connector_with_peer_down() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ClusterConfig::load(write_config(
        dir.path(),
        r#""KRA": { "host": "kra.example.com", "port": 8443, "min_sessions": 2, "max_sessions": 4 }"#,
    ))
    .expect("load");

    let providers = SimProviders::new();
    let network = providers.network().clone();
    let connector = config
        .start_connector("KRA", providers, Arc::new(CapturingAuditSink::new()))
        .await
        .expect("a down peer does not stop startup");

    assert_eq!(connector.peer().name, "KRA");
    assert_eq!(connector.pool().connected_count(), 0);
    assert_eq!(network.connect_attempts("kra.example.com:8443"), 1);
}
