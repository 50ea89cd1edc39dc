use ethers::types::U256;
use std::{path::Path, sync::Arc, time::Duration};
use swarm_node_client::{
    mock::{InstantSettlement, MockDialer, MockLauncher, MockNode},
    node::Topology,
    storage::{
        self, MemoryPreferences, RocksPreferences, BATCH_KEY, PASSWORD_KEY, SWAP_ENDPOINT_KEY,
    },
    BootstrapError, Bootstrapper, ContentError, Preferences, Provisioned, Provisioner, Settings,
    TopologyPoller,
};
use tokio::sync::watch;

fn settings() -> Settings {
    Settings::from_toml_str(
        r#"
        [provisioning]
        stamp_amount = "100000000"
        stamp_depth = "22"

        [topology]
        poll_interval_secs = 5
        "#,
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn testnet_node_from_bootstrap_to_download() {
    let node = MockNode::new()
        .with_balance(U256::from(3_000_000_000_000_000u64))
        .with_topology(Topology {
            connected: 8,
            population: 1200,
        });
    let prefs = MemoryPreferences::new();
    let bootstrapper = Bootstrapper::new(
        Arc::new(MockDialer::serving(5)),
        Arc::new(MockLauncher::starting(node.clone())),
        Arc::new(prefs.clone()),
    );

    let session = bootstrapper
        .start(Path::new("/bee"), "secret123", "https://goerli.example")
        .await
        .unwrap();
    assert_eq!(prefs.string(SWAP_ENDPOINT_KEY).unwrap(), "https://goerli.example");

    let settings = settings();
    let (_visible_tx, visible) = watch::channel(true);
    let poller = TopologyPoller::spawn(&session, settings.topology.poll_interval(), visible);

    // nothing to upload with yet
    let err = session.upload("a.txt", "text/plain", b"hello".to_vec()).await.unwrap_err();
    assert!(matches!(err, ContentError::SelectionRequired));

    let provisioner = Provisioner::new(settings.provisioning.clone())
        .with_settlement(Arc::new(InstantSettlement::default()));
    let outcome = provisioner.ensure_provisioned(&session).await.unwrap();
    let batch = match outcome {
        Provisioned::Purchased { batch, .. } => batch,
        other => panic!("expected a purchase, got {:?}", other),
    };
    assert_eq!(prefs.string(BATCH_KEY).unwrap(), batch.id.to_hex());
    assert_eq!(node.balance(), U256::zero());

    // provisioning again only looks at the batches
    let again = provisioner.ensure_provisioned(&session).await.unwrap();
    assert_eq!(again, Provisioned::Selected(batch.clone()));
    assert_eq!(node.calls().withdrawals.len(), 1);
    assert_eq!(node.calls().purchases.len(), 1);

    let record = session.upload("a.txt", "text/plain", b"hello".to_vec()).await.unwrap();
    let (name, data) = session.download_bytes(&record.reference).await.unwrap();
    assert_eq!(name, "a.txt");
    assert_eq!(data, b"hello".to_vec());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(
        poller.latest(),
        Topology {
            connected: 8,
            population: 1200
        }
    );

    poller.shutdown().await;
    session.shutdown().await.unwrap();
    assert_eq!(node.calls().shutdowns, 1);
}

#[tokio::test]
async fn preferences_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let prefs_path = dir.path().join("prefs");
    let node = MockNode::new().with_balance(U256::from(10u64));

    {
        let prefs = Arc::new(RocksPreferences::open(&prefs_path).unwrap());
        let session = Bootstrapper::new(
            Arc::new(MockDialer::serving(5)),
            Arc::new(MockLauncher::starting(node.clone())),
            prefs.clone(),
        )
        .start(dir.path(), "secret123", "http://rpc")
        .await
        .unwrap();

        Provisioner::new(settings().provisioning)
            .with_settlement(Arc::new(InstantSettlement::default()))
            .ensure_provisioned(&session)
            .await
            .unwrap();
        session.upload("one.txt", "text/plain", b"1".to_vec()).await.unwrap();
        session.upload("two.txt", "text/plain", b"2".to_vec()).await.unwrap();
        session.shutdown().await.unwrap();
    }

    let prefs = Arc::new(RocksPreferences::open(&prefs_path).unwrap());
    assert_eq!(prefs.string(PASSWORD_KEY).unwrap(), "secret123");
    let uploads = storage::load_uploads(prefs.as_ref()).unwrap();
    let names: Vec<_> = uploads.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["one.txt", "two.txt"]);

    let launcher = Arc::new(MockLauncher::starting(node.clone()));
    let dialer = Arc::new(MockDialer::serving(5));
    let session = Bootstrapper::new(dialer, launcher.clone(), prefs.clone())
        .resume(dir.path())
        .await
        .unwrap()
        .expect("saved credentials");
    assert_eq!(launcher.last_password().as_deref(), Some("secret123"));

    let outcome = Provisioner::new(settings().provisioning)
        .with_settlement(Arc::new(InstantSettlement::default()))
        .ensure_provisioned(&session)
        .await
        .unwrap();
    assert!(matches!(outcome, Provisioned::Selected(_)));
    assert_eq!(node.calls().withdrawals.len(), 1);
}

#[tokio::test]
async fn failed_restart_keeps_previous_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let prefs = Arc::new(RocksPreferences::open(dir.path().join("prefs")).unwrap());
    prefs
        .set_all(&[(PASSWORD_KEY, "secret123"), (SWAP_ENDPOINT_KEY, "http://rpc")])
        .unwrap();

    let err = Bootstrapper::new(
        Arc::new(MockDialer::serving(5)),
        Arc::new(MockLauncher::failing("database locked")),
        prefs.clone(),
    )
    .start(dir.path(), "other", "http://other")
    .await
    .unwrap_err();

    assert!(matches!(err, BootstrapError::RecoveryFailed { .. }));
    assert_eq!(prefs.string(PASSWORD_KEY).unwrap(), "secret123");
    assert_eq!(prefs.string(SWAP_ENDPOINT_KEY).unwrap(), "http://rpc");
}
