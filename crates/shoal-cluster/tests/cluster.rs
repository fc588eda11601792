//! Cluster protocol scenarios against a live ZooKeeper ensemble.
//!
//! These tests drive real drivers end to end and are ignored by default:
//! run them with `cargo test -- --ignored` against an ensemble reachable at
//! `ZK_CLUSTER_TEST` (default `127.0.0.1:2181`). Each test isolates itself
//! under a fresh base znode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use shoal_cluster::{
    ClusterConfig, ClusterDelegate, Driver, Flow, JoinResult, Member, NodeId,
};

fn zk_addr() -> String {
    std::env::var("ZK_CLUSTER_TEST").unwrap_or_else(|_| "127.0.0.1:2181".to_string())
}

fn test_config() -> ClusterConfig {
    ClusterConfig {
        base: format!("/shoal-test-{}", uuid::Uuid::new_v4().simple()),
        ..ClusterConfig::default()
    }
}

fn node(id: &str) -> NodeId {
    NodeId::new(id).unwrap()
}

fn ids(members: &[Member]) -> Vec<String> {
    members
        .iter()
        .map(|member| member.node.as_str().to_string())
        .collect()
}

struct RecorderState {
    check_result: Mutex<JoinResult>,
    joins: Mutex<Vec<(String, Vec<String>, JoinResult)>>,
    leaves: Mutex<Vec<(String, Vec<String>)>>,
    notifies: Mutex<Vec<(String, Vec<u8>)>>,
    blocks: Mutex<Vec<String>>,
}

/// Delegate that records every callback and always blocks on BLOCK events.
#[derive(Clone)]
struct Recorder(Arc<RecorderState>);

impl Recorder {
    fn new() -> Self {
        Recorder(Arc::new(RecorderState {
            check_result: Mutex::new(JoinResult::Success),
            joins: Mutex::new(Vec::new()),
            leaves: Mutex::new(Vec::new()),
            notifies: Mutex::new(Vec::new()),
            blocks: Mutex::new(Vec::new()),
        }))
    }

    fn set_check_result(&self, result: JoinResult) {
        *self.0.check_result.lock() = result;
    }

    fn joins(&self) -> Vec<(String, Vec<String>, JoinResult)> {
        self.0.joins.lock().clone()
    }

    fn leaves(&self) -> Vec<(String, Vec<String>)> {
        self.0.leaves.lock().clone()
    }

    fn notifies(&self) -> Vec<(String, Vec<u8>)> {
        self.0.notifies.lock().clone()
    }

    fn blocks(&self) -> usize {
        self.0.blocks.lock().len()
    }
}

impl ClusterDelegate for Recorder {
    fn check_join(&self, _node: &NodeId, _opaque: &[u8]) -> JoinResult {
        *self.0.check_result.lock()
    }

    fn join_handler(&self, node: &NodeId, members: &[Member], result: JoinResult, _opaque: &[u8]) {
        self.0
            .joins
            .lock()
            .push((node.as_str().to_string(), ids(members), result));
    }

    fn leave_handler(&self, node: &NodeId, members: &[Member]) {
        self.0
            .leaves
            .lock()
            .push((node.as_str().to_string(), ids(members)));
    }

    fn block_handler(&self, node: &NodeId) -> bool {
        self.0.blocks.lock().push(node.as_str().to_string());
        true
    }

    fn notify_handler(&self, node: &NodeId, msg: &[u8]) {
        self.0
            .notifies
            .lock()
            .push((node.as_str().to_string(), msg.to_vec()));
    }
}

fn pump(drivers: &mut [&mut Driver], mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while !done() {
        assert!(
            Instant::now() < deadline,
            "cluster did not converge in time"
        );
        for driver in drivers.iter_mut() {
            driver.poll(Duration::from_millis(20)).unwrap();
        }
    }
}

fn pump_rounds(drivers: &mut [&mut Driver], rounds: usize) {
    for _ in 0..rounds {
        for driver in drivers.iter_mut() {
            driver.poll(Duration::from_millis(20)).unwrap();
        }
    }
}

/// Bootstrap a single-member cluster and return the pumped driver.
fn bootstrap(config: &ClusterConfig, id: &str, recorder: &Recorder) -> Driver {
    let mut driver = Driver::connect(
        &zk_addr(),
        config.clone(),
        Box::new(recorder.clone()),
    )
    .unwrap();
    driver.join(node(id), b"").unwrap();
    let rec = recorder.clone();
    pump(&mut [&mut driver], || !rec.joins().is_empty());
    driver
}

#[test]
#[ignore = "requires a ZooKeeper ensemble; set ZK_CLUSTER_TEST"]
fn bootstrap_first_joiner_becomes_master() {
    let config = test_config();
    let recorder = Recorder::new();
    let a = bootstrap(&config, "a-node", &recorder);

    let joins = recorder.joins();
    assert_eq!(
        joins,
        vec![(
            "a-node".to_string(),
            vec!["a-node".to_string()],
            JoinResult::Success
        )]
    );
    assert_eq!(a.stats().members, 1);
}

#[test]
#[ignore = "requires a ZooKeeper ensemble; set ZK_CLUSTER_TEST"]
fn second_joiner_is_admitted_by_the_master() {
    let config = test_config();
    let rec_a = Recorder::new();
    let rec_b = Recorder::new();
    let mut a = bootstrap(&config, "a-node", &rec_a);

    let mut b = Driver::connect(&zk_addr(), config.clone(), Box::new(rec_b.clone())).unwrap();
    b.join(node("b-node"), b"x").unwrap();
    let (ra, rb) = (rec_a.clone(), rec_b.clone());
    pump(&mut [&mut a, &mut b], || {
        ra.joins().len() >= 2 && !rb.joins().is_empty()
    });

    let both = vec!["a-node".to_string(), "b-node".to_string()];
    assert_eq!(
        rec_a.joins()[1],
        ("b-node".to_string(), both.clone(), JoinResult::Success)
    );
    assert_eq!(
        rec_b.joins(),
        vec![("b-node".to_string(), both, JoinResult::Success)]
    );
    assert_eq!(a.stats().members, 2);
    assert_eq!(b.stats().members, 2);
}

#[test]
#[ignore = "requires a ZooKeeper ensemble; set ZK_CLUSTER_TEST"]
fn notify_reaches_every_member_once() {
    let config = test_config();
    let rec_a = Recorder::new();
    let rec_b = Recorder::new();
    let mut a = bootstrap(&config, "a-node", &rec_a);
    let mut b = Driver::connect(&zk_addr(), config.clone(), Box::new(rec_b.clone())).unwrap();
    b.join(node("b-node"), b"").unwrap();
    let (ra, rb) = (rec_a.clone(), rec_b.clone());
    pump(&mut [&mut a, &mut b], || {
        ra.joins().len() >= 2 && !rb.joins().is_empty()
    });

    b.notify(b"hello").unwrap();
    let (ra, rb) = (rec_a.clone(), rec_b.clone());
    pump(&mut [&mut a, &mut b], || {
        !ra.notifies().is_empty() && !rb.notifies().is_empty()
    });
    // Settle and check there was exactly one delivery per node.
    pump_rounds(&mut [&mut a, &mut b], 10);
    let expected = vec![("b-node".to_string(), b"hello".to_vec())];
    assert_eq!(rec_a.notifies(), expected);
    assert_eq!(rec_b.notifies(), expected);
}

#[test]
#[ignore = "requires a ZooKeeper ensemble; set ZK_CLUSTER_TEST"]
fn block_stalls_delivery_until_unblock_publishes() {
    let config = test_config();
    let rec_a = Recorder::new();
    let rec_b = Recorder::new();
    let mut a = bootstrap(&config, "a-node", &rec_a);
    let mut b = Driver::connect(&zk_addr(), config.clone(), Box::new(rec_b.clone())).unwrap();
    b.join(node("b-node"), b"").unwrap();
    let (ra, rb) = (rec_a.clone(), rec_b.clone());
    pump(&mut [&mut a, &mut b], || {
        ra.joins().len() >= 2 && !rb.joins().is_empty()
    });

    a.block().unwrap();
    let (ra, rb) = (rec_a.clone(), rec_b.clone());
    pump(&mut [&mut a, &mut b], || ra.blocks() >= 1 && rb.blocks() >= 1);
    assert!(a.stats().blocked);

    // A notification appended behind the block must not be delivered yet.
    b.notify(b"z").unwrap();
    pump_rounds(&mut [&mut a, &mut b], 20);
    assert!(rec_a.notifies().is_empty());
    assert!(rec_b.notifies().is_empty());

    a.unblock(b"done").unwrap();
    assert!(!a.stats().blocked);
    let (ra, rb) = (rec_a.clone(), rec_b.clone());
    pump(&mut [&mut a, &mut b], || {
        ra.notifies().len() >= 2 && rb.notifies().len() >= 2
    });
    let expected = vec![
        ("a-node".to_string(), b"done".to_vec()),
        ("b-node".to_string(), b"z".to_vec()),
    ];
    assert_eq!(rec_a.notifies(), expected);
    assert_eq!(rec_b.notifies(), expected);
}

#[test]
#[ignore = "requires a ZooKeeper ensemble; set ZK_CLUSTER_TEST"]
fn survivors_skip_a_dead_blockers_event() {
    let config = test_config();
    let rec_a = Recorder::new();
    let rec_b = Recorder::new();
    let mut a = bootstrap(&config, "a-node", &rec_a);
    let mut b = Driver::connect(&zk_addr(), config.clone(), Box::new(rec_b.clone())).unwrap();
    b.join(node("b-node"), b"").unwrap();
    let (ra, rb) = (rec_a.clone(), rec_b.clone());
    pump(&mut [&mut a, &mut b], || {
        ra.joins().len() >= 2 && !rb.joins().is_empty()
    });

    a.block().unwrap();
    let (ra, rb) = (rec_a.clone(), rec_b.clone());
    pump(&mut [&mut a, &mut b], || ra.blocks() >= 1 && rb.blocks() >= 1);

    // The blocker goes away without ever unblocking; its ephemeral member
    // znode disappears and the survivor must step over the dead block.
    a.leave().unwrap();
    drop(a);
    let rb = rec_b.clone();
    pump(&mut [&mut b], || !rb.leaves().is_empty());
    assert_eq!(
        rec_b.leaves(),
        vec![("a-node".to_string(), vec!["b-node".to_string()])]
    );

    // Normal delivery resumes past the abandoned block.
    b.notify(b"after").unwrap();
    let rb = rec_b.clone();
    pump(&mut [&mut b], || !rb.notifies().is_empty());
    assert_eq!(
        rec_b.notifies(),
        vec![("b-node".to_string(), b"after".to_vec())]
    );
}

#[test]
#[ignore = "requires a ZooKeeper ensemble; set ZK_CLUSTER_TEST"]
fn master_transfer_hands_the_cluster_to_the_joiner() {
    let config = test_config();
    let rec_a = Recorder::new();
    let rec_c = Recorder::new();
    let mut a = bootstrap(&config, "a-node", &rec_a);
    rec_a.set_check_result(JoinResult::MasterTransfer);

    let mut c = Driver::connect(&zk_addr(), config.clone(), Box::new(rec_c.clone())).unwrap();
    c.join(node("c-node"), b"").unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    let mut a_shut_down = false;
    while rec_c.joins().is_empty() {
        assert!(Instant::now() < deadline, "transfer did not converge");
        if !a_shut_down {
            a_shut_down = a.poll(Duration::from_millis(20)).unwrap() == Flow::Shutdown;
        }
        c.poll(Duration::from_millis(20)).unwrap();
    }

    assert!(a_shut_down, "old master must shut down after the transfer");
    assert_eq!(
        rec_c.joins(),
        vec![(
            "c-node".to_string(),
            vec!["c-node".to_string()],
            JoinResult::MasterTransfer
        )]
    );
    assert_eq!(c.stats().members, 1);
}
