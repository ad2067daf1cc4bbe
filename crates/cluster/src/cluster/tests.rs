use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use codec_cluster_core::ClusterConfig;

use crate::cluster::Cluster;
use crate::node::{Node, ScheduleOutcome, Trigger};
use crate::state::NodeState;
use crate::task::WorkError;
use crate::types::{ClientType, Priority};

fn cluster(threads: usize, batch: usize) -> Cluster {
    let config = ClusterConfig::default()
        .with_thread_count(threads)
        .with_batch_size(batch);
    Cluster::new(4242, ClientType::DECODER, &config).unwrap()
}

fn attach(cluster: &Cluster, node: &Node, priority: Priority) {
    cluster.shared().attach(node.inner(), priority).unwrap();
}

fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

/// Holds a worker inside a node's work function until opened.
struct Gate {
    started: mpsc::Receiver<()>,
    release: Option<mpsc::Sender<()>>,
}

impl Gate {
    fn wait_started(&self) {
        self.started
            .recv_timeout(Duration::from_secs(5))
            .expect("gated node never started");
    }

    fn open(&mut self) {
        self.release.take();
    }
}

fn gated_node() -> (Node, Gate) {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let node = Node::with_work(move |_t: &Trigger| {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
        Ok(())
    });
    let gate = Gate {
        started: started_rx,
        release: Some(release_tx),
    };
    (node, gate)
}

fn recording_node(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Node {
    let log = Arc::clone(log);
    Node::with_work(move |_t: &Trigger| {
        log.lock().unwrap().push(label);
        Ok(())
    })
}

#[test]
fn attach_names_and_runs_node() {
    let cluster = cluster(1, 1);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let node = Node::with_work(move |_t: &Trigger| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    attach(&cluster, &node, Priority::P2);
    assert_eq!(node.id(), Some(0));
    assert_eq!(node.name(), Some("4242:dec:0"));
    assert_eq!(node.priority(), Some(Priority::P2));

    wait_for("first run", || runs.load(Ordering::SeqCst) == 1);
    wait_for("node idle", || node.state().is_idle());
    assert_eq!(node.state(), NodeState::VALID.with(NodeState::IDLE));

    // Detaching an idle node schedules it one last time
    let stats = node.detach();
    assert_eq!(stats.runs, 2);
    assert_eq!(stats.failures, 0);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn same_priority_runs_in_fifo_order() {
    let cluster = cluster(1, 1);
    let log = Arc::new(Mutex::new(Vec::new()));
    let (blocker, mut gate) = gated_node();
    attach(&cluster, &blocker, Priority::P0);
    gate.wait_started();

    let a = recording_node("A", &log);
    let b = recording_node("B", &log);
    attach(&cluster, &a, Priority::P1);
    attach(&cluster, &b, Priority::P1);
    assert_eq!(cluster.shared().metrics().queued[&Priority::P1], 2);

    gate.open();
    wait_for("both nodes", || log.lock().unwrap().len() == 2);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);

    a.detach();
    b.detach();
    blocker.detach();
}

#[test]
fn higher_priority_is_served_first() {
    let cluster = cluster(1, 1);
    let log = Arc::new(Mutex::new(Vec::new()));
    let (blocker, mut gate) = gated_node();
    attach(&cluster, &blocker, Priority::P0);
    gate.wait_started();

    let low = recording_node("low", &log);
    let high = recording_node("high", &log);
    attach(&cluster, &low, Priority::P1);
    attach(&cluster, &high, Priority::P0);

    gate.open();
    wait_for("both nodes", || log.lock().unwrap().len() == 2);
    assert_eq!(*log.lock().unwrap(), vec!["high", "low"]);

    low.detach();
    high.detach();
    blocker.detach();
}

#[test]
fn repeated_schedule_while_waiting_runs_once() {
    let cluster = cluster(1, 1);
    let (blocker, mut gate) = gated_node();
    attach(&cluster, &blocker, Priority::P0);
    gate.wait_started();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let node = Node::with_work(move |_t: &Trigger| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    attach(&cluster, &node, Priority::P1);
    for _ in 0..5 {
        assert_eq!(node.schedule(), ScheduleOutcome::Pending);
    }
    assert_eq!(cluster.shared().metrics().queued[&Priority::P1], 1);

    gate.open();
    wait_for("run", || runs.load(Ordering::SeqCst) == 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    node.detach();
    blocker.detach();
}

#[test]
fn schedule_during_run_gives_exactly_one_more_run() {
    let cluster = cluster(1, 1);
    let runs = Arc::new(AtomicUsize::new(0));
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let (counter, seen) = (Arc::clone(&runs), Arc::clone(&outcomes));
    let node = Node::with_work(move |t: &Trigger| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            let mut seen = seen.lock().unwrap();
            for _ in 0..5 {
                seen.push(t.schedule());
            }
        }
        Ok(())
    });

    attach(&cluster, &node, Priority::P1);
    wait_for("second run", || runs.load(Ordering::SeqCst) == 2);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    let outcomes = outcomes.lock().unwrap().clone();
    assert_eq!(outcomes[0], ScheduleOutcome::Signalled);
    assert!(outcomes[1..].iter().all(|o| *o == ScheduleOutcome::Pending));

    assert_eq!(node.stats().runs, 2);
    node.detach();
}

#[test]
fn batch_claims_several_nodes() {
    let cluster = cluster(1, 4);
    let log = Arc::new(Mutex::new(Vec::new()));
    let (blocker, mut gate) = gated_node();
    attach(&cluster, &blocker, Priority::P0);
    gate.wait_started();

    let nodes: Vec<Node> = ["n0", "n1", "n2"]
        .into_iter()
        .map(|label| recording_node(label, &log))
        .collect();
    for node in &nodes {
        attach(&cluster, node, Priority::P3);
    }
    gate.open();
    wait_for("batch", || log.lock().unwrap().len() == 3);
    assert_eq!(*log.lock().unwrap(), vec!["n0", "n1", "n2"]);

    for node in nodes {
        node.detach();
    }
    blocker.detach();
}

#[test]
fn detach_waits_for_running_work() {
    let cluster = cluster(1, 1);
    let (node, mut gate) = gated_node();
    attach(&cluster, &node, Priority::P1);
    gate.wait_started();

    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let detacher = thread::spawn(move || {
        let stats = node.detach();
        flag.store(true, Ordering::SeqCst);
        stats
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::SeqCst));

    gate.open();
    let stats = detacher.join().unwrap();
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(stats.runs, 1);
}

#[test]
fn detached_node_ignores_schedules() {
    let cluster = cluster(2, 1);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let node = Node::with_work(move |_t: &Trigger| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    attach(&cluster, &node, Priority::P0);
    let trigger = node.trigger();

    let stats = node.detach();
    let frozen = runs.load(Ordering::SeqCst);
    assert_eq!(stats.runs as usize, frozen);
    assert_eq!(trigger.state(), NodeState::empty());

    for _ in 0..10 {
        assert_eq!(trigger.schedule(), ScheduleOutcome::Ignored);
    }
    thread::sleep(Duration::from_millis(20));
    assert_eq!(runs.load(Ordering::SeqCst), frozen);
    assert_eq!(cluster.shared().node_count(), 0);
}

#[test]
fn failures_and_panics_are_contained() {
    let cluster = cluster(1, 1);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let node = Node::with_work(move |_t: &Trigger| {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Err(WorkError::Failed("device busy".into())),
            1 => panic!("decoder blew up"),
            _ => Ok(()),
        }
    });

    attach(&cluster, &node, Priority::P1);
    wait_for("failed run", || runs.load(Ordering::SeqCst) == 1);
    wait_for("idle after failure", || node.state().is_idle());
    node.schedule();
    wait_for("panicking run", || runs.load(Ordering::SeqCst) == 2);
    wait_for("idle after panic", || node.state().is_idle());
    node.schedule();
    wait_for("recovered run", || runs.load(Ordering::SeqCst) == 3);
    wait_for("idle after recovery", || node.state().is_idle());

    let stats = node.stats();
    assert_eq!(stats.runs, 3);
    assert_eq!(stats.failures, 2);

    let worker = &cluster.shared().metrics().workers[0];
    assert_eq!(worker.runs, 3);
    assert_eq!(worker.failures, 2);
    node.detach();
}

#[test]
fn replaced_work_runs_next_time() {
    let cluster = cluster(1, 1);
    let log = Arc::new(Mutex::new(Vec::new()));
    let node = recording_node("first", &log);
    attach(&cluster, &node, Priority::P1);
    wait_for("first", || log.lock().unwrap().len() == 1);
    wait_for("idle", || node.state().is_idle());

    let sink = Arc::clone(&log);
    node.set_work(move |_t| {
        sink.lock().unwrap().push("second");
        Ok(())
    });
    node.schedule();
    wait_for("second", || log.lock().unwrap().len() == 2);
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    node.detach();
}

#[test]
fn node_without_work_still_detaches() {
    let cluster = cluster(1, 1);
    let node = Node::new();
    attach(&cluster, &node, Priority::P2);
    assert_eq!(node.detach().runs, 0);
}

#[test]
fn idle_workers_park() {
    let cluster = cluster(3, 1);
    wait_for("all parked", || {
        cluster
            .shared()
            .metrics()
            .workers
            .iter()
            .all(|w| w.state == crate::WorkerState::Idle)
    });
}

#[test]
fn detach_while_waiting_still_gives_first_run() {
    let cluster = cluster(1, 1);
    let (blocker, mut gate) = gated_node();
    attach(&cluster, &blocker, Priority::P0);
    gate.wait_started();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let node = Node::with_work(move |_t: &Trigger| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    attach(&cluster, &node, Priority::P1);
    let trigger = node.trigger();
    assert!(trigger.state().is_waiting());

    let detacher = thread::spawn(move || node.detach());
    wait_for("detach requested", || !trigger.state().is_valid());
    // Still queued: detach does not add a second entry
    assert_eq!(cluster.shared().metrics().queued[&Priority::P1], 1);

    gate.open();
    let stats = detacher.join().unwrap();
    assert_eq!(stats.runs, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(trigger.state(), NodeState::empty());
    blocker.detach();
}

#[test]
fn detach_while_signalled_finalizes_after_current_run() {
    let cluster = cluster(1, 1);
    let (node, mut gate) = gated_node();
    attach(&cluster, &node, Priority::P1);
    gate.wait_started();

    let trigger = node.trigger();
    assert_eq!(trigger.schedule(), ScheduleOutcome::Signalled);
    assert!(trigger.state().contains(NodeState::SIGNAL));

    let detacher = thread::spawn(move || node.detach());
    wait_for("detach requested", || !trigger.state().is_valid());
    gate.open();

    // VALID is checked before SIGNAL once the run returns
    let stats = detacher.join().unwrap();
    assert_eq!(stats.runs, 1);
    assert_eq!(cluster.shared().metrics().total_queued(), 0);
}

#[test]
fn attach_after_close_is_rejected() {
    let cluster = cluster(1, 1);
    cluster.shared().close();

    let node = Node::with_work(|_t: &Trigger| Ok(()));
    assert_eq!(
        cluster.shared().attach(node.inner(), Priority::P0),
        Err(crate::ClusterError::RegistryClosed)
    );
    assert!(!node.is_attached());
    assert_eq!(cluster.shared().metrics().nodes_attached, 0);
    assert_eq!(cluster.shared().node_count(), 0);
}

#[test]
fn racing_attaches_of_one_node_draw_one_id() {
    let cluster = cluster(1, 1);
    let node = Node::with_work(|_t: &Trigger| Ok(()));
    let barrier = std::sync::Barrier::new(8);

    let wins = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    cluster.shared().attach(node.inner(), Priority::P2)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count()
    });

    assert_eq!(wins, 1);
    assert_eq!(node.id(), Some(0));
    assert_eq!(cluster.shared().metrics().nodes_attached, 1);
    assert_eq!(cluster.shared().node_count(), 1);

    let next = Node::new();
    attach(&cluster, &next, Priority::P2);
    assert_eq!(next.id(), Some(1));
    next.detach();
    node.detach();
}
