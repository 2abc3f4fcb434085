//! Deterministic simulation of several baton engines
//!
//! A discrete-event loop with a virtual clock drives every engine. Message
//! delays, loss, duplication and the engines' own timing jitter all come from
//! seeded generators, so a failing seed replays exactly. After every event
//! the harness checks that at most one live instance holds the baton and
//! records every ballot a majority of acceptors agreed on.

use crate::engine::{BatonEngine, Effect, Phase};
use baton_core::{Ballot, BallotId, BatonConfig, BatonName, InstanceId};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_millis(100);
const RECHECK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct SimConfig {
    seed: u64,
    nodes: usize,
    use_optimizations: bool,
    min_delay_ms: u64,
    max_delay_ms: u64,
    duplicate_probability: f64,
    drop_probability: f64,
    /// Lose exactly this delivery, counted from 1 across the whole run
    drop_nth: Option<u64>,
}

impl SimConfig {
    fn new(seed: u64) -> Self {
        Self {
            seed,
            nodes: 3,
            use_optimizations: true,
            min_delay_ms: 1,
            max_delay_ms: 10,
            duplicate_probability: 0.0,
            drop_probability: 0.0,
            drop_nth: None,
        }
    }

    fn unoptimized(mut self) -> Self {
        self.use_optimizations = false;
        self
    }

    fn duplicating(mut self, probability: f64) -> Self {
        self.duplicate_probability = probability;
        self
    }

    fn lossy(mut self, probability: f64) -> Self {
        self.drop_probability = probability;
        self
    }

    fn dropping_nth(mut self, nth: u64) -> Self {
        self.drop_nth = Some(nth);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Elected,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Record {
    at: Duration,
    node: usize,
    kind: Kind,
}

#[derive(Debug)]
enum Event {
    Start(usize),
    Deliver {
        node: usize,
        topic: String,
        payload: Vec<u8>,
    },
    ElectionTimeout {
        node: usize,
        epoch: u64,
    },
    Recheck(usize),
    Propose(usize),
    Claim(usize),
    Release(usize),
    Kill(usize),
}

struct SimNode {
    engine: BatonEngine,
    topics: HashSet<String>,
    alive: bool,
}

struct Sim {
    config: SimConfig,
    base: Instant,
    clock: Duration,
    shared_clock: Arc<Mutex<Duration>>,
    seq: u64,
    deliveries: u64,
    dropped: u64,
    queue: BTreeMap<(Duration, u64), Event>,
    nodes: Vec<SimNode>,
    rng: StdRng,
    dead: Arc<RwLock<HashSet<String>>>,
    log: Arc<Mutex<Vec<Record>>>,
    accepted_ever: HashSet<Ballot>,
    chosen: BTreeMap<BallotId, Option<InstanceId>>,
}

impl Sim {
    fn new(config: SimConfig) -> Self {
        let dead: Arc<RwLock<HashSet<String>>> = Arc::new(RwLock::new(HashSet::new()));
        let mut nodes = Vec::with_capacity(config.nodes);

        for i in 0..config.nodes {
            let oracle_dead = dead.clone();
            let oracle = move |id: &InstanceId| !oracle_dead.read().contains(id.as_str());
            let baton_config = BatonConfig::new("tank")
                .with_instance_id(node_name(i))
                .with_election_timeout(TIMEOUT)
                .with_recheck_interval(RECHECK)
                .with_optimizations(config.use_optimizations);
            let engine = BatonEngine::with_rng(
                &baton_config,
                InstanceId::new(node_name(i)),
                Arc::new(oracle),
                StdRng::seed_from_u64(config.seed * 100 + i as u64),
            )
            .unwrap();
            let topics = engine.subscriptions().into_iter().collect();
            nodes.push(SimNode {
                engine,
                topics,
                alive: true,
            });
        }

        let mut sim = Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            base: Instant::now(),
            clock: Duration::ZERO,
            shared_clock: Arc::new(Mutex::new(Duration::ZERO)),
            seq: 0,
            deliveries: 0,
            dropped: 0,
            queue: BTreeMap::new(),
            nodes,
            dead,
            log: Arc::new(Mutex::new(Vec::new())),
            accepted_ever: HashSet::new(),
            chosen: BTreeMap::new(),
        };
        for i in 0..sim.nodes.len() {
            sim.schedule(Duration::ZERO, Event::Start(i));
            sim.schedule(RECHECK, Event::Recheck(i));
        }
        sim
    }

    fn schedule(&mut self, at: Duration, event: Event) {
        self.seq += 1;
        self.queue.insert((at, self.seq), event);
    }

    fn at_ms(&mut self, ms: u64, event: Event) {
        self.schedule(Duration::from_millis(ms), event);
    }

    fn run_until_ms(&mut self, ms: u64) {
        let end = Duration::from_millis(ms);
        while let Some((&(at, _), _)) = self.queue.first_key_value() {
            if at > end {
                break;
            }
            self.step();
        }
        self.clock = end;
    }

    fn step(&mut self) {
        let Some(((at, _), event)) = self.queue.pop_first() else {
            return;
        };
        self.clock = at;
        *self.shared_clock.lock() = at;
        let now = self.base + at;

        let node = match &event {
            Event::Start(n)
            | Event::Deliver { node: n, .. }
            | Event::ElectionTimeout { node: n, .. }
            | Event::Recheck(n)
            | Event::Propose(n)
            | Event::Claim(n)
            | Event::Release(n)
            | Event::Kill(n) => *n,
        };
        if !self.nodes[node].alive {
            return;
        }

        match event {
            Event::Start(n) => self.nodes[n].engine.start(now),
            Event::Deliver { node, topic, payload } => {
                self.nodes[node].engine.handle(&topic, &payload, now)
            }
            Event::ElectionTimeout { node, epoch } => {
                self.nodes[node].engine.on_election_timeout(epoch, now)
            }
            Event::Recheck(n) => {
                self.nodes[n].engine.on_recheck(now);
                self.schedule(self.clock + RECHECK, Event::Recheck(n));
            }
            Event::Propose(n) => self.nodes[n].engine.propose(now),
            Event::Claim(n) => {
                let on_elected = self.recorder(n, Kind::Elected);
                let on_released = self.recorder(n, Kind::Released);
                self.nodes[n].engine.claim(on_elected, on_released, now);
            }
            Event::Release(n) => self.nodes[n].engine.release(None, now),
            Event::Kill(n) => {
                self.nodes[n].alive = false;
                self.dead.write().insert(node_name(n));
            }
        }

        self.drain(node);
        self.check();
    }

    fn recorder(&self, node: usize, kind: Kind) -> Box<dyn FnOnce(&BatonName) + Send> {
        let log = self.log.clone();
        let clock = self.shared_clock.clone();
        Box::new(move |_: &BatonName| {
            let at = *clock.lock();
            log.lock().push(Record { at, node, kind });
        })
    }

    fn drain(&mut self, node: usize) {
        if !self.nodes[node].alive {
            return;
        }
        for effect in self.nodes[node].engine.take_effects() {
            match effect {
                Effect::Publish { topic, payload } => self.publish(&topic, payload),
                Effect::ArmElectionTimer { after, epoch } => {
                    self.schedule(self.clock + after, Event::ElectionTimeout { node, epoch })
                }
                Effect::CancelElectionTimer => {}
                Effect::ProposeSoon => self.schedule(self.clock, Event::Propose(node)),
            }
        }
    }

    fn publish(&mut self, topic: &str, payload: Vec<u8>) {
        for target in 0..self.nodes.len() {
            if !self.nodes[target].alive || !self.nodes[target].topics.contains(topic) {
                continue;
            }
            let copies = if self.config.duplicate_probability > 0.0
                && self.rng.gen_bool(self.config.duplicate_probability)
            {
                2
            } else {
                1
            };
            for _ in 0..copies {
                self.deliveries += 1;
                let lost = self.config.drop_nth == Some(self.deliveries)
                    || (self.config.drop_probability > 0.0
                        && self.rng.gen_bool(self.config.drop_probability));
                if lost {
                    self.dropped += 1;
                    continue;
                }
                let delay = self
                    .rng
                    .gen_range(self.config.min_delay_ms..=self.config.max_delay_ms);
                self.schedule(
                    self.clock + Duration::from_millis(delay),
                    Event::Deliver {
                        node: target,
                        topic: topic.to_string(),
                        payload: payload.clone(),
                    },
                );
            }
        }
    }

    fn check(&mut self) {
        let holders: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.alive && n.engine.phase() == Phase::Holding)
            .map(|(i, _)| i)
            .collect();
        assert!(
            holders.len() <= 1,
            "seed {}: {:?} hold the baton at {:?}",
            self.config.seed,
            holders,
            self.clock
        );

        let mut votes: HashMap<&Ballot, usize> = HashMap::new();
        for node in &self.nodes {
            if let Some(ballot) = node.engine.acceptor().accepted() {
                *votes.entry(ballot).or_insert(0) += 1;
            }
        }
        for (ballot, count) in votes {
            self.accepted_ever.insert(ballot.clone());
            if count * 2 > self.nodes.len() {
                let previous = self.chosen.insert(ballot.id.clone(), ballot.winner.clone());
                assert!(
                    previous.is_none() || previous == Some(ballot.winner.clone()),
                    "seed {}: ballot {} chosen with two winners",
                    self.config.seed,
                    ballot.id
                );
            }
        }
    }

    /// A chosen holder is only replaced after it proposed its own release,
    /// or after it was killed.
    fn assert_chosen_winners_consistent(&self) {
        let dead = self.dead.read();
        let chosen: Vec<(&BallotId, &Option<InstanceId>)> = self.chosen.iter().collect();
        for pair in chosen.windows(2) {
            let (earlier, Some(holder)) = pair[0] else {
                continue;
            };
            let (later, winner) = pair[1];
            if winner.as_ref() == Some(holder) || dead.contains(holder.as_str()) {
                continue;
            }
            let released = self.accepted_ever.iter().any(|b| {
                b.id > *earlier && b.id <= *later && b.proposer_id() == holder && b.winner.is_none()
            });
            assert!(
                released,
                "seed {}: {} chosen for {} replaced by {:?} at {} without a release",
                self.config.seed, earlier, holder, winner, later
            );
        }
    }

    fn records(&self) -> Vec<Record> {
        self.log.lock().clone()
    }

    fn kinds(&self) -> Vec<(usize, Kind)> {
        self.records().into_iter().map(|r| (r.node, r.kind)).collect()
    }

    fn holder_seen_by(&self, node: usize) -> Option<InstanceId> {
        self.nodes[node].engine.holder().cloned()
    }
}

fn node_name(i: usize) -> String {
    format!("node{}", i)
}

#[test]
fn test_single_claimant_elected() {
    for seed in 0..10 {
        let mut sim = Sim::new(SimConfig::new(seed));
        sim.at_ms(0, Event::Claim(0));
        sim.run_until_ms(3_000);

        assert_eq!(sim.kinds(), vec![(0, Kind::Elected)], "seed {}", seed);
        assert_eq!(sim.holder_seen_by(0), Some(InstanceId::new(node_name(0))));
        sim.assert_chosen_winners_consistent();
    }
}

#[test]
fn test_lone_participant_elected() {
    let mut config = SimConfig::new(3);
    config.nodes = 1;
    let mut sim = Sim::new(config);
    sim.at_ms(0, Event::Claim(0));
    sim.run_until_ms(2_000);

    assert_eq!(sim.kinds(), vec![(0, Kind::Elected)]);
}

#[test]
fn test_two_contenders() {
    for seed in 0..10 {
        let config = if seed % 2 == 0 {
            SimConfig::new(seed)
        } else {
            SimConfig::new(seed).unoptimized()
        };
        let mut sim = Sim::new(config);
        sim.at_ms(0, Event::Claim(0));
        sim.at_ms(500, Event::Claim(1));
        sim.run_until_ms(3_000);

        let records = sim.records();
        assert_eq!(records.len(), 1, "seed {}: {:?}", seed, records);
        assert_eq!(records[0].kind, Kind::Elected);
        let winner = records[0].node;
        let other = 1 - winner;

        sim.at_ms(3_000, Event::Release(winner));
        sim.run_until_ms(6_000);

        assert_eq!(
            sim.kinds(),
            vec![(winner, Kind::Elected), (winner, Kind::Released), (other, Kind::Elected)],
            "seed {}",
            seed
        );
        assert!(sim.records()[2].at >= Duration::from_millis(3_000));
        sim.assert_chosen_winners_consistent();
    }
}

#[test]
fn test_serial_handoff() {
    for seed in 0..10 {
        let config = if seed % 2 == 0 {
            SimConfig::new(seed).unoptimized()
        } else {
            SimConfig::new(seed)
        };
        let mut sim = Sim::new(config);
        sim.at_ms(0, Event::Claim(0));
        sim.at_ms(1_000, Event::Claim(1));
        sim.at_ms(2_000, Event::Release(0));
        sim.run_until_ms(4_000);

        assert_eq!(
            sim.kinds(),
            vec![(0, Kind::Elected), (0, Kind::Released), (1, Kind::Elected)],
            "seed {}",
            seed
        );
        let records = sim.records();
        assert!(records[1].at <= records[2].at);
        assert_eq!(sim.holder_seen_by(1), Some(InstanceId::new(node_name(1))));
    }
}

#[test]
fn test_idempotent_release() {
    let mut sim = Sim::new(SimConfig::new(4));
    sim.at_ms(0, Event::Claim(0));
    sim.at_ms(1_000, Event::Release(0));
    sim.at_ms(1_500, Event::Release(0));
    sim.run_until_ms(3_000);

    assert_eq!(sim.kinds(), vec![(0, Kind::Elected), (0, Kind::Released)]);
    assert_eq!(sim.holder_seen_by(0), None);
}

#[test]
fn test_reclaim_after_release() {
    let mut sim = Sim::new(SimConfig::new(5));
    sim.at_ms(0, Event::Claim(0));
    sim.at_ms(1_000, Event::Release(0));
    sim.at_ms(1_500, Event::Claim(0));
    sim.run_until_ms(3_000);

    assert_eq!(
        sim.kinds(),
        vec![(0, Kind::Elected), (0, Kind::Released), (0, Kind::Elected)]
    );
}

#[test]
fn test_release_by_non_holder_ignored() {
    let mut sim = Sim::new(SimConfig::new(6));
    sim.at_ms(0, Event::Claim(0));
    sim.at_ms(1_000, Event::Release(1));
    sim.run_until_ms(2_000);

    assert_eq!(sim.kinds(), vec![(0, Kind::Elected)]);
    assert_eq!(sim.holder_seen_by(1), Some(InstanceId::new(node_name(0))));
}

#[test]
fn test_dead_holder_evicted() {
    for seed in 0..10 {
        let mut sim = Sim::new(SimConfig::new(seed));
        sim.at_ms(0, Event::Claim(0));
        sim.at_ms(1_000, Event::Claim(1));
        sim.at_ms(2_000, Event::Kill(0));
        sim.run_until_ms(4_000);

        let records = sim.records();
        assert_eq!(
            sim.kinds(),
            vec![(0, Kind::Elected), (1, Kind::Elected)],
            "seed {}",
            seed
        );
        assert!(
            records[1].at <= Duration::from_millis(3_000),
            "seed {}: eviction took until {:?}",
            seed,
            records[1].at
        );
        sim.assert_chosen_winners_consistent();
    }
}

#[test]
fn test_duplicated_messages() {
    for seed in 0..10 {
        let mut sim = Sim::new(SimConfig::new(seed).duplicating(0.3));
        sim.at_ms(0, Event::Claim(2));
        sim.at_ms(1_000, Event::Claim(0));
        sim.at_ms(2_000, Event::Release(2));
        sim.run_until_ms(4_000);

        assert_eq!(
            sim.kinds(),
            vec![(2, Kind::Elected), (2, Kind::Released), (0, Kind::Elected)],
            "seed {}",
            seed
        );
        sim.assert_chosen_winners_consistent();
    }
}

#[test]
fn test_random_contention_keeps_mutual_exclusion() {
    for seed in 0..20 {
        let mut config = SimConfig::new(seed).duplicating(0.1);
        config.use_optimizations = seed % 2 == 0;
        let mut sim = Sim::new(config);

        let mut schedule = StdRng::seed_from_u64(seed + 1_000);
        for _ in 0..30 {
            let at = schedule.gen_range(0..10_000);
            let node = schedule.gen_range(0..3);
            let event = if schedule.gen_bool(0.5) {
                Event::Claim(node)
            } else {
                Event::Release(node)
            };
            sim.at_ms(at, event);
        }
        sim.run_until_ms(12_000);

        sim.assert_chosen_winners_consistent();

        // Callbacks alternate per node: elected, released, elected, ...
        for node in 0..3 {
            let kinds: Vec<Kind> = sim
                .records()
                .into_iter()
                .filter(|r| r.node == node)
                .map(|r| r.kind)
                .collect();
            for (i, kind) in kinds.iter().enumerate() {
                let expected = if i % 2 == 0 { Kind::Elected } else { Kind::Released };
                assert_eq!(*kind, expected, "seed {} node {}", seed, node);
            }
        }
    }
}

#[test]
fn test_handoff_survives_any_single_lost_message() {
    for seed in 0..2 {
        for nth in 1..=200 {
            let mut sim = Sim::new(SimConfig::new(seed).dropping_nth(nth));
            sim.at_ms(0, Event::Claim(0));
            sim.at_ms(500, Event::Claim(1));
            sim.at_ms(3_000, Event::Release(0));
            sim.run_until_ms(8_000);

            assert_eq!(
                sim.kinds(),
                vec![(0, Kind::Elected), (0, Kind::Released), (1, Kind::Elected)],
                "seed {} dropping delivery {}",
                seed,
                nth
            );
            assert_eq!(sim.holder_seen_by(1), Some(InstanceId::new(node_name(1))));
            sim.assert_chosen_winners_consistent();
        }
    }
}

#[test]
fn test_claimant_elected_over_lossy_network() {
    for seed in 0..5 {
        let mut sim = Sim::new(SimConfig::new(seed).lossy(0.1));
        sim.at_ms(0, Event::Claim(0));
        sim.run_until_ms(5_000);

        let records = sim.records();
        assert!(!records.is_empty(), "seed {}: never elected", seed);
        assert_eq!(records[0].kind, Kind::Elected, "seed {}", seed);
        assert_eq!(records[0].node, 0, "seed {}", seed);
        assert!(sim.dropped > 0, "seed {}: nothing was lost", seed);
    }
}
