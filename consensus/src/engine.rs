//! Baton engine
//!
//! One instance of the election protocol for one (baton, participant) pair.
//! The engine is sans-IO: it consumes inbound messages, timer firings and
//! API calls, and queues [`Effect`]s for its driver to carry out. Time is
//! passed in, so the same engine runs under tokio or under a simulated clock.

use crate::acceptor::Acceptor;
use crate::learner::{Learned, Learner};
use crate::message::{Accepted, BatonMessage, Nack, Operation, Prepare, Promise, Topics};
use crate::proposer::{PromiseOutcome, Proposer};
use crate::quorum::QuorumEstimator;
use crate::watchdog::{resolve_period, ElectionWatchdog};
use baton_core::{
    Ballot, BatonConfig, BatonName, BatonResult, InstanceId, SharedConnectionTest,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Rechecks a claimant waits behind a live holder before proposing anyway.
/// The round cannot displace a live winner; it only refreshes what this
/// instance knows, so a missed release is eventually observed.
pub const LIVE_HOLDER_RECHECKS: u32 = 3;

/// Invoked once when this instance is elected
pub type ElectedCallback = Box<dyn FnOnce(&BatonName) + Send>;

/// Invoked once when this instance stops holding the baton
pub type ReleasedCallback = Box<dyn FnOnce(&BatonName) + Send>;

/// Work the driver must carry out on behalf of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a payload on a topic
    Publish { topic: String, payload: Vec<u8> },
    /// Call [`BatonEngine::on_election_timeout`] with `epoch` after `after`
    ArmElectionTimer { after: Duration, epoch: u64 },
    /// Drop the armed election deadline
    CancelElectionTimer,
    /// Call [`BatonEngine::propose`] once the current event is handled
    ProposeSoon,
}

/// Where this instance stands with respect to the baton
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Electing,
    Holding,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Electing => write!(f, "electing"),
            Phase::Holding => write!(f, "holding"),
        }
    }
}

enum Intent {
    Idle,
    Electing {
        on_elected: ElectedCallback,
        on_released: ReleasedCallback,
    },
    Holding {
        on_released: ReleasedCallback,
    },
}

impl Intent {
    fn phase(&self) -> Phase {
        match self {
            Intent::Idle => Phase::Idle,
            Intent::Electing { .. } => Phase::Electing,
            Intent::Holding { .. } => Phase::Holding,
        }
    }
}

/// Snapshot of an instance for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatonStatus {
    pub baton_name: BatonName,
    pub instance_id: InstanceId,
    pub phase: Phase,
    pub holder: Option<InstanceId>,
    pub proposal_number: u64,
    /// Estimated number of acceptors; `None` until a full round was observed
    pub estimated_acceptors: Option<usize>,
    pub election_pending: bool,
}

pub struct BatonEngine {
    name: BatonName,
    id: InstanceId,
    topics: Topics,
    routes: HashMap<String, Operation>,
    use_optimizations: bool,
    oracle: SharedConnectionTest,
    proposer: Proposer,
    acceptor: Acceptor,
    learner: Learner,
    estimator: QuorumEstimator,
    watchdog: ElectionWatchdog,
    recheck_interval: Duration,
    rechecks_behind_holder: u32,
    intent: Intent,
    effects: Vec<Effect>,
    unloaded: bool,
}

impl BatonEngine {
    /// Create an engine for `instance_id`
    pub fn new(
        config: &BatonConfig,
        instance_id: InstanceId,
        oracle: SharedConnectionTest,
    ) -> BatonResult<Self> {
        Self::with_rng(config, instance_id, oracle, StdRng::from_entropy())
    }

    /// Create an engine whose timing jitter is drawn from `rng`
    pub fn with_rng(
        config: &BatonConfig,
        instance_id: InstanceId,
        oracle: SharedConnectionTest,
        mut rng: StdRng,
    ) -> BatonResult<Self> {
        config.validate()?;

        let name = BatonName::new(config.baton_name.clone());
        let election_timeout = resolve_period(config.election_timeout_ms, &mut rng);
        let recheck_interval = resolve_period(config.recheck_interval_ms, &mut rng);
        let topics = Topics::new(&name, &instance_id, config.use_optimizations);
        let routes = topics.subscriptions().into_iter().collect();

        debug!(
            "Baton {} instance {}: election timeout {:?}, recheck {:?}",
            name, instance_id, election_timeout, recheck_interval
        );

        Ok(Self {
            proposer: Proposer::new(instance_id.clone()),
            acceptor: Acceptor::new(instance_id.clone()),
            learner: Learner::new(),
            estimator: QuorumEstimator::new(election_timeout),
            watchdog: ElectionWatchdog::new(election_timeout, rng),
            recheck_interval,
            rechecks_behind_holder: 0,
            name,
            id: instance_id,
            topics,
            routes,
            use_optimizations: config.use_optimizations,
            oracle,
            intent: Intent::Idle,
            effects: Vec::new(),
            unloaded: false,
        })
    }

    pub fn name(&self) -> &BatonName {
        &self.name
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.intent.phase()
    }

    pub fn holder(&self) -> Option<&InstanceId> {
        self.learner.holder()
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded
    }

    pub fn election_timeout(&self) -> Duration {
        self.watchdog.timeout()
    }

    pub fn recheck_interval(&self) -> Duration {
        self.recheck_interval
    }

    pub fn acceptor(&self) -> &Acceptor {
        &self.acceptor
    }

    /// Every topic the driver must subscribe before starting
    pub fn subscriptions(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    pub fn status(&self) -> BatonStatus {
        BatonStatus {
            baton_name: self.name.clone(),
            instance_id: self.id.clone(),
            phase: self.phase(),
            holder: self.holder().cloned(),
            proposal_number: self.proposer.proposal_number().0,
            estimated_acceptors: self.estimator.is_known().then(|| self.estimator.current()),
            election_pending: self.watchdog.is_pending(),
        }
    }

    /// Drain the effects queued so far
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Issue the initial gathering proposal
    pub fn start(&mut self, now: Instant) {
        info!("Baton {} instance {} started", self.name, self.id);
        self.propose(now);
    }

    /// Ask for the baton.
    ///
    /// Ignored unless the instance is idle: a claim or a held baton must be
    /// released first.
    pub fn claim(&mut self, on_elected: ElectedCallback, on_released: ReleasedCallback, now: Instant) {
        if self.unloaded {
            warn!("Baton {} instance {}: claim after unload ignored", self.name, self.id);
            return;
        }
        if !matches!(self.intent, Intent::Idle) {
            warn!(
                "Baton {} instance {}: claim ignored while {}",
                self.name,
                self.id,
                self.phase()
            );
            return;
        }

        debug!("Baton {} instance {} claiming", self.name, self.id);
        self.rechecks_behind_holder = 0;
        self.intent = Intent::Electing {
            on_elected,
            on_released,
        };
        self.propose(now);
    }

    /// Give the baton up, firing the release callback (or `replacement`).
    ///
    /// A no-op unless this instance is the accepted holder, so a second
    /// release does nothing.
    pub fn release(&mut self, replacement: Option<ReleasedCallback>, now: Instant) {
        if self.unloaded {
            return;
        }
        if !self.learner.is_holder(&self.id) {
            warn!(
                "Baton {} instance {}: release ignored, not the holder",
                self.name, self.id
            );
            return;
        }

        match std::mem::replace(&mut self.intent, Intent::Idle) {
            Intent::Holding { on_released } => {
                info!("Baton {} released by {}", self.name, self.id);
                (replacement.unwrap_or(on_released))(&self.name);
            }
            Intent::Electing { .. } => {
                debug!("Baton {} instance {}: pending claim dropped", self.name, self.id);
            }
            Intent::Idle => {}
        }

        if matches!(self.intent, Intent::Idle) {
            self.propose(now);
        }
    }

    /// Stop participating. Returns the topics to unsubscribe.
    ///
    /// Pending callbacks are dropped without being called.
    pub fn unload(&mut self) -> Vec<String> {
        if self.unloaded {
            return Vec::new();
        }
        self.unloaded = true;
        self.intent = Intent::Idle;
        if self.watchdog.disarm() {
            self.effects.push(Effect::CancelElectionTimer);
        }
        info!("Baton {} instance {} unloaded", self.name, self.id);
        self.subscriptions()
    }

    /// Start a new round, unless one is already in flight
    pub fn propose(&mut self, now: Instant) {
        if self.unloaded {
            return;
        }
        if self.watchdog.is_pending() {
            trace!("Baton {} instance {}: election already pending", self.name, self.id);
            return;
        }

        let population = self.estimator.estimate(now, self.proposer.round_counts());
        let quorum = QuorumEstimator::quorum_of(population);
        let ballot = self.proposer.start_round(quorum);

        debug!(
            "Baton {} instance {}: prepare {} (quorum {})",
            self.name,
            self.id,
            ballot,
            if self.estimator.is_known() {
                quorum.to_string()
            } else {
                "unknown".to_string()
            }
        );
        self.publish(
            self.topics.broadcast(Operation::Prepare),
            BatonMessage::Prepare(Prepare { ballot }),
        );

        let (after, epoch) = self.watchdog.arm();
        self.effects.push(Effect::ArmElectionTimer { after, epoch });
    }

    /// The election deadline armed with `epoch` expired
    pub fn on_election_timeout(&mut self, epoch: u64, now: Instant) {
        if self.unloaded || !self.watchdog.fire(epoch) {
            return;
        }
        debug!("Baton {} instance {}: election timed out", self.name, self.id);
        self.propose(now);
    }

    /// Periodic holder check while waiting for the baton
    pub fn on_recheck(&mut self, now: Instant) {
        if self.unloaded || !matches!(self.intent, Intent::Electing { .. }) || self.watchdog.is_pending() {
            return;
        }

        match self.learner.holder().cloned() {
            Some(holder) if holder != self.id => {
                if self.oracle.is_connected(&holder) {
                    self.rechecks_behind_holder += 1;
                    if self.rechecks_behind_holder < LIVE_HOLDER_RECHECKS {
                        return;
                    }
                    debug!(
                        "Baton {} instance {}: still behind {}, refreshing",
                        self.name, self.id, holder
                    );
                    self.rechecks_behind_holder = 0;
                    self.propose(now);
                    return;
                }
                info!(
                    "Baton {} holder {} is gone, {} re-electing",
                    self.name, holder, self.id
                );
                self.proposer.forget_winner();
                self.learner.forget_holder();
            }
            _ => {}
        }
        self.propose(now);
    }

    /// Feed one inbound message
    pub fn handle(&mut self, topic: &str, payload: &[u8], now: Instant) {
        if self.unloaded {
            return;
        }
        let Some(expected) = self.routes.get(topic).copied() else {
            trace!("Baton {}: no route for topic {}", self.name, topic);
            return;
        };
        let Some(message) = BatonMessage::from_bytes(payload) else {
            debug!("Baton {}: dropping malformed payload on {}", self.name, topic);
            return;
        };
        if message.operation() != expected {
            debug!(
                "Baton {}: dropping {} received on {} channel",
                self.name,
                message.operation(),
                expected
            );
            return;
        }

        match message {
            BatonMessage::Prepare(prepare) => self.on_prepare(prepare),
            BatonMessage::Promise(promise) => self.on_promise(promise),
            BatonMessage::Accept(ballot) => self.on_accept(ballot),
            BatonMessage::Accepted(accepted) => self.learn(accepted),
            BatonMessage::Nack(nack) => self.on_nack(nack),
        }
    }

    fn on_prepare(&mut self, prepare: Prepare) {
        let proposer = prepare.ballot.proposer_id.clone();
        match self.acceptor.on_prepare(&prepare, self.oracle.as_ref()) {
            Ok(promise) => {
                trace!("Baton {} acceptor {}: promise {}", self.name, self.id, promise.ballot);
                self.send_to(Operation::Promise, &proposer, BatonMessage::Promise(promise));
            }
            Err(nack) => {
                trace!("Baton {} acceptor {}: nack prepare {}", self.name, self.id, nack.ballot);
                self.send_to(Operation::Nack, &proposer, BatonMessage::Nack(nack));
            }
        }
    }

    fn on_promise(&mut self, promise: Promise) {
        let wants_baton = matches!(self.intent, Intent::Electing { .. });
        if let PromiseOutcome::Accept(ballot) = self.proposer.on_promise(&promise, wants_baton) {
            debug!("Baton {} instance {}: promised, accept {}", self.name, self.id, ballot);
            self.publish(self.topics.broadcast(Operation::Accept), BatonMessage::Accept(ballot));
        }
    }

    fn on_nack(&mut self, nack: Nack) {
        self.proposer.on_nack(&nack);
    }

    fn on_accept(&mut self, ballot: Ballot) {
        let proposer = ballot.proposer_id().clone();
        match self.acceptor.on_accept(&ballot) {
            Ok(accepted) => {
                trace!("Baton {} acceptor {}: accepted {}", self.name, self.id, ballot);
                if self.use_optimizations {
                    if proposer != self.id {
                        self.send_to(
                            Operation::Accepted,
                            &proposer,
                            BatonMessage::Accepted(accepted.clone()),
                        );
                    }
                    self.learn(accepted);
                } else {
                    self.publish(
                        self.topics.broadcast(Operation::Accepted),
                        BatonMessage::Accepted(accepted),
                    );
                }
            }
            Err(nack) => {
                trace!("Baton {} acceptor {}: nack accept {}", self.name, self.id, nack.ballot);
                self.send_to(Operation::Nack, &proposer, BatonMessage::Nack(nack));
            }
        }
    }

    fn learn(&mut self, accepted: Accepted) {
        let learned = self.learner.learn(&accepted.ballot);
        if learned == Learned::Stale {
            return;
        }

        if *accepted.ballot.proposer_id() == self.id && self.proposer.on_accepted(&accepted) {
            if self.watchdog.disarm() {
                self.effects.push(Effect::CancelElectionTimer);
            }
            debug!("Baton {} instance {}: committed {}", self.name, self.id, accepted.ballot);
            self.on_committed(&accepted.ballot);
        }

        if let Learned::New { previous_holder } = learned {
            let mine = accepted.ballot.is_won_by(&self.id);
            if mine && matches!(self.intent, Intent::Idle) {
                // Named holder without wanting it: pass it on
                debug!("Baton {} instance {}: unwanted baton, re-proposing", self.name, self.id);
                self.effects.push(Effect::ProposeSoon);
            } else if !mine && previous_holder.as_ref() == Some(&self.id) {
                self.lose(accepted.ballot.winner.as_ref());
            }
        }
    }

    /// Our own round gathered its accepted quorum
    fn on_committed(&mut self, ballot: &Ballot) {
        if !matches!(self.intent, Intent::Electing { .. }) {
            return;
        }
        if ballot.is_won_by(&self.id) {
            if let Intent::Electing {
                on_elected,
                on_released,
            } = std::mem::replace(&mut self.intent, Intent::Idle)
            {
                self.intent = Intent::Holding { on_released };
                info!("Baton {} elected {}", self.name, self.id);
                on_elected(&self.name);
            }
        } else if ballot.winner.is_none() {
            // Nobody holds it and we still want it
            self.effects.push(Effect::ProposeSoon);
        }
    }

    /// Someone else was elected over us while we held the baton
    fn lose(&mut self, new_holder: Option<&InstanceId>) {
        if !matches!(self.intent, Intent::Holding { .. }) {
            return;
        }
        if let Intent::Holding { on_released } = std::mem::replace(&mut self.intent, Intent::Idle) {
            warn!(
                "Baton {} taken from {} by {}",
                self.name,
                self.id,
                new_holder.map(InstanceId::as_str).unwrap_or("nobody")
            );
            on_released(&self.name);
        }
    }

    fn publish(&mut self, topic: String, message: BatonMessage) {
        match message.to_bytes() {
            Ok(payload) => self.effects.push(Effect::Publish { topic, payload }),
            Err(e) => warn!(
                "Baton {} instance {}: dropping unencodable {}: {}",
                self.name,
                self.id,
                message.operation(),
                e
            ),
        }
    }

    fn send_to(&mut self, operation: Operation, recipient: &InstanceId, message: BatonMessage) {
        let topic = self.topics.direct(operation, recipient);
        self.publish(topic, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::{AlwaysConnected, BallotId, ProposalNumber};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn config() -> BatonConfig {
        BatonConfig::new("tank")
            .with_election_timeout(Duration::from_millis(100))
            .with_recheck_interval(Duration::from_millis(100))
    }

    fn engine(id: &str) -> BatonEngine {
        BatonEngine::with_rng(
            &config(),
            InstanceId::from(id),
            Arc::new(AlwaysConnected),
            StdRng::seed_from_u64(9),
        )
        .unwrap()
    }

    fn published(effects: &[Effect]) -> Vec<(String, BatonMessage)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Publish { topic, payload } => {
                    Some((topic.clone(), BatonMessage::from_bytes(payload).unwrap()))
                }
                _ => None,
            })
            .collect()
    }

    /// Run a lone engine until its own messages stop, feeding every publish
    /// back into it and firing the armed deadline after `advance`.
    fn settle(engine: &mut BatonEngine, now: &mut Instant, advance: Duration, rounds: usize) {
        for _ in 0..rounds {
            let mut pending = engine.take_effects();
            let mut deadline = None;
            while !pending.is_empty() {
                for effect in pending {
                    match effect {
                        Effect::Publish { topic, payload } => engine.handle(&topic, &payload, *now),
                        Effect::ArmElectionTimer { epoch, .. } => deadline = Some(epoch),
                        Effect::CancelElectionTimer => deadline = None,
                        Effect::ProposeSoon => engine.propose(*now),
                    }
                }
                pending = engine.take_effects();
            }
            *now += advance;
            if let Some(epoch) = deadline {
                engine.on_election_timeout(epoch, *now);
            }
        }
    }

    type Events = Arc<Mutex<Vec<String>>>;

    fn recorder(events: &Events, label: &'static str) -> Box<dyn FnOnce(&BatonName) + Send> {
        let events = events.clone();
        Box::new(move |name: &BatonName| events.lock().push(format!("{}:{}", label, name)))
    }

    #[test]
    fn test_rejects_empty_name() {
        let result = BatonEngine::new(&BatonConfig::default(), InstanceId::from("a"), Arc::new(AlwaysConnected));
        assert!(result.is_err());
    }

    #[test]
    fn test_start_sends_prepare_and_arms_timer() {
        let mut engine = engine("a");
        engine.start(Instant::now());
        let effects = engine.take_effects();

        let sent = published(&effects);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "virtual-baton:tank:prepare");
        assert!(matches!(sent[0].1, BatonMessage::Prepare(_)));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ArmElectionTimer { .. })));

        // A second proposal while the first is pending does nothing
        engine.propose(Instant::now());
        assert!(engine.take_effects().is_empty());
    }

    #[test]
    fn test_lone_instance_is_elected() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let mut engine = engine("a");
        let mut now = Instant::now();

        engine.start(now);
        engine.claim(recorder(&events, "elected"), recorder(&events, "released"), now);
        settle(&mut engine, &mut now, Duration::from_millis(150), 4);

        assert_eq!(engine.phase(), Phase::Holding);
        assert_eq!(engine.holder(), Some(&InstanceId::from("a")));
        assert_eq!(*events.lock(), vec!["elected:tank".to_string()]);
        assert_eq!(engine.status().estimated_acceptors, Some(1));
    }

    #[test]
    fn test_release_is_idempotent() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let mut engine = engine("a");
        let mut now = Instant::now();

        engine.start(now);
        engine.claim(recorder(&events, "elected"), recorder(&events, "released"), now);
        settle(&mut engine, &mut now, Duration::from_millis(150), 4);

        engine.release(None, now);
        settle(&mut engine, &mut now, Duration::from_millis(150), 2);
        engine.release(None, now);

        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.holder(), None);
        assert_eq!(
            *events.lock(),
            vec!["elected:tank".to_string(), "released:tank".to_string()]
        );
    }

    #[test]
    fn test_release_with_replacement_callback() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let mut engine = engine("a");
        let mut now = Instant::now();

        engine.start(now);
        engine.claim(recorder(&events, "elected"), recorder(&events, "released"), now);
        settle(&mut engine, &mut now, Duration::from_millis(150), 4);
        engine.release(Some(recorder(&events, "replaced")), now);

        assert_eq!(
            *events.lock(),
            vec!["elected:tank".to_string(), "replaced:tank".to_string()]
        );
    }

    #[test]
    fn test_claimant_behind_live_holder_refreshes() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let mut engine = engine("a");
        let mut now = Instant::now();

        let held = BatonMessage::Accept(Ballot::new(
            BallotId::new(ProposalNumber(1), InstanceId::from("b")),
            Some(InstanceId::from("b")),
        ));
        engine.handle("virtual-baton:tank:accept", &held.to_bytes().unwrap(), now);
        engine.claim(recorder(&events, "elected"), recorder(&events, "released"), now);
        settle(&mut engine, &mut now, Duration::from_millis(150), 4);

        // Our round committed, keeping the live holder
        assert_eq!(engine.phase(), Phase::Electing);
        assert_eq!(engine.holder(), Some(&InstanceId::from("b")));
        assert!(!engine.status().election_pending);

        for _ in 1..LIVE_HOLDER_RECHECKS {
            engine.on_recheck(now);
            assert!(engine.take_effects().is_empty());
        }
        engine.on_recheck(now);
        let sent = published(&engine.take_effects());
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].1, BatonMessage::Prepare(_)));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_published_payloads_are_encoded() {
        let mut engine = engine("a");
        engine.start(Instant::now());

        for effect in engine.take_effects() {
            if let Effect::Publish { payload, .. } = effect {
                assert!(!payload.is_empty());
                assert!(BatonMessage::from_bytes(&payload).is_some());
            }
        }
    }

    #[test]
    fn test_double_claim_ignored() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let mut engine = engine("a");
        let now = Instant::now();

        engine.claim(recorder(&events, "first"), recorder(&events, "first-released"), now);
        engine.claim(recorder(&events, "second"), recorder(&events, "second-released"), now);
        assert_eq!(engine.phase(), Phase::Electing);
    }

    #[test]
    fn test_reclaim_after_release() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let mut engine = engine("a");
        let mut now = Instant::now();

        engine.start(now);
        engine.claim(recorder(&events, "elected"), recorder(&events, "released"), now);
        settle(&mut engine, &mut now, Duration::from_millis(150), 4);
        engine.release(None, now);
        settle(&mut engine, &mut now, Duration::from_millis(150), 2);

        engine.claim(recorder(&events, "again"), recorder(&events, "released"), now);
        settle(&mut engine, &mut now, Duration::from_millis(150), 3);

        assert_eq!(engine.phase(), Phase::Holding);
        assert_eq!(events.lock().last().map(String::as_str), Some("again:tank"));
    }

    #[test]
    fn test_malformed_and_misrouted_payloads_dropped() {
        let mut engine = engine("a");
        let now = Instant::now();

        engine.handle("virtual-baton:tank:prepare", &[1, 2, 3], now);
        assert!(engine.take_effects().is_empty());

        // An accept sent on the prepare channel
        let accept = BatonMessage::Accept(Ballot::new(
            BallotId::new(ProposalNumber(1), InstanceId::from("b")),
            Some(InstanceId::from("b")),
        ));
        engine.handle("virtual-baton:tank:prepare", &accept.to_bytes().unwrap(), now);
        assert!(engine.take_effects().is_empty());
        assert!(engine.acceptor().accepted().is_none());

        engine.handle("virtual-baton:other:accept", &accept.to_bytes().unwrap(), now);
        assert!(engine.acceptor().accepted().is_none());
    }

    #[test]
    fn test_acceptor_replies_point_to_point() {
        let mut engine = engine("a");
        let now = Instant::now();
        let prepare = BatonMessage::Prepare(Prepare {
            ballot: BallotId::new(ProposalNumber(5), InstanceId::from("b")),
        });

        engine.handle("virtual-baton:tank:prepare", &prepare.to_bytes().unwrap(), now);
        let sent = published(&engine.take_effects());
        assert_eq!(sent[0].0, "virtual-baton:tank:promiseb");

        engine.handle("virtual-baton:tank:prepare", &prepare.to_bytes().unwrap(), now);
        let sent = published(&engine.take_effects());
        assert_eq!(sent[0].0, "virtual-baton:tank:nackb");
    }

    #[test]
    fn test_forced_loss_fires_release() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let mut engine = engine("a");
        let mut now = Instant::now();

        engine.start(now);
        engine.claim(recorder(&events, "elected"), recorder(&events, "released"), now);
        settle(&mut engine, &mut now, Duration::from_millis(150), 4);
        assert_eq!(engine.phase(), Phase::Holding);

        let takeover = BatonMessage::Accept(Ballot::new(
            BallotId::new(ProposalNumber(100), InstanceId::from("b")),
            Some(InstanceId::from("b")),
        ));
        engine.handle("virtual-baton:tank:accept", &takeover.to_bytes().unwrap(), now);

        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.holder(), Some(&InstanceId::from("b")));
        assert_eq!(events.lock().last().map(String::as_str), Some("released:tank"));
    }

    #[test]
    fn test_unload_silences_engine() {
        let mut engine = engine("a");
        let now = Instant::now();
        engine.start(now);
        engine.take_effects();

        let topics = engine.unload();
        assert_eq!(topics.len(), 5);
        assert_eq!(engine.take_effects(), vec![Effect::CancelElectionTimer]);

        let prepare = BatonMessage::Prepare(Prepare {
            ballot: BallotId::new(ProposalNumber(5), InstanceId::from("b")),
        });
        engine.handle("virtual-baton:tank:prepare", &prepare.to_bytes().unwrap(), now);
        engine.propose(now);
        assert!(engine.take_effects().is_empty());
        assert!(engine.unload().is_empty());
    }
}
