//! Async baton driver
//!
//! [`Baton::spawn`] subscribes an instance's topics and runs its
//! [`BatonEngine`] on a tokio task. Inbound messages, the election deadline,
//! the recheck interval and API commands are all serialized through that one
//! task. [`BatonHandle`] queues commands, so it is safe to call from inside
//! an elected or released callback.

use crate::engine::{BatonEngine, BatonStatus, Effect, ElectedCallback, ReleasedCallback};
use baton_core::{BatonConfig, BatonError, BatonName, BatonResult, InstanceId, SharedConnectionTest};
use baton_p2p::{InboundMessage, SharedTransport};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

enum BatonCommand {
    Claim {
        on_elected: ElectedCallback,
        on_released: ReleasedCallback,
    },
    Release {
        replacement: Option<ReleasedCallback>,
    },
    Status(oneshot::Sender<BatonStatus>),
    Unload,
}

/// Cloneable API onto a running baton instance
#[derive(Clone)]
pub struct BatonHandle {
    name: BatonName,
    instance_id: InstanceId,
    commands: mpsc::UnboundedSender<BatonCommand>,
}

impl BatonHandle {
    pub fn name(&self) -> &BatonName {
        &self.name
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Ask for the baton. `on_elected` runs once when this instance wins it,
    /// `on_released` once when it stops holding it.
    pub fn claim<E, R>(&self, on_elected: E, on_released: R) -> &Self
    where
        E: FnOnce(&BatonName) + Send + 'static,
        R: FnOnce(&BatonName) + Send + 'static,
    {
        self.send(BatonCommand::Claim {
            on_elected: Box::new(on_elected),
            on_released: Box::new(on_released),
        });
        self
    }

    /// Give the baton up if this instance holds it
    pub fn release(&self) {
        self.send(BatonCommand::Release { replacement: None });
    }

    /// Give the baton up, running `on_released` instead of the callback
    /// registered with the claim
    pub fn release_with<R>(&self, on_released: R)
    where
        R: FnOnce(&BatonName) + Send + 'static,
    {
        self.send(BatonCommand::Release {
            replacement: Some(Box::new(on_released)),
        });
    }

    /// Stop the instance. Pending callbacks are dropped.
    pub fn unload(&self) {
        self.send(BatonCommand::Unload);
    }

    pub async fn status(&self) -> BatonResult<BatonStatus> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(BatonCommand::Status(reply))
            .map_err(|_| BatonError::Unloaded(self.name.to_string()))?;
        response
            .await
            .map_err(|_| BatonError::Unloaded(self.name.to_string()))
    }

    fn send(&self, command: BatonCommand) {
        if self.commands.send(command).is_err() {
            warn!(
                "Baton {} instance {} is unloaded, command ignored",
                self.name, self.instance_id
            );
        }
    }
}

/// A running baton instance
pub struct Baton {
    handle: BatonHandle,
    task: JoinHandle<()>,
}

impl Baton {
    /// Subscribe every topic of a new instance and start driving it.
    ///
    /// The instance id defaults to the transport's session identity, or a
    /// random one when the transport has none.
    pub async fn spawn(
        config: BatonConfig,
        transport: SharedTransport,
        oracle: SharedConnectionTest,
    ) -> BatonResult<Self> {
        config.validate()?;
        let instance_id = match &config.instance_id {
            Some(id) => InstanceId::new(id.clone()),
            None => {
                let session = transport.local_identity();
                if session.is_empty() {
                    InstanceId::random()
                } else {
                    InstanceId::new(session)
                }
            }
        };
        let engine = BatonEngine::new(&config, instance_id.clone(), oracle)?;

        // Listen before subscribing so nothing published meanwhile is missed
        let inbound = transport.incoming();
        let topics = engine.subscriptions();
        for (i, topic) in topics.iter().enumerate() {
            if let Err(e) = transport.subscribe(topic).await {
                for subscribed in &topics[..i] {
                    let _ = transport.unsubscribe(subscribed).await;
                }
                return Err(e);
            }
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let handle = BatonHandle {
            name: engine.name().clone(),
            instance_id,
            commands,
        };

        let driver = Driver {
            engine,
            transport,
            inbound,
            commands: command_rx,
            election: None,
        };
        let task = tokio::spawn(driver.run());

        Ok(Self { handle, task })
    }

    pub fn handle(&self) -> BatonHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &BatonName {
        self.handle.name()
    }

    pub fn instance_id(&self) -> &InstanceId {
        self.handle.instance_id()
    }

    pub fn claim<E, R>(&self, on_elected: E, on_released: R) -> &Self
    where
        E: FnOnce(&BatonName) + Send + 'static,
        R: FnOnce(&BatonName) + Send + 'static,
    {
        self.handle.claim(on_elected, on_released);
        self
    }

    pub fn release(&self) {
        self.handle.release();
    }

    pub fn release_with<R>(&self, on_released: R)
    where
        R: FnOnce(&BatonName) + Send + 'static,
    {
        self.handle.release_with(on_released);
    }

    pub async fn status(&self) -> BatonResult<BatonStatus> {
        self.handle.status().await
    }

    /// Stop the instance and wait until every topic is unsubscribed
    pub async fn unload(self) {
        self.handle.unload();
        if let Err(e) = self.task.await {
            error!("Baton {} task failed: {}", self.handle.name, e);
        }
    }
}

struct Driver {
    engine: BatonEngine,
    transport: SharedTransport,
    inbound: broadcast::Receiver<InboundMessage>,
    commands: mpsc::UnboundedReceiver<BatonCommand>,
    election: Option<(Instant, u64)>,
}

impl Driver {
    async fn run(mut self) {
        let mut recheck = tokio::time::interval(self.engine.recheck_interval());
        recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);
        recheck.tick().await;

        self.engine.start(now());
        self.flush().await;

        loop {
            let deadline = self.election.map(|(at, _)| at);
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(BatonCommand::Unload) | None => break,
                    Some(command) => self.handle_command(command),
                },
                message = self.inbound.recv() => match message {
                    Ok(message) => self.engine.handle(&message.topic, &message.payload, now()),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Baton {} lagged, {} messages lost", self.engine.name(), skipped);
                    }
                    Err(RecvError::Closed) => {
                        warn!("Baton {} transport closed", self.engine.name());
                        break;
                    }
                },
                _ = sleep_until(deadline) => {
                    if let Some((_, epoch)) = self.election.take() {
                        self.engine.on_election_timeout(epoch, now());
                    }
                }
                _ = recheck.tick() => self.engine.on_recheck(now()),
            }
            self.flush().await;
        }

        self.shutdown().await;
    }

    fn handle_command(&mut self, command: BatonCommand) {
        match command {
            BatonCommand::Claim {
                on_elected,
                on_released,
            } => self.engine.claim(on_elected, on_released, now()),
            BatonCommand::Release { replacement } => self.engine.release(replacement, now()),
            BatonCommand::Status(reply) => {
                let _ = reply.send(self.engine.status());
            }
            BatonCommand::Unload => {}
        }
    }

    /// Carry out every effect the engine queued, including proposals it
    /// deferred to the end of the event
    async fn flush(&mut self) {
        loop {
            let effects = self.engine.take_effects();
            if effects.is_empty() {
                return;
            }

            let mut propose = false;
            for effect in effects {
                match effect {
                    Effect::Publish { topic, payload } => {
                        if let Err(e) = self.transport.send(&topic, payload).await {
                            warn!("Baton {}: send on {} failed: {}", self.engine.name(), topic, e);
                        }
                    }
                    Effect::ArmElectionTimer { after, epoch } => {
                        self.election = Some((Instant::now() + after, epoch));
                    }
                    Effect::CancelElectionTimer => self.election = None,
                    Effect::ProposeSoon => propose = true,
                }
            }
            if propose {
                self.engine.propose(now());
            }
        }
    }

    async fn shutdown(&mut self) {
        let topics = self.engine.unload();
        self.election = None;
        for topic in topics {
            if let Err(e) = self.transport.unsubscribe(&topic).await {
                warn!("Baton {}: unsubscribe {} failed: {}", self.engine.name(), topic, e);
            }
        }
        debug!("Baton {} instance {} stopped", self.engine.name(), self.engine.instance_id());
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
