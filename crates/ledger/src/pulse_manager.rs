use crate::drops::DropStorage;
use crate::{
    Error, FilamentCache, HotDataWaiter, IndexStorage, JetCoordinator, JetStorage, MessageStore,
    NodeStorage, PulseStorage, SyncPool,
};
use bus::{HotIndex, Payload, Sender};
use models::{hash_of, Config, Id, JetDrop, JetId, Node, NodeRole, Pulse, PulseNumber, HASH_SIZE};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use store::{prefix_key, Scope, Store};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Promotes nodes that finished joining into the working set at the tick.
/// The network layer implements this; deployments without a join queue use
/// the no-op default.
pub trait ActiveListSwapper: Send + Sync {
    fn move_sync_to_active(&self) -> Result<(), Error>;
}

#[derive(Default)]
pub struct NoopSwapper;

impl ActiveListSwapper for NoopSwapper {
    fn move_sync_to_active(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// The node roster as the network layer sees it right now.
pub trait NodeNetwork: Send + Sync {
    fn origin(&self) -> Node;
    fn working_nodes(&self) -> Vec<Node>;
}

/// Fixed-roster network view for tests and single-process deployments.
pub struct StaticNetwork {
    origin: Node,
    working: StdMutex<Vec<Node>>,
}

impl StaticNetwork {
    pub fn new(origin: Node, working: Vec<Node>) -> StaticNetwork {
        StaticNetwork {
            origin,
            working: StdMutex::new(working),
        }
    }

    pub fn set_working(&self, nodes: Vec<Node>) {
        *self.working.lock().unwrap() = nodes;
    }
}

impl NodeNetwork for StaticNetwork {
    fn origin(&self) -> Node {
        self.origin
    }

    fn working_nodes(&self) -> Vec<Node> {
        self.working.lock().unwrap().clone()
    }
}

/// Chooses the owned jet to split at a tick, if any.
pub trait SplitPolicy: Send + Sync {
    fn pick(&self, owned: &[JetId]) -> Option<JetId>;
}

/// Placeholder policy: a uniformly random owned jet, bounded by a
/// process-wide budget. A production policy would weigh `split_threshold`
/// against per-jet record counts; `process_jets` only consumes the trait.
pub struct RandomSplitPolicy {
    budget: AtomicI32,
}

impl RandomSplitPolicy {
    pub fn new(budget: i32) -> RandomSplitPolicy {
        RandomSplitPolicy {
            budget: AtomicI32::new(budget),
        }
    }
}

impl SplitPolicy for RandomSplitPolicy {
    fn pick(&self, owned: &[JetId]) -> Option<JetId> {
        if owned.is_empty() || self.budget.load(Ordering::SeqCst) <= 0 {
            return None;
        }
        self.budget.fetch_sub(1, Ordering::SeqCst);
        let index = rand::thread_rng().gen_range(0..owned.len());
        Some(owned[index])
    }
}

/// One owned jet's fate at a tick: kept (possibly still ours next pulse) or
/// split into two children, each with its own next-pulse ownership.
#[derive(Clone, Debug)]
pub struct JetInfo {
    pub id: JetId,
    pub mine_next: bool,
    pub left: Option<Box<JetInfo>>,
    pub right: Option<Box<JetInfo>>,
}

impl JetInfo {
    fn new(id: JetId) -> JetInfo {
        JetInfo {
            id,
            mine_next: false,
            left: None,
            right: None,
        }
    }
}

pub struct PulseManagerOptions {
    pub enable_sync: bool,
    pub light_chain_limit: u32,
    pub cleaner_delay: u32,
}

impl From<&Config> for PulseManagerOptions {
    fn from(config: &Config) -> PulseManagerOptions {
        PulseManagerOptions {
            enable_sync: config.heavy_sync_enabled,
            light_chain_limit: config.light_chain_limit,
            cleaner_delay: config.cleaner_delay,
        }
    }
}

/// External collaborators of the pulse manager.
pub struct PulseManagerDeps {
    pub bus: Arc<dyn Sender>,
    pub network: Arc<dyn NodeNetwork>,
    pub swapper: Arc<dyn ActiveListSwapper>,
    pub split_policy: Arc<dyn SplitPolicy>,
    pub coordinator: Arc<JetCoordinator>,
    pub pulses: Arc<PulseStorage>,
    pub jets: Arc<JetStorage>,
    pub nodes: Arc<NodeStorage>,
    pub indexes: Arc<IndexStorage>,
    pub filaments: Arc<FilamentCache>,
    pub drops: Arc<dyn DropStorage>,
    pub messages: Arc<MessageStore>,
    pub store: Arc<Store>,
    pub hot_waiter: Arc<HotDataWaiter>,
    pub sync_pool: Arc<SyncPool>,
}

// The state package for one jet's next executor, before the target jet is
// stamped on it.
struct HotPackage {
    drop: JetDrop,
    pulse: PulseNumber,
    recent: Vec<HotIndex>,
    pending: Vec<bus::PendingRequests>,
}

impl HotPackage {
    fn payload_for(&self, jet: JetId) -> Payload {
        Payload::HotData {
            drop: self.drop.clone(),
            drop_jet: jet,
            pulse_number: self.pulse,
            recent_objects: self.recent.clone(),
            pending_requests: self.pending.clone(),
        }
    }
}

struct Inner {
    deps: PulseManagerDeps,
    options: PulseManagerOptions,
    // Serialises `set` with itself and carries the stop latch.
    set_lock: Mutex<bool>,
    // The global interlock; other subsystems briefly hold it to observe a
    // stable "now".
    gil: Arc<Mutex<()>>,
    current: StdMutex<Pulse>,
}

/// Drives the per-pulse lifecycle of the node.
///
/// `set` is the pulse tick. Its under-interlock section is brief and guards
/// the global notion of "now": swap the current pulse, persist it, snapshot
/// the roster, re-evaluate jet ownership and splits. The post-interlock
/// section does the long work concurrently with message processing under the
/// new pulse: seal drops, fan out hot data, schedule replication, clean aged
/// state.
#[derive(Clone)]
pub struct PulseManager {
    inner: Arc<Inner>,
}

impl PulseManager {
    pub fn new(deps: PulseManagerDeps, options: PulseManagerOptions) -> PulseManager {
        PulseManager {
            inner: Arc::new(Inner {
                deps,
                options,
                set_lock: Mutex::new(false),
                gil: Arc::new(Mutex::new(())),
                current: StdMutex::new(Pulse::genesis()),
            }),
        }
    }

    fn deps(&self) -> &PulseManagerDeps {
        &self.inner.deps
    }

    /// The global interlock, shared with other node subsystems.
    pub fn interlock(&self) -> Arc<Mutex<()>> {
        self.inner.gil.clone()
    }

    pub fn current_pulse(&self) -> Pulse {
        self.inner.current.lock().unwrap().clone()
    }

    /// Prime in-memory structures from persistence and restore the initial
    /// object set.
    pub async fn start(&self) -> Result<(), Error> {
        self.deps().pulses.restore()?;
        if let Ok(entry) = self.deps().pulses.latest() {
            *self.inner.current.lock().unwrap() = entry.pulse;
        }

        let origin = self.deps().network.origin();
        match self.deps().nodes.set(PulseNumber::GENESIS, vec![origin]) {
            Ok(()) | Err(Error::Override) => {}
            Err(err) => return Err(err),
        }

        if origin.role == NodeRole::LightMaterial {
            self.deps().indexes.restore_genesis(JetId::EMPTY)?;
        }
        Ok(())
    }

    /// Block new ticks and drain the heavy sync pool.
    pub async fn stop(&self) {
        {
            let mut stopped = self.inner.set_lock.lock().await;
            *stopped = true;
        }
        if self.inner.options.enable_sync
            && self.deps().network.origin().role == NodeRole::LightMaterial
        {
            tracing::info!("waiting for heavy replication to finish");
            self.deps().sync_pool.stop().await;
        }
    }

    /// The pulse tick.
    #[tracing::instrument(skip_all, fields(pulse = %new_pulse.number, persist))]
    pub async fn set(&self, new_pulse: Pulse, persist: bool) -> Result<(), Error> {
        let stopped = self.inner.set_lock.lock().await;
        if *stopped {
            return Err(Error::Stopped);
        }

        let (jets, removed, old_pulse, prev_pn) = self.set_under_gil(&new_pulse, persist).await?;

        if !persist {
            return Ok(());
        }

        // Long work runs only on the light executor, once a pulse actually
        // closed (both an old pulse and its predecessor are known).
        if self.deps().network.origin().role == NodeRole::LightMaterial {
            if let (Some(old_pulse), Some(prev_pn)) = (&old_pulse, prev_pn) {
                self.process_end_pulse(&jets, prev_pn, old_pulse, &new_pulse)
                    .await?;
                self.post_process_jets(old_pulse.number, &jets);
                self.add_sync(&jets, old_pulse.number);

                let this = self.clone();
                let cleanup_pulse = new_pulse.clone();
                tokio::spawn(async move { this.clean_light_data(cleanup_pulse, removed).await });
            }
        }

        if let Err(err) = self.deps().bus.on_pulse(new_pulse).await {
            tracing::error!(?err, "message bus pulse rotation failed");
        }
        Ok(())
    }

    /// The brief section guarded by the global interlock.
    #[allow(clippy::type_complexity)]
    async fn set_under_gil(
        &self,
        new_pulse: &Pulse,
        persist: bool,
    ) -> Result<
        (
            Vec<JetInfo>,
            HashMap<JetId, Vec<Id>>,
            Option<Pulse>,
            Option<PulseNumber>,
        ),
        Error,
    > {
        let _gil = self.inner.gil.lock().await;

        let (old_pulse, prev_pn) = match self.deps().pulses.latest() {
            Ok(entry) => (Some(entry.pulse), entry.prev),
            // Bootstrap: nothing persisted yet.
            Err(Error::NotFound) => (None, None),
            Err(err) => return Err(err),
        };
        tracing::debug!(
            old = old_pulse.as_ref().map(|p| p.number.0),
            "rotating pulse"
        );

        *self.inner.current.lock().unwrap() = new_pulse.clone();
        self.deps().swapper.move_sync_to_active()?;

        if persist {
            self.deps().pulses.append(new_pulse.clone())?;
            let working = self.deps().network.working_nodes();
            self.deps().nodes.set(new_pulse.number, working)?;
        }

        if self.deps().network.origin().role == NodeRole::HeavyMaterial {
            return Ok((Vec::new(), HashMap::new(), old_pulse, prev_pn));
        }

        let mut jets = Vec::new();
        if persist {
            if let Some(old_pulse) = &old_pulse {
                match self.process_jets(old_pulse.number, new_pulse.number) {
                    Ok(processed) => jets = processed,
                    // The roster does not know us yet: we just joined.
                    Err(Error::NoNodes(_)) => {
                        return Ok((jets, HashMap::new(), old_pulse, prev_pn))
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        let mut removed = HashMap::new();
        if old_pulse.is_some() && prev_pn.is_some() {
            removed = self.deps().indexes.decrease_ttl();
            if self.deps().network.origin().role == NodeRole::LightMaterial {
                self.prepare_for_next_pulse(&jets);
            }
        }

        if persist {
            if let Some(old_pulse) = &old_pulse {
                let roster = self.deps().nodes.all(old_pulse.number);
                // No roster for the old pulse means there was no processing:
                // the network is starting. Activate the zero jet.
                if roster.is_empty() {
                    self.deps()
                        .jets
                        .update(new_pulse.number, true, &[JetId::EMPTY]);
                    match self.deps().hot_waiter.unlock(JetId::EMPTY) {
                        Ok(()) => {}
                        Err(Error::WaiterNotLocked(jet)) => {
                            tracing::error!(%jet, "zero jet waiter was not locked")
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        Ok((jets, removed, old_pulse, prev_pn))
    }

    /// Clone the jet tree onto the new pulse and decide, per jet this node
    /// executed, whether to keep or split it, re-evaluating next-pulse
    /// ownership either way.
    fn process_jets(&self, old_pn: PulseNumber, new_pn: PulseNumber) -> Result<Vec<JetInfo>, Error> {
        let deps = self.deps();
        deps.jets.clone_tree(old_pn, new_pn);

        if deps.network.origin().role != NodeRole::LightMaterial {
            return Ok(Vec::new());
        }

        let me = deps.coordinator.me();
        let mut owned = Vec::new();
        for jet in deps.jets.all(new_pn) {
            match deps.coordinator.light_executor_for_jet(jet, old_pn) {
                Ok(executor) if executor == me => owned.push(jet),
                Ok(_) | Err(Error::NoNodes(_)) => {}
                Err(err) => return Err(err),
            }
        }

        let to_split = deps.split_policy.pick(&owned);
        let mut results = Vec::new();

        for jet in owned {
            let mut info = JetInfo::new(jet);
            if Some(jet) == to_split {
                let (left, right) = deps.jets.split(new_pn, jet)?;
                // We were the last executor for the parent, so the split is
                // immediately actual.
                deps.jets.update(new_pn, true, &[left, right]);

                let mut left_info = JetInfo::new(left);
                let mut right_info = JetInfo::new(right);
                for child in [&mut left_info, &mut right_info] {
                    let executor = deps.coordinator.light_executor_for_jet(child.id, new_pn)?;
                    if executor == me {
                        child.mine_next = true;
                        deps.indexes.carry_over(old_pn, new_pn, jet, child.id);
                    }
                }
                tracing::info!(parent = %jet, left = %left, right = %right, "jet split performed");

                info.left = Some(Box::new(left_info));
                info.right = Some(Box::new(right_info));
            } else {
                deps.jets.update(new_pn, true, &[jet]);
                let executor = deps.coordinator.light_executor_for_jet(jet, new_pn)?;
                if executor == me {
                    info.mine_next = true;
                    deps.indexes.carry_over(old_pn, new_pn, jet, jet);
                }
            }
            results.push(info);
        }

        Ok(results)
    }

    /// Fail stale hot-data waiters and release the jets this node keeps
    /// executing.
    fn prepare_for_next_pulse(&self, jets: &[JetInfo]) {
        self.deps().hot_waiter.throw_timeout();

        for info in jets {
            let unlocks = match (&info.left, &info.right) {
                (None, None) => vec![(info.mine_next, info.id)],
                (Some(left), Some(right)) => {
                    vec![(left.mine_next, left.id), (right.mine_next, right.id)]
                }
                _ => Vec::new(),
            };
            for (mine, jet) in unlocks {
                if !mine {
                    continue;
                }
                if let Err(err) = self.deps().hot_waiter.unlock(jet) {
                    tracing::error!(%jet, ?err, "failed to unlock hot data waiter");
                }
            }
        }
    }

    /// Seal each closed jet into a drop and hand its hot state to the next
    /// executors. Per-jet work fans out; the first failure is the tick's
    /// error, but every jet runs to completion. Hot-data sends are
    /// fire-and-forget.
    async fn process_end_pulse(
        &self,
        jets: &[JetInfo],
        prev_pn: PulseNumber,
        old_pulse: &Pulse,
        new_pulse: &Pulse,
    ) -> Result<(), Error> {
        let mut group = JoinSet::new();

        for info in jets.iter().cloned() {
            let this = self.clone();
            let (old_pn, new_pn) = (old_pulse.number, new_pulse.number);

            group.spawn(async move {
                let drop = this.create_drop(&info, prev_pn, old_pn)?;
                let package = this.executor_hot_data(info.id, old_pn, new_pn, drop).await;

                match (&info.left, &info.right) {
                    (None, None) => {
                        if !info.mine_next {
                            this.send_hot_data(&package, info.id, new_pn);
                        }
                    }
                    (Some(left), Some(right)) => {
                        if !left.mine_next {
                            this.send_hot_data(&package, left.id, new_pn);
                        }
                        if !right.mine_next {
                            this.send_hot_data(&package, right.id, new_pn);
                        }
                    }
                    _ => {}
                }
                Ok::<(), Error>(())
            });
        }

        let mut first_err = None;
        while let Some(joined) = group.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(?err, "end-of-pulse jet processing failed");
                    first_err.get_or_insert(err);
                }
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic())
                }
                Err(join_err) => tracing::error!(?join_err, "jet task cancelled"),
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Seal `info`'s jet for the closing pulse: fold the pulse's persisted
    /// messages through the hasher seeded with the previous drop's hash.
    fn create_drop(
        &self,
        info: &JetInfo,
        prev_pn: PulseNumber,
        closing_pn: PulseNumber,
    ) -> Result<JetDrop, Error> {
        let jet = info.id;
        let prev_hash = match self.deps().drops.for_pulse(jet, prev_pn) {
            Ok(prev) => prev.hash,
            // Chain root: a fresh jet (genesis or split child) starts from
            // the well-known zero.
            Err(Error::NotFound) => vec![0; HASH_SIZE],
            Err(err) => return Err(err),
        };

        let messages = self.deps().messages.for_pulse(closing_pn)?;
        let mut parts: Vec<&[u8]> = Vec::with_capacity(messages.len() + 1);
        parts.push(&prev_hash);
        parts.extend(messages.iter().map(Vec::as_slice));
        let hash = hash_of(&parts).to_vec();

        let mut drop = JetDrop {
            polymorph: 0,
            split_threshold_exceeded: self.record_count(jet, closing_pn)? as i64,
            split: info.left.is_some(),
            prev_hash,
            hash,
            ..Default::default()
        };
        drop.set_pulse_number(closing_pn);
        drop.set_jet(jet);

        match self.deps().drops.set(&drop) {
            Ok(()) => Ok(drop),
            // This is the only producer of drops; a duplicate means the
            // lifecycle itself is broken.
            Err(Error::Override) => panic!("drop for jet {jet} at {closing_pn} sealed twice"),
            Err(err) => Err(err),
        }
    }

    fn record_count(&self, jet: JetId, pn: PulseNumber) -> Result<u64, Error> {
        let prefix = prefix_key(Scope::Record, &pn.to_bytes());
        let mut count = 0;
        for kv in self.deps().store.prefix_scan(&prefix) {
            let (key, _) = kv.map_err(Error::from)?;
            let mut id_bytes = [0; Id::SIZE];
            id_bytes.copy_from_slice(&key[1..]);
            if jet.contains(Id::from_bytes(id_bytes).hash()) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// The lifeline snapshot plus open-request table a next executor needs.
    async fn executor_hot_data(
        &self,
        jet: JetId,
        old_pn: PulseNumber,
        new_pn: PulseNumber,
        drop: JetDrop,
    ) -> HotPackage {
        let recent = self
            .deps()
            .indexes
            .for_jet(old_pn, jet)
            .into_iter()
            .map(|(object, entry)| HotIndex {
                object_id: object,
                ttl: entry.ttl,
                index: entry.lifeline.encode(),
            })
            .collect();
        let pending = self.deps().filaments.pending_for_jet(old_pn, jet).await;

        HotPackage {
            drop,
            pulse: new_pn,
            recent,
            pending,
        }
    }

    /// Fire-and-forget hot-data dispatch: failures are logged, never fatal.
    /// The next executor's state initialiser requests anything lost.
    fn send_hot_data(&self, package: &HotPackage, jet: JetId, new_pn: PulseNumber) {
        let target = match self.deps().coordinator.light_executor_for_jet(jet, new_pn) {
            Ok(target) => target,
            Err(err) => {
                tracing::error!(%jet, ?err, "no executor to send hot data to");
                return;
            }
        };
        let payload = package.payload_for(jet);
        let bus = self.deps().bus.clone();

        tokio::spawn(async move {
            match bus.send_to(target, payload).await {
                Ok(reply) => {
                    if let Err(err) = bus::expect_ok(reply) {
                        tracing::error!(%jet, ?err, "failed to send hot data");
                    }
                }
                Err(err) => tracing::error!(%jet, ?err, "failed to send hot data"),
            }
        });
    }

    /// Drop the closing pulse's pending state of jets handed to another
    /// executor.
    fn post_process_jets(&self, old_pn: PulseNumber, jets: &[JetInfo]) {
        for info in jets {
            if !info.mine_next {
                self.deps().filaments.delete_for_jet(old_pn, info.id);
            }
        }
    }

    fn add_sync(&self, jets: &[JetInfo], pulse: PulseNumber) {
        if !self.inner.options.enable_sync
            || self.deps().network.origin().role != NodeRole::LightMaterial
        {
            return;
        }
        for info in jets {
            self.deps().sync_pool.add_pulses_to_sync_client(info.id, pulse);
        }
    }

    /// Replicate and then delete state that aged past the light chain limit.
    /// Deletions are idempotent and sequenced so a replay after a crash
    /// converges.
    async fn clean_light_data(&self, new_pulse: Pulse, removed: HashMap<JetId, Vec<Id>>) {
        // Cleanup trails the retention window by the configured slack.
        let delta = self.inner.options.light_chain_limit + self.inner.options.cleaner_delay;
        let horizon = match self.deps().pulses.backwards(new_pulse.number, delta) {
            Ok(entry) => entry.pulse.number,
            Err(err) => {
                tracing::debug!(?err, delta, "not enough pulses to clean yet");
                return;
            }
        };

        if let Err(err) = self.deps().sync_pool.light_cleanup(horizon, &removed).await {
            tracing::error!(?err, %horizon, "light cleanup failed");
        }

        let stale = match self.deps().pulses.backwards(horizon, 1) {
            Ok(entry) => entry.pulse.number,
            Err(err) => {
                tracing::debug!(?err, "no pulse behind the cleanup horizon");
                return;
            }
        };
        self.deps().jets.delete(stale);
        self.deps().nodes.delete(stale);
        self.deps().filaments.delete_for_pn(stale);
        self.deps().indexes.delete_for_pn(stale);
        if let Err(err) = self.deps().pulses.delete(stale) {
            tracing::error!(?err, %stale, "failed to delete stale pulse");
        }
    }
}
