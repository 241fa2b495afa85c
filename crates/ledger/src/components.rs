use crate::drops::{DropDb, DropStorage};
use crate::record::{RecordDb, RecordStorage};
use crate::{
    FilamentCache, HotDataWaiter, IndexStorage, JetCoordinator, JetStorage, MessageHandler,
    MessageStore, NodeStorage, PulseManager, PulseManagerDeps, PulseManagerOptions, PulseStorage,
    SplitPolicy, SyncPool,
};
use bus::{LocalBus, Sender};
use futures::FutureExt;
use models::{Config, Node};
use std::sync::Arc;
use store::{IdLocker, Store};

use crate::pulse_manager::{NoopSwapper, StaticNetwork};

/// Everything a material node runs, wired together.
///
/// Construction opens the store, stacks the storage layers, hooks the node's
/// message handler onto the bus, and assembles the pulse manager. Callers
/// bootstrap genesis and call `manager.start()` before the first tick.
pub struct LightComponents {
    pub store: Arc<Store>,
    pub pulses: Arc<PulseStorage>,
    pub jets: Arc<JetStorage>,
    pub nodes: Arc<NodeStorage>,
    pub indexes: Arc<IndexStorage>,
    pub records: Arc<dyn RecordStorage>,
    pub drops: Arc<dyn DropStorage>,
    pub messages: Arc<MessageStore>,
    pub locker: Arc<IdLocker>,
    pub coordinator: Arc<JetCoordinator>,
    pub filaments: Arc<FilamentCache>,
    pub hot_waiter: Arc<HotDataWaiter>,
    pub handler: Arc<MessageHandler>,
    pub sync_pool: Arc<SyncPool>,
    pub network: Arc<StaticNetwork>,
    pub manager: PulseManager,
}

impl LightComponents {
    pub fn new(
        config: &Config,
        origin: Node,
        working: Vec<Node>,
        bus: &LocalBus,
        split_policy: Arc<dyn SplitPolicy>,
    ) -> Result<LightComponents, crate::Error> {
        let store = Arc::new(Store::open(
            &config.data_directory,
            config.tx_retries_on_conflict,
        )?);
        let sender: Arc<dyn Sender> = Arc::new(bus.clone());

        let pulses = Arc::new(PulseStorage::new(store.clone()));
        let jets = Arc::new(JetStorage::new());
        let nodes = Arc::new(NodeStorage::new());
        let indexes = Arc::new(IndexStorage::new(store.clone()));
        let records: Arc<dyn RecordStorage> = Arc::new(RecordDb::new(store.clone()));
        let drops: Arc<dyn DropStorage> = Arc::new(DropDb::new(store.clone()));
        let messages = Arc::new(MessageStore::new(store.clone()));
        let locker = Arc::new(IdLocker::new());
        let hot_waiter = Arc::new(HotDataWaiter::new());

        let coordinator = Arc::new(JetCoordinator::new(
            origin.reference,
            pulses.clone(),
            nodes.clone(),
            jets.clone(),
        ));
        let filaments = Arc::new(FilamentCache::new(
            indexes.clone(),
            records.clone(),
            coordinator.clone(),
            pulses.clone(),
            sender.clone(),
            locker.clone(),
        ));
        let handler = Arc::new(MessageHandler::new(
            jets.clone(),
            indexes.clone(),
            filaments.clone(),
            records.clone(),
            drops.clone(),
            hot_waiter.clone(),
        ));
        let sync_pool = Arc::new(SyncPool::new(
            sender.clone(),
            coordinator.clone(),
            store.clone(),
            indexes.clone(),
            drops.clone(),
            messages.clone(),
            config.heavy_sync_message_limit,
        ));
        let network = Arc::new(StaticNetwork::new(origin, working));

        let manager = PulseManager::new(
            PulseManagerDeps {
                bus: sender,
                network: network.clone(),
                swapper: Arc::new(NoopSwapper),
                split_policy,
                coordinator: coordinator.clone(),
                pulses: pulses.clone(),
                jets: jets.clone(),
                nodes: nodes.clone(),
                indexes: indexes.clone(),
                filaments: filaments.clone(),
                drops: drops.clone(),
                messages: messages.clone(),
                store: store.clone(),
                hot_waiter: hot_waiter.clone(),
                sync_pool: sync_pool.clone(),
            },
            PulseManagerOptions::from(config),
        );

        // Payloads addressed to this node land in its handler.
        {
            let handler = handler.clone();
            bus.register(origin.reference, move |payload| {
                let handler = handler.clone();
                async move { Ok(handler.handle(payload).await) }.boxed()
            });
        }

        Ok(LightComponents {
            store,
            pulses,
            jets,
            nodes,
            indexes,
            records,
            drops,
            messages,
            locker,
            coordinator,
            filaments,
            hot_waiter,
            handler,
            sync_pool,
            network,
            manager,
        })
    }

    /// Create the genesis records of an empty store.
    pub fn bootstrap(&self) -> Result<models::Reference, crate::Error> {
        crate::bootstrap(
            &self.store,
            &self.pulses,
            self.drops.as_ref(),
            self.records.as_ref(),
            &self.indexes,
        )
    }
}
