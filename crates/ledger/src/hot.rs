use crate::Error;
use models::JetId;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum HotState {
    Waiting,
    Unlocked,
    TimedOut,
}

/// Blocks readers of a jet until its hot data arrives for the new pulse.
///
/// The pulse manager unlocks jets the node keeps owning; the hot-data
/// handler unlocks jets received over the bus; `throw_timeout` fails every
/// pending waiter at the next tick so a missing handoff surfaces as an error
/// instead of a deadlock.
#[derive(Default)]
pub struct HotDataWaiter {
    jets: Mutex<HashMap<JetId, watch::Sender<HotState>>>,
}

impl HotDataWaiter {
    pub fn new() -> HotDataWaiter {
        HotDataWaiter::default()
    }

    /// Wait until `jet`'s hot data is present.
    pub async fn wait(&self, jet: JetId) -> Result<(), Error> {
        let mut rx = {
            let mut jets = self.jets.lock().unwrap();
            jets.entry(jet)
                .or_insert_with(|| watch::channel(HotState::Waiting).0)
                .subscribe()
        };

        loop {
            match *rx.borrow_and_update() {
                HotState::Unlocked => return Ok(()),
                HotState::TimedOut => return Err(Error::WaiterTimeout(jet)),
                HotState::Waiting => {}
            }
            if rx.changed().await.is_err() {
                // The registry was re-armed under us: the pulse moved on.
                return Err(Error::WaiterTimeout(jet));
            }
        }
    }

    /// Mark `jet`'s hot data present and release its waiters. Fails with
    /// `WaiterNotLocked` when the jet is already released for this pulse.
    pub fn unlock(&self, jet: JetId) -> Result<(), Error> {
        let mut jets = self.jets.lock().unwrap();
        let sender = jets
            .entry(jet)
            .or_insert_with(|| watch::channel(HotState::Waiting).0);
        if *sender.borrow() != HotState::Waiting {
            return Err(Error::WaiterNotLocked(jet));
        }
        sender.send_replace(HotState::Unlocked);
        Ok(())
    }

    /// Fail every pending waiter and re-arm the registry for the next pulse.
    pub fn throw_timeout(&self) {
        let mut jets = self.jets.lock().unwrap();
        for sender in jets.values() {
            if *sender.borrow() == HotState::Waiting {
                sender.send_replace(HotState::TimedOut);
            }
        }
        jets.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn unlock_releases_waiters() {
        let waiter = Arc::new(HotDataWaiter::new());
        let jet = JetId::EMPTY;

        let pending = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.wait(jet).await })
        };
        tokio::task::yield_now().await;

        waiter.unlock(jet).unwrap();
        pending.await.unwrap().unwrap();

        // A waiter arriving after the unlock passes straight through.
        waiter.wait(jet).await.unwrap();
    }

    #[tokio::test]
    async fn double_unlock_is_not_locked() {
        let waiter = HotDataWaiter::new();
        waiter.unlock(JetId::EMPTY).unwrap();
        assert!(matches!(
            waiter.unlock(JetId::EMPTY),
            Err(Error::WaiterNotLocked(_))
        ));
    }

    #[tokio::test]
    async fn throw_timeout_fails_pending_waiters() {
        let waiter = Arc::new(HotDataWaiter::new());
        let jet = JetId::EMPTY.split().0;

        let pending = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.wait(jet).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        waiter.throw_timeout();
        assert!(matches!(
            pending.await.unwrap(),
            Err(Error::WaiterTimeout(_))
        ));

        // Re-armed: the jet can be waited on (and unlocked) again.
        waiter.unlock(jet).unwrap();
        waiter.wait(jet).await.unwrap();
    }
}
