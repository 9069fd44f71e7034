use log::{info, warn};
use parking_lot::RwLock;
use stake_core::{
    accrual::Accrual,
    clock::Clock,
    level::LevelTier,
    package::StakingPackage,
    params::StakingParams,
    payout::PayoutSplit,
    AccountId, Amount, PackageId, StakeError, Timestamp,
};

use crate::{
    ledger::{Account, AccountSummary, LedgerEvent, PoolStats, StakingLedger, TickReport},
    store::StateStore,
};

/// Entry point for front ends.
///
/// Mutations take the write lock, run against a working copy of the ledger,
/// persist it and only then replace the live ledger; a failed operation or a
/// failed save leaves both the live ledger and the store as they were.
/// Reads share the read lock and may run concurrently.
pub struct StakingService<S, C> {
    ledger: RwLock<StakingLedger>,
    store: S,
    clock: C,
}

impl<S: StateStore, C: Clock> StakingService<S, C> {
    /// Loads the stored ledger, or starts an empty one with `params` when the
    /// store holds nothing yet.
    pub fn open(store: S, clock: C, params: StakingParams) -> Result<Self, StakeError> {
        let ledger = match store.load()? {
            Some(snapshot) => {
                let ledger = StakingLedger::from_snapshot(snapshot)?;
                info!(
                    "loaded ledger at height {} ({} accounts, {} packages)",
                    ledger.meta.height,
                    ledger.accounts.len(),
                    ledger.packages.len()
                );
                ledger
            }
            None => {
                let ledger = StakingLedger::new(params)?;
                store.save(&ledger.snapshot())?;
                ledger
            }
        };
        Ok(Self {
            ledger: RwLock::new(ledger),
            store,
            clock,
        })
    }

    /// Starts a fresh ledger, replacing whatever the store held.
    pub fn init(store: S, clock: C, params: StakingParams) -> Result<Self, StakeError> {
        let ledger = StakingLedger::new(params)?;
        store.save(&ledger.snapshot())?;
        info!("initialised empty ledger");
        Ok(Self {
            ledger: RwLock::new(ledger),
            store,
            clock,
        })
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn create_account(
        &self,
        owner: &AccountId,
        referrer_code: Option<&str>,
    ) -> Result<Account, StakeError> {
        self.mutate(|ledger, now| ledger.create_account(owner, referrer_code, now))
    }

    pub fn create_package(
        &self,
        owner: &AccountId,
        principal: Amount,
        request_id: Option<&str>,
    ) -> Result<StakingPackage, StakeError> {
        self.mutate(|ledger, now| match request_id {
            Some(request) => {
                ledger.create_package_idempotent(owner, principal, &request.to_string(), now)
            }
            None => ledger.create_package(owner, principal, now),
        })
    }

    /// Released amount for one package up to the clock's current time.
    pub fn tick(&self, id: PackageId) -> Result<Amount, StakeError> {
        self.tick_at(id, self.clock.now())
    }

    pub fn tick_at(&self, id: PackageId, now: Timestamp) -> Result<Amount, StakeError> {
        self.tick_detailed(id, now).map(|step| step.released)
    }

    pub fn tick_detailed(&self, id: PackageId, now: Timestamp) -> Result<Accrual, StakeError> {
        self.mutate(|ledger, _| ledger.tick(id, now))
    }

    pub fn tick_all(&self) -> Result<TickReport, StakeError> {
        self.mutate(|ledger, now| ledger.tick_all(now))
    }

    pub fn exit_package(&self, id: PackageId) -> Result<PayoutSplit, StakeError> {
        self.mutate(|ledger, now| ledger.exit(id, now))
    }

    pub fn summary(&self, owner: &AccountId) -> Result<AccountSummary, StakeError> {
        self.ledger.read().summarize(owner)
    }

    pub fn account(&self, owner: &AccountId) -> Result<Account, StakeError> {
        self.ledger.read().account(owner).cloned()
    }

    pub fn level_table(&self) -> Vec<LevelTier> {
        self.ledger.read().level_table()
    }

    pub fn package(&self, id: PackageId) -> Result<StakingPackage, StakeError> {
        self.ledger.read().package(id).cloned()
    }

    pub fn packages_of(&self, owner: &AccountId) -> Result<Vec<StakingPackage>, StakeError> {
        Ok(self
            .ledger
            .read()
            .packages_of(owner)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.ledger.read().stats.clone()
    }

    pub fn params(&self) -> StakingParams {
        self.ledger.read().params.clone()
    }

    pub fn events_since(&self, cursor: usize) -> Vec<LedgerEvent> {
        self.ledger.read().events_since(cursor).to_vec()
    }

    pub fn state_root(&self) -> [u8; 32] {
        self.ledger.read().state_root()
    }

    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut StakingLedger, Timestamp) -> Result<T, StakeError>,
    ) -> Result<T, StakeError> {
        let mut live = self.ledger.write();
        let mut working = live.clone();
        let out = op(&mut working, self.clock.now())?;
        if let Err(err) = self.store.save(&working.snapshot()) {
            warn!("discarding operation, snapshot save failed: {err}");
            return Err(err);
        }
        *live = working;
        Ok(out)
    }
}
