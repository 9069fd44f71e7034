use std::collections::BTreeMap;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stake_core::{
    accrual::{self, Accrual},
    level::{self, Level, LevelTier},
    package::{PackageStatus, RewardBalance, StakingPackage},
    params::StakingParams,
    payout::{self, PayoutSplit},
    AccountId, Amount, PackageId, StakeError, Timestamp,
};

use crate::referral::{LevelChange, ReferralGraph};

pub type RequestId = String;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub owner: AccountId,
    pub level: Level,
    /// Principal of this account's open packages.
    pub staked_amount: Amount,
    /// Principal of open packages held anywhere in the downline.
    pub team_performance: Amount,
    pub referral_code: String,
    pub referrer: Option<AccountId>,
    pub created_at: Timestamp,
    pub packages_count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSummary {
    pub owner: AccountId,
    pub level: Level,
    pub staked_amount: Amount,
    pub direct_referrals: u32,
    pub indirect_referrals: u32,
    /// Own open principal plus the downline's.
    pub team_performance: Amount,
    pub pending_rewards: Amount,
    pub primary_lifetime: Amount,
    pub secondary_lifetime: Amount,
    pub open_packages: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub total_staked: Amount,
    pub total_accounts: u64,
    pub active_packages: u64,
    pub total_released: Amount,
    pub total_primary_paid: Amount,
    pub total_secondary_paid: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
    pub timestamp: Timestamp,
    pub next_package_id: PackageId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    AccountCreated {
        owner: AccountId,
        referral_code: String,
        at: Timestamp,
    },
    ReferralLinked {
        referrer: AccountId,
        referee: AccountId,
    },
    LevelChanged {
        account: AccountId,
        from: Level,
        to: Level,
    },
    PackageCreated {
        package: PackageId,
        owner: AccountId,
        principal: Amount,
        at: Timestamp,
    },
    RewardReleased {
        package: PackageId,
        amount: Amount,
        at: Timestamp,
    },
    PackageEligible {
        package: PackageId,
        at: Timestamp,
    },
    PackageExited {
        package: PackageId,
        primary: Amount,
        secondary: Amount,
        at: Timestamp,
    },
}

/// Result of a timer pass over every open package.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickReport {
    pub ticked: u64,
    pub released: Amount,
    pub newly_eligible: Vec<PackageId>,
    /// Packages left as they were because their own accrual failed.
    pub failed: Vec<TickFailure>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickFailure {
    pub package: PackageId,
    pub error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub params: StakingParams,
    pub accounts: BTreeMap<AccountId, Account>,
    pub balances: BTreeMap<AccountId, RewardBalance>,
    pub packages: BTreeMap<PackageId, StakingPackage>,
    pub graph: ReferralGraph,
    pub stats: PoolStats,
    pub events: Vec<LedgerEvent>,
    pub applied_requests: BTreeMap<RequestId, PackageId>,
    #[serde(with = "hex_root")]
    pub state_root: [u8; 32],
}

/// In-memory staking state: accounts, the referral forest, packages and
/// reward balances, with an append-only event log.
///
/// Operations validate and compute before writing, so a failed call leaves
/// the ledger unchanged.
#[derive(Clone, Debug, Default)]
pub struct StakingLedger {
    pub meta: SnapshotMetadata,
    pub params: StakingParams,
    pub accounts: BTreeMap<AccountId, Account>,
    pub balances: BTreeMap<AccountId, RewardBalance>,
    pub packages: BTreeMap<PackageId, StakingPackage>,
    pub graph: ReferralGraph,
    pub stats: PoolStats,
    pub events: Vec<LedgerEvent>,
    codes: BTreeMap<String, AccountId>,
    applied_requests: BTreeMap<RequestId, PackageId>,
}

impl StakingLedger {
    pub fn new(params: StakingParams) -> Result<Self, StakeError> {
        params.validate()?;
        Ok(Self {
            meta: SnapshotMetadata {
                next_package_id: 1,
                ..SnapshotMetadata::default()
            },
            params,
            ..Self::default()
        })
    }

    pub fn account(&self, owner: &AccountId) -> Result<&Account, StakeError> {
        self.accounts
            .get(owner)
            .ok_or_else(|| StakeError::AccountNotFound(owner.clone()))
    }

    pub fn account_by_code(&self, code: &str) -> Option<&Account> {
        self.codes
            .get(&code.to_ascii_uppercase())
            .and_then(|owner| self.accounts.get(owner))
    }

    pub fn package(&self, id: PackageId) -> Result<&StakingPackage, StakeError> {
        self.packages.get(&id).ok_or(StakeError::PackageNotFound(id))
    }

    pub fn packages_of(&self, owner: &AccountId) -> Result<Vec<&StakingPackage>, StakeError> {
        self.account(owner)?;
        Ok(self.packages.values().filter(|p| &p.owner == owner).collect())
    }

    pub fn balance(&self, owner: &AccountId) -> Result<RewardBalance, StakeError> {
        self.account(owner)?;
        Ok(self.balances.get(owner).cloned().unwrap_or_default())
    }

    pub fn level_table(&self) -> Vec<LevelTier> {
        level::level_table()
    }

    pub fn events_since(&self, cursor: usize) -> &[LedgerEvent] {
        self.events.get(cursor..).unwrap_or(&[])
    }

    /// Registers `owner`, optionally under the account holding `referrer_code`.
    pub fn create_account(
        &mut self,
        owner: &AccountId,
        referrer_code: Option<&str>,
        now: Timestamp,
    ) -> Result<Account, StakeError> {
        if self.accounts.contains_key(owner) {
            return Err(StakeError::AccountExists(owner.clone()));
        }
        let referrer = match referrer_code {
            Some(code) => Some(
                self.account_by_code(code)
                    .map(|a| a.owner.clone())
                    .ok_or_else(|| StakeError::ReferrerNotFound(code.to_string()))?,
            ),
            None => None,
        };

        let mut graph = self.graph.clone();
        graph.insert_account(owner.clone());
        let changes = match &referrer {
            Some(referrer) => graph.add_edge(referrer, owner)?,
            None => Vec::new(),
        };

        let referral_code = self.unused_code(owner);
        let account = Account {
            owner: owner.clone(),
            level: 0,
            staked_amount: 0,
            team_performance: 0,
            referral_code: referral_code.clone(),
            referrer: referrer.clone(),
            created_at: now,
            packages_count: 0,
        };

        self.graph = graph;
        self.accounts.insert(owner.clone(), account.clone());
        self.balances.insert(owner.clone(), RewardBalance::default());
        self.codes.insert(referral_code.clone(), owner.clone());
        self.stats.total_accounts += 1;
        self.events.push(LedgerEvent::AccountCreated {
            owner: owner.clone(),
            referral_code,
            at: now,
        });
        if let Some(referrer) = referrer {
            self.events.push(LedgerEvent::ReferralLinked {
                referrer,
                referee: owner.clone(),
            });
        }
        self.apply_level_changes(changes);
        self.bump(now);
        info!("registered account {owner}");
        Ok(account)
    }

    pub fn create_package(
        &mut self,
        owner: &AccountId,
        principal: Amount,
        now: Timestamp,
    ) -> Result<StakingPackage, StakeError> {
        let id = self.meta.next_package_id;
        let package = StakingPackage::open(id, owner.clone(), principal, now, &self.params)?;
        let account = self.account(owner)?;
        let staked = account
            .staked_amount
            .checked_add(principal)
            .ok_or(StakeError::Overflow)?;
        let total_staked = self
            .stats
            .total_staked
            .checked_add(principal)
            .ok_or(StakeError::Overflow)?;
        let upline = self.graph.ancestry(owner.clone(), usize::MAX);
        let team_updates = self.team_updates(&upline, |team| team.checked_add(principal))?;

        if let Some(account) = self.accounts.get_mut(owner) {
            account.staked_amount = staked;
            account.packages_count += 1;
        }
        self.commit_team_updates(team_updates);
        self.stats.total_staked = total_staked;
        self.stats.active_packages += 1;
        self.packages.insert(id, package.clone());
        self.meta.next_package_id += 1;
        self.events.push(LedgerEvent::PackageCreated {
            package: id,
            owner: owner.clone(),
            principal,
            at: now,
        });
        self.bump(now);
        info!("account {owner} opened package {id} with principal {principal}");
        Ok(package)
    }

    /// Like [`create_package`](Self::create_package), but a `request_id` that
    /// was already applied returns the package it created instead of staking
    /// again.
    pub fn create_package_idempotent(
        &mut self,
        owner: &AccountId,
        principal: Amount,
        request_id: &RequestId,
        now: Timestamp,
    ) -> Result<StakingPackage, StakeError> {
        if let Some(id) = self.applied_requests.get(request_id) {
            return self.package(*id).cloned();
        }
        let package = self.create_package(owner, principal, now)?;
        self.applied_requests.insert(request_id.clone(), package.id);
        Ok(package)
    }

    /// Advances one package to `now`. Exited packages release zero and are
    /// left untouched.
    pub fn tick(&mut self, id: PackageId, now: Timestamp) -> Result<Accrual, StakeError> {
        let package = self.package(id)?;
        if package.status == PackageStatus::Exited {
            return Ok(Accrual::default());
        }
        let owner = package.owner.clone();
        let accel = self.graph.acceleration(&owner)?;
        let preview = accrual::compute(package, now, &accel, &self.params)?;
        let total_released = self
            .stats
            .total_released
            .checked_add(preview.released)
            .ok_or(StakeError::Overflow)?;

        let mut package = package.clone();
        let mut balance = self.balances.get(&owner).cloned().unwrap_or_default();
        let step = accrual::accrue(&mut package, &mut balance, now, &accel, &self.params)?;

        self.packages.insert(id, package);
        self.balances.insert(owner, balance);
        self.stats.total_released = total_released;
        if step.released > 0 {
            self.events.push(LedgerEvent::RewardReleased {
                package: id,
                amount: step.released,
                at: now,
            });
        }
        if step.reached_cap {
            self.events.push(LedgerEvent::PackageEligible { package: id, at: now });
            info!("package {id} reached its cap and is eligible for exit");
        }
        self.bump(now);
        Ok(step)
    }

    /// Ticks every open package. A package whose accrual fails is skipped and
    /// reported; the others still advance.
    pub fn tick_all(&mut self, now: Timestamp) -> Result<TickReport, StakeError> {
        let open: Vec<PackageId> = self
            .packages
            .values()
            .filter(|p| p.status.is_open())
            .map(|p| p.id)
            .collect();
        let mut report = TickReport::default();
        for id in open {
            match self.tick(id, now) {
                Ok(step) => {
                    report.ticked += 1;
                    // bounded by stats.total_released, which is checked
                    report.released = report.released.saturating_add(step.released);
                    if step.reached_cap {
                        report.newly_eligible.push(id);
                    }
                }
                Err(err) => {
                    warn!("skipping package {id} in tick pass: {err}");
                    report.failed.push(TickFailure {
                        package: id,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Retires a package that reached its cap, paying its released amount
    /// out across both reward assets.
    pub fn exit(&mut self, id: PackageId, now: Timestamp) -> Result<PayoutSplit, StakeError> {
        let package = self.package(id)?;
        match package.status {
            PackageStatus::Active => return Err(StakeError::NotEligible(id)),
            PackageStatus::Exited => return Err(StakeError::AlreadyExited(id)),
            PackageStatus::EligibleForExit => {}
        }
        let owner = package.owner.clone();
        let principal = package.principal;
        let contribution = package.cumulative_released;

        let split = payout::split_on_exit(contribution, &self.params)?;
        let mut balance = self.balance(&owner)?;
        balance.pending = balance
            .pending
            .checked_sub(contribution)
            .ok_or(StakeError::Overflow)?;
        balance.primary_lifetime = balance
            .primary_lifetime
            .checked_add(split.primary)
            .ok_or(StakeError::Overflow)?;
        balance.secondary_lifetime = balance
            .secondary_lifetime
            .checked_add(split.secondary)
            .ok_or(StakeError::Overflow)?;
        let staked = self
            .account(&owner)?
            .staked_amount
            .checked_sub(principal)
            .ok_or(StakeError::Overflow)?;
        let upline = self.graph.ancestry(owner.clone(), usize::MAX);
        let team_updates = self.team_updates(&upline, |team| team.checked_sub(principal))?;
        let mut stats = self.stats.clone();
        stats.total_staked = stats
            .total_staked
            .checked_sub(principal)
            .ok_or(StakeError::Overflow)?;
        stats.active_packages = stats.active_packages.saturating_sub(1);
        stats.total_primary_paid = stats
            .total_primary_paid
            .checked_add(split.primary)
            .ok_or(StakeError::Overflow)?;
        stats.total_secondary_paid = stats
            .total_secondary_paid
            .checked_add(split.secondary)
            .ok_or(StakeError::Overflow)?;

        if let Some(package) = self.packages.get_mut(&id) {
            package.status = PackageStatus::Exited;
            package.exited_at = Some(now);
        }
        if let Some(account) = self.accounts.get_mut(&owner) {
            account.staked_amount = staked;
            account.packages_count = account.packages_count.saturating_sub(1);
        }
        self.balances.insert(owner.clone(), balance);
        self.commit_team_updates(team_updates);
        self.stats = stats;
        self.events.push(LedgerEvent::PackageExited {
            package: id,
            primary: split.primary,
            secondary: split.secondary,
            at: now,
        });
        self.bump(now);
        info!(
            "package {id} of {owner} exited: primary {}, secondary {}",
            split.primary, split.secondary
        );
        Ok(split)
    }

    pub fn summarize(&self, owner: &AccountId) -> Result<AccountSummary, StakeError> {
        let account = self.account(owner)?;
        let balance = self.balances.get(owner).cloned().unwrap_or_default();
        let (direct, indirect) = self.graph.referral_counts(owner)?;
        Ok(AccountSummary {
            owner: owner.clone(),
            level: self.graph.level_of(owner)?,
            staked_amount: account.staked_amount,
            direct_referrals: direct,
            indirect_referrals: indirect,
            team_performance: account.staked_amount.saturating_add(account.team_performance),
            pending_rewards: balance.pending,
            primary_lifetime: balance.primary_lifetime,
            secondary_lifetime: balance.secondary_lifetime,
            open_packages: account.packages_count,
        })
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_merkle_root(self)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            params: self.params.clone(),
            accounts: self.accounts.clone(),
            balances: self.balances.clone(),
            packages: self.packages.clone(),
            graph: self.graph.clone(),
            stats: self.stats.clone(),
            events: self.events.clone(),
            applied_requests: self.applied_requests.clone(),
            state_root: self.state_root(),
        }
    }

    /// Rebuilds a ledger, refusing snapshots whose state root does not match
    /// their contents or whose referral forest is inconsistent.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, StakeError> {
        snapshot.params.validate()?;
        snapshot.graph.verify()?;
        let codes = snapshot
            .accounts
            .values()
            .map(|a| (a.referral_code.clone(), a.owner.clone()))
            .collect();
        let ledger = Self {
            meta: snapshot.meta,
            params: snapshot.params,
            accounts: snapshot.accounts,
            balances: snapshot.balances,
            packages: snapshot.packages,
            graph: snapshot.graph,
            stats: snapshot.stats,
            events: snapshot.events,
            codes,
            applied_requests: snapshot.applied_requests,
        };
        if ledger.state_root() != snapshot.state_root {
            return Err(StakeError::Storage(format!(
                "state root mismatch: snapshot {}, recomputed {}",
                hex::encode(snapshot.state_root),
                hex::encode(ledger.state_root())
            )));
        }
        Ok(ledger)
    }

    fn apply_level_changes(&mut self, changes: Vec<LevelChange>) {
        for change in changes {
            if let Some(account) = self.accounts.get_mut(&change.account) {
                account.level = change.to;
            }
            info!(
                "account {} moved from level {} to {}",
                change.account, change.from, change.to
            );
            self.events.push(LedgerEvent::LevelChanged {
                account: change.account,
                from: change.from,
                to: change.to,
            });
        }
    }

    fn team_updates(
        &self,
        upline: &[AccountId],
        op: impl Fn(Amount) -> Option<Amount>,
    ) -> Result<Vec<(AccountId, Amount)>, StakeError> {
        upline
            .iter()
            .map(|ancestor| {
                let current = self.account(ancestor)?.team_performance;
                op(current)
                    .map(|v| (ancestor.clone(), v))
                    .ok_or(StakeError::Overflow)
            })
            .collect()
    }

    fn commit_team_updates(&mut self, updates: Vec<(AccountId, Amount)>) {
        for (ancestor, team) in updates {
            if let Some(account) = self.accounts.get_mut(&ancestor) {
                account.team_performance = team;
            }
        }
    }

    fn unused_code(&self, owner: &AccountId) -> String {
        let mut salt = 0u32;
        loop {
            let code = referral_code(owner, salt);
            if !self.codes.contains_key(&code) {
                return code;
            }
            salt += 1;
        }
    }

    fn bump(&mut self, now: Timestamp) {
        self.meta.height += 1;
        self.meta.timestamp = now;
    }
}

/// Eight uppercase hex characters derived from the owner key.
pub fn referral_code(owner: &AccountId, salt: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"refcode");
    hasher.update(owner.as_bytes());
    hasher.update(salt.to_le_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    hex::encode_upper(&digest[..4])
}

fn put_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn compute_merkle_root(ledger: &StakingLedger) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();

    let mut hasher = Sha256::new();
    hasher.update(b"pool");
    hasher.update(ledger.meta.next_package_id.to_le_bytes());
    let stats = &ledger.stats;
    for value in [
        stats.total_staked,
        stats.total_accounts,
        stats.active_packages,
        stats.total_released,
        stats.total_primary_paid,
        stats.total_secondary_paid,
    ] {
        hasher.update(value.to_le_bytes());
    }
    leaves.push(hasher.finalize().into());

    for (owner, account) in &ledger.accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        put_str(&mut hasher, owner);
        hasher.update([account.level]);
        hasher.update(account.staked_amount.to_le_bytes());
        hasher.update(account.team_performance.to_le_bytes());
        put_str(&mut hasher, &account.referral_code);
        put_str(&mut hasher, account.referrer.as_deref().unwrap_or(""));
        hasher.update(account.packages_count.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (referee, sponsor) in ledger.graph.edges() {
        let mut hasher = Sha256::new();
        hasher.update(b"edge");
        put_str(&mut hasher, sponsor);
        put_str(&mut hasher, referee);
        leaves.push(hasher.finalize().into());
    }
    for (member, level) in ledger.graph.cached_levels() {
        let mut hasher = Sha256::new();
        hasher.update(b"level");
        put_str(&mut hasher, member);
        hasher.update([level]);
        leaves.push(hasher.finalize().into());
    }
    for (owner, balance) in &ledger.balances {
        let mut hasher = Sha256::new();
        hasher.update(b"balance");
        put_str(&mut hasher, owner);
        hasher.update(balance.pending.to_le_bytes());
        hasher.update(balance.primary_lifetime.to_le_bytes());
        hasher.update(balance.secondary_lifetime.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (id, package) in &ledger.packages {
        let mut hasher = Sha256::new();
        hasher.update(b"package");
        hasher.update(id.to_le_bytes());
        put_str(&mut hasher, &package.owner);
        hasher.update(package.principal.to_le_bytes());
        hasher.update(package.cap.to_le_bytes());
        hasher.update(package.cumulative_released.to_le_bytes());
        hasher.update(package.release_carry.to_le_bytes());
        hasher.update(package.last_accrual_at.to_le_bytes());
        hasher.update([package.status as u8]);
        leaves.push(hasher.finalize().into());
    }
    for (request, id) in &ledger.applied_requests {
        let mut hasher = Sha256::new();
        hasher.update(b"request");
        put_str(&mut hasher, request);
        hasher.update(id.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"stake-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stake_core::{UNIT, SECONDS_PER_DAY};

    const DAY: i64 = SECONDS_PER_DAY;

    fn ledger() -> StakingLedger {
        StakingLedger::new(StakingParams::default()).unwrap()
    }

    fn register(ledger: &mut StakingLedger, owner: &str, referrer: Option<&str>) -> Account {
        let code = referrer.map(|r| ledger.account(&r.to_string()).unwrap().referral_code.clone());
        ledger
            .create_account(&owner.to_string(), code.as_deref(), 0)
            .unwrap()
    }

    #[test]
    fn registration_links_referrer_by_code() {
        let mut ledger = ledger();
        let alice = register(&mut ledger, "alice", None);
        assert_eq!(alice.referral_code.len(), 8);
        let bob = register(&mut ledger, "bob", Some("alice"));
        assert_eq!(bob.referrer.as_deref(), Some("alice"));
        assert_eq!(
            ledger.account_by_code(&alice.referral_code.to_lowercase()).unwrap().owner,
            "alice"
        );
        assert_eq!(ledger.stats.total_accounts, 2);
        assert!(matches!(
            ledger.events.last(),
            Some(LedgerEvent::ReferralLinked { .. })
        ));
    }

    #[test]
    fn registration_failures_leave_ledger_untouched() {
        let mut ledger = ledger();
        register(&mut ledger, "alice", None);
        let root = ledger.state_root();
        let height = ledger.meta.height;

        let err = ledger
            .create_account(&"alice".to_string(), None, 0)
            .unwrap_err();
        assert_eq!(err, StakeError::AccountExists("alice".into()));
        let err = ledger
            .create_account(&"bob".to_string(), Some("NOPE0000"), 0)
            .unwrap_err();
        assert_eq!(err, StakeError::ReferrerNotFound("NOPE0000".into()));

        assert_eq!(ledger.state_root(), root);
        assert_eq!(ledger.meta.height, height);
        assert!(!ledger.graph.contains(&"bob".to_string()));
    }

    #[test]
    fn staking_rolls_principal_up_the_team() {
        let mut ledger = ledger();
        register(&mut ledger, "root", None);
        register(&mut ledger, "mid", Some("root"));
        register(&mut ledger, "leaf", Some("mid"));
        ledger.create_package(&"leaf".into(), 200 * UNIT, 0).unwrap();
        ledger.create_package(&"mid".into(), 100 * UNIT, 0).unwrap();

        let root = ledger.summarize(&"root".into()).unwrap();
        assert_eq!(root.staked_amount, 0);
        assert_eq!(root.team_performance, 300 * UNIT);
        assert_eq!(root.direct_referrals, 1);
        assert_eq!(root.indirect_referrals, 1);
        let mid = ledger.summarize(&"mid".into()).unwrap();
        assert_eq!(mid.team_performance, 300 * UNIT);
        assert_eq!(ledger.stats.total_staked, 300 * UNIT);
    }

    #[test]
    fn below_minimum_and_unknown_owner_are_rejected() {
        let mut ledger = ledger();
        register(&mut ledger, "alice", None);
        let err = ledger.create_package(&"alice".into(), 50 * UNIT, 0).unwrap_err();
        assert!(matches!(err, StakeError::BelowMinimum { .. }));
        let err = ledger.create_package(&"ghost".into(), 500 * UNIT, 0).unwrap_err();
        assert_eq!(err, StakeError::AccountNotFound("ghost".into()));
        assert!(ledger.packages.is_empty());
    }

    #[test]
    fn repeated_request_returns_the_same_package() {
        let mut ledger = ledger();
        register(&mut ledger, "alice", None);
        let request = "req-1".to_string();
        let first = ledger
            .create_package_idempotent(&"alice".into(), 100 * UNIT, &request, 0)
            .unwrap();
        let second = ledger
            .create_package_idempotent(&"alice".into(), 100 * UNIT, &request, 5)
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(ledger.packages.len(), 1);
        assert_eq!(ledger.account(&"alice".into()).unwrap().staked_amount, 100 * UNIT);
    }

    #[test]
    fn full_lifecycle_pays_out_and_retires_package() {
        let mut ledger = ledger();
        register(&mut ledger, "sponsor", None);
        register(&mut ledger, "alice", Some("sponsor"));
        let pkg = ledger.create_package(&"alice".into(), 1_000 * UNIT, 0).unwrap();

        let err = ledger.exit(pkg.id, DAY).unwrap_err();
        assert_eq!(err, StakeError::NotEligible(pkg.id));

        // 500 days at 3 tokens per day reaches the 1500 cap
        let step = ledger.tick(pkg.id, 500 * DAY).unwrap();
        assert!(step.reached_cap);
        assert_eq!(ledger.package(pkg.id).unwrap().status, PackageStatus::EligibleForExit);
        assert_eq!(ledger.balance(&"alice".into()).unwrap().pending, 1_500 * UNIT);
        assert_eq!(ledger.summarize(&"sponsor".into()).unwrap().team_performance, 1_000 * UNIT);

        let split = ledger.exit(pkg.id, 501 * DAY).unwrap();
        assert_eq!(split.primary, 750 * UNIT);
        assert_eq!(split.secondary, 750 * UNIT);
        let balance = ledger.balance(&"alice".into()).unwrap();
        assert_eq!(balance.pending, 0);
        assert_eq!(balance.primary_lifetime, 750 * UNIT);
        assert_eq!(balance.secondary_lifetime, 750 * UNIT);

        let exited = ledger.package(pkg.id).unwrap().clone();
        assert_eq!(exited.status, PackageStatus::Exited);
        assert_eq!(exited.exited_at, Some(501 * DAY));
        assert_eq!(ledger.account(&"alice".into()).unwrap().staked_amount, 0);
        assert_eq!(ledger.summarize(&"sponsor".into()).unwrap().team_performance, 0);
        assert_eq!(ledger.stats.active_packages, 0);

        // second exit fails and changes nothing
        let root = ledger.state_root();
        assert_eq!(ledger.exit(pkg.id, 502 * DAY).unwrap_err(), StakeError::AlreadyExited(pkg.id));
        assert_eq!(ledger.state_root(), root);

        // ticking an exited package is a no-op
        let step = ledger.tick(pkg.id, 600 * DAY).unwrap();
        assert_eq!(step.released, 0);
        assert_eq!(ledger.package(pkg.id).unwrap(), &exited);
        assert_eq!(ledger.state_root(), root);
    }

    #[test]
    fn exit_only_moves_the_exiting_package_contribution() {
        let mut ledger = ledger();
        register(&mut ledger, "alice", None);
        let small = ledger.create_package(&"alice".into(), 100 * UNIT, 0).unwrap();
        let big = ledger.create_package(&"alice".into(), 1_000 * UNIT, 0).unwrap();
        let report = ledger.tick_all(500 * DAY).unwrap();
        assert_eq!(report.ticked, 2);
        assert_eq!(report.newly_eligible, vec![small.id, big.id]);

        ledger.exit(small.id, 500 * DAY).unwrap();
        let balance = ledger.balance(&"alice".into()).unwrap();
        assert_eq!(balance.pending, 1_500 * UNIT);
        assert_eq!(balance.primary_lifetime + balance.secondary_lifetime, 150 * UNIT);
    }

    #[test]
    fn snapshot_round_trip_preserves_state_root() {
        let mut ledger = ledger();
        register(&mut ledger, "alice", None);
        register(&mut ledger, "bob", Some("alice"));
        let pkg = ledger.create_package(&"bob".into(), 300 * UNIT, 0).unwrap();
        ledger.tick(pkg.id, DAY).unwrap();

        let snapshot = ledger.snapshot();
        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: LedgerSnapshot = serde_json::from_str(&encoded).unwrap();
        let restored = StakingLedger::from_snapshot(decoded).unwrap();
        assert_eq!(restored.state_root(), ledger.state_root());
        assert_eq!(restored.summarize(&"alice".into()).unwrap(), ledger.summarize(&"alice".into()).unwrap());
        let bob_code = ledger.account(&"bob".into()).unwrap().referral_code.clone();
        assert_eq!(restored.account_by_code(&bob_code).unwrap().owner, "bob");
    }

    #[test]
    fn tampered_snapshot_is_refused() {
        let mut ledger = ledger();
        register(&mut ledger, "alice", None);
        let mut snapshot = ledger.snapshot();
        snapshot.balances.get_mut("alice").unwrap().pending = 1;
        let err = StakingLedger::from_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, StakeError::Storage(_)));
    }

    #[test]
    fn tamper_outside_accounts_and_balances_is_refused() {
        let mut ledger = ledger();
        register(&mut ledger, "alice", None);
        register(&mut ledger, "bob", Some("alice"));
        ledger
            .create_package_idempotent(&"bob".into(), 100 * UNIT, &"req-1".to_string(), 0)
            .unwrap();
        let clean = ledger.snapshot();

        let mut stats = clean.clone();
        stats.stats.total_released += 1;
        let mut requests = clean.clone();
        requests.applied_requests.insert("req-2".into(), 1);
        let mut graph = clean.clone();
        graph.graph.insert_account("ghost".into());
        let mut carry = clean.clone();
        carry.packages.get_mut(&1).unwrap().release_carry = 7;

        for tampered in [stats, requests, graph, carry] {
            let err = StakingLedger::from_snapshot(tampered).unwrap_err();
            assert!(matches!(err, StakeError::Storage(_)));
        }
        assert!(StakingLedger::from_snapshot(clean).is_ok());
    }

    #[test]
    fn tick_all_skips_a_failing_package_and_advances_the_rest() {
        let mut ledger = ledger();
        register(&mut ledger, "alice", None);
        let early = ledger.create_package(&"alice".into(), 1_000 * UNIT, 0).unwrap();
        let late = ledger.create_package(&"alice".into(), 1_000 * UNIT, 10 * DAY).unwrap();

        let report = ledger.tick_all(DAY).unwrap();
        assert_eq!(report.ticked, 1);
        assert_eq!(report.released, 3 * UNIT);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].package, late.id);
        assert!(report.failed[0].error.contains("clock"));

        assert_eq!(ledger.package(early.id).unwrap().cumulative_released, 3 * UNIT);
        assert_eq!(ledger.package(late.id).unwrap(), &late);
        assert_eq!(ledger.stats.total_released, 3 * UNIT);
        assert_eq!(ledger.balance(&"alice".into()).unwrap().pending, 3 * UNIT);
    }

    #[test]
    fn tick_overflow_leaves_package_and_balance_untouched() {
        let mut ledger = ledger();
        register(&mut ledger, "alice", None);
        let pkg = ledger.create_package(&"alice".into(), 1_000 * UNIT, 0).unwrap();
        ledger.stats.total_released = Amount::MAX - 1;
        let root = ledger.state_root();

        assert_eq!(ledger.tick(pkg.id, DAY).unwrap_err(), StakeError::Overflow);
        assert_eq!(ledger.package(pkg.id).unwrap(), &pkg);
        assert_eq!(ledger.balance(&"alice".into()).unwrap().pending, 0);
        assert_eq!(ledger.state_root(), root);
    }

    #[test]
    fn referral_codes_are_deterministic_and_salted() {
        let owner = "alice".to_string();
        assert_eq!(referral_code(&owner, 0), referral_code(&owner, 0));
        assert_ne!(referral_code(&owner, 0), referral_code(&owner, 1));
        assert!(referral_code(&owner, 0)
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
