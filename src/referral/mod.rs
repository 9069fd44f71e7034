use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use stake_core::{
    accrual::Acceleration,
    level::{self, Level, TeamComposition},
    AccountId, StakeError,
};

/// A level that moved while re-evaluating the referral forest.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelChange {
    pub account: AccountId,
    pub from: Level,
    pub to: Level,
}

/// Referral forest plus the cached level of every member.
///
/// Each member has at most one sponsor and edges are never removed. Cached
/// levels are refreshed bottom-up along the sponsor chain whenever a subtree
/// grows, so every cached level equals the policy applied to current counts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ReferralGraph {
    sponsors: BTreeMap<AccountId, AccountId>,
    referees: BTreeMap<AccountId, BTreeSet<AccountId>>,
    levels: BTreeMap<AccountId, Level>,
}

impl ReferralGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a root member. Returns `false` if it was already known.
    pub fn insert_account(&mut self, account: AccountId) -> bool {
        if self.levels.contains_key(&account) {
            return false;
        }
        self.levels.insert(account, 0);
        true
    }

    pub fn contains(&self, account: &AccountId) -> bool {
        self.levels.contains_key(account)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn referrer_of(&self, account: &AccountId) -> Option<&AccountId> {
        self.sponsors.get(account)
    }

    /// Links `referee` under `referrer` and re-evaluates the sponsor chain.
    pub fn add_edge(
        &mut self,
        referrer: &AccountId,
        referee: &AccountId,
    ) -> Result<Vec<LevelChange>, StakeError> {
        self.ensure_known(referrer)?;
        self.ensure_known(referee)?;
        if referrer == referee
            || self
                .ancestry(referrer.clone(), usize::MAX)
                .iter()
                .any(|a| a == referee)
        {
            return Err(StakeError::CycleDetected {
                referrer: referrer.clone(),
                referee: referee.clone(),
            });
        }
        if self.sponsors.contains_key(referee) {
            return Err(StakeError::AlreadyReferred(referee.clone()));
        }

        self.sponsors.insert(referee.clone(), referrer.clone());
        self.referees
            .entry(referrer.clone())
            .or_default()
            .insert(referee.clone());
        Ok(self.refresh_from(referrer))
    }

    /// Sponsors of `node`, nearest first, at most `limit` of them.
    pub fn ancestry(&self, mut node: AccountId, limit: usize) -> Vec<AccountId> {
        let mut chain = Vec::new();
        let mut visited = BTreeSet::new();
        while let Some(parent) = self.sponsors.get(&node) {
            if !visited.insert(parent.clone()) {
                break;
            }
            chain.push(parent.clone());
            if chain.len() >= limit {
                break;
            }
            node = parent.clone();
        }
        chain
    }

    pub fn direct_referrals_of(&self, account: &AccountId) -> Result<Vec<AccountId>, StakeError> {
        self.ensure_known(account)?;
        Ok(self.children(account).cloned().collect())
    }

    /// Referrals of referrals (depth exactly two).
    pub fn indirect_referrals_of(
        &self,
        account: &AccountId,
    ) -> Result<Vec<AccountId>, StakeError> {
        self.ensure_known(account)?;
        Ok(self
            .children(account)
            .flat_map(|child| self.children(child))
            .cloned()
            .collect())
    }

    /// `(direct, indirect)` referral counts.
    pub fn referral_counts(&self, account: &AccountId) -> Result<(u32, u32), StakeError> {
        self.ensure_known(account)?;
        let direct = self.children(account).count();
        let indirect = self
            .children(account)
            .map(|child| self.children(child).count())
            .sum::<usize>();
        Ok((direct as u32, indirect as u32))
    }

    /// Every account below `account`, breadth first.
    pub fn downline(&self, account: &AccountId) -> Result<Vec<AccountId>, StakeError> {
        self.ensure_known(account)?;
        let mut out = Vec::new();
        let mut queue: VecDeque<&AccountId> = self.children(account).collect();
        while let Some(next) = queue.pop_front() {
            out.push(next.clone());
            queue.extend(self.children(next));
        }
        Ok(out)
    }

    /// Downline accounts (any depth) whose level is exactly `level`.
    pub fn team_count_at_level(&self, account: &AccountId, level: Level) -> Result<u32, StakeError> {
        let count = self
            .downline(account)?
            .iter()
            .filter(|member| self.cached_level(member) == level)
            .count();
        Ok(count as u32)
    }

    pub fn team_composition(&self, account: &AccountId) -> Result<TeamComposition, StakeError> {
        let (direct, _) = self.referral_counts(account)?;
        let mut composition = TeamComposition {
            direct_referrals: direct,
            ..TeamComposition::default()
        };
        for member in self.downline(account)? {
            let slot = self.cached_level(&member).min(level::MAX_LEVEL) as usize;
            composition.team_at_level[slot] += 1;
        }
        Ok(composition)
    }

    pub fn level_of(&self, account: &AccountId) -> Result<Level, StakeError> {
        self.levels
            .get(account)
            .copied()
            .ok_or_else(|| StakeError::AccountNotFound(account.clone()))
    }

    /// Referral counts and level grant that accelerate `account`'s packages.
    pub fn acceleration(&self, account: &AccountId) -> Result<Acceleration, StakeError> {
        let (direct, indirect) = self.referral_counts(account)?;
        Ok(Acceleration {
            direct_referrals: direct,
            indirect_referrals: indirect,
            grant: level::grant_for(self.level_of(account)?),
        })
    }

    /// `(referee, sponsor)` pairs in key order.
    pub fn edges(&self) -> impl Iterator<Item = (&AccountId, &AccountId)> + '_ {
        self.sponsors.iter()
    }

    pub fn cached_levels(&self) -> impl Iterator<Item = (&AccountId, Level)> + '_ {
        self.levels.iter().map(|(a, l)| (a, *l))
    }

    /// Checks that the referee index mirrors the sponsor map, every edge
    /// joins known members, and every cached level matches current counts.
    pub fn verify(&self) -> Result<(), StakeError> {
        let indexed: usize = self.referees.values().map(BTreeSet::len).sum();
        if indexed != self.sponsors.len() {
            return Err(StakeError::Storage(
                "referral index does not match sponsor map".into(),
            ));
        }
        for (referee, sponsor) in &self.sponsors {
            self.ensure_known(referee)?;
            self.ensure_known(sponsor)?;
            let listed = self
                .referees
                .get(sponsor)
                .map_or(false, |set| set.contains(referee));
            if !listed {
                return Err(StakeError::Storage(format!(
                    "referral edge {sponsor} -> {referee} missing from index"
                )));
            }
        }
        for (member, cached) in &self.levels {
            let expected = level::level_of(&self.team_composition(member)?).level;
            if expected != *cached {
                return Err(StakeError::Storage(format!(
                    "cached level {cached} of {member} should be {expected}"
                )));
            }
        }
        Ok(())
    }

    fn refresh_from(&mut self, start: &AccountId) -> Vec<LevelChange> {
        let mut chain = vec![start.clone()];
        chain.extend(self.ancestry(start.clone(), usize::MAX));

        let mut changes = Vec::new();
        for account in chain {
            let composition = match self.team_composition(&account) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let computed = level::level_of(&composition).level;
            let current = self.cached_level(&account);
            if computed != current {
                debug_assert!(computed > current, "levels only move up");
                self.levels.insert(account.clone(), computed);
                changes.push(LevelChange {
                    account,
                    from: current,
                    to: computed,
                });
            }
        }
        changes
    }

    fn children<'a>(&'a self, account: &AccountId) -> impl Iterator<Item = &'a AccountId> + 'a {
        self.referees
            .get(account)
            .into_iter()
            .flat_map(|set| set.iter())
    }

    fn cached_level(&self, account: &AccountId) -> Level {
        self.levels.get(account).copied().unwrap_or(0)
    }

    fn ensure_known(&self, account: &AccountId) -> Result<(), StakeError> {
        if self.contains(account) {
            Ok(())
        } else {
            Err(StakeError::AccountNotFound(account.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(accounts: &[&str]) -> ReferralGraph {
        let mut graph = ReferralGraph::new();
        for a in accounts {
            graph.insert_account(a.to_string());
        }
        graph
    }

    fn link(graph: &mut ReferralGraph, referrer: &str, referee: &str) -> Vec<LevelChange> {
        graph.insert_account(referee.to_string());
        graph
            .add_edge(&referrer.to_string(), &referee.to_string())
            .unwrap()
    }

    #[test]
    fn counts_direct_and_indirect_referrals() {
        let mut graph = graph_with(&["root"]);
        link(&mut graph, "root", "alice");
        link(&mut graph, "root", "bob");
        link(&mut graph, "alice", "carol");
        link(&mut graph, "carol", "dave");

        let root = "root".to_string();
        assert_eq!(graph.direct_referrals_of(&root).unwrap(), vec!["alice", "bob"]);
        assert_eq!(graph.indirect_referrals_of(&root).unwrap(), vec!["carol"]);
        assert_eq!(graph.referral_counts(&root).unwrap(), (2, 1));
        assert_eq!(graph.downline(&root).unwrap().len(), 4);
        assert_eq!(
            graph.ancestry("dave".into(), usize::MAX),
            vec!["carol", "alice", "root"]
        );
    }

    #[test]
    fn rejects_cycles_and_second_referrer() {
        let mut graph = graph_with(&["a"]);
        link(&mut graph, "a", "b");
        link(&mut graph, "b", "c");

        let err = graph.add_edge(&"c".into(), &"a".into()).unwrap_err();
        assert!(matches!(err, StakeError::CycleDetected { .. }));
        let err = graph.add_edge(&"a".into(), &"a".into()).unwrap_err();
        assert!(matches!(err, StakeError::CycleDetected { .. }));

        graph.insert_account("d".into());
        let err = graph.add_edge(&"d".into(), &"c".into()).unwrap_err();
        assert_eq!(err, StakeError::AlreadyReferred("c".into()));
        assert_eq!(graph.referrer_of(&"c".into()), Some(&"b".to_string()));
    }

    #[test]
    fn verify_rejects_tampered_levels_and_edges() {
        let mut graph = graph_with(&["leader"]);
        for i in 0..10 {
            link(&mut graph, "leader", &format!("m{i}"));
        }
        assert!(graph.verify().is_ok());

        let mut promoted = graph.clone();
        promoted.levels.insert("m0".into(), 3);
        assert!(matches!(promoted.verify(), Err(StakeError::Storage(_))));

        let mut rewired = graph.clone();
        rewired.sponsors.insert("m1".into(), "m2".into());
        assert!(matches!(rewired.verify(), Err(StakeError::Storage(_))));
    }

    #[test]
    fn unknown_accounts_are_not_found() {
        let graph = graph_with(&["a"]);
        assert_eq!(
            graph.direct_referrals_of(&"zed".into()).unwrap_err(),
            StakeError::AccountNotFound("zed".into())
        );
        assert!(graph.team_count_at_level(&"zed".into(), 1).is_err());
    }

    #[test]
    fn tenth_direct_referral_promotes_to_level_one() {
        let mut graph = graph_with(&["leader"]);
        for i in 0..9 {
            assert!(link(&mut graph, "leader", &format!("m{i}")).is_empty());
        }
        let changes = link(&mut graph, "leader", "m9");
        assert_eq!(
            changes,
            vec![LevelChange {
                account: "leader".into(),
                from: 0,
                to: 1
            }]
        );
        assert_eq!(graph.level_of(&"leader".into()).unwrap(), 1);
    }

    #[test]
    fn promotions_ripple_up_the_chain() {
        // top -> three leads, each with ten directs => top reaches level 2
        let mut graph = graph_with(&["top"]);
        for lead in ["l0", "l1", "l2"] {
            link(&mut graph, "top", lead);
            for i in 0..10 {
                link(&mut graph, lead, &format!("{lead}-m{i}"));
            }
        }
        let top = "top".to_string();
        assert_eq!(graph.level_of(&top).unwrap(), 2);
        assert_eq!(graph.team_count_at_level(&top, 1).unwrap(), 3);
        assert_eq!(graph.team_count_at_level(&top, 0).unwrap(), 30);

        let accel = graph.acceleration(&top).unwrap();
        assert_eq!(accel.direct_referrals, 3);
        assert_eq!(accel.indirect_referrals, 30);
        assert_eq!(accel.grant.team_acceleration_bps, 1_000);
    }
}
