//! Resource tags, counted hands, building costs, and the bank.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// The five tradable resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Brick,
    Lumber,
    Ore,
    Grain,
    Wool,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Brick,
        Resource::Lumber,
        Resource::Ore,
        Resource::Grain,
        Resource::Wool,
    ];
}

/// A non-negative count of each resource. Used for hands, costs, trade
/// sides, and the bank supply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCount {
    pub brick: u32,
    pub lumber: u32,
    pub ore: u32,
    pub grain: u32,
    pub wool: u32,
}

impl ResourceCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_amounts(brick: u32, lumber: u32, ore: u32, grain: u32, wool: u32) -> Self {
        Self {
            brick,
            lumber,
            ore,
            grain,
            wool,
        }
    }

    /// A count holding `amount` of a single resource.
    pub fn single(resource: Resource, amount: u32) -> Self {
        let mut c = Self::new();
        c.add(resource, amount);
        c
    }

    /// Same amount of every resource.
    pub fn uniform(amount: u32) -> Self {
        Self::with_amounts(amount, amount, amount, amount, amount)
    }

    pub fn total(&self) -> u32 {
        self.brick + self.lumber + self.ore + self.grain + self.wool
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn get(&self, resource: Resource) -> u32 {
        match resource {
            Resource::Brick => self.brick,
            Resource::Lumber => self.lumber,
            Resource::Ore => self.ore,
            Resource::Grain => self.grain,
            Resource::Wool => self.wool,
        }
    }

    pub fn set(&mut self, resource: Resource, amount: u32) {
        match resource {
            Resource::Brick => self.brick = amount,
            Resource::Lumber => self.lumber = amount,
            Resource::Ore => self.ore = amount,
            Resource::Grain => self.grain = amount,
            Resource::Wool => self.wool = amount,
        }
    }

    pub fn add(&mut self, resource: Resource, amount: u32) {
        self.set(resource, self.get(resource) + amount);
    }

    pub fn add_all(&mut self, other: &ResourceCount) {
        for r in Resource::ALL {
            self.add(r, other.get(r));
        }
    }

    pub fn can_afford(&self, cost: &ResourceCount) -> bool {
        Resource::ALL.iter().all(|&r| self.get(r) >= cost.get(r))
    }

    /// Subtract `cost` if fully covered; leaves `self` untouched otherwise.
    pub fn try_subtract(&mut self, cost: &ResourceCount) -> bool {
        if !self.can_afford(cost) {
            return false;
        }
        for r in Resource::ALL {
            self.set(r, self.get(r) - cost.get(r));
        }
        true
    }

    /// Remove one card chosen uniformly over the multiset of cards held.
    pub fn take_random<R: Rng>(&mut self, rng: &mut R) -> Option<Resource> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let mut pick = rng.gen_range(0..total);
        for r in Resource::ALL {
            let held = self.get(r);
            if pick < held {
                self.set(r, held - 1);
                return Some(r);
            }
            pick -= held;
        }
        None
    }

    /// `(resource, count)` pairs for the non-zero entries.
    pub fn iter(&self) -> impl Iterator<Item = (Resource, u32)> + '_ {
        Resource::ALL
            .into_iter()
            .map(|r| (r, self.get(r)))
            .filter(|(_, n)| *n > 0)
    }
}

/// Fixed building costs.
pub mod costs {
    use super::ResourceCount;

    /// Road: 1 brick, 1 lumber.
    pub fn road() -> ResourceCount {
        ResourceCount::with_amounts(1, 1, 0, 0, 0)
    }

    /// Settlement: 1 brick, 1 lumber, 1 grain, 1 wool.
    pub fn settlement() -> ResourceCount {
        ResourceCount::with_amounts(1, 1, 0, 1, 1)
    }

    /// City upgrade: 3 ore, 2 grain.
    pub fn city() -> ResourceCount {
        ResourceCount::with_amounts(0, 0, 3, 2, 0)
    }

    /// Development card: 1 ore, 1 grain, 1 wool.
    pub fn dev_card() -> ResourceCount {
        ResourceCount::with_amounts(0, 0, 1, 1, 1)
    }
}

/// Number of cards of each resource in the bank at game start.
pub const BANK_SUPPLY_PER_RESOURCE: u32 = 19;

/// The bank's resource supply. Production draws from it, spends return to
/// it; player-to-player transfers never touch it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    supply: ResourceCount,
}

impl Bank {
    pub fn new() -> Self {
        Self {
            supply: ResourceCount::uniform(BANK_SUPPLY_PER_RESOURCE),
        }
    }

    pub fn available(&self, resource: Resource) -> u32 {
        self.supply.get(resource)
    }

    pub fn supply(&self) -> &ResourceCount {
        &self.supply
    }

    /// Take `amount` of a resource out of the bank. Returns false (and
    /// takes nothing) if the supply is short.
    pub fn withdraw(&mut self, resource: Resource, amount: u32) -> bool {
        self.supply.try_subtract(&ResourceCount::single(resource, amount))
    }

    pub fn deposit(&mut self, resource: Resource, amount: u32) {
        self.supply.add(resource, amount);
    }

    pub fn deposit_all(&mut self, counts: &ResourceCount) {
        self.supply.add_all(counts);
    }
}

impl Default for Bank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn totals_and_affordability() {
        let hand = ResourceCount::with_amounts(1, 2, 3, 4, 5);
        assert_eq!(hand.total(), 15);
        assert!(hand.can_afford(&ResourceCount::with_amounts(1, 1, 1, 1, 1)));
        assert!(!hand.can_afford(&ResourceCount::with_amounts(2, 0, 0, 0, 0)));
    }

    #[test]
    fn try_subtract_is_atomic() {
        let mut hand = ResourceCount::with_amounts(1, 1, 0, 0, 0);
        let cost = ResourceCount::with_amounts(1, 2, 0, 0, 0);
        assert!(!hand.try_subtract(&cost));
        assert_eq!(hand, ResourceCount::with_amounts(1, 1, 0, 0, 0));
        assert!(hand.try_subtract(&costs::road()));
        assert!(hand.is_empty());
    }

    #[test]
    fn take_random_is_multiset_weighted() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut hand = ResourceCount::single(Resource::Grain, 1);
        assert_eq!(hand.take_random(&mut rng), Some(Resource::Grain));
        assert!(hand.is_empty());
        assert_eq!(hand.take_random(&mut rng), None);

        // Every draw must come from a held resource.
        let mut hand = ResourceCount::with_amounts(3, 0, 2, 0, 0);
        for _ in 0..5 {
            let drawn = hand.take_random(&mut rng).unwrap();
            assert!(matches!(drawn, Resource::Brick | Resource::Ore));
        }
        assert!(hand.is_empty());
    }

    #[test]
    fn building_costs() {
        assert_eq!(costs::road().total(), 2);
        assert_eq!(costs::settlement().total(), 4);
        assert_eq!(costs::city().total(), 5);
        assert_eq!(costs::dev_card().total(), 3);
    }

    #[test]
    fn bank_withdraw_is_all_or_nothing() {
        let mut bank = Bank::new();
        assert_eq!(bank.available(Resource::Ore), 19);
        assert!(bank.withdraw(Resource::Ore, 19));
        assert!(!bank.withdraw(Resource::Ore, 1));
        assert_eq!(bank.available(Resource::Ore), 0);
        bank.deposit(Resource::Ore, 3);
        assert_eq!(bank.available(Resource::Ore), 3);
    }
}
