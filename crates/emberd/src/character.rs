//! Character data shared by players and NPCs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::battle::{BattleAction, BattleId, CombatantId};
use crate::item::{Absorb, DamageEntry, DamageType, ItemInst, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Neutral,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Neutral => "neutral",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Some(Gender::Male),
            "female" | "f" => Some(Gender::Female),
            "neutral" | "other" | "none" => Some(Gender::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Attrs {
    pub strength: i32,
    pub intellect: i32,
    pub dexterity: i32,
    pub speed: i32,
}

impl Default for Attrs {
    fn default() -> Self {
        Self {
            strength: 8,
            intellect: 8,
            dexterity: 8,
            speed: 8,
        }
    }
}

/// Bare fists, when nothing better is wielded or innate.
const UNARMED: DamageEntry = DamageEntry {
    kind: DamageType::Bludgeoning,
    min: 1,
    max: 2,
};

#[derive(Debug, Clone)]
pub struct Character {
    pub name: String,
    pub gender: Gender,
    pub hp: i32,
    pub max_hp: i32,
    pub mp: i32,
    pub max_mp: i32,
    pub attrs: Attrs,
    pub hit: i32,
    pub evade: i32,
    /// NPC natural attacks/hide; empty for players.
    pub innate_damage: Vec<DamageEntry>,
    pub innate_absorb: Vec<Absorb>,
    pub inventory: Vec<ItemInst>,
    pub equipped: HashMap<Slot, ItemInst>,
    pub battle: Option<BattleId>,
    pub target: Option<CombatantId>,
    pub next_action: BattleAction,
    /// Accrues one unit per battle round, spent by actions; never negative.
    pub action_points: f32,
}

impl Character {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            gender: Gender::Neutral,
            hp: 20,
            max_hp: 20,
            mp: 10,
            max_mp: 10,
            attrs: Attrs::default(),
            hit: 0,
            evade: 0,
            innate_damage: Vec::new(),
            innate_absorb: Vec::new(),
            inventory: Vec::new(),
            equipped: HashMap::new(),
            battle: None,
            target: None,
            next_action: BattleAction::Attack,
            action_points: 0.0,
        }
    }

    pub fn alive(&self) -> bool {
        self.hp > 0
    }

    pub fn eff_hit(&self) -> i32 {
        let gear: i32 = self
            .equipped
            .values()
            .filter_map(|i| i.facets.equippable.as_ref())
            .map(|e| e.hit)
            .sum();
        self.hit + gear
    }

    pub fn eff_evade(&self) -> i32 {
        let gear: i32 = self
            .equipped
            .values()
            .filter_map(|i| i.facets.equippable.as_ref())
            .map(|e| e.evade)
            .sum();
        self.evade + gear
    }

    /// Damage entries for the next swing: wielded weapon, else innate, else fists.
    pub fn attack_damage(&self) -> Vec<DamageEntry> {
        if let Some(weapon) = self.equipped.get(&Slot::Wield) {
            if let Some(eq) = weapon.facets.equippable.as_ref() {
                if !eq.damage.is_empty() {
                    return eq.damage.clone();
                }
            }
        }
        if !self.innate_damage.is_empty() {
            return self.innate_damage.clone();
        }
        vec![UNARMED]
    }

    /// Flat reduction applied to incoming damage of one type, gear plus innate.
    pub fn absorption(&self, kind: DamageType) -> i32 {
        let innate: i32 = self
            .innate_absorb
            .iter()
            .filter(|a| a.kind == kind)
            .map(|a| a.amount)
            .sum();
        let gear: i32 = self
            .equipped
            .values()
            .filter_map(|i| i.facets.equippable.as_ref())
            .flat_map(|e| e.absorb.iter())
            .filter(|a| a.kind == kind)
            .map(|a| a.amount)
            .sum();
        innate + gear
    }

    pub fn find_inventory(&self, token: &str) -> Option<usize> {
        self.inventory.iter().position(|i| i.matches_token(token))
    }

    pub fn clear_battle_state(&mut self) {
        self.battle = None;
        self.target = None;
        self.next_action = BattleAction::Attack;
        self.action_points = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::ProtoRef;
    use crate::item::{Equippable, Facets};

    fn sword() -> ItemInst {
        ItemInst {
            proto: ProtoRef {
                area: "haven".to_string(),
                id: 1,
            },
            name: "a sword".to_string(),
            keywords: vec!["sword".to_string()],
            desc: String::new(),
            facets: Facets {
                equippable: Some(Equippable {
                    slot: Slot::Wield,
                    hit: 2,
                    evade: 0,
                    damage: vec![DamageEntry {
                        kind: DamageType::Slashing,
                        min: 3,
                        max: 5,
                    }],
                    absorb: vec![Absorb {
                        kind: DamageType::Frost,
                        amount: 1,
                    }],
                }),
                ..Default::default()
            },
            contents: Vec::new(),
        }
    }

    #[test]
    fn unarmed_falls_back_to_fists() {
        let c = Character::new("bob");
        let dmg = c.attack_damage();
        assert_eq!(dmg.len(), 1);
        assert_eq!(dmg[0].kind, DamageType::Bludgeoning);
    }

    #[test]
    fn wielded_weapon_drives_damage_and_hit() {
        let mut c = Character::new("bob");
        c.hit = 10;
        c.equipped.insert(Slot::Wield, sword());
        assert_eq!(c.eff_hit(), 12);
        let dmg = c.attack_damage();
        assert_eq!(dmg[0].kind, DamageType::Slashing);
        assert_eq!((dmg[0].min, dmg[0].max), (3, 5));
        assert_eq!(c.absorption(DamageType::Frost), 1);
        assert_eq!(c.absorption(DamageType::Fire), 0);
    }
}
