//! The battle engine: one round per world tick.
//!
//! Every combatant accrues one action point at the start of a round and the
//! engine then repeatedly picks the lowest-AP combatant that can afford its
//! next action, resolves the action, and applies staged removals before the
//! next pick. A battle ends the moment one team empties; cleanup (mode
//! restore, world-map removal) is staged and never mutates a team list
//! while the round is iterating it.

use crate::item::DamageEntry;
use crate::npc::NpcId;
use crate::rng::Rng64;
use crate::session::SessionId;
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BattleId(pub u64);

impl std::fmt::Display for BattleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "battle#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombatantId {
    Player(SessionId),
    Npc(NpcId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleAction {
    Attack,
    Flee,
}

impl BattleAction {
    pub fn cost(self) -> f32 {
        match self {
            BattleAction::Attack => 1.0,
            BattleAction::Flee => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoveReason {
    Dead,
    Fled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Swing {
    Miss,
    Hit,
    Crit,
}

/// `d20 + hit - evade`: above 20 crits, above 10 hits.
pub fn classify_swing(total: i32) -> Swing {
    if total > 20 {
        Swing::Crit
    } else if total > 10 {
        Swing::Hit
    } else {
        Swing::Miss
    }
}

/// Roll one damage entry. Criticals deal `ceil(1.5*min) ..= 2*max`.
pub fn roll_damage_entry(rng: &mut Rng64, entry: &DamageEntry, crit: bool) -> i32 {
    let (lo, hi) = if crit {
        ((3 * entry.min + 1) / 2, 2 * entry.max)
    } else {
        (entry.min, entry.max)
    };
    rng.roll_range(lo, hi.max(lo))
}

#[derive(Debug)]
pub struct Battle {
    pub id: BattleId,
    pub team_a: Vec<CombatantId>,
    pub team_b: Vec<CombatantId>,
    remove: Vec<(CombatantId, RemoveReason)>,
    pub done: bool,
}

impl Battle {
    pub fn new(id: BattleId, team_a: Vec<CombatantId>, team_b: Vec<CombatantId>) -> Self {
        Self {
            id,
            team_a,
            team_b,
            remove: Vec::new(),
            done: false,
        }
    }

    pub fn contains(&self, cid: CombatantId) -> bool {
        self.team_a.contains(&cid) || self.team_b.contains(&cid)
    }

    /// Join on the side opposing `foe`.
    pub fn join_against(&mut self, cid: CombatantId, foe: CombatantId) {
        if self.team_a.contains(&foe) {
            self.team_b.push(cid);
        } else {
            self.team_a.push(cid);
        }
    }

    fn foes_of(&self, cid: CombatantId) -> &[CombatantId] {
        if self.team_a.contains(&cid) {
            &self.team_b
        } else {
            &self.team_a
        }
    }

    /// One full combat round. Terminates in at most `total-AP / min-cost`
    /// picks because every pick spends at least one action's cost and AP
    /// only accrues at the round boundary.
    pub fn run_round(&mut self, world: &mut World) {
        for cid in self.team_a.iter().chain(self.team_b.iter()) {
            if let Some(ch) = world.combatant_mut(*cid) {
                if ch.alive() {
                    ch.action_points += 1.0;
                }
            }
        }

        loop {
            if self.team_a.is_empty() || self.team_b.is_empty() {
                break;
            }
            let Some(actor) = self.pick_ready(world) else {
                break;
            };
            self.take_action(world, actor);
            self.apply_removals(world);
        }

        if self.team_a.is_empty() || self.team_b.is_empty() {
            self.finish(world);
        }
    }

    /// Lowest-AP combatant that can afford its action. Ties keep the first
    /// encountered in team-concatenation order (team A first), which makes
    /// the pick deterministic.
    fn pick_ready(&self, world: &World) -> Option<CombatantId> {
        let mut best: Option<(CombatantId, f32)> = None;
        for &cid in self.team_a.iter().chain(self.team_b.iter()) {
            let Some(ch) = world.combatant(cid) else {
                continue;
            };
            if !ch.alive() || ch.action_points < ch.next_action.cost() {
                continue;
            }
            match best {
                None => best = Some((cid, ch.action_points)),
                Some((_, b)) if ch.action_points < b => best = Some((cid, ch.action_points)),
                _ => {}
            }
        }
        best.map(|(cid, _)| cid)
    }

    fn take_action(&mut self, world: &mut World, actor: CombatantId) {
        let action = match world.combatant_mut(actor) {
            Some(ch) => {
                let a = ch.next_action;
                ch.action_points -= a.cost();
                a
            }
            None => return,
        };
        match action {
            BattleAction::Attack => self.attack(world, actor),
            BattleAction::Flee => {
                self.try_flee(world, actor);
                // Fleeing is a one-shot attempt; fall back to swinging.
                if let Some(ch) = world.combatant_mut(actor) {
                    ch.next_action = BattleAction::Attack;
                }
            }
        }
    }

    /// Current target if it is still a live opposing combatant, else the
    /// first remaining foe. Never resolves against a stale reference.
    fn resolve_target(&self, world: &World, actor: CombatantId) -> Option<CombatantId> {
        let foes = self.foes_of(actor);
        let stored = world.combatant(actor).and_then(|ch| ch.target);
        if let Some(t) = stored {
            if foes.contains(&t) && world.combatant(t).map(|c| c.alive()).unwrap_or(false) {
                return Some(t);
            }
        }
        foes.iter()
            .copied()
            .find(|&t| world.combatant(t).map(|c| c.alive()).unwrap_or(false))
    }

    fn attack(&mut self, world: &mut World, actor: CombatantId) {
        let Some(target) = self.resolve_target(world, actor) else {
            return;
        };
        if let Some(ch) = world.combatant_mut(actor) {
            ch.target = Some(target);
        }

        let (actor_name, hit, damage) = {
            let ch = match world.combatant(actor) {
                Some(c) => c,
                None => return,
            };
            (ch.name.clone(), ch.eff_hit(), ch.attack_damage())
        };
        let (target_name, evade) = {
            let ch = match world.combatant(target) {
                Some(c) => c,
                None => return,
            };
            (ch.name.clone(), ch.eff_evade())
        };

        let roll = world.rng.d20();
        let swing = classify_swing(roll + hit - evade);
        if swing == Swing::Miss {
            world.combat_line(actor, &format!("your attack misses {target_name}."));
            world.combat_line(target, &format!("{actor_name}'s attack misses you."));
            return;
        }

        let crit = swing == Swing::Crit;
        let mut total = 0i32;
        for entry in &damage {
            let raw = roll_damage_entry(&mut world.rng, entry, crit);
            let absorbed = world
                .combatant(target)
                .map(|c| c.absorption(entry.kind))
                .unwrap_or(0);
            total += (raw - absorbed).max(0);
        }

        let dead = {
            let Some(ch) = world.combatant_mut(target) else {
                return;
            };
            ch.hp -= total;
            !ch.alive()
        };

        if crit {
            world.combat_line(
                actor,
                &format!("critical! your attack tears into {target_name} for {total}."),
            );
            world.combat_line(
                target,
                &format!("critical! {actor_name}'s attack tears into you for {total}."),
            );
        } else {
            world.combat_line(actor, &format!("your attack hits {target_name} for {total}."));
            world.combat_line(target, &format!("{actor_name}'s attack hits you for {total}."));
        }

        if dead {
            if let Some(room) = world.combatant_room(target) {
                world.room_message(&room, &format!("* {target_name} is slain!"), &[]);
            }
            self.remove.push((target, RemoveReason::Dead));
        }
    }

    fn try_flee(&mut self, world: &mut World, actor: CombatantId) {
        let here = match world.combatant_room(actor) {
            Some(r) => r,
            None => return,
        };
        let escape = if world.rng.chance(50) {
            world.random_open_exit(&here)
        } else {
            None
        };
        match escape {
            Some((dir, to)) => {
                world.combat_line(actor, "you flee!");
                self.remove.push((actor, RemoveReason::Fled));
                world.flee_move(actor, to, dir);
            }
            None => {
                world.combat_line(actor, "you fail to get away!");
            }
        }
    }

    /// Staged removals land here, after the acting combatant finished.
    fn apply_removals(&mut self, world: &mut World) {
        for (cid, reason) in std::mem::take(&mut self.remove) {
            self.team_a.retain(|c| *c != cid);
            self.team_b.retain(|c| *c != cid);
            if let Some(ch) = world.combatant_mut(cid) {
                ch.clear_battle_state();
            }
            match reason {
                RemoveReason::Dead => world.combatant_died(cid),
                RemoveReason::Fled => {}
            }
        }
    }

    /// One team emptied: release the survivors and stage the battle itself
    /// for removal from the world map.
    fn finish(&mut self, world: &mut World) {
        if self.done {
            return;
        }
        self.done = true;
        let survivors: Vec<CombatantId> = self
            .team_a
            .iter()
            .chain(self.team_b.iter())
            .copied()
            .collect();
        for cid in survivors {
            if let Some(ch) = world.combatant_mut(cid) {
                ch.clear_battle_state();
            }
            if let CombatantId::Player(sid) = cid {
                if let Some(sess) = world.sessions.get_mut(&sid) {
                    sess.mode = crate::mode::Mode::Normal;
                }
                world.push_line(sid, "you are victorious!");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::DamageType;

    #[test]
    fn swing_thresholds_match_the_dice_rules() {
        // Attack totals: 15 lands, 21 crits, 10 and below whiff.
        assert_eq!(classify_swing(15), Swing::Hit);
        assert_eq!(classify_swing(21), Swing::Crit);
        assert_eq!(classify_swing(10), Swing::Miss);
        assert_eq!(classify_swing(11), Swing::Hit);
        assert_eq!(classify_swing(20), Swing::Hit);
        assert_eq!(classify_swing(1), Swing::Miss);
    }

    #[test]
    fn normal_damage_stays_in_base_range() {
        let entry = DamageEntry {
            kind: DamageType::Slashing,
            min: 3,
            max: 5,
        };
        let mut rng = Rng64::from_seed(99);
        for _ in 0..200 {
            let d = roll_damage_entry(&mut rng, &entry, false);
            assert!((3..=5).contains(&d), "normal roll {d} out of range");
        }
    }

    #[test]
    fn critical_damage_uses_the_widened_range() {
        // ceil(1.5 * 3) = 5 up to 2 * 5 = 10.
        let entry = DamageEntry {
            kind: DamageType::Slashing,
            min: 3,
            max: 5,
        };
        let mut rng = Rng64::from_seed(7);
        for _ in 0..200 {
            let d = roll_damage_entry(&mut rng, &entry, true);
            assert!((5..=10).contains(&d), "crit roll {d} out of range");
        }
    }
}
