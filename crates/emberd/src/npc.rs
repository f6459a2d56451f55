//! NPC prototypes, live NPCs, and their per-tick behavior.
//!
//! Scripts are fixed step-lists (say / emote / wait), not a language; a
//! scripted NPC walks its list one step at a time and loops. Wandering
//! NPCs drift through open exits. Both only act outside battle.

use serde::{Deserialize, Serialize};

use crate::area::ProtoRef;
use crate::character::{Attrs, Character};
use crate::item::{Absorb, DamageEntry};
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NpcId(pub u64);

impl std::fmt::Display for NpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "npc#{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScriptStep {
    Say(String),
    Emote(String),
    /// Idle for this many ticks before the next step.
    Wait(u32),
}

#[derive(Debug, Clone)]
pub struct Script {
    pub id: u32,
    pub area: String,
    pub name: String,
    pub steps: Vec<ScriptStep>,
}

#[derive(Debug, Clone)]
pub struct NpcProto {
    pub id: u32,
    pub area: String,
    pub name: String,
    pub keywords: Vec<String>,
    pub desc: String,
    pub max_hp: i32,
    pub max_mp: i32,
    pub attrs: Attrs,
    pub hit: i32,
    pub evade: i32,
    pub damage: Vec<DamageEntry>,
    pub absorb: Vec<Absorb>,
    pub wander: bool,
    pub script: Option<u32>,
}

impl NpcProto {
    pub fn proto_ref(&self) -> ProtoRef {
        ProtoRef {
            area: self.area.clone(),
            id: self.id,
        }
    }

    pub fn load(&self) -> Character {
        let mut ch = Character::new(&self.name);
        ch.max_hp = self.max_hp;
        ch.hp = self.max_hp;
        ch.max_mp = self.max_mp;
        ch.mp = self.max_mp;
        ch.attrs = self.attrs;
        ch.hit = self.hit;
        ch.evade = self.evade;
        ch.innate_damage = self.damage.clone();
        ch.innate_absorb = self.absorb.clone();
        ch
    }
}

#[derive(Debug)]
pub struct Npc {
    pub id: NpcId,
    pub proto: ProtoRef,
    pub ch: Character,
    pub keywords: Vec<String>,
    pub desc: String,
    pub location: crate::area::RoomRef,
    pub wander: bool,
    pub script: Option<ProtoRef>,
    pub script_pos: usize,
    pub next_act_tick: u64,
    pub active: bool,
}

impl Npc {
    pub fn matches_token(&self, token: &str) -> bool {
        crate::item::matches_token(&self.ch.name, &self.keywords, token)
    }
}

/// Out of every 100 ticks, how often a wanderer moves.
const WANDER_PCT: u32 = 3;

/// One NPC's slice of the tick. Returns false when the NPC should drop off
/// the active list.
pub fn npc_tick(world: &mut World, id: NpcId) -> bool {
    let Some(npc) = world.npcs.get(&id) else {
        return false;
    };
    if !npc.active || !npc.ch.alive() {
        return false;
    }
    if npc.ch.battle.is_some() {
        // Battles own their combatants' time.
        return true;
    }

    if let Some(script) = npc.script.clone() {
        if world.tick_no >= npc.next_act_tick {
            run_script_step(world, id, &script);
        }
        return true;
    }

    if npc.wander && world.rng.chance(WANDER_PCT) {
        let here = npc.location.clone();
        if let Some((dir, to)) = world.random_open_exit(&here) {
            world.move_npc(id, to, Some(dir));
        }
    }
    true
}

fn run_script_step(world: &mut World, id: NpcId, script_ref: &ProtoRef) {
    let step = {
        let Some(script) = world
            .areas
            .get(&script_ref.area)
            .and_then(|a| a.scripts.get(&script_ref.id))
        else {
            tracing::error!(npc = %id, script = %script_ref, "npc script vanished; severing");
            if let Some(npc) = world.npcs.get_mut(&id) {
                npc.script = None;
            }
            return;
        };
        if script.steps.is_empty() {
            return;
        }
        let pos = world.npcs.get(&id).map(|n| n.script_pos).unwrap_or(0);
        script.steps[pos % script.steps.len()].clone()
    };

    let (name, here) = {
        let npc = match world.npcs.get(&id) {
            Some(n) => n,
            None => return,
        };
        (npc.ch.name.clone(), npc.location.clone())
    };

    let mut wait_ticks = 4u64;
    match step {
        ScriptStep::Say(text) => {
            world.room_message(&here, &format!("{name} says, \"{text}\""), &[]);
        }
        ScriptStep::Emote(text) => {
            world.room_message(&here, &format!("* {name} {text}"), &[]);
        }
        ScriptStep::Wait(ticks) => {
            wait_ticks = ticks.max(1) as u64;
        }
    }

    if let Some(npc) = world.npcs.get_mut(&id) {
        npc.script_pos = npc.script_pos.wrapping_add(1);
        npc.next_act_tick = world.tick_no + wait_ticks;
    }
}
