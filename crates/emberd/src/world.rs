//! The world: sole owner of all mutable game state, driven by `tick()`.
//!
//! Socket tasks never touch world state. They push lines into per-session
//! inbound queues and new connections into the registry; everything else
//! happens here, on one logical thread of control, in five fixed phases:
//! NPCs act, sessions consume input, battles run a round, stale areas
//! reset, output flushes. Collections are snapshotted before iteration so
//! adds and removes land at phase boundaries, never mid-loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use bytes::Bytes;
use emberstore::Store;
use tracing::{error, info, warn};

use crate::area::{Area, Direction, Exit, RoomRef, Room, SpawnKind};
use crate::battle::{Battle, BattleId, CombatantId};
use crate::character::Character;
use crate::item::ItemProto;
use crate::mode::{EditTarget, Mode};
use crate::npc::{Npc, NpcId};
use crate::persist;
use crate::rng::Rng64;
use crate::session::{NewSession, Session, SessionId, SessionRegistry};

#[derive(Debug, Clone)]
pub struct WorldCfg {
    pub start: RoomRef,
    pub data_dir: PathBuf,
    /// Default reset cadence stamped onto new areas.
    pub reset_interval_s: u64,
    pub seed: u64,
}

pub struct World {
    pub cfg: WorldCfg,
    pub store: Box<dyn Store>,
    pub areas: HashMap<String, Area>,
    /// Tick-task private; newcomers arrive through `registry`.
    pub sessions: HashMap<SessionId, Session>,
    pub registry: SessionRegistry,
    pub battles: HashMap<BattleId, Battle>,
    pub npcs: HashMap<NpcId, Npc>,
    pub active_npcs: Vec<NpcId>,
    pub rng: Rng64,
    pub tick_no: u64,
    next_battle: u64,
    next_npc: u64,
}

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl World {
    pub fn new(cfg: WorldCfg, store: Box<dyn Store>, areas: HashMap<String, Area>) -> Self {
        let seed = cfg.seed;
        Self {
            cfg,
            store,
            areas,
            sessions: HashMap::new(),
            registry: SessionRegistry::default(),
            battles: HashMap::new(),
            npcs: HashMap::new(),
            active_npcs: Vec::new(),
            rng: Rng64::from_seed(seed),
            tick_no: 0,
            next_battle: 0,
            next_npc: 0,
        }
    }

    // ---- the tick ----

    pub fn tick(&mut self) {
        self.tick_no += 1;
        let t0 = Instant::now();

        self.npc_phase();
        self.session_phase();
        self.battle_phase();
        self.reset_phase();
        self.flush_phase();

        let dt = t0.elapsed();
        if dt > Duration::from_secs(1) {
            warn!(tick = self.tick_no, ms = dt.as_millis() as u64, "tick overran its budget");
        }
    }

    fn npc_phase(&mut self) {
        let ids = self.active_npcs.clone();
        let mut gone = Vec::new();
        for id in ids {
            if !crate::npc::npc_tick(self, id) {
                gone.push(id);
            }
        }
        if !gone.is_empty() {
            self.active_npcs.retain(|id| !gone.contains(id));
        }
    }

    fn session_phase(&mut self) {
        let newcomers: Vec<NewSession> = {
            let mut reg = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            reg.drain(..).collect()
        };
        for n in newcomers {
            self.attach(n);
        }

        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for sid in ids.iter().copied() {
            let Some(sess) = self.sessions.get_mut(&sid) else {
                continue;
            };
            sess.intake();
            if sess.transport_closed() {
                sess.dead = true;
            }
            if sess.quitting || sess.dead {
                continue;
            }
            crate::mode::consume_input(self, sid);
        }

        let doomed: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.quitting || s.dead)
            .map(|(id, _)| *id)
            .collect();
        for sid in doomed {
            self.cleanup_session(sid);
        }
    }

    fn battle_phase(&mut self) {
        let ids: Vec<BattleId> = self.battles.keys().copied().collect();
        for id in ids {
            // Take the battle out so it can borrow the world freely.
            let Some(mut battle) = self.battles.remove(&id) else {
                continue;
            };
            battle.run_round(self);
            if !battle.done {
                self.battles.insert(id, battle);
            }
        }
    }

    fn reset_phase(&mut self) {
        let now = now_unix();
        let due: Vec<String> = self
            .areas
            .values()
            .filter(|a| a.visits > 0 && now.saturating_sub(a.last_reset_unix) >= a.reset_interval_s)
            .map(|a| a.name.clone())
            .collect();
        for name in due {
            self.reset_area(&name);
        }
    }

    fn flush_phase(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for sid in ids {
            let Some(sess) = self.sessions.get_mut(&sid) else {
                continue;
            };
            // The queue clears no matter what happens to the send.
            let lines = std::mem::take(&mut sess.outbound);
            if lines.is_empty() {
                continue;
            }
            let Some(tx) = sess.tx.as_ref() else {
                continue;
            };
            for line in lines {
                if tx.send(Bytes::from(format!("{line}\r\n"))).is_err() {
                    sess.dead = true;
                    break;
                }
            }
        }
    }

    // ---- sessions ----

    fn attach(&mut self, n: NewSession) {
        let mut sess = Session::new(n.id, self.cfg.start.clone(), n.inbound, n.closed, n.tx);
        sess.push_line("ember, a world stitched from ash.");
        sess.push_line("name:");
        info!(session = %n.id, "session attached");
        self.sessions.insert(n.id, sess);
    }

    fn cleanup_session(&mut self, sid: SessionId) {
        let Some(sess) = self.sessions.remove(&sid) else {
            return;
        };
        let name = sess.ch.name.clone();
        let here = sess.location.clone();
        let was_in_play = sess.in_play();

        if sess.persistable() {
            if let Err(e) = persist::save_player(self.store.as_ref(), &sess) {
                error!(err = %e, name = %name, "could not persist departing player");
            }
        }

        if let Some(room) = self.room_mut(&here) {
            room.occupants.remove(&name);
        }
        if let Some(bid) = sess.ch.battle {
            if let Some(b) = self.battles.get_mut(&bid) {
                let cid = CombatantId::Player(sid);
                b.team_a.retain(|c| *c != cid);
                b.team_b.retain(|c| *c != cid);
            }
        }
        if was_in_play && !sess.dead {
            self.room_message(&here, &format!("* {name} has left."), &[]);
        }

        // Last words (the goodbye line) still go out; dropping the sender
        // afterward closes the writer task and with it the socket.
        if let Some(tx) = sess.tx {
            for line in sess.outbound {
                let _ = tx.send(Bytes::from(format!("{line}\r\n")));
            }
        }
        info!(session = %sid, name = %name, "session cleaned up");
    }

    pub fn push_line(&mut self, sid: SessionId, text: &str) {
        if let Some(sess) = self.sessions.get_mut(&sid) {
            sess.push_line(text);
        }
    }

    pub fn find_session_by_name(&self, name: &str) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, s)| s.ch.name.eq_ignore_ascii_case(name) && !s.ch.name.is_empty())
            .map(|(id, _)| *id)
    }

    // ---- rooms and movement ----

    pub fn room(&self, r: &RoomRef) -> Option<&Room> {
        self.areas.get(&r.area)?.rooms.get(&r.room)
    }

    pub fn room_mut(&mut self, r: &RoomRef) -> Option<&mut Room> {
        self.areas.get_mut(&r.area)?.rooms.get_mut(&r.room)
    }

    /// Atomic remove-then-add: a session is never in two occupant sets.
    pub fn place_session(&mut self, sid: SessionId, to: &RoomRef) {
        let (name, from) = match self.sessions.get(&sid) {
            Some(s) => (s.ch.name.clone(), s.location.clone()),
            None => return,
        };
        if let Some(room) = self.room_mut(&from) {
            room.occupants.remove(&name);
        }
        if let Some(room) = self.room_mut(to) {
            room.occupants.insert(name, sid);
        }
        if let Some(sess) = self.sessions.get_mut(&sid) {
            sess.location = to.clone();
        }
        if let Some(area) = self.areas.get_mut(&to.area) {
            area.visits += 1;
        }
    }

    pub fn move_session_to(&mut self, sid: SessionId, to: &RoomRef, via: Option<Direction>) {
        let (name, from) = match self.sessions.get(&sid) {
            Some(s) => (s.ch.name.clone(), s.location.clone()),
            None => return,
        };
        match via {
            Some(d) => self.room_message(&from, &format!("* {name} leaves {}.", d.as_str()), &[sid]),
            None => self.room_message(&from, &format!("* {name} vanishes."), &[sid]),
        }
        self.place_session(sid, to);
        self.room_message(to, &format!("* {name} arrives."), &[sid]);
        let look = self.render_room_for(sid);
        self.push_line(sid, &look);
    }

    pub fn try_move(&mut self, sid: SessionId, dir: Direction) {
        let here = match self.sessions.get(&sid) {
            Some(s) => s.location.clone(),
            None => return,
        };
        let exit = self.room(&here).and_then(|r| r.exit(dir).cloned());
        let Some(exit) = exit else {
            self.push_line(sid, "you can't go that way.");
            return;
        };
        if exit.closed {
            self.push_line(sid, &format!("the way {} is closed.", dir.as_str()));
            return;
        }
        if self.room(&exit.to).is_none() {
            // Referential inconsistency: sever the dangling edge and move on.
            error!(from = %here, dir = dir.as_str(), to = %exit.to, "exit leads nowhere; severed");
            if let Some(room) = self.room_mut(&here) {
                room.exits[dir.idx()] = None;
            }
            self.push_line(sid, "the way crumbles before you.");
            return;
        }
        self.move_session_to(sid, &exit.to, Some(dir));
    }

    pub fn render_room_for(&self, sid: SessionId) -> String {
        let Some(sess) = self.sessions.get(&sid) else {
            return String::new();
        };
        let here = &sess.location;
        let Some(room) = self.room(here) else {
            return "you float in a gray void.\r\n".to_string();
        };

        let mut s = String::new();
        s.push_str(&format!("== {} ({}) [{}] ==\r\n", room.name, here.area, here));
        if !room.desc.is_empty() {
            s.push_str(&room.desc);
            s.push_str("\r\n");
        }

        let mut exits = Vec::new();
        for d in Direction::ALL {
            if let Some(ex) = room.exit(d) {
                if ex.closed {
                    exits.push(format!("{} [closed]", d.as_str()));
                } else {
                    exits.push(d.as_str().to_string());
                }
            }
        }
        if exits.is_empty() {
            s.push_str("exits: none\r\n");
        } else {
            s.push_str(&format!("exits: {}\r\n", exits.join(", ")));
        }

        for it in &room.items {
            s.push_str(&format!("   {} lies here.\r\n", it.name));
        }
        for id in &room.npcs {
            if let Some(npc) = self.npcs.get(id) {
                s.push_str(&format!("   {} is here.\r\n", npc.ch.name));
            }
        }
        for (name, other) in &room.occupants {
            if *other != sid {
                s.push_str(&format!("   {name} is here.\r\n"));
            }
        }
        s
    }

    pub fn room_message(&mut self, at: &RoomRef, text: &str, exclude: &[SessionId]) {
        let sids: Vec<SessionId> = match self.room(at) {
            Some(room) => room.occupants.values().copied().collect(),
            None => return,
        };
        for sid in sids {
            if !exclude.contains(&sid) {
                self.push_line(sid, text);
            }
        }
    }

    pub fn broadcast(&mut self, text: &str, exclude: &[SessionId]) {
        let sids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(id, s)| s.in_play() && !exclude.contains(id))
            .map(|(id, _)| *id)
            .collect();
        for sid in sids {
            self.push_line(sid, text);
        }
    }

    pub fn chat_broadcast(&mut self, text: &str) {
        let sids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.in_play() && s.channels.chat)
            .map(|(id, _)| *id)
            .collect();
        for sid in sids {
            self.push_line(sid, text);
        }
    }

    pub fn random_open_exit(&mut self, at: &RoomRef) -> Option<(Direction, RoomRef)> {
        let candidates: Vec<(Direction, RoomRef)> = {
            let room = self.room(at)?;
            Direction::ALL
                .into_iter()
                .filter_map(|d| {
                    room.exit(d)
                        .filter(|e| !e.closed)
                        .map(|e| (d, e.to.clone()))
                })
                .collect()
        };
        let live: Vec<(Direction, RoomRef)> = candidates
            .into_iter()
            .filter(|(_, to)| self.room(to).is_some())
            .collect();
        if live.is_empty() {
            return None;
        }
        let i = self.rng.roll_range(0, live.len() as i32 - 1) as usize;
        Some(live[i].clone())
    }

    // ---- doors ----

    pub fn operate_door(&mut self, sid: SessionId, verb: &str, dir: Direction) {
        let here = match self.sessions.get(&sid) {
            Some(s) => s.location.clone(),
            None => return,
        };
        let Some(exit) = self.room(&here).and_then(|r| r.exit(dir).cloned()) else {
            self.push_line(sid, "there is no door that way.");
            return;
        };
        if !exit.openable {
            self.push_line(sid, "that way has no door.");
            return;
        }

        let has_key = exit.key.as_ref().is_some_and(|key| {
            self.sessions
                .get(&sid)
                .map(|s| s.ch.inventory.iter().any(|i| &i.proto == key))
                .unwrap_or(false)
        });

        let (closed, locked, msg) = match verb {
            "open" => {
                if exit.locked {
                    self.push_line(sid, "it's locked.");
                    return;
                }
                if !exit.closed {
                    self.push_line(sid, "it's already open.");
                    return;
                }
                (false, false, "you pull the way open.")
            }
            "close" => {
                if exit.closed {
                    self.push_line(sid, "it's already closed.");
                    return;
                }
                (true, false, "you push the way shut.")
            }
            "lock" => {
                if !exit.closed {
                    self.push_line(sid, "close it first.");
                    return;
                }
                if !has_key {
                    self.push_line(sid, "you don't have the key.");
                    return;
                }
                (true, true, "the lock clicks home.")
            }
            "unlock" => {
                if !exit.locked {
                    self.push_line(sid, "it isn't locked.");
                    return;
                }
                if !has_key {
                    self.push_line(sid, "you don't have the key.");
                    return;
                }
                (true, false, "the lock clicks open.")
            }
            _ => return,
        };

        if let Some(room) = self.room_mut(&here) {
            if let Some(ex) = room.exit_mut(dir) {
                ex.closed = closed;
                ex.locked = locked;
            }
        }
        // A linked door swings on both sides.
        if let Some(rdir) = exit.linked {
            let far = exit.to.clone();
            if let Some(room) = self.room_mut(&far) {
                if let Some(ex) = room.exit_mut(rdir) {
                    ex.closed = closed;
                    ex.locked = locked;
                }
            }
        }
        self.push_line(sid, msg);
    }

    // ---- exits: linking ----

    /// Create a two-way linked exit pair. Fails without side effects when
    /// either side already leads somewhere else.
    pub fn link_exits(
        &mut self,
        from: &RoomRef,
        dir: Direction,
        to: &RoomRef,
        rdir: Direction,
    ) -> Result<(), String> {
        if from == to && dir == rdir {
            return Err("a room cannot exit into itself through one direction".to_string());
        }
        let near = self.room(from).ok_or("the near room is gone")?;
        if let Some(ex) = near.exit(dir) {
            if &ex.to != to {
                return Err(format!("{} already leads to {}", dir.as_str(), ex.to));
            }
        }
        let far = self.room(to).ok_or("the far room does not exist")?;
        if let Some(ex) = far.exit(rdir) {
            if &ex.to != from {
                return Err(format!(
                    "{} on the far side already leads to {}",
                    rdir.as_str(),
                    ex.to
                ));
            }
        }

        let near_exit = Exit {
            linked: Some(rdir),
            ..Exit::open_to(to.clone())
        };
        let far_exit = Exit {
            linked: Some(dir),
            ..Exit::open_to(from.clone())
        };
        if let Some(room) = self.room_mut(from) {
            room.exits[dir.idx()] = Some(near_exit);
        }
        if let Some(room) = self.room_mut(to) {
            room.exits[rdir.idx()] = Some(far_exit);
        }
        Ok(())
    }

    /// Remove the exit and clear the back-link on the far side.
    pub fn unlink_exit(&mut self, at: &RoomRef, dir: Direction) -> Result<(), String> {
        let exit = self
            .room(at)
            .and_then(|r| r.exit(dir).cloned())
            .ok_or("no exit that way")?;
        if let Some(room) = self.room_mut(at) {
            room.exits[dir.idx()] = None;
        }
        if let Some(rdir) = exit.linked {
            if let Some(far) = self.room_mut(&exit.to) {
                if let Some(ex) = far.exit_mut(rdir) {
                    if &ex.to == at {
                        ex.linked = None;
                    }
                }
            }
        }
        Ok(())
    }

    // ---- npcs ----

    pub fn spawn_npc(&mut self, proto: &crate::area::ProtoRef, at: &RoomRef) -> Option<NpcId> {
        let def = self
            .areas
            .get(&proto.area)
            .and_then(|a| a.npc_protos.get(&proto.id))?
            .clone();
        if self.room(at).is_none() {
            return None;
        }
        self.next_npc += 1;
        let id = NpcId(self.next_npc);
        let npc = Npc {
            id,
            proto: def.proto_ref(),
            ch: def.load(),
            keywords: def.keywords.clone(),
            desc: def.desc.clone(),
            location: at.clone(),
            wander: def.wander,
            script: def.script.map(|script_id| crate::area::ProtoRef {
                area: def.area.clone(),
                id: script_id,
            }),
            script_pos: 0,
            next_act_tick: self.tick_no + 1,
            active: true,
        };
        let name = npc.ch.name.clone();
        self.npcs.insert(id, npc);
        self.active_npcs.push(id);
        if let Some(room) = self.room_mut(at) {
            room.npcs.push(id);
        }
        self.room_message(at, &format!("* {name} appears."), &[]);
        Some(id)
    }

    pub fn move_npc(&mut self, id: NpcId, to: RoomRef, via: Option<Direction>) {
        let (name, from) = match self.npcs.get(&id) {
            Some(n) => (n.ch.name.clone(), n.location.clone()),
            None => return,
        };
        if self.room(&to).is_none() {
            return;
        }
        if let Some(room) = self.room_mut(&from) {
            room.npcs.retain(|n| *n != id);
        }
        match via {
            Some(d) => self.room_message(&from, &format!("* {name} leaves {}.", d.as_str()), &[]),
            None => self.room_message(&from, &format!("* {name} slips away."), &[]),
        }
        if let Some(room) = self.room_mut(&to) {
            room.npcs.push(id);
        }
        if let Some(npc) = self.npcs.get_mut(&id) {
            npc.location = to.clone();
        }
        self.room_message(&to, &format!("* {name} arrives."), &[]);
    }

    pub fn remove_npc(&mut self, id: NpcId) {
        if let Some(npc) = self.npcs.remove(&id) {
            if let Some(room) = self.room_mut(&npc.location) {
                room.npcs.retain(|n| *n != id);
            }
        }
        self.active_npcs.retain(|n| *n != id);
    }

    // ---- battles ----

    pub fn combatant(&self, cid: CombatantId) -> Option<&Character> {
        match cid {
            CombatantId::Player(sid) => self.sessions.get(&sid).map(|s| &s.ch),
            CombatantId::Npc(id) => self.npcs.get(&id).map(|n| &n.ch),
        }
    }

    pub fn combatant_mut(&mut self, cid: CombatantId) -> Option<&mut Character> {
        match cid {
            CombatantId::Player(sid) => self.sessions.get_mut(&sid).map(|s| &mut s.ch),
            CombatantId::Npc(id) => self.npcs.get_mut(&id).map(|n| &mut n.ch),
        }
    }

    pub fn combatant_room(&self, cid: CombatantId) -> Option<RoomRef> {
        match cid {
            CombatantId::Player(sid) => self.sessions.get(&sid).map(|s| s.location.clone()),
            CombatantId::Npc(id) => self.npcs.get(&id).map(|n| n.location.clone()),
        }
    }

    /// Player-facing combat text; NPCs don't read their mail.
    pub fn combat_line(&mut self, cid: CombatantId, text: &str) {
        if let CombatantId::Player(sid) = cid {
            self.push_line(sid, text);
        }
    }

    pub fn start_battle(&mut self, attacker: CombatantId, defender: CombatantId) {
        let attacker_name = match self.combatant(attacker) {
            Some(ch) => ch.name.clone(),
            None => return,
        };
        let defender_name = match self.combatant(defender) {
            Some(ch) => ch.name.clone(),
            None => return,
        };
        let here = match self.combatant_room(attacker) {
            Some(r) => r,
            None => return,
        };

        let bid = match self.combatant(defender).and_then(|ch| ch.battle) {
            Some(existing) => {
                if let Some(b) = self.battles.get_mut(&existing) {
                    b.join_against(attacker, defender);
                }
                existing
            }
            None => {
                self.next_battle += 1;
                let bid = BattleId(self.next_battle);
                self.battles
                    .insert(bid, Battle::new(bid, vec![attacker], vec![defender]));
                if let Some(ch) = self.combatant_mut(defender) {
                    ch.battle = Some(bid);
                    ch.target = Some(attacker);
                    ch.action_points = 0.0;
                }
                if let CombatantId::Player(sid) = defender {
                    if let Some(sess) = self.sessions.get_mut(&sid) {
                        sess.mode = Mode::Battle;
                    }
                }
                bid
            }
        };

        if let Some(ch) = self.combatant_mut(attacker) {
            ch.battle = Some(bid);
            ch.target = Some(defender);
            ch.action_points = 0.0;
        }
        if let CombatantId::Player(sid) = attacker {
            if let Some(sess) = self.sessions.get_mut(&sid) {
                sess.mode = Mode::Battle;
            }
        }

        self.combat_line(attacker, &format!("you attack {defender_name}!"));
        self.combat_line(defender, &format!("{attacker_name} attacks you!"));
        let mut exclude = Vec::new();
        if let CombatantId::Player(sid) = attacker {
            exclude.push(sid);
        }
        if let CombatantId::Player(sid) = defender {
            exclude.push(sid);
        }
        self.room_message(
            &here,
            &format!("* {attacker_name} attacks {defender_name}!"),
            &exclude,
        );
    }

    /// A successful flee: relocation plus mode restore, outside the battle's
    /// team lists (the battle already staged the removal).
    pub fn flee_move(&mut self, cid: CombatantId, to: RoomRef, dir: Direction) {
        match cid {
            CombatantId::Player(sid) => {
                if let Some(sess) = self.sessions.get_mut(&sid) {
                    sess.mode = Mode::Normal;
                }
                let (name, from) = match self.sessions.get(&sid) {
                    Some(s) => (s.ch.name.clone(), s.location.clone()),
                    None => return,
                };
                self.room_message(&from, &format!("* {name} flees {}!", dir.as_str()), &[sid]);
                self.place_session(sid, &to);
                self.room_message(&to, &format!("* {name} stumbles in, breathless."), &[sid]);
                let look = self.render_room_for(sid);
                self.push_line(sid, &look);
            }
            CombatantId::Npc(id) => {
                self.move_npc(id, to, Some(dir));
            }
        }
    }

    pub fn combatant_died(&mut self, cid: CombatantId) {
        match cid {
            CombatantId::Npc(id) => self.remove_npc(id),
            CombatantId::Player(sid) => {
                // Defeat is a trip home, not an ending.
                self.push_line(sid, "you have been defeated!");
                if let Some(sess) = self.sessions.get_mut(&sid) {
                    sess.mode = Mode::Normal;
                    sess.ch.hp = 1;
                }
                let start = self.cfg.start.clone();
                self.move_session_to(sid, &start, None);
            }
        }
    }

    // ---- building, edits, resets ----

    pub fn can_build(&self, sid: SessionId, area: &str) -> bool {
        let Some(sess) = self.sessions.get(&sid) else {
            return false;
        };
        if sess.is_admin() {
            return true;
        }
        self.areas
            .get(area)
            .map(|a| a.is_builder(&sess.ch.name))
            .unwrap_or(false)
    }

    pub fn apply_edit(&mut self, target: &EditTarget, text: &str) -> Result<(), String> {
        let area_name = match target {
            EditTarget::RoomDesc(r) => {
                let room = self.room_mut(r).ok_or("the room is gone")?;
                room.desc = text.to_string();
                r.area.clone()
            }
            EditTarget::ItemDesc(p) => {
                let proto = self
                    .areas
                    .get_mut(&p.area)
                    .and_then(|a| a.item_protos.get_mut(&p.id))
                    .ok_or("the item prototype is gone")?;
                proto.desc = text.to_string();
                p.area.clone()
            }
            EditTarget::NpcDesc(p) => {
                let proto = self
                    .areas
                    .get_mut(&p.area)
                    .and_then(|a| a.npc_protos.get_mut(&p.id))
                    .ok_or("the npc prototype is gone")?;
                proto.desc = text.to_string();
                p.area.clone()
            }
        };
        match self.areas.get(&area_name) {
            Some(area) => persist::save_area(self.store.as_ref(), area)
                .map_err(|_| "the change is live but was not written to disk".to_string()),
            None => Ok(()),
        }
    }

    pub fn save_area_logged(&mut self, name: &str) {
        if let Some(area) = self.areas.get(name) {
            if let Err(e) = persist::save_area(self.store.as_ref(), area) {
                error!(err = %e, area = name, "area save failed");
            }
        }
    }

    /// Re-populate an area's rooms from their spawn lists. Idempotent: each
    /// rule only tops up to its count, so running twice adds nothing.
    pub fn reset_area(&mut self, name: &str) {
        enum Act {
            Item {
                room: u32,
                proto: ItemProto,
                deficit: u32,
                inside: Option<crate::area::ProtoRef>,
            },
            Npc {
                room: u32,
                proto: crate::area::ProtoRef,
                deficit: u32,
            },
        }

        let acts: Vec<Act> = {
            let Some(area) = self.areas.get(name) else {
                return;
            };
            let mut acts = Vec::new();
            for room in area.rooms.values() {
                for sp in &room.spawns {
                    match sp.kind {
                        SpawnKind::Item => {
                            let Some(proto) = self
                                .areas
                                .get(&sp.proto.area)
                                .and_then(|a| a.item_protos.get(&sp.proto.id))
                            else {
                                error!(spawn = %sp.proto, room = room.id, "spawn prototype missing; skipped");
                                continue;
                            };
                            let have = match &sp.inside {
                                Some(cont) => room
                                    .items
                                    .iter()
                                    .filter(|i| &i.proto == cont)
                                    .map(|i| {
                                        i.contents
                                            .iter()
                                            .filter(|c| c.proto == sp.proto)
                                            .count()
                                    })
                                    .sum::<usize>(),
                                None => room.count_item_proto(&sp.proto),
                            } as u32;
                            if have < sp.count {
                                acts.push(Act::Item {
                                    room: room.id,
                                    proto: proto.clone(),
                                    deficit: sp.count - have,
                                    inside: sp.inside.clone(),
                                });
                            }
                        }
                        SpawnKind::Npc => {
                            if self
                                .areas
                                .get(&sp.proto.area)
                                .map(|a| !a.npc_protos.contains_key(&sp.proto.id))
                                .unwrap_or(true)
                            {
                                error!(spawn = %sp.proto, room = room.id, "spawn prototype missing; skipped");
                                continue;
                            }
                            let have = room
                                .npcs
                                .iter()
                                .filter(|id| {
                                    self.npcs
                                        .get(id)
                                        .is_some_and(|n| n.proto == sp.proto && n.ch.alive())
                                })
                                .count() as u32;
                            if have < sp.count {
                                acts.push(Act::Npc {
                                    room: room.id,
                                    proto: sp.proto.clone(),
                                    deficit: sp.count - have,
                                });
                            }
                        }
                    }
                }
            }
            acts
        };

        for act in acts {
            match act {
                Act::Item {
                    room,
                    proto,
                    deficit,
                    inside,
                } => {
                    let at = RoomRef {
                        area: name.to_string(),
                        room,
                    };
                    let Some(room) = self.room_mut(&at) else {
                        continue;
                    };
                    for _ in 0..deficit {
                        let inst = proto.load();
                        match &inside {
                            Some(cont_ref) => {
                                if let Some(cont) = room
                                    .items
                                    .iter_mut()
                                    .find(|i| &i.proto == cont_ref && i.facets.container.is_some())
                                {
                                    cont.contents.push(inst);
                                }
                                // No container on the floor: the rule waits
                                // for one rather than dumping loot loose.
                            }
                            None => room.items.push(inst),
                        }
                    }
                }
                Act::Npc {
                    room,
                    proto,
                    deficit,
                } => {
                    let at = RoomRef {
                        area: name.to_string(),
                        room,
                    };
                    for _ in 0..deficit {
                        self.spawn_npc(&proto, &at);
                    }
                }
            }
        }

        if let Some(area) = self.areas.get_mut(name) {
            area.visits = 0;
            area.last_reset_unix = now_unix();
        }
        info!(area = name, "area reset");
    }

    pub fn force_reset_all(&mut self) {
        let names: Vec<String> = self.areas.keys().cloned().collect();
        for name in names {
            self.reset_area(&name);
        }
    }

    /// Persist everything that matters across a shutdown.
    pub fn persist_all(&mut self) {
        let names: Vec<String> = self.areas.keys().cloned().collect();
        for name in names {
            self.save_area_logged(&name);
        }
        let sids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for sid in sids {
            let Some(sess) = self.sessions.get(&sid) else {
                continue;
            };
            if sess.persistable() {
                if let Err(e) = persist::save_player(self.store.as_ref(), sess) {
                    error!(err = %e, name = %sess.ch.name, "player save failed at shutdown");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::ProtoRef;
    use crate::battle::BattleAction;
    use crate::testutil;

    fn haven(room: u32) -> RoomRef {
        RoomRef {
            area: "haven".to_string(),
            room,
        }
    }

    #[test]
    fn occupancy_tracks_location_exactly() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");

        let check = |world: &World, here: &RoomRef, there: &RoomRef| {
            let sess = world.sessions.get(&sid).unwrap();
            assert_eq!(&sess.location, here);
            assert!(world.room(here).unwrap().occupants.contains_key("Bob"));
            assert!(!world.room(there).unwrap().occupants.contains_key("Bob"));
        };

        check(&world, &haven(1), &haven(2));
        world.try_move(sid, Direction::North);
        check(&world, &haven(2), &haven(1));
        world.try_move(sid, Direction::South);
        check(&world, &haven(1), &haven(2));
    }

    #[test]
    fn linking_fails_cleanly_over_an_existing_link() {
        let mut world = testutil::test_world();
        // Room 3 is unconnected in the seed world.
        let before_1 = format!("{:?}", world.room(&haven(1)).unwrap().exits);
        let before_3 = format!("{:?}", world.room(&haven(3)).unwrap().exits);

        // North from room 1 already leads to room 2.
        let err = world
            .link_exits(&haven(1), Direction::North, &haven(3), Direction::South)
            .unwrap_err();
        assert!(err.contains("already leads"), "{err}");
        assert_eq!(format!("{:?}", world.room(&haven(1)).unwrap().exits), before_1);
        assert_eq!(format!("{:?}", world.room(&haven(3)).unwrap().exits), before_3);
    }

    #[test]
    fn unlink_clears_both_sides() {
        let mut world = testutil::test_world();
        world
            .link_exits(&haven(2), Direction::East, &haven(3), Direction::West)
            .unwrap();
        assert!(world.room(&haven(3)).unwrap().exit(Direction::West).is_some());

        world.unlink_exit(&haven(2), Direction::East).unwrap();
        assert!(world.room(&haven(2)).unwrap().exit(Direction::East).is_none());
        let far = world.room(&haven(3)).unwrap().exit(Direction::West).unwrap();
        assert_eq!(far.linked, None, "back-link cleared on the far side");
    }

    #[test]
    fn double_reset_spawns_nothing_extra() {
        let mut world = testutil::test_world();
        world.reset_area("haven");
        let proto = ProtoRef {
            area: "haven".to_string(),
            id: 4,
        };
        let rats = |world: &World| {
            world
                .room(&haven(2))
                .unwrap()
                .npcs
                .iter()
                .filter(|id| world.npcs.get(id).is_some_and(|n| n.proto == proto))
                .count()
        };
        let after_first = rats(&world);
        assert_eq!(after_first, 1, "seeded rat spawn fires once");

        world.reset_area("haven");
        assert_eq!(rats(&world), after_first, "second reset adds nothing");

        // Visits cleared right after the sweep.
        assert_eq!(world.areas.get("haven").unwrap().visits, 0);
    }

    #[test]
    fn send_failure_removes_the_session_next_tick() {
        let mut world = testutil::test_world();
        let (sid, rx) = testutil::connect(&mut world);
        world.tick();
        assert!(world.sessions.contains_key(&sid));

        // Kill the receiving end: the next flush must fail.
        drop(rx);
        world.push_line(sid, "anyone there?");
        world.tick();
        // Flagged dead during flush; the following cleanup removes it.
        world.tick();
        assert!(
            !world.sessions.contains_key(&sid),
            "dead transport cleaned up by the next tick"
        );
    }

    #[test]
    fn quit_persists_and_announces() {
        let mut world = testutil::test_world();
        let bob = testutil::spawn_player(&mut world, "Bob");
        let alice = testutil::spawn_player(&mut world, "Alice");
        testutil::send(&world, bob, "quit");
        world.tick();

        assert!(!world.sessions.contains_key(&bob));
        assert!(!world.room(&haven(1)).unwrap().occupants.contains_key("Bob"));
        let heard = testutil::outbound_text(&world, alice);
        assert!(heard.contains("Bob has left."), "{heard}");
        assert!(
            crate::persist::find_player_row(world.store.as_ref(), "Bob")
                .unwrap()
                .is_some(),
            "quit persisted the character"
        );
    }

    #[test]
    fn battle_runs_to_a_finish_and_cleans_up() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        {
            let sess = world.sessions.get_mut(&sid).unwrap();
            sess.ch.hit = 30; // always crits, ends fast
            sess.ch.max_hp = 1000;
            sess.ch.hp = 1000;
        }
        let rat = world
            .spawn_npc(&ProtoRef { area: "haven".to_string(), id: 4 }, &haven(1))
            .expect("rat spawns");

        world.start_battle(CombatantId::Player(sid), CombatantId::Npc(rat));
        assert!(matches!(world.sessions.get(&sid).unwrap().mode, Mode::Battle));
        assert_eq!(world.battles.len(), 1);

        for _ in 0..40 {
            world.tick();
            if world.battles.is_empty() {
                break;
            }
        }
        assert!(world.battles.is_empty(), "battle removed from the map");
        assert!(world.npcs.get(&rat).is_none(), "dead npc removed");
        let sess = world.sessions.get(&sid).unwrap();
        assert!(matches!(sess.mode, Mode::Normal));
        assert!(sess.ch.battle.is_none());
        let out = testutil::outbound_text(&world, sid);
        assert!(out.contains("you are victorious!"), "{out}");
    }

    #[test]
    fn action_points_accrue_and_spend_exactly() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        {
            let sess = world.sessions.get_mut(&sid).unwrap();
            sess.ch.hit = -100; // all misses: nobody dies, nothing but AP moves
            sess.ch.max_hp = 1000;
            sess.ch.hp = 1000;
        }
        let rat = world
            .spawn_npc(&ProtoRef { area: "haven".to_string(), id: 4 }, &haven(1))
            .unwrap();
        if let Some(ch) = world.combatant_mut(CombatantId::Npc(rat)) {
            ch.hit = -100;
            ch.max_hp = 1000;
            ch.hp = 1000;
        }
        world.start_battle(CombatantId::Player(sid), CombatantId::Npc(rat));

        let rounds = 5u32;
        for _ in 0..rounds {
            world.tick();
        }
        // initial 0 + N accrued - N attacks at cost 1 each = 0, never negative.
        let ap = world.sessions.get(&sid).unwrap().ch.action_points;
        assert!((ap - 0.0).abs() < f32::EPSILON, "ap = {ap}");
    }

    #[test]
    fn fleeing_leaves_the_battle_and_the_room() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        {
            let sess = world.sessions.get_mut(&sid).unwrap();
            sess.ch.max_hp = 10_000;
            sess.ch.hp = 10_000;
            sess.ch.evade = 100; // untouchable while trying to leave
        }
        let rat = world
            .spawn_npc(&ProtoRef { area: "haven".to_string(), id: 4 }, &haven(1))
            .unwrap();
        world.start_battle(CombatantId::Player(sid), CombatantId::Npc(rat));
        {
            let sess = world.sessions.get_mut(&sid).unwrap();
            sess.ch.next_action = BattleAction::Flee;
        }

        let mut escaped = false;
        for _ in 0..60 {
            world.tick();
            let sess = world.sessions.get(&sid).unwrap();
            if sess.ch.battle.is_none() && sess.location != haven(1) {
                escaped = true;
                break;
            }
            // Keep retrying the escape on failed attempts.
            if let Some(s) = world.sessions.get_mut(&sid) {
                s.ch.next_action = BattleAction::Flee;
            }
        }
        assert!(escaped, "a 50% flee lands within 60 rounds");
        let sess = world.sessions.get(&sid).unwrap();
        assert!(matches!(sess.mode, Mode::Normal));
        assert!(!world
            .room(&haven(1))
            .unwrap()
            .occupants
            .contains_key("Bob"));
    }

    #[test]
    fn stale_targets_are_retargeted_not_faulted() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        {
            let sess = world.sessions.get_mut(&sid).unwrap();
            sess.ch.hit = 30;
            sess.ch.max_hp = 10_000;
            sess.ch.hp = 10_000;
        }
        let proto = ProtoRef {
            area: "haven".to_string(),
            id: 4,
        };
        let rat_a = world.spawn_npc(&proto, &haven(1)).unwrap();
        let rat_b = world.spawn_npc(&proto, &haven(1)).unwrap();
        world.start_battle(CombatantId::Player(sid), CombatantId::Npc(rat_a));
        if let Some(b) = world.battles.values_mut().next() {
            b.join_against(CombatantId::Npc(rat_b), CombatantId::Player(sid));
        }
        let sid_battle = world.sessions.get(&sid).unwrap().ch.battle;
        if let Some(ch) = world.combatant_mut(CombatantId::Npc(rat_b)) {
            ch.battle = sid_battle;
        }

        // Yank the player's chosen target out from under the battle.
        world.remove_npc(rat_a);
        if let Some(b) = world.battles.values_mut().next() {
            b.team_b.retain(|c| *c != CombatantId::Npc(rat_a));
        }

        for _ in 0..40 {
            world.tick();
            if world.battles.is_empty() {
                break;
            }
        }
        assert!(world.battles.is_empty(), "fight resolved against the second rat");
        assert!(world.npcs.get(&rat_b).is_none());
    }

    #[test]
    fn commands_in_one_tick_apply_in_arrival_order() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        testutil::send(&world, sid, "get sword");
        testutil::send(&world, sid, "drop sword");
        world.tick();
        // Both ran, in order: the sword ended up back on the floor.
        let out = testutil::outbound_text_history(&world, sid);
        let take = out.find("you take").expect("take ran");
        let drop = out.find("you drop").expect("drop ran");
        assert!(take < drop);
        assert!(world.sessions.get(&sid).unwrap().ch.inventory.is_empty());
    }
}
