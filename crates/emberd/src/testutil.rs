//! Shared helpers for the crate's tests: a small deterministic world and
//! session plumbing that captures output on both sides of the flush.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::area::{Area, Direction, Exit, ProtoRef, Room, RoomRef, Spawn, SpawnKind};
use crate::character::{Attrs, Character};
use crate::item::{Container, DamageEntry, DamageType, Equippable, Facets, Food, ItemProto, Slot};
use crate::mode::Mode;
use crate::npc::{NpcProto, Script, ScriptStep};
use crate::persist;
use crate::session::{NewSession, Session, SessionId, PERM_PLAY};
use crate::world::{now_unix, World, WorldCfg};

thread_local! {
    /// Per-test taps: flushed output accumulates here so assertions can
    /// look across ticks.
    static TAPS: RefCell<HashMap<u64, (mpsc::UnboundedReceiver<Bytes>, String)>> =
        RefCell::new(HashMap::new());
}

/// A three-room world on a memory store. Room 1 and 2 are linked
/// north/south, room 3 is unconnected (handy for link tests). Resets are
/// stamped "just happened" so they only fire when a test asks.
pub fn test_world() -> World {
    let mut area = Area::new("haven");
    area.reset_interval_s = 600;
    area.last_reset_unix = now_unix();

    let mut hall = Room::new("haven", 1, "The Hall");
    let mut yard = Room::new("haven", 2, "The Courtyard");
    let nook = Room::new("haven", 3, "The Nook");

    hall.exits[Direction::North.idx()] = Some(Exit {
        linked: Some(Direction::South),
        ..Exit::open_to(RoomRef {
            area: "haven".to_string(),
            room: 2,
        })
    });
    yard.exits[Direction::South.idx()] = Some(Exit {
        linked: Some(Direction::North),
        ..Exit::open_to(RoomRef {
            area: "haven".to_string(),
            room: 1,
        })
    });

    let sword = ItemProto {
        id: 1,
        area: "haven".to_string(),
        name: "a rusty sword".to_string(),
        keywords: vec!["sword".to_string(), "rusty".to_string()],
        desc: "Pitted along the edge.".to_string(),
        facets: Facets {
            equippable: Some(Equippable {
                slot: Slot::Wield,
                hit: 1,
                evade: 0,
                damage: vec![DamageEntry {
                    kind: DamageType::Slashing,
                    min: 3,
                    max: 5,
                }],
                absorb: Vec::new(),
            }),
            ..Default::default()
        },
    };
    hall.items.push(sword.load());
    area.item_protos.insert(1, sword);
    area.item_protos.insert(
        2,
        ItemProto {
            id: 2,
            area: "haven".to_string(),
            name: "a loaf of black bread".to_string(),
            keywords: vec!["loaf".to_string(), "bread".to_string()],
            desc: String::new(),
            facets: Facets {
                food: Some(Food { heal: 5, mana: 0 }),
                ..Default::default()
            },
        },
    );
    area.item_protos.insert(
        3,
        ItemProto {
            id: 3,
            area: "haven".to_string(),
            name: "an oak chest".to_string(),
            keywords: vec!["chest".to_string(), "oak".to_string()],
            desc: String::new(),
            facets: Facets {
                container: Some(Container { capacity: 4 }),
                ..Default::default()
            },
        },
    );
    area.npc_protos.insert(
        4,
        NpcProto {
            id: 4,
            area: "haven".to_string(),
            name: "a giant rat".to_string(),
            keywords: vec!["rat".to_string(), "giant".to_string()],
            desc: "Fat on cellar grain.".to_string(),
            max_hp: 12,
            max_mp: 0,
            attrs: Attrs::default(),
            hit: 2,
            evade: 1,
            damage: vec![DamageEntry {
                kind: DamageType::Piercing,
                min: 1,
                max: 3,
            }],
            absorb: Vec::new(),
            wander: false,
            script: None,
        },
    );
    area.scripts.insert(
        5,
        Script {
            id: 5,
            area: "haven".to_string(),
            name: "mutter".to_string(),
            steps: vec![
                ScriptStep::Say("mind the rats.".to_string()),
                ScriptStep::Wait(8),
            ],
        },
    );

    yard.spawns.push(Spawn {
        kind: SpawnKind::Npc,
        proto: ProtoRef {
            area: "haven".to_string(),
            id: 4,
        },
        count: 1,
        inside: None,
    });

    area.rooms.insert(1, hall);
    area.rooms.insert(2, yard);
    area.rooms.insert(3, nook);
    area.note_id(5);

    let mut areas = HashMap::new();
    areas.insert("haven".to_string(), area);

    World::new(
        WorldCfg {
            start: RoomRef {
                area: "haven".to_string(),
                room: 1,
            },
            data_dir: std::env::temp_dir(),
            reset_interval_s: 600,
            seed: 0xE3B0,
        },
        Box::new(emberstore::MemStore::new()),
        areas,
    )
}

/// A ready-to-play character dropped straight into the start room, with a
/// backing row so quits persist. Output is tapped for `outbound_text`.
pub fn spawn_player(world: &mut World, name: &str) -> SessionId {
    let sid = SessionId::random();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut sess = Session::new(
        sid,
        world.cfg.start.clone(),
        Arc::new(Mutex::new(VecDeque::new())),
        Arc::new(AtomicBool::new(false)),
        Some(tx),
    );
    sess.ch = Character::new(name);
    sess.perms = PERM_PLAY;
    sess.mode = Mode::Normal;
    world.sessions.insert(sid, sess);
    let start = world.cfg.start.clone();
    world.place_session(sid, &start);

    let row_id = {
        let sess = world.sessions.get(&sid).expect("just inserted");
        persist::save_player(world.store.as_ref(), sess).expect("player row")
    };
    world.sessions.get_mut(&sid).unwrap().row_id = Some(row_id);

    TAPS.with(|t| t.borrow_mut().insert(sid.0, (rx, String::new())));
    sid
}

/// A raw connection pushed through the registry, exactly as the accept
/// worker would. The caller keeps the receiving end.
pub fn connect(world: &mut World) -> (SessionId, mpsc::UnboundedReceiver<Bytes>) {
    let sid = SessionId::random();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut reg = world.registry.lock().unwrap();
    reg.push(NewSession {
        id: sid,
        inbound: Arc::new(Mutex::new(VecDeque::new())),
        closed: Arc::new(AtomicBool::new(false)),
        tx: Some(tx),
    });
    (sid, rx)
}

/// Queue a line as if the reader task delivered it.
pub fn send(world: &World, sid: SessionId, line: &str) {
    let sess = world.sessions.get(&sid).expect("session exists");
    sess.inbound
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push_back(line.to_string());
}

/// Everything flushed to the session so far plus whatever is still queued.
pub fn outbound_text(world: &World, sid: SessionId) -> String {
    let mut out = TAPS.with(|t| {
        let mut taps = t.borrow_mut();
        match taps.get_mut(&sid.0) {
            Some((rx, acc)) => {
                while let Ok(b) = rx.try_recv() {
                    acc.push_str(&String::from_utf8_lossy(&b));
                }
                acc.clone()
            }
            None => String::new(),
        }
    });
    if let Some(sess) = world.sessions.get(&sid) {
        for line in &sess.outbound {
            out.push_str(line);
            out.push_str("\r\n");
        }
    }
    out
}

pub fn outbound_text_history(world: &World, sid: SessionId) -> String {
    outbound_text(world, sid)
}

/// Drain a raw connection receiver into a string.
pub fn recv_all(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> String {
    let mut s = String::new();
    while let Ok(b) = rx.try_recv() {
        s.push_str(&String::from_utf8_lossy(&b));
    }
    s
}

/// Insert a stored character row the login flow can find.
pub fn seed_player_row(world: &mut World, name: &str, password: &str) {
    let mut sess = Session::new(
        SessionId::random(),
        world.cfg.start.clone(),
        Arc::new(Mutex::new(VecDeque::new())),
        Arc::new(AtomicBool::new(false)),
        None,
    );
    sess.ch = Character::new(name);
    sess.perms = PERM_PLAY;
    persist::save_player(world.store.as_ref(), &sess).expect("seed row");
    let hash = crate::mode::hash_password(password).expect("hash");
    persist::update_password(world.store.as_ref(), name, &hash).expect("set password");
}
