//! Areas, rooms, exits, and spawn rules.
//!
//! An area is the unit of content authorship: it owns its rooms and its
//! item/NPC/script catalogs, hands out area-scoped local ids, and carries
//! the builder access list. Rooms reference each other only through
//! `RoomRef` (area name + local id) resolved lazily at use, so a deleted
//! target is detected at the edge, not by a dangling pointer.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::item::{ItemInst, ItemProto};
use crate::npc::{NpcId, NpcProto, Script};
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
        Direction::Up,
        Direction::Down,
    ];

    pub fn idx(self) -> usize {
        match self {
            Direction::North => 0,
            Direction::East => 1,
            Direction::South => 2,
            Direction::West => 3,
            Direction::Up => 4,
            Direction::Down => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::East => "east",
            Direction::South => "south",
            Direction::West => "west",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "north" | "n" => Some(Direction::North),
            "east" | "e" => Some(Direction::East),
            "south" | "s" => Some(Direction::South),
            "west" | "w" => Some(Direction::West),
            "up" | "u" => Some(Direction::Up),
            "down" | "d" => Some(Direction::Down),
            _ => None,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// (area, local id) address of a room, resolved lazily.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomRef {
    pub area: String,
    pub room: u32,
}

impl std::fmt::Display for RoomRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.area, self.room)
    }
}

impl RoomRef {
    pub fn parse(token: &str) -> Option<Self> {
        let (area, id) = token.trim().split_once(':')?;
        let area = area.trim();
        if area.is_empty() {
            return None;
        }
        Some(Self {
            area: area.to_string(),
            room: id.trim().parse().ok()?,
        })
    }
}

/// (area, local id) address of an item/NPC/script prototype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtoRef {
    pub area: String,
    pub id: u32,
}

impl std::fmt::Display for ProtoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.area, self.id)
    }
}

impl ProtoRef {
    pub fn parse(token: &str) -> Option<Self> {
        let (area, id) = token.trim().split_once(':')?;
        let area = area.trim();
        if area.is_empty() {
            return None;
        }
        Some(Self {
            area: area.to_string(),
            id: id.trim().parse().ok()?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exit {
    pub to: RoomRef,
    /// Direction of the paired exit on the far room, when the two are linked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked: Option<Direction>,
    #[serde(default)]
    pub openable: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ProtoRef>,
}

impl Exit {
    pub fn open_to(to: RoomRef) -> Self {
        Self {
            to,
            linked: None,
            openable: false,
            closed: false,
            locked: false,
            key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpawnKind {
    Item,
    Npc,
}

/// Declarative rule: what prototype should exist in this room after a reset,
/// optionally inside a container item spawned alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spawn {
    pub kind: SpawnKind,
    pub proto: ProtoRef,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inside: Option<ProtoRef>,
}

#[derive(Debug)]
pub struct Room {
    pub id: u32,
    pub area: String,
    pub name: String,
    pub desc: String,
    pub exits: [Option<Exit>; 6],
    pub items: Vec<ItemInst>,
    pub npcs: Vec<NpcId>,
    pub occupants: HashMap<String, SessionId>,
    pub spawns: Vec<Spawn>,
}

impl Room {
    pub fn new(area: &str, id: u32, name: &str) -> Self {
        Self {
            id,
            area: area.to_string(),
            name: name.to_string(),
            desc: String::new(),
            exits: Default::default(),
            items: Vec::new(),
            npcs: Vec::new(),
            occupants: HashMap::new(),
            spawns: Vec::new(),
        }
    }

    pub fn room_ref(&self) -> RoomRef {
        RoomRef {
            area: self.area.clone(),
            room: self.id,
        }
    }

    pub fn exit(&self, d: Direction) -> Option<&Exit> {
        self.exits[d.idx()].as_ref()
    }

    pub fn exit_mut(&mut self, d: Direction) -> Option<&mut Exit> {
        self.exits[d.idx()].as_mut()
    }

    /// Instances of `proto` lying here, looking inside containers too.
    pub fn count_item_proto(&self, proto: &ProtoRef) -> usize {
        self.items.iter().map(|i| i.count_proto(proto)).sum()
    }

    pub fn find_item(&self, token: &str) -> Option<usize> {
        self.items.iter().position(|i| i.matches_token(token))
    }
}

#[derive(Debug)]
pub struct Area {
    pub name: String,
    pub rooms: HashMap<u32, Room>,
    pub item_protos: HashMap<u32, ItemProto>,
    pub npc_protos: HashMap<u32, NpcProto>,
    pub scripts: HashMap<u32, Script>,
    pub builders: HashSet<String>,
    /// Area-scoped local-id allocator, shared by all object kinds; only grows.
    pub next_id: u32,
    /// Sessions entering rooms of this area since the last reset.
    pub visits: u32,
    pub last_reset_unix: u64,
    pub reset_interval_s: u64,
}

impl Area {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rooms: HashMap::new(),
            item_protos: HashMap::new(),
            npc_protos: HashMap::new(),
            scripts: HashMap::new(),
            builders: HashSet::new(),
            next_id: 0,
            visits: 0,
            last_reset_unix: 0,
            reset_interval_s: 600,
        }
    }

    pub fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Keep the allocator ahead of ids that arrived from import or disk.
    pub fn note_id(&mut self, id: u32) {
        self.next_id = self.next_id.max(id);
    }

    pub fn is_builder(&self, name: &str) -> bool {
        self.builders.iter().any(|b| b.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parse_and_opposite() {
        assert_eq!(Direction::parse("n"), Some(Direction::North));
        assert_eq!(Direction::parse("Down"), Some(Direction::Down));
        assert_eq!(Direction::parse("sideways"), None);
        for d in Direction::ALL {
            assert_eq!(d.opposite().opposite(), d);
            assert_eq!(Direction::parse(d.as_str()), Some(d));
        }
    }

    #[test]
    fn refs_round_trip_through_display() {
        let r = RoomRef {
            area: "haven".to_string(),
            room: 12,
        };
        assert_eq!(RoomRef::parse(&r.to_string()), Some(r));
        assert_eq!(RoomRef::parse("nocolon"), None);
        assert_eq!(RoomRef::parse(":5"), None);
        assert_eq!(RoomRef::parse("haven:x"), None);
    }

    #[test]
    fn local_ids_grow_and_respect_imports() {
        let mut a = Area::new("haven");
        let first = a.alloc_id();
        a.note_id(40);
        let next = a.alloc_id();
        assert!(first < next);
        assert_eq!(next, 41);
    }
}
