//! Builder commands, overlaid on the normal table while in build mode.
//!
//! Attribute edits go through explicit per-entity setter registries: a
//! static table mapping attribute name to a typed setter. Extending the
//! editable surface means registering a setter, nothing else.

use std::path::PathBuf;

use crate::area::{Area, Direction, ProtoRef, Room, RoomRef, Spawn, SpawnKind};
use crate::character::Attrs;
use crate::dispatch::{split_verb, CmdSpec};
use crate::item::{
    Absorb, Container, DamageEntry, DamageType, Equippable, Food, Furniture, ItemProto, Portal,
    Slot,
};
use crate::mode::{EditTarget, Mode, TextEdit};
use crate::npc::{NpcProto, Script, ScriptStep};
use crate::session::{SessionId, PERM_ADMIN, PERM_BUILD};
use crate::world::World;

pub const BUILD_OVERLAY: &[CmdSpec] = &[
    CmdSpec {
        names: &["bhelp"],
        perms: PERM_BUILD,
        handler: cmd_bhelp,
    },
    CmdSpec {
        names: &["dig"],
        perms: PERM_BUILD,
        handler: cmd_dig,
    },
    CmdSpec {
        names: &["link"],
        perms: PERM_BUILD,
        handler: cmd_link,
    },
    CmdSpec {
        names: &["unlink"],
        perms: PERM_BUILD,
        handler: cmd_unlink,
    },
    CmdSpec {
        names: &["set"],
        perms: PERM_BUILD,
        handler: cmd_set,
    },
    CmdSpec {
        names: &["icreate"],
        perms: PERM_BUILD,
        handler: cmd_icreate,
    },
    CmdSpec {
        names: &["ncreate"],
        perms: PERM_BUILD,
        handler: cmd_ncreate,
    },
    CmdSpec {
        names: &["screate"],
        perms: PERM_BUILD,
        handler: cmd_screate,
    },
    CmdSpec {
        names: &["sstep"],
        perms: PERM_BUILD,
        handler: cmd_sstep,
    },
    CmdSpec {
        names: &["iload"],
        perms: PERM_BUILD,
        handler: cmd_iload,
    },
    CmdSpec {
        names: &["nload"],
        perms: PERM_BUILD,
        handler: cmd_nload,
    },
    CmdSpec {
        names: &["destroy"],
        perms: PERM_BUILD,
        handler: cmd_destroy,
    },
    CmdSpec {
        names: &["purge"],
        perms: PERM_BUILD,
        handler: cmd_purge,
    },
    CmdSpec {
        names: &["spawn"],
        perms: PERM_BUILD,
        handler: cmd_spawn,
    },
    CmdSpec {
        names: &["describe"],
        perms: PERM_BUILD,
        handler: cmd_describe,
    },
    CmdSpec {
        names: &["astat"],
        perms: PERM_BUILD,
        handler: cmd_astat,
    },
    CmdSpec {
        names: &["rstat"],
        perms: PERM_BUILD,
        handler: cmd_rstat,
    },
    CmdSpec {
        names: &["istat"],
        perms: PERM_BUILD,
        handler: cmd_istat,
    },
    CmdSpec {
        names: &["nstat"],
        perms: PERM_BUILD,
        handler: cmd_nstat,
    },
    CmdSpec {
        names: &["export"],
        perms: PERM_BUILD,
        handler: cmd_export,
    },
    CmdSpec {
        names: &["import"],
        perms: PERM_BUILD,
        handler: cmd_import,
    },
    CmdSpec {
        names: &["goto"],
        perms: PERM_BUILD,
        handler: cmd_goto,
    },
    CmdSpec {
        names: &["reset"],
        perms: PERM_BUILD,
        handler: cmd_reset,
    },
    CmdSpec {
        names: &["builders"],
        perms: PERM_BUILD,
        handler: cmd_builders,
    },
    CmdSpec {
        names: &["acreate"],
        perms: PERM_ADMIN,
        handler: cmd_acreate,
    },
];

// ---- setter registries ----

pub type RoomSetter = fn(&mut Room, &str) -> Result<(), String>;
pub type AreaSetter = fn(&mut Area, &str) -> Result<(), String>;
pub type ItemSetter = fn(&mut ItemProto, &str) -> Result<(), String>;
pub type NpcSetter = fn(&mut NpcProto, &str) -> Result<(), String>;

pub static ROOM_SETTERS: &[(&str, RoomSetter)] = &[
    ("name", |r, v| {
        if v.is_empty() {
            return Err("a room needs a name".into());
        }
        r.name = v.to_string();
        Ok(())
    }),
    ("desc", |r, v| {
        r.desc = v.to_string();
        Ok(())
    }),
];

pub static AREA_SETTERS: &[(&str, AreaSetter)] = &[("reset_interval", |a, v| {
    a.reset_interval_s = v.parse().map_err(|_| "expected seconds".to_string())?;
    Ok(())
})];

fn parse_damage(v: &str) -> Result<DamageEntry, String> {
    let mut it = v.split_whitespace();
    let kind = it
        .next()
        .and_then(DamageType::parse)
        .ok_or("expected: <type> <min> <max>")?;
    let min: i32 = it
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or("expected: <type> <min> <max>")?;
    let max: i32 = it
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or("expected: <type> <min> <max>")?;
    if min < 0 || max < min {
        return Err("damage range must be 0 <= min <= max".into());
    }
    Ok(DamageEntry { kind, min, max })
}

fn parse_absorb(v: &str) -> Result<Absorb, String> {
    let mut it = v.split_whitespace();
    let kind = it
        .next()
        .and_then(DamageType::parse)
        .ok_or("expected: <type> <amount>")?;
    let amount: i32 = it
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or("expected: <type> <amount>")?;
    Ok(Absorb { kind, amount })
}

fn item_equippable(p: &mut ItemProto) -> &mut Equippable {
    p.facets.equippable.get_or_insert_with(|| Equippable {
        slot: Slot::Wield,
        hit: 0,
        evade: 0,
        damage: Vec::new(),
        absorb: Vec::new(),
    })
}

pub static ITEM_SETTERS: &[(&str, ItemSetter)] = &[
    ("name", |p, v| {
        if v.is_empty() {
            return Err("an item needs a name".into());
        }
        p.name = v.to_string();
        Ok(())
    }),
    ("keywords", |p, v| {
        p.keywords = v.split_whitespace().map(|s| s.to_ascii_lowercase()).collect();
        Ok(())
    }),
    ("desc", |p, v| {
        p.desc = v.to_string();
        Ok(())
    }),
    ("slot", |p, v| {
        let slot = Slot::parse(v).ok_or("no such slot")?;
        item_equippable(p).slot = slot;
        Ok(())
    }),
    ("hit", |p, v| {
        item_equippable(p).hit = v.parse().map_err(|_| "expected a number".to_string())?;
        Ok(())
    }),
    ("evade", |p, v| {
        item_equippable(p).evade = v.parse().map_err(|_| "expected a number".to_string())?;
        Ok(())
    }),
    ("damage", |p, v| {
        let entry = parse_damage(v)?;
        let eq = item_equippable(p);
        eq.damage.retain(|d| d.kind != entry.kind);
        eq.damage.push(entry);
        Ok(())
    }),
    ("absorb", |p, v| {
        let entry = parse_absorb(v)?;
        let eq = item_equippable(p);
        eq.absorb.retain(|a| a.kind != entry.kind);
        eq.absorb.push(entry);
        Ok(())
    }),
    ("heal", |p, v| {
        let heal = v.parse().map_err(|_| "expected a number".to_string())?;
        p.facets.food.get_or_insert(Food { heal: 0, mana: 0 }).heal = heal;
        Ok(())
    }),
    ("mana", |p, v| {
        let mana = v.parse().map_err(|_| "expected a number".to_string())?;
        p.facets.food.get_or_insert(Food { heal: 0, mana: 0 }).mana = mana;
        Ok(())
    }),
    ("capacity", |p, v| {
        let capacity = v.parse().map_err(|_| "expected a number".to_string())?;
        p.facets.container = Some(Container { capacity });
        Ok(())
    }),
    ("seats", |p, v| {
        let seats = v.parse().map_err(|_| "expected a number".to_string())?;
        p.facets.furniture = Some(Furniture { seats });
        Ok(())
    }),
    ("portal", |p, v| {
        let to = RoomRef::parse(v).ok_or("expected area:room")?;
        p.facets.portal = Some(Portal { to });
        Ok(())
    }),
];

pub static NPC_SETTERS: &[(&str, NpcSetter)] = &[
    ("name", |p, v| {
        if v.is_empty() {
            return Err("an npc needs a name".into());
        }
        p.name = v.to_string();
        Ok(())
    }),
    ("keywords", |p, v| {
        p.keywords = v.split_whitespace().map(|s| s.to_ascii_lowercase()).collect();
        Ok(())
    }),
    ("desc", |p, v| {
        p.desc = v.to_string();
        Ok(())
    }),
    ("hp", |p, v| {
        p.max_hp = v.parse().map_err(|_| "expected a number".to_string())?;
        Ok(())
    }),
    ("mp", |p, v| {
        p.max_mp = v.parse().map_err(|_| "expected a number".to_string())?;
        Ok(())
    }),
    ("attrs", |p, v| {
        let nums: Vec<i32> = v.split_whitespace().filter_map(|t| t.parse().ok()).collect();
        if nums.len() != 4 {
            return Err("expected: <str> <int> <dex> <speed>".into());
        }
        p.attrs = Attrs {
            strength: nums[0],
            intellect: nums[1],
            dexterity: nums[2],
            speed: nums[3],
        };
        Ok(())
    }),
    ("hit", |p, v| {
        p.hit = v.parse().map_err(|_| "expected a number".to_string())?;
        Ok(())
    }),
    ("evade", |p, v| {
        p.evade = v.parse().map_err(|_| "expected a number".to_string())?;
        Ok(())
    }),
    ("damage", |p, v| {
        let entry = parse_damage(v)?;
        p.damage.retain(|d| d.kind != entry.kind);
        p.damage.push(entry);
        Ok(())
    }),
    ("absorb", |p, v| {
        let entry = parse_absorb(v)?;
        p.absorb.retain(|a| a.kind != entry.kind);
        p.absorb.push(entry);
        Ok(())
    }),
    ("wander", |p, v| match v {
        "on" | "true" | "yes" => {
            p.wander = true;
            Ok(())
        }
        "off" | "false" | "no" => {
            p.wander = false;
            Ok(())
        }
        _ => Err("wander: on|off".into()),
    }),
    ("script", |p, v| {
        if v == "none" {
            p.script = None;
            return Ok(());
        }
        p.script = Some(v.parse().map_err(|_| "expected a script id or 'none'".to_string())?);
        Ok(())
    }),
];

// ---- helpers ----

fn here_of(world: &World, sid: SessionId) -> Option<RoomRef> {
    world.sessions.get(&sid).map(|s| s.location.clone())
}

/// Area the builder stands in, with the ACL check applied.
fn editable_area(world: &mut World, sid: SessionId) -> Option<String> {
    let here = here_of(world, sid)?;
    if !world.can_build(sid, &here.area) {
        world.push_line(sid, "you are not a builder of this area.");
        return None;
    }
    Some(here.area)
}

// ---- handlers ----

fn cmd_bhelp(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let mut s = String::new();
    s.push_str("build commands:\r\n");
    s.push_str(" - dig <dir> [name], link <dir> <area:room> [rdir], unlink <dir>\r\n");
    s.push_str(" - set room|area <attr> <value>, set item|npc <id> <attr> <value>\r\n");
    s.push_str(" - icreate/ncreate/screate <name>, sstep <id> say|emote|wait <arg>\r\n");
    s.push_str(" - iload/nload <id>, destroy room|item|npc|script <id>, purge\r\n");
    s.push_str(" - spawn list | spawn item <id> [count] [in <id>] | spawn npc <id> [count] | spawn del <n>\r\n");
    s.push_str(" - describe room|item <id>|npc <id>  (multi-line; '.' saves, '.q' cancels)\r\n");
    s.push_str(" - astat, rstat, istat <id>, nstat <id>, export [path], import <path>\r\n");
    s.push_str(" - goto <area:room>, reset, builders add|del <name>, acreate <name>\r\n");
    world.push_line(sid, &s);
}

fn cmd_dig(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let (dir_tok, name) = split_verb(args);
    let Some(dir) = Direction::parse(dir_tok) else {
        world.push_line(sid, "dig which direction?");
        return;
    };
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());

    if world
        .room(&here)
        .is_some_and(|r| r.exit(dir).is_some())
    {
        world.push_line(sid, "there is already an exit that way.");
        return;
    }

    let new_ref = {
        let Some(area) = world.areas.get_mut(&area_name) else {
            return;
        };
        let id = area.alloc_id();
        let label = if name.is_empty() { "an unfinished room" } else { name };
        let room = Room::new(&area_name, id, label);
        area.rooms.insert(id, room);
        RoomRef {
            area: area_name.clone(),
            room: id,
        }
    };

    match world.link_exits(&here, dir, &new_ref, dir.opposite()) {
        Ok(()) => {
            world.save_area_logged(&area_name);
            world.push_line(sid, &format!("dug {new_ref} to the {}.", dir.as_str()));
        }
        Err(e) => world.push_line(sid, &format!("dig failed: {e}")),
    }
}

fn cmd_link(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if !(2..=3).contains(&parts.len()) {
        world.push_line(sid, "link <dir> <area:room> [return-dir]");
        return;
    }
    let (Some(dir), Some(to)) = (Direction::parse(parts[0]), RoomRef::parse(parts[1])) else {
        world.push_line(sid, "link <dir> <area:room> [return-dir]");
        return;
    };
    let rdir = match parts.get(2) {
        Some(t) => match Direction::parse(t) {
            Some(d) => d,
            None => {
                world.push_line(sid, "that is not a direction.");
                return;
            }
        },
        None => dir.opposite(),
    };
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());
    match world.link_exits(&here, dir, &to, rdir) {
        Ok(()) => {
            world.save_area_logged(&area_name);
            if to.area != area_name {
                world.save_area_logged(&to.area.clone());
            }
            world.push_line(sid, &format!("linked {} to {to}.", dir.as_str()));
        }
        Err(e) => world.push_line(sid, &format!("link failed: {e}")),
    }
}

fn cmd_unlink(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let Some(dir) = Direction::parse(args.trim()) else {
        world.push_line(sid, "unlink which direction?");
        return;
    };
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());
    match world.unlink_exit(&here, dir) {
        Ok(()) => {
            world.save_area_logged(&area_name);
            world.push_line(sid, &format!("unlinked {}.", dir.as_str()));
        }
        Err(e) => world.push_line(sid, &format!("unlink failed: {e}")),
    }
}

fn cmd_set(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let (entity, rest) = split_verb(args);
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());

    let outcome: Result<(), String> = match entity.to_ascii_lowercase().as_str() {
        "room" => {
            let (attr, value) = split_verb(rest);
            let setter = ROOM_SETTERS.iter().find(|(n, _)| *n == attr);
            match setter {
                Some((_, f)) => match world.room_mut(&here) {
                    Some(room) => f(room, value),
                    None => Err("the room is gone".into()),
                },
                None => Err(format!("no such room attribute: {attr}")),
            }
        }
        "area" => {
            let (attr, value) = split_verb(rest);
            let setter = AREA_SETTERS.iter().find(|(n, _)| *n == attr);
            match setter {
                Some((_, f)) => match world.areas.get_mut(&area_name) {
                    Some(area) => f(area, value),
                    None => Err("the area is gone".into()),
                },
                None => Err(format!("no such area attribute: {attr}")),
            }
        }
        "item" => {
            let (id_tok, rest) = split_verb(rest);
            let (attr, value) = split_verb(rest);
            match id_tok.parse::<u32>() {
                Ok(id) => {
                    let setter = ITEM_SETTERS.iter().find(|(n, _)| *n == attr);
                    match setter {
                        Some((_, f)) => match world
                            .areas
                            .get_mut(&area_name)
                            .and_then(|a| a.item_protos.get_mut(&id))
                        {
                            Some(proto) => f(proto, value),
                            None => Err(format!("no item prototype {id} here")),
                        },
                        None => Err(format!("no such item attribute: {attr}")),
                    }
                }
                Err(_) => Err("set item <id> <attr> <value>".into()),
            }
        }
        "npc" => {
            let (id_tok, rest) = split_verb(rest);
            let (attr, value) = split_verb(rest);
            match id_tok.parse::<u32>() {
                Ok(id) => {
                    let setter = NPC_SETTERS.iter().find(|(n, _)| *n == attr);
                    match setter {
                        Some((_, f)) => match world
                            .areas
                            .get_mut(&area_name)
                            .and_then(|a| a.npc_protos.get_mut(&id))
                        {
                            Some(proto) => f(proto, value),
                            None => Err(format!("no npc prototype {id} here")),
                        },
                        None => Err(format!("no such npc attribute: {attr}")),
                    }
                }
                Err(_) => Err("set npc <id> <attr> <value>".into()),
            }
        }
        _ => Err("set room|area|item|npc ...".into()),
    };

    match outcome {
        Ok(()) => {
            world.save_area_logged(&area_name);
            world.push_line(sid, "set.");
        }
        Err(e) => world.push_line(sid, &e),
    }
}

fn cmd_icreate(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let name = args.trim();
    if name.is_empty() {
        world.push_line(sid, "icreate <name>");
        return;
    }
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    let id = {
        let Some(area) = world.areas.get_mut(&area_name) else {
            return;
        };
        let id = area.alloc_id();
        area.item_protos.insert(
            id,
            ItemProto {
                id,
                area: area_name.clone(),
                name: name.to_string(),
                keywords: name
                    .split_whitespace()
                    .map(|s| s.to_ascii_lowercase())
                    .collect(),
                desc: String::new(),
                facets: Default::default(),
            },
        );
        id
    };
    world.save_area_logged(&area_name);
    world.push_line(sid, &format!("item prototype {id} created."));
}

fn cmd_ncreate(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let name = args.trim();
    if name.is_empty() {
        world.push_line(sid, "ncreate <name>");
        return;
    }
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    let id = {
        let Some(area) = world.areas.get_mut(&area_name) else {
            return;
        };
        let id = area.alloc_id();
        area.npc_protos.insert(
            id,
            NpcProto {
                id,
                area: area_name.clone(),
                name: name.to_string(),
                keywords: name
                    .split_whitespace()
                    .map(|s| s.to_ascii_lowercase())
                    .collect(),
                desc: String::new(),
                max_hp: 10,
                max_mp: 0,
                attrs: Attrs::default(),
                hit: 0,
                evade: 0,
                damage: Vec::new(),
                absorb: Vec::new(),
                wander: false,
                script: None,
            },
        );
        id
    };
    world.save_area_logged(&area_name);
    world.push_line(sid, &format!("npc prototype {id} created."));
}

fn cmd_screate(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let name = args.trim();
    if name.is_empty() {
        world.push_line(sid, "screate <name>");
        return;
    }
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    let id = {
        let Some(area) = world.areas.get_mut(&area_name) else {
            return;
        };
        let id = area.alloc_id();
        area.scripts.insert(
            id,
            Script {
                id,
                area: area_name.clone(),
                name: name.to_string(),
                steps: Vec::new(),
            },
        );
        id
    };
    world.save_area_logged(&area_name);
    world.push_line(sid, &format!("script {id} created."));
}

fn cmd_sstep(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let (id_tok, rest) = split_verb(args);
    let (kind, value) = split_verb(rest);
    let Ok(id) = id_tok.parse::<u32>() else {
        world.push_line(sid, "sstep <id> say|emote|wait <arg>");
        return;
    };
    let step = match kind.to_ascii_lowercase().as_str() {
        "say" if !value.is_empty() => ScriptStep::Say(value.to_string()),
        "emote" if !value.is_empty() => ScriptStep::Emote(value.to_string()),
        "wait" => match value.trim().parse::<u32>() {
            Ok(t) => ScriptStep::Wait(t),
            Err(_) => {
                world.push_line(sid, "wait how many ticks?");
                return;
            }
        },
        _ => {
            world.push_line(sid, "sstep <id> say|emote|wait <arg>");
            return;
        }
    };
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    match world
        .areas
        .get_mut(&area_name)
        .and_then(|a| a.scripts.get_mut(&id))
    {
        Some(script) => {
            script.steps.push(step);
            world.save_area_logged(&area_name);
            world.push_line(sid, "step added.");
        }
        None => world.push_line(sid, "no such script here."),
    }
}

fn cmd_iload(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let Ok(id) = args.trim().parse::<u32>() else {
        world.push_line(sid, "iload <id>");
        return;
    };
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());
    let inst = world
        .areas
        .get(&area_name)
        .and_then(|a| a.item_protos.get(&id))
        .map(|p| p.load());
    match inst {
        Some(it) => {
            let name = it.name.clone();
            if let Some(room) = world.room_mut(&here) {
                room.items.push(it);
            }
            world.push_line(sid, &format!("{name} shimmers into being."));
        }
        None => world.push_line(sid, "no such item prototype here."),
    }
}

fn cmd_nload(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let Ok(id) = args.trim().parse::<u32>() else {
        world.push_line(sid, "nload <id>");
        return;
    };
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());
    let proto = ProtoRef {
        area: area_name,
        id,
    };
    match world.spawn_npc(&proto, &here) {
        Some(_) => {}
        None => world.push_line(sid, "no such npc prototype here."),
    }
}

fn cmd_destroy(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let (kind, id_tok) = split_verb(args);
    let Ok(id) = id_tok.trim().parse::<u32>() else {
        world.push_line(sid, "destroy room|item|npc|script <id>");
        return;
    };
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    let gone = match kind.to_ascii_lowercase().as_str() {
        "room" => {
            let occupied = world
                .areas
                .get(&area_name)
                .and_then(|a| a.rooms.get(&id))
                .map(|r| !r.occupants.is_empty())
                .unwrap_or(false);
            if occupied {
                world.push_line(sid, "someone is standing in that room.");
                return;
            }
            world
                .areas
                .get_mut(&area_name)
                .map(|a| a.rooms.remove(&id).is_some())
                .unwrap_or(false)
        }
        "item" => world
            .areas
            .get_mut(&area_name)
            .map(|a| a.item_protos.remove(&id).is_some())
            .unwrap_or(false),
        "npc" => world
            .areas
            .get_mut(&area_name)
            .map(|a| a.npc_protos.remove(&id).is_some())
            .unwrap_or(false),
        "script" => world
            .areas
            .get_mut(&area_name)
            .map(|a| a.scripts.remove(&id).is_some())
            .unwrap_or(false),
        _ => {
            world.push_line(sid, "destroy room|item|npc|script <id>");
            return;
        }
    };
    if gone {
        world.save_area_logged(&area_name);
        world.push_line(sid, "destroyed.");
    } else {
        world.push_line(sid, "there is no such thing to destroy.");
    }
}

fn cmd_purge(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    if editable_area(world, sid).is_none() {
        return;
    }
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());
    let npc_ids = world
        .room(&here)
        .map(|r| r.npcs.clone())
        .unwrap_or_default();
    for id in npc_ids {
        world.remove_npc(id);
    }
    if let Some(room) = world.room_mut(&here) {
        room.items.clear();
    }
    let who = world
        .sessions
        .get(&sid)
        .map(|s| s.ch.name.clone())
        .unwrap_or_default();
    world.room_message(&here, &format!("* {who} sweeps the room clean."), &[]);
}

fn cmd_spawn(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());

    match parts.as_slice() {
        ["list"] | [] => {
            let Some(room) = world.room(&here) else {
                return;
            };
            let mut s = format!("spawns here: {}\r\n", room.spawns.len());
            for (i, sp) in room.spawns.iter().enumerate() {
                let kind = match sp.kind {
                    SpawnKind::Item => "item",
                    SpawnKind::Npc => "npc",
                };
                let inside = sp
                    .inside
                    .as_ref()
                    .map(|c| format!(" inside {c}"))
                    .unwrap_or_default();
                s.push_str(&format!(" {i}. {kind} {} x{}{inside}\r\n", sp.proto, sp.count));
            }
            world.push_line(sid, &s);
        }
        ["del", idx] => {
            let Some(area_name) = editable_area(world, sid) else {
                return;
            };
            let Ok(i) = idx.parse::<usize>() else {
                world.push_line(sid, "spawn del <index>");
                return;
            };
            let removed = world
                .room_mut(&here)
                .map(|r| {
                    if i < r.spawns.len() {
                        r.spawns.remove(i);
                        true
                    } else {
                        false
                    }
                })
                .unwrap_or(false);
            if removed {
                world.save_area_logged(&area_name);
                world.push_line(sid, "spawn removed.");
            } else {
                world.push_line(sid, "no such spawn.");
            }
        }
        [kind @ ("item" | "npc"), rest @ ..] if !rest.is_empty() => {
            let Some(area_name) = editable_area(world, sid) else {
                return;
            };
            let Ok(id) = rest[0].parse::<u32>() else {
                world.push_line(sid, "spawn item|npc <id> [count] [in <id>]");
                return;
            };
            let mut count = 1u32;
            let mut inside = None;
            let mut i = 1;
            while i < rest.len() {
                if rest[i] == "in" && i + 1 < rest.len() {
                    match rest[i + 1].parse::<u32>() {
                        Ok(cid) => {
                            inside = Some(ProtoRef {
                                area: area_name.clone(),
                                id: cid,
                            })
                        }
                        Err(_) => {
                            world.push_line(sid, "spawn ... in <container-proto-id>");
                            return;
                        }
                    }
                    i += 2;
                } else if let Ok(c) = rest[i].parse::<u32>() {
                    count = c.max(1);
                    i += 1;
                } else {
                    world.push_line(sid, "spawn item|npc <id> [count] [in <id>]");
                    return;
                }
            }
            let kind = if *kind == "item" {
                SpawnKind::Item
            } else {
                SpawnKind::Npc
            };
            if kind == SpawnKind::Npc && inside.is_some() {
                world.push_line(sid, "npcs don't fit in containers.");
                return;
            }
            let exists = {
                let area = world.areas.get(&area_name);
                match kind {
                    SpawnKind::Item => area.is_some_and(|a| a.item_protos.contains_key(&id)),
                    SpawnKind::Npc => area.is_some_and(|a| a.npc_protos.contains_key(&id)),
                }
            };
            if !exists {
                world.push_line(sid, "no such prototype here.");
                return;
            }
            let proto = ProtoRef {
                area: area_name.clone(),
                id,
            };
            if let Some(room) = world.room_mut(&here) {
                room.spawns.push(Spawn {
                    kind,
                    proto,
                    count,
                    inside,
                });
            }
            world.save_area_logged(&area_name);
            world.push_line(sid, "spawn added; it lands on the next reset.");
        }
        _ => world.push_line(sid, "spawn list | spawn item|npc <id> [count] [in <id>] | spawn del <n>"),
    }
}

fn cmd_describe(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let (kind, id_tok) = split_verb(args);
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());

    let target = match kind.to_ascii_lowercase().as_str() {
        "room" | "" => Some(EditTarget::RoomDesc(here)),
        "item" => id_tok.trim().parse::<u32>().ok().and_then(|id| {
            world
                .areas
                .get(&area_name)
                .filter(|a| a.item_protos.contains_key(&id))
                .map(|_| {
                    EditTarget::ItemDesc(ProtoRef {
                        area: area_name.clone(),
                        id,
                    })
                })
        }),
        "npc" => id_tok.trim().parse::<u32>().ok().and_then(|id| {
            world
                .areas
                .get(&area_name)
                .filter(|a| a.npc_protos.contains_key(&id))
                .map(|_| {
                    EditTarget::NpcDesc(ProtoRef {
                        area: area_name.clone(),
                        id,
                    })
                })
        }),
        _ => None,
    };

    match target {
        Some(target) => {
            crate::mode::enter_nested(
                world,
                sid,
                Mode::TextEdit(TextEdit {
                    target,
                    lines: Vec::new(),
                }),
            );
            world.push_line(sid, "enter text; '.' on its own line saves, '.q' cancels.");
        }
        None => world.push_line(sid, "describe room | item <id> | npc <id>"),
    }
}

fn cmd_astat(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());
    let Some(area) = world.areas.get(&here.area) else {
        return;
    };
    let mut s = format!("area {}:\r\n", area.name);
    s.push_str(&format!(
        " - rooms {} items {} npcs {} scripts {}\r\n",
        area.rooms.len(),
        area.item_protos.len(),
        area.npc_protos.len(),
        area.scripts.len()
    ));
    let mut builders: Vec<&str> = area.builders.iter().map(|s| s.as_str()).collect();
    builders.sort_unstable();
    s.push_str(&format!(" - builders: {}\r\n", builders.join(" ")));
    s.push_str(&format!(
        " - next_id {} visits {} reset every {}s\r\n",
        area.next_id, area.visits, area.reset_interval_s
    ));
    world.push_line(sid, &s);
}

fn cmd_rstat(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());
    let Some(room) = world.room(&here) else {
        return;
    };
    let mut s = format!("room {here} \"{}\":\r\n", room.name);
    for d in Direction::ALL {
        if let Some(ex) = room.exit(d) {
            let mut flags = Vec::new();
            if let Some(l) = ex.linked {
                flags.push(format!("linked={}", l.as_str()));
            }
            if ex.openable {
                flags.push("openable".to_string());
            }
            if ex.closed {
                flags.push("closed".to_string());
            }
            if ex.locked {
                flags.push("locked".to_string());
            }
            if let Some(k) = &ex.key {
                flags.push(format!("key={k}"));
            }
            s.push_str(&format!(
                " - exit {}: {} {}\r\n",
                d.as_str(),
                ex.to,
                flags.join(" ")
            ));
        }
    }
    s.push_str(&format!(
        " - items {} npcs {} occupants {} spawns {}\r\n",
        room.items.len(),
        room.npcs.len(),
        room.occupants.len(),
        room.spawns.len()
    ));
    world.push_line(sid, &s);
}

fn cmd_istat(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());
    let Ok(id) = args.trim().parse::<u32>() else {
        world.push_line(sid, "istat <id>");
        return;
    };
    let Some(proto) = world
        .areas
        .get(&here.area)
        .and_then(|a| a.item_protos.get(&id))
    else {
        world.push_line(sid, "no such item prototype here.");
        return;
    };
    let mut s = format!("item {}:{} \"{}\":\r\n", proto.area, proto.id, proto.name);
    s.push_str(&format!(" - keywords: {}\r\n", proto.keywords.join(" ")));
    s.push_str(&format!(" - facets: {}\r\n", proto.facets.labels().join(", ")));
    if let Some(eq) = &proto.facets.equippable {
        s.push_str(&format!(
            " - slot {} hit {} evade {}\r\n",
            eq.slot.as_str(),
            eq.hit,
            eq.evade
        ));
        for d in &eq.damage {
            s.push_str(&format!(" - damage {} {}..{}\r\n", d.kind.as_str(), d.min, d.max));
        }
        for a in &eq.absorb {
            s.push_str(&format!(" - absorb {} {}\r\n", a.kind.as_str(), a.amount));
        }
    }
    world.push_line(sid, &s);
}

fn cmd_nstat(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());
    let Ok(id) = args.trim().parse::<u32>() else {
        world.push_line(sid, "nstat <id>");
        return;
    };
    let Some(proto) = world
        .areas
        .get(&here.area)
        .and_then(|a| a.npc_protos.get(&id))
    else {
        world.push_line(sid, "no such npc prototype here.");
        return;
    };
    let mut s = format!("npc {}:{} \"{}\":\r\n", proto.area, proto.id, proto.name);
    s.push_str(&format!(
        " - hp {} mp {} hit {} evade {} wander {}\r\n",
        proto.max_hp, proto.max_mp, proto.hit, proto.evade, proto.wander
    ));
    for d in &proto.damage {
        s.push_str(&format!(" - damage {} {}..{}\r\n", d.kind.as_str(), d.min, d.max));
    }
    if let Some(script) = proto.script {
        s.push_str(&format!(" - script {script}\r\n"));
    }
    world.push_line(sid, &s);
}

fn cmd_export(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());
    let Some(area) = world.areas.get(&here.area) else {
        return;
    };
    let blob = crate::areafile::export_area(area);
    let path = if args.trim().is_empty() {
        world.cfg.data_dir.join(format!("{}.area", area.name))
    } else {
        PathBuf::from(args.trim())
    };
    match std::fs::write(&path, blob) {
        Ok(()) => world.push_line(sid, &format!("exported to {}.", path.display())),
        Err(e) => world.push_line(sid, &format!("export failed: {e}")),
    }
}

fn cmd_import(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let path = args.trim();
    if path.is_empty() {
        world.push_line(sid, "import <path>");
        return;
    }
    let blob = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            world.push_line(sid, &format!("import failed: {e}"));
            return;
        }
    };
    let area = match crate::areafile::import_area(&blob) {
        Ok(a) => a,
        Err(e) => {
            world.push_line(sid, &format!("import failed: {e}"));
            return;
        }
    };
    if world.areas.contains_key(&area.name) {
        world.push_line(sid, "an area by that name already exists.");
        return;
    }
    let name = area.name.clone();
    world.areas.insert(name.clone(), area);
    world.save_area_logged(&name);
    world.push_line(sid, &format!("imported area {name}."));
}

fn cmd_goto(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let Some(to) = RoomRef::parse(args.trim()) else {
        world.push_line(sid, "goto <area:room>");
        return;
    };
    if world.room(&to).is_none() {
        world.push_line(sid, "no such room.");
        return;
    }
    world.push_line(sid, "you step sideways through the walls.");
    world.move_session_to(sid, &to, None);
}

fn cmd_reset(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let Some(area_name) = editable_area(world, sid) else {
        return;
    };
    world.reset_area(&area_name);
    world.push_line(sid, "the area shivers and resets.");
}

fn cmd_builders(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let (op, name) = split_verb(args);
    let here = here_of(world, sid).unwrap_or_else(|| world.cfg.start.clone());
    let is_admin = world.sessions.get(&sid).map(|s| s.is_admin()).unwrap_or(false);
    if !is_admin && !world.can_build(sid, &here.area) {
        world.push_line(sid, "you are not a builder of this area.");
        return;
    }
    enum Done {
        Added,
        Removed,
        Listed(String),
    }
    let done = {
        let Some(area) = world.areas.get_mut(&here.area) else {
            return;
        };
        match (op.to_ascii_lowercase().as_str(), name.trim()) {
            ("add", n) if !n.is_empty() => {
                area.builders.insert(n.to_string());
                Done::Added
            }
            ("del", n) if !n.is_empty() => {
                area.builders.retain(|b| !b.eq_ignore_ascii_case(n));
                Done::Removed
            }
            _ => {
                let mut names: Vec<&str> = area.builders.iter().map(|s| s.as_str()).collect();
                names.sort_unstable();
                Done::Listed(names.join(" "))
            }
        }
    };
    match done {
        Done::Added => {
            world.save_area_logged(&here.area);
            world.push_line(sid, "builder added.");
        }
        Done::Removed => {
            world.save_area_logged(&here.area);
            world.push_line(sid, "builder removed.");
        }
        Done::Listed(names) => world.push_line(sid, &format!("builders: {names}")),
    }
}

fn cmd_acreate(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let name = args.trim().to_ascii_lowercase();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        world.push_line(sid, "acreate <name> (letters, digits, underscore)");
        return;
    }
    if world.areas.contains_key(&name) {
        world.push_line(sid, "an area by that name already exists.");
        return;
    }
    let mut area = Area::new(&name);
    area.reset_interval_s = world.cfg.reset_interval_s;
    let id = area.alloc_id();
    area.rooms.insert(id, Room::new(&name, id, "a blank expanse"));
    if let Some(sess) = world.sessions.get(&sid) {
        area.builders.insert(sess.ch.name.clone());
    }
    world.areas.insert(name.clone(), area);
    world.save_area_logged(&name);
    world.push_line(sid, &format!("area {name} created; goto {name}:{id} to begin."));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::dispatch;
    use crate::testutil;

    fn builder(world: &mut World) -> SessionId {
        let sid = testutil::spawn_player(world, "Maker");
        let sess = world.sessions.get_mut(&sid).unwrap();
        sess.perms |= PERM_BUILD;
        sess.mode = Mode::Build;
        let name = sess.ch.name.clone();
        world
            .areas
            .get_mut("haven")
            .unwrap()
            .builders
            .insert(name);
        sid
    }

    #[test]
    fn dig_creates_a_linked_room() {
        let mut world = testutil::test_world();
        let sid = builder(&mut world);
        dispatch(&mut world, sid, "dig east The Vault");

        let start = world.cfg.start.clone();
        let room = world.room(&start).unwrap();
        let ex = room.exit(Direction::East).expect("east exit dug");
        assert_eq!(ex.linked, Some(Direction::West));
        let far = world.room(&ex.to.clone()).unwrap();
        assert_eq!(far.name, "The Vault");
        assert_eq!(
            far.exit(Direction::West).unwrap().to,
            start,
            "reverse exit points home"
        );
    }

    #[test]
    fn set_room_goes_through_the_registry() {
        let mut world = testutil::test_world();
        let sid = builder(&mut world);
        dispatch(&mut world, sid, "set room name The Renamed Hall");
        let start = world.cfg.start.clone();
        assert_eq!(world.room(&start).unwrap().name, "The Renamed Hall");

        dispatch(&mut world, sid, "set room nonsense x");
        let out = testutil::outbound_text(&world, sid);
        assert!(out.contains("no such room attribute"), "{out}");
    }

    #[test]
    fn non_builders_are_turned_away() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Interloper");
        let sess = world.sessions.get_mut(&sid).unwrap();
        sess.perms |= PERM_BUILD;
        sess.mode = Mode::Build;
        // PERM_BUILD but not on haven's builder list.
        dispatch(&mut world, sid, "dig east");
        let out = testutil::outbound_text(&world, sid);
        assert!(out.contains("not a builder of this area"), "{out}");
    }

    #[test]
    fn item_setters_build_up_facets() {
        let mut world = testutil::test_world();
        let sid = builder(&mut world);
        dispatch(&mut world, sid, "icreate a glass dagger");
        let id = world.areas.get("haven").unwrap().next_id;
        dispatch(&mut world, sid, &format!("set item {id} slot wield"));
        dispatch(&mut world, sid, &format!("set item {id} damage piercing 2 4"));
        dispatch(&mut world, sid, &format!("set item {id} capacity 3"));

        let proto = world
            .areas
            .get("haven")
            .unwrap()
            .item_protos
            .get(&id)
            .unwrap();
        let eq = proto.facets.equippable.as_ref().unwrap();
        assert_eq!(eq.slot, Slot::Wield);
        assert_eq!(eq.damage.len(), 1);
        assert!(proto.facets.container.is_some());
    }

    #[test]
    fn spawn_rules_wait_for_reset() {
        let mut world = testutil::test_world();
        let sid = builder(&mut world);
        // Proto 1 is the seeded sword.
        dispatch(&mut world, sid, "spawn item 1 2");
        let start = world.cfg.start.clone();
        assert_eq!(world.room(&start).unwrap().spawns.len(), 1);

        let before = world.room(&start).unwrap().count_item_proto(&ProtoRef {
            area: "haven".to_string(),
            id: 1,
        });
        world.reset_area("haven");
        let after = world.room(&start).unwrap().count_item_proto(&ProtoRef {
            area: "haven".to_string(),
            id: 1,
        });
        assert!(after >= 2 && after >= before, "reset tops up to the count");
    }
}
