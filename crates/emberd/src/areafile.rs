//! The area interchange format: a tagged-section text blob.
//!
//! ```text
//! [Area]
//! name: haven
//! ...
//! [End Area]
//! [Rooms]
//! id: 1
//! ...            <- one record per object, records separated by blank lines
//! [End Rooms]
//! ```
//!
//! Every Area, Room, Exit, ItemProto, NpcProto, Script, and Spawn round-trips
//! losslessly; storage ids never appear. Multi-line text is carried on one
//! line with `\n` (and `\\`) escapes.

use std::collections::HashMap;

use crate::area::{Area, Direction, Exit, ProtoRef, Room, RoomRef, Spawn, SpawnKind};
use crate::character::Attrs;
use crate::item::{Absorb, Container, DamageEntry, DamageType, Equippable, Food, Furniture, Portal, Slot};
use crate::npc::{NpcProto, Script, ScriptStep};

#[derive(Debug)]
pub struct AreaFileError {
    pub line: usize,
    pub msg: String,
}

impl std::fmt::Display for AreaFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.msg)
    }
}

impl std::error::Error for AreaFileError {}

fn err(line: usize, msg: impl Into<String>) -> AreaFileError {
    AreaFileError {
        line,
        msg: msg.into(),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// ---- export ----

pub fn export_area(area: &Area) -> String {
    let mut s = String::new();

    s.push_str("[Area]\n");
    s.push_str(&format!("name: {}\n", area.name));
    let mut builders: Vec<&str> = area.builders.iter().map(|b| b.as_str()).collect();
    builders.sort_unstable();
    s.push_str(&format!("builders: {}\n", builders.join(" ")));
    s.push_str(&format!("reset_interval: {}\n", area.reset_interval_s));
    s.push_str("[End Area]\n\n");

    s.push_str("[Rooms]\n");
    let mut room_ids: Vec<u32> = area.rooms.keys().copied().collect();
    room_ids.sort_unstable();
    for (i, id) in room_ids.iter().enumerate() {
        let room = &area.rooms[id];
        if i > 0 {
            s.push('\n');
        }
        s.push_str(&format!("id: {}\n", room.id));
        s.push_str(&format!("name: {}\n", escape(&room.name)));
        if !room.desc.is_empty() {
            s.push_str(&format!("desc: {}\n", escape(&room.desc)));
        }
        for d in Direction::ALL {
            if let Some(ex) = room.exit(d) {
                s.push_str(&format!("exit: {}\n", fmt_exit(d, ex)));
            }
        }
        for sp in &room.spawns {
            s.push_str(&format!("spawn: {}\n", fmt_spawn(sp)));
        }
    }
    s.push_str("[End Rooms]\n\n");

    s.push_str("[Items]\n");
    let mut item_ids: Vec<u32> = area.item_protos.keys().copied().collect();
    item_ids.sort_unstable();
    for (i, id) in item_ids.iter().enumerate() {
        let p = &area.item_protos[id];
        if i > 0 {
            s.push('\n');
        }
        s.push_str(&format!("id: {}\n", p.id));
        s.push_str(&format!("name: {}\n", escape(&p.name)));
        s.push_str(&format!("keywords: {}\n", p.keywords.join(" ")));
        if !p.desc.is_empty() {
            s.push_str(&format!("desc: {}\n", escape(&p.desc)));
        }
        if let Some(eq) = &p.facets.equippable {
            s.push_str(&format!(
                "equippable: slot={} hit={} evade={}\n",
                eq.slot.as_str(),
                eq.hit,
                eq.evade
            ));
            for d in &eq.damage {
                s.push_str(&format!("damage: {} {} {}\n", d.kind.as_str(), d.min, d.max));
            }
            for a in &eq.absorb {
                s.push_str(&format!("absorb: {} {}\n", a.kind.as_str(), a.amount));
            }
        }
        if let Some(f) = &p.facets.food {
            s.push_str(&format!("food: heal={} mana={}\n", f.heal, f.mana));
        }
        if let Some(c) = &p.facets.container {
            s.push_str(&format!("container: capacity={}\n", c.capacity));
        }
        if let Some(f) = &p.facets.furniture {
            s.push_str(&format!("furniture: seats={}\n", f.seats));
        }
        if let Some(p) = &p.facets.portal {
            s.push_str(&format!("portal: {}\n", p.to));
        }
    }
    s.push_str("[End Items]\n\n");

    s.push_str("[Npcs]\n");
    let mut npc_ids: Vec<u32> = area.npc_protos.keys().copied().collect();
    npc_ids.sort_unstable();
    for (i, id) in npc_ids.iter().enumerate() {
        let p = &area.npc_protos[id];
        if i > 0 {
            s.push('\n');
        }
        s.push_str(&format!("id: {}\n", p.id));
        s.push_str(&format!("name: {}\n", escape(&p.name)));
        s.push_str(&format!("keywords: {}\n", p.keywords.join(" ")));
        if !p.desc.is_empty() {
            s.push_str(&format!("desc: {}\n", escape(&p.desc)));
        }
        s.push_str(&format!("hp: {}\n", p.max_hp));
        s.push_str(&format!("mp: {}\n", p.max_mp));
        s.push_str(&format!(
            "attrs: {} {} {} {}\n",
            p.attrs.strength, p.attrs.intellect, p.attrs.dexterity, p.attrs.speed
        ));
        s.push_str(&format!("hit: {}\n", p.hit));
        s.push_str(&format!("evade: {}\n", p.evade));
        for d in &p.damage {
            s.push_str(&format!("damage: {} {} {}\n", d.kind.as_str(), d.min, d.max));
        }
        for a in &p.absorb {
            s.push_str(&format!("absorb: {} {}\n", a.kind.as_str(), a.amount));
        }
        s.push_str(&format!("wander: {}\n", p.wander));
        if let Some(script) = p.script {
            s.push_str(&format!("script: {script}\n"));
        }
    }
    s.push_str("[End Npcs]\n\n");

    s.push_str("[Scripts]\n");
    let mut script_ids: Vec<u32> = area.scripts.keys().copied().collect();
    script_ids.sort_unstable();
    for (i, id) in script_ids.iter().enumerate() {
        let sc = &area.scripts[id];
        if i > 0 {
            s.push('\n');
        }
        s.push_str(&format!("id: {}\n", sc.id));
        s.push_str(&format!("name: {}\n", escape(&sc.name)));
        for step in &sc.steps {
            match step {
                ScriptStep::Say(t) => s.push_str(&format!("step: say {}\n", escape(t))),
                ScriptStep::Emote(t) => s.push_str(&format!("step: emote {}\n", escape(t))),
                ScriptStep::Wait(t) => s.push_str(&format!("step: wait {t}\n")),
            }
        }
    }
    s.push_str("[End Scripts]\n");

    s
}

fn fmt_exit(d: Direction, ex: &Exit) -> String {
    let mut s = format!("{} | {}", d.as_str(), ex.to);
    if let Some(l) = ex.linked {
        s.push_str(&format!(" | linked={}", l.as_str()));
    }
    if ex.openable {
        s.push_str(" | openable");
    }
    if ex.closed {
        s.push_str(" | closed");
    }
    if ex.locked {
        s.push_str(" | locked");
    }
    if let Some(k) = &ex.key {
        s.push_str(&format!(" | key={k}"));
    }
    s
}

fn fmt_spawn(sp: &Spawn) -> String {
    let kind = match sp.kind {
        SpawnKind::Item => "item",
        SpawnKind::Npc => "npc",
    };
    let mut s = format!("{kind} | {} | count={}", sp.proto, sp.count);
    if let Some(inside) = &sp.inside {
        s.push_str(&format!(" | inside={inside}"));
    }
    s
}

// ---- import ----

/// One key/value record; values keep their raw text.
type Record = Vec<(usize, String, String)>;

fn split_records(
    blob: &str,
) -> Result<HashMap<String, Vec<Record>>, AreaFileError> {
    let mut sections: HashMap<String, Vec<Record>> = HashMap::new();
    let mut current: Option<String> = None;
    let mut record: Record = Vec::new();

    for (i, raw) in blob.lines().enumerate() {
        let lineno = i + 1;
        let line = raw.trim_end();
        if let Some(name) = line.strip_prefix("[End ") {
            let name = name.trim_end_matches(']');
            match current.take() {
                Some(open) if open == name => {
                    if !record.is_empty() {
                        sections.entry(open).or_default().push(std::mem::take(&mut record));
                    }
                }
                Some(open) => return Err(err(lineno, format!("[End {name}] closes [{open}]"))),
                None => return Err(err(lineno, "end tag outside any section")),
            }
            continue;
        }
        if let Some(name) = line.strip_prefix('[') {
            if current.is_some() {
                return Err(err(lineno, "section opened inside another section"));
            }
            let name = name.trim_end_matches(']').to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let Some(section) = current.as_ref() else {
            if line.trim().is_empty() {
                continue;
            }
            return Err(err(lineno, "content outside any section"));
        };

        if line.trim().is_empty() {
            if !record.is_empty() {
                sections
                    .entry(section.clone())
                    .or_default()
                    .push(std::mem::take(&mut record));
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            return Err(err(lineno, format!("expected 'key: value', got {line:?}")));
        };
        record.push((lineno, key.trim().to_string(), value.trim().to_string()));
    }

    if let Some(open) = current {
        return Err(err(blob.lines().count(), format!("[{open}] never closed")));
    }
    Ok(sections)
}

fn rec_get<'a>(rec: &'a Record, key: &str) -> Option<&'a str> {
    rec.iter()
        .find(|(_, k, _)| k == key)
        .map(|(_, _, v)| v.as_str())
}

fn rec_id(rec: &Record) -> Result<u32, AreaFileError> {
    let lineno = rec.first().map(|(l, _, _)| *l).unwrap_or(0);
    rec_get(rec, "id")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| err(lineno, "record is missing a numeric id"))
}

pub fn import_area(blob: &str) -> Result<Area, AreaFileError> {
    let sections = split_records(blob)?;

    let area_rec = sections
        .get("Area")
        .and_then(|rs| rs.first())
        .ok_or_else(|| err(1, "no [Area] section"))?;
    let name = rec_get(area_rec, "name")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| err(1, "[Area] has no name"))?
        .to_string();

    let mut area = Area::new(&name);
    if let Some(builders) = rec_get(area_rec, "builders") {
        area.builders = builders.split_whitespace().map(|s| s.to_string()).collect();
    }
    if let Some(ri) = rec_get(area_rec, "reset_interval") {
        area.reset_interval_s = ri
            .parse()
            .map_err(|_| err(1, "reset_interval is not a number"))?;
    }

    for rec in sections.get("Rooms").map(|v| v.as_slice()).unwrap_or(&[]) {
        let id = rec_id(rec)?;
        let mut room = Room::new(&name, id, "somewhere");
        for (lineno, key, value) in rec {
            match key.as_str() {
                "id" => {}
                "name" => room.name = unescape(value),
                "desc" => room.desc = unescape(value),
                "exit" => {
                    let (d, ex) = parse_exit(*lineno, value)?;
                    room.exits[d.idx()] = Some(ex);
                }
                "spawn" => room.spawns.push(parse_spawn(*lineno, value)?),
                _ => return Err(err(*lineno, format!("unknown room key {key:?}"))),
            }
        }
        area.note_id(id);
        area.rooms.insert(id, room);
    }

    for rec in sections.get("Items").map(|v| v.as_slice()).unwrap_or(&[]) {
        let id = rec_id(rec)?;
        let mut p = crate::item::ItemProto {
            id,
            area: name.clone(),
            name: String::new(),
            keywords: Vec::new(),
            desc: String::new(),
            facets: Default::default(),
        };
        for (lineno, key, value) in rec {
            match key.as_str() {
                "id" => {}
                "name" => p.name = unescape(value),
                "keywords" => {
                    p.keywords = value.split_whitespace().map(|s| s.to_string()).collect()
                }
                "desc" => p.desc = unescape(value),
                "equippable" => {
                    let kv = parse_kv(value);
                    p.facets.equippable = Some(Equippable {
                        slot: kv
                            .get("slot")
                            .and_then(|v| Slot::parse(v))
                            .ok_or_else(|| err(*lineno, "equippable needs a slot"))?,
                        hit: kv.get("hit").and_then(|v| v.parse().ok()).unwrap_or(0),
                        evade: kv.get("evade").and_then(|v| v.parse().ok()).unwrap_or(0),
                        damage: Vec::new(),
                        absorb: Vec::new(),
                    });
                }
                "damage" => {
                    let d = parse_damage_line(*lineno, value)?;
                    p.facets
                        .equippable
                        .as_mut()
                        .ok_or_else(|| err(*lineno, "damage before equippable"))?
                        .damage
                        .push(d);
                }
                "absorb" => {
                    let a = parse_absorb_line(*lineno, value)?;
                    p.facets
                        .equippable
                        .as_mut()
                        .ok_or_else(|| err(*lineno, "absorb before equippable"))?
                        .absorb
                        .push(a);
                }
                "food" => {
                    let kv = parse_kv(value);
                    p.facets.food = Some(Food {
                        heal: kv.get("heal").and_then(|v| v.parse().ok()).unwrap_or(0),
                        mana: kv.get("mana").and_then(|v| v.parse().ok()).unwrap_or(0),
                    });
                }
                "container" => {
                    let kv = parse_kv(value);
                    p.facets.container = Some(Container {
                        capacity: kv
                            .get("capacity")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(1),
                    });
                }
                "furniture" => {
                    let kv = parse_kv(value);
                    p.facets.furniture = Some(Furniture {
                        seats: kv.get("seats").and_then(|v| v.parse().ok()).unwrap_or(1),
                    });
                }
                "portal" => {
                    p.facets.portal = Some(Portal {
                        to: RoomRef::parse(value)
                            .ok_or_else(|| err(*lineno, "portal needs area:room"))?,
                    });
                }
                _ => return Err(err(*lineno, format!("unknown item key {key:?}"))),
            }
        }
        area.note_id(id);
        area.item_protos.insert(id, p);
    }

    for rec in sections.get("Npcs").map(|v| v.as_slice()).unwrap_or(&[]) {
        let id = rec_id(rec)?;
        let mut p = NpcProto {
            id,
            area: name.clone(),
            name: String::new(),
            keywords: Vec::new(),
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
        };
        for (lineno, key, value) in rec {
            match key.as_str() {
                "id" => {}
                "name" => p.name = unescape(value),
                "keywords" => {
                    p.keywords = value.split_whitespace().map(|s| s.to_string()).collect()
                }
                "desc" => p.desc = unescape(value),
                "hp" => p.max_hp = num(*lineno, value)?,
                "mp" => p.max_mp = num(*lineno, value)?,
                "attrs" => {
                    let nums: Vec<i32> =
                        value.split_whitespace().filter_map(|t| t.parse().ok()).collect();
                    if nums.len() != 4 {
                        return Err(err(*lineno, "attrs needs four numbers"));
                    }
                    p.attrs = Attrs {
                        strength: nums[0],
                        intellect: nums[1],
                        dexterity: nums[2],
                        speed: nums[3],
                    };
                }
                "hit" => p.hit = num(*lineno, value)?,
                "evade" => p.evade = num(*lineno, value)?,
                "damage" => p.damage.push(parse_damage_line(*lineno, value)?),
                "absorb" => p.absorb.push(parse_absorb_line(*lineno, value)?),
                "wander" => p.wander = value == "true",
                "script" => {
                    p.script =
                        Some(value.parse().map_err(|_| err(*lineno, "script id not a number"))?)
                }
                _ => return Err(err(*lineno, format!("unknown npc key {key:?}"))),
            }
        }
        area.note_id(id);
        area.npc_protos.insert(id, p);
    }

    for rec in sections.get("Scripts").map(|v| v.as_slice()).unwrap_or(&[]) {
        let id = rec_id(rec)?;
        let mut sc = Script {
            id,
            area: name.clone(),
            name: String::new(),
            steps: Vec::new(),
        };
        for (lineno, key, value) in rec {
            match key.as_str() {
                "id" => {}
                "name" => sc.name = unescape(value),
                "step" => {
                    let (kind, rest) = value
                        .split_once(' ')
                        .map(|(k, r)| (k, r.to_string()))
                        .unwrap_or((value.as_str(), String::new()));
                    let step = match kind {
                        "say" => ScriptStep::Say(unescape(&rest)),
                        "emote" => ScriptStep::Emote(unescape(&rest)),
                        "wait" => ScriptStep::Wait(
                            rest.trim()
                                .parse()
                                .map_err(|_| err(*lineno, "wait needs a tick count"))?,
                        ),
                        _ => return Err(err(*lineno, format!("unknown step kind {kind:?}"))),
                    };
                    sc.steps.push(step);
                }
                _ => return Err(err(*lineno, format!("unknown script key {key:?}"))),
            }
        }
        area.note_id(id);
        area.scripts.insert(id, sc);
    }

    Ok(area)
}

fn num(lineno: usize, v: &str) -> Result<i32, AreaFileError> {
    v.trim().parse().map_err(|_| err(lineno, "expected a number"))
}

fn parse_kv(v: &str) -> HashMap<String, String> {
    v.split_whitespace()
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_damage_line(lineno: usize, v: &str) -> Result<DamageEntry, AreaFileError> {
    let parts: Vec<&str> = v.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(err(lineno, "damage: <type> <min> <max>"));
    }
    Ok(DamageEntry {
        kind: DamageType::parse(parts[0]).ok_or_else(|| err(lineno, "unknown damage type"))?,
        min: num(lineno, parts[1])?,
        max: num(lineno, parts[2])?,
    })
}

fn parse_absorb_line(lineno: usize, v: &str) -> Result<Absorb, AreaFileError> {
    let parts: Vec<&str> = v.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(err(lineno, "absorb: <type> <amount>"));
    }
    Ok(Absorb {
        kind: DamageType::parse(parts[0]).ok_or_else(|| err(lineno, "unknown damage type"))?,
        amount: num(lineno, parts[1])?,
    })
}

fn parse_exit(lineno: usize, v: &str) -> Result<(Direction, Exit), AreaFileError> {
    let mut fields = v.split('|').map(str::trim);
    let dir = fields
        .next()
        .and_then(Direction::parse)
        .ok_or_else(|| err(lineno, "exit needs a direction"))?;
    let to = fields
        .next()
        .and_then(RoomRef::parse)
        .ok_or_else(|| err(lineno, "exit needs a target area:room"))?;
    let mut ex = Exit::open_to(to);
    for field in fields {
        if let Some(l) = field.strip_prefix("linked=") {
            ex.linked =
                Some(Direction::parse(l).ok_or_else(|| err(lineno, "bad linked direction"))?);
        } else if field == "openable" {
            ex.openable = true;
        } else if field == "closed" {
            ex.closed = true;
        } else if field == "locked" {
            ex.locked = true;
        } else if let Some(k) = field.strip_prefix("key=") {
            ex.key = Some(ProtoRef::parse(k).ok_or_else(|| err(lineno, "bad key reference"))?);
        } else {
            return Err(err(lineno, format!("unknown exit field {field:?}")));
        }
    }
    Ok((dir, ex))
}

fn parse_spawn(lineno: usize, v: &str) -> Result<Spawn, AreaFileError> {
    let mut fields = v.split('|').map(str::trim);
    let kind = match fields.next() {
        Some("item") => SpawnKind::Item,
        Some("npc") => SpawnKind::Npc,
        _ => return Err(err(lineno, "spawn kind must be item or npc")),
    };
    let proto = fields
        .next()
        .and_then(ProtoRef::parse)
        .ok_or_else(|| err(lineno, "spawn needs a prototype area:id"))?;
    let mut spawn = Spawn {
        kind,
        proto,
        count: 1,
        inside: None,
    };
    for field in fields {
        if let Some(c) = field.strip_prefix("count=") {
            spawn.count = c.parse().map_err(|_| err(lineno, "bad spawn count"))?;
        } else if let Some(i) = field.strip_prefix("inside=") {
            spawn.inside =
                Some(ProtoRef::parse(i).ok_or_else(|| err(lineno, "bad inside reference"))?);
        } else {
            return Err(err(lineno, format!("unknown spawn field {field:?}")));
        }
    }
    Ok(spawn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn escapes_round_trip() {
        let s = "line one\nline two \\ backslash";
        assert_eq!(unescape(&escape(s)), s);
    }

    #[test]
    fn exported_area_imports_identically() {
        let world = testutil::test_world();
        let area = world.areas.get("haven").unwrap();
        let blob = export_area(area);
        let back = import_area(&blob).expect("clean import");

        assert_eq!(back.name, area.name);
        assert_eq!(back.reset_interval_s, area.reset_interval_s);
        assert_eq!(back.builders, area.builders);
        assert_eq!(back.rooms.len(), area.rooms.len());
        assert_eq!(back.item_protos.len(), area.item_protos.len());
        assert_eq!(back.npc_protos.len(), area.npc_protos.len());
        assert_eq!(back.scripts.len(), area.scripts.len());

        // And a second export is byte-identical: nothing drifts.
        assert_eq!(export_area(&back), blob);
    }

    #[test]
    fn multi_line_descriptions_survive() {
        let world = testutil::test_world();
        let mut blob = export_area(world.areas.get("haven").unwrap());
        blob = blob.replace(
            "name: The Hall",
            "name: The Hall\ndesc: soot on stone\\nash in the air",
        );
        let back = import_area(&blob).unwrap();
        assert_eq!(back.rooms.get(&1).unwrap().desc, "soot on stone\nash in the air");
    }

    #[test]
    fn import_rejects_malformed_blobs() {
        assert!(import_area("").is_err());
        assert!(import_area("[Area]\nname: x\n").is_err(), "unclosed section");
        assert!(
            import_area("[Area]\nname: x\n[End Area]\n[Rooms]\nid: 1\nbogus-line\n[End Rooms]\n")
                .is_err()
        );
        let misnested = "[Area]\nname: x\n[End Rooms]\n";
        assert!(import_area(misnested).is_err());
    }

    #[test]
    fn spawns_and_exits_carry_their_flags() {
        let blob = "\
[Area]
name: t
builders:
reset_interval: 60
[End Area]

[Rooms]
id: 1
name: one
exit: north | t:2 | linked=south | openable | closed | key=t:9
spawn: item | t:9 | count=3 | inside=t:8

id: 2
name: two
[End Rooms]
";
        let area = import_area(blob).unwrap();
        let room = area.rooms.get(&1).unwrap();
        let ex = room.exit(Direction::North).unwrap();
        assert_eq!(ex.linked, Some(Direction::South));
        assert!(ex.openable && ex.closed && !ex.locked);
        assert_eq!(ex.key.as_ref().unwrap().id, 9);
        let sp = &room.spawns[0];
        assert_eq!(sp.count, 3);
        assert_eq!(sp.inside.as_ref().unwrap().id, 8);
    }
}
