//! Mapping between live models and store rows.
//!
//! Identity convention: players key on `name_lc`, area-owned objects on
//! their (`area`, `id`) pair. Rows are upserted (select by identity,
//! update in place, insert otherwise) so the opaque storage id stays
//! stable for the life of an object. Structured fields (exits, spawns,
//! facets, inventories) travel as embedded JSON values.

use std::collections::HashMap;

use emberstore::{Row, RowId, Store, StoreError};
use serde_json::{json, Value};

use crate::area::{Area, Exit, Room, RoomRef, Spawn};
use crate::character::{Attrs, Gender};
use crate::item::{Facets, ItemInst, ItemProto, Slot};
use crate::npc::{NpcProto, Script, ScriptStep};
use crate::session::{Session, SessionId};
use crate::world::{now_unix, World};

pub const T_PLAYERS: &str = "players";
pub const T_AREAS: &str = "areas";
pub const T_ROOMS: &str = "rooms";
pub const T_ITEM_PROTOS: &str = "item_protos";
pub const T_NPC_PROTOS: &str = "npc_protos";
pub const T_SCRIPTS: &str = "scripts";

fn get_str(row: &Row, key: &str) -> String {
    row.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn get_i64(row: &Row, key: &str) -> i64 {
    row.get(key).and_then(|v| v.as_i64()).unwrap_or_default()
}

fn get_bool(row: &Row, key: &str) -> bool {
    row.get(key).and_then(|v| v.as_bool()).unwrap_or_default()
}

fn get_json<T: serde::de::DeserializeOwned>(row: &Row, key: &str) -> Option<T> {
    row.get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

fn upsert(store: &dyn Store, table: &str, criteria: emberstore::Criteria, row: Row) -> Result<RowId, StoreError> {
    match store.select(table, criteria)?.into_iter().next() {
        Some((id, _)) => {
            store.update(table, id, row)?;
            Ok(id)
        }
        None => store.insert(table, row),
    }
}

// ---- players ----

pub fn find_player_row(store: &dyn Store, name: &str) -> Result<Option<(RowId, Row)>, StoreError> {
    let name_lc = name.trim().to_ascii_lowercase();
    Ok(store
        .select(T_PLAYERS, &[("name_lc", json!(name_lc))])?
        .into_iter()
        .next())
}

/// The mutable slice of a player row; auth fields are preserved separately.
fn player_fields(sess: &Session) -> Row {
    let ch = &sess.ch;
    emberstore::row! {
        "name" => ch.name.clone(),
        "name_lc" => ch.name.to_ascii_lowercase(),
        "gender" => ch.gender.as_str(),
        "perms" => sess.perms,
        "chat_on" => sess.channels.chat,
        "hp" => ch.hp,
        "max_hp" => ch.max_hp,
        "mp" => ch.mp,
        "max_mp" => ch.max_mp,
        "attrs" => serde_json::to_value(ch.attrs).unwrap_or(Value::Null),
        "hit" => ch.hit,
        "evade" => ch.evade,
        "location_area" => sess.location.area.clone(),
        "location_room" => sess.location.room,
        "inventory" => serde_json::to_value(&ch.inventory).unwrap_or(Value::Null),
        "equipped" => serde_json::to_value(&ch.equipped).unwrap_or(Value::Null),
        "last_seen_unix" => now_unix(),
    }
}

/// Upsert a player, preserving row-only fields (password hash, email
/// opt-in, creation time) across saves.
pub fn save_player(store: &dyn Store, sess: &Session) -> Result<RowId, StoreError> {
    let mut row = player_fields(sess);
    let existing = find_player_row(store, &sess.ch.name)?;
    match existing {
        Some((id, old)) => {
            for key in ["pw_hash", "email_optin", "created_unix"] {
                if let Some(v) = old.get(key) {
                    row.insert(key.to_string(), v.clone());
                }
            }
            store.update(T_PLAYERS, id, row)?;
            Ok(id)
        }
        None => store.insert(T_PLAYERS, row),
    }
}

/// First save of a brand-new character; `extra` carries the row-only
/// fields gathered during creation.
pub fn insert_player(
    world: &World,
    sid: SessionId,
    extra: &[(&str, Value)],
) -> Result<RowId, StoreError> {
    let Some(sess) = world.sessions.get(&sid) else {
        return Err(StoreError::Corrupt {
            table: T_PLAYERS.to_string(),
            detail: "no such session".to_string(),
        });
    };
    let mut row = player_fields(sess);
    row.insert("created_unix".to_string(), json!(now_unix()));
    for (k, v) in extra {
        row.insert(k.to_string(), v.clone());
    }
    upsert(
        world.store.as_ref(),
        T_PLAYERS,
        &[("name_lc", json!(sess.ch.name.to_ascii_lowercase()))],
        row,
    )
}

pub fn apply_player_row(sess: &mut Session, row_id: RowId, row: &Row) {
    sess.ch.name = get_str(row, "name");
    sess.ch.gender = Gender::parse(&get_str(row, "gender")).unwrap_or(Gender::Neutral);
    sess.perms = get_i64(row, "perms") as u32;
    sess.channels.chat = get_bool(row, "chat_on");
    sess.ch.hp = get_i64(row, "hp") as i32;
    sess.ch.max_hp = get_i64(row, "max_hp") as i32;
    sess.ch.mp = get_i64(row, "mp") as i32;
    sess.ch.max_mp = get_i64(row, "max_mp") as i32;
    if let Some(attrs) = get_json::<Attrs>(row, "attrs") {
        sess.ch.attrs = attrs;
    }
    sess.ch.hit = get_i64(row, "hit") as i32;
    sess.ch.evade = get_i64(row, "evade") as i32;
    sess.location = RoomRef {
        area: get_str(row, "location_area"),
        room: get_i64(row, "location_room") as u32,
    };
    sess.ch.inventory = get_json::<Vec<ItemInst>>(row, "inventory").unwrap_or_default();
    sess.ch.equipped = get_json::<HashMap<Slot, ItemInst>>(row, "equipped").unwrap_or_default();
    sess.row_id = Some(row_id);
}

pub fn update_password(store: &dyn Store, name: &str, hash: &str) -> Result<(), StoreError> {
    let Some((id, mut row)) = find_player_row(store, name)? else {
        return Err(StoreError::Corrupt {
            table: T_PLAYERS.to_string(),
            detail: format!("no player row for {name}"),
        });
    };
    row.insert("pw_hash".to_string(), json!(hash));
    store.update(T_PLAYERS, id, row)?;
    Ok(())
}

// ---- areas ----

fn area_row(area: &Area) -> Row {
    let mut builders: Vec<&str> = area.builders.iter().map(|s| s.as_str()).collect();
    builders.sort_unstable();
    emberstore::row! {
        "name" => area.name.clone(),
        "builders" => builders,
        "next_id" => area.next_id,
        "reset_interval_s" => area.reset_interval_s,
    }
}

fn room_row(room: &Room) -> Row {
    emberstore::row! {
        "area" => room.area.clone(),
        "id" => room.id,
        "name" => room.name.clone(),
        "desc" => room.desc.clone(),
        "exits" => serde_json::to_value(&room.exits).unwrap_or(Value::Null),
        "spawns" => serde_json::to_value(&room.spawns).unwrap_or(Value::Null),
    }
}

fn item_proto_row(p: &ItemProto) -> Row {
    emberstore::row! {
        "area" => p.area.clone(),
        "id" => p.id,
        "name" => p.name.clone(),
        "keywords" => p.keywords.clone(),
        "desc" => p.desc.clone(),
        "facets" => serde_json::to_value(&p.facets).unwrap_or(Value::Null),
    }
}

fn npc_proto_row(p: &NpcProto) -> Row {
    emberstore::row! {
        "area" => p.area.clone(),
        "id" => p.id,
        "name" => p.name.clone(),
        "keywords" => p.keywords.clone(),
        "desc" => p.desc.clone(),
        "max_hp" => p.max_hp,
        "max_mp" => p.max_mp,
        "attrs" => serde_json::to_value(p.attrs).unwrap_or(Value::Null),
        "hit" => p.hit,
        "evade" => p.evade,
        "damage" => serde_json::to_value(&p.damage).unwrap_or(Value::Null),
        "absorb" => serde_json::to_value(&p.absorb).unwrap_or(Value::Null),
        "wander" => p.wander,
        "script" => p.script,
    }
}

fn script_row(s: &Script) -> Row {
    emberstore::row! {
        "area" => s.area.clone(),
        "id" => s.id,
        "name" => s.name.clone(),
        "steps" => serde_json::to_value(&s.steps).unwrap_or(Value::Null),
    }
}

/// Write one area and everything it owns, deleting rows for objects the
/// area no longer has (destroy must stick).
pub fn save_area(store: &dyn Store, area: &Area) -> Result<(), StoreError> {
    upsert(store, T_AREAS, &[("name", json!(area.name))], area_row(area))?;

    let by_area: &[(&str, Value)] = &[("area", json!(area.name))];
    for (table, live_ids) in [
        (T_ROOMS, area.rooms.keys().copied().collect::<Vec<u32>>()),
        (T_ITEM_PROTOS, area.item_protos.keys().copied().collect()),
        (T_NPC_PROTOS, area.npc_protos.keys().copied().collect()),
        (T_SCRIPTS, area.scripts.keys().copied().collect()),
    ] {
        for (_, row) in store.select(table, by_area)? {
            let id = get_i64(&row, "id") as u32;
            if !live_ids.contains(&id) {
                // Identity tuple, not storage id, names the doomed row.
                store.delete(table, &[("area", json!(area.name)), ("id", json!(id))])?;
            }
        }
    }

    for room in area.rooms.values() {
        upsert(
            store,
            T_ROOMS,
            &[("area", json!(area.name)), ("id", json!(room.id))],
            room_row(room),
        )?;
    }
    for p in area.item_protos.values() {
        upsert(
            store,
            T_ITEM_PROTOS,
            &[("area", json!(area.name)), ("id", json!(p.id))],
            item_proto_row(p),
        )?;
    }
    for p in area.npc_protos.values() {
        upsert(
            store,
            T_NPC_PROTOS,
            &[("area", json!(area.name)), ("id", json!(p.id))],
            npc_proto_row(p),
        )?;
    }
    for s in area.scripts.values() {
        upsert(
            store,
            T_SCRIPTS,
            &[("area", json!(area.name)), ("id", json!(s.id))],
            script_row(s),
        )?;
    }
    Ok(())
}

pub fn load_areas(store: &dyn Store) -> Result<HashMap<String, Area>, StoreError> {
    let mut areas = HashMap::new();

    for (_, row) in store.select(T_AREAS, &[])? {
        let name = get_str(&row, "name");
        if name.is_empty() {
            continue;
        }
        let mut area = Area::new(&name);
        area.builders = get_json::<Vec<String>>(&row, "builders")
            .unwrap_or_default()
            .into_iter()
            .collect();
        area.next_id = get_i64(&row, "next_id") as u32;
        area.reset_interval_s = get_i64(&row, "reset_interval_s") as u64;
        areas.insert(name, area);
    }

    for (_, row) in store.select(T_ROOMS, &[])? {
        let area_name = get_str(&row, "area");
        let Some(area) = areas.get_mut(&area_name) else {
            tracing::error!(area = %area_name, "room row for unknown area; skipped");
            continue;
        };
        let id = get_i64(&row, "id") as u32;
        let mut room = Room::new(&area_name, id, &get_str(&row, "name"));
        room.desc = get_str(&row, "desc");
        room.exits = get_json::<[Option<Exit>; 6]>(&row, "exits").unwrap_or_default();
        room.spawns = get_json::<Vec<Spawn>>(&row, "spawns").unwrap_or_default();
        area.note_id(id);
        area.rooms.insert(id, room);
    }

    for (_, row) in store.select(T_ITEM_PROTOS, &[])? {
        let area_name = get_str(&row, "area");
        let Some(area) = areas.get_mut(&area_name) else {
            tracing::error!(area = %area_name, "item row for unknown area; skipped");
            continue;
        };
        let id = get_i64(&row, "id") as u32;
        area.note_id(id);
        area.item_protos.insert(
            id,
            ItemProto {
                id,
                area: area_name.clone(),
                name: get_str(&row, "name"),
                keywords: get_json(&row, "keywords").unwrap_or_default(),
                desc: get_str(&row, "desc"),
                facets: get_json::<Facets>(&row, "facets").unwrap_or_default(),
            },
        );
    }

    for (_, row) in store.select(T_NPC_PROTOS, &[])? {
        let area_name = get_str(&row, "area");
        let Some(area) = areas.get_mut(&area_name) else {
            tracing::error!(area = %area_name, "npc row for unknown area; skipped");
            continue;
        };
        let id = get_i64(&row, "id") as u32;
        area.note_id(id);
        area.npc_protos.insert(
            id,
            NpcProto {
                id,
                area: area_name.clone(),
                name: get_str(&row, "name"),
                keywords: get_json(&row, "keywords").unwrap_or_default(),
                desc: get_str(&row, "desc"),
                max_hp: get_i64(&row, "max_hp") as i32,
                max_mp: get_i64(&row, "max_mp") as i32,
                attrs: get_json(&row, "attrs").unwrap_or_default(),
                hit: get_i64(&row, "hit") as i32,
                evade: get_i64(&row, "evade") as i32,
                damage: get_json(&row, "damage").unwrap_or_default(),
                absorb: get_json(&row, "absorb").unwrap_or_default(),
                wander: get_bool(&row, "wander"),
                script: row.get("script").and_then(|v| v.as_u64()).map(|v| v as u32),
            },
        );
    }

    for (_, row) in store.select(T_SCRIPTS, &[])? {
        let area_name = get_str(&row, "area");
        let Some(area) = areas.get_mut(&area_name) else {
            tracing::error!(area = %area_name, "script row for unknown area; skipped");
            continue;
        };
        let id = get_i64(&row, "id") as u32;
        area.note_id(id);
        area.scripts.insert(
            id,
            Script {
                id,
                area: area_name.clone(),
                name: get_str(&row, "name"),
                steps: get_json::<Vec<ScriptStep>>(&row, "steps").unwrap_or_default(),
            },
        );
    }

    Ok(areas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use emberstore::MemStore;

    #[test]
    fn area_round_trips_through_rows() {
        let world = testutil::test_world();
        let store = MemStore::new();
        let area = world.areas.get("haven").unwrap();
        save_area(&store, area).unwrap();

        let loaded = load_areas(&store).unwrap();
        let back = loaded.get("haven").expect("area back");
        assert_eq!(back.rooms.len(), area.rooms.len());
        assert_eq!(back.item_protos.len(), area.item_protos.len());
        assert_eq!(back.npc_protos.len(), area.npc_protos.len());
        assert_eq!(back.scripts.len(), area.scripts.len());
        assert_eq!(back.next_id, area.next_id);

        let room = back.rooms.get(&1).unwrap();
        assert!(room.exit(crate::area::Direction::North).is_some());
        let rat = back.npc_protos.get(&4).unwrap();
        assert_eq!(rat.max_hp, 12);
    }

    #[test]
    fn destroyed_objects_disappear_from_the_store() {
        let mut world = testutil::test_world();
        {
            let area = world.areas.get("haven").unwrap();
            save_area(world.store.as_ref(), area).unwrap();
        }
        world.areas.get_mut("haven").unwrap().item_protos.remove(&1);
        {
            let area = world.areas.get("haven").unwrap();
            save_area(world.store.as_ref(), area).unwrap();
        }
        let loaded = load_areas(world.store.as_ref()).unwrap();
        assert!(!loaded.get("haven").unwrap().item_protos.contains_key(&1));
    }

    #[test]
    fn areas_survive_a_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = emberstore::JsonStore::open(dir.path().join("store")).unwrap();
        let world = testutil::test_world();
        save_area(&store, world.areas.get("haven").unwrap()).unwrap();

        // A fresh handle reads the same world back off disk.
        let store = emberstore::JsonStore::open(dir.path().join("store")).unwrap();
        let loaded = load_areas(&store).unwrap();
        assert_eq!(loaded.get("haven").unwrap().rooms.len(), 3);
    }

    #[test]
    fn player_save_preserves_row_only_fields() {
        let mut world = testutil::test_world();
        testutil::seed_player_row(&mut world, "Bob", "swordfish");
        let (id, before) = find_player_row(world.store.as_ref(), "Bob").unwrap().unwrap();
        let hash_before = get_str(&before, "pw_hash");
        assert!(!hash_before.is_empty());

        let sid = testutil::spawn_player(&mut world, "Bob");
        world.sessions.get_mut(&sid).unwrap().ch.hp = 7;
        let sess = world.sessions.get(&sid).unwrap();
        let saved_id = save_player(world.store.as_ref(), sess).unwrap();
        assert_eq!(saved_id, id);

        let (_, after) = find_player_row(world.store.as_ref(), "Bob").unwrap().unwrap();
        assert_eq!(get_i64(&after, "hp"), 7);
        assert_eq!(get_str(&after, "pw_hash"), hash_before, "hash survives a save");
    }
}
