//! The player-facing command tables: always-available, normal play, and
//! the restricted battle set. Builder commands live in `build.rs`.

use crate::area::Direction;
use crate::battle::{BattleAction, CombatantId};
use crate::dispatch::CmdSpec;
use crate::item::Slot;
use crate::mode::{Mode, Password};
use crate::persist;
use crate::session::{SessionId, PERM_BUILD, PERM_PLAY};
use crate::world::World;

pub const ALWAYS: &[CmdSpec] = &[
    CmdSpec {
        names: &["quit"],
        perms: 0,
        handler: cmd_quit,
    },
    CmdSpec {
        names: &["help", "?"],
        perms: 0,
        handler: cmd_help,
    },
    CmdSpec {
        names: &["who"],
        perms: 0,
        handler: cmd_who,
    },
    CmdSpec {
        names: &["save"],
        perms: PERM_PLAY,
        handler: cmd_save,
    },
    CmdSpec {
        names: &["score", "stats"],
        perms: PERM_PLAY,
        handler: cmd_score,
    },
];

pub const NORMAL: &[CmdSpec] = &[
    CmdSpec {
        names: &["look", "l"],
        perms: PERM_PLAY,
        handler: cmd_look,
    },
    CmdSpec {
        names: &[
            "go", "north", "n", "east", "e", "south", "s", "west", "w", "up", "u", "down", "d",
        ],
        perms: PERM_PLAY,
        handler: cmd_go,
    },
    CmdSpec {
        names: &["say", "'"],
        perms: PERM_PLAY,
        handler: cmd_say,
    },
    CmdSpec {
        names: &["emote", "em", "me"],
        perms: PERM_PLAY,
        handler: cmd_emote,
    },
    CmdSpec {
        names: &["shout"],
        perms: PERM_PLAY,
        handler: cmd_shout,
    },
    CmdSpec {
        names: &["tell", "whisper"],
        perms: PERM_PLAY,
        handler: cmd_tell,
    },
    CmdSpec {
        names: &["chat"],
        perms: PERM_PLAY,
        handler: cmd_chat,
    },
    CmdSpec {
        names: &["inventory", "inv", "i"],
        perms: PERM_PLAY,
        handler: cmd_inventory,
    },
    CmdSpec {
        names: &["equipment", "eq"],
        perms: PERM_PLAY,
        handler: cmd_equipment,
    },
    CmdSpec {
        names: &["get", "take"],
        perms: PERM_PLAY,
        handler: cmd_get,
    },
    CmdSpec {
        names: &["drop"],
        perms: PERM_PLAY,
        handler: cmd_drop,
    },
    CmdSpec {
        names: &["put"],
        perms: PERM_PLAY,
        handler: cmd_put,
    },
    CmdSpec {
        names: &["equip", "wear", "wield"],
        perms: PERM_PLAY,
        handler: cmd_equip,
    },
    CmdSpec {
        names: &["remove", "unequip"],
        perms: PERM_PLAY,
        handler: cmd_remove,
    },
    CmdSpec {
        names: &["eat"],
        perms: PERM_PLAY,
        handler: cmd_eat,
    },
    CmdSpec {
        names: &["enter"],
        perms: PERM_PLAY,
        handler: cmd_enter,
    },
    CmdSpec {
        names: &["sit"],
        perms: PERM_PLAY,
        handler: cmd_sit,
    },
    CmdSpec {
        names: &["open"],
        perms: PERM_PLAY,
        handler: cmd_door,
    },
    CmdSpec {
        names: &["close"],
        perms: PERM_PLAY,
        handler: cmd_door,
    },
    CmdSpec {
        names: &["lock"],
        perms: PERM_PLAY,
        handler: cmd_door,
    },
    CmdSpec {
        names: &["unlock"],
        perms: PERM_PLAY,
        handler: cmd_door,
    },
    CmdSpec {
        names: &["kill", "attack", "k"],
        perms: PERM_PLAY,
        handler: cmd_kill,
    },
    CmdSpec {
        names: &["password", "passwd"],
        perms: PERM_PLAY,
        handler: cmd_password,
    },
    CmdSpec {
        names: &["build"],
        perms: PERM_BUILD,
        handler: cmd_build,
    },
    CmdSpec {
        names: &["areas"],
        perms: PERM_PLAY,
        handler: cmd_areas,
    },
];

pub const BATTLE: &[CmdSpec] = &[
    CmdSpec {
        names: &["flee"],
        perms: PERM_PLAY,
        handler: cmd_flee,
    },
    CmdSpec {
        names: &["kill", "attack", "k"],
        perms: PERM_PLAY,
        handler: cmd_kill,
    },
    CmdSpec {
        names: &["look", "l"],
        perms: PERM_PLAY,
        handler: cmd_look,
    },
    CmdSpec {
        names: &["say", "'"],
        perms: PERM_PLAY,
        handler: cmd_say,
    },
];

fn cmd_quit(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    world.push_line(sid, "goodbye.");
    if let Some(sess) = world.sessions.get_mut(&sid) {
        sess.quitting = true;
    }
}

fn cmd_help(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let mut s = String::new();
    s.push_str("commands:\r\n");
    s.push_str(" - look, go <dir> (n/s/e/w/u/d), areas\r\n");
    s.push_str(" - say, emote, shout, tell <who> <msg>, chat [msg]\r\n");
    s.push_str(" - inventory, equipment, get, drop, put <x> in <y>, equip, remove, eat\r\n");
    s.push_str(" - open/close/lock/unlock <dir>, enter <portal>, sit <thing>\r\n");
    s.push_str(" - kill <target>, flee (in battle)\r\n");
    s.push_str(" - who, score, save, password, quit\r\n");
    s.push_str(" - builders: build, then help inside build mode\r\n");
    world.push_line(sid, &s);
}

fn cmd_who(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let mut names: Vec<String> = world
        .sessions
        .values()
        .filter(|s| s.in_play())
        .map(|s| format!(" - {} [{}]", s.ch.name, s.mode.label()))
        .collect();
    names.sort();
    let mut s = format!("adrift in ember: {}\r\n", names.len());
    for n in names {
        s.push_str(&n);
        s.push_str("\r\n");
    }
    world.push_line(sid, &s);
}

fn cmd_save(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let saved = {
        let Some(sess) = world.sessions.get(&sid) else {
            return;
        };
        persist::save_player(world.store.as_ref(), sess)
    };
    match saved {
        Ok(row_id) => {
            if let Some(sess) = world.sessions.get_mut(&sid) {
                sess.row_id = Some(row_id);
            }
            world.push_line(sid, "saved.");
        }
        Err(e) => {
            tracing::error!(err = %e, "player save failed");
            world.push_line(sid, "the scribes are asleep; nothing was saved.");
        }
    }
}

fn cmd_score(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let Some(sess) = world.sessions.get(&sid) else {
        return;
    };
    let ch = &sess.ch;
    let mut s = String::new();
    s.push_str(&format!("{} ({})\r\n", ch.name, ch.gender.as_str()));
    s.push_str(&format!(" - hp: {}/{}  mp: {}/{}\r\n", ch.hp, ch.max_hp, ch.mp, ch.max_mp));
    s.push_str(&format!(
        " - str {} int {} dex {} speed {}\r\n",
        ch.attrs.strength, ch.attrs.intellect, ch.attrs.dexterity, ch.attrs.speed
    ));
    s.push_str(&format!(" - hit {} evade {}\r\n", ch.eff_hit(), ch.eff_evade()));
    if ch.battle.is_some() {
        s.push_str(&format!(" - in battle, action points {:.1}\r\n", ch.action_points));
    }
    world.push_line(sid, &s);
}

fn cmd_look(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    if args.trim().is_empty() {
        let s = world.render_room_for(sid);
        world.push_line(sid, &s);
        return;
    }
    let token = args.trim();
    let desc = {
        let Some(sess) = world.sessions.get(&sid) else {
            return;
        };
        let here = sess.location.clone();
        let mut desc: Option<String> = None;

        if let Some(room) = world.room(&here) {
            if let Some(i) = room.find_item(token) {
                let it = &room.items[i];
                desc = Some(describe_item(&it.name, &it.desc, &it.facets.labels()));
            } else if let Some(npc) = room
                .npcs
                .iter()
                .filter_map(|id| world.npcs.get(id))
                .find(|n| n.matches_token(token))
            {
                desc = Some(format!("{}\r\n{}\r\n", npc.ch.name, npc.desc));
            } else if let Some((name, _)) = room
                .occupants
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(token))
            {
                desc = Some(format!("{name} is here, very much alive.\r\n"));
            }
        }
        if desc.is_none() {
            if let Some(i) = sess.ch.find_inventory(token) {
                let it = &sess.ch.inventory[i];
                desc = Some(describe_item(&it.name, &it.desc, &it.facets.labels()));
            }
        }
        desc
    };
    match desc {
        Some(d) => world.push_line(sid, &d),
        None => world.push_line(sid, "you see nothing like that here."),
    }
}

fn describe_item(name: &str, desc: &str, labels: &[&str]) -> String {
    let mut s = String::new();
    s.push_str(name);
    s.push_str("\r\n");
    if !desc.is_empty() {
        s.push_str(desc);
        s.push_str("\r\n");
    }
    if !labels.is_empty() {
        s.push_str(&format!("[{}]\r\n", labels.join(", ")));
    }
    s
}

fn cmd_go(world: &mut World, sid: SessionId, verb: &str, args: &str) {
    let token = if verb == "go" { args.trim() } else { verb };
    let Some(dir) = Direction::parse(token) else {
        world.push_line(sid, "go where?");
        return;
    };
    world.try_move(sid, dir);
}

fn cmd_say(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let msg = args.trim();
    if msg.is_empty() {
        world.push_line(sid, "say what?");
        return;
    }
    let (name, here) = match world.sessions.get(&sid) {
        Some(s) => (s.ch.name.clone(), s.location.clone()),
        None => return,
    };
    world.push_line(sid, &format!("you say, \"{msg}\""));
    world.room_message(&here, &format!("{name} says, \"{msg}\""), &[sid]);
}

fn cmd_emote(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let msg = args.trim();
    if msg.is_empty() {
        world.push_line(sid, "emote what?");
        return;
    }
    let (name, here) = match world.sessions.get(&sid) {
        Some(s) => (s.ch.name.clone(), s.location.clone()),
        None => return,
    };
    world.room_message(&here, &format!("* {name} {msg}"), &[]);
}

fn cmd_shout(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let msg = args.trim();
    if msg.is_empty() {
        world.push_line(sid, "shout what?");
        return;
    }
    let name = match world.sessions.get(&sid) {
        Some(s) => s.ch.name.clone(),
        None => return,
    };
    world.push_line(sid, &format!("you shout: {msg}"));
    world.broadcast(&format!("{name} shouts: {msg}"), &[sid]);
}

fn cmd_tell(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let mut parts = args.trim().splitn(2, char::is_whitespace);
    let who = parts.next().unwrap_or("").trim();
    let msg = parts.next().unwrap_or("").trim();
    if who.is_empty() || msg.is_empty() {
        world.push_line(sid, "tell whom what?");
        return;
    }
    let name = match world.sessions.get(&sid) {
        Some(s) => s.ch.name.clone(),
        None => return,
    };
    let Some(target) = world.find_session_by_name(who) else {
        world.push_line(sid, "they are not here.");
        return;
    };
    if target == sid {
        world.push_line(sid, "you mutter to yourself.");
        return;
    }
    world.push_line(sid, &format!("you tell {who}: {msg}"));
    world.push_line(target, &format!("{name} tells you: {msg}"));
}

fn cmd_chat(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let msg = args.trim().to_string();
    let (name, was_on) = match world.sessions.get_mut(&sid) {
        Some(s) => (s.ch.name.clone(), s.channels.chat),
        None => return,
    };

    if msg.is_empty() {
        // Bare `chat` toggles the channel.
        let now_on = !was_on;
        if let Some(s) = world.sessions.get_mut(&sid) {
            s.channels.chat = now_on;
        }
        if now_on {
            world.push_line(sid, "Your chat channel has been turned on.");
        } else {
            world.push_line(sid, "Your chat channel has been turned off.");
        }
        return;
    }

    // Chatting with the channel off switches it on first, so the sender
    // hears their own line.
    if !was_on {
        if let Some(s) = world.sessions.get_mut(&sid) {
            s.channels.chat = true;
        }
        world.push_line(sid, "Your chat channel has been turned on.");
    }
    world.chat_broadcast(&format!("[chat] {name}: {msg}"));
}

fn cmd_inventory(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let Some(sess) = world.sessions.get(&sid) else {
        return;
    };
    let mut s = String::from("inventory:\r\n");
    if sess.ch.inventory.is_empty() {
        s.push_str(" - (empty)\r\n");
    }
    for it in &sess.ch.inventory {
        if it.facets.container.is_some() && !it.contents.is_empty() {
            s.push_str(&format!(" - {} ({} inside)\r\n", it.name, it.contents.len()));
        } else {
            s.push_str(&format!(" - {}\r\n", it.name));
        }
    }
    world.push_line(sid, &s);
}

fn cmd_equipment(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let Some(sess) = world.sessions.get(&sid) else {
        return;
    };
    let mut s = String::from("equipment:\r\n");
    for &slot in Slot::all() {
        match sess.ch.equipped.get(&slot) {
            Some(it) => s.push_str(&format!(" - {}: {}\r\n", slot.as_str(), it.name)),
            None => s.push_str(&format!(" - {}: (empty)\r\n", slot.as_str())),
        }
    }
    world.push_line(sid, &s);
}

fn split_from(args: &str, sep: &str) -> (String, Option<String>) {
    let lower = args.to_ascii_lowercase();
    match lower.find(sep) {
        Some(i) => (
            args[..i].trim().to_string(),
            Some(args[i + sep.len()..].trim().to_string()),
        ),
        None => (args.trim().to_string(), None),
    }
}

fn cmd_get(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let (item_tok, cont_tok) = split_from(args, " from ");
    if item_tok.is_empty() {
        world.push_line(sid, "get what?");
        return;
    }
    let here = match world.sessions.get(&sid) {
        Some(s) => s.location.clone(),
        None => return,
    };

    let taken = if let Some(cont_tok) = cont_tok {
        // Out of a container, in the room first, then carried.
        let from_room = world.room_mut(&here).and_then(|room| {
            let ci = room.items.iter().position(|i| {
                i.matches_token(&cont_tok) && i.facets.container.is_some()
            })?;
            let cont = &mut room.items[ci];
            let ii = cont.contents.iter().position(|i| i.matches_token(&item_tok))?;
            Some(cont.contents.remove(ii))
        });
        match from_room {
            Some(it) => Some(it),
            None => world.sessions.get_mut(&sid).and_then(|sess| {
                let ci = sess.ch.inventory.iter().position(|i| {
                    i.matches_token(&cont_tok) && i.facets.container.is_some()
                })?;
                let cont = &mut sess.ch.inventory[ci];
                let ii = cont.contents.iter().position(|i| i.matches_token(&item_tok))?;
                Some(cont.contents.remove(ii))
            }),
        }
    } else {
        world
            .room_mut(&here)
            .and_then(|room| room.find_item(&item_tok).map(|i| room.items.remove(i)))
    };

    match taken {
        Some(it) => {
            let name = it.name.clone();
            let who = world
                .sessions
                .get_mut(&sid)
                .map(|s| {
                    s.ch.inventory.push(it);
                    s.ch.name.clone()
                })
                .unwrap_or_default();
            world.push_line(sid, &format!("you take {name}."));
            world.room_message(&here, &format!("* {who} takes {name}."), &[sid]);
        }
        None => world.push_line(sid, "you don't see that."),
    }
}

fn cmd_drop(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let token = args.trim();
    if token.is_empty() {
        world.push_line(sid, "drop what?");
        return;
    }
    let (here, dropped, who) = {
        let Some(sess) = world.sessions.get_mut(&sid) else {
            return;
        };
        let here = sess.location.clone();
        let who = sess.ch.name.clone();
        let dropped = sess
            .ch
            .find_inventory(token)
            .map(|i| sess.ch.inventory.remove(i));
        (here, dropped, who)
    };
    match dropped {
        Some(it) => {
            let name = it.name.clone();
            if let Some(room) = world.room_mut(&here) {
                room.items.push(it);
            }
            world.push_line(sid, &format!("you drop {name}."));
            world.room_message(&here, &format!("* {who} drops {name}."), &[sid]);
        }
        None => world.push_line(sid, "you aren't carrying that."),
    }
}

fn cmd_put(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let (item_tok, cont_tok) = split_from(args, " in ");
    let Some(cont_tok) = cont_tok else {
        world.push_line(sid, "put what in what?");
        return;
    };
    if item_tok.is_empty() {
        world.push_line(sid, "put what in what?");
        return;
    }

    let here = match world.sessions.get(&sid) {
        Some(s) => s.location.clone(),
        None => return,
    };

    let item = {
        let Some(sess) = world.sessions.get_mut(&sid) else {
            return;
        };
        match sess.ch.find_inventory(&item_tok) {
            Some(i) => sess.ch.inventory.remove(i),
            None => {
                world.push_line(sid, "you aren't carrying that.");
                return;
            }
        }
    };
    let item_name = item.name.clone();

    // Room container first, then a carried one.
    let room_cont = world.room_mut(&here).and_then(|room| {
        let ci = room
            .items
            .iter()
            .position(|i| i.matches_token(&cont_tok) && i.facets.container.is_some())?;
        let cont = &room.items[ci];
        let cap = cont.facets.container.map(|c| c.capacity as usize).unwrap_or(0);
        Some((ci, cont.contents.len() < cap))
    });

    if let Some((ci, fits)) = room_cont {
        if !fits {
            if let Some(sess) = world.sessions.get_mut(&sid) {
                sess.ch.inventory.push(item);
            }
            world.push_line(sid, "it won't fit.");
            return;
        }
        let cont_name = match world.room_mut(&here) {
            Some(room) => {
                room.items[ci].contents.push(item);
                room.items[ci].name.clone()
            }
            None => return,
        };
        world.push_line(sid, &format!("you put {item_name} in {cont_name}."));
        return;
    }

    let Some(sess) = world.sessions.get_mut(&sid) else {
        return;
    };
    let carried = sess
        .ch
        .inventory
        .iter()
        .position(|i| i.matches_token(&cont_tok) && i.facets.container.is_some());
    match carried {
        Some(ci) => {
            let cap = sess.ch.inventory[ci]
                .facets
                .container
                .map(|c| c.capacity as usize)
                .unwrap_or(0);
            if sess.ch.inventory[ci].contents.len() >= cap {
                sess.ch.inventory.push(item);
                world.push_line(sid, "it won't fit.");
                return;
            }
            let cont_name = sess.ch.inventory[ci].name.clone();
            sess.ch.inventory[ci].contents.push(item);
            world.push_line(sid, &format!("you put {item_name} in {cont_name}."));
        }
        None => {
            sess.ch.inventory.push(item);
            world.push_line(sid, "there is no such container here.");
        }
    }
}

fn cmd_equip(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let token = args.trim();
    if token.is_empty() {
        world.push_line(sid, "equip what?");
        return;
    }
    let Some(sess) = world.sessions.get_mut(&sid) else {
        return;
    };
    let Some(i) = sess.ch.find_inventory(token) else {
        world.push_line(sid, "you aren't carrying that.");
        return;
    };
    let Some(slot) = sess.ch.inventory[i]
        .facets
        .equippable
        .as_ref()
        .map(|e| e.slot)
    else {
        world.push_line(sid, "you can't equip that.");
        return;
    };
    let item = sess.ch.inventory.remove(i);
    let name = item.name.clone();
    if let Some(old) = sess.ch.equipped.insert(slot, item) {
        sess.ch.inventory.push(old);
    }
    world.push_line(sid, &format!("you equip {name} ({}).", slot.as_str()));
}

fn cmd_remove(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let token = args.trim();
    if token.is_empty() {
        world.push_line(sid, "remove what?");
        return;
    }
    let Some(sess) = world.sessions.get_mut(&sid) else {
        return;
    };
    let slot = Slot::parse(token).or_else(|| {
        Slot::all()
            .iter()
            .copied()
            .find(|s| sess.ch.equipped.get(s).is_some_and(|i| i.matches_token(token)))
    });
    match slot.and_then(|s| sess.ch.equipped.remove(&s)) {
        Some(item) => {
            let name = item.name.clone();
            sess.ch.inventory.push(item);
            world.push_line(sid, &format!("you remove {name}."));
        }
        None => world.push_line(sid, "you aren't wearing that."),
    }
}

fn cmd_eat(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let token = args.trim();
    if token.is_empty() {
        world.push_line(sid, "eat what?");
        return;
    }
    let Some(sess) = world.sessions.get_mut(&sid) else {
        return;
    };
    let Some(i) = sess.ch.find_inventory(token) else {
        world.push_line(sid, "you aren't carrying that.");
        return;
    };
    let Some(food) = sess.ch.inventory[i].facets.food else {
        world.push_line(sid, "that is not food.");
        return;
    };
    let item = sess.ch.inventory.remove(i);
    sess.ch.hp = (sess.ch.hp + food.heal).min(sess.ch.max_hp);
    sess.ch.mp = (sess.ch.mp + food.mana).min(sess.ch.max_mp);
    world.push_line(sid, &format!("you eat {}.", item.name));
}

fn cmd_enter(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let token = args.trim();
    if token.is_empty() {
        world.push_line(sid, "enter what?");
        return;
    }
    let here = match world.sessions.get(&sid) {
        Some(s) => s.location.clone(),
        None => return,
    };
    let dest = world.room(&here).and_then(|room| {
        room.items
            .iter()
            .find(|i| i.matches_token(token))
            .and_then(|i| i.facets.portal.as_ref())
            .map(|p| p.to.clone())
    });
    match dest {
        Some(to) if world.room(&to).is_some() => {
            world.push_line(sid, "the world folds around you.");
            world.move_session_to(sid, &to, None);
        }
        Some(to) => {
            tracing::error!(target_room = %to, "portal leads nowhere; severed");
            world.push_line(sid, "the portal flickers and dies.");
        }
        None => world.push_line(sid, "you can't enter that."),
    }
}

fn cmd_sit(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let token = args.trim();
    let here = match world.sessions.get(&sid) {
        Some(s) => s.location.clone(),
        None => return,
    };
    let seat = world.room(&here).and_then(|room| {
        room.items
            .iter()
            .find(|i| i.matches_token(token) && i.facets.furniture.is_some())
            .map(|i| i.name.clone())
    });
    match seat {
        Some(name) => world.push_line(sid, &format!("you settle onto {name}.")),
        None => world.push_line(sid, "there's nothing like that to sit on."),
    }
}

fn cmd_door(world: &mut World, sid: SessionId, verb: &str, args: &str) {
    let Some(dir) = Direction::parse(args.trim()) else {
        world.push_line(sid, &format!("{verb} which direction?"));
        return;
    };
    world.operate_door(sid, verb, dir);
}

fn cmd_kill(world: &mut World, sid: SessionId, _verb: &str, args: &str) {
    let token = args.trim();
    if token.is_empty() {
        world.push_line(sid, "kill what?");
        return;
    }
    let here = match world.sessions.get(&sid) {
        Some(s) => s.location.clone(),
        None => return,
    };

    let target: Option<CombatantId> = {
        let room = world.room(&here);
        let npc = room.and_then(|r| {
            r.npcs
                .iter()
                .copied()
                .find(|id| world.npcs.get(id).is_some_and(|n| n.matches_token(token)))
        });
        match npc {
            Some(id) => Some(CombatantId::Npc(id)),
            None => room
                .and_then(|r| {
                    r.occupants
                        .iter()
                        .find(|(n, _)| n.eq_ignore_ascii_case(token))
                        .map(|(_, s)| *s)
                })
                .filter(|other| *other != sid)
                .map(CombatantId::Player),
        }
    };

    let Some(target) = target else {
        world.push_line(sid, "there is no such target here.");
        return;
    };

    let me = CombatantId::Player(sid);
    let in_battle = world
        .sessions
        .get(&sid)
        .and_then(|s| s.ch.battle)
        .is_some();
    if in_battle {
        // Already fighting: just switch targets.
        let shares = world
            .battles
            .values()
            .any(|b| b.contains(me) && b.contains(target));
        if shares {
            if let Some(ch) = world.combatant_mut(me) {
                ch.target = Some(target);
            }
            world.push_line(sid, "you turn on a new foe.");
        } else {
            world.push_line(sid, "they are not in this fight.");
        }
        return;
    }

    world.start_battle(me, target);
}

fn cmd_flee(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let Some(sess) = world.sessions.get_mut(&sid) else {
        return;
    };
    if sess.ch.battle.is_none() {
        world.push_line(sid, "you are not fighting anyone.");
        return;
    }
    sess.ch.next_action = BattleAction::Flee;
    world.push_line(sid, "you look for an opening to flee...");
}

fn cmd_password(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    crate::mode::enter_nested(world, sid, Mode::Password(Password::AwaitOld));
    world.push_line(sid, "old password:");
}

fn cmd_build(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let Some(sess) = world.sessions.get_mut(&sid) else {
        return;
    };
    match sess.mode {
        Mode::Normal => {
            sess.mode = Mode::Build;
            world.push_line(sid, "build mode on.");
        }
        Mode::Build => {
            sess.mode = Mode::Normal;
            world.push_line(sid, "build mode off.");
        }
        _ => world.push_line(sid, "not now."),
    }
}

fn cmd_areas(world: &mut World, sid: SessionId, _verb: &str, _args: &str) {
    let mut names: Vec<String> = world
        .areas
        .values()
        .map(|a| format!(" - {} ({} rooms)", a.name, a.rooms.len()))
        .collect();
    names.sort();
    let mut s = format!("areas: {}\r\n", names.len());
    for n in names {
        s.push_str(&n);
        s.push_str("\r\n");
    }
    world.push_line(sid, &s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn chat_auto_enables_and_filters_by_channel() {
        let mut world = testutil::test_world();
        let talker = testutil::spawn_player(&mut world, "Bob");
        let listener = testutil::spawn_player(&mut world, "Alice");
        let deaf = testutil::spawn_player(&mut world, "Carol");

        world.sessions.get_mut(&talker).unwrap().channels.chat = false;
        world.sessions.get_mut(&deaf).unwrap().channels.chat = false;

        crate::dispatch::dispatch(&mut world, talker, "chat hello");

        let out = testutil::outbound_text(&world, talker);
        assert!(out.contains("Your chat channel has been turned on."), "{out}");
        assert!(out.contains("[chat] Bob: hello"), "{out}");
        assert!(testutil::outbound_text(&world, listener).contains("[chat] Bob: hello"));
        assert!(!testutil::outbound_text(&world, deaf).contains("[chat] Bob: hello"));
    }

    #[test]
    fn bare_chat_toggles_the_channel() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        crate::dispatch::dispatch(&mut world, sid, "chat");
        assert!(!world.sessions.get(&sid).unwrap().channels.chat);
        let out = testutil::outbound_text(&world, sid);
        assert!(out.contains("Your chat channel has been turned off."), "{out}");
    }

    #[test]
    fn get_and_drop_move_items_between_room_and_pack() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        let start = world.cfg.start.clone();
        let before = world.room(&start).unwrap().items.len();
        assert!(before > 0, "test room should hold the seeded sword");

        crate::dispatch::dispatch(&mut world, sid, "get sword");
        assert_eq!(world.room(&start).unwrap().items.len(), before - 1);
        assert_eq!(world.sessions.get(&sid).unwrap().ch.inventory.len(), 1);

        crate::dispatch::dispatch(&mut world, sid, "drop sword");
        assert_eq!(world.room(&start).unwrap().items.len(), before);
        assert!(world.sessions.get(&sid).unwrap().ch.inventory.is_empty());
    }

    #[test]
    fn equip_swaps_into_the_slot() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        crate::dispatch::dispatch(&mut world, sid, "get sword");
        crate::dispatch::dispatch(&mut world, sid, "equip sword");
        let sess = world.sessions.get(&sid).unwrap();
        assert!(sess.ch.equipped.contains_key(&Slot::Wield));
        assert!(sess.ch.inventory.is_empty());
    }

    #[test]
    fn movement_aliases_route_through_go() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        crate::dispatch::dispatch(&mut world, sid, "n");
        let sess = world.sessions.get(&sid).unwrap();
        assert_eq!(sess.location.room, 2, "n should move to the courtyard");
    }
}
