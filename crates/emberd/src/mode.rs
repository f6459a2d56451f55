//! The per-session mode state machine.
//!
//! A session always has exactly one active mode. `Normal`, `Build`, and
//! `Battle` feed lines to the command dispatcher; the stateful modes
//! (login, character creation, password change, text editing) consume
//! lines themselves. Nested modes save the prior mode into `last_mode`
//! before switching and restore it on exit; the stack is exactly one
//! level deep.

use argon2::Argon2;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde_json::json;
use tracing::{error, info};

use crate::area::{ProtoRef, RoomRef};
use crate::character::{Attrs, Character, Gender};
use crate::persist;
use crate::session::{SessionId, PERM_PLAY};
use crate::world::World;

#[derive(Debug)]
pub enum Mode {
    Login(Login),
    Creation(Creation),
    Normal,
    Build,
    Battle,
    TextEdit(TextEdit),
    Password(Password),
}

impl Mode {
    pub fn login() -> Self {
        Mode::Login(Login::AwaitName)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mode::Login(_) => "login",
            Mode::Creation(_) => "creation",
            Mode::Normal => "normal",
            Mode::Build => "build",
            Mode::Battle => "battle",
            Mode::TextEdit(_) => "textedit",
            Mode::Password(_) => "password",
        }
    }
}

#[derive(Debug)]
pub enum Login {
    AwaitName,
    AwaitPassword { name: String, attempts: u32 },
}

const MAX_PASSWORD_ATTEMPTS: u32 = 3;
const MIN_PASSWORD_LEN: usize = 4;
const CREATION_STAT_POINTS: i32 = 8;

#[derive(Debug)]
pub struct Creation {
    pub step: CreateStep,
    pub name: String,
    pub pw_hash: Option<String>,
    pub gender: Option<Gender>,
    pub email_optin: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    ConfirmName,
    Password,
    Gender,
    Email,
    Stats,
}

#[derive(Debug)]
pub enum Password {
    AwaitOld,
    AwaitNew,
    AwaitConfirm { new: String },
}

#[derive(Debug, Clone)]
pub enum EditTarget {
    RoomDesc(RoomRef),
    ItemDesc(ProtoRef),
    NpcDesc(ProtoRef),
}

#[derive(Debug)]
pub struct TextEdit {
    pub target: EditTarget,
    pub lines: Vec<String>,
}

enum ModeOut {
    Stay(Mode),
    /// Restore `last_mode`, falling back to `Normal`.
    Pop,
}

/// Drain this tick's snapshot of queued lines through the active mode.
/// Stops early when the session quits or its transport dies.
pub fn consume_input(world: &mut World, sid: SessionId) {
    loop {
        let line = match world.sessions.get_mut(&sid) {
            Some(s) => {
                if s.quitting || s.dead {
                    return;
                }
                match s.work.pop_front() {
                    Some(l) => l,
                    None => return,
                }
            }
            None => return,
        };
        handle_line(world, sid, &line);
    }
}

fn handle_line(world: &mut World, sid: SessionId, line: &str) {
    let mode = {
        let Some(sess) = world.sessions.get_mut(&sid) else {
            return;
        };
        std::mem::replace(&mut sess.mode, Mode::Normal)
    };

    let out = match mode {
        m @ (Mode::Normal | Mode::Build | Mode::Battle) => {
            if let Some(sess) = world.sessions.get_mut(&sid) {
                sess.mode = m;
            }
            crate::dispatch::dispatch(world, sid, line);
            return;
        }
        Mode::Login(st) => login_line(world, sid, st, line),
        Mode::Creation(st) => creation_line(world, sid, st, line),
        Mode::Password(st) => password_line(world, sid, st, line),
        Mode::TextEdit(st) => textedit_line(world, sid, st, line),
    };

    if let Some(sess) = world.sessions.get_mut(&sid) {
        match out {
            ModeOut::Stay(m) => sess.mode = m,
            ModeOut::Pop => sess.mode = sess.last_mode.take().unwrap_or(Mode::Normal),
        }
    }
}

/// Switch into a nested mode, saving the current one for restore.
pub fn enter_nested(world: &mut World, sid: SessionId, mode: Mode) {
    let Some(sess) = world.sessions.get_mut(&sid) else {
        return;
    };
    let prior = std::mem::replace(&mut sess.mode, mode);
    sess.last_mode = Some(prior);
}

pub fn hash_password(pw: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut password_hash::rand_core::OsRng);
    let hash = Argon2::default()
        .hash_password(pw.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash_password failed: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(pw: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(pw.as_bytes(), &parsed)
        .is_ok()
}

fn valid_name(token: &str) -> Option<String> {
    let t = token.trim();
    if !(2..=16).contains(&t.len()) || !t.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let mut s = t.to_ascii_lowercase();
    s[..1].make_ascii_uppercase();
    Some(s)
}

fn login_line(world: &mut World, sid: SessionId, state: Login, line: &str) -> ModeOut {
    match state {
        Login::AwaitName => {
            let Some(name) = valid_name(line) else {
                world.push_line(sid, "I don't understand.");
                world.push_line(sid, "name:");
                return ModeOut::Stay(Mode::Login(Login::AwaitName));
            };
            if world.find_session_by_name(&name).is_some() {
                world.push_line(sid, "that character is already playing.");
                world.push_line(sid, "name:");
                return ModeOut::Stay(Mode::Login(Login::AwaitName));
            }
            match persist::find_player_row(world.store.as_ref(), &name) {
                Ok(Some(_)) => {
                    world.push_line(sid, "password:");
                    ModeOut::Stay(Mode::Login(Login::AwaitPassword { name, attempts: 0 }))
                }
                Ok(None) => {
                    world.push_line(sid, &format!("create new character \"{name}\"? (yes/no)"));
                    ModeOut::Stay(Mode::Creation(Creation {
                        step: CreateStep::ConfirmName,
                        name,
                        pw_hash: None,
                        gender: None,
                        email_optin: None,
                    }))
                }
                Err(e) => {
                    error!(err = %e, "player lookup failed");
                    world.push_line(sid, "the world is unsteady; try again.");
                    world.push_line(sid, "name:");
                    ModeOut::Stay(Mode::Login(Login::AwaitName))
                }
            }
        }
        Login::AwaitPassword { name, attempts } => {
            let row = match persist::find_player_row(world.store.as_ref(), &name) {
                Ok(Some(found)) => found,
                Ok(None) => {
                    world.push_line(sid, "that character is gone. name:");
                    return ModeOut::Stay(Mode::Login(Login::AwaitName));
                }
                Err(e) => {
                    error!(err = %e, "player lookup failed");
                    world.push_line(sid, "the world is unsteady; try again.");
                    return ModeOut::Stay(Mode::Login(Login::AwaitPassword { name, attempts }));
                }
            };
            let hash = row
                .1
                .get("pw_hash")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if verify_password(line, &hash) {
                return complete_login(world, sid, row.0, row.1);
            }
            let attempts = attempts + 1;
            if attempts >= MAX_PASSWORD_ATTEMPTS {
                world.push_line(sid, "too many failed attempts.");
                if let Some(sess) = world.sessions.get_mut(&sid) {
                    sess.quitting = true;
                }
                info!(session = %sid, "login failed three times; disconnecting");
                return ModeOut::Stay(Mode::Login(Login::AwaitName));
            }
            world.push_line(sid, "wrong password.");
            world.push_line(sid, "password:");
            ModeOut::Stay(Mode::Login(Login::AwaitPassword { name, attempts }))
        }
    }
}

fn complete_login(
    world: &mut World,
    sid: SessionId,
    row_id: emberstore::RowId,
    row: emberstore::Row,
) -> ModeOut {
    let name = {
        let Some(sess) = world.sessions.get_mut(&sid) else {
            return ModeOut::Stay(Mode::login());
        };
        persist::apply_player_row(sess, row_id, &row);
        sess.ch.name.clone()
    };

    let saved = world.sessions.get(&sid).map(|s| s.location.clone());
    let target = match saved {
        Some(loc) if world.room(&loc).is_some() => loc,
        _ => world.cfg.start.clone(),
    };
    world.place_session(sid, &target);
    world.push_line(sid, &format!("welcome back, {name}."));
    let look = world.render_room_for(sid);
    world.push_line(sid, &look);
    world.room_message(&target, &format!("* {name} has arrived."), &[sid]);
    info!(session = %sid, name = %name, "login ok");
    ModeOut::Stay(Mode::Normal)
}

fn yes_no(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" => Some(true),
        "no" | "n" => Some(false),
        _ => None,
    }
}

fn creation_line(world: &mut World, sid: SessionId, mut st: Creation, line: &str) -> ModeOut {
    match st.step {
        CreateStep::ConfirmName => match yes_no(line) {
            Some(true) => {
                world.push_line(sid, "choose a password:");
                st.step = CreateStep::Password;
                ModeOut::Stay(Mode::Creation(st))
            }
            Some(false) => {
                world.push_line(sid, "name:");
                ModeOut::Stay(Mode::login())
            }
            None => {
                world.push_line(sid, "I don't understand. (yes/no)");
                ModeOut::Stay(Mode::Creation(st))
            }
        },
        CreateStep::Password => {
            let pw = line.trim();
            if pw.len() < MIN_PASSWORD_LEN {
                world.push_line(sid, "too short; four characters at least.");
                return ModeOut::Stay(Mode::Creation(st));
            }
            match hash_password(pw) {
                Ok(h) => {
                    st.pw_hash = Some(h);
                    st.step = CreateStep::Gender;
                    world.push_line(sid, "gender (male/female/neutral):");
                }
                Err(e) => {
                    error!(err = %e, "password hash failed");
                    world.push_line(sid, "something went wrong; try another password.");
                }
            }
            ModeOut::Stay(Mode::Creation(st))
        }
        CreateStep::Gender => match Gender::parse(line) {
            Some(g) => {
                st.gender = Some(g);
                st.step = CreateStep::Email;
                world.push_line(sid, "receive mail updates? (yes/no):");
                ModeOut::Stay(Mode::Creation(st))
            }
            None => {
                world.push_line(sid, "I don't understand. (male/female/neutral)");
                ModeOut::Stay(Mode::Creation(st))
            }
        },
        CreateStep::Email => match yes_no(line) {
            Some(optin) => {
                st.email_optin = Some(optin);
                st.step = CreateStep::Stats;
                world.push_line(
                    sid,
                    &format!(
                        "allocate {CREATION_STAT_POINTS} points across str int dex speed (e.g. '2 2 2 2'):"
                    ),
                );
                ModeOut::Stay(Mode::Creation(st))
            }
            None => {
                world.push_line(sid, "I don't understand. (yes/no)");
                ModeOut::Stay(Mode::Creation(st))
            }
        },
        CreateStep::Stats => {
            let parts: Vec<i32> = line
                .split_whitespace()
                .filter_map(|t| t.parse().ok())
                .collect();
            if parts.len() != 4 || parts.iter().any(|v| *v < 0) {
                world.push_line(sid, "I don't understand. four numbers, please.");
                return ModeOut::Stay(Mode::Creation(st));
            }
            if parts.iter().sum::<i32>() != CREATION_STAT_POINTS {
                world.push_line(
                    sid,
                    &format!("those must sum to {CREATION_STAT_POINTS}."),
                );
                return ModeOut::Stay(Mode::Creation(st));
            }
            finalize_creation(world, sid, st, [parts[0], parts[1], parts[2], parts[3]])
        }
    }
}

fn finalize_creation(
    world: &mut World,
    sid: SessionId,
    st: Creation,
    alloc: [i32; 4],
) -> ModeOut {
    let base = Attrs::default();
    let attrs = Attrs {
        strength: base.strength + alloc[0],
        intellect: base.intellect + alloc[1],
        dexterity: base.dexterity + alloc[2],
        speed: base.speed + alloc[3],
    };

    let start = world.cfg.start.clone();
    let name = st.name.clone();
    {
        let Some(sess) = world.sessions.get_mut(&sid) else {
            return ModeOut::Stay(Mode::login());
        };
        let mut ch = Character::new(&name);
        ch.gender = st.gender.unwrap_or(Gender::Neutral);
        ch.attrs = attrs;
        ch.max_hp = 16 + 2 * attrs.strength;
        ch.hp = ch.max_hp;
        ch.max_mp = 8 + 2 * attrs.intellect;
        ch.mp = ch.max_mp;
        ch.hit = attrs.dexterity / 4;
        ch.evade = attrs.speed / 4;
        sess.ch = ch;
        sess.perms = PERM_PLAY;
        sess.location = start.clone();
    }

    // The new character is persisted before it enters the world; a store
    // failure keeps the session on the stat step so it can retry.
    let extra = [
        ("pw_hash", json!(st.pw_hash.clone().unwrap_or_default())),
        ("email_optin", json!(st.email_optin.unwrap_or(false))),
    ];
    match persist::insert_player(world, sid, &extra) {
        Ok(row_id) => {
            if let Some(sess) = world.sessions.get_mut(&sid) {
                sess.row_id = Some(row_id);
            }
        }
        Err(e) => {
            error!(err = %e, name = %name, "could not persist new character");
            world.push_line(sid, "the scribes dropped their quills; try again.");
            return ModeOut::Stay(Mode::Creation(st));
        }
    }

    world.place_session(sid, &start);
    world.push_line(sid, &format!("welcome to ember, {name}."));
    let look = world.render_room_for(sid);
    world.push_line(sid, &look);
    world.room_message(&start, &format!("* {name} has arrived."), &[sid]);
    info!(session = %sid, name = %name, "character created");
    ModeOut::Stay(Mode::Normal)
}

fn password_line(world: &mut World, sid: SessionId, state: Password, line: &str) -> ModeOut {
    let name = match world.sessions.get(&sid) {
        Some(s) => s.ch.name.clone(),
        None => return ModeOut::Pop,
    };
    match state {
        Password::AwaitOld => {
            let ok = match persist::find_player_row(world.store.as_ref(), &name) {
                Ok(Some((_, row))) => {
                    let hash = row
                        .get("pw_hash")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    verify_password(line, hash)
                }
                _ => false,
            };
            if !ok {
                world.push_line(sid, "that is not your password.");
                return ModeOut::Pop;
            }
            world.push_line(sid, "new password:");
            ModeOut::Stay(Mode::Password(Password::AwaitNew))
        }
        Password::AwaitNew => {
            let pw = line.trim();
            if pw.len() < MIN_PASSWORD_LEN {
                world.push_line(sid, "too short; four characters at least.");
                return ModeOut::Stay(Mode::Password(Password::AwaitNew));
            }
            world.push_line(sid, "again, to confirm:");
            ModeOut::Stay(Mode::Password(Password::AwaitConfirm {
                new: pw.to_string(),
            }))
        }
        Password::AwaitConfirm { new } => {
            if line.trim() != new {
                world.push_line(sid, "they don't match; start over with 'password'.");
                return ModeOut::Pop;
            }
            match hash_password(&new).and_then(|h| {
                persist::update_password(world.store.as_ref(), &name, &h).map_err(Into::into)
            }) {
                Ok(()) => world.push_line(sid, "password changed."),
                Err(e) => {
                    error!(err = %e, "password change failed");
                    world.push_line(sid, "the change did not take; try again later.");
                }
            }
            ModeOut::Pop
        }
    }
}

fn textedit_line(world: &mut World, sid: SessionId, mut st: TextEdit, line: &str) -> ModeOut {
    match line.trim() {
        "." => {
            let text = st.lines.join("\n");
            match world.apply_edit(&st.target, &text) {
                Ok(()) => world.push_line(sid, "saved."),
                Err(e) => world.push_line(sid, &format!("not saved: {e}")),
            }
            ModeOut::Pop
        }
        ".q" => {
            world.push_line(sid, "cancelled.");
            ModeOut::Pop
        }
        _ => {
            st.lines.push(line.to_string());
            ModeOut::Stay(Mode::TextEdit(st))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn password_hashing_round_trips() {
        let h = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &h));
        assert!(!verify_password("hunter3", &h));
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }

    #[test]
    fn names_are_normalized_or_rejected() {
        assert_eq!(valid_name("bob"), Some("Bob".to_string()));
        assert_eq!(valid_name("  ALICE "), Some("Alice".to_string()));
        assert_eq!(valid_name("x"), None);
        assert_eq!(valid_name("has space"), None);
        assert_eq!(valid_name("d1git"), None);
    }

    #[test]
    fn login_walks_into_normal_with_room_description() {
        let mut world = testutil::test_world();
        testutil::seed_player_row(&mut world, "Bob", "swordfish");

        let (sid, mut rx) = testutil::connect(&mut world);
        world.tick();
        testutil::send(&world, sid, "bob");
        world.tick();
        testutil::send(&world, sid, "swordfish");
        world.tick();

        let sess = world.sessions.get(&sid).unwrap();
        assert!(matches!(sess.mode, Mode::Normal));
        let out = testutil::recv_all(&mut rx);
        assert!(out.contains("welcome back, Bob."), "got: {out}");
        assert!(out.contains("The Hall"), "room description missing: {out}");
    }

    #[test]
    fn three_bad_passwords_force_a_disconnect() {
        let mut world = testutil::test_world();
        testutil::seed_player_row(&mut world, "Bob", "swordfish");

        let (sid, _rx) = testutil::connect(&mut world);
        world.tick();
        testutil::send(&world, sid, "bob");
        world.tick();
        for _ in 0..3 {
            testutil::send(&world, sid, "wrong");
            world.tick();
        }
        // Cleanup removed the session without ever reaching Normal.
        assert!(world.sessions.get(&sid).is_none());
    }

    #[test]
    fn creation_flow_builds_and_persists_a_character() {
        let mut world = testutil::test_world();
        let (sid, _rx) = testutil::connect(&mut world);
        world.tick();
        for line in ["newbie", "yes", "swordfish", "female", "no", "2 2 2 2"] {
            testutil::send(&world, sid, line);
            world.tick();
        }
        let sess = world.sessions.get(&sid).unwrap();
        assert!(matches!(sess.mode, Mode::Normal));
        assert_eq!(sess.ch.name, "Newbie");
        assert_eq!(sess.ch.attrs.strength, 10);
        assert!(sess.row_id.is_some());

        // The row is really there for the next login.
        let row = persist::find_player_row(world.store.as_ref(), "Newbie")
            .unwrap()
            .expect("player row");
        assert_eq!(row.1.get("name").and_then(|v| v.as_str()), Some("Newbie"));
    }

    #[test]
    fn textedit_saves_and_restores_the_prior_mode() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Ed");
        {
            let sess = world.sessions.get_mut(&sid).unwrap();
            sess.mode = Mode::Build;
            sess.perms |= crate::session::PERM_BUILD;
        }
        let target = EditTarget::RoomDesc(world.cfg.start.clone());
        enter_nested(
            &mut world,
            sid,
            Mode::TextEdit(TextEdit {
                target,
                lines: Vec::new(),
            }),
        );

        testutil::send(&world, sid, "A hall of ash and echoes.");
        testutil::send(&world, sid, ".");
        world.tick();

        let sess = world.sessions.get(&sid).unwrap();
        assert!(matches!(sess.mode, Mode::Build), "prior mode restored");
        let room = world.room(&world.cfg.start.clone()).unwrap();
        assert_eq!(room.desc, "A hall of ash and echoes.");
    }
}
