//! Command dispatch.
//!
//! One line in, one fully-completed command out. The verb is the text up to
//! the first whitespace run; the rest is handed to the handler untouched.
//! Which table the verb resolves against depends on the active mode:
//! battle restricts to the combat table, build overlays the builder table
//! on the player table, and the always-table rides along everywhere.
//!
//! A handler that panics is caught here, logged, and turned into one
//! generic error line; the tick loop never dies for a bad command.

use tracing::error;

use crate::mode::Mode;
use crate::session::SessionId;
use crate::world::World;

pub type Handler = fn(&mut World, SessionId, &str, &str);

pub struct CmdSpec {
    /// First name is canonical; the rest are aliases.
    pub names: &'static [&'static str],
    /// Required permission bits, checked with bitwise AND.
    pub perms: u32,
    pub handler: Handler,
}

pub fn split_verb(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    }
}

const TABLES_NORMAL: &[&[CmdSpec]] = &[crate::commands::NORMAL, crate::commands::ALWAYS];
const TABLES_BUILD: &[&[CmdSpec]] = &[
    crate::build::BUILD_OVERLAY,
    crate::commands::NORMAL,
    crate::commands::ALWAYS,
];
const TABLES_BATTLE: &[&[CmdSpec]] = &[crate::commands::BATTLE, crate::commands::ALWAYS];

fn lookup(tables: &[&'static [CmdSpec]], verb: &str) -> Option<&'static CmdSpec> {
    for table in tables {
        for spec in *table {
            if spec.names.iter().any(|n| *n == verb) {
                return Some(spec);
            }
        }
    }
    None
}

pub fn dispatch(world: &mut World, sid: SessionId, raw: &str) {
    let (verb, rest) = split_verb(raw);
    if verb.is_empty() {
        return;
    }
    let verb = verb.to_ascii_lowercase();

    let (tables, perms): (&[&'static [CmdSpec]], u32) = match world.sessions.get(&sid) {
        Some(sess) => {
            let tables = match sess.mode {
                Mode::Battle => TABLES_BATTLE,
                Mode::Build => TABLES_BUILD,
                _ => TABLES_NORMAL,
            };
            (tables, sess.perms)
        }
        None => return,
    };

    let Some(spec) = lookup(tables, &verb) else {
        world.push_line(sid, &format!("unrecognized command: {verb}"));
        return;
    };

    if spec.perms & perms != spec.perms {
        world.push_line(sid, "you don't have permission for that.");
        return;
    }

    run_handler(world, sid, spec, &verb, rest);
}

fn run_handler(world: &mut World, sid: SessionId, spec: &CmdSpec, verb: &str, rest: &str) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        (spec.handler)(world, sid, verb, rest)
    }));
    if let Err(payload) = outcome {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic".to_string());
        error!(session = %sid, verb, detail, "command handler panicked");
        world.push_line(sid, "something went wrong with that command.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PERM_BUILD;
    use crate::testutil;

    #[test]
    fn verb_splits_on_first_whitespace_run() {
        assert_eq!(split_verb("look"), ("look", ""));
        assert_eq!(split_verb("say   hello there"), ("say", "hello there"));
        assert_eq!(split_verb("  go north "), ("go", "north"));
        assert_eq!(split_verb(""), ("", ""));
    }

    #[test]
    fn unknown_verbs_report_and_do_nothing() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        dispatch(&mut world, sid, "frobnicate wildly");
        let out = testutil::outbound_text(&world, sid);
        assert!(out.contains("unrecognized command: frobnicate"), "{out}");
    }

    #[test]
    fn missing_permission_short_circuits() {
        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        // `build` demands PERM_BUILD, which spawn_player does not grant.
        dispatch(&mut world, sid, "build");
        let out = testutil::outbound_text(&world, sid);
        assert!(out.contains("you don't have permission"), "{out}");
        assert!(matches!(
            world.sessions.get(&sid).unwrap().mode,
            crate::mode::Mode::Normal
        ));

        world.sessions.get_mut(&sid).unwrap().perms |= PERM_BUILD;
        dispatch(&mut world, sid, "build");
        assert!(matches!(
            world.sessions.get(&sid).unwrap().mode,
            crate::mode::Mode::Build
        ));
    }

    #[test]
    fn a_panicking_handler_is_contained() {
        fn bomb(_: &mut World, _: SessionId, _: &str, _: &str) {
            panic!("kaboom");
        }
        static BOMB: CmdSpec = CmdSpec {
            names: &["bomb"],
            perms: 0,
            handler: bomb,
        };

        let mut world = testutil::test_world();
        let sid = testutil::spawn_player(&mut world, "Bob");
        run_handler(&mut world, sid, &BOMB, "bomb", "");
        let out = testutil::outbound_text(&world, sid);
        assert!(out.contains("something went wrong"), "{out}");
        // The world is still usable afterward.
        dispatch(&mut world, sid, "look");
    }
}
