//! emberd: a small multiplayer text world.
//!
//! One authoritative tick task owns every byte of game state; socket tasks
//! only shuttle lines in and out. See `world.rs` for the phase order.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use emberstore::JsonStore;
use tokio::net::TcpListener;
use tracing::{info, Level};

mod area;
mod areafile;
mod battle;
mod build;
mod character;
mod commands;
mod dispatch;
mod item;
mod mode;
mod net;
mod npc;
mod persist;
mod rng;
mod session;
#[cfg(test)]
mod testutil;
mod world;

use area::{Area, Exit, ProtoRef, Room, RoomRef, Spawn, SpawnKind};
use world::{World, WorldCfg};

#[derive(Debug, Clone)]
struct Config {
    bind: SocketAddr,
    data_dir: PathBuf,
    tick_ms: u64,
    reset_interval_s: u64,
    seed: u64,
    start: RoomRef,
}

fn usage_and_exit() -> ! {
    eprintln!("usage: emberd start|stop|restart|setup|create_god <name> <password>|clean");
    eprintln!();
    eprintln!("environment:");
    eprintln!("  EMBERD_BIND        listen address (default 0.0.0.0:4000)");
    eprintln!("  EMBERD_DATA_DIR    data directory (default emberdata)");
    eprintln!("  EMBERD_TICK_MS     tick period in ms (default 250)");
    eprintln!("  EMBERD_RESET_S     area reset interval in s (default 600)");
    eprintln!("  EMBERD_SEED        world rng seed (default random)");
    eprintln!("  EMBERD_START       starting room (default haven:1)");
    std::process::exit(2);
}

fn parse_env() -> Config {
    let bind: SocketAddr = std::env::var("EMBERD_BIND")
        .unwrap_or_else(|_| "0.0.0.0:4000".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let data_dir = PathBuf::from(
        std::env::var("EMBERD_DATA_DIR").unwrap_or_else(|_| "emberdata".to_string()),
    );
    let tick_ms = std::env::var("EMBERD_TICK_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(250);
    let reset_interval_s = std::env::var("EMBERD_RESET_S")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(600);
    let seed = std::env::var("EMBERD_SEED")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| {
            let mut b = [0u8; 8];
            getrandom::getrandom(&mut b).expect("getrandom");
            u64::from_be_bytes(b)
        });
    let start = std::env::var("EMBERD_START")
        .ok()
        .and_then(|v| RoomRef::parse(&v))
        .unwrap_or(RoomRef {
            area: "haven".to_string(),
            room: 1,
        });
    Config {
        bind,
        data_dir,
        tick_ms,
        reset_interval_s,
        seed,
        start,
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cfg = parse_env();
    let outcome = match args.first().map(String::as_str) {
        Some("start") | None => cmd_start(cfg),
        Some("stop") => cmd_stop(&cfg, true),
        Some("restart") => cmd_restart(cfg),
        Some("setup") => cmd_setup(&cfg),
        Some("create_god") => match (args.get(1), args.get(2)) {
            (Some(name), Some(pw)) => cmd_create_god(&cfg, name, pw),
            _ => usage_and_exit(),
        },
        Some("clean") => cmd_clean(&cfg),
        Some(_) => usage_and_exit(),
    };
    if let Err(e) = outcome {
        eprintln!("emberd: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,emberd=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();
}

fn pid_path(cfg: &Config) -> PathBuf {
    cfg.data_dir.join("emberd.pid")
}

fn open_world(cfg: &Config) -> anyhow::Result<World> {
    let store = JsonStore::open(cfg.data_dir.join("store")).context("open store")?;
    let mut areas = persist::load_areas(&store).context("load areas")?;
    if areas.is_empty() {
        let area = starter_area(cfg);
        persist::save_area(&store, &area).context("seed starter area")?;
        info!(area = %area.name, "seeded starter area");
        areas.insert(area.name.clone(), area);
    }
    Ok(World::new(
        WorldCfg {
            start: cfg.start.clone(),
            data_dir: cfg.data_dir.clone(),
            reset_interval_s: cfg.reset_interval_s,
            seed: cfg.seed,
        },
        Box::new(store),
        areas,
    ))
}

fn cmd_start(cfg: Config) -> anyhow::Result<()> {
    init_tracing();
    std::fs::create_dir_all(&cfg.data_dir).context("create data dir")?;

    let mut world = open_world(&cfg)?;
    world.force_reset_all();

    std::fs::write(pid_path(&cfg), std::process::id().to_string()).context("write pid file")?;

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let listener = TcpListener::bind(cfg.bind).await.context("bind")?;
        info!(bind = %cfg.bind, started = %chrono::Utc::now().to_rfc3339(), "emberd listening");
        tokio::spawn(net::accept_loop(listener, world.registry.clone()));

        let mut ticker = tokio::time::interval(Duration::from_millis(cfg.tick_ms.max(10)));
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        #[cfg(unix)]
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = ticker.tick() => world.tick(),
                    _ = &mut shutdown => break,
                    _ = sigterm.recv() => break,
                }
            }
            #[cfg(not(unix))]
            {
                tokio::select! {
                    _ = ticker.tick() => world.tick(),
                    _ = &mut shutdown => break,
                }
            }
        }
        info!("shutting down");
        world.persist_all();
        Ok::<(), anyhow::Error>(())
    });

    let _ = std::fs::remove_file(pid_path(&cfg));
    result?;
    println!("emberd stopped.");
    Ok(())
}

fn cmd_stop(cfg: &Config, complain: bool) -> anyhow::Result<()> {
    let pid = match std::fs::read_to_string(pid_path(cfg)) {
        Ok(s) => s.trim().to_string(),
        Err(_) => {
            if complain {
                anyhow::bail!("emberd is not running (no pid file)");
            }
            return Ok(());
        }
    };
    let status = std::process::Command::new("kill").arg(&pid).status()?;
    if !status.success() {
        anyhow::bail!("could not signal pid {pid}");
    }
    println!("emberd (pid {pid}) signalled to stop.");
    Ok(())
}

fn cmd_restart(cfg: Config) -> anyhow::Result<()> {
    cmd_stop(&cfg, false)?;
    // Wait for the old process to drop its pid file.
    for _ in 0..50 {
        if !pid_path(&cfg).exists() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    cmd_start(cfg)
}

fn cmd_setup(cfg: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cfg.data_dir).context("create data dir")?;
    let _ = open_world(cfg)?;
    println!("data directory ready at {}.", cfg.data_dir.display());
    Ok(())
}

fn cmd_create_god(cfg: &Config, name: &str, password: &str) -> anyhow::Result<()> {
    use session::{Session, SessionId, PERM_ADMIN, PERM_BUILD, PERM_PLAY};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    std::fs::create_dir_all(&cfg.data_dir).context("create data dir")?;
    let store = JsonStore::open(cfg.data_dir.join("store")).context("open store")?;

    let mut sess = Session::new(
        SessionId::random(),
        cfg.start.clone(),
        Arc::new(Mutex::new(VecDeque::new())),
        Arc::new(AtomicBool::new(false)),
        None,
    );
    sess.ch = character::Character::new(name);
    sess.perms = PERM_PLAY | PERM_BUILD | PERM_ADMIN;

    persist::save_player(&store, &sess).context("write god row")?;
    let hash = mode::hash_password(password)?;
    persist::update_password(&store, name, &hash).context("set god password")?;
    println!("god character {name} ready.");
    Ok(())
}

fn cmd_clean(cfg: &Config) -> anyhow::Result<()> {
    if cfg.data_dir.exists() {
        std::fs::remove_dir_all(&cfg.data_dir).context("remove data dir")?;
    }
    println!("data directory {} removed.", cfg.data_dir.display());
    Ok(())
}

/// The freshly-set-up world: three rooms, a locked cellar, a chest with the
/// key, a wandering rat, and a barkeep muttering on a loop.
fn starter_area(cfg: &Config) -> Area {
    use character::Attrs;
    use item::{
        Container, DamageEntry, DamageType, Equippable, Facets, Food, ItemProto, Slot,
    };
    use npc::{NpcProto, Script, ScriptStep};

    let mut area = Area::new("haven");
    area.reset_interval_s = cfg.reset_interval_s;

    let mut hall = Room::new("haven", 1, "The Hall");
    hall.desc = "Soot-dark beams over a long stone floor. The hearth never quite dies."
        .to_string();
    let mut yard = Room::new("haven", 2, "The Courtyard");
    yard.desc = "Weeds push through cracked flagstones.".to_string();
    let mut cellar = Room::new("haven", 3, "The Cellar");
    cellar.desc = "Cold air, old casks, older dust.".to_string();

    hall.exits[area::Direction::North.idx()] = Some(Exit {
        linked: Some(area::Direction::South),
        ..Exit::open_to(RoomRef {
            area: "haven".to_string(),
            room: 2,
        })
    });
    yard.exits[area::Direction::South.idx()] = Some(Exit {
        linked: Some(area::Direction::North),
        ..Exit::open_to(RoomRef {
            area: "haven".to_string(),
            room: 1,
        })
    });
    hall.exits[area::Direction::Down.idx()] = Some(Exit {
        linked: Some(area::Direction::Up),
        openable: true,
        closed: true,
        locked: true,
        key: Some(ProtoRef {
            area: "haven".to_string(),
            id: 7,
        }),
        ..Exit::open_to(RoomRef {
            area: "haven".to_string(),
            room: 3,
        })
    });
    cellar.exits[area::Direction::Up.idx()] = Some(Exit {
        linked: Some(area::Direction::Down),
        openable: true,
        closed: true,
        locked: true,
        key: Some(ProtoRef {
            area: "haven".to_string(),
            id: 7,
        }),
        ..Exit::open_to(RoomRef {
            area: "haven".to_string(),
            room: 1,
        })
    });

    area.item_protos.insert(
        4,
        ItemProto {
            id: 4,
            area: "haven".to_string(),
            name: "a rusty sword".to_string(),
            keywords: vec!["sword".to_string(), "rusty".to_string()],
            desc: "Pitted along the edge, but it still bites.".to_string(),
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
        },
    );
    area.item_protos.insert(
        5,
        ItemProto {
            id: 5,
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
        6,
        ItemProto {
            id: 6,
            area: "haven".to_string(),
            name: "an oak chest".to_string(),
            keywords: vec!["chest".to_string(), "oak".to_string()],
            desc: "Iron-banded and heavier than it looks.".to_string(),
            facets: Facets {
                container: Some(Container { capacity: 8 }),
                ..Default::default()
            },
        },
    );
    area.item_protos.insert(
        7,
        ItemProto {
            id: 7,
            area: "haven".to_string(),
            name: "an iron key".to_string(),
            keywords: vec!["key".to_string(), "iron".to_string()],
            desc: "Cut for the cellar door.".to_string(),
            facets: Facets::default(),
        },
    );

    area.npc_protos.insert(
        8,
        NpcProto {
            id: 8,
            area: "haven".to_string(),
            name: "a giant rat".to_string(),
            keywords: vec!["rat".to_string(), "giant".to_string()],
            desc: "Fat on cellar grain, bold with it.".to_string(),
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
            wander: true,
            script: None,
        },
    );
    area.npc_protos.insert(
        9,
        NpcProto {
            id: 9,
            area: "haven".to_string(),
            name: "the barkeep".to_string(),
            keywords: vec!["barkeep".to_string(), "keeper".to_string()],
            desc: "Arms like dock rope. Opinions to match.".to_string(),
            max_hp: 40,
            max_mp: 10,
            attrs: Attrs {
                strength: 12,
                intellect: 9,
                dexterity: 9,
                speed: 8,
            },
            hit: 4,
            evade: 2,
            damage: vec![DamageEntry {
                kind: DamageType::Bludgeoning,
                min: 2,
                max: 6,
            }],
            absorb: Vec::new(),
            wander: false,
            script: Some(10),
        },
    );

    area.scripts.insert(
        10,
        Script {
            id: 10,
            area: "haven".to_string(),
            name: "barkeep-patter".to_string(),
            steps: vec![
                ScriptStep::Emote("polishes a cracked mug.".to_string()),
                ScriptStep::Wait(24),
                ScriptStep::Say("Mind the cellar. The rats mind you.".to_string()),
                ScriptStep::Wait(40),
            ],
        },
    );

    hall.spawns.push(Spawn {
        kind: SpawnKind::Item,
        proto: ProtoRef {
            area: "haven".to_string(),
            id: 6,
        },
        count: 1,
        inside: None,
    });
    hall.spawns.push(Spawn {
        kind: SpawnKind::Item,
        proto: ProtoRef {
            area: "haven".to_string(),
            id: 7,
        },
        count: 1,
        inside: Some(ProtoRef {
            area: "haven".to_string(),
            id: 6,
        }),
    });
    hall.spawns.push(Spawn {
        kind: SpawnKind::Npc,
        proto: ProtoRef {
            area: "haven".to_string(),
            id: 9,
        },
        count: 1,
        inside: None,
    });
    yard.spawns.push(Spawn {
        kind: SpawnKind::Item,
        proto: ProtoRef {
            area: "haven".to_string(),
            id: 4,
        },
        count: 1,
        inside: None,
    });
    yard.spawns.push(Spawn {
        kind: SpawnKind::Item,
        proto: ProtoRef {
            area: "haven".to_string(),
            id: 5,
        },
        count: 2,
        inside: None,
    });
    cellar.spawns.push(Spawn {
        kind: SpawnKind::Npc,
        proto: ProtoRef {
            area: "haven".to_string(),
            id: 8,
        },
        count: 2,
        inside: None,
    });

    area.rooms.insert(1, hall);
    area.rooms.insert(2, yard);
    area.rooms.insert(3, cellar);
    area.note_id(10);
    area
}
