//! Process bootstrap: create the interpreter, probe the executable for an
//! appended bundle, and hand control to the bundle, the appended chunk, or
//! the stock command line.

use std::{
    fs::File,
    process::ExitCode,
    sync::atomic::{AtomicBool, Ordering},
};

use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua, MultiValue, Variadic};

use crate::{
    api, bitlib, chunk, cli,
    container::Container,
    format::{Characteristics, ConfigFlags},
    host_image::{self, TailKind},
    resolver::{self, BundleState},
};

/// Environment variable naming the init script; `@path` runs a file,
/// anything else runs as source.
pub const INIT_VAR: &str = "PLUA_INIT";

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Raise `interrupted!` at the next instruction boundary once SIGINT fires.
/// The handler is one-shot: a second signal before the hook runs falls back
/// to the default action and kills the process.
fn install_interrupt_hook(lua: &Lua) {
    let _ = lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(100),
        |_lua, _debug| {
            if INTERRUPTED.swap(false, Ordering::SeqCst) {
                Err(mlua::Error::RuntimeError("interrupted!".into()))
            } else {
                Ok(mlua::VmState::Continue)
            }
        },
    );
}

struct SigintGuard;

fn arm_sigint() -> SigintGuard {
    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    unsafe {
        let _ = signal::sigaction(Signal::SIGINT, &action);
    }
    SigintGuard
}

impl Drop for SigintGuard {
    fn drop(&mut self) {
        use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        unsafe {
            let _ = signal::sigaction(Signal::SIGINT, &action);
        }
        INTERRUPTED.store(false, Ordering::SeqCst);
    }
}

/// Call a chunk with SIGINT wired to the interrupt hook for the duration.
pub fn docall<R: FromLuaMulti>(
    _lua: &Lua,
    chunk: &Function,
    args: impl IntoLuaMulti,
) -> mlua::Result<R> {
    let _guard = arm_sigint();
    chunk.call(args)
}

/// Print an error to stderr with the program-name prefix; `true` = success.
pub fn report<T>(progname: &str, result: mlua::Result<T>) -> bool {
    match result {
        Ok(_) => true,
        Err(err) => {
            eprintln!("{progname}: {err}");
            false
        }
    }
}

pub fn dostring(lua: &Lua, source: &str, name: &str) -> mlua::Result<()> {
    let chunk = lua.load(source).set_name(name).into_function()?;
    docall::<()>(lua, &chunk, ())
}

pub fn dofile(lua: &Lua, path: Option<&str>) -> mlua::Result<()> {
    let chunk = cli::load_script(lua, path)?;
    docall::<()>(lua, &chunk, ())
}

pub fn dolibrary(lua: &Lua, name: &str) -> mlua::Result<()> {
    let require: Function = lua.globals().get("require")?;
    let _guard = arm_sigint();
    require.call(name)
}

fn handle_init(lua: &Lua, progname: &str) -> bool {
    let Ok(init) = std::env::var(INIT_VAR) else {
        return true;
    };
    let result = match init.strip_prefix('@') {
        Some(path) => dofile(lua, Some(path)),
        None => dostring(lua, &init, &format!("={INIT_VAR}")),
    };
    report(progname, result)
}

/// Populate the global `arg` table with the whole argv, `arg[0]` being the
/// executable, as bundle and tail chunks see it.
fn set_bundle_args(lua: &Lua, argv: &[String]) -> mlua::Result<()> {
    let arg = lua.create_table()?;
    for (i, value) in argv.iter().enumerate() {
        arg.raw_set(i as i64, value.as_str())?;
    }
    lua.globals().set("arg", arg)
}

fn script_args(argv: &[String]) -> Variadic<String> {
    Variadic::from_iter(argv.iter().skip(1).cloned())
}

/// Execute every auto-run section in index order; the last one receives the
/// command-line arguments.
fn run_bundle(lua: &Lua, shared: &resolver::SharedContainer, argv: &[String]) -> mlua::Result<()> {
    let autos: Vec<(String, Vec<u8>)> = {
        let guard = shared.borrow();
        let Some(container) = guard.as_ref() else {
            return Ok(());
        };
        let mut autos = Vec::new();
        for (index, section) in container.sections().iter().enumerate() {
            if section.characteristics.contains(Characteristics::AUTO) {
                autos.push((
                    section.name.clone(),
                    container.read_all(index).map_err(mlua::Error::external)?,
                ));
            }
        }
        autos
    };

    set_bundle_args(lua, argv)?;
    let last = autos.len().saturating_sub(1);
    for (i, (name, payload)) in autos.into_iter().enumerate() {
        let loaded = chunk::load(lua, &name, &payload)?;
        if i == last {
            docall::<MultiValue>(lua, &loaded, script_args(argv))?;
        } else {
            docall::<()>(lua, &loaded, ())?;
        }
    }
    Ok(())
}

/// Run an unsigned tail as one anonymous chunk with the bundle argument
/// convention.
fn run_tail_chunk(lua: &Lua, exe: &std::path::Path, tail: host_image::HostTail, argv: &[String]) -> mlua::Result<()> {
    use std::os::unix::fs::FileExt;
    let file = File::open(exe).map_err(mlua::Error::external)?;
    let mut payload = vec![0u8; tail.len as usize];
    file.read_exact_at(&mut payload, tail.offset)
        .map_err(mlua::Error::external)?;
    set_bundle_args(lua, argv)?;
    let loaded = chunk::load(lua, "", &payload)?;
    docall::<MultiValue>(lua, &loaded, script_args(argv))?;
    Ok(())
}

fn cli_with_libraries(lua: &Lua, progname: &str, argv: &[String]) -> i32 {
    // the stock command line always has the authoring API and the bit
    // library on hand
    if !report(progname, api::open_plua(lua)) || !report(progname, bitlib::open_bit(lua)) {
        return 1;
    }
    cli::run(lua, progname, argv)
}

fn run_inner(lua: &Lua, progname: &str, argv: &[String]) -> i32 {
    // pause the collector while the host wiring registers, as the stock
    // interpreter does around its library setup
    lua.gc_stop();
    install_interrupt_hook(lua);
    resolver::BundleState::install(lua, None);
    let wired = report(progname, resolver::install_searcher(lua));
    lua.gc_restart();
    if !wired {
        return 1;
    }
    if !handle_init(lua, progname) {
        return 1;
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(err) => {
            log::warn!("cannot locate the host executable: {err}");
            return cli_with_libraries(lua, progname, argv);
        }
    };

    let tail = match host_image::find_tail(&exe) {
        Ok(Some(tail)) => tail,
        Ok(None) => return cli_with_libraries(lua, progname, argv),
        Err(err) => {
            log::warn!("host image probe failed: {err}");
            return cli_with_libraries(lua, progname, argv);
        }
    };

    match tail.kind {
        TailKind::Chunk => {
            if report(progname, run_tail_chunk(lua, &exe, tail, argv)) {
                0
            } else {
                1
            }
        }
        TailKind::Bundle => {
            let file = match File::open(&exe) {
                Ok(file) => file,
                Err(err) => {
                    eprintln!("{progname}: cannot reopen the host executable: {err}");
                    return 1;
                }
            };
            let container = match Container::parse(file, false, tail.offset) {
                Ok(container) => container,
                Err(err) => {
                    eprintln!("{progname}: malformed bundle: {err}");
                    return 1;
                }
            };
            let flags = container.config_flags();
            let shared = resolver::share(container);
            lua.set_app_data(BundleState {
                active: Some(shared.clone()),
                require: Some(shared.clone()),
            });

            let mut ok = true;
            if flags.contains(ConfigFlags::BIT_LIB) {
                ok &= report(progname, bitlib::open_bit(lua));
            }
            if flags.contains(ConfigFlags::AUTHORING_API) {
                ok &= report(progname, api::open_plua(lua));
            }
            if !ok {
                return 1;
            }
            if !flags.contains(ConfigFlags::RUN_AUTOS) {
                return cli::run(lua, progname, argv);
            }
            if report(progname, run_bundle(lua, &shared, argv)) {
                0
            } else {
                1
            }
        }
    }
}

/// Whole-process entry point: build the interpreter and dispatch.
pub fn run() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();
    let progname = argv
        .first()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("plua")
        .to_owned();

    let lua = Lua::new();
    let status = run_inner(&lua, &progname, &argv);
    if status == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
