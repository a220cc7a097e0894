//! The stock command-line front end, used when the executable carries no
//! bundle (or the bundle opts out of auto-run).

use std::io::{IsTerminal, Read};

use mlua::{Function, Lua, MultiValue, Variadic};

use crate::{bootstrap, chunk};

/// `-e`/`-l` payloads, kept in command-line order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Execute(String),
    Require(String),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Options {
    pub commands: Vec<Command>,
    pub interactive: bool,
    pub version: bool,
    /// Index into argv of the script name (or of `-`/the first arg after
    /// `--`).
    pub script: Option<usize>,
}

impl Options {
    fn has_execute(&self) -> bool {
        self.commands
            .iter()
            .any(|c| matches!(c, Command::Execute(_)))
    }
}

/// Parse argv the way the stock interpreter does. Option handling stops at
/// the first non-option, at `--`, or at a bare `-` (stdin).
pub fn parse(argv: &[String]) -> Result<Options, ()> {
    let mut opts = Options::default();
    let mut i = 1;
    while i < argv.len() {
        let arg = &argv[i];
        if !arg.starts_with('-') {
            opts.script = Some(i);
            return Ok(opts);
        }
        match arg.as_str() {
            "--" => {
                opts.script = (i + 1 < argv.len()).then_some(i + 1);
                return Ok(opts);
            }
            "-" => {
                opts.script = Some(i);
                return Ok(opts);
            }
            "-i" => {
                opts.interactive = true;
                // -i implies the version banner, as in the stock host
                opts.version = true;
            }
            "-v" => {
                opts.version = true;
            }
            _ if !arg.is_char_boundary(2) => return Err(()),
            _ => match (&arg[1..2], &arg[2..]) {
                ("e", rest) => {
                    let stat = take_value(argv, &mut i, rest).ok_or(())?;
                    opts.commands.push(Command::Execute(stat));
                }
                ("l", rest) => {
                    let name = take_value(argv, &mut i, rest).ok_or(())?;
                    opts.commands.push(Command::Require(name));
                }
                _ => return Err(()),
            },
        }
        i += 1;
    }
    Ok(opts)
}

fn take_value(argv: &[String], i: &mut usize, attached: &str) -> Option<String> {
    if !attached.is_empty() {
        Some(attached.to_owned())
    } else {
        *i += 1;
        argv.get(*i).cloned()
    }
}

pub fn print_usage(progname: &str) {
    eprintln!(
        "usage: {progname} [options] [script [args]].\n\
         Available options are:\n\
         \x20 -e stat  execute string 'stat'\n\
         \x20 -l name  require library 'name'\n\
         \x20 -i       enter interactive mode after executing 'script'\n\
         \x20 -v       show version information\n\
         \x20 --       stop handling options\n\
         \x20 -        execute stdin and stop handling options"
    );
}

pub fn print_version(lua: &Lua) {
    let release: String = lua
        .globals()
        .get("_VERSION")
        .unwrap_or_else(|_| "Lua".to_owned());
    eprintln!("{release}  plua {}", env!("CARGO_PKG_VERSION"));
}

/// Load a script from a file (shebang-aware) or from standard input.
pub fn load_script(lua: &Lua, path: Option<&str>) -> mlua::Result<Function> {
    match path {
        Some(path) => {
            let bytes = std::fs::read(path).map_err(|err| {
                mlua::Error::RuntimeError(format!("cannot open {path}: {err}"))
            })?;
            lua.load(chunk::strip_shebang(&bytes))
                .set_name(format!("@{path}"))
                .into_function()
        }
        None => {
            let mut bytes = Vec::new();
            std::io::stdin()
                .read_to_end(&mut bytes)
                .map_err(|err| mlua::Error::RuntimeError(format!("cannot read stdin: {err}")))?;
            lua.load(chunk::strip_shebang(&bytes))
                .set_name("=stdin")
                .into_function()
        }
    }
}

/// Populate the global `arg` table and run the script at `argv[index]` with
/// the remaining arguments, stdin standing in for a bare `-`.
pub fn handle_script(lua: &Lua, argv: &[String], index: usize) -> mlua::Result<()> {
    let arg = lua.create_table()?;
    for (i, value) in argv.iter().enumerate() {
        arg.raw_set(i as i64 - index as i64, value.as_str())?;
    }
    lua.globals().set("arg", arg)?;

    let name = &argv[index];
    let from_stdin = name == "-" && argv.get(index - 1).is_none_or(|prev| prev != "--");
    let script = load_script(lua, (!from_stdin).then_some(name.as_str()))?;

    let args = Variadic::from_iter(argv[index + 1..].iter().cloned());
    bootstrap::docall::<MultiValue>(lua, &script, args)?;
    Ok(())
}

/// Run the accumulated `-e`/`-l` commands in order; `true` means all passed.
pub fn run_commands(lua: &Lua, progname: &str, opts: &Options) -> bool {
    for command in &opts.commands {
        let result = match command {
            Command::Execute(stat) => bootstrap::dostring(lua, stat, "=(command line)"),
            Command::Require(name) => bootstrap::dolibrary(lua, name),
        };
        if !bootstrap::report(progname, result) {
            return false;
        }
    }
    true
}

/// The full fallback flow: flags, script, then REPL or stdin.
pub fn run(lua: &Lua, progname: &str, argv: &[String]) -> i32 {
    let Ok(opts) = parse(argv) else {
        print_usage(progname);
        return 1;
    };
    if opts.version {
        print_version(lua);
    }
    if !run_commands(lua, progname, &opts) {
        return 1;
    }
    if let Some(index) = opts.script {
        if !bootstrap::report(progname, handle_script(lua, argv, index)) {
            return 1;
        }
    }
    if opts.interactive {
        crate::repl::run(lua, progname);
    } else if opts.script.is_none() && !opts.has_execute() && !opts.version {
        if std::io::stdin().is_terminal() {
            print_version(lua);
            crate::repl::run(lua, progname);
        } else {
            let result = load_script(lua, None)
                .and_then(|script| bootstrap::docall::<MultiValue>(lua, &script, ()));
            if !bootstrap::report(progname, result) {
                return 1;
            }
        }
    }
    0
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn options_stop_at_the_script() {
        let opts = parse(&args(&["plua", "-v", "run.lua", "-e", "ignored"])).unwrap();
        assert!(opts.version);
        assert_eq!(opts.script, Some(2));
        assert!(opts.commands.is_empty());
    }

    #[test]
    fn execute_and_require_keep_their_order() {
        let opts = parse(&args(&["plua", "-e", "x=1", "-lfoo", "-e", "y=2"])).unwrap();
        assert_eq!(
            opts.commands,
            vec![
                Command::Execute("x=1".into()),
                Command::Require("foo".into()),
                Command::Execute("y=2".into()),
            ]
        );
    }

    #[test]
    fn double_dash_ends_option_handling() {
        let opts = parse(&args(&["plua", "--", "-v"])).unwrap();
        assert!(!opts.version);
        assert_eq!(opts.script, Some(2));
        assert_eq!(parse(&args(&["plua", "--"])).unwrap().script, None);
    }

    #[test]
    fn bare_dash_means_stdin() {
        let opts = parse(&args(&["plua", "-"])).unwrap();
        assert_eq!(opts.script, Some(1));
    }

    #[test]
    fn missing_option_values_and_unknown_flags_fail() {
        assert!(parse(&args(&["plua", "-e"])).is_err());
        assert!(parse(&args(&["plua", "-x"])).is_err());
    }

    #[test]
    fn interactive_implies_the_version_banner() {
        let opts = parse(&args(&["plua", "-i"])).unwrap();
        assert!(opts.interactive && opts.version);
    }
}
