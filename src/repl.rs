//! The interactive prompt.

use std::io::Write;

use mlua::{Function, Lua, MultiValue};

use crate::bootstrap;

fn prompt(lua: &Lua, firstline: bool) -> String {
    let key = if firstline { "_PROMPT" } else { "_PROMPT2" };
    lua.globals()
        .get::<Option<String>>(key)
        .ok()
        .flatten()
        .unwrap_or_else(|| if firstline { "> " } else { ">> " }.to_owned())
}

fn read_line(text: &str) -> Option<String> {
    print!("{text}");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            if line.ends_with('\n') {
                line.pop();
            }
            Some(line)
        }
    }
}

/// Keep appending input lines until the chunk compiles or the syntax error
/// stops being an at-end-of-input one.
fn load_line(lua: &Lua) -> Option<mlua::Result<Function>> {
    let mut line = read_line(&prompt(lua, true))?;
    if let Some(rest) = line.strip_prefix('=') {
        line = format!("return {rest}");
    }
    loop {
        match lua.load(&line).set_name("=stdin").into_function() {
            Ok(chunk) => return Some(Ok(chunk)),
            Err(mlua::Error::SyntaxError {
                incomplete_input: true,
                ..
            }) => match read_line(&prompt(lua, false)) {
                Some(next) => {
                    line.push('\n');
                    line.push_str(&next);
                }
                None => return None,
            },
            Err(err) => return Some(Err(err)),
        }
    }
}

pub fn run(lua: &Lua, progname: &str) {
    while let Some(loaded) = load_line(lua) {
        let result = loaded.and_then(|chunk| bootstrap::docall::<MultiValue>(lua, &chunk, ()));
        match result {
            Ok(values) => {
                if !values.is_empty() {
                    if let Ok(print) = lua.globals().get::<Function>("print") {
                        if let Err(err) = print.call::<()>(values) {
                            eprintln!("{progname}: error calling 'print' ({err})");
                        }
                    }
                }
            }
            Err(err) => {
                bootstrap::report::<()>(progname, Err(err));
            }
        }
    }
    println!();
}
