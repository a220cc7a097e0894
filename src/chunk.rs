//! Handing payload bytes to the interpreter's chunk loader.

use mlua::{Function, Lua};

/// Drop a `#`-prefixed prelude: everything through the first newline is
/// invisible to the chunk loader.
pub fn strip_shebang(payload: &[u8]) -> &[u8] {
    if payload.first() == Some(&b'#') {
        match payload.iter().position(|&b| b == b'\n') {
            Some(newline) => &payload[newline + 1..],
            None => &[],
        }
    } else {
        payload
    }
}

/// Compile a section payload into a callable chunk named after the section.
pub fn load(lua: &Lua, name: &str, payload: &[u8]) -> mlua::Result<Function> {
    lua.load(strip_shebang(payload))
        .set_name(format!("={name}"))
        .into_function()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shebang_lines_are_dropped() {
        assert_eq!(strip_shebang(b"#!/usr/bin/env plua\nreturn 7"), b"return 7");
        assert_eq!(strip_shebang(b"# note only"), b"");
        assert_eq!(strip_shebang(b"return 7"), b"return 7");
        assert_eq!(strip_shebang(b""), b"");
    }

    #[test]
    fn stripped_chunks_run_like_the_bare_payload() {
        let lua = Lua::new();
        let with = load(&lua, "t", b"#!/ignored\nreturn 7").unwrap();
        let without = load(&lua, "t", b"return 7").unwrap();
        assert_eq!(with.call::<i64>(()).unwrap(), 7);
        assert_eq!(without.call::<i64>(()).unwrap(), 7);
    }
}
