//! 32-bit bit-manipulation library with the LuaBitOp surface, openable at
//! startup by a bundle config bit and always present in plain CLI mode.

use mlua::{Lua, Table, Value, Variadic};

/// Normalize a Lua number into a signed 32-bit lane.
fn tobit(n: f64) -> i32 {
    (n as i64 & 0xFFFF_FFFF) as u32 as i32
}

fn want_number(value: &Value) -> mlua::Result<i32> {
    value
        .as_f64()
        .map(tobit)
        .ok_or_else(|| mlua::Error::RuntimeError("number expected".into()))
}

/// Shift counts coerce like any other operand and wrap into `0..=31`.
fn shift_count(n: f64) -> u32 {
    (n as i64 & 31) as u32
}

fn fold(args: Variadic<Value>, init: i32, op: impl Fn(i32, i32) -> i32) -> mlua::Result<i32> {
    let mut acc = init;
    for (i, value) in args.iter().enumerate() {
        let n = want_number(value)?;
        acc = if i == 0 { n } else { op(acc, n) };
    }
    Ok(acc)
}

/// Register the `bit` table (global and in `package.loaded`).
pub fn open_bit(lua: &Lua) -> mlua::Result<Table> {
    let bit = lua.create_table()?;

    bit.set("tobit", lua.create_function(|_, n: f64| Ok(tobit(n)))?)?;

    bit.set(
        "band",
        lua.create_function(|_, args: Variadic<Value>| fold(args, -1, |a, b| a & b))?,
    )?;
    bit.set(
        "bor",
        lua.create_function(|_, args: Variadic<Value>| fold(args, 0, |a, b| a | b))?,
    )?;
    bit.set(
        "bxor",
        lua.create_function(|_, args: Variadic<Value>| fold(args, 0, |a, b| a ^ b))?,
    )?;
    bit.set(
        "bnot",
        lua.create_function(|_, n: f64| Ok(!tobit(n)))?,
    )?;

    bit.set(
        "lshift",
        lua.create_function(|_, (x, n): (f64, f64)| {
            Ok(((tobit(x) as u32) << shift_count(n)) as i32)
        })?,
    )?;
    bit.set(
        "rshift",
        lua.create_function(|_, (x, n): (f64, f64)| {
            Ok(((tobit(x) as u32) >> shift_count(n)) as i32)
        })?,
    )?;
    bit.set(
        "arshift",
        lua.create_function(|_, (x, n): (f64, f64)| Ok(tobit(x) >> shift_count(n)))?,
    )?;
    bit.set(
        "rol",
        lua.create_function(|_, (x, n): (f64, f64)| {
            Ok((tobit(x) as u32).rotate_left(shift_count(n)) as i32)
        })?,
    )?;
    bit.set(
        "ror",
        lua.create_function(|_, (x, n): (f64, f64)| {
            Ok((tobit(x) as u32).rotate_right(shift_count(n)) as i32)
        })?,
    )?;
    bit.set(
        "bswap",
        lua.create_function(|_, x: f64| Ok(tobit(x).swap_bytes()))?,
    )?;

    bit.set(
        "tohex",
        lua.create_function(|_, (x, n): (f64, Option<i32>)| {
            let value = tobit(x) as u32;
            let digits = n.unwrap_or(8);
            let width = digits.unsigned_abs().clamp(1, 8) as usize;
            let hex = if digits < 0 {
                format!("{value:08X}")
            } else {
                format!("{value:08x}")
            };
            Ok(hex[8 - width..].to_string())
        })?,
    )?;

    lua.globals().set("bit", &bit)?;
    let package: Table = lua.globals().get("package")?;
    let loaded: Table = package.get("loaded")?;
    loaded.set("bit", &bit)?;
    Ok(bit)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lanes_wrap_to_32_bits() {
        assert_eq!(tobit(-1.0), -1);
        assert_eq!(tobit(4294967296.0 + 5.0), 5);
        assert_eq!(tobit(2147483648.0), i32::MIN);
    }

    #[test]
    fn operations_match_luabitop() {
        let lua = Lua::new();
        open_bit(&lua).unwrap();
        let checks = r#"
            assert(bit.band(0xff, 0x0f) == 0x0f)
            assert(bit.bor(1, 2, 4) == 7)
            assert(bit.bxor(5, 3) == 6)
            assert(bit.bnot(0) == -1)
            assert(bit.lshift(1, 8) == 256)
            assert(bit.rshift(256, 8) == 1)
            assert(bit.arshift(-256, 4) == -16)
            -- shift counts wrap into 0..31 instead of faulting
            assert(bit.lshift(1, 33) == 4)
            assert(bit.rshift(256, -24) == 1)
            assert(bit.rol(1, -1) == bit.rol(1, 31))
            assert(bit.bswap(0x12345678) == 0x78563412)
            assert(bit.tohex(255) == "000000ff")
            assert(bit.tohex(255, -4) == "00FF")
        "#;
        lua.load(checks).exec().unwrap();
    }
}
