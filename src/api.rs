//! The `plua` authoring API: reflective operations over bundle containers,
//! exposed to scripts as a global table plus a handle userdata type.
//!
//! Section indices are 1-based at the Lua surface. Out-of-range indices
//! silently produce no results; operations on a closed handle raise.

use std::path::PathBuf;

use mlua::{Function, Lua, Table, UserData, UserDataMethods, Value};

use crate::{
    container::{Container, DataType, Item},
    format::{Characteristics, ConfigFlags},
    native,
    resolver::{self, BundleState, SharedContainer},
};

/// A container owned by the interpreter. The inner option empties on
/// `close`; the userdata finalizer drops whatever is left.
pub struct PluaHandle(pub SharedContainer);

fn closed() -> mlua::Error {
    mlua::Error::RuntimeError("attempt to use a closed file".into())
}

fn with<R>(
    handle: &PluaHandle,
    body: impl FnOnce(&Container) -> mlua::Result<R>,
) -> mlua::Result<R> {
    let guard = handle.0.borrow();
    match guard.as_ref() {
        Some(container) => body(container),
        None => Err(closed()),
    }
}

fn with_mut<R>(
    handle: &PluaHandle,
    body: impl FnOnce(&mut Container) -> mlua::Result<R>,
) -> mlua::Result<R> {
    let mut guard = handle.0.borrow_mut();
    match guard.as_mut() {
        Some(container) => body(container),
        None => Err(closed()),
    }
}

/// 1-based script index to 0-based section index.
fn section_index(container: &Container, n: i64) -> Option<usize> {
    if n >= 1 && n <= i64::from(container.section_count()) {
        Some(n as usize - 1)
    } else {
        log::debug!("section index {n} out of range");
        None
    }
}

fn item_to_value(lua: &Lua, item: Item) -> mlua::Result<Value> {
    Ok(match item {
        Item::Bytes(bytes) => Value::String(lua.create_string(&bytes)?),
        Item::Number(n) => Value::Number(n),
        Item::Int(i) => Value::Integer(i.into()),
    })
}

fn item_from_value(tag: u8, value: Value) -> mlua::Result<Item> {
    match tag {
        1 => match value {
            Value::String(s) => Ok(Item::Bytes(s.as_bytes().to_vec())),
            _ => Err(mlua::Error::RuntimeError("string expected".into())),
        },
        2 => value
            .as_f64()
            .map(Item::Number)
            .ok_or_else(|| mlua::Error::RuntimeError("number expected".into())),
        3 => value
            .as_f64()
            .map(|n| Item::Int(n as i64 as i32))
            .ok_or_else(|| mlua::Error::RuntimeError("number expected".into())),
        other => Err(mlua::Error::external(
            crate::errors::ContainerError::BadDataType(other),
        )),
    }
}

fn read_section(lua: &Lua, container: &Container, n: i64) -> mlua::Result<Option<mlua::String>> {
    let Some(index) = section_index(container, n) else {
        return Ok(None);
    };
    let payload = container.read_all(index).map_err(mlua::Error::external)?;
    Ok(Some(lua.create_string(&payload)?))
}

fn fread_section(
    lua: &Lua,
    container: &mut Container,
    n: i64,
    tag: u8,
    count: u32,
    len: Option<u32>,
) -> mlua::Result<Option<Table>> {
    let Some(index) = section_index(container, n) else {
        return Ok(None);
    };
    let dtype = DataType::from_tag(tag, len).map_err(mlua::Error::external)?;
    let values = container
        .read_values(index, dtype, count)
        .map_err(mlua::Error::external)?;
    let out = lua.create_table()?;
    for (i, item) in values.into_iter().enumerate() {
        out.raw_set(i + 1, item_to_value(lua, item)?)?;
    }
    Ok(Some(out))
}

fn list_table(lua: &Lua, container: &Container) -> mlua::Result<Table> {
    let list = lua.create_table()?;
    for (i, section) in container.sections().iter().enumerate() {
        let entry = lua.create_table()?;
        entry.raw_set(1, section.name.as_str())?;
        entry.raw_set(2, section.size)?;
        entry.raw_set(3, section.characteristics.bits())?;
        list.raw_set(i + 1, entry)?;
    }
    Ok(list)
}

fn getn(container: &Container, name: &str) -> Option<i64> {
    container.find(name).map(|index| index as i64 + 1)
}

/// Load a native section by explicit entry-point name, honoring the
/// container's custom-require config bit.
fn loadlib(
    lua: &Lua,
    container: &Container,
    name: &str,
    init: &str,
) -> mlua::Result<Option<Function>> {
    if !container.config_flags().contains(ConfigFlags::CUSTOM_REQUIRE) {
        return Ok(None);
    }
    let Some(index) = container.find_with(name, Characteristics::NATIVE) else {
        return Ok(None);
    };
    native::load_bundled(lua, container, index, name, init).map(Some)
}

impl UserData for PluaHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("loadlib", |lua, this, (name, init): (String, String)| {
            with(this, |c| loadlib(lua, c, &name, &init))
        });

        methods.add_method("read", |lua, this, n: i64| {
            with(this, |c| read_section(lua, c, n))
        });

        methods.add_method(
            "fread",
            |lua, this, (n, tag, count, len): (i64, u8, u32, Option<u32>)| {
                with_mut(this, |c| fread_section(lua, c, n, tag, count, len))
            },
        );

        methods.add_method("fseek", |_, this, (n, pos, absolute): (i64, i64, bool)| {
            with_mut(this, |c| {
                if let Some(index) = section_index(c, n) {
                    c.seek(index, pos, absolute);
                }
                Ok(())
            })
        });

        methods.add_method("fwrite", |_, this, (n, tag, value): (i64, u8, Value)| {
            with_mut(this, |c| {
                let Some(index) = section_index(c, n) else {
                    return Ok(());
                };
                let item = item_from_value(tag, value)?;
                c.write_value(index, &item).map_err(mlua::Error::external)
            })
        });

        methods.add_method("getn", |_, this, name: String| {
            with(this, |c| Ok(getn(c, &name)))
        });

        methods.add_method("getnofsec", |_, this, ()| {
            with(this, |c| Ok(c.section_count()))
        });

        methods.add_method("getconf", |_, this, ()| with(this, |c| Ok(c.config_word())));

        methods.add_method("setconf", |_, this, value: u32| {
            with_mut(this, |c| {
                c.set_config_word(value).map_err(mlua::Error::external)
            })
        });

        methods.add_method("SetCharacteristics", |_, this, (n, byte): (i64, u8)| {
            with_mut(this, |c| {
                if let Some(index) = section_index(c, n) {
                    c.set_characteristics(index, byte)
                        .map_err(mlua::Error::external)?;
                }
                Ok(())
            })
        });

        methods.add_method("isfile", |_, this, n: i64| {
            with(this, |c| {
                Ok(section_index(c, n).and_then(|index| c.is_file_ref(index)))
            })
        });

        methods.add_method("list", |lua, this, ()| with(this, |c| list_table(lua, c)));

        methods.add_method("setrequire", |lua, this, ()| {
            with(this, |_| Ok(()))?;
            if let Some(mut state) = lua.app_data_mut::<BundleState>() {
                state.require = Some(this.0.clone());
            }
            Ok(())
        });

        methods.add_method("rename", |_, this, (n, name): (i64, String)| {
            with_mut(this, |c| {
                if let Some(index) = section_index(c, n) {
                    c.rename(index, &name).map_err(mlua::Error::external)?;
                }
                Ok(())
            })
        });

        methods.add_method("alloc", |_, this, (n, size): (i64, u32)| {
            with_mut(this, |c| {
                if let Some(index) = section_index(c, n) {
                    c.alloc(index, size);
                }
                Ok(())
            })
        });

        methods.add_method("setfile", |_, this, (n, path): (i64, String)| {
            with_mut(this, |c| {
                if let Some(index) = section_index(c, n) {
                    c.set_file(index, &PathBuf::from(path))
                        .map_err(mlua::Error::external)?;
                }
                Ok(())
            })
        });

        methods.add_method("savefile", |_, this, path: String| {
            with(this, |c| {
                c.save(&PathBuf::from(path)).map_err(mlua::Error::external)
            })
        });

        methods.add_method("close", |_, this, ()| {
            if this.0.borrow_mut().take().is_none() {
                return Err(closed());
            }
            Ok(())
        });
    }
}

/// Register the `plua` table (global and in `package.loaded`).
pub fn open_plua(lua: &Lua) -> mlua::Result<Table> {
    let plua = lua.create_table()?;

    plua.set(
        "loadlib",
        lua.create_function(|lua, (name, init): (String, String)| {
            let Some(bundle) = resolver::active_bundle(lua) else {
                return Ok(None);
            };
            let guard = bundle.borrow();
            match guard.as_ref() {
                Some(container) => loadlib(lua, container, &name, &init),
                None => Ok(None),
            }
        })?,
    )?;

    plua.set(
        "read",
        lua.create_function(|lua, n: i64| {
            let Some(bundle) = resolver::active_bundle(lua) else {
                return Ok(None);
            };
            let guard = bundle.borrow();
            match guard.as_ref() {
                Some(container) => read_section(lua, container, n),
                None => Ok(None),
            }
        })?,
    )?;

    plua.set(
        "getn",
        lua.create_function(|lua, name: String| {
            let Some(bundle) = resolver::active_bundle(lua) else {
                return Ok(None);
            };
            let guard = bundle.borrow();
            Ok(guard.as_ref().and_then(|container| getn(container, &name)))
        })?,
    )?;

    plua.set(
        "list",
        lua.create_function(|lua, ()| {
            let Some(bundle) = resolver::active_bundle(lua) else {
                return Ok(None);
            };
            let guard = bundle.borrow();
            match guard.as_ref() {
                Some(container) => list_table(lua, container).map(Some),
                None => Ok(None),
            }
        })?,
    )?;

    plua.set(
        "fread",
        lua.create_function(|lua, (n, tag, count, len): (i64, u8, u32, Option<u32>)| {
            let Some(bundle) = resolver::active_bundle(lua) else {
                return Ok(None);
            };
            let mut guard = bundle.borrow_mut();
            match guard.as_mut() {
                Some(container) => fread_section(lua, container, n, tag, count, len),
                None => Ok(None),
            }
        })?,
    )?;

    plua.set(
        "load",
        lua.create_function(|_, path: String| {
            match Container::open_path(&PathBuf::from(&path)) {
                Ok(container) => Ok(Some(PluaHandle(resolver::share(container)))),
                Err(err) => {
                    log::debug!("plua.load({path}): {err}");
                    Ok(None)
                }
            }
        })?,
    )?;

    plua.set(
        "new",
        lua.create_function(|_, count: u32| {
            Ok(PluaHandle(resolver::share(Container::new_in_memory(count))))
        })?,
    )?;

    plua.set(
        "resetrequire",
        lua.create_function(|lua, ()| {
            if let Some(mut state) = lua.app_data_mut::<BundleState>() {
                state.require = state.active.clone();
            }
            Ok(())
        })?,
    )?;

    lua.globals().set("plua", &plua)?;
    let package: Table = lua.globals().get("package")?;
    let loaded: Table = package.get("loaded")?;
    loaded.set("plua", &plua)?;
    Ok(plua)
}
