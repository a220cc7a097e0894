//! The require-chain searcher that serves sections out of a bundle, plus the
//! per-interpreter record of which bundle that is.

use std::{cell::RefCell, rc::Rc};

use mlua::{Lua, Table, Value};

use crate::{
    chunk,
    container::Container,
    format::{Characteristics, ConfigFlags},
    native,
};

/// A container shared between the resolver, the authoring API, and the
/// bootstrap. `None` inside means the handle was closed.
pub type SharedContainer = Rc<RefCell<Option<Container>>>;

pub fn share(container: Container) -> SharedContainer {
    Rc::new(RefCell::new(Some(container)))
}

/// Which bundles this interpreter is wired to. `active` is the one parsed
/// from the host executable at startup; `require` is whatever currently
/// serves module lookups and may be retargeted by the authoring API.
#[derive(Default)]
pub struct BundleState {
    pub active: Option<SharedContainer>,
    pub require: Option<SharedContainer>,
}

impl BundleState {
    /// Attach the state to the interpreter, with lookups defaulting to the
    /// active bundle.
    pub fn install(lua: &Lua, active: Option<SharedContainer>) {
        lua.set_app_data(BundleState {
            require: active.clone(),
            active,
        });
    }
}

pub fn active_bundle(lua: &Lua) -> Option<SharedContainer> {
    lua.app_data_ref::<BundleState>()
        .and_then(|state| state.active.clone())
}

pub fn require_bundle(lua: &Lua) -> Option<SharedContainer> {
    lua.app_data_ref::<BundleState>()
        .and_then(|state| state.require.clone())
}

/// Sentinel handed back to the require machinery when the bundle has no
/// matching section; the next loader in the chain runs.
pub const NOT_FOUND: &str = "Not Found";

/// Append the bundle searcher to the interpreter's loader chain.
pub fn install_searcher(lua: &Lua) -> mlua::Result<()> {
    let package: Table = lua.globals().get("package")?;
    let loaders: Table = package.get("loaders")?;
    loaders.push(lua.create_function(search)?)?;
    Ok(())
}

fn search(lua: &Lua, name: mlua::String) -> mlua::Result<Value> {
    let Some(bundle) = require_bundle(lua) else {
        return not_found(lua);
    };
    let guard = bundle.borrow();
    let Some(container) = guard.as_ref() else {
        return not_found(lua);
    };
    // bundle-served require is an opt-in config bit
    if !container.config_flags().contains(ConfigFlags::CUSTOM_REQUIRE) {
        return not_found(lua);
    }
    let name = name.to_str()?;

    for (index, section) in container.sections().iter().enumerate() {
        if section.name != *name {
            continue;
        }
        if section.characteristics.contains(Characteristics::SCRIPT) {
            let payload = container.read_all(index).map_err(mlua::Error::external)?;
            return Ok(Value::Function(chunk::load(lua, &name, &payload)?));
        }
        if section.characteristics.contains(Characteristics::NATIVE) {
            let entry = native::entry_symbol(&name);
            return Ok(Value::Function(native::load_bundled(
                lua, container, index, &name, &entry,
            )?));
        }
        // a matching name without a loadable kind keeps scanning
    }
    not_found(lua)
}

fn not_found(lua: &Lua) -> mlua::Result<Value> {
    Ok(Value::String(lua.create_string(NOT_FOUND)?))
}
