//! In-memory loading of native module sections.
//!
//! Shared-library sections are never extracted to disk: the image bytes are
//! copied into an anonymous in-memory file and the dynamic loader maps them
//! from `/proc/self/fd`. Before mapping, the image's import table is walked
//! and each dependency is resolved the way the original host's loader hooks
//! did: names reserved for the interpreter map to the running executable,
//! names matching an in-memory-dependency section load recursively through
//! the same path, and everything else falls back to the system loader.

use libloading::os::unix::Library;
use mlua::{AnyUserData, Function, Lua, UserData};

use crate::{
    container::Container,
    errors::NativeLoadError,
    format::Characteristics,
};

/// Import names that resolve to the host interpreter's own exports.
pub const RESERVED_HOST_NAMES: &[&str] = &[
    "lua51.dll",
    "lua5.1.dll",
    "liblua5.1.so",
    "liblua5.1.so.0",
    "liblua.so",
];

/// Character separating an ignored prefix from the module name proper.
const IGNORE_MARK: char = '-';

const REGISTRY_PREFIX: &str = "LOADLIB: ";

/// `luaopen_<name>` with the ignore-mark prefix dropped and dots flattened.
pub fn entry_symbol(module: &str) -> String {
    let tail = module.split_once(IGNORE_MARK).map_or(module, |(_, t)| t);
    format!("luaopen_{}", tail.replace('.', "_"))
}

/// A resolved library, tagged by how it was obtained so symbol lookup and
/// unload dispatch the right way.
#[derive(Debug)]
pub enum ModuleHandle {
    /// The running executable; unloading is a no-op.
    Host,
    /// Mapped straight from container bytes, keeping its resolved imports
    /// alive for as long as it is.
    Memory {
        lib: Library,
        #[allow(dead_code)]
        deps: Vec<ModuleHandle>,
    },
    /// Resolved by the system loader.
    Os(Library),
}

impl ModuleHandle {
    /// Look up a `lua_CFunction` entry point in this module.
    fn entry(&self, name: &str, symbol: &str) -> Result<mlua::ffi::lua_CFunction, NativeLoadError> {
        let mut owned = Vec::with_capacity(symbol.len() + 1);
        owned.extend_from_slice(symbol.as_bytes());
        owned.push(0);
        let lookup = |lib: &Library| unsafe {
            lib.get::<mlua::ffi::lua_CFunction>(&owned)
                .map(|s| *s)
                .map_err(|_| NativeLoadError::SymbolMissing {
                    name: name.to_owned(),
                    symbol: symbol.to_owned(),
                })
        };
        match self {
            ModuleHandle::Host => lookup(&Library::this()),
            ModuleHandle::Memory { lib, .. } => lookup(lib),
            ModuleHandle::Os(lib) => lookup(lib),
        }
    }
}

/// Resolve one import by name against the host, the container, or the OS.
fn resolve_import(name: &str, container: &Container) -> Result<ModuleHandle, NativeLoadError> {
    if RESERVED_HOST_NAMES.contains(&name) {
        return Ok(ModuleHandle::Host);
    }
    if let Some(index) = container.find_with(name, Characteristics::MEM_DEP) {
        let image = container.read_all(index)?;
        return load_image(name, &image, container);
    }
    let lib = unsafe { Library::open(Some(name), libloading::os::unix::RTLD_NOW) }.map_err(
        |source| NativeLoadError::Load {
            name: name.to_owned(),
            source,
        },
    )?;
    Ok(ModuleHandle::Os(lib))
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        /// Map a shared-object image without touching disk: resolve its
        /// import table first, then let the dynamic loader map the image
        /// from an anonymous in-memory file.
        fn load_image(
            name: &str,
            image: &[u8],
            container: &Container,
        ) -> Result<ModuleHandle, NativeLoadError> {
            use std::io::Write;
            use std::os::fd::{AsRawFd, FromRawFd};

            let elf = goblin::elf::Elf::parse(image)?;
            let mut deps = Vec::new();
            for needed in &elf.libraries {
                deps.push(resolve_import(needed, container)?);
            }

            let label = std::ffi::CString::new(name)
                .map_err(|_| NativeLoadError::Map(std::io::ErrorKind::InvalidInput.into()))?;
            let fd = unsafe { libc::memfd_create(label.as_ptr(), libc::MFD_CLOEXEC) };
            if fd < 0 {
                return Err(NativeLoadError::Map(std::io::Error::last_os_error()));
            }
            let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
            file.write_all(image).map_err(NativeLoadError::Map)?;

            let path = format!("/proc/self/fd/{}", file.as_raw_fd());
            let lib = unsafe {
                Library::open(
                    Some(&path),
                    libloading::os::unix::RTLD_NOW | libloading::os::unix::RTLD_GLOBAL,
                )
            }
            .map_err(|source| NativeLoadError::Load {
                name: name.to_owned(),
                source,
            })?;
            Ok(ModuleHandle::Memory { lib, deps })
        }
    } else {
        fn load_image(
            _name: &str,
            _image: &[u8],
            _container: &Container,
        ) -> Result<ModuleHandle, NativeLoadError> {
            Err(NativeLoadError::Unsupported)
        }
    }
}

/// A cached native module, owned by the interpreter registry. Dropping it
/// unloads whatever the tag says needs unloading.
struct LoadedModule(ModuleHandle);

impl UserData for LoadedModule {}

/// Load native section `index` of `container` and return its entry function.
///
/// Modules are cached in the registry under `"LOADLIB: <name>"`; repeat
/// requests reuse the mapped image.
pub fn load_bundled(
    lua: &Lua,
    container: &Container,
    index: usize,
    name: &str,
    entry: &str,
) -> mlua::Result<Function> {
    let key = format!("{REGISTRY_PREFIX}{name}");
    let cached: Option<AnyUserData> = lua.named_registry_value(&key)?;
    let module = match cached {
        Some(ud) => ud,
        None => {
            let image = container.read_all(index).map_err(mlua::Error::external)?;
            let handle = load_image(name, &image, container).map_err(mlua::Error::external)?;
            let ud = lua.create_userdata(LoadedModule(handle))?;
            lua.set_named_registry_value(&key, &ud)?;
            ud
        }
    };
    let entry_fn = {
        let loaded = module.borrow::<LoadedModule>()?;
        loaded
            .0
            .entry(name, entry)
            .map_err(mlua::Error::external)?
    };
    unsafe { lua.create_c_function(entry_fn) }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entry_symbols_follow_the_luaopen_rule() {
        assert_eq!(entry_symbol("socket"), "luaopen_socket");
        assert_eq!(entry_symbol("socket.core"), "luaopen_socket_core");
        assert_eq!(entry_symbol("prefix-mod.sub"), "luaopen_mod_sub");
    }

    #[test]
    fn reserved_names_map_to_the_host() {
        let container = Container::new_in_memory(0);
        let handle = resolve_import("lua5.1.dll", &container).unwrap();
        assert!(matches!(handle, ModuleHandle::Host));
    }

    #[test]
    fn unknown_imports_fall_through_to_the_os_loader() {
        let container = Container::new_in_memory(0);
        // libc is always resolvable through the system loader
        let handle = resolve_import("libc.so.6", &container).unwrap();
        assert!(matches!(handle, ModuleHandle::Os(_)));
    }
}
