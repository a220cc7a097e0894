//! Script-level exercises of the `plua` authoring API.

use mlua::Lua;
use plua::{api, resolver::BundleState};

fn host() -> (Lua, tempfile::TempDir) {
    let lua = Lua::new();
    BundleState::install(&lua, None);
    api::open_plua(&lua).unwrap();
    (lua, tempfile::tempdir().unwrap())
}

fn set_path(lua: &Lua, dir: &tempfile::TempDir, name: &str) -> String {
    let path = dir.path().join(name).to_str().unwrap().to_owned();
    lua.globals().set("path", path.clone()).unwrap();
    path
}

#[test]
fn scalar_write_read_roundtrip() {
    let (lua, dir) = host();
    set_path(&lua, &dir, "t.bin");
    lua.load(
        r#"
        local h = plua.new(1)
        h:alloc(1, 4)
        h:fwrite(1, 3, 305419896)
        h:savefile(path)
        h:close()
        local g = plua.load(path)
        assert(g ~= nil)
        assert(g:fread(1, 3, 1)[1] == 305419896)
        "#,
    )
    .exec()
    .unwrap();
}

#[test]
fn authoring_roundtrip_preserves_sections() {
    let (lua, dir) = host();
    set_path(&lua, &dir, "rt.bin");
    lua.load(
        r#"
        local h = plua.new(2)
        h:rename(1, "alpha")
        h:alloc(1, 6)
        h:fwrite(1, 1, "hello!")
        h:SetCharacteristics(1, 2)
        h:rename(2, "beta")
        h:alloc(2, 8)
        h:fwrite(2, 2, 0.5)
        h:savefile(path)
        local before = h:list()
        h:close()

        local g = plua.load(path)
        local after = g:list()
        assert(g:getnofsec() == 2)
        for i = 1, 2 do
            for k = 1, 3 do
                assert(before[i][k] == after[i][k])
            end
        end
        assert(g:read(1) == "hello!")
        assert(g:fread(2, 2, 1)[1] == 0.5)
        assert(g:getn("beta") == 2)
        "#,
    )
    .exec()
    .unwrap();
}

#[test]
fn config_word_is_byte_order_independent() {
    let (lua, dir) = host();
    set_path(&lua, &dir, "conf.bin");
    lua.load(
        r#"
        local h = plua.new(1)
        h:setconf(0x12345678)
        assert(h:getconf() == 0x12345678)
        h:savefile(path)
        h:close()
        local g = plua.load(path)
        assert(g:getconf() == 0x12345678)
        "#,
    )
    .exec()
    .unwrap();
}

#[test]
fn alias_sections_share_payload_and_flags() {
    let (lua, dir) = host();
    set_path(&lua, &dir, "alias.bin");
    lua.load(
        r#"
        local h = plua.new(2)
        h:rename(1, "x")
        h:alloc(1, 4)
        h:fwrite(1, 1, "data")
        h:SetCharacteristics(1, 2)
        h:rename(2, "y")
        h:SetCharacteristics(2, 0x10)
        h:savefile(path)
        h:close()

        local g = plua.load(path)
        local list = g:list()
        assert(list[1][1] == "x" and list[2][1] == "y")
        assert(list[1][2] == list[2][2])
        assert(list[1][3] == list[2][3])
        assert(g:read(2) == g:read(1))
        "#,
    )
    .exec()
    .unwrap();
}

#[test]
fn cursors_move_as_directed() {
    let (lua, _dir) = host();
    lua.load(
        r#"
        local h = plua.new(1)
        h:alloc(1, 12)
        h:fwrite(1, 3, 111)
        h:fseek(1, 4, true)
        h:fwrite(1, 3, 222)
        h:fseek(1, 4, false)
        h:fwrite(1, 3, 333)

        h:fseek(1, 0, true)
        local v = h:fread(1, 3, 3)
        assert(v[1] == 111 and v[2] == 222 and v[3] == 333)
        -- the typed read advanced past the section end; nothing is left
        assert(#h:fread(1, 3, 1) == 0)
        "#,
    )
    .exec()
    .unwrap();
}

#[test]
fn reads_stop_at_the_section_end() {
    let (lua, _dir) = host();
    lua.load(
        r#"
        local h = plua.new(1)
        h:alloc(1, 10)
        local v = h:fread(1, 3, 5)
        assert(#v == 2)
        "#,
    )
    .exec()
    .unwrap();
}

#[test]
fn closed_handles_refuse_every_operation() {
    let (lua, _dir) = host();
    lua.load(
        r#"
        local h = plua.new(1)
        h:alloc(1, 4)
        h:close()
        local probes = {
            function() return h:read(1) end,
            function() return h:fread(1, 3, 1) end,
            function() return h:getnofsec() end,
            function() return h:getconf() end,
            function() h:setconf(0) end,
            function() h:rename(1, "z") end,
            function() h:savefile("nowhere.bin") end,
            function() h:close() end,
        }
        for _, probe in ipairs(probes) do
            local ok, err = pcall(probe)
            assert(not ok)
            assert(tostring(err):find("closed", 1, true))
        end
        "#,
    )
    .exec()
    .unwrap();
}

#[test]
fn out_of_range_indices_yield_nothing() {
    let (lua, _dir) = host();
    lua.load(
        r#"
        local h = plua.new(2)
        h:alloc(1, 4)
        assert(h:read(0) == nil)
        assert(h:read(3) == nil)
        assert(h:fread(9, 3, 1) == nil)
        assert(h:isfile(0) == nil)
        "#,
    )
    .exec()
    .unwrap();
}

#[test]
fn bundle_level_calls_without_an_active_bundle_return_nothing() {
    let (lua, _dir) = host();
    lua.load(
        r#"
        assert(plua.read(1) == nil)
        assert(plua.getn("anything") == nil)
        assert(plua.list() == nil)
        assert(plua.fread(1, 3, 1) == nil)
        "#,
    )
    .exec()
    .unwrap();
}

#[test]
fn load_rejects_files_without_the_signature() {
    let (lua, dir) = host();
    let path = set_path(&lua, &dir, "junk.bin");
    std::fs::write(&path, b"no signature here").unwrap();
    lua.load("assert(plua.load(path) == nil)").exec().unwrap();
}

#[test]
fn sections_can_be_sourced_from_files() {
    let (lua, dir) = host();
    let payload = dir.path().join("payload.dat");
    std::fs::write(&payload, b"0123456789").unwrap();
    lua.globals()
        .set("payload", payload.to_str().unwrap())
        .unwrap();
    set_path(&lua, &dir, "withfile.bin");
    lua.load(
        r#"
        local h = plua.new(1)
        h:rename(1, "blob")
        h:setfile(1, payload)
        assert(h:isfile(1) == true)
        assert(h:list()[1][2] == 10)
        h:savefile(path)
        h:close()
        local g = plua.load(path)
        assert(g:read(1) == "0123456789")
        "#,
    )
    .exec()
    .unwrap();
}
