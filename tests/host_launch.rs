//! End-to-end launches of the host binary with archives appended to a copy
//! of it.

use std::process::Command;

use plua::{
    container::{Container, Item},
    format::Characteristics,
};

fn host_copy(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let copy = dir.path().join("host");
    std::fs::copy(env!("CARGO_BIN_EXE_plua"), &copy).unwrap();
    copy
}

fn append(path: &std::path::Path, bytes: &[u8]) {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

fn archive_bytes(
    dir: &tempfile::TempDir,
    config: u32,
    defs: &[(&str, Characteristics, &[u8])],
) -> Vec<u8> {
    let path = dir.path().join("archive.bin");
    let mut c = Container::new_in_memory(defs.len() as u32);
    for (i, (name, flags, payload)) in defs.iter().enumerate() {
        c.rename(i, name).unwrap();
        c.set_characteristics(i, flags.bits()).unwrap();
        if !payload.is_empty() {
            c.alloc(i, payload.len() as u32);
            c.write_value(i, &Item::Bytes(payload.to_vec())).unwrap();
        }
    }
    c.set_config_word(config).unwrap();
    c.save(&path).unwrap();
    std::fs::read(&path).unwrap()
}

fn launch(path: &std::path::Path, args: &[&str]) -> std::process::Output {
    Command::new(path)
        .args(args)
        .env_remove("PLUA_INIT")
        .output()
        .unwrap()
}

#[test]
fn auto_sections_run_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let host = host_copy(&dir);
    let archive = archive_bytes(
        &dir,
        0x01,
        &[(
            "main",
            Characteristics::SCRIPT | Characteristics::AUTO,
            b"print(\"hi\")\n",
        )],
    );
    append(&host, &archive);

    let out = launch(&host, &[]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"hi\n");
}

#[test]
fn bundled_require_links_sections_together() {
    let dir = tempfile::tempdir().unwrap();
    let host = host_copy(&dir);
    let archive = archive_bytes(
        &dir,
        0x09,
        &[
            ("a", Characteristics::SCRIPT, b"return 42"),
            (
                "b",
                Characteristics::SCRIPT | Characteristics::AUTO,
                b"assert(require(\"a\")*2 == 84)",
            ),
        ],
    );
    append(&host, &archive);

    let out = launch(&host, &[]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(out.stdout.is_empty());
}

#[test]
fn auto_sections_see_the_command_line() {
    let dir = tempfile::tempdir().unwrap();
    let host = host_copy(&dir);
    let archive = archive_bytes(
        &dir,
        0x01,
        &[(
            "main",
            Characteristics::SCRIPT | Characteristics::AUTO,
            b"local first = ...\nprint(first, arg[1], arg[2])\n",
        )],
    );
    append(&host, &archive);

    let out = launch(&host, &["alpha", "beta"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"alpha\talpha\tbeta\n");
}

#[test]
fn autos_can_be_disabled_by_config() {
    let dir = tempfile::tempdir().unwrap();
    let host = host_copy(&dir);
    // RUN_AUTOS unset: the bundle parses but control falls back to the CLI
    let archive = archive_bytes(
        &dir,
        0x00,
        &[(
            "main",
            Characteristics::SCRIPT | Characteristics::AUTO,
            b"print(\"never\")\n",
        )],
    );
    append(&host, &archive);

    let out = launch(&host, &["-e", "print('cli')"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"cli\n");
}

#[test]
fn a_raw_tail_runs_as_an_anonymous_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let host = host_copy(&dir);
    append(&host, b"print(\"tail\", arg[1])\n");

    let out = launch(&host, &["one"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"tail\tone\n");
}

#[test]
fn a_bare_host_falls_back_to_the_stock_cli() {
    let dir = tempfile::tempdir().unwrap();
    let host = host_copy(&dir);

    let out = launch(&host, &["-e", "print(1+1)"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"2\n");

    // failures surface as a non-zero exit
    let out = launch(&host, &["-e", "error('boom')"]);
    assert!(!out.status.success());
}

#[test]
fn scripts_get_their_arguments_and_arg_table() {
    let dir = tempfile::tempdir().unwrap();
    let host = host_copy(&dir);
    let script = dir.path().join("s.lua");
    std::fs::write(&script, b"local a = ...\nprint(a, arg[0] ~= nil, arg[1])\n").unwrap();

    let out = launch(&host, &[script.to_str().unwrap(), "w"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"w\ttrue\tw\n");
}

#[test]
fn the_authoring_api_is_gated_by_config() {
    let dir = tempfile::tempdir().unwrap();

    // without the bit, an auto section sees no plua global
    let host = host_copy(&dir);
    let archive = archive_bytes(
        &dir,
        0x01,
        &[(
            "main",
            Characteristics::SCRIPT | Characteristics::AUTO,
            b"print(plua == nil)\n",
        )],
    );
    append(&host, &archive);
    let out = launch(&host, &[]);
    assert_eq!(out.stdout, b"true\n");

    // with AUTHORING_API set, the bundle can read itself
    let host = host_copy(&dir);
    let archive = archive_bytes(
        &dir,
        0x03,
        &[(
            "main",
            Characteristics::SCRIPT | Characteristics::AUTO,
            b"print(plua.getn(\"main\"))\n",
        )],
    );
    append(&host, &archive);
    let out = launch(&host, &[]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"1\n");
}

#[test]
fn the_bit_library_is_gated_by_config() {
    let dir = tempfile::tempdir().unwrap();
    let host = host_copy(&dir);
    let archive = archive_bytes(
        &dir,
        0x05,
        &[(
            "main",
            Characteristics::SCRIPT | Characteristics::AUTO,
            b"print(bit.bor(1, 2, 4))\n",
        )],
    );
    append(&host, &archive);
    let out = launch(&host, &[]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"7\n");
}
