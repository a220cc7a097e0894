use std::process::ExitCode;

fn main() -> ExitCode {
    let _ = stderrlog::new()
        .verbosity(log::Level::Warn)
        .show_module_names(false)
        .init();
    plua::bootstrap::run()
}
