//! Main application entry point (native).

use oroute_app::{Script, ScriptError};
use std::io::Read;
use std::process::ExitCode;

fn usage() -> ExitCode {
    eprintln!("Usage: oroute <script.json | ->");
    ExitCode::from(2)
}

fn read_script(arg: &str) -> Result<Script, ScriptError> {
    let json = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(arg)?
    };
    Script::from_json(&json)
}

fn main() -> ExitCode {
    env_logger::init();
    log::info!("Starting O-Route");

    let mut args = std::env::args().skip(1);
    let (Some(arg), None) = (args.next(), args.next()) else {
        return usage();
    };

    let result = read_script(&arg).and_then(|script| oroute_app::run(&script));
    match result.and_then(|outcome| Ok(serde_json::to_string_pretty(&outcome)?)) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Script failed: {}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
