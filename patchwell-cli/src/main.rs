use std::fs::File;
use std::path::Path;
use std::process::ExitCode;

use patchwell_core::config::Config;
use patchwell_core::import::load_sysex_file;
use patchwell_core::midi::MidiController;
use patchwell_types::MidiMessage;

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("patchwell")
        .join("patchwell.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file_logger: Option<Box<dyn SharedLogger>> = File::create(&log_path)
        .ok()
        .map(|file| WriteLogger::new(log_level, simplelog::Config::default(), file) as Box<dyn SharedLogger>);
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        log_level,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    loggers.extend(file_logger);

    if CombinedLogger::init(loggers).is_err() {
        eprintln!("patchwell: logger already initialized");
    }

    log::info!("patchwell starting (log level: {:?})", log_level);
}

fn usage() {
    eprintln!("usage: patchwell [--verbose] <command>");
    eprintln!();
    eprintln!("commands:");
    eprintln!("  ports                  list MIDI input and output ports");
    eprintln!("  inspect <file.syx>...  show the sysex messages in each file");
}

fn list_ports(config: &Config) -> ExitCode {
    let controller = MidiController::new(config.client_name());
    let inputs = controller.list_input_ports();
    let outputs = controller.list_output_ports();

    let mut ok = true;
    for (label, ports) in [("inputs", inputs), ("outputs", outputs)] {
        match ports {
            Ok(ports) => {
                println!("{}:", label);
                if ports.is_empty() {
                    println!("  (none)");
                }
                for port in ports {
                    println!("  {:>2}  {}", port.index, port.name);
                }
            }
            Err(e) => {
                log::error!(target: "midi", "cannot list {}: {}", label, e);
                eprintln!("patchwell: cannot list {}: {}", label, e);
                ok = false;
            }
        }
    }
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn describe(message: &MidiMessage) -> String {
    let head: Vec<String> = message
        .bytes()
        .iter()
        .take(6)
        .map(|b| format!("{:02X}", b))
        .collect();
    let ellipsis = if message.len() > 6 { " .." } else { "" };
    format!("{:>6} bytes  {}{}", message.len(), head.join(" "), ellipsis)
}

fn inspect(paths: &[String]) -> ExitCode {
    if paths.is_empty() {
        usage();
        return ExitCode::FAILURE;
    }
    let mut ok = true;
    for path in paths {
        match load_sysex_file(Path::new(path)) {
            Ok(messages) => {
                let total: usize = messages.iter().map(MidiMessage::len).sum();
                println!("{}: {} messages, {} bytes", path, messages.len(), total);
                for (i, message) in messages.iter().enumerate() {
                    println!("  {:>4}  {}", i, describe(message));
                }
            }
            Err(e) => {
                eprintln!("patchwell: {}: {}", path, e);
                ok = false;
            }
        }
    }
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    init_logging(verbose);

    let rest: Vec<String> = args
        .into_iter()
        .filter(|a| a != "--verbose" && a != "-v")
        .collect();
    let config = Config::load();

    match rest.first().map(String::as_str) {
        Some("ports") => list_ports(&config),
        Some("inspect") => inspect(&rest[1..]),
        _ => {
            usage();
            ExitCode::FAILURE
        }
    }
}
