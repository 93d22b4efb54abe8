use clap::{Arg, ArgMatches, Command};
use log::info;

use crate::config::Config;
use crate::protocol::{self, ReplyFrame};
use crate::utils::error::GatewayError;

pub fn build_cli() -> Command {
    Command::new("lora-modbus-gateway")
        .version(crate::VERSION)
        .about("Executes Modbus-TCP requests received over a LoRa mesh")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("bind")
                .long("bind")
                .value_name("ADDR")
                .help("UDP address of the mesh radio bridge socket"),
        )
        .arg(
            Arg::new("node-address")
                .long("node-address")
                .value_name("ADDR")
                .help("Mesh address of this gateway (decimal or 0x..)"),
        )
        .arg(
            Arg::new("central-address")
                .long("central-address")
                .value_name("ADDR")
                .help("Mesh address of the central controller"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("Log filter when RUST_LOG is not set"),
        )
        .subcommand(Command::new("run").about("Serve mesh requests until Ctrl+C (default)"))
        .subcommand(
            Command::new("init-config")
                .about("Write the default configuration")
                .arg(Arg::new("path").required(true).value_name("FILE")),
        )
        .subcommand(
            Command::new("decode")
                .about("Decode a request frame without contacting any device")
                .arg(Arg::new("frame").required(true).value_name("FRAME")),
        )
}

/// Handle one-shot subcommands. Returns `Ok(true)` when the process should exit
/// instead of starting the gateway. Neither command reads the configuration.
pub fn handle_subcommands(matches: &ArgMatches) -> Result<bool, GatewayError> {
    if let Some(matches) = matches.subcommand_matches("init-config") {
        let path = required(matches, "path")?;
        Config::default().save_to_file(path)?;
        info!("📝 Default configuration written to {}", path);
        println!("✅ Configuration written to {}", path);
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("decode") {
        let frame = required(matches, "frame")?;
        println!("{}", decode_frame(frame));
        return Ok(true);
    }

    Ok(false)
}

/// Describe what the gateway would do with `frame`, or the reply it would send.
pub fn decode_frame(frame: &str) -> String {
    // Shells make a trailing newline awkward to type; accept a literal "\n" too.
    let raw = frame.strip_suffix("\\n").unwrap_or(frame);
    match protocol::parse_request(raw.as_bytes(), raw.len()) {
        Ok(request) => format!("✅ {}\n{:#?}", request, request.payload),
        Err(GatewayError::NotAFrame) => "⏭️  Not a gateway frame (ignored, no reply)".to_string(),
        Err(e) => format!(
            "❌ {}\n   reply: {}",
            e,
            String::from_utf8_lossy(ReplyFrame::error().as_bytes())
        ),
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a String, GatewayError> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| GatewayError::ConfigError(format!("missing argument <{}>", name)))
}
