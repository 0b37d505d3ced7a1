use crate::error::SyncError;
use crate::session::{Session, Status};
use pmuc_shared::{UpsMode, INPUT_STEP, PORT_LABELS, WATCHDOG_LABELS};
use std::fmt::Write as _;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

const HELP: &str = "\
commands:
  status [json]            show telemetry, ports, mode and parameters
  edit <name> [text]       type into a parameter field (not written)
  commit <name>            write the field's current text to the device
  set <name> <value>       write a value directly
  toggle <port>            flip whether a port stays powered (0-3)
  mode <bypass|supercapacitor|battery>
  watchdog <regular|forced>
  help
  quit";

/// One line typed on the local console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Status { json: bool },
    Edit { name: String, text: String },
    Commit { name: String },
    Set { name: String, value: f64 },
    Toggle(usize),
    Mode(UpsMode),
    Watchdog { forced: bool },
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let name = |i: usize| {
            words
                .get(i)
                .map(|s| s.to_string())
                .ok_or_else(|| "missing parameter name".to_string())
        };

        match words.as_slice() {
            ["status"] => Ok(ConsoleCommand::Status { json: false }),
            ["status", "json"] => Ok(ConsoleCommand::Status { json: true }),
            ["edit", _] => Ok(ConsoleCommand::Edit {
                name: name(1)?,
                text: String::new(),
            }),
            ["edit", _, text] => Ok(ConsoleCommand::Edit {
                name: name(1)?,
                text: text.to_string(),
            }),
            ["commit", _] => Ok(ConsoleCommand::Commit { name: name(1)? }),
            ["set", _, value] => Ok(ConsoleCommand::Set {
                name: name(1)?,
                value: value
                    .parse::<f64>()
                    .map_err(|_| format!("{value:?} is not a number"))?,
            }),
            ["toggle", port] => port
                .parse::<usize>()
                .map(ConsoleCommand::Toggle)
                .map_err(|_| format!("{port:?} is not a port number")),
            ["mode", mode] => parse_mode(mode).map(ConsoleCommand::Mode),
            ["watchdog", "regular"] => Ok(ConsoleCommand::Watchdog { forced: false }),
            ["watchdog", "forced"] => Ok(ConsoleCommand::Watchdog { forced: true }),
            ["help"] | ["?"] => Ok(ConsoleCommand::Help),
            ["quit"] | ["exit"] => Ok(ConsoleCommand::Quit),
            [] => Err("empty command".to_string()),
            _ => Err(format!("unrecognized command {line:?}, try `help`")),
        }
    }
}

fn parse_mode(word: &str) -> Result<UpsMode, String> {
    match word {
        "bypass" | "0" => Ok(UpsMode::Bypass),
        "supercapacitor" | "ups" | "16" => Ok(UpsMode::Supercapacitor),
        "battery" | "32" => Ok(UpsMode::Battery),
        other => Err(format!("unknown mode {other:?}")),
    }
}

/// Run one command against the session and return what to print.
pub fn execute(session: &Session, command: &ConsoleCommand) -> Result<String, SyncError> {
    match command {
        ConsoleCommand::Status { json: false } => Ok(render_status(&session.snapshot())),
        ConsoleCommand::Status { json: true } => {
            Ok(serde_json::to_string_pretty(&session.snapshot())?)
        }
        ConsoleCommand::Edit { name, text } => {
            session.parameter(name)?.on_user_input(text)?;
            Ok(format!("{name}: draft {text:?}"))
        }
        ConsoleCommand::Commit { name } => {
            let raw = session.parameter(name)?.commit_draft()?;
            Ok(format!("{name}: wrote {raw}"))
        }
        ConsoleCommand::Set { name, value } => {
            let raw = session.parameter(name)?.commit(*value)?;
            Ok(format!("{name}: wrote {raw}"))
        }
        ConsoleCommand::Toggle(port) => {
            let byte = session.ports().toggle(*port)?;
            Ok(format!("port_poweroff: wrote {byte}"))
        }
        ConsoleCommand::Mode(mode) => {
            let byte = session.mode().select_mode(*mode)?;
            Ok(format!("program_version: wrote {byte}"))
        }
        ConsoleCommand::Watchdog { forced } => {
            let byte = session.mode().set_forced(*forced)?;
            Ok(format!("program_version: wrote {byte}"))
        }
        ConsoleCommand::Help => {
            let names: Vec<&str> = session.parameters().iter().map(|p| p.name()).collect();
            Ok(format!("{HELP}\nparameters: {}", names.join(", ")))
        }
        ConsoleCommand::Quit => Ok(String::new()),
    }
}

fn render_status(status: &Status) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Firmware release   {}", status.firmware_version);

    match (&status.telemetry, status.telemetry_active) {
        (Some(t), _) => {
            let _ = writeln!(out, "Power supply       {:.1} V", t.power_voltage);
            let _ = writeln!(out, "Capacitor/Battery  {:.1} V", t.capacitor_voltage);
            let _ = writeln!(out, "Regulator input    {:.1} V", t.switching_voltage);
            let _ = writeln!(out, "PMUc temperature   {:.1} °C", t.pmuc_temperature);
        }
        (None, true) => {
            let _ = writeln!(out, "Telemetry          waiting");
        }
        (None, false) => {
            let _ = writeln!(out, "Telemetry          N/A");
        }
    }

    match &status.mode {
        Some(flag) => {
            let _ = writeln!(out, "UPS behaviour      {}", flag.mode.label());
            let _ = writeln!(out, "Watchdog           {}", WATCHDOG_LABELS[usize::from(flag.forced)]);
        }
        None => {
            let _ = writeln!(out, "UPS behaviour      unknown");
        }
    }

    if let Some(ports) = &status.ports {
        for (i, label) in PORT_LABELS.iter().enumerate().rev() {
            let mark = if ports.off[i] { ' ' } else { 'x' };
            let _ = writeln!(out, "[{mark}] {i} {label}");
        }
    }

    for p in &status.parameters {
        let committed = p
            .state
            .committed
            .map(|v| v.to_string())
            .unwrap_or_else(|| "?".to_string());
        let pending = match p.state.draft.parse::<f64>() {
            Ok(v) if Some(v) == p.state.committed => "",
            _ if p.state.draft.is_empty() => "",
            _ => " (edited)",
        };
        let _ = write!(
            out,
            "{:<24} {:>8}  draft {:?}{pending}  [{}]",
            p.label, committed, p.state.draft, p.name
        );
        if !p.presets.is_empty() {
            let presets: Vec<String> = p.presets.iter().map(f64::to_string).collect();
            let _ = write!(out, "  presets {}", presets.join(", "));
        }
        out.push('\n');
    }
    let _ = write!(out, "step {INPUT_STEP}");
    out
}

/// Read commands from stdin until `quit`, end of input, or Ctrl-C.
pub async fn run(mut session: Session) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{HELP}\n").as_bytes()).await?;

    loop {
        stdout.write_all(b"pmuc> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => match execute(&session, &command) {
                Ok(text) => text,
                Err(e) => format!("error: {e}"),
            },
            Err(e) => format!("error: {e}"),
        };
        stdout.write_all(format!("{reply}\n").as_bytes()).await?;
    }

    session.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{MemoryResource, Resource};
    use crate::session::DeviceResources;
    use crate::telemetry_task::ScriptCommand;
    use pmuc_shared::default_parameters;
    use std::sync::Arc;
    use std::time::Duration;

    fn parse(line: &str) -> ConsoleCommand {
        line.parse().unwrap()
    }

    #[test]
    fn parses_every_command() {
        assert_eq!(parse("status"), ConsoleCommand::Status { json: false });
        assert_eq!(parse("status json"), ConsoleCommand::Status { json: true });
        assert_eq!(
            parse("edit power_voltage_min 11."),
            ConsoleCommand::Edit {
                name: "power_voltage_min".into(),
                text: "11.".into()
            }
        );
        assert_eq!(
            parse("edit power_voltage_min"),
            ConsoleCommand::Edit {
                name: "power_voltage_min".into(),
                text: String::new()
            }
        );
        assert_eq!(
            parse("commit switching_timeout"),
            ConsoleCommand::Commit {
                name: "switching_timeout".into()
            }
        );
        assert_eq!(
            parse("set battery_voltage_min 11.5"),
            ConsoleCommand::Set {
                name: "battery_voltage_min".into(),
                value: 11.5
            }
        );
        assert_eq!(parse("  toggle 3 "), ConsoleCommand::Toggle(3));
        assert_eq!(parse("mode battery"), ConsoleCommand::Mode(UpsMode::Battery));
        assert_eq!(parse("mode 16"), ConsoleCommand::Mode(UpsMode::Supercapacitor));
        assert_eq!(parse("watchdog forced"), ConsoleCommand::Watchdog { forced: true });
        assert_eq!(parse("quit"), ConsoleCommand::Quit);
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in ["", "toggle", "toggle x", "set a b", "mode 48", "watchdog maybe", "launch"] {
            assert!(line.parse::<ConsoleCommand>().is_err(), "{line:?}");
        }
    }

    #[tokio::test]
    async fn executes_against_a_session() {
        let ports = MemoryResource::with_contents("port_poweroff", "7");
        let mode = MemoryResource::with_contents("program_version", "17");
        let timeout_attr = MemoryResource::with_contents("switching_timeout", "300");
        let parameters = default_parameters()
            .into_iter()
            .map(|p| {
                let resource: Arc<dyn Resource> = if p.name == "switching_timeout" {
                    timeout_attr.clone()
                } else {
                    MemoryResource::new(&p.name)
                };
                (p, resource)
            })
            .collect();
        let session = Session::open(DeviceResources {
            firmware: MemoryResource::with_contents("firmware_release", "01-02-03"),
            ports: ports.clone(),
            mode: mode.clone(),
            parameters,
            telemetry: ScriptCommand::shell("sleep 30".to_string()),
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        execute(&session, &parse("toggle 3")).unwrap();
        assert_eq!(ports.writes(), vec!["15"]);

        execute(&session, &parse("mode battery")).unwrap();
        execute(&session, &parse("watchdog regular")).unwrap();
        assert_eq!(mode.writes(), vec!["33", "16"]);

        execute(&session, &parse("edit switching_timeout 45")).unwrap();
        execute(&session, &parse("commit switching_timeout")).unwrap();
        assert_eq!(timeout_attr.writes(), vec!["450"]);

        let err = execute(&session, &parse("set switching_timeout 5")).unwrap_err();
        assert!(matches!(err, SyncError::OutOfRange { .. }));

        let status = execute(&session, &parse("status")).unwrap();
        assert!(status.contains("Supercapacitor"));
        assert!(status.contains("Shutdown timeout"));
        assert!(status.contains("(edited)"));

        let json = execute(&session, &parse("status json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(json["mode"]["mode"], "supercapacitor");
        assert_eq!(json["ports"]["off"][3], false);

        let help = execute(&session, &parse("help")).unwrap();
        assert!(help.contains("battery_voltage_min"));
    }
}
