//! GEMDOS CLI - Drive a host-mounted GEMDOS drive from the command line.
//!
//! Usage:
//!   gemdos [--root DIR] [--drive X=DIR]... [--config FILE] [-- command args]
//!
//! Examples:
//!   gemdos --root ~/st                  # Mount ~/st as C: and start a shell
//!   gemdos --drive D=/srv/games         # Mount on another letter
//!   gemdos --config gemdos.json         # Drives from a config file
//!   gemdos --root ~/st -- dir *.PRG     # Run one command and exit
//!
//! Every command is issued as the GEMDOS calls a program would make, so the
//! shell shows exactly what the guest would see.

use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc;

use clap::Parser;
use crossterm::style::Stylize;
use crossterm::tty::IsTty;
use log::LevelFilter;
use tokio::io::{AsyncBufReadExt, BufReader};

use gemdos_core::error::code;
use gemdos_core::{load_config_from_path, CallOutcome, GemdosConfig, GuestHarness};

/// GEMDOS host drive shell
#[derive(Parser, Debug)]
#[command(name = "gemdos")]
#[command(about = "Exercise a GEMDOS host drive")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host directory to mount as C:
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Extra drive as LETTER=DIR (repeatable)
    #[arg(short, long = "drive", value_parser = parse_drive)]
    drives: Vec<(char, PathBuf)>,

    /// Trace every intercepted call
    #[arg(short, long)]
    trace: bool,

    /// Command and arguments to run (instead of the shell)
    #[arg(last = true)]
    command: Vec<String>,
}

fn parse_drive(s: &str) -> Result<(char, PathBuf), String> {
    let (letter, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected LETTER=DIR, got {}", s))?;
    let mut chars = letter.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Ok((c.to_ascii_uppercase(), path.into())),
        _ => Err(format!("bad drive letter: {}", letter)),
    }
}

fn build_config(args: &Args) -> Result<GemdosConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => load_config_from_path(path)?,
        None => GemdosConfig::default(),
    };
    if let Some(root) = &args.root {
        config.drives.push(gemdos_core::DriveConfig {
            letter: 'C',
            path: root.clone(),
        });
    }
    for (letter, path) in &args.drives {
        config.drives.push(gemdos_core::DriveConfig {
            letter: *letter,
            path: path.clone(),
        });
    }
    config.validate()?;
    Ok(config)
}

/// Shell state around the harness.
struct Shell {
    harness: GuestHarness,
}

/// A command's verdict: what to print, or the guest error it hit.
type Reply = Result<String, String>;

fn guest_error(outcome: CallOutcome) -> String {
    match outcome {
        CallOutcome::Handled(d0) => format!("{} ({})", code::name(d0), d0),
        CallOutcome::NotHandled => "not an emulated drive".to_string(),
        CallOutcome::HandledWithRedirect => "redirected".to_string(),
    }
}

/// Unwrap a handled call's non-negative result.
fn ok(outcome: CallOutcome) -> Result<i32, String> {
    match outcome {
        CallOutcome::Handled(d0) if d0 >= 0 => Ok(d0),
        other => Err(guest_error(other)),
    }
}

fn attrib_flags(attr: u8) -> String {
    let flags = [(0x10, 'd'), (0x01, 'r'), (0x02, 'h'), (0x04, 's'), (0x20, 'a')];
    flags
        .iter()
        .map(|&(bit, c)| if attr & bit != 0 { c } else { '-' })
        .collect()
}

impl Shell {
    fn cwd(&mut self) -> String {
        let drive = (b'A' + self.harness.emulator().current_drive() as u8) as char;
        let path = self.harness.dgetpath(0).1;
        if path.is_empty() {
            format!("{}:\\", drive)
        } else {
            format!("{}:{}", drive, path)
        }
    }

    fn prompt(&mut self) -> String {
        format!("{}> ", self.cwd())
    }

    fn execute(&mut self, line: &str) -> Option<Reply> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let (cmd, rest) = words.split_first()?;
        let reply = match (cmd.to_ascii_lowercase().as_str(), rest) {
            ("dir" | "ls", []) => self.dir("*.*", 0x10),
            ("dir" | "ls", [mask]) => self.dir(mask, 0x10),
            ("label", []) => self.dir("\\*.*", 0x08),
            ("cd", [path]) => ok(self.harness.dsetpath(path)).map(|_| String::new()),
            ("pwd", []) => Ok(self.cwd()),
            ("type" | "cat", [name]) => self.type_file(name),
            ("write", [name, text @ ..]) => self.write_file(name, &text.join(" ")),
            ("mkdir" | "md", [path]) => ok(self.harness.dcreate(path)).map(|_| String::new()),
            ("rmdir" | "rd", [path]) => ok(self.harness.ddelete(path)).map(|_| String::new()),
            ("del" | "rm", [name]) => ok(self.harness.fdelete(name)).map(|_| String::new()),
            ("ren" | "mv", [from, to]) => {
                ok(self.harness.frename(from, to)).map(|_| String::new())
            }
            ("attr", [name]) => ok(self.harness.fattrib(name, false, 0))
                .map(|a| attrib_flags(a as u8)),
            ("attr", [name, flag]) => self.set_readonly(name, flag),
            ("free", []) => self.free(),
            ("run", [name]) => match self.harness.pexec(0, name) {
                CallOutcome::HandledWithRedirect => Ok(format!(
                    "load via trampoline at {:#08X}",
                    self.harness.emulator().pexec_trampoline()
                )),
                other => Err(guest_error(other)),
            },
            ("drive", [letter]) => self.set_drive(letter),
            ("reset", []) => {
                self.harness.emulator_mut().reset();
                self.harness.boot();
                Ok("reset".to_string())
            }
            ("help", _) => Ok(HELP.to_string()),
            _ => Err(format!("unknown command: {} (try help)", line.trim())),
        };
        Some(reply)
    }

    fn dir(&mut self, mask: &str, attr: u16) -> Reply {
        let mut out = String::new();
        let mut outcome = self.harness.fsfirst(mask, attr);
        let mut count = 0;
        while let CallOutcome::Handled(code::E_OK) = outcome {
            out.push_str(&format!(
                "{:<13} {:>10} {}\n",
                self.harness.dta_name(),
                self.harness.dta_size(),
                attrib_flags(self.harness.dta_attrib())
            ));
            count += 1;
            outcome = self.harness.fsnext();
        }
        match outcome {
            CallOutcome::Handled(code::ENMFIL) | CallOutcome::Handled(code::EFILNF) => {
                out.push_str(&format!("{} entries", count));
                Ok(out)
            }
            other => Err(guest_error(other)),
        }
    }

    fn type_file(&mut self, name: &str) -> Reply {
        let handle = ok(self.harness.fopen(name, 0))? as u16;
        let mut data = Vec::new();
        let result = loop {
            match self.harness.fread(handle, 4096) {
                (CallOutcome::Handled(0), _) => break Ok(()),
                (CallOutcome::Handled(n), chunk) if n > 0 => data.extend_from_slice(&chunk),
                (other, _) => break Err(guest_error(other)),
            }
        };
        self.harness.fclose(handle);
        result.map(|_| String::from_utf8_lossy(&data).into_owned())
    }

    fn write_file(&mut self, name: &str, text: &str) -> Reply {
        let handle = ok(self.harness.fcreate(name, 0))? as u16;
        let written = ok(self.harness.fwrite(handle, text.as_bytes()));
        ok(self.harness.fclose(handle))?;
        written.map(|n| format!("{} bytes", n))
    }

    fn set_readonly(&mut self, name: &str, flag: &str) -> Reply {
        let current = ok(self.harness.fattrib(name, false, 0))? as u16;
        let wanted = match flag {
            "+r" => current | 0x01,
            "-r" => current & !0x01,
            _ => return Err(format!("bad flag: {} (use +r or -r)", flag)),
        };
        ok(self.harness.fattrib(name, true, wanted)).map(|a| attrib_flags(a as u8))
    }

    fn free(&mut self) -> Reply {
        let (outcome, [free, total, bps, spc]) = self.harness.dfree(0);
        ok(outcome)?;
        let cluster = (bps * spc) as u64;
        Ok(format!(
            "{} of {} bytes free ({} clusters of {})",
            free as u64 * cluster,
            total as u64 * cluster,
            free,
            cluster
        ))
    }

    fn set_drive(&mut self, letter: &str) -> Reply {
        let letter = letter.trim_end_matches(':');
        match letter.chars().next() {
            Some(c) if letter.len() == 1 && c.is_ascii_alphabetic() => {
                let drive = c.to_ascii_uppercase() as u16 - 'A' as u16;
                self.harness.dsetdrv(drive);
                if self.harness.emulator().drive(c).is_none() {
                    return Ok(format!("{}: is not emulated", c.to_ascii_uppercase()));
                }
                Ok(String::new())
            }
            _ => Err(format!("bad drive: {}", letter)),
        }
    }
}

const HELP: &str = "\
dir [MASK]        list files (Fsfirst/Fsnext)
label             show the volume label
cd PATH           change directory (Dsetpath)
pwd               show current directory (Dgetpath)
type FILE         print a file (Fopen/Fread)
write FILE TEXT   create a file (Fcreate/Fwrite)
mkdir PATH        create directory (Dcreate)
rmdir PATH        delete directory (Ddelete)
del FILE          delete file (Fdelete)
ren OLD NEW       rename (Frename)
attr FILE [+r|-r] show or change attributes (Fattrib)
free              free space (Dfree)
run FILE          program load (Pexec)
drive X           change drive (Dsetdrv)
reset             reset and reboot the drive state
exit              leave";

fn print_reply(reply: Reply) {
    match reply {
        Ok(text) if text.is_empty() => {}
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if args.trace {
        logger.filter_module("gemdos_core", LevelFilter::Trace);
    }
    logger.init();

    let config = build_config(&args)?;
    if config.drives.is_empty() {
        eprintln!("No drives to mount (use --root, --drive or --config)");
        return Err("Nothing to mount".into());
    }
    for drive in &config.drives {
        eprintln!("Mounted {}: <-> {}", drive.letter, drive.path.display());
    }

    let harness = GuestHarness::new(config)?;
    let mut shell = Shell { harness };

    // One-shot mode
    if !args.command.is_empty() {
        let line = args.command.join(" ");
        let reply = tokio::task::spawn_blocking(move || shell.execute(&line)).await?;
        if let Some(reply) = reply {
            let failed = reply.is_err();
            print_reply(reply);
            if failed {
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let interactive = std::io::stdin().is_tty();
    let (line_tx, line_rx) = mpsc::channel::<String>();

    // Calls hit the host filesystem synchronously; keep them off the runtime
    let worker = tokio::task::spawn_blocking(move || {
        let show_prompt = |shell: &mut Shell| {
            if interactive {
                print!("{}", shell.prompt().bold());
                let _ = std::io::stdout().flush();
            }
        };
        show_prompt(&mut shell);
        for line in line_rx {
            if let Some(reply) = shell.execute(&line) {
                print_reply(reply);
            }
            show_prompt(&mut shell);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if matches!(trimmed, "exit" | "quit") {
            break;
        }
        if line_tx.send(line).is_err() {
            break;
        }
    }
    drop(line_tx);
    worker.await?;

    if interactive {
        println!();
    }
    Ok(())
}
