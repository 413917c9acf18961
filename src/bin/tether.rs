use std::{
    error::Error,
    io,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use clap::Parser;
use log::{error, warn};
use tether::{
    Command, Controller, ControllerConfig, Message,
    cli::session_table,
    prompt,
    protocol::{Code, Received, TransportConfig, save_download},
    session::{ControllerError, Hooks},
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for agent connections at address
    address: SocketAddr,
    /// Seconds between accept passes
    #[arg(long, default_value_t = 2, value_parser = seconds())]
    accept_interval: u64,
    /// Seconds between liveness sweeps
    #[arg(long, default_value_t = 5, value_parser = seconds())]
    reap_interval: u64,
    /// Maximum number of concurrent sessions
    #[arg(long, default_value_t = 5)]
    max_sessions: usize,
    /// Seconds a liveness probe waits for its acknowledgement
    #[arg(long, default_value_t = 5, value_parser = seconds())]
    probe_timeout: u64,
    /// Seconds to wait for an agent's response
    #[arg(long, default_value_t = 30, value_parser = seconds())]
    response_timeout: u64,
    /// Directory downloaded files are written to
    #[arg(long, default_value = ".")]
    download_dir: PathBuf,
}

/// Whole seconds, at least one.
fn seconds() -> clap::builder::RangedU64ValueParser<u64> {
    clap::value_parser!(u64).range(1..)
}

impl Cli {
    fn config(&self) -> ControllerConfig {
        ControllerConfig {
            accept_interval: Duration::from_secs(self.accept_interval),
            reap_interval: Duration::from_secs(self.reap_interval),
            max_sessions: self.max_sessions,
            transport: TransportConfig {
                probe_timeout: Duration::from_secs(self.probe_timeout),
                ..Default::default()
            },
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let hooks = Hooks::default()
        .on_accept(|s| println!("\n[+] session {} connected from {}", s.id(), s.peer()))
        .on_reap(|s| println!("\n[-] session {} ({}) lost", s.id(), s.peer()));
    let controller = Arc::new(Mutex::new(Controller::with_hooks(cli.config(), hooks)));
    let address = controller
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .listen(cli.address)?;
    println!("[*] Listening for agents on {address}");

    let handle = Arc::clone(&controller);
    ctrlc::set_handler(move || {
        handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
        std::process::exit(130);
    })?;

    let stdin = io::stdin();

    // Stdout stays unlocked while waiting on input; the session hooks print
    // from the accept and reap workers.
    loop {
        let cmd = match prompt(stdin.lock(), io::stdout(), "tether") {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        if cmd == Command::Exit {
            break;
        }

        if let Err(e) = execute(&controller, &cli, cmd) {
            eprintln!("error: {e}");
        }
    }

    controller
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .shutdown();
    Ok(())
}

fn execute(controller: &Mutex<Controller>, cli: &Cli, cmd: Command) -> Result<(), Box<dyn Error>> {
    let lock = move || controller.lock().unwrap_or_else(PoisonError::into_inner);

    match &cmd {
        Command::Exit => {}
        Command::Help => println!("{}", Command::USAGE),
        Command::List => {
            let sessions = lock().sessions();
            println!("{}", session_table(sessions.iter().map(|s| &**s), true));
        }
        Command::Ping(id) => {
            let session = lock().session(*id)?;
            let state = if session.is_alive() { "alive" } else { "unreachable" };
            println!("session {id} is {state}");
        }
        Command::Close(id) => lock().close(*id)?,
        _ => {
            let Some(id) = cmd.session() else {
                return Ok(());
            };
            let Some(intent) = cmd.intent() else {
                return Ok(());
            };
            let message: Message = intent?.into();
            let session = lock().session(id)?;
            let timeout = Some(Duration::from_secs(cli.response_timeout));

            let response = match session.request(&message, timeout) {
                Ok(Received::Data(response)) => response,
                Ok(Received::Timeout) => {
                    warn!("session {id} did not answer within {timeout:?}");
                    println!("[-] session {id} timed out and was dropped");
                    return forget(controller, id);
                }
                Ok(Received::Closed) => {
                    println!("[-] session {id} closed by agent");
                    return forget(controller, id);
                }
                Err(e) => {
                    error!("session {id} failed: {e}");
                    forget(controller, id)?;
                    return Err(e.into());
                }
            };

            show(&cmd, &response, cli)?;
        }
    }
    Ok(())
}

/// Removes a session the reaper may already have dropped.
fn forget(controller: &Mutex<Controller>, id: usize) -> Result<(), Box<dyn Error>> {
    let res = controller
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .close(id);
    match res {
        Ok(()) | Err(ControllerError::UnknownSession(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn show(cmd: &Command, response: &Message, cli: &Cli) -> Result<(), Box<dyn Error>> {
    if response.code == Code::ERROR {
        eprintln!("[-] agent error: {}", response.text().unwrap_or_default());
        return Ok(());
    }

    match cmd {
        Command::Download { name, .. } => {
            let path = save_download(response, &cli.download_dir, name)?;
            println!("[+] saved {}", path.display());
        }
        _ => {
            if let Some(text) = response.text() {
                println!("{text}");
            }
        }
    }
    Ok(())
}
