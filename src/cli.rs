//! CLI utilities for the controller console.
//!
//! The utilities present in this module read operator commands and render session
//! listings for an interactive front end.
use std::io::{BufRead, Write};

use crate::{Command, CommandError, session::Session};

/// Prompt the operator for a console command.
///
/// End of input is treated as `.exit`.
pub fn prompt<R, W>(mut reader: R, mut writer: W, label: &str) -> Result<Command, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "{label}> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }

    Command::try_from(s.as_str())
}

/// Renders sessions as a boxed table, one card per session.
pub fn session_table<'a, I>(sessions: I, listening: bool) -> String
where
    I: IntoIterator<Item = &'a Session>,
{
    let mut cards: Vec<String> = sessions.into_iter().map(|s| s.to_string()).collect();
    if cards.is_empty() {
        cards.push(if listening {
            "No agents connected.".to_string()
        } else {
            "Not listening. Start the controller with an address.".to_string()
        });
    }

    let width = cards.iter().map(|c| c.chars().count()).max().unwrap_or(0);
    let rule = "-".repeat(width + 4);

    let mut out = String::new();
    out.push_str(&rule);
    out.push('\n');
    for card in cards {
        let pad = width - card.chars().count();
        out.push_str(&format!("| {card}{} |\n", " ".repeat(pad)));
    }
    out.push_str(&rule);
    out
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, BufReader, Read},
        net::TcpStream,
        sync::{Arc, Mutex, mpsc},
        thread,
        time::{Duration, Instant},
    };

    use crate::{
        protocol::TransportConfig,
        session::{Controller, ControllerConfig, Hooks},
    };

    use super::*;

    /// Shared terminal that, like stdout, locks only for each write.
    #[derive(Clone, Default)]
    struct Terminal(Arc<Mutex<Vec<u8>>>);

    impl Write for Terminal {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Terminal {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    /// Input that blocks until a line is fed through the channel.
    struct Keyboard(mpsc::Receiver<Vec<u8>>);

    impl Read for Keyboard {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(line) => {
                    buf[..line.len()].copy_from_slice(&line);
                    Ok(line.len())
                }
                Err(_) => Ok(0),
            }
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output, "tether").unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("tether> ", output);
    }

    #[test]
    fn prompt_parses_commands() {
        let input = b"cmd 1 whoami\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output, "").unwrap();
        assert_eq!(
            Command::Run {
                session: 1,
                command: "whoami".to_string()
            },
            res
        );
    }

    #[test]
    fn prompt_end_of_input_exits() {
        let input = b"";
        let mut output = Vec::new();

        assert_eq!(prompt(&input[..], &mut output, "").unwrap(), Command::Exit);
    }

    #[test]
    #[should_panic(expected = "UnrecognizedCommand")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output, "").unwrap();
    }

    #[test]
    fn empty_table() {
        let table = session_table(std::iter::empty(), true);
        assert_eq!(
            table,
            "------------------------\n| No agents connected. |\n------------------------"
        );
    }

    #[test]
    fn sessions_are_accepted_while_prompt_waits() {
        let terminal = Terminal::default();
        let hook_terminal = terminal.clone();
        let hooks = Hooks::default().on_accept(move |s| {
            writeln!(hook_terminal.clone(), "[+] session {} connected", s.id()).unwrap();
        });
        let config = ControllerConfig {
            accept_interval: Duration::from_millis(20),
            reap_interval: Duration::from_secs(60),
            max_sessions: 5,
            transport: TransportConfig {
                probe_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        };
        let mut controller = Controller::with_hooks(config, hooks);
        let addr = controller.listen("127.0.0.1:0".parse().unwrap()).unwrap();

        let (keys, keyboard) = mpsc::channel();
        let console = terminal.clone();
        let waiting = thread::spawn(move || {
            prompt(BufReader::new(Keyboard(keyboard)), console, "tether")
        });
        assert!(wait_for(|| terminal.contents().starts_with("tether> ")));

        let first = TcpStream::connect(addr).unwrap();
        let second = TcpStream::connect(addr).unwrap();
        assert!(wait_for(|| controller.sessions().len() == 2));
        assert!(terminal.contents().contains("[+] session 1 connected"));

        keys.send(b".exit\n".to_vec()).unwrap();
        assert_eq!(waiting.join().unwrap().unwrap(), Command::Exit);

        drop((first, second));
        controller.shutdown();
    }
}
