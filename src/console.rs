//! Console input and human-readable output.

use std::{
    fmt::Write as _,
    fs::{
        File,
        OpenOptions,
    },
    io::{
        BufRead,
        Write,
    },
    path::Path,
    sync::Arc,
    thread::JoinHandle,
};

use chrono::{
    DateTime,
    FixedOffset,
    Utc,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    callsign::{
        Callsign,
        Identity,
        SharedIdentity,
    },
    monitor::{
        Output,
        Warning,
    },
    receiver::DecodedMessage,
};

/// Timestamps are shown in Japan Standard Time.
pub const JST: FixedOffset = match FixedOffset::east_opt(9 * 3600) {
    Some(offset) => offset,
    None => panic!("invalid JST offset"),
};

const TIMESTAMP_FORMAT: &str = "%y%m%d %H:%M";

/// Writes every line to all its writers, e.g. stdout and a log file.
pub struct Tee {
    writers: Vec<Box<dyn Write + Send>>,
}

impl Tee {
    pub fn new() -> Self {
        Self { writers: vec![] }
    }

    pub fn with_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.writers.push(Box::new(writer));
        self
    }

    fn write_str(&mut self, s: &str) {
        for writer in &mut self.writers {
            if let Err(error) = writer.write_all(s.as_bytes()).and_then(|()| writer.flush()) {
                tracing::warn!(?error, "failed to write output");
            }
        }
    }
}

impl Default for Tee {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Tee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tee")
            .field("writers", &self.writers.len())
            .finish()
    }
}

/// Opens the log file output is duplicated to.
///
/// Appends unless `overwrite` is set.
pub fn open_log_file(path: &Path, overwrite: bool) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if overwrite {
        options.write(true).truncate(true);
    }
    else {
        options.append(true);
    }
    options.open(path)
}

/// Human-readable output, shared between the monitor and the input thread.
#[derive(Clone, Debug)]
pub struct Console {
    tee: Arc<Mutex<Tee>>,
}

impl Console {
    pub fn new(tee: Tee) -> Self {
        Self {
            tee: Arc::new(Mutex::new(tee)),
        }
    }

    /// Console on stdout, optionally duplicated to a log file.
    ///
    /// If the log file can't be opened, we continue with stdout only.
    pub fn stdout(log_file: Option<&Path>, overwrite: bool) -> Self {
        let mut tee = Tee::new().with_writer(std::io::stdout());
        let console_only = log_file.and_then(|path| {
            match open_log_file(path, overwrite) {
                Ok(file) => {
                    tee.writers.push(Box::new(file));
                    None
                }
                Err(error) => Some((path, error)),
            }
        });

        let console = Self::new(tee);
        if let Some((path, error)) = console_only {
            tracing::warn!(path = %path.display(), ?error, "failed to open log file");
            console.print(&format!(
                "Could not open log file '{}': {error}\nContinuing with console output only.\n",
                path.display()
            ));
        }
        console
    }

    pub fn print(&self, s: &str) {
        self.tee.lock().write_str(s);
    }

    pub fn println(&self, line: &str) {
        self.print(&format!("{line}\n"));
    }
}

impl Output for Console {
    fn received(&mut self, message: &DecodedMessage) {
        self.print(&format_received(message, Utc::now()));
    }

    fn transmitted(&mut self, identity: &Identity, text: &str) {
        self.print(&format_transmitted(identity, text, Utc::now()));
    }

    fn warning(&mut self, warning: &Warning) {
        self.println(&format!("[WARN] {warning}"));
    }
}

pub fn map_link(latitude: f64, longitude: f64) -> String {
    format!("https://maps.google.com/?q={latitude:.7},{longitude:.7}")
}

fn format_time(time: DateTime<Utc>) -> String {
    format!("Time: {}JST\n\n", time.with_timezone(&JST).format(TIMESTAMP_FORMAT))
}

pub fn format_received(message: &DecodedMessage, time: DateTime<Utc>) -> String {
    let mut output = String::new();
    let block = &message.block;

    if let Some((latitude, longitude)) = block.coordinates() {
        let _ = writeln!(output, "Position: {}", map_link(latitude, longitude));
    }
    if let Some(altitude) = block.altitude {
        let _ = writeln!(output, "Altitude: {altitude:.0}m");
    }
    if !message.sender().is_empty() {
        let _ = writeln!(output, "From: {}", message.sender());
    }
    if !message.recipient().is_empty() {
        let _ = writeln!(output, "To: {}", message.recipient());
    }
    let _ = writeln!(output, "Text: {}", message.text());
    if let Some(auxiliary) = &block.auxiliary {
        let _ = writeln!(output, "{auxiliary}");
    }

    output.push_str(&format_time(time));
    output
}

pub fn format_transmitted(identity: &Identity, text: &str, time: DateTime<Utc>) -> String {
    let mut output = String::new();

    if !identity.my.is_empty() {
        let _ = writeln!(output, "From: {}", identity.my);
    }
    if !identity.ur.is_empty() {
        let _ = writeln!(output, "To: {}", identity.ur);
    }
    let _ = writeln!(output, "Text: {text}");

    output.push_str(&format_time(time));
    output
}

/// A line typed on the console.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    /// Text to transmit
    Text(Vec<u8>),
    ShowMy,
    SetMy(Callsign),
    ShowUr,
    SetUr(Callsign),
}

impl Input {
    /// Parses a line, with or without its line ending.
    ///
    /// Returns `None` for blank lines and for `/MY` or `/UR` with an argument
    /// that normalizes to an empty callsign.
    pub fn parse(line: &[u8]) -> Option<Self> {
        let line = line
            .strip_suffix(b"\n")
            .unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if line.trim_ascii().is_empty() {
            return None;
        }

        if let Ok(command) = std::str::from_utf8(line.trim_ascii()) {
            if command.starts_with('/') {
                let (name, argument) = command
                    .split_once(char::is_whitespace)
                    .map_or((command, None), |(name, argument)| (name, Some(argument)));
                let callsign = argument.map(Callsign::normalize);

                match (name.to_lowercase().as_str(), callsign) {
                    ("/my", None) => return Some(Self::ShowMy),
                    ("/ur", None) => return Some(Self::ShowUr),
                    ("/my", Some(callsign)) => {
                        return (!callsign.is_empty()).then_some(Self::SetMy(callsign));
                    }
                    ("/ur", Some(callsign)) => {
                        return (!callsign.is_empty()).then_some(Self::SetUr(callsign));
                    }
                    _ => {}
                }
            }
        }

        Some(Self::Text(line.to_vec()))
    }
}

/// Reads lines until end-of-input, handling `/MY` and `/UR` and queueing
/// everything else for transmission.
pub fn read_input<R: BufRead>(
    mut reader: R,
    identity: &SharedIdentity,
    queue: &mpsc::UnboundedSender<Vec<u8>>,
    console: &Console,
) {
    let mut line = vec![];

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => {
                tracing::error!(?error, "failed to read console input");
                break;
            }
        }

        let Some(input) = Input::parse(&line)
        else {
            continue;
        };

        match input {
            Input::Text(text) => {
                if queue.send(text).is_err() {
                    tracing::debug!("transmit queue closed");
                    break;
                }
            }
            Input::ShowMy => {
                let my = identity.lock().my.to_string();
                console.println(&my);
            }
            Input::ShowUr => {
                let ur = identity.lock().ur.to_string();
                console.println(&ur);
            }
            Input::SetMy(callsign) => {
                tracing::info!(%callsign, "changed MY callsign");
                identity.lock().my = callsign;
            }
            Input::SetUr(callsign) => {
                tracing::info!(%callsign, "changed UR callsign");
                identity.lock().ur = callsign;
            }
        }
    }

    tracing::debug!("console input closed");
}

/// Spawns a thread reading stdin.
///
/// This is a plain thread with blocking reads, so that input methods that
/// compose characters over several keystrokes work.
pub fn spawn_input(
    identity: SharedIdentity,
    queue: mpsc::UnboundedSender<Vec<u8>>,
    console: Console,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("console-input".to_owned())
        .spawn(move || {
            read_input(std::io::stdin().lock(), &identity, &queue, &console);
        })
}
