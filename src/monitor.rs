//! The main loop.
//!
//! Everything protocol related runs sequentially on one thread:
//!
//! 1. send everything that is queued for transmission
//! 2. read whatever the port has available (bounded by a short timeout)
//! 3. frame and handle the received bytes
//! 4. check for stale partial packets
//!
//! The only state shared with other threads is the transmit queue and the
//! [`SharedIdentity`].

use std::{
    fmt::Display,
    io::{
        ErrorKind,
        Read,
        Write,
    },
    time::{
        Duration,
        Instant,
    },
};

use tokio::sync::mpsc::{
    self,
    error::TryRecvError,
};
use tokio_util::sync::CancellationToken;

use crate::{
    callsign::{
        Identity,
        SharedIdentity,
    },
    framer::Expired,
    receiver::{
        DecodedMessage,
        Event,
        Receiver,
    },
    transmit,
};

/// How much we read from the port at most per iteration.
const READ_BUFFER_SIZE: usize = 0x1000;

/// Fatal transport errors. The monitor stops when one of these occurs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serial port error")]
    Serial(#[from] serialport::Error),

    #[error("transport error")]
    Transport(#[from] std::io::Error),
}

/// Byte stream the monitor talks to.
pub trait Port {
    /// Reads available bytes.
    ///
    /// This may block for a short poll interval, but returns `Ok(0)` if
    /// nothing was received in that time.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error>;

    fn write(&mut self, data: &[u8]) -> Result<(), Error>;

    fn flush(&mut self) -> Result<(), Error>;
}

impl<T: ?Sized + Port> Port for &mut T {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        T::read(*self, buffer)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        T::write(*self, data)
    }

    fn flush(&mut self) -> Result<(), Error> {
        T::flush(*self)
    }
}

/// Serial port settings: 8 data bits, no parity, 1 stop bit.
#[derive(Clone, Debug)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,

    /// How long a read waits for data.
    pub poll_interval: Duration,
}

pub struct Serial {
    port: Box<dyn serialport::SerialPort>,
}

impl Serial {
    pub fn open(config: &SerialConfig) -> Result<Self, Error> {
        let port = serialport::new(&config.path, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.poll_interval)
            .open()?;
        Ok(Self { port })
    }
}

impl std::fmt::Debug for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serial")
            .field("name", &self.port.name())
            .finish()
    }
}

impl Port for Serial {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        // read everything that's waiting, or wait for at least 1 byte.
        let available = usize::try_from(self.port.bytes_to_read()?).unwrap_or(usize::MAX);
        let num_bytes = available.clamp(1, buffer.len());

        match Read::read(&mut self.port, &mut buffer[..num_bytes]) {
            Ok(num_bytes_read) => Ok(num_bytes_read),
            Err(error) if error.kind() == ErrorKind::TimedOut => Ok(0),
            Err(error) if error.kind() == ErrorKind::Interrupted => Ok(0),
            Err(error) => Err(error.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        Write::write_all(&mut self.port, data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        Write::flush(&mut self.port)?;
        Ok(())
    }
}

/// Monotonic time source for the packet timeouts.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Something that isn't fatal, but should be shown to the user.
#[derive(Clone, Debug)]
pub enum Warning {
    PacketTimeout(Expired),
    TransmitFailed(String),
}

impl Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PacketTimeout(_) => write!(f, "packet timeout, clearing buffer / state reset"),
            Self::TransmitFailed(error) => write!(f, "transmit failed: {error}"),
        }
    }
}

/// Where decoded messages and warnings go.
pub trait Output {
    fn received(&mut self, message: &DecodedMessage);

    fn transmitted(&mut self, identity: &Identity, text: &str);

    fn warning(&mut self, warning: &Warning);
}

pub struct Monitor<P, O, C = MonotonicClock> {
    port: P,
    receiver: Receiver,
    identity: SharedIdentity,
    queue: mpsc::UnboundedReceiver<Vec<u8>>,
    output: O,
    clock: C,
    read_buffer: Box<[u8]>,
}

impl<P: Port, O: Output> Monitor<P, O> {
    pub fn new(
        port: P,
        receiver: Receiver,
        identity: SharedIdentity,
        queue: mpsc::UnboundedReceiver<Vec<u8>>,
        output: O,
    ) -> Self {
        Self::with_clock(port, receiver, identity, queue, output, MonotonicClock)
    }
}

impl<P: Port, O: Output, C: Clock> Monitor<P, O, C> {
    pub fn with_clock(
        port: P,
        receiver: Receiver,
        identity: SharedIdentity,
        queue: mpsc::UnboundedReceiver<Vec<u8>>,
        output: O,
        clock: C,
    ) -> Self {
        Self {
            port,
            receiver,
            identity,
            queue,
            output,
            clock,
            read_buffer: vec![0; READ_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Runs until `shutdown` is cancelled, or a transport error occurs.
    ///
    /// This blocks, so in async code run it with
    /// [`spawn_blocking`][tokio::task::spawn_blocking].
    pub fn run(mut self, shutdown: &CancellationToken) -> Result<(), Error> {
        tracing::debug!("monitor started");

        while !shutdown.is_cancelled() {
            self.poll()?;
        }

        tracing::debug!("monitor stopped");
        Ok(())
    }

    /// One iteration of the main loop.
    pub fn poll(&mut self) -> Result<(), Error> {
        self.drain_queue()?;

        let num_bytes_read = self.port.read(&mut self.read_buffer)?;
        let now = self.clock.now();

        if num_bytes_read > 0 {
            let events = self
                .receiver
                .receive(&self.read_buffer[..num_bytes_read], now);
            for event in events {
                self.handle_event(event);
            }
        }

        if let Some(event) = self.receiver.check_timeout(now) {
            self.handle_event(event);
        }

        Ok(())
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Message(message) => self.output.received(&message),
            Event::Timeout(expired) => self.output.warning(&Warning::PacketTimeout(expired)),
        }
    }

    fn drain_queue(&mut self) -> Result<(), Error> {
        loop {
            match self.queue.try_recv() {
                Ok(line) => self.transmit(&line)?,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        Ok(())
    }

    /// Sends one line. A line that can't be encoded is skipped, but failing to
    /// write to the port is fatal.
    fn transmit(&mut self, line: &[u8]) -> Result<(), Error> {
        let identity = self.identity.lock().clone();

        let packet = match transmit::build_message_packet(line, &identity) {
            Ok(packet) => packet,
            Err(error) => {
                tracing::error!(?error, "failed to build message packet");
                self.output
                    .warning(&Warning::TransmitFailed(error.to_string()));
                return Ok(());
            }
        };

        tracing::debug!(length = packet.len(), id = %identity.message_id(), "transmitting");
        self.port.write(&packet)?;
        self.port.flush()?;

        // checked by the packet builder
        let text = String::from_utf8_lossy(line);
        self.output.transmitted(&identity, &text);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        collections::VecDeque,
        sync::Arc,
        time::{
            Duration,
            Instant,
        },
    };

    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::{
        callsign::{
            Callsign,
            Identity,
            SharedIdentity,
        },
        monitor::{
            Clock,
            Error,
            Monitor,
            Output,
            Port,
            Warning,
        },
        receiver::{
            DecodedMessage,
            Receiver,
        },
    };

    #[derive(Debug, Default)]
    struct MockPort {
        reads: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        flushes: usize,
        disconnect_when_empty: bool,
    }

    impl Port for MockPort {
        fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
            match self.reads.pop_front() {
                Some(data) => {
                    buffer[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                None if self.disconnect_when_empty => {
                    Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into())
                }
                None => Ok(0),
            }
        }

        fn write(&mut self, data: &[u8]) -> Result<(), Error> {
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), Error> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct RecordingOutput {
        received: Vec<DecodedMessage>,
        transmitted: Vec<(Identity, String)>,
        warnings: Vec<String>,
    }

    impl Output for &mut RecordingOutput {
        fn received(&mut self, message: &DecodedMessage) {
            self.received.push(message.clone());
        }

        fn transmitted(&mut self, identity: &Identity, text: &str) {
            self.transmitted.push((identity.clone(), text.to_owned()));
        }

        fn warning(&mut self, warning: &Warning) {
            self.warnings.push(warning.to_string());
        }
    }

    struct ManualClock(Cell<Instant>);

    impl ManualClock {
        fn advance(&self, duration: Duration) {
            self.0.set(self.0.get() + duration);
        }
    }

    impl Clock for &ManualClock {
        fn now(&self) -> Instant {
            self.0.get()
        }
    }

    fn identity() -> SharedIdentity {
        Arc::new(Mutex::new(Identity::new(
            Callsign::normalize("JA1XPM C"),
            Callsign::normalize("CQCQCQ"),
        )))
    }

    #[test]
    fn it_decodes_received_messages() {
        let mut port = MockPort::default();
        port.reads.push_back(
            b"$GPGGA,085120.307,3541.1493,N,13945.3994,E,1,08,1.0,12.3,M,35.9,M,,0000*5E\r\n"
                .to_vec(),
        );
        port.reads.push_back(b"$$Msg,JA1XPM,CQCQCQ,".to_vec());
        port.reads.push_back(b"001187hello\x14\r\x00".to_vec());

        let mut output = RecordingOutput::default();
        let (_queue, queued) = mpsc::unbounded_channel();
        let mut monitor = Monitor::new(
            &mut port,
            Receiver::default(),
            identity(),
            queued,
            &mut output,
        );

        for _ in 0..3 {
            monitor.poll().unwrap();
        }
        assert!(monitor.receiver().block().is_empty());
        drop(monitor);

        assert_eq!(output.received.len(), 1);
        assert_eq!(output.received[0].text(), "hello");
        assert_eq!(output.received[0].block.altitude, Some(12.3));
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn it_transmits_queued_lines() {
        let mut port = MockPort::default();
        let mut output = RecordingOutput::default();
        let identity = identity();
        let (queue, queued) = mpsc::unbounded_channel();

        queue.send(b"hello".to_vec()).unwrap();
        queue.send(b"bad \xff".to_vec()).unwrap();
        queue.send(b"hi".to_vec()).unwrap();

        let mut monitor = Monitor::new(
            &mut port,
            Receiver::default(),
            identity.clone(),
            queued,
            &mut output,
        );
        monitor.poll().unwrap();

        identity.lock().ur = Callsign::normalize("JH1ABC");
        queue.send(b"again".to_vec()).unwrap();
        monitor.poll().unwrap();
        drop(monitor);

        assert!(port.written.starts_with(b"$$Msg,JA1XPM C,CQCQCQ,0011EAhello\x14\r\x00"));
        assert!(port.written.ends_with(b"again\x00\r\x00"));
        assert_eq!(port.flushes, 3);

        let texts = output
            .transmitted
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, ["hello", "hi", "again"]);
        assert_eq!(output.transmitted[2].0.ur.to_string(), "JH1ABC");
        assert_eq!(output.warnings, ["transmit failed: text is not valid UTF-8"]);
    }

    #[test]
    fn it_warns_about_timeouts() {
        let mut port = MockPort::default();
        port.reads.push_back(b"$$Msg,JA1XPM".to_vec());

        let clock = ManualClock(Cell::new(Instant::now()));
        let mut output = RecordingOutput::default();
        let (_queue, queued) = mpsc::unbounded_channel();
        let mut monitor = Monitor::with_clock(
            &mut port,
            Receiver::default(),
            identity(),
            queued,
            &mut output,
            &clock,
        );

        monitor.poll().unwrap();
        clock.advance(Duration::from_secs(3));
        monitor.poll().unwrap();
        clock.advance(Duration::from_secs(2));
        monitor.poll().unwrap();
        assert!(monitor.receiver().framer().is_idle());
        drop(monitor);

        assert_eq!(output.warnings, ["packet timeout, clearing buffer / state reset"]);
    }

    #[test]
    fn it_stops_on_transport_errors() {
        let mut port = MockPort {
            disconnect_when_empty: true,
            ..Default::default()
        };
        port.reads.push_back(b"$$CRC1\r".to_vec());

        let mut output = RecordingOutput::default();
        let (_queue, queued) = mpsc::unbounded_channel();
        let monitor = Monitor::new(
            &mut port,
            Receiver::default(),
            identity(),
            queued,
            &mut output,
        );

        let result = monitor.run(&CancellationToken::new());
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn it_stops_when_cancelled() {
        let shutdown = CancellationToken::new();
        let (_queue, queued) = mpsc::unbounded_channel();

        let handle = tokio::task::spawn_blocking({
            let shutdown = shutdown.clone();
            move || {
                let mut port = MockPort::default();
                let mut output = RecordingOutput::default();
                let monitor = Monitor::new(
                    &mut port,
                    Receiver::default(),
                    identity(),
                    queued,
                    &mut output,
                );
                monitor.run(&shutdown)
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
