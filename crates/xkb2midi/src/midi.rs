//! MIDI events and the JACK output bridge
//!
//! The dispatch thread submits events through [`MidiOutput::submit_event`];
//! the JACK process callback drains them once per period into a single MIDI
//! event at frame offset 0. The callback does no locking and no allocation.

use crate::config::MidiSettings;
use crate::error::{Error, Result};
use crate::queue::{event_queue, EventConsumer, EventProducer, DEFAULT_QUEUE_CAPACITY};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Size of one encoded note event on the wire
pub const MIDI_EVENT_SIZE: usize = 3;

/// Status byte of a note-on message on channel 1
pub const NOTE_ON: u8 = 0x90;

/// Status byte of a note-off message on channel 1
pub const NOTE_OFF: u8 = 0x80;

/// A note on/off message in its 3-byte wire form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiEvent {
    bytes: [u8; MIDI_EVENT_SIZE],
}

impl MidiEvent {
    /// Build a note-on (`is_press`) or note-off event.
    ///
    /// Note and velocity are copied verbatim; callers mask them to 7 bits.
    pub fn encode(is_press: bool, note: u8, velocity: u8) -> Self {
        let status = if is_press { NOTE_ON } else { NOTE_OFF };
        Self { bytes: [status, note, velocity] }
    }

    /// Note-on event
    pub fn note_on(note: u8, velocity: u8) -> Self {
        Self::encode(true, note, velocity)
    }

    /// Note-off event
    pub fn note_off(note: u8, velocity: u8) -> Self {
        Self::encode(false, note, velocity)
    }

    /// Reinterpret raw wire bytes
    pub fn from_bytes(bytes: [u8; MIDI_EVENT_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; MIDI_EVENT_SIZE] {
        &self.bytes
    }

    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    pub fn note(&self) -> u8 {
        self.bytes[1]
    }

    pub fn velocity(&self) -> u8 {
        self.bytes[2]
    }

    pub fn is_note_on(&self) -> bool {
        self.status() == NOTE_ON
    }
}

/// Destination for note events produced by the dispatch loop
pub trait MidiOutput {
    /// Queue an event for the next audio period.
    ///
    /// Returns `false` if the event was dropped because the queue is full.
    fn submit_event(&mut self, event: MidiEvent) -> bool;
}

impl MidiOutput for EventProducer {
    fn submit_event(&mut self, event: MidiEvent) -> bool {
        self.try_push(event)
    }
}

/// What one audio period did with the queued events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodOutcome {
    /// Nothing was queued
    Idle,
    /// This many bytes were written to the output
    Written(usize),
    /// The output refused a batch of this many bytes; it is lost
    Dropped(usize),
}

/// Body of one audio period, independent of JACK.
///
/// Drains every whole event currently queued into `scratch` and hands the
/// batch to `write`, which must place it as one output event at offset 0 and
/// report whether that succeeded. `scratch` should be as large as the queue.
pub fn drain_period<F>(consumer: &mut EventConsumer, scratch: &mut [u8], write: F) -> PeriodOutcome
where
    F: FnOnce(&[u8]) -> bool,
{
    if consumer.available_events() == 0 {
        return PeriodOutcome::Idle;
    }

    let n = consumer.drain(scratch);
    if n == 0 {
        PeriodOutcome::Idle
    } else if write(&scratch[..n]) {
        PeriodOutcome::Written(n)
    } else {
        PeriodOutcome::Dropped(n)
    }
}

/// JACK process handler for MIDI output
struct JackMidiHandler {
    midi_out: jack::Port<jack::MidiOut>,
    consumer: EventConsumer,
    scratch: Box<[u8]>,
    dropped_batches: Arc<AtomicU64>,
}

impl jack::ProcessHandler for JackMidiHandler {
    fn process(&mut self, _client: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        // Creating the writer clears this period's port buffer.
        let mut writer = self.midi_out.writer(ps);

        let outcome = drain_period(&mut self.consumer, &mut self.scratch, |bytes| {
            writer.write(&jack::RawMidi { time: 0, bytes }).is_ok()
        });
        if let PeriodOutcome::Dropped(_) = outcome {
            self.dropped_batches.fetch_add(1, Ordering::Relaxed);
        }

        jack::Control::Continue
    }
}

enum ClientState {
    Inactive {
        client: jack::Client,
        handler: JackMidiHandler,
    },
    Active(jack::AsyncClient<(), JackMidiHandler>),
    Closed,
}

/// JACK MIDI output with one output port fed by a lock-free queue
pub struct JackMidiOutput {
    producer: EventProducer,
    /// Batches the process callback could not reserve space for
    dropped_batches: Arc<AtomicU64>,
    reported_batches: u64,
    port_name: String,
    state: ClientState,
}

impl JackMidiOutput {
    /// Open a JACK client and register its MIDI output port.
    ///
    /// The process callback only starts running after [`activate`](Self::activate).
    pub fn new(client_name: &str, port_name: &str) -> Result<Self> {
        if client_name.is_empty() {
            return Err(Error::Midi("JACK client name cannot be empty".to_string()));
        }

        let (client, _status) = jack::Client::new(client_name, jack::ClientOptions::NO_START_SERVER)?;
        let midi_out = client.register_port(port_name, jack::MidiOut::default())?;

        let (producer, consumer) = event_queue(DEFAULT_QUEUE_CAPACITY);
        let dropped_batches = Arc::new(AtomicU64::new(0));

        let handler = JackMidiHandler {
            midi_out,
            scratch: vec![0u8; consumer.capacity()].into_boxed_slice(),
            consumer,
            dropped_batches: dropped_batches.clone(),
        };

        let full_port_name = format!("{}:{}", client.name(), port_name);

        Ok(Self {
            producer,
            dropped_batches,
            reported_batches: 0,
            port_name: full_port_name,
            state: ClientState::Inactive { client, handler },
        })
    }

    /// Create from settings
    pub fn from_settings(settings: &MidiSettings) -> Result<Self> {
        Self::new(&settings.client_name, &settings.port_name)
    }

    /// Start the process callback. Returns whether the client is running.
    pub fn activate(&mut self) -> bool {
        match std::mem::replace(&mut self.state, ClientState::Closed) {
            ClientState::Inactive { client, handler } => match client.activate_async((), handler) {
                Ok(active) => {
                    self.state = ClientState::Active(active);
                    true
                }
                Err(e) => {
                    log::error!("Failed to activate JACK client: {}", e);
                    false
                }
            },
            ClientState::Active(active) => {
                self.state = ClientState::Active(active);
                true
            }
            ClientState::Closed => false,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ClientState::Active(_))
    }

    /// Connect our output port to a JACK MIDI input port
    pub fn connect_to(&self, destination: &str) -> Result<()> {
        match &self.state {
            ClientState::Active(active) => {
                active
                    .as_client()
                    .connect_ports_by_name(&self.port_name, destination)?;
                log::info!("Connected {} -> {}", self.port_name, destination);
                Ok(())
            }
            _ => Err(Error::Midi(format!(
                "cannot connect {} before the client is active",
                self.port_name
            ))),
        }
    }

    /// Connect to every destination, logging failures
    pub fn auto_connect(&self, destinations: &[String]) {
        for dest in destinations {
            if let Err(e) = self.connect_to(dest) {
                log::warn!("Failed to auto-connect to {}: {}", dest, e);
            }
        }
    }

    /// Full port name, `client:port`
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Events rejected because the queue was full
    pub fn dropped_events(&self) -> u64 {
        self.producer.dropped()
    }

    /// Period batches the process callback failed to write
    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches.load(Ordering::Relaxed)
    }

    fn report_dropped_batches(&mut self) {
        let dropped = self.dropped_batches();
        if dropped > self.reported_batches {
            log::warn!(
                "JACK output dropped {} batch(es) of MIDI events",
                dropped - self.reported_batches
            );
            self.reported_batches = dropped;
        }
    }
}

impl MidiOutput for JackMidiOutput {
    fn submit_event(&mut self, event: MidiEvent) -> bool {
        self.report_dropped_batches();
        let queued = self.producer.try_push(event);
        if !queued {
            log::debug!("MIDI queue full, dropped {:02x?}", event.as_bytes());
        }
        queued
    }
}

impl Drop for JackMidiOutput {
    fn drop(&mut self) {
        let (client, handler) = match std::mem::replace(&mut self.state, ClientState::Closed) {
            ClientState::Active(active) => match active.deactivate() {
                Ok((client, (), handler)) => (client, handler),
                Err(e) => {
                    log::warn!("Failed to deactivate JACK client: {}", e);
                    return;
                }
            },
            ClientState::Inactive { client, handler } => (client, handler),
            ClientState::Closed => return,
        };

        if let Err(e) = client.unregister_port(handler.midi_out) {
            log::warn!("Failed to unregister JACK port {}: {}", self.port_name, e);
        }
        drop(client);
    }
}

/// Check if JACK is running
pub fn is_jack_running() -> bool {
    jack::Client::new("xkb2midi-probe", jack::ClientOptions::NO_START_SERVER).is_ok()
}

/// List available JACK MIDI input ports
pub fn list_jack_midi_ports() -> Vec<String> {
    if let Ok((client, _)) = jack::Client::new("xkb2midi-list", jack::ClientOptions::NO_START_SERVER) {
        client.ports(None, Some("midi"), jack::PortFlags::IS_INPUT)
    } else {
        Vec::new()
    }
}
