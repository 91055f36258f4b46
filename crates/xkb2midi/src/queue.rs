//! Lock-free single-producer/single-consumer event queue
//!
//! Bridges the dispatch thread (the only writer) and the JACK process
//! callback (the only reader). The queue stores raw MIDI bytes in a
//! [`HeapRb`] and only ever accepts or hands out whole 3-byte events, so the
//! reader never observes a torn message.
//!
//! Handles are `Send` but neither `Clone` nor `Sync`, which keeps the
//! one-writer/one-reader invariant in the type system.

use crate::midi::{MidiEvent, MIDI_EVENT_SIZE};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Default queue size in bytes: 341 events, just under 1 KiB
pub const DEFAULT_QUEUE_CAPACITY: usize = 341 * MIDI_EVENT_SIZE;

/// Create a queue holding `capacity` bytes and split it into its two ends.
///
/// # Panics
///
/// Panics if `capacity` is zero or not a multiple of the 3-byte event size.
pub fn event_queue(capacity: usize) -> (EventProducer, EventConsumer) {
    assert!(
        capacity > 0 && capacity % MIDI_EVENT_SIZE == 0,
        "queue capacity must be a non-zero multiple of {} bytes, got {}",
        MIDI_EVENT_SIZE,
        capacity
    );

    let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
    (
        EventProducer { producer, dropped: 0 },
        EventConsumer { consumer },
    )
}

/// Writing end of the queue, owned by the dispatch thread
pub struct EventProducer {
    producer: HeapProd<u8>,
    dropped: u64,
}

impl EventProducer {
    /// Append one event.
    ///
    /// Returns `false` without touching the buffer if the whole event does
    /// not fit. Never blocks, locks or allocates.
    pub fn try_push(&mut self, event: MidiEvent) -> bool {
        if self.producer.vacant_len() < MIDI_EVENT_SIZE {
            self.dropped += 1;
            return false;
        }
        self.producer.push_slice(event.as_bytes()) == MIDI_EVENT_SIZE
    }

    /// Number of events rejected because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }
}

/// Reading end of the queue, owned by the audio callback
pub struct EventConsumer {
    consumer: HeapCons<u8>,
}

impl EventConsumer {
    /// Bytes currently queued
    pub fn available_bytes(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Whole events currently queued
    pub fn available_events(&self) -> usize {
        self.available_bytes() / MIDI_EVENT_SIZE
    }

    /// Move as many whole events as fit into `out`, oldest first.
    ///
    /// Returns the number of bytes written, always a multiple of the event
    /// size. Trailing bytes of an incomplete event stay queued. Never blocks,
    /// locks or allocates.
    pub fn drain(&mut self, out: &mut [u8]) -> usize {
        let available = self.consumer.occupied_len().min(out.len());
        let count = available - available % MIDI_EVENT_SIZE;
        self.consumer.pop_slice(&mut out[..count])
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.consumer.capacity().get()
    }
}
