// Readiness multiplexing across all occupied slots.
//
// Architecture: one reader thread per occupied slot, all feeding a single
// bounded `mpsc::sync_channel` that the relay's main loop drains. A full
// channel blocks the reader threads, which stops them reading their sockets,
// so a flooding client is throttled by TCP backpressure instead of growing
// the relay's memory.
//
// - `watch()` spawns a reader thread for a freshly occupied slot. The thread
//   blocks in `ChunkSource::read_chunk` with a buffer of `read_buffer_size`
//   bytes and sends one `Readiness` per read: the bytes, end-of-stream, or
//   the error. It exits after end-of-stream or an error, or as soon as the
//   multiplexer is gone.
// - `poll()` waits on the channel with a bounded timeout, then drains what
//   else is already queued, up to the channel bound, so one batch is never
//   larger than the channel can hold. It drops events whose token no longer
//   matches the slot's occupant (the endpoint was vacated, possibly reused),
//   and returns the rest ordered by slot index. Events from one slot keep
//   their arrival order.
//
// Reader threads never write and never touch the slot table, so the main
// loop remains the only mutator of relay state. The timeout on `poll()` is
// the loop's only suspension point; it returns control even when nothing is
// readable so the acceptor gets another chance to run.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use crate::endpoint::ChunkSource;
use crate::error::{RelayError, Result};
use crate::slots::{EndpointToken, SlotIndex, SlotTable};

/// What one read on one endpoint produced.
#[derive(Debug)]
pub enum ReadOutcome {
    Data(Vec<u8>),
    EndOfStream,
    Failed(io::Error),
}

/// A readable slot and the result of reading it.
#[derive(Debug)]
pub struct Readiness {
    pub slot: SlotIndex,
    pub token: EndpointToken,
    pub outcome: ReadOutcome,
}

/// Queued readiness events allowed per slot of the relay's capacity.
pub const EVENTS_PER_SLOT: usize = 4;

pub struct EventMultiplexer {
    tx: SyncSender<Readiness>,
    rx: Receiver<Readiness>,
    read_buffer_size: usize,
    bound: usize,
}

impl EventMultiplexer {
    /// `bound` caps both the queued events and the size of one `poll` batch.
    pub fn new(read_buffer_size: usize, bound: usize) -> Self {
        let bound = bound.max(1);
        let (tx, rx) = mpsc::sync_channel(bound);
        Self {
            tx,
            rx,
            read_buffer_size,
            bound,
        }
    }

    /// Start reporting readiness for `slot`, whose current occupant carries
    /// `token` and reads through `source`.
    pub fn watch<S: ChunkSource>(
        &self,
        slot: SlotIndex,
        token: EndpointToken,
        source: S,
    ) -> Result<()> {
        let tx = self.tx.clone();
        let buffer_size = self.read_buffer_size;
        thread::Builder::new()
            .name(format!("relay-reader-{}", slot.0))
            .spawn(move || reader_loop(source, slot, token, buffer_size, tx))
            .map_err(|e| RelayError::Multiplex(format!("cannot spawn reader for {slot}: {e}")))?;
        debug!(%slot, token = token.0, "watching");
        Ok(())
    }

    /// Wait up to `timeout` for readable slots. An empty result is the
    /// ordinary quiet-period outcome, not an error.
    pub fn poll<E>(&self, table: &SlotTable<E>, timeout: Duration) -> Result<Vec<Readiness>> {
        let first = match self.rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
            // Unreachable: `self.tx` keeps the channel open.
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RelayError::Multiplex("readiness channel closed".into()));
            }
        };

        let mut ready = Vec::new();
        // Drain events that arrived while we were waiting, up to one bound's
        // worth. The rest wait for the next cycle.
        let batch = std::iter::once(first).chain(self.rx.try_iter().take(self.bound - 1));
        for event in batch {
            if table.token(event.slot) == Some(event.token) {
                ready.push(event);
            } else {
                trace!(slot = %event.slot, token = event.token.0, "dropping stale event");
            }
        }
        // Stable, so per-slot arrival order survives.
        ready.sort_by_key(|event| event.slot);
        Ok(ready)
    }
}

/// Reader thread body: read chunks until end-of-stream, an error, or the
/// multiplexer going away.
fn reader_loop<S: ChunkSource>(
    mut source: S,
    slot: SlotIndex,
    token: EndpointToken,
    buffer_size: usize,
    tx: SyncSender<Readiness>,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let outcome = match source.read_chunk(&mut buf) {
            Ok(0) => ReadOutcome::EndOfStream,
            Ok(n) => ReadOutcome::Data(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => ReadOutcome::Failed(e),
        };
        let last = !matches!(outcome, ReadOutcome::Data(_));
        if tx
            .send(Readiness {
                slot,
                token,
                outcome,
            })
            .is_err()
        {
            // Main loop dropped the receiver.
            break;
        }
        if last {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Scripted source: yields its reads in order, then end-of-stream.
    struct Script(VecDeque<io::Result<Vec<u8>>>);

    impl ChunkSource for Script {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    fn script(reads: Vec<io::Result<Vec<u8>>>) -> Script {
        Script(reads.into_iter().collect())
    }

    /// Poll repeatedly until `count` events have been collected.
    fn poll_until(
        mux: &EventMultiplexer,
        table: &SlotTable<&'static str>,
        count: usize,
    ) -> Vec<Readiness> {
        let mut events = Vec::new();
        for _ in 0..100 {
            events.extend(mux.poll(table, Duration::from_millis(20)).unwrap());
            if events.len() >= count {
                break;
            }
        }
        events
    }

    #[test]
    fn quiet_poll_times_out_empty() {
        let mux = EventMultiplexer::new(1024, 16);
        let table = SlotTable::new(3, "monitor");
        let ready = mux.poll(&table, Duration::from_millis(10)).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn reports_data_then_end_of_stream() {
        let mux = EventMultiplexer::new(1024, 16);
        let mut table = SlotTable::new(3, "monitor");
        let token = table.occupy(SlotIndex(1), "a", None).unwrap();
        mux.watch(SlotIndex(1), token, script(vec![Ok(b"hello".to_vec())]))
            .unwrap();

        let events = poll_until(&mux, &table, 2);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0].outcome, ReadOutcome::Data(d) if d == b"hello"));
        assert!(matches!(events[1].outcome, ReadOutcome::EndOfStream));
        assert!(events.iter().all(|e| e.slot == SlotIndex(1)));
    }

    #[test]
    fn reads_are_capped_at_buffer_size() {
        let mux = EventMultiplexer::new(4, 16);
        let mut table = SlotTable::new(2, "monitor");
        let token = table.occupy(SlotIndex(1), "a", None).unwrap();
        mux.watch(SlotIndex(1), token, script(vec![Ok(b"abcdefgh".to_vec())]))
            .unwrap();

        let events = poll_until(&mux, &table, 1);
        assert!(matches!(&events[0].outcome, ReadOutcome::Data(d) if d == b"abcd"));
    }

    #[test]
    fn read_error_is_reported_and_ends_reader() {
        let mux = EventMultiplexer::new(16, 16);
        let mut table = SlotTable::new(2, "monitor");
        let token = table.occupy(SlotIndex(1), "a", None).unwrap();
        let reads = vec![
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Err(io::Error::from(io::ErrorKind::ConnectionReset)),
            Ok(b"never".to_vec()),
        ];
        mux.watch(SlotIndex(1), token, script(reads)).unwrap();

        let events = poll_until(&mux, &table, 1);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0].outcome,
            ReadOutcome::Failed(e) if e.kind() == io::ErrorKind::ConnectionReset
        ));
        // Nothing follows the error.
        assert!(mux.poll(&table, Duration::from_millis(50)).unwrap().is_empty());
    }

    #[test]
    fn stale_events_are_dropped_after_slot_reuse() {
        let mux = EventMultiplexer::new(16, 16);
        let mut table = SlotTable::new(2, "monitor");
        let old = table.occupy(SlotIndex(1), "old", None).unwrap();
        table.vacate(SlotIndex(1)).unwrap();
        let new = table.occupy(SlotIndex(1), "new", None).unwrap();

        mux.watch(SlotIndex(1), old, script(vec![Ok(b"ghost".to_vec())]))
            .unwrap();
        // Give the stale reader time to queue both of its events.
        thread::sleep(Duration::from_millis(50));
        mux.watch(SlotIndex(1), new, script(vec![Ok(b"live".to_vec())]))
            .unwrap();

        let events = poll_until(&mux, &table, 2);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.token == new));
        assert!(matches!(&events[0].outcome, ReadOutcome::Data(d) if d == b"live"));
    }

    #[test]
    fn one_poll_takes_at_most_the_bound() {
        let mux = EventMultiplexer::new(16, 3);
        let mut table = SlotTable::new(2, "monitor");
        let token = table.occupy(SlotIndex(1), "a", None).unwrap();
        let reads = (0..10).map(|i| Ok(vec![i as u8])).collect();
        mux.watch(SlotIndex(1), token, script(reads)).unwrap();
        // The reader fills the channel and then blocks.
        thread::sleep(Duration::from_millis(50));

        let first = mux.poll(&table, Duration::from_millis(50)).unwrap();
        assert_eq!(first.len(), 3);

        // Nothing was lost: the blocked reader resumes and the rest arrive
        // in order.
        let rest = poll_until(&mux, &table, 8);
        let data: Vec<u8> = first
            .iter()
            .chain(rest.iter())
            .filter_map(|e| match &e.outcome {
                ReadOutcome::Data(d) => Some(d[0]),
                _ => None,
            })
            .collect();
        assert_eq!(data, (0..10).collect::<Vec<u8>>());
        assert!(matches!(
            rest.last().map(|e| &e.outcome),
            Some(ReadOutcome::EndOfStream)
        ));
    }

    #[test]
    fn ready_set_is_ordered_by_slot() {
        let mux = EventMultiplexer::new(16, 16);
        let mut table = SlotTable::new(4, "monitor");
        let t3 = table.occupy(SlotIndex(3), "c", None).unwrap();
        let t1 = table.occupy(SlotIndex(1), "a", None).unwrap();
        mux.watch(SlotIndex(3), t3, script(vec![Ok(b"three".to_vec())]))
            .unwrap();
        mux.watch(SlotIndex(1), t1, script(vec![Ok(b"one".to_vec())]))
            .unwrap();
        // Let both readers finish so a single poll sees everything.
        thread::sleep(Duration::from_millis(50));

        let events = mux.poll(&table, Duration::from_millis(50)).unwrap();
        let slots: Vec<SlotIndex> = events.iter().map(|e| e.slot).collect();
        assert_eq!(
            slots,
            vec![SlotIndex(1), SlotIndex(1), SlotIndex(3), SlotIndex(3)]
        );
    }
}
