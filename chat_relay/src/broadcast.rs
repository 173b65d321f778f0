// Read/broadcast/cleanup step of the relay cycle.
//
// `BroadcastRelay::process` takes the ready set from the multiplexer, in slot
// order, and applies each read result to the slot table:
//
// - Data: handed unmodified to every other occupied slot. The sender never
//   gets its own bytes back. Delivery never blocks: a recipient whose
//   outbound queue is full, or whose writer has stopped, misses this chunk.
//   That is logged at debug level and otherwise ignored; a dead peer is
//   noticed by its own reader thread.
// - End-of-stream from a client: close the endpoint, vacate the slot, and
//   produce a disconnect notice if the slot carries an address label.
// - End-of-stream from the monitor: request shutdown. The rest of the ready
//   set is still processed so nothing already read is lost.
// - Read error: fatal (`RelayError::Read`) unless `isolate_read_errors` is
//   set, in which case a client error is handled as that client's
//   disconnect. A monitor read error is always fatal.
//
// `shutdown` closes everything that is left, in slot order.

use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::error::{RelayError, Result};
use crate::multiplexer::{ReadOutcome, Readiness};
use crate::notice::Notice;
use crate::slots::{SlotIndex, SlotTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Shutdown,
}

/// Result of processing one ready set.
#[derive(Debug)]
pub struct CycleOutcome {
    pub disposition: Disposition,
    pub notices: Vec<Notice>,
    /// Messages fanned out this cycle.
    pub relayed: usize,
    /// Client slots vacated this cycle.
    pub disconnected: usize,
}

pub struct BroadcastRelay {
    isolate_read_errors: bool,
}

impl BroadcastRelay {
    pub fn new(isolate_read_errors: bool) -> Self {
        Self {
            isolate_read_errors,
        }
    }

    pub fn process(
        &self,
        table: &mut SlotTable<Endpoint>,
        ready: Vec<Readiness>,
    ) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome {
            disposition: Disposition::Continue,
            notices: Vec::new(),
            relayed: 0,
            disconnected: 0,
        };

        for Readiness {
            slot,
            token,
            outcome: read,
        } in ready
        {
            // An earlier event in this batch may have vacated the slot.
            if table.token(slot) != Some(token) {
                continue;
            }
            match read {
                ReadOutcome::Data(bytes) => {
                    let recipients = fan_out(table, slot, &bytes);
                    debug!(%slot, len = bytes.len(), recipients, "relayed");
                    outcome.relayed += 1;
                }
                ReadOutcome::EndOfStream if slot.is_monitor() => {
                    debug!("monitor reached end-of-stream");
                    outcome.disposition = Disposition::Shutdown;
                }
                ReadOutcome::EndOfStream => {
                    outcome.notices.extend(disconnect(table, slot));
                    outcome.disconnected += 1;
                }
                ReadOutcome::Failed(source) => {
                    if !self.isolate_read_errors || slot.is_monitor() {
                        return Err(RelayError::Read { slot, source });
                    }
                    warn!(%slot, error = %source, "read failed, dropping client");
                    outcome.notices.extend(disconnect(table, slot));
                    outcome.disconnected += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Close every remaining slot in index order. Returns a
    /// disconnected-by-server notice for each labelled client.
    pub fn shutdown(&self, table: &mut SlotTable<Endpoint>) -> Vec<Notice> {
        let mut notices = Vec::new();
        for (slot, occupant) in table.drain() {
            // Only client slots carry a label.
            if let Some(addr) = occupant.label {
                notices.push(Notice::DisconnectedByServer(addr));
            }
            debug!(%slot, "closing");
            occupant.endpoint.close();
        }
        notices
    }
}

/// Write `bytes` to every occupied slot except `source`. Returns the number
/// of recipients the write succeeded for.
pub fn fan_out(table: &mut SlotTable<Endpoint>, source: SlotIndex, bytes: &[u8]) -> usize {
    let mut delivered = 0;
    for index in table.occupied_indices() {
        if index == source {
            continue;
        }
        let Some(recipient) = table.get_mut(index) else {
            continue;
        };
        match recipient.endpoint.deliver(bytes) {
            Ok(()) => delivered += 1,
            Err(e) => debug!(slot = %index, error = %e, "write failed"),
        }
    }
    delivered
}

fn disconnect(table: &mut SlotTable<Endpoint>, slot: SlotIndex) -> Option<Notice> {
    let occupant = table.vacate(slot)?;
    debug!(%slot, "client disconnected");
    occupant.endpoint.close();
    occupant.label.map(Notice::Disconnected)
}
