//! Optional per-step opcode trace: a bounded ring buffer the simulation task
//! writes to and the packet encoder reads from between steps. Only the
//! simulation task ever writes here.

const CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct TraceRecord {
    pub tick_count: u64,
    pub pc: u16,
    pub opcode: u16,
}

#[derive(Debug)]
pub struct TraceRing {
    enabled: bool,
    records: Vec<TraceRecord>,
    next: usize,
}

impl TraceRing {
    pub fn new(enabled: bool) -> Self {
        TraceRing { enabled, records: Vec::with_capacity(if enabled { CAPACITY } else { 0 }), next: 0 }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn push(&mut self, record: TraceRecord) {
        if !self.enabled {
            return;
        }
        if self.records.len() < CAPACITY {
            self.records.push(record);
        } else {
            self.records[self.next] = record;
            self.next = (self.next + 1) % CAPACITY;
        }
    }

    /// Records in chronological order, oldest first.
    pub fn drain_ordered(&self) -> Vec<TraceRecord> {
        if self.records.len() < CAPACITY {
            self.records.clone()
        } else {
            let mut out = Vec::with_capacity(CAPACITY);
            out.extend_from_slice(&self.records[self.next..]);
            out.extend_from_slice(&self.records[..self.next]);
            out
        }
    }

    /// Take every record accumulated since the last drain and empty the ring.
    /// The packet encoder calls this between steps so each batch of records
    /// is reported exactly once.
    pub fn drain_and_clear(&mut self) -> Vec<TraceRecord> {
        let out = self.drain_ordered();
        self.records.clear();
        self.next = 0;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_ring_records_nothing() {
        let mut ring = TraceRing::new(false);
        ring.push(TraceRecord { tick_count: 0, pc: 0, opcode: 0 });
        assert!(ring.drain_ordered().is_empty());
    }

    #[test]
    fn drain_and_clear_empties_the_ring() {
        let mut ring = TraceRing::new(true);
        ring.push(TraceRecord { tick_count: 1, pc: 2, opcode: 3 });
        let first = ring.drain_and_clear();
        assert_eq!(first.len(), 1);
        assert!(ring.drain_ordered().is_empty());
    }

    #[test]
    fn enabled_ring_wraps_after_capacity() {
        let mut ring = TraceRing::new(true);
        for i in 0..CAPACITY + 10 {
            ring.push(TraceRecord { tick_count: i as u64, pc: i as u16, opcode: 0 });
        }
        let ordered = ring.drain_ordered();
        assert_eq!(ordered.len(), CAPACITY);
        assert_eq!(ordered.first().unwrap().tick_count, 10);
        assert_eq!(ordered.last().unwrap().tick_count, (CAPACITY + 9) as u64);
    }
}
