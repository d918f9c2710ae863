use crate::protocol::{Frame, Reading};
use crate::registers::{Marker, RegisterId};
use std::collections::BTreeMap;
use tracing::{trace, warn};

/// The latest known reading of a register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Entry {
    pub value: i64,
    pub marker: Marker,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub merged: usize,
    pub changed: usize,
    pub skipped: usize,
}

/// Our view of the stove's registers.
///
/// Entries are only ever replaced by a newer reading of the same register. A poll that yields
/// nothing leaves the store exactly as it was, so stale values are served over absent ones.
#[derive(Default)]
pub struct RegisterStore {
    values: BTreeMap<RegisterId, Entry>,
    updated_at: Option<jiff::Timestamp>,
}

impl RegisterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, register: RegisterId) -> Option<Entry> {
        self.values.get(&register).copied()
    }

    /// Record a newly decoded reading.
    ///
    /// Returns `true` if the value or marker has changed.
    pub fn set_value(&mut self, reading: Reading) -> bool {
        let entry = Entry { value: reading.value, marker: reading.marker };
        self.values.insert(reading.register, entry) != Some(entry)
    }

    /// Merge every decodable reading of a response into the store.
    ///
    /// Fields that fail to decode are logged and skipped, the rest of the batch still applies.
    pub fn merge(&mut self, frame: &Frame) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for reading in frame.readings() {
            let reading = match reading {
                Ok(reading) => reading,
                Err(e) => {
                    warn!(
                        message = "skipping undecodable field",
                        error = (&e as &dyn std::error::Error)
                    );
                    summary.skipped += 1;
                    continue;
                }
            };
            summary.merged += 1;
            if self.set_value(reading) {
                trace!(register = %reading.register, value = reading.value, "register changed");
                summary.changed += 1;
            }
        }
        if summary.merged > 0 {
            self.updated_at = Some(jiff::Timestamp::now());
        }
        summary
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot { updated_at: self.updated_at, registers: self.values.clone() }
    }
}

/// A point in time copy of the [`RegisterStore`].
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct Snapshot {
    updated_at: Option<jiff::Timestamp>,
    registers: BTreeMap<RegisterId, Entry>,
}

impl Snapshot {
    pub fn get(&self, register: RegisterId) -> Option<Entry> {
        self.registers.get(&register).copied()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// When a reading was last merged into the store.
    pub fn updated_at(&self) -> Option<jiff::Timestamp> {
        self.updated_at
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegisterId, Entry)> + '_ {
        self.registers.iter().map(|(id, entry)| (*id, *entry))
    }

    /// Restrict the snapshot to the monitored registers. An empty list keeps everything.
    pub fn select(&self, monitored: &[RegisterId]) -> Snapshot {
        if monitored.is_empty() {
            return self.clone();
        }
        let registers =
            self.iter().filter(|(id, _)| monitored.contains(id)).collect::<BTreeMap<_, _>>();
        Snapshot { updated_at: self.updated_at, registers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> RegisterId {
        s.parse().unwrap()
    }

    fn store_with(text: &str) -> RegisterStore {
        let mut store = RegisterStore::new();
        store.merge(&Frame::parse(text));
        store
    }

    #[test]
    fn merges_readings() {
        let store = store_with(r#"["SEL","2","I30001000000000005","I30017000000000210"]"#);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(id("30001")), Some(Entry { value: 5, marker: Marker('I') }));
        assert_eq!(snapshot.get(id("30017")), Some(Entry { value: 210, marker: Marker('I') }));
        assert!(snapshot.updated_at().is_some());
    }

    #[test]
    fn empty_merge_is_a_no_op() {
        let mut store = store_with(r#"["SEL","1","I30001000000000005"]"#);
        let before = store.snapshot();
        assert_eq!(store.merge(&Frame::default()), MergeSummary::default());
        assert_eq!(store.merge(&Frame::parse("")), MergeSummary::default());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn overwrites_only_the_reported_register() {
        let mut store = store_with(r#"["SEL","2","I30001000000000005","B20364000000000003"]"#);
        let summary = store.merge(&Frame::parse(r#"["SEL","1","J30001000000000007"]"#));
        assert_eq!(summary, MergeSummary { merged: 1, changed: 1, skipped: 0 });
        assert_eq!(store.get(id("30001")), Some(Entry { value: 7, marker: Marker('J') }));
        assert_eq!(store.get(id("20364")), Some(Entry { value: 3, marker: Marker('B') }));
    }

    #[test]
    fn unchanged_values_are_not_counted_as_changes() {
        let mut store = store_with(r#"["SEL","1","I30001000000000005"]"#);
        let summary = store.merge(&Frame::parse(r#"["SEL","1","I30001000000000005"]"#));
        assert_eq!(summary, MergeSummary { merged: 1, changed: 0, skipped: 0 });
    }

    #[test]
    fn bad_fields_are_skipped() {
        let mut store = RegisterStore::new();
        let summary =
            store.merge(&Frame::parse(r#"["SEL","2","I30001000000000005","I30002zzzzzzzzzzzz"]"#));
        assert_eq!(summary, MergeSummary { merged: 1, changed: 1, skipped: 1 });
        assert!(store.get(id("30002")).is_none());
        assert!(store.get(id("30001")).is_some());
    }

    #[test]
    fn cut_off_responses_do_not_clobber_readings() {
        use crate::protocol::StoveCodec;
        use tokio_util::bytes::BytesMut;
        use tokio_util::codec::Decoder as _;

        let full = r#"["SEL","2","I30001000000000005","I30017000000000210"]"#;
        let mut store = store_with(full);
        let mut cut = BytesMut::from(&full.as_bytes()[..full.len() - 6]);
        let frame = StoveCodec {}.decode_eof(&mut cut).unwrap().unwrap();
        let summary = store.merge(&frame);
        assert_eq!(summary, MergeSummary { merged: 1, changed: 0, skipped: 0 });
        assert_eq!(store.get(id("30017")).map(|e| e.value), Some(210));
    }

    #[test]
    fn select_monitored() {
        let store = store_with(r#"["SEL","2","I30001000000000005","I30017000000000210"]"#);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.select(&[]).len(), 2);
        let selected = snapshot.select(&[id("30017"), id("99999")]);
        assert_eq!(selected.len(), 1);
        assert!(selected.get(id("30017")).is_some());
    }
}
