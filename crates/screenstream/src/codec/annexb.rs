/// Upper bound on a single buffered NAL unit before we give up and resync.
const MAX_PENDING: usize = 16 * 1024 * 1024;

/// Splits an Annex-B byte stream into NAL units across arbitrary chunk
/// boundaries.
///
/// Units are emitted with their start code once the next start code has
/// been seen. Bytes before the first start code are discarded.
#[derive(Debug, Default)]
pub struct AnnexBSplitter {
    pending: Vec<u8>,
    scan_from: usize,
    synced: bool,
}

impl AnnexBSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes`; push every unit they complete into `out`.
    pub fn push(&mut self, bytes: &[u8], out: &mut Vec<Vec<u8>>) {
        self.pending.extend_from_slice(bytes);

        if !self.synced {
            match start_codes(&self.pending, 0).first() {
                Some(&first) => {
                    self.pending.drain(..first);
                    self.synced = true;
                    self.scan_from = 1;
                }
                None => {
                    // Keep a possible partial start code
                    let keep_from = self.pending.len().saturating_sub(3);
                    self.pending.drain(..keep_from);
                    return;
                }
            }
        }

        let mut unit_start = 0;
        for position in start_codes(&self.pending, self.scan_from) {
            if position > unit_start {
                out.push(self.pending[unit_start..position].to_vec());
                unit_start = position;
            }
        }
        self.pending.drain(..unit_start);
        self.scan_from = self.pending.len().saturating_sub(3).max(1);

        if self.pending.len() > MAX_PENDING {
            tracing::warn!(
                pending = self.pending.len(),
                "NAL unit exceeds limit, resynchronizing"
            );
            self.reset();
        }
    }

    /// Emit the trailing unit at end of stream.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        let unit = std::mem::take(&mut self.pending);
        let synced = self.synced;
        self.reset();
        (synced && unit.len() > 4).then_some(unit)
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.scan_from = 0;
        self.synced = false;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Offsets of every start code (`00 00 01` or `00 00 00 01`) found at or
/// after `from`, pointing at the first zero byte.
fn start_codes(data: &[u8], from: usize) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut i = from;

    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            positions.push(start);
            i += 3;
        } else {
            i += 1;
        }
    }

    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f];
    const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80];
    const IDR: &[u8] = &[0, 0, 1, 0x65, 0x88, 0x84, 0x00, 0x33];

    fn stream() -> Vec<u8> {
        [SPS, PPS, IDR].concat()
    }

    #[test]
    fn test_whole_stream_in_one_chunk() {
        let mut splitter = AnnexBSplitter::new();
        let mut units = Vec::new();

        splitter.push(&stream(), &mut units);
        assert_eq!(units, vec![SPS.to_vec(), PPS.to_vec()]);

        assert_eq!(splitter.flush(), Some(IDR.to_vec()), "Last unit waits for flush");
    }

    #[test]
    fn test_byte_by_byte_chunks() {
        let mut splitter = AnnexBSplitter::new();
        let mut units = Vec::new();

        for byte in stream() {
            splitter.push(&[byte], &mut units);
        }

        assert_eq!(units, vec![SPS.to_vec(), PPS.to_vec()]);
        assert_eq!(splitter.flush(), Some(IDR.to_vec()));
    }

    #[test]
    fn test_start_code_split_across_chunks() {
        let data = stream();
        let mut splitter = AnnexBSplitter::new();
        let mut units = Vec::new();

        // Split inside the PPS start code
        let cut = SPS.len() + 2;
        splitter.push(&data[..cut], &mut units);
        assert!(units.is_empty());
        splitter.push(&data[cut..], &mut units);

        assert_eq!(units, vec![SPS.to_vec(), PPS.to_vec()]);
    }

    #[test]
    fn test_leading_garbage_discarded() {
        let mut splitter = AnnexBSplitter::new();
        let mut units = Vec::new();

        splitter.push(&[0xde, 0xad, 0xbe, 0xef], &mut units);
        assert!(splitter.pending_len() <= 3);

        splitter.push(&stream(), &mut units);
        assert_eq!(units, vec![SPS.to_vec(), PPS.to_vec()]);
    }

    #[test]
    fn test_flush_without_sync_yields_nothing() {
        let mut splitter = AnnexBSplitter::new();
        let mut units = Vec::new();
        splitter.push(&[1, 2, 3, 4, 5], &mut units);
        assert_eq!(splitter.flush(), None);
    }
}
