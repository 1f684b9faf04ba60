#![no_main]

use libfuzzer_sys::fuzz_target;
use poolkv_wal::record::WalRecord;

fuzz_target!(|data: &[u8]| {
    // Limit input size to prevent timeout
    if data.len() > 1_000_000 {
        return;
    }

    // Decoding must never panic and never claim more bytes than it was given
    if let Ok((_, used)) = WalRecord::decode(data) {
        assert!(used <= data.len());
    }
});
