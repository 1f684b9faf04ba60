#![no_main]

use libfuzzer_sys::fuzz_target;
use poolkv_heap::PoolImage;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1_000_000 {
        return;
    }

    // Corrupt images are reported, never panicked on
    let _ = PoolImage::decode(data);
});
