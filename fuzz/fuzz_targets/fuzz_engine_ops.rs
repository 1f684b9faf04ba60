#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use poolkv::{Config, Engine, SyncMode};
use std::collections::BTreeMap;

#[derive(Arbitrary, Debug)]
enum Op {
    Put { key: Vec<u8>, value: Vec<u8> },
    Get { key: Vec<u8> },
    Remove { key: Vec<u8> },
    CountAbove { key: Vec<u8> },
    Reopen,
}

fuzz_target!(|ops: Vec<Op>| {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = Config::new(dir.path().join("pool")).with_sync_mode(SyncMode::None);
    let mut engine = Engine::open("tree", config.clone()).expect("open");
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    // Limit operations and sizes to prevent timeout
    for op in ops.into_iter().take(200) {
        match op {
            Op::Put { key, value } => {
                if key.len() > 256 || value.len() > 512 {
                    continue;
                }
                let result = engine.put(&key, &value);
                if key.is_empty() {
                    assert!(result.is_err());
                } else {
                    result.expect("put");
                    model.insert(key, value);
                }
            }
            Op::Get { key } => {
                let got = engine.get(&key).expect("get");
                assert_eq!(got.as_deref(), model.get(&key).map(Vec::as_slice));
            }
            Op::Remove { key } => {
                let removed = engine.remove(&key).expect("remove");
                assert_eq!(removed, model.remove(&key).is_some());
            }
            Op::CountAbove { key } => {
                let expected = model
                    .range::<[u8], _>((
                        std::ops::Bound::Excluded(&key[..]),
                        std::ops::Bound::Unbounded,
                    ))
                    .count() as u64;
                assert_eq!(engine.count_above(&key).expect("count_above"), expected);
            }
            Op::Reopen => {
                // Alternate between a clean close and a simulated crash
                if model.len() % 2 == 0 {
                    engine.close().expect("close");
                } else {
                    std::mem::forget(engine);
                }
                engine = Engine::open("tree", config.clone()).expect("reopen");
            }
        }
    }

    assert_eq!(engine.count().expect("count"), model.len() as u64);
    let mut visited = Vec::new();
    engine
        .each(|key, value| visited.push((key.to_vec(), value.to_vec())))
        .expect("each");
    assert_eq!(visited, model.into_iter().collect::<Vec<_>>());
});
