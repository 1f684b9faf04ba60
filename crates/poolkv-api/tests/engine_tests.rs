mod common;

use common::{entries, keys, PoolFixture};
use poolkv::{Config, Engine, Error, ErrorKind};
use std::collections::BTreeMap;

#[test]
fn test_three_keys_remove_middle() {
    let fixture = PoolFixture::new();
    let engine = fixture.open_tree();

    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.put(b"c", b"3").unwrap();
    assert!(engine.remove(b"b").unwrap());

    assert_eq!(engine.count().unwrap(), 2);
    assert!(!engine.exists(b"b").unwrap());
    assert_eq!(
        entries(&engine),
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"c".to_vec(), b"3".to_vec())
        ]
    );
}

#[test]
fn test_discard_stores_nothing() {
    let fixture = PoolFixture::new();
    let engine = Engine::open("discard", fixture.config()).unwrap();

    let written: Vec<Vec<u8>> = (0..100u32).map(|i| i.to_be_bytes().to_vec()).collect();
    for key in &written {
        engine.put(key, b"value").unwrap();
    }

    assert_eq!(engine.count().unwrap(), 0);
    for key in &written {
        assert_eq!(engine.get(key).unwrap(), None);
    }
    assert!(entries(&engine).is_empty());
    assert!(!fixture.pool_path.exists());
}

#[test]
fn test_all_puts_readable_and_counted() {
    let fixture = PoolFixture::new();
    let engine = fixture.open_tree();
    let mut model = BTreeMap::new();

    // Mixed key lengths, binary keys, and values on both sides of the
    // inline threshold
    for i in 0..1000u32 {
        let key = match i % 3 {
            0 => format!("user:{}", i).into_bytes(),
            1 => i.to_be_bytes().to_vec(),
            _ => vec![0xFF; (i % 7 + 1) as usize]
                .into_iter()
                .chain(i.to_le_bytes())
                .collect(),
        };
        let value = vec![(i % 251) as u8; (i as usize * 13) % 300];
        engine.put(&key, &value).unwrap();
        model.insert(key, value);
    }

    assert_eq!(engine.count().unwrap(), model.len() as u64);
    for (key, value) in &model {
        assert_eq!(engine.get(key).unwrap().unwrap().as_bytes(), &value[..]);
    }

    let expected: Vec<_> = model.into_iter().collect();
    assert_eq!(entries(&engine), expected);
}

#[test]
fn test_remove_twice() {
    let fixture = PoolFixture::new();
    let engine = fixture.open_tree();
    engine.put(b"k", b"v").unwrap();

    assert!(engine.remove(b"k").unwrap());
    assert!(!engine.exists(b"k").unwrap());
    assert!(!engine.remove(b"k").unwrap());
    assert!(!engine.exists(b"k").unwrap());
}

#[test]
fn test_overwrite_keeps_count() {
    let fixture = PoolFixture::new();
    let engine = fixture.open_tree();

    engine.put(b"k", b"v1").unwrap();
    engine.put(b"k", b"v2").unwrap();

    assert_eq!(engine.get(b"k").unwrap().unwrap().as_bytes(), b"v2");
    assert_eq!(engine.count().unwrap(), 1);
}

#[test]
fn test_key_ordering_shorter_prefix_first() {
    let fixture = PoolFixture::new();
    let engine = fixture.open_tree();

    for key in [&b"ab"[..], b"a", b"b", b"a\x00", b"\xFF", b"aa"] {
        engine.put(key, b"").unwrap();
    }

    assert_eq!(
        keys(&engine),
        vec![
            b"a".to_vec(),
            b"a\x00".to_vec(),
            b"aa".to_vec(),
            b"ab".to_vec(),
            b"b".to_vec(),
            b"\xFF".to_vec()
        ]
    );
}

#[test]
fn test_empty_value_is_stored() {
    let fixture = PoolFixture::new();
    let engine = fixture.open_tree();

    engine.put(b"empty", b"").unwrap();
    assert!(engine.exists(b"empty").unwrap());
    assert_eq!(engine.get(b"empty").unwrap().unwrap().len(), 0);
}

#[test]
fn test_calls_after_close_fail() {
    let fixture = PoolFixture::new();
    let engine = fixture.open_tree();
    engine.put(b"k", b"v").unwrap();
    engine.close().unwrap();

    assert!(matches!(engine.put(b"k", b"v"), Err(Error::Closed)));
    assert!(matches!(engine.get(b"k"), Err(Error::Closed)));
    assert!(matches!(engine.exists(b"k"), Err(Error::Closed)));
    assert!(matches!(engine.remove(b"k"), Err(Error::Closed)));
    assert!(matches!(engine.count(), Err(Error::Closed)));
    assert!(matches!(engine.each(|_, _| ()), Err(Error::Closed)));
    assert!(matches!(engine.flush(), Err(Error::Closed)));

    // Closing again is fine
    engine.close().unwrap();
}

#[test]
fn test_invalid_config_fields() {
    let fixture = PoolFixture::new();

    let err = Engine::open("tree", Config::new("")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let err = Engine::open("tree", fixture.config().with_size(100)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let err = Engine::open_json("tree", r#"{"size": 1048576}"#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let err = Engine::open_json("tree", "{ not json").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_open_json() {
    let fixture = PoolFixture::new();
    let json = format!(
        r#"{{"path": "{}", "size": 1048576, "sync": "async"}}"#,
        fixture.pool_path.display()
    );

    let engine = Engine::open_json("kvtree3", &json).unwrap();
    engine.put(b"k", b"v").unwrap();
    assert_eq!(engine.backend_name(), "kvtree3");
    engine.close().unwrap();

    let engine = Engine::open_json("tree", &json).unwrap();
    assert_eq!(engine.get(b"k").unwrap().unwrap().as_bytes(), b"v");
}

#[test]
fn test_unusable_pool_path() {
    let fixture = PoolFixture::new();
    std::fs::write(&fixture.pool_path, b"i am a file").unwrap();

    let err = Engine::open("tree", fixture.config()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pool);
}

#[test]
fn test_volatile_map_forgets_on_close() {
    let fixture = PoolFixture::new();
    let engine = Engine::open("vsmap", fixture.config()).unwrap();
    engine.put(b"k", b"v").unwrap();
    assert_eq!(engine.count().unwrap(), 1);
    engine.close().unwrap();

    let engine = Engine::open("vsmap", fixture.config()).unwrap();
    assert_eq!(engine.count().unwrap(), 0);
}
