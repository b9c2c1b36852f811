//! 端到端批处理测试：用公开 API 构造真实的区域文件

use fastnbt::Value;
use mcabatch::codec::{self, Compression};
use mcabatch::config::PipelineConfig;
use mcabatch::coords::SLOT_COUNT;
use mcabatch::mca::{write_region, SlotImage};
use mcabatch::ops::{
    ChunkMatcher, DeleteBlockOperation, DeleteBlockParams, DeleteOperation, DeleteParams, IdSet, ImportOperation,
    ImportParams,
};
use mcabatch::{
    ChunkPos, EmptyFilePolicy, EmptyRegionPolicy, Error, Pipeline, RegionFile, RegionPos, SelectionSet,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn compound(entries: Vec<(&str, Value)>) -> Value {
    Value::Compound(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<HashMap<_, _>>())
}

fn mob(id: &str) -> Value {
    compound(vec![
        ("id", Value::String(id.to_string())),
        (
            "Pos",
            Value::List(vec![Value::Double(50.5), Value::Double(64.0), Value::Double(66.5)]),
        ),
    ])
}

fn chunk(pos: ChunkPos, entities: Vec<Value>) -> Value {
    compound(vec![
        ("xPos", Value::Int(pos.x)),
        ("zPos", Value::Int(pos.z)),
        ("Entities", Value::List(entities)),
    ])
}

fn write_world(dir: &Path, chunks: Vec<(ChunkPos, Value)>) -> PathBuf {
    let region = chunks[0].0.region();
    let payloads: Vec<(usize, Vec<u8>)> = chunks
        .iter()
        .map(|(pos, tree)| (pos.local().index(), codec::encode(tree, Compression::Zlib).unwrap()))
        .collect();
    let mut slots = vec![None; SLOT_COUNT];
    for (i, p) in &payloads {
        slots[*i] = Some(SlotImage {
            payload: p,
            timestamp: 1_600_000_000,
        });
    }
    let path = dir.join(region.file_name());
    write_region(&path, &slots, EmptyFilePolicy::Remove).unwrap();
    path
}

fn entities_of(path: &Path, pos: ChunkPos) -> Vec<Value> {
    let region = RegionFile::open(path).unwrap();
    let payload = region.read_chunk_payload(pos.local().index()).unwrap().unwrap();
    match codec::decode(payload).unwrap() {
        Value::Compound(mut map) => match map.remove("Entities") {
            Some(Value::List(list)) => list,
            _ => panic!("no Entities list"),
        },
        _ => panic!("root is not a compound"),
    }
}

fn pipeline(max_loaded: usize) -> Pipeline {
    Pipeline::new(PipelineConfig::with_threads(2, 2, 2, max_loaded)).unwrap()
}

#[test]
fn delete_block_removes_only_the_cow() {
    let dir = tempfile::tempdir().unwrap();
    let target = ChunkPos::new(3, 4);
    let neighbour = ChunkPos::new(4, 4);
    let path = write_world(
        dir.path(),
        vec![
            (
                target,
                chunk(target, vec![mob("minecraft:sheep"), mob("minecraft:cow"), mob("minecraft:pig")]),
            ),
            (neighbour, chunk(neighbour, vec![mob("minecraft:cow")])),
        ],
    );
    assert_eq!(path.file_name().unwrap(), "r.0.0.mca");
    let before = entities_of(&path, target);

    let selection: SelectionSet = [target].into_iter().collect();
    let op = Arc::new(DeleteBlockOperation::new(DeleteBlockParams {
        dir: dir.path().to_path_buf(),
        selection,
        policy: EmptyRegionPolicy::Nothing,
        ids: IdSet::new(["minecraft:cow"]),
    }));
    let summary = pipeline(2).run(op, |_| {}).unwrap();
    assert_eq!(summary.written, 1);

    let after = entities_of(&path, target);
    assert_eq!(after.len(), before.len() - 1);
    assert_eq!(after, vec![before[0].clone(), before[2].clone()]);
    // 选区外的区块不动
    assert_eq!(entities_of(&path, neighbour).len(), 1);
}

#[test]
fn import_without_overwrite_keeps_destination() {
    let dir = tempfile::tempdir().unwrap();
    let source_dir = dir.path().join("source");
    let dest_dir = dir.path().join("dest");
    fs::create_dir_all(&source_dir).unwrap();
    fs::create_dir_all(&dest_dir).unwrap();

    let shared = ChunkPos::new(-5, 9);
    let fresh = ChunkPos::new(-6, 9);
    write_world(
        &source_dir,
        vec![
            (shared, chunk(shared, vec![mob("minecraft:zombie")])),
            (fresh, chunk(fresh, vec![mob("minecraft:skeleton")])),
        ],
    );
    let dest_path = write_world(&dest_dir, vec![(shared, chunk(shared, vec![mob("minecraft:villager")]))]);
    let dest_before = RegionFile::open(&dest_path).unwrap();
    let shared_before = dest_before
        .read_chunk_payload(shared.local().index())
        .unwrap()
        .unwrap()
        .to_vec();

    let op = Arc::new(ImportOperation::new(ImportParams {
        input: source_dir,
        target: dest_dir,
        offset: (0, 0),
        overwrite: false,
        selection: None,
        policy: EmptyRegionPolicy::Nothing,
        sections: Vec::new(),
    }));
    pipeline(1).run(op, |_| {}).unwrap();

    let dest_after = RegionFile::open(&dest_path).unwrap();
    assert_eq!(
        dest_after.read_chunk_payload(shared.local().index()).unwrap().unwrap(),
        shared_before.as_slice()
    );
    assert_eq!(entities_of(&dest_path, fresh), vec![mob("minecraft:skeleton")]);
}

#[test]
fn corrupt_file_is_reported_without_aborting() {
    let dir = tempfile::tempdir().unwrap();
    for rx in 0..4 {
        let pos = ChunkPos::new(rx * 32, 0);
        write_world(dir.path(), vec![(pos, chunk(pos, vec![]))]);
    }
    fs::write(dir.path().join(RegionPos::new(9, 9).file_name()), b"too short").unwrap();

    let op = Arc::new(DeleteOperation::new(DeleteParams {
        dir: dir.path().to_path_buf(),
        matcher: ChunkMatcher::new(
            Some(mcabatch::ChunkFilter::new(|pos, _| pos.x == 0)),
            None,
            EmptyRegionPolicy::Nothing,
        ),
        empty_file: EmptyFilePolicy::Remove,
    }));
    let mut last = 0;
    let summary = pipeline(1)
        .run(op, |p| {
            assert!(p.completed > last);
            last = p.completed;
        })
        .unwrap();

    assert_eq!(last, 5);
    assert_eq!(summary.total, 5);
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "r.9.9.mca");
    assert!(!dir.path().join("r.0.0.mca").exists());
    assert!(dir.path().join("r.1.0.mca").exists());
}

#[test]
fn fail_fast_aborts_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("r.0.0.mca"), b"broken").unwrap();
    for rx in 1..20 {
        let pos = ChunkPos::new(rx * 32, 0);
        write_world(dir.path(), vec![(pos, chunk(pos, vec![]))]);
    }

    let mut config = PipelineConfig::with_threads(1, 1, 1, 1);
    config.fail_fast = true;
    let op = Arc::new(DeleteOperation::new(DeleteParams {
        dir: dir.path().to_path_buf(),
        matcher: ChunkMatcher::new(Some(mcabatch::ChunkFilter::new(|_, _| true)), None, EmptyRegionPolicy::Nothing),
        empty_file: EmptyFilePolicy::Remove,
    }));
    let err = Pipeline::new(config).unwrap().run(op, |_| {}).unwrap_err();
    assert!(matches!(err, Error::Aborted(inner) if matches!(*inner, Error::Format { .. })));
    // 中止后不再接纳新文件
    assert!(dir.path().join("r.19.0.mca").exists());
}
