// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg(feature = "test-util")]

use git_cas::{CasEngine, Config, InMemoryBlobStore, InMemoryKv, ObjectType};
use std::sync::Arc;
use test_log::test;

fn engine(prefix: &str) -> CasEngine {
    CasEngine::open(Config::new(prefix), Arc::new(InMemoryBlobStore::new()), Arc::new(InMemoryKv::new()))
        .expect("engine opens against a pair of empty in-memory collaborators")
}

#[test]
fn put_flush_get_round_trips_a_blob() -> git_cas::Result<()> {
    let engine = engine("put-flush-get");

    let sha = engine.put_object(ObjectType::Blob, b"hello, world", None)?;
    engine.flush()?;

    let (object_type, content) = engine.get_object(&sha)?.expect("flushed object is retrievable");
    assert_eq!(object_type, ObjectType::Blob);
    assert_eq!(content, b"hello, world");
    Ok(())
}

#[test]
fn delete_then_get_returns_none() -> git_cas::Result<()> {
    let engine = engine("delete-then-get");

    let sha = engine.put_object(ObjectType::Tree, b"tree-bytes", None)?;
    engine.flush()?;
    assert!(engine.has_object(&sha)?);

    engine.delete_object(&sha)?;
    assert!(!engine.has_object(&sha)?);
    assert!(engine.get_object(&sha)?.is_none());
    Ok(())
}

#[test]
fn compaction_merges_files_without_losing_live_objects() -> git_cas::Result<()> {
    let engine = engine("compaction-merge");

    let mut shas = Vec::new();
    for i in 0..5 {
        let sha = engine.put_object(ObjectType::Blob, format!("payload-{i}").as_bytes(), None)?;
        shas.push(sha);
        engine.flush()?;
    }

    let stats_before = engine.get_stats()?;
    assert_eq!(stats_before.parquet_files, 5);

    engine.delete_object(&shas[0])?;
    engine.flush()?;
    engine.compact()?;

    let stats_after = engine.get_stats()?;
    assert_eq!(stats_after.parquet_files, 1);

    assert!(!engine.has_object(&shas[0])?);
    for sha in &shas[1..] {
        assert!(engine.has_object(sha)?);
    }
    Ok(())
}

#[test]
fn commit_payload_survives_a_flush_and_decode_round_trip() -> git_cas::Result<()> {
    let engine = engine("commit-round-trip");

    let commit = b"tree deadbeefdeadbeefdeadbeefdeadbeefdeadbeef\n\
parent feedfacefeedfacefeedfacefeedfacefeedface\n\
author Ada Lovelace <ada@example.com> 1700000000 +0000\n\
committer Ada Lovelace <ada@example.com> 1700000000 +0000\n\
\n\
Initial commit\n";

    let sha = engine.put_object(ObjectType::Commit, commit, None)?;
    engine.flush()?;

    let (object_type, content) = engine.get_object(&sha)?.expect("commit round-trips");
    assert_eq!(object_type, ObjectType::Commit);
    assert_eq!(content, commit);
    Ok(())
}
