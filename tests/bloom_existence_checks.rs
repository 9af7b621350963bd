// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg(feature = "test-util")]

use git_cas::{CasEngine, Config, InMemoryBlobStore, InMemoryKv, ObjectType};
use std::sync::Arc;
use test_log::test;

#[test]
fn unknown_sha_reports_absent_without_touching_blob_store() -> git_cas::Result<()> {
    let engine = CasEngine::open(
        Config::new("bloom-absent"),
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(InMemoryKv::new()),
    )?;

    let unknown = "0".repeat(40);
    assert!(!engine.has_object(&unknown)?);
    assert!(engine.get_object(&unknown)?.is_none());
    Ok(())
}

#[test]
fn buffered_but_unflushed_object_is_still_found() -> git_cas::Result<()> {
    let engine = CasEngine::open(
        Config::new("bloom-buffered"),
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(InMemoryKv::new()),
    )?;

    let sha = engine.put_object(ObjectType::Blob, b"still in the buffer", None)?;
    assert!(engine.has_object(&sha)?);
    let (_, content) = engine.get_object(&sha)?.expect("buffered object is visible before flush");
    assert_eq!(content, b"still in the buffer");
    Ok(())
}

#[test]
fn many_small_objects_still_resolve_after_flush() -> git_cas::Result<()> {
    let engine = CasEngine::open(
        Config::new("bloom-bulk"),
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(InMemoryKv::new()),
    )?;

    let mut shas = Vec::new();
    for i in 0..200 {
        shas.push(engine.put_object(ObjectType::Blob, format!("item-{i}").as_bytes(), None)?);
    }
    engine.flush()?;

    for sha in &shas {
        assert!(engine.has_object(sha)?, "expected {sha} to be present after flush");
    }
    Ok(())
}
