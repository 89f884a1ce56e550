//! Stage lifecycle integration tests

mod common;

use common::FakeFetcher;
use smelt_errors::Error;
use smelt_stage::{purge, with_stage, Stage, StageContext, StageLock, Staging};
use std::sync::Arc;
use std::time::Duration;

fn context_in(root: &std::path::Path) -> Arc<StageContext> {
    Arc::new(StageContext::new(root.join("stage-root")))
}

fn fake_stage(context: Arc<StageContext>, name: &str) -> Stage {
    Stage::named(
        Box::new(FakeFetcher::new("pkg-1.0.tar.gz", "pkg-1.0")),
        name,
        context,
    )
}

#[tokio::test]
async fn test_create_is_idempotent() {
    let sandbox = tempfile::tempdir().unwrap();
    let context = context_in(sandbox.path());

    let mut stage = fake_stage(Arc::clone(&context), "pkg-1.0");
    stage.create().await.unwrap();
    let first_path = Staging::path(&stage).to_path_buf();
    assert!(first_path.is_dir());

    stage.create().await.unwrap();
    assert_eq!(Staging::path(&stage), first_path);

    // A second stage under the same name lands on the same path.
    let other = fake_stage(context, "pkg-1.0");
    assert_eq!(Staging::path(&other), first_path);
}

#[tokio::test]
async fn test_create_with_tmp_root_symlinks() {
    let sandbox = tempfile::tempdir().unwrap();
    let tmp_root = sandbox.path().join("tmp");
    std::fs::create_dir_all(&tmp_root).unwrap();
    let context = Arc::new(
        StageContext::new(sandbox.path().join("stage-root")).with_tmp_root(&tmp_root),
    );

    let mut stage = fake_stage(Arc::clone(&context), "pkg-1.0");
    stage.create().await.unwrap();

    let path = Staging::path(&stage).to_path_buf();
    let metadata = path.symlink_metadata().unwrap();
    assert!(metadata.file_type().is_symlink());
    let backing = path.canonicalize().unwrap();
    assert!(backing.starts_with(tmp_root.canonicalize().unwrap()));

    // Re-creating keeps the same live symlink.
    stage.create().await.unwrap();
    assert_eq!(path.canonicalize().unwrap(), backing);
}

#[tokio::test]
async fn test_full_session_fetch_expand_source_path() {
    let sandbox = tempfile::tempdir().unwrap();
    let context = context_in(sandbox.path());

    let mut stage = fake_stage(context, "pkg-1.0");
    stage.create().await.unwrap();
    stage.fetch(false).await.unwrap();
    stage.check().await.unwrap();

    // No source tree yet.
    assert!(stage.source_path().is_none());

    stage.expand_archive().await.unwrap();
    let source = stage.source_path().unwrap();
    assert!(source.ends_with("pkg-1.0"));
    assert!(source.join("configure").exists());

    let archive = stage.archive_file().unwrap();
    assert!(archive.ends_with("pkg-1.0.tar.gz"));
}

#[tokio::test]
async fn test_expand_archive_is_idempotent() {
    let sandbox = tempfile::tempdir().unwrap();
    let context = context_in(sandbox.path());

    let fetcher = FakeFetcher::new("pkg-1.0.tar.gz", "pkg-1.0");
    let stats = fetcher.stats();
    let mut stage = Stage::named(Box::new(fetcher), "pkg-1.0", context);

    stage.create().await.unwrap();
    stage.fetch(false).await.unwrap();
    stage.expand_archive().await.unwrap();
    stage.expand_archive().await.unwrap();

    assert_eq!(
        stats.expand_calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_restage_rebuilds_source_tree() {
    let sandbox = tempfile::tempdir().unwrap();
    let context = context_in(sandbox.path());

    let fetcher = FakeFetcher::new("pkg-1.0.tar.gz", "pkg-1.0");
    let stats = fetcher.stats();
    let mut stage = Stage::named(Box::new(fetcher), "pkg-1.0", context);

    stage.create().await.unwrap();
    stage.fetch(false).await.unwrap();
    stage.expand_archive().await.unwrap();

    // Simulate a dirty tree, then restage.
    let source = stage.source_path().unwrap();
    tokio::fs::write(source.join("dirty"), b"scratch").await.unwrap();
    stage.restage().await.unwrap();

    let source = stage.source_path().unwrap();
    assert!(!source.join("dirty").exists());
    assert!(source.join("configure").exists());
    assert_eq!(
        stats.reset_calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_clean_scope_exit_destroys_directory() {
    let sandbox = tempfile::tempdir().unwrap();
    let context = context_in(sandbox.path());

    let mut stage = fake_stage(context, "pkg-1.0");
    let path = Staging::path(&stage).to_path_buf();

    with_stage(&mut stage, |stage| {
        Box::pin(async move {
            stage.fetch(false).await?;
            stage.expand_archive().await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    assert!(!path.exists());
}

#[tokio::test]
async fn test_failed_scope_keeps_directory_for_inspection() {
    let sandbox = tempfile::tempdir().unwrap();
    let context = context_in(sandbox.path());

    let mut stage = fake_stage(Arc::clone(&context), "pkg-1.0");
    let path = Staging::path(&stage).to_path_buf();

    let result: Result<(), Error> = with_stage(&mut stage, |stage| {
        Box::pin(async move {
            stage.fetch(false).await?;
            Err(Error::internal("build blew up"))
        })
    })
    .await;

    assert!(result.is_err());
    assert!(path.is_dir());
    // The archive from the failed run is still there for reuse.
    assert!(path.join("pkg-1.0.tar.gz").exists());

    // The lock must be released even though the scope failed: another
    // session can take it immediately.
    let mut relock = StageLock::new(context.lock_path("pkg-1.0"));
    relock.acquire(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn test_keep_retains_directory_on_clean_exit() {
    let sandbox = tempfile::tempdir().unwrap();
    let context = context_in(sandbox.path());

    let mut stage = fake_stage(context, "pkg-1.0").keep();
    let path = Staging::path(&stage).to_path_buf();

    with_stage(&mut stage, |stage| {
        Box::pin(async move { stage.fetch(false).await })
    })
    .await
    .unwrap();

    assert!(path.is_dir());
}

#[tokio::test]
async fn test_destroy_removes_symlink_and_backing() {
    let sandbox = tempfile::tempdir().unwrap();
    let tmp_root = sandbox.path().join("tmp");
    std::fs::create_dir_all(&tmp_root).unwrap();
    let context = Arc::new(
        StageContext::new(sandbox.path().join("stage-root")).with_tmp_root(&tmp_root),
    );

    let mut stage = fake_stage(context, "pkg-1.0");
    stage.create().await.unwrap();
    let path = Staging::path(&stage).to_path_buf();
    let backing = path.canonicalize().unwrap();

    stage.destroy().await.unwrap();
    assert!(path.symlink_metadata().is_err());
    assert!(!backing.exists());
}

#[tokio::test]
async fn test_unnamed_stages_get_unique_paths() {
    let sandbox = tempfile::tempdir().unwrap();
    let context = context_in(sandbox.path());

    let a = Stage::unnamed(
        Box::new(FakeFetcher::new("a.tar.gz", "a")),
        Arc::clone(&context),
    );
    let b = Stage::unnamed(Box::new(FakeFetcher::new("b.tar.gz", "b")), context);
    assert_ne!(Staging::path(&a), Staging::path(&b));
}

#[tokio::test]
async fn test_purge_clears_stage_root() {
    let sandbox = tempfile::tempdir().unwrap();
    let tmp_root = sandbox.path().join("tmp");
    std::fs::create_dir_all(&tmp_root).unwrap();
    let context = Arc::new(
        StageContext::new(sandbox.path().join("stage-root")).with_tmp_root(&tmp_root),
    );

    let mut linked = fake_stage(Arc::clone(&context), "linked-1.0");
    linked.create().await.unwrap();
    let linked_backing = Staging::path(&linked).canonicalize().unwrap();

    let plain_context = Arc::new(StageContext::new(context.stage_root()));
    let mut plain = fake_stage(plain_context, "plain-1.0");
    plain.create().await.unwrap();

    purge(&context).await.unwrap();

    let mut entries = std::fs::read_dir(context.stage_root()).unwrap();
    assert!(entries.next().is_none());
    assert!(!linked_backing.exists());
}

#[tokio::test]
async fn test_source_path_absent_on_empty_stage_and_chdir_fatal() {
    let sandbox = tempfile::tempdir().unwrap();
    let context = context_in(sandbox.path());

    let mut stage = fake_stage(context, "pkg-1.0");
    stage.create().await.unwrap();

    assert!(stage.source_path().is_none());
    assert!(matches!(
        stage.chdir_to_source(),
        Err(Error::Stage(
            smelt_errors::StageError::NoSourceDirectory { .. }
        ))
    ));
}

#[tokio::test]
async fn test_chdir_to_source_rejects_empty_expansion() {
    let sandbox = tempfile::tempdir().unwrap();
    let context = context_in(sandbox.path());

    let mut stage = fake_stage(context, "pkg-1.0");
    stage.create().await.unwrap();

    // An archive that expanded to a bare directory.
    tokio::fs::create_dir(Staging::path(&stage).join("pkg-1.0"))
        .await
        .unwrap();

    let original = std::env::current_dir().unwrap();
    let result = stage.chdir_to_source();
    std::env::set_current_dir(original).unwrap();

    assert!(matches!(
        result,
        Err(Error::Stage(smelt_errors::StageError::EmptySource { .. }))
    ));
}
