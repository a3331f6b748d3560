//! Lifecycle: restart resume, startup validation, promotion targets,
//! removal, and export/move.

mod common;

use std::time::Duration;

use common::{MockOrigin, pattern, wait_for};
use reqwest::StatusCode;
use reqwest::header;
use spool::core::ResourceId;
use spool::{Proxy, ProxyConfig, ProxyError};
use tempfile::TempDir;

fn storage(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("storage")
}

fn collections(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("collections")
}

async fn init_proxy(dir: &TempDir, auto_complete: bool) -> Proxy {
    Proxy::init(
        ProxyConfig::new(storage(dir))
            .with_port(0)
            .with_auto_complete(auto_complete),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn resume_across_restart_completes_from_meta() {
    const TOTAL: u64 = 2_000_000;

    let origin = MockOrigin::spawn(TOTAL).await;
    let dir = TempDir::new().unwrap();
    let url = origin.url("movie.bin");
    let id = ResourceId::from_url(&url);
    let client = reqwest::Client::new();

    // First run: cache the first quarter, then shut down.
    {
        let proxy = init_proxy(&dir, false).await;
        let body = client
            .get(proxy.proxy_url_for(&url))
            .header(header::RANGE, "bytes=0-499999")
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(body.as_ref(), pattern(0, 499_999).as_slice());
        proxy.dispose().await;
    }
    assert!(storage(&dir).join(format!("{id}.meta")).exists());

    // Second run: the resource resumes from its meta file.
    let proxy = init_proxy(&dir, false).await;
    let infos = proxy.list_all().await;
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].id, id.to_string());
    assert!(!infos[0].is_complete);
    assert!((infos[0].progress - 25.0).abs() < 0.1);

    proxy.start_background(&url).await.unwrap();
    let promoted = collections(&dir).join(format!("{id}.bin"));
    assert!(
        wait_for(Duration::from_secs(15), || {
            let promoted = promoted.clone();
            async move { tokio::fs::try_exists(&promoted).await.unwrap_or(false) }
        })
        .await,
        "background completion must promote the file"
    );

    // The completer never re-fetched the resumed quarter.
    assert_eq!(origin.fetches_overlapping(0, 499_999), 1);

    // A full request is now served from the promoted file, no network.
    let fetches_before = origin.fetched_ranges().len();
    let body = client
        .get(proxy.proxy_url_for(&url))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.as_ref(), pattern(0, TOTAL - 1).as_slice());
    assert_eq!(origin.fetched_ranges().len(), fetches_before);
    proxy.dispose().await;
}

#[tokio::test]
async fn corrupt_meta_redownloads_in_place() {
    let origin = MockOrigin::spawn(4096).await;
    let dir = TempDir::new().unwrap();
    let url = origin.url("c.bin");
    let id = ResourceId::from_url(&url);

    tokio::fs::create_dir_all(storage(&dir)).await.unwrap();
    tokio::fs::write(storage(&dir).join(format!("{id}.video")), vec![0u8; 4096])
        .await
        .unwrap();
    tokio::fs::write(storage(&dir).join(format!("{id}.meta")), b"{ garbage")
        .await
        .unwrap();

    let proxy = init_proxy(&dir, false).await;
    // The broken resource is not restored...
    assert!(proxy.list_all().await.is_empty());

    // ...but a live request rebuilds it and overwrites bytes in place.
    let body = reqwest::get(proxy.proxy_url_for(&url))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.as_ref(), pattern(0, 4095).as_slice());
    assert!((proxy.progress_for(&url).await - 100.0).abs() < f64::EPSILON);
    proxy.dispose().await;
}

#[tokio::test]
async fn orphan_video_is_promoted_on_startup() {
    let dir = TempDir::new().unwrap();
    let id = "00112233aabbccdd";
    let content = pattern(0, 499);

    tokio::fs::create_dir_all(storage(&dir)).await.unwrap();
    tokio::fs::write(storage(&dir).join(format!("{id}.video")), &content)
        .await
        .unwrap();

    let proxy = init_proxy(&dir, false).await;
    let promoted = collections(&dir).join(format!("{id}.mp4"));
    assert!(promoted.exists(), "orphan data file must be promoted");
    assert_eq!(tokio::fs::read(&promoted).await.unwrap(), content);
    assert!(!storage(&dir).join(format!("{id}.video")).exists());

    let infos = proxy.list_all().await;
    assert_eq!(infos.len(), 1);
    assert!(infos[0].is_complete);
    proxy.dispose().await;
}

#[tokio::test]
async fn remove_by_url_deletes_all_traces() {
    let origin = MockOrigin::spawn(64 * 1024).await;
    let dir = TempDir::new().unwrap();
    let proxy = init_proxy(&dir, false).await;
    let url = origin.url("r.bin");
    let id = ResourceId::from_url(&url);

    let resp = reqwest::Client::new()
        .get(proxy.proxy_url_for(&url))
        .header(header::RANGE, "bytes=0-1023")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    let _ = resp.bytes().await.unwrap();

    assert!(proxy.remove_by_url(&url).await);
    assert!(!storage(&dir).join(format!("{id}.video")).exists());
    assert!(!storage(&dir).join(format!("{id}.meta")).exists());
    assert!(proxy.list_all().await.is_empty());
    assert_eq!(proxy.progress_for(&url).await, 0.0);

    assert!(!proxy.remove_by_url(&url).await, "second removal is a no-op");
    proxy.dispose().await;
}

#[tokio::test]
async fn clear_all_leaves_no_cache_files() {
    let origin = MockOrigin::spawn(128 * 1024).await;
    let dir = TempDir::new().unwrap();
    let proxy = init_proxy(&dir, false).await;
    let client = reqwest::Client::new();

    for name in ["one.bin", "two.bin"] {
        let resp = client
            .get(proxy.proxy_url_for(&origin.url(name)))
            .header(header::RANGE, "bytes=0-4095")
            .send()
            .await
            .unwrap();
        let _ = resp.bytes().await.unwrap();
    }
    assert_eq!(proxy.list_all().await.len(), 2);

    proxy.clear_all().await;

    assert!(proxy.list_all().await.is_empty());
    let mut entries = tokio::fs::read_dir(storage(&dir)).await.unwrap();
    assert!(
        entries.next_entry().await.unwrap().is_none(),
        "storage dir must be empty after clear_all"
    );
    proxy.dispose().await;
}

#[tokio::test]
async fn clear_all_removes_promoted_files_too() {
    let origin = MockOrigin::spawn(64 * 1024).await;
    let dir = TempDir::new().unwrap();
    let proxy = init_proxy(&dir, true).await;
    let url = origin.url("done.bin");
    let id = ResourceId::from_url(&url);

    // Full download; the completer promotes it into the collections area.
    let _ = reqwest::get(proxy.proxy_url_for(&url))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let promoted = collections(&dir).join(format!("{id}.bin"));
    assert!(
        wait_for(Duration::from_secs(10), || {
            let promoted = promoted.clone();
            async move { tokio::fs::try_exists(&promoted).await.unwrap_or(false) }
        })
        .await,
        "download must promote before the clear"
    );

    proxy.clear_all().await;

    assert!(!promoted.exists());
    assert!(proxy.list_all().await.is_empty());
    assert_eq!(proxy.progress_for(&url).await, 0.0);
    let mut entries = tokio::fs::read_dir(collections(&dir)).await.unwrap();
    assert!(
        entries.next_entry().await.unwrap().is_none(),
        "collections dir must be empty after clear_all"
    );
    proxy.dispose().await;
}

#[tokio::test]
async fn export_and_move_require_a_complete_resource() {
    let origin = MockOrigin::spawn(32 * 1024).await;
    let dir = TempDir::new().unwrap();
    let proxy = init_proxy(&dir, false).await;
    let url = origin.url("clip.bin");
    let client = reqwest::Client::new();
    let export_target = dir.path().join("out").join("copy.bin");
    let move_target = dir.path().join("out").join("moved.bin");

    // Partial cache: neither export nor move applies.
    let resp = client
        .get(proxy.proxy_url_for(&url))
        .header(header::RANGE, "bytes=0-1023")
        .send()
        .await
        .unwrap();
    let _ = resp.bytes().await.unwrap();
    assert!(!proxy.export(&url, &export_target).await.unwrap());
    assert!(!proxy.move_to(&url, &move_target).await.unwrap());
    assert!(!export_target.exists());

    // Complete the file (no auto promotion with auto_complete off).
    let _ = client
        .get(proxy.proxy_url_for(&url))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    assert!(proxy.export(&url, &export_target).await.unwrap());
    assert_eq!(
        tokio::fs::read(&export_target).await.unwrap(),
        pattern(0, 32 * 1024 - 1)
    );

    assert!(proxy.move_to(&url, &move_target).await.unwrap());
    assert_eq!(
        tokio::fs::read(&move_target).await.unwrap(),
        pattern(0, 32 * 1024 - 1)
    );
    // The moved resource is gone from the cache.
    assert!(proxy.list_all().await.is_empty());
    assert!(!proxy.export(&url, &export_target).await.unwrap());
    proxy.dispose().await;
}

#[tokio::test]
async fn export_auto_name_derives_from_the_url_tail() {
    let origin = MockOrigin::spawn(16 * 1024).await;
    let dir = TempDir::new().unwrap();
    let proxy = init_proxy(&dir, false).await;
    let url = origin.url("concert.bin");
    let out_dir = dir.path().join("exports");

    let _ = reqwest::get(proxy.proxy_url_for(&url))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    let exported = proxy.export_auto_name(&url, &out_dir).await.unwrap();
    assert_eq!(exported, Some(out_dir.join("concert.bin")));
    assert_eq!(
        tokio::fs::read(out_dir.join("concert.bin")).await.unwrap(),
        pattern(0, 16 * 1024 - 1)
    );
    proxy.dispose().await;
}

#[tokio::test]
async fn set_target_redirects_promotion() {
    let origin = MockOrigin::spawn(8 * 1024).await;
    let dir = TempDir::new().unwrap();
    let proxy = init_proxy(&dir, false).await;
    let url = origin.url("t.bin");
    let target = dir.path().join("library").join("chosen-name.bin");

    let _ = reqwest::get(proxy.proxy_url_for(&url))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert!(proxy.set_target(&url, &target));

    // Kick the completer: everything is cached, so it promotes directly.
    proxy.start_background(&url).await.unwrap();
    assert!(
        wait_for(Duration::from_secs(10), || {
            let target = target.clone();
            async move { tokio::fs::try_exists(&target).await.unwrap_or(false) }
        })
        .await,
        "promotion must land on the configured target"
    );
    assert_eq!(
        tokio::fs::read(&target).await.unwrap(),
        pattern(0, 8 * 1024 - 1)
    );
    assert!(collections(&dir)
        .read_dir()
        .map(|mut d| d.next().is_none())
        .unwrap_or(true));
    proxy.dispose().await;
}

#[tokio::test]
async fn second_init_on_the_same_port_returns_the_same_handle() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let port = 48621;

    let first = Proxy::init(
        ProxyConfig::new(storage(&dir_a))
            .with_port(port)
            .with_auto_complete(false),
    )
    .await
    .unwrap();
    let second = Proxy::init(
        ProxyConfig::new(storage(&dir_b))
            .with_port(port)
            .with_auto_complete(false),
    )
    .await
    .unwrap();

    assert_eq!(first.port(), second.port());

    // Disposing through one handle disposes the shared proxy.
    first.dispose().await;
    let err = second
        .export("http://example.test/x", dir_b.path().join("x").as_path())
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::NotInitialized));
}

#[tokio::test]
async fn stop_background_pauses_and_resume_all_restarts() {
    const TOTAL: u64 = 24 * 1024 * 1024;

    let origin = MockOrigin::spawn(TOTAL).await;
    let dir = TempDir::new().unwrap();
    let proxy = init_proxy(&dir, false).await;
    let url = origin.url("pause.bin");
    let id = ResourceId::from_url(&url);

    let resp = reqwest::Client::new()
        .get(proxy.proxy_url_for(&url))
        .header(header::RANGE, "bytes=0-1023")
        .send()
        .await
        .unwrap();
    let _ = resp.bytes().await.unwrap();

    proxy.start_background(&url).await.unwrap();
    assert!(proxy.stop_background(&url).await);

    // Pause forces a save so the paused state is durable.
    assert!(storage(&dir).join(format!("{id}.meta")).exists());

    proxy.resume_all().await;
    assert!(
        wait_for(Duration::from_secs(15), || async {
            proxy.progress_for(&url).await >= 100.0
        })
        .await,
        "resume_all must finish the download"
    );
    proxy.dispose().await;
}
