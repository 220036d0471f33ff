mod common;

use std::path::Path;
use std::sync::{Arc, Mutex};

use smb_publish::backend::{MockUrlFileSystem, MountedShares, RemoteWriter};
use smb_publish::client::{LegacyClient, RemoteClient, SmbClient, TransferRequest};
use smb_publish::config::{Credential, ExecutionContext, SmbVersion};
use smb_publish::connect::ConnectionFactory;
use smb_publish::error::{ErrorKind, NO_SOURCE_FILES_MESSAGE};

use common::{
    mounted_server, read_file, target, verbose_context, FailingReader, RecordingWriter,
};

const BASE: &str = "smb://srv/myShare/builds/";

async fn mounted_client(root: &Path, exec: &ExecutionContext) -> SmbClient {
    ConnectionFactory::new(Arc::new(MountedShares::new(root)))
        .create_client(&target(SmbVersion::Cifs1), exec)
        .await
        .expect("legacy client")
}

#[tokio::test]
async fn change_directory_commits_only_existing_directories() {
    let (root, builds) = mounted_server();
    std::fs::create_dir(builds.join("a")).unwrap();
    let mut client = mounted_client(root.path(), &ExecutionContext::default()).await;

    assert!(!client.change_directory("missing").await);
    assert_eq!(client.context(), BASE);

    assert!(client.change_directory("a").await);
    assert_eq!(client.context(), format!("{BASE}a/"));
}

#[tokio::test]
async fn change_directory_is_idempotent_from_the_same_start() {
    let (root, builds) = mounted_server();
    std::fs::create_dir_all(builds.join("a")).unwrap();
    let mut client = mounted_client(root.path(), &ExecutionContext::default()).await;

    assert!(client.change_directory("a").await);
    let once = client.context().to_string();
    client.change_to_initial_directory();
    assert!(client.change_directory("a").await);
    assert_eq!(client.context(), once);
}

#[tokio::test]
async fn change_to_initial_directory_restores_root_after_any_navigation() {
    let (root, builds) = mounted_server();
    std::fs::create_dir_all(builds.join("a/b")).unwrap();
    let mut client = mounted_client(root.path(), &ExecutionContext::default()).await;

    assert!(client.change_directory("a").await);
    assert!(client.change_directory("b").await);
    client.make_directory("c/d").await.unwrap();
    assert!(client.change_to_initial_directory());
    assert_eq!(client.context(), BASE);
}

#[tokio::test]
async fn make_directory_creates_every_level_and_keeps_context() {
    let (root, builds) = mounted_server();
    let (exec, sink) = verbose_context();
    let mut client = mounted_client(root.path(), &exec).await;

    assert!(client.make_directory("a/b/c").await.unwrap());
    assert!(builds.join("a/b/c").is_dir());
    assert_eq!(client.context(), BASE);

    let created: Vec<String> = sink
        .lines()
        .into_iter()
        .filter(|l| l.starts_with("Create directory"))
        .collect();
    assert_eq!(
        created,
        vec![
            format!("Create directory [{BASE}a/]"),
            format!("Create directory [{BASE}a/b/]"),
            format!("Create directory [{BASE}a/b/c/]"),
        ]
    );
}

#[tokio::test]
async fn make_directory_on_existing_leaf_is_fatal_and_creates_nothing() {
    let (root, builds) = mounted_server();
    std::fs::create_dir_all(builds.join("a/b")).unwrap();
    let mut client = mounted_client(root.path(), &ExecutionContext::default()).await;

    let err = client.make_directory("a/b").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert!(err.to_string().contains(&format!("{BASE}a/b/")), "{err}");
    assert_eq!(std::fs::read_dir(builds.join("a/b")).unwrap().count(), 0);
}

#[tokio::test]
async fn make_directory_without_a_name_is_rejected_even_when_context_vanished() {
    let (root, builds) = mounted_server();
    std::fs::create_dir(builds.join("gone")).unwrap();
    let mut client = mounted_client(root.path(), &ExecutionContext::default()).await;
    assert!(client.change_directory("gone").await);
    std::fs::remove_dir(builds.join("gone")).unwrap();

    for name in ["", "/", " \\ "] {
        let err = client.make_directory(name).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration, "{name:?}");
    }
    assert!(!builds.join("gone").exists());
    assert_eq!(client.context(), format!("{BASE}gone/"));
}

#[tokio::test]
async fn backend_error_during_directory_check_reads_as_absent() {
    let mut fs = MockUrlFileSystem::new();
    fs.expect_exists().returning(|_| {
        Err(smb_publish::backend::BackendError::Protocol(
            "connection reset".to_string(),
        ))
    });
    fs.expect_can_read().never();
    let mut client = LegacyClient::new(Box::new(fs), BASE, 4096, ExecutionContext::default());

    assert!(!client.change_directory("a").await);
    assert_eq!(client.context(), BASE);
}

#[tokio::test]
async fn make_directory_never_creates_an_existing_segment() {
    let mkdirs = Arc::new(Mutex::new(Vec::new()));
    let probes = Arc::new(Mutex::new(Vec::new()));
    let mut fs = MockUrlFileSystem::new();
    let seen = probes.clone();
    fs.expect_exists().returning(move |url| {
        seen.lock().unwrap().push(url.to_string());
        Ok(url.ends_with("/builds/a/"))
    });
    let made = mkdirs.clone();
    fs.expect_mkdir().returning(move |url| {
        made.lock().unwrap().push(url.to_string());
        Ok(())
    });

    let mut client = LegacyClient::new(Box::new(fs), BASE, 4096, ExecutionContext::default());
    assert!(client.make_directory("a/b/c/d").await.unwrap());

    assert_eq!(
        *mkdirs.lock().unwrap(),
        vec![
            format!("{BASE}a/b/"),
            format!("{BASE}a/b/c/"),
            format!("{BASE}a/b/c/d/"),
        ]
    );
    // Leaf first, then segments until the first missing one.
    assert_eq!(
        *probes.lock().unwrap(),
        vec![
            format!("{BASE}a/b/c/d/"),
            format!("{BASE}a/"),
            format!("{BASE}a/b/"),
        ]
    );
}

#[tokio::test]
async fn delete_tree_empties_current_directory() {
    let (root, builds) = mounted_server();
    std::fs::create_dir_all(builds.join("old/nested")).unwrap();
    std::fs::write(builds.join("old/nested/f.txt"), "x").unwrap();
    std::fs::write(builds.join("stale.zip"), "x").unwrap();
    let (exec, sink) = verbose_context();
    let mut client = mounted_client(root.path(), &exec).await;

    client.delete_tree().await.unwrap();

    assert!(builds.is_dir());
    assert_eq!(std::fs::read_dir(&builds).unwrap().count(), 0);
    let lines = sink.lines();
    assert!(lines.contains(&format!("Clean [{BASE}]")), "{lines:?}");
    assert!(lines.contains(&format!("Delete [{BASE}old/]")), "{lines:?}");
    assert!(lines.contains(&format!("Delete [{BASE}stale.zip]")), "{lines:?}");
}

#[cfg(unix)]
#[tokio::test]
async fn delete_tree_removes_entries_whose_names_hold_backslashes() {
    let (root, builds) = mounted_server();
    std::fs::write(builds.join("a\\b.txt"), "x").unwrap();
    std::fs::create_dir(builds.join("c\\d")).unwrap();
    let mut client = mounted_client(root.path(), &ExecutionContext::default()).await;

    client.delete_tree().await.expect("both entries deleted");

    assert_eq!(std::fs::read_dir(&builds).unwrap().count(), 0);
}

#[tokio::test]
async fn absent_listing_is_fatal() {
    let mut fs = MockUrlFileSystem::new();
    fs.expect_list().returning(|_| Ok(None));
    fs.expect_delete().never();
    let mut client = LegacyClient::new(Box::new(fs), BASE, 4096, ExecutionContext::default());

    let err = client.delete_tree().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ListingFailed);
}

#[tokio::test]
async fn transfer_overwrites_instead_of_appending() {
    let (root, builds) = mounted_server();
    let mut client = mounted_client(root.path(), &ExecutionContext::default()).await;
    let request = TransferRequest::new("**/*");
    let local = Path::new("dist/app.txt");

    client
        .transfer_file(&request, local, &mut &b"first version, longer"[..])
        .await
        .unwrap();
    client
        .transfer_file(&request, local, &mut &b"second"[..])
        .await
        .unwrap();

    assert_eq!(read_file(&builds.join("app.txt")), "second");
}

#[tokio::test]
async fn transfer_uses_the_current_directory() {
    let (root, builds) = mounted_server();
    std::fs::create_dir(builds.join("sub")).unwrap();
    let mut client = mounted_client(root.path(), &ExecutionContext::default()).await;
    assert!(client.change_directory("sub").await);

    client
        .transfer_file(&TransferRequest::new("*"), Path::new("a.bin"), &mut &b"abc"[..])
        .await
        .unwrap();
    assert_eq!(read_file(&builds.join("sub/a.bin")), "abc");
}

#[tokio::test]
async fn failed_copy_still_shuts_the_remote_writer_down() {
    let writer = RecordingWriter::default();
    let handle = writer.clone();
    let mut fs = MockUrlFileSystem::new();
    fs.expect_create()
        .times(1)
        .return_once(move |_| Ok(Box::new(writer) as RemoteWriter));
    let mut client = LegacyClient::new(Box::new(fs), BASE, 4096, ExecutionContext::default());

    let mut reader = FailingReader::new(b"partial");
    let err = client
        .transfer_file(&TransferRequest::new("*"), Path::new("x.bin"), &mut reader)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transfer);
    assert!(err.to_string().contains(&format!("{BASE}x.bin")), "{err}");
    assert!(handle.was_shut_down());
    assert_eq!(handle.contents(), b"partial");
}

#[tokio::test]
async fn verbose_copy_lines_never_show_credentials() {
    let (root, _builds) = mounted_server();
    let (exec, sink) = verbose_context();
    let mut client = ConnectionFactory::new(Arc::new(MountedShares::new(root.path())))
        .create_client(
            &target(SmbVersion::Cifs1).with_credential(Credential::new("CORP\\john", "s3cret")),
            &exec,
        )
        .await
        .expect("legacy client");

    client
        .transfer_file(&TransferRequest::new("*"), Path::new("a.txt"), &mut &b"a"[..])
        .await
        .unwrap();

    let lines = sink.lines();
    assert!(
        lines.contains(&"Copy to [smb://******@srv/myShare/builds/a.txt]".to_string()),
        "{lines:?}"
    );
    assert!(lines.iter().all(|l| !l.contains("s3cret") && !l.contains("john")));
}

#[tokio::test]
async fn empty_source_selector_is_rejected_before_any_io() {
    let fs = MockUrlFileSystem::new();
    let mut client = LegacyClient::new(Box::new(fs), BASE, 4096, ExecutionContext::default());

    let err = client.begin_transfers(&TransferRequest::new("")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSourceFiles);
    assert_eq!(err.kind().key(), "no_source_files");
    assert_eq!(err.to_string(), NO_SOURCE_FILES_MESSAGE);
    assert!(client.begin_transfers(&TransferRequest::new("*.zip")).is_ok());
}

#[tokio::test]
async fn disconnect_is_safe_to_repeat_and_ends_the_client() {
    let (root, _builds) = mounted_server();
    let mut client = mounted_client(root.path(), &ExecutionContext::default()).await;

    client.disconnect().await;
    client.disconnect().await;
    client.disconnect_quietly().await;

    assert!(!client.change_directory("anything").await);
    let err = client
        .transfer_file(&TransferRequest::new("*"), Path::new("a"), &mut &b"a"[..])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}
