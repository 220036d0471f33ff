use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

use smb_publish::config::{BackendChoice, SmbVersion};
use smb_publish::load_config::{load_config, PASSWORD_ENV};

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

/// A static config plus the password from the environment produces a complete PublishConfig.
#[tokio::test]
#[serial]
async fn test_load_config_success_injects_password_from_env() {
    let file = config_file(
        r#"
verbose: true
wins_server: 10.0.0.1
node:
  wins_server: 10.0.0.2
mount_root: /mnt/smb
base_dir: ./build
target:
  name: artifacts
  hostname: fileserver
  port: 1445
  remote_root_dir: builds/nightly
  username: CORP\builder
  smb_version: smb3
  timeout_ms: 10000
  buffer_size: 8192
retry:
  retries: 2
  delay_ms: 1500
transfers:
  - source_files: "**/*.zip"
    excludes: "**/tmp/**"
    remove_prefix: dist
    remote_directory: app
    clean_remote: true
  - source_files: docs/*.pdf
    flatten: true
"#,
    );
    env::set_var(PASSWORD_ENV, "top-secret");

    let config = load_config(file.path()).expect("Config should load");

    let target = &config.target;
    assert_eq!(target.name, "artifacts");
    assert_eq!(target.hostname, "fileserver");
    assert_eq!(target.port, 1445);
    assert_eq!(target.remote_root_dir, "builds/nightly");
    assert_eq!(target.smb_version, SmbVersion::Smb3);
    assert_eq!(target.timeout_ms, 10_000);
    assert_eq!(target.buffer_size, 8192);
    let credential = target.credential.as_ref().expect("credential");
    assert_eq!(credential.domain(), Some("CORP"));
    assert_eq!(credential.user(), "builder");
    assert_eq!(credential.password, "top-secret");

    assert!(config.verbose);
    assert_eq!(config.wins_server.as_deref(), Some("10.0.0.2"));
    assert_eq!(config.backend, BackendChoice::Mounted(PathBuf::from("/mnt/smb")));
    assert_eq!(config.base_dir, PathBuf::from("./build"));
    assert_eq!(config.retry.retries, 2);
    assert_eq!(config.retry.delay, Duration::from_millis(1500));

    assert_eq!(config.transfers.len(), 2);
    assert_eq!(config.transfers[0].remove_prefix, "dist");
    assert!(config.transfers[0].clean_remote);
    assert!(!config.transfers[0].flatten);
    assert!(config.transfers[1].flatten);
    assert_eq!(config.transfers[1].remote_directory, "");

    env::remove_var(PASSWORD_ENV);
}

/// A username without the password variable makes the loader fail.
#[tokio::test]
#[serial]
async fn test_load_config_errors_on_missing_password() {
    let file = config_file(
        r#"
mount_root: /mnt/smb
target:
  hostname: fileserver
  remote_root_dir: builds
  username: builder
"#,
    );
    env::remove_var(PASSWORD_ENV);

    let result = load_config(file.path());
    assert!(result.is_err(), "Expected error when {PASSWORD_ENV} is missing");
}

#[tokio::test]
#[serial]
async fn test_load_config_defaults_for_anonymous_target() {
    let file = config_file(
        r#"
wins_server: 10.0.0.1
mount_root: /mnt/smb
target:
  hostname: fileserver
  remote_root_dir: builds
transfers:
  - source_files: "*.zip"
"#,
    );
    env::remove_var(PASSWORD_ENV);

    let config = load_config(file.path()).expect("Config should load");
    assert!(config.target.credential.is_none());
    assert_eq!(config.target.port, 445);
    assert_eq!(config.target.smb_version, SmbVersion::Smb2);
    assert_eq!(config.target.timeout_ms, 30_000);
    assert_eq!(config.target.buffer_size, 4096);
    assert_eq!(config.target.name, "fileserver");
    assert_eq!(config.retry.retries, 0);
    assert_eq!(config.base_dir, PathBuf::from("."));
    assert!(!config.verbose);
    // Without node properties the global WINS server applies.
    assert_eq!(config.wins_server.as_deref(), Some("10.0.0.1"));
}

#[tokio::test]
#[serial]
async fn test_load_config_agent_without_wins_overrides_global() {
    let file = config_file(
        r#"
wins_server: 10.0.0.1
node: {}
mount_root: /mnt/smb
target:
  hostname: fileserver
  remote_root_dir: builds
  smb_version: cifs
"#,
    );

    let config = load_config(file.path()).expect("Config should load");
    assert_eq!(config.wins_server, None);
    assert_eq!(config.target.smb_version, SmbVersion::Cifs1);
}

#[tokio::test]
#[serial]
async fn test_load_config_selects_native_backend_with_lmhosts() {
    let file = config_file(
        r#"
backend: native
lmhosts: /etc/samba/lmhosts.ci
target:
  hostname: fileserver
  remote_root_dir: builds
"#,
    );
    env::remove_var(PASSWORD_ENV);

    let config = load_config(file.path()).expect("Config should load");
    assert_eq!(
        config.backend,
        BackendChoice::Native {
            lmhosts: Some(PathBuf::from("/etc/samba/lmhosts.ci"))
        }
    );
}

#[tokio::test]
#[serial]
async fn test_load_config_requires_mount_root_for_mounted_backend() {
    let file = config_file("target:\n  hostname: fileserver\n  remote_root_dir: builds\n");
    env::remove_var(PASSWORD_ENV);

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("mount_root"), "{err}");
}

#[tokio::test]
#[serial]
async fn test_load_config_rejects_invalid_yaml() {
    let file = config_file("target: [not, a, mapping\n");
    assert!(load_config(file.path()).is_err());

    let missing_host = config_file("mount_root: /mnt\ntarget:\n  remote_root_dir: x\n");
    assert!(load_config(missing_host.path()).is_err());
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_on_missing_file() {
    assert!(load_config("/definitely/not/here.yaml").is_err());
}
