//! Visibility and prefix tests

mod common;

use anyhow::Result;
use bytes::Bytes;
use common::*;
use s3_fs_adapter::adapter::FilesystemAdapter;
use s3_fs_adapter::client::memory::Operation;
use s3_fs_adapter::client::CannedAcl;
use s3_fs_adapter::config::{Config, MetaOption, WriteConfig};
use s3_fs_adapter::metadata::Visibility;
use s3_fs_adapter::path::PathPrefixer;

/// Test that visibility round-trips through the ACL
#[tokio::test]
async fn test_set_get_visibility() -> Result<()> {
    let harness = TestHarness::new();
    harness.put("doc.txt", "text").await?;
    assert_eq!(harness.adapter.get_visibility("doc.txt").await?, Visibility::Private);

    let result = harness
        .adapter
        .set_visibility("doc.txt", Visibility::Public)
        .await?
        .expect("acl applied");
    assert_eq!(result.path, "doc.txt");
    assert_eq!(result.visibility, Some(Visibility::Public));
    assert_eq!(harness.adapter.get_visibility("doc.txt").await?, Visibility::Public);
    assert_eq!(
        harness.client.object(BUCKET, "doc.txt").map(|o| o.acl),
        Some(CannedAcl::PublicRead)
    );

    harness.adapter.set_visibility("doc.txt", Visibility::Private).await?;
    assert_eq!(harness.adapter.get_visibility("doc.txt").await?, Visibility::Private);
    Ok(())
}

/// Test visibility failure handling
#[tokio::test]
async fn test_visibility_errors() -> Result<()> {
    let harness = TestHarness::new();

    assert!(harness
        .adapter
        .set_visibility("missing.txt", Visibility::Public)
        .await?
        .is_none());

    // Lookups have no failure value
    assert!(harness.adapter.get_visibility("missing.txt").await.is_err());

    harness.put("doc.txt", "text").await?;
    harness.client.fail_with_status(Operation::PutObjectAcl, 500);
    assert!(harness
        .adapter
        .set_visibility("doc.txt", Visibility::Public)
        .await?
        .is_none());
    Ok(())
}

/// Test that writes default to private
#[tokio::test]
async fn test_write_defaults_private() -> Result<()> {
    let harness = TestHarness::new();
    harness.put("a.txt", "a").await?;
    assert_eq!(harness.client.object(BUCKET, "a.txt").map(|o| o.acl), Some(CannedAcl::Private));

    let public = WriteConfig::new().with_option(MetaOption::Acl, "public-read");
    harness.adapter.write("b.txt", Bytes::from_static(b"b"), &public).await?;
    assert_eq!(harness.adapter.get_visibility("b.txt").await?, Visibility::Public);
    Ok(())
}

/// Test that adapter-wide options apply to every write
#[tokio::test]
async fn test_adapter_options_from_config() -> Result<()> {
    let config = Config::from_str(
        r#"
s3:
  bucket: test-bucket
  prefix: data
options:
  ACL: public-read
  StorageClass: REDUCED_REDUNDANCY
  Metadata:
    team: storage
"#,
    )?;

    let harness = TestHarness::with_prefix(config.s3.prefix.as_deref().unwrap_or_default());
    let adapter = harness.another_adapter().with_options(config.options.clone());

    let written = adapter
        .write("x.txt", Bytes::from_static(b"x"), &WriteConfig::new())
        .await?
        .expect("write succeeds");
    assert_eq!(written.storageclass.as_deref(), Some("REDUCED_REDUNDANCY"));
    assert_eq!(
        written.metadata.as_ref().and_then(|m| m.get("team")).map(String::as_str),
        Some("storage")
    );

    let stored = harness.client.object(BUCKET, "data/x.txt").expect("stored under prefix");
    assert_eq!(stored.acl, CannedAcl::PublicRead);

    // Per-call settings win over adapter defaults
    let private = WriteConfig::new().with_visibility(Visibility::Private);
    adapter.write("y.txt", Bytes::from_static(b"y"), &private).await?;
    assert_eq!(adapter.get_visibility("y.txt").await?, Visibility::Private);
    Ok(())
}

/// Test that stripping the prefix undoes applying it
#[test]
fn test_prefix_round_trip() {
    let paths = [
        "a",
        "notes/todo.txt",
        "deep/er/and/deeper/file.tar.gz",
        "with space/and+plus.txt",
        "dir/",
        "",
    ];

    for prefix in ["", "/", "root", "/root/", "a/b/c/", "x\\"] {
        let prefixer = PathPrefixer::new(prefix);
        for path in paths {
            assert_eq!(prefixer.remove(&prefixer.apply(path)), path, "prefix={:?}", prefix);
        }
    }
}
