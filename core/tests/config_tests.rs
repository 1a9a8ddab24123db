//! Configuration file tests

use ircbridge_core::*;
use std::io::Write;
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ircbridge.toml");

    let mut config = Config::default();
    config.channels.push(ChannelConfig {
        name: "#private".to_string(),
        key: Some("sekrit".to_string()),
        echo: false,
    });
    config.commands.prefix = '.';
    assert_ok!(config.to_file(&path));

    let loaded = assert_ok!(Config::from_file(&path));
    assert_eq!(loaded, config);
    assert_eq!(loaded.echo_channel().map(|c| c.name.as_str()), Some("#ircbridge"));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert_err!(Config::from_file(dir.path().join("absent.toml")));
}

#[test]
fn test_invalid_file_contents() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[[identities]]\nname = \"x\"\nnickname = ").unwrap();
    assert!(matches!(Config::from_file(file.path()), Err(Error::Config(_))));
}

#[test]
fn test_loaded_file_is_validated() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[identities]]
name = "main"
nickname = "bad nick"
username = "bridge"
realname = "Bridge"

[[servers]]
name = "local"
host = "127.0.0.1"
port = 6667
"#
    )
    .unwrap();
    let config = assert_ok!(Config::from_file(file.path()));
    assert_err!(config.validate());
}

#[test]
fn test_permission_table_from_file() {
    let config = assert_ok!(Config::from_toml(
        r#"
permissions = [
    { symbol = "@", level = "admin" },
    { symbol = "+", level = "voice" },
]

[[identities]]
name = "main"
nickname = "bridge"
username = "bridge"
realname = "Bridge"

[[servers]]
name = "local"
host = "127.0.0.1"
port = 6667
"#
    ));
    let table = config.permission_table();
    assert_eq!(table.level_for(&['@']), AccessLevel::Admin);
    assert_eq!(table.level_for(&['~']), AccessLevel::None);
    assert_eq!(config.commands.prefix, '!');
}
