//! Runtime tests: several bots sharing one command set and one connector

mod common;

use common::{identity, server_config, FakeServer, MockConnector};
use ircbridge_core::config::default_permissions;
use ircbridge_core::*;

fn config() -> Config {
    Config {
        identities: vec![
            identity("main", "bridge", true),
            identity("backup", "backup", false),
        ],
        servers: vec![server_config()],
        channels: vec![ChannelConfig {
            name: "#ops".to_string(),
            key: None,
            echo: true,
        }],
        reconnect: ReconnectConfig::default(),
        keepalive: KeepaliveConfig {
            enabled: false,
            ..KeepaliveConfig::default()
        },
        commands: CommandConfig::default(),
        permissions: default_permissions(),
    }
}

async fn wait_ready(bot: &Bot) {
    bot.subscribe()
        .wait_for(|s| s.state == ConnectionState::Ready)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_builds_one_bot_per_identity_and_server() {
    let config = config();
    let (connector, _sessions) = MockConnector::new();
    let runtime =
        Runtime::with_connector(config.clone(), CommandManager::from_config(&config), connector)
            .unwrap();

    let names: Vec<&str> = runtime.bots().iter().map(|b| b.name()).collect();
    assert_eq!(names, vec!["main@test", "backup@test"]);
    assert!(runtime.bot("main@test").unwrap().is_primary());
    assert_eq!(runtime.primary_bots().count(), 1);

    // Nothing is connected yet
    assert_eq!(runtime.broadcast_echo("early").unwrap(), 0);
    assert_eq!(runtime.broadcast("PRIVMSG #ops :early"), 0);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = config();
    config.identities.clear();
    let (connector, _sessions) = MockConnector::new();
    let result = Runtime::with_connector(
        config,
        CommandManager::new('!', PermissionTable::default()),
        connector,
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_echo_requires_channel() {
    let mut config = config();
    config.channels.clear();
    let (connector, _sessions) = MockConnector::new();
    let runtime = Runtime::with_connector(
        config,
        CommandManager::new('!', PermissionTable::default()),
        connector,
    )
    .unwrap();
    assert!(matches!(runtime.broadcast_echo("x"), Err(Error::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn test_echo_goes_through_primary_only() {
    let config = config();
    let (connector, mut sessions) = MockConnector::new();
    let runtime =
        Runtime::with_connector(config.clone(), CommandManager::from_config(&config), connector)
            .unwrap();
    runtime.start().unwrap();

    // Sessions arrive in whichever order the bots connect
    let mut main = None;
    let mut backup = None;
    for _ in 0..2 {
        let mut server = FakeServer::accept(&mut sessions).await;
        let nick_line = server.expect_line().await;
        server.expect_line().await;
        let nick = nick_line.trim_start_matches("NICK ").to_string();
        server
            .send(&format!(":irc.test 001 {} :Welcome", nick))
            .await;
        assert_eq!(server.expect_line().await, "JOIN #ops");
        match nick.as_str() {
            "bridge" => main = Some(server),
            "backup" => backup = Some(server),
            other => panic!("unexpected nick {}", other),
        }
    }
    let (mut main, mut backup) = (main.unwrap(), backup.unwrap());
    for bot in runtime.bots() {
        wait_ready(bot).await;
    }

    assert_eq!(runtime.broadcast_echo("hello\nworld").unwrap(), 1);
    assert_eq!(main.expect_line().await, "PRIVMSG #ops :hello");
    assert_eq!(main.expect_line().await, "PRIVMSG #ops :world");

    assert_eq!(runtime.broadcast("PRIVMSG #ops :everyone"), 2);
    assert_eq!(main.expect_line().await, "PRIVMSG #ops :everyone");
    assert_eq!(backup.expect_line().await, "PRIVMSG #ops :everyone");

    runtime.shutdown("maintenance").await;
    assert_eq!(main.expect_line().await, "QUIT :maintenance");
    assert_eq!(backup.expect_line().await, "QUIT :maintenance");
    assert!(runtime
        .bots()
        .iter()
        .all(|b| b.state() == ConnectionState::Disconnected));
}
