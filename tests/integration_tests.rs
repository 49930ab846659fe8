//! Integration tests for the game server
//!
//! These tests start a real server on a loopback port and drive it with the
//! headless client, covering the handshake and the relay rules end to end.

use client::network::{Client, ClientError, Handshake};
use server::{MemoryRecordStore, Server, ServerConfig, ServerHandle};
use shared::{
    ChunkRequest, Equipment, MoveData, Packet, PlayerData, SoundData, Vector2, CHUNK_SIZE,
};
use std::sync::Arc;
use std::time::Duration;

const VERSION: &str = "1.0";
const WAIT: Duration = Duration::from_secs(3);

fn loopback_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        version: VERSION.to_string(),
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> ServerHandle {
    Server::start(config, Arc::new(MemoryRecordStore::new()))
        .await
        .expect("Failed to start server")
}

async fn join(server: &ServerHandle, name: &str) -> (Client, PlayerData) {
    let addr = server.local_addr().to_string();
    let (mut client, data) = Client::connect_and_join(&addr, VERSION, name, WAIT)
        .await
        .expect("Failed to join");
    // Packets on one connection are handled in order, so once the ping is
    // echoed the join has been processed.
    collect_until_ping(&mut client).await;
    (client, data)
}

/// Sends a ping and returns everything received before the echo.
async fn collect_until_ping(client: &mut Client) -> Vec<Packet> {
    client
        .send(&Packet::Ping { timestamp: 7 })
        .await
        .expect("Failed to send ping");
    let mut seen = Vec::new();
    loop {
        match client.recv_timeout(WAIT).await.expect("No ping echo") {
            Packet::Ping { timestamp: 7 } => return seen,
            packet => seen.push(packet),
        }
    }
}

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn new_player_gets_default_state_and_peers_see_the_join() {
        let server = start_server(loopback_config()).await;
        let (mut bob, bob_data) = join(&server, "Bob").await;

        let addr = server.local_addr().to_string();
        let mut alice = Client::connect(&addr).await.unwrap();
        let alice_data = match alice.handshake(VERSION, "Alice", WAIT).await.unwrap() {
            Handshake::ServerData(data) => data,
            other => panic!("Expected server data, got {:?}", other),
        };

        assert_ne!(alice_data.id, bob_data.id);
        assert_eq!(alice_data.name, "Alice");
        assert_eq!(alice_data.position, Vector2::ZERO);
        assert_eq!(alice_data.equipment, Equipment::default());
        assert_eq!(alice_data.inventory.len(), 40);

        alice.join(alice_data.clone()).await.unwrap();

        let joined = bob
            .recv_matching(WAIT, |p| matches!(p, Packet::PlayerJoin(_)))
            .await
            .unwrap();
        match joined {
            Packet::PlayerJoin(data) => {
                assert_eq!(data.id, alice_data.id);
                assert_eq!(data.name, "Alice");
            }
            other => panic!("Expected PlayerJoin, got {:?}", other),
        }

        // Alice is told about Bob as part of her world snapshot.
        let snapshot = alice
            .recv_matching(WAIT, |p| matches!(p, Packet::PlayerJoin(_)))
            .await
            .unwrap();
        assert!(matches!(snapshot, Packet::PlayerJoin(data) if data.id == bob_data.id));

        server.shutdown();
    }

    #[tokio::test]
    async fn version_mismatch_is_rejected_with_reason() {
        let server = start_server(loopback_config()).await;
        let addr = server.local_addr().to_string();

        let mut client = Client::connect(&addr).await.unwrap();
        match client.handshake("0.9", "Old", WAIT).await {
            Err(ClientError::Rejected(reason)) => {
                assert_eq!(reason, "Invalid Version. [Client: 0.9] [Server: 1.0]");
            }
            other => panic!("Expected rejection, got {:?}", other),
        }

        server.shutdown();
    }

    #[tokio::test]
    async fn only_one_of_two_racing_connects_fits_a_single_slot() {
        let config = ServerConfig {
            max_players: 1,
            ..loopback_config()
        };
        let server = start_server(config).await;
        let addr = server.local_addr().to_string();

        let mut first = Client::connect(&addr).await.unwrap();
        let mut second = Client::connect(&addr).await.unwrap();
        let (a, b) = tokio::join!(
            first.handshake(VERSION, "First", WAIT),
            second.handshake(VERSION, "Second", WAIT)
        );

        let accepted = [&a, &b].iter().filter(|r| r.is_ok()).count();
        let rejected = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(ClientError::Rejected(_))))
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(rejected, 1);

        server.shutdown();
    }

    #[tokio::test]
    async fn client_mode_only_assigns_an_identity() {
        let config = ServerConfig {
            server_player_data: false,
            ..loopback_config()
        };
        let server = start_server(config).await;
        let addr = server.local_addr().to_string();

        let mut client = Client::connect(&addr).await.unwrap();
        let handshake = client.handshake(VERSION, "Local", WAIT).await.unwrap();
        assert!(matches!(handshake, Handshake::ClientData { .. }));
        assert_eq!(client.player_id(), Some(handshake.player_id()));

        server.shutdown();
    }

    #[tokio::test]
    async fn identity_is_reused_after_disconnect() {
        let config = ServerConfig {
            max_players: 1,
            ..loopback_config()
        };
        let server = start_server(config).await;
        let addr = server.local_addr().to_string();

        let (first, data) = join(&server, "First").await;
        drop(first);

        // Removal happens when the server notices the closed socket.
        let mut reused = None;
        for _ in 0..50 {
            let mut client = Client::connect(&addr).await.unwrap();
            match client.handshake(VERSION, "Second", WAIT).await {
                Ok(handshake) => {
                    reused = Some(handshake.player_id());
                    break;
                }
                Err(ClientError::Rejected(_)) => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => panic!("Unexpected error: {}", e),
            }
        }
        assert_eq!(reused, Some(data.id));

        server.shutdown();
    }
}

/// RELAY TESTS
mod relay_tests {
    use super::*;

    #[tokio::test]
    async fn move_reaches_peers_but_not_the_sender() {
        let server = start_server(loopback_config()).await;
        let (mut bob, _) = join(&server, "Bob").await;
        let (mut alice, alice_data) = join(&server, "Alice").await;

        let target = Vector2::new(3.0, -2.0);
        alice
            .send(&Packet::Move(MoveData {
                player_id: 999,
                position: target,
            }))
            .await
            .unwrap();

        let moved = bob
            .recv_matching(WAIT, |p| matches!(p, Packet::Move(_)))
            .await
            .unwrap();
        match moved {
            Packet::Move(data) => {
                // The sender's identity replaces whatever the client claimed.
                assert_eq!(data.player_id, alice_data.id);
                assert_eq!(data.position, target);
            }
            other => panic!("Expected Move, got {:?}", other),
        }

        let echoed = collect_until_ping(&mut alice).await;
        assert!(!echoed.iter().any(|p| matches!(p, Packet::Move(_))));

        server.shutdown();
    }

    #[tokio::test]
    async fn sound_reaches_everyone_including_the_sender() {
        let server = start_server(loopback_config()).await;
        let (mut bob, _) = join(&server, "Bob").await;
        let (mut alice, _) = join(&server, "Alice").await;

        let sound = SoundData {
            name: "bell".to_string(),
            position: Vector2::new(1.0, 1.0),
        };
        alice.send(&Packet::Sound(sound.clone())).await.unwrap();

        for client in [&mut alice, &mut bob] {
            let packet = client
                .recv_matching(WAIT, |p| matches!(p, Packet::Sound(_)))
                .await
                .unwrap();
            assert_eq!(packet, Packet::Sound(sound.clone()));
        }

        server.shutdown();
    }

    #[tokio::test]
    async fn chunk_request_is_answered_to_the_requester() {
        let server = start_server(loopback_config()).await;
        let (mut alice, _) = join(&server, "Alice").await;

        alice
            .send(&Packet::ChunkRequest(ChunkRequest { x: 2, y: -1 }))
            .await
            .unwrap();
        let packet = alice
            .recv_matching(WAIT, |p| matches!(p, Packet::Chunk(_)))
            .await
            .unwrap();
        match packet {
            Packet::Chunk(chunk) => {
                assert_eq!((chunk.x, chunk.y), (2, -1));
                assert_eq!(chunk.tiles.len(), CHUNK_SIZE * CHUNK_SIZE);
            }
            other => panic!("Expected Chunk, got {:?}", other),
        }

        server.shutdown();
    }

    #[tokio::test]
    async fn monster_spawn_is_broadcast_by_the_tick() {
        let server = start_server(loopback_config()).await;
        let (mut bob, _) = join(&server, "Bob").await;
        let (mut alice, _) = join(&server, "Alice").await;

        let location = Vector2::new(5.0, 5.0);
        bob.send(&Packet::MonsterSpawn { location }).await.unwrap();

        for client in [&mut bob, &mut alice] {
            let packet = client
                .recv_matching(WAIT, |p| matches!(p, Packet::Monster(_)))
                .await
                .unwrap();
            match packet {
                Packet::Monster(monster) => assert_eq!(monster.position, location),
                other => panic!("Expected Monster, got {:?}", other),
            }
        }

        server.shutdown();
    }

    #[tokio::test]
    async fn disconnect_is_announced_to_remaining_players() {
        let server = start_server(loopback_config()).await;
        let (mut bob, _) = join(&server, "Bob").await;
        let (alice, alice_data) = join(&server, "Alice").await;

        drop(alice);

        let packet = bob
            .recv_matching(WAIT, |p| matches!(p, Packet::Disconnect { .. }))
            .await
            .unwrap();
        assert_eq!(packet, Packet::Disconnect { id: alice_data.id });

        server.shutdown();
    }

    #[tokio::test]
    async fn gameplay_before_join_is_ignored() {
        let server = start_server(loopback_config()).await;
        let (mut bob, _) = join(&server, "Bob").await;

        let addr = server.local_addr().to_string();
        let mut lurker = Client::connect(&addr).await.unwrap();
        lurker.handshake(VERSION, "Lurker", WAIT).await.unwrap();
        lurker
            .send(&Packet::Move(MoveData {
                player_id: 1,
                position: Vector2::new(9.0, 9.0),
            }))
            .await
            .unwrap();
        // Ping works before joining and orders the test after the move.
        collect_until_ping(&mut lurker).await;

        let seen = collect_until_ping(&mut bob).await;
        assert!(!seen.iter().any(|p| matches!(p, Packet::Move(_))));

        server.shutdown();
    }
}
