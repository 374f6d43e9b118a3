//! Transport Module Tests
//!
//! ## Test Scopes
//! - **Memory network**: accept/receive/close ordering, refused connections, offline nodes.
//! - **TCP**: a frame round trip across real sockets, including the `\r\n` framing.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::NodeAddress;
    use crate::transport::memory::MemoryNetwork;
    use crate::transport::tcp::TcpTransport;
    use crate::transport::{Listener, Transport, TransportEvent};

    fn address(port: u16) -> NodeAddress {
        NodeAddress::new("node", port, port + 1)
    }

    // ============================================================
    // MEMORY NETWORK TESTS
    // ============================================================

    #[test]
    fn test_connect_delivers_accept_then_frames() {
        let network = MemoryNetwork::new();
        let server_addr = address(7000);
        let mut server = network.bind(&server_addr);
        let mut client = network.client();

        let channel = client.connect(&server_addr.external_endpoint()).unwrap();
        client.send(channel, "hello".to_string()).unwrap();

        let events = server.poll();
        assert_eq!(
            events,
            vec![
                TransportEvent::Accepted {
                    channel,
                    listener: Listener::External
                },
                TransportEvent::Received {
                    channel,
                    payload: "hello".to_string()
                },
            ]
        );
        assert!(server.poll().is_empty());
    }

    #[test]
    fn test_internal_port_is_tagged() {
        let network = MemoryNetwork::new();
        let server_addr = address(7000);
        let mut server = network.bind(&server_addr);
        let mut client = network.client();

        let channel = client.connect(&server_addr.internal_endpoint()).unwrap();

        assert_eq!(
            server.poll(),
            vec![TransportEvent::Accepted {
                channel,
                listener: Listener::Internal
            }]
        );
    }

    #[test]
    fn test_reply_travels_back() {
        let network = MemoryNetwork::new();
        let server_addr = address(7000);
        let mut server = network.bind(&server_addr);
        let mut client = network.client();

        let channel = client.connect(&server_addr.internal_endpoint()).unwrap();
        server.poll();
        server.send(channel, "pong".to_string()).unwrap();

        assert_eq!(
            client.poll(),
            vec![TransportEvent::Received {
                channel,
                payload: "pong".to_string()
            }]
        );
    }

    #[test]
    fn test_close_notifies_peer_only() {
        let network = MemoryNetwork::new();
        let server_addr = address(7000);
        let mut server = network.bind(&server_addr);
        let mut client = network.client();

        let channel = client.connect(&server_addr.external_endpoint()).unwrap();
        server.poll();
        client.close(channel);

        assert_eq!(server.poll(), vec![TransportEvent::Closed { channel }]);
        assert!(client.poll().is_empty());
        assert!(client.send(channel, "late".to_string()).is_err());
    }

    #[test]
    fn test_unknown_endpoint_is_refused() {
        let network = MemoryNetwork::new();
        let mut client = network.client();

        assert!(client.connect("nowhere:1").is_err());
    }

    #[test]
    fn test_offline_node_refuses_and_breaks_channels() {
        let network = MemoryNetwork::new();
        let server_addr = address(7000);
        let mut server = network.bind(&server_addr);
        let mut client = network.client();

        let channel = client.connect(&server_addr.internal_endpoint()).unwrap();
        network.set_offline(&server_addr, true);

        assert_eq!(client.poll(), vec![TransportEvent::Closed { channel }]);
        assert!(client.connect(&server_addr.internal_endpoint()).is_err());
        assert!(server.poll().is_empty());

        network.set_offline(&server_addr, false);
        let channel = client.connect(&server_addr.internal_endpoint()).unwrap();
        assert_eq!(server.poll().len(), 1);
        assert!(client.send(channel, "back".to_string()).is_ok());
    }

    // ============================================================
    // TCP TESTS
    // ============================================================

    async fn poll_until<T: Transport>(transport: &mut T, count: usize) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        for _ in 0..200 {
            events.extend(transport.poll());
            if events.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        events
    }

    #[tokio::test]
    async fn test_tcp_frame_round_trip() {
        let mut server = TcpTransport::bind("127.0.0.1:0", "127.0.0.1:0").await.unwrap();
        let mut client = TcpTransport::bind("127.0.0.1:0", "127.0.0.1:0").await.unwrap();
        let (_, internal) = server.local_addrs();

        let channel = client.connect(&internal.to_string()).unwrap();
        client.send(channel, r#"{"type":"membership"}"#.to_string()).unwrap();

        let events = poll_until(&mut server, 2).await;
        let TransportEvent::Accepted {
            channel: accepted,
            listener,
        } = events[0]
        else {
            panic!("expected accept, got {:?}", events);
        };
        assert_eq!(listener, Listener::Internal);
        assert_eq!(
            events[1],
            TransportEvent::Received {
                channel: accepted,
                payload: r#"{"type":"membership"}"#.to_string()
            }
        );

        server.send(accepted, "ack".to_string()).unwrap();
        server.close(accepted);

        let events = poll_until(&mut client, 2).await;
        assert_eq!(
            events,
            vec![
                TransportEvent::Received {
                    channel,
                    payload: "ack".to_string()
                },
                TransportEvent::Closed { channel },
            ]
        );
    }

    #[tokio::test]
    async fn test_tcp_connect_failure_surfaces_as_event() {
        let mut client = TcpTransport::bind("127.0.0.1:0", "127.0.0.1:0").await.unwrap();
        let refused = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap()
        };

        let channel = client.connect(&refused.to_string()).unwrap();
        let events = poll_until(&mut client, 1).await;

        assert!(matches!(
            events.as_slice(),
            [TransportEvent::Failed { channel: failed, .. }] if *failed == channel
        ));
    }
}
