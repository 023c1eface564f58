mod support;

#[cfg(test)]
mod multiplexer {
    use std::sync::Arc;
    use std::time::Duration;

    use redis_mux::{
        cmd, CommandFlags, ConfigurationOptions, ConnectionEvent, ConnectionFailureType,
        ConnectionState, ConnectionType, DestinationKind, ErrorKind, LogSink, Multiplexer,
        ServerRole, Transport, Value,
    };
    use redis_mux_test::{Behavior, MockReply};
    use rstest::rstest;
    use tokio::sync::mpsc::unbounded_channel;

    use crate::support::*;

    #[tokio::test]
    async fn single_connected_node_is_addressed_directly() {
        init_logging();
        let transport = transport();
        let (mux, connected) = connected(&transport, options(&["127.0.0.1:6379"])).await;
        assert_eq!(connected, 1);
        assert_eq!(mux.destination().kind(), DestinationKind::Direct);

        transport.reply(&endpoint("127.0.0.1:6379"), "GET", Value::Int(42));
        let value = mux
            .database(0)
            .execute(cmd("GET").arg("foo").clone())
            .await
            .unwrap();
        assert_eq!(value, Value::Int(42));
        assert_eq!(
            transport.commands(&endpoint("127.0.0.1:6379")),
            vec!["GET".to_string()]
        );
        mux.dispose_async().await;
    }

    #[rstest]
    #[case::empty(&[], "127.0.0.1:6379")]
    #[case::localhost(&["localhost"], "127.0.0.1:6379")]
    #[case::dot(&["."], "127.0.0.1:6379")]
    #[case::explicit_port(&["cache:7000"], "cache:7000")]
    #[tokio::test]
    async fn endpoints_are_normalized(#[case] configured: &[&str], #[case] expected: &str) {
        init_logging();
        let transport = transport();
        let (mux, _) = connected(&transport, options(configured)).await;
        let endpoints: Vec<_> = mux.nodes().iter().map(|node| node.endpoint().clone()).collect();
        assert_eq!(endpoints, vec![endpoint(expected)]);
        mux.dispose();
    }

    #[tokio::test]
    async fn tls_endpoints_default_to_the_tls_port() {
        init_logging();
        let transport = transport();
        let (mux, _) = connected(&transport, options(&["cache"]).set_ssl(true)).await;
        assert_eq!(mux.nodes()[0].endpoint(), &endpoint("cache:6380"));
        mux.dispose();
    }

    #[tokio::test]
    async fn duplicate_endpoints_share_a_node() {
        init_logging();
        let transport = transport();
        let (mux, connected) =
            connected(&transport, options(&["localhost:6379", "127.0.0.1"])).await;
        assert_eq!(connected, 1);
        assert_eq!(mux.nodes().len(), 1);
        assert_eq!(transport.opens(), 1);
        mux.dispose();
    }

    #[tokio::test]
    async fn connect_may_only_be_called_once() {
        init_logging();
        let transport = transport();
        let (mux, _) = connected(&transport, options(&["127.0.0.1:6379"])).await;
        let err = mux.connect(options(&["127.0.0.1:6380"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientError);
        assert_eq!(mux.nodes().len(), 1);
        assert_eq!(transport.opens(), 1);
        mux.dispose();
    }

    #[tokio::test]
    async fn several_nodes_are_routed_by_key() {
        init_logging();
        let transport = transport();
        let (mux, connected) = connected(
            &transport,
            options(&["127.0.0.1:7000", "127.0.0.1:7001"]),
        )
        .await;
        assert_eq!(connected, 2);
        assert_eq!(mux.destination().kind(), DestinationKind::Routed);

        // slot of "foo" is 12182, an even number
        mux.database(0)
            .execute(cmd("GET").arg("foo").clone())
            .await
            .unwrap();
        assert_eq!(
            transport.commands(&endpoint("127.0.0.1:7000")),
            vec!["GET".to_string()]
        );
        assert!(transport.commands(&endpoint("127.0.0.1:7001")).is_empty());
        mux.dispose();
    }

    #[tokio::test]
    async fn replica_flags_steer_commands() {
        init_logging();
        let transport = transport();
        let primary = endpoint("127.0.0.1:7000");
        let replica = endpoint("127.0.0.1:7001");
        transport.set_role(&replica, ServerRole::Replica);
        let (mux, _) = connected(&transport, options(&["127.0.0.1:7000", "127.0.0.1:7001"])).await;
        assert_eq!(mux.nodes()[1].role(), ServerRole::Replica);

        let replicas = mux.database_with_flags(0, CommandFlags::DEMAND_REPLICA);
        replicas.execute(cmd("GET").arg("a").clone()).await.unwrap();
        replicas.execute(cmd("GET").arg("b").clone()).await.unwrap();
        assert_eq!(transport.commands(&replica).len(), 2);

        mux.database(0)
            .execute(cmd("SET").arg("a").arg(1).clone())
            .await
            .unwrap();
        assert_eq!(transport.commands(&primary), vec!["SET".to_string()]);
        mux.dispose();
    }

    #[tokio::test]
    async fn prefer_replica_falls_back_to_primaries() {
        init_logging();
        let transport = transport();
        let primary = endpoint("127.0.0.1:7000");
        let replica = endpoint("127.0.0.1:7001");
        transport.set_role(&replica, ServerRole::Replica);
        transport.set_behavior(&replica, Behavior::Refuse);
        let (mux, connected) =
            connected(&transport, options(&["127.0.0.1:7000", "127.0.0.1:7001"])).await;
        assert_eq!(connected, 1);

        mux.database_with_flags(0, CommandFlags::PREFER_REPLICA)
            .execute(cmd("GET").arg("a").clone())
            .await
            .unwrap();
        assert_eq!(transport.commands(&primary), vec!["GET".to_string()]);

        let err = mux
            .database_with_flags(0, CommandFlags::DEMAND_REPLICA)
            .execute(cmd("GET").arg("a").clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoConnectionAvailable);
        mux.dispose();
    }

    #[tokio::test]
    async fn moved_replies_are_followed_once() {
        init_logging();
        let transport = transport();
        let first = endpoint("127.0.0.1:7000");
        let second = endpoint("127.0.0.1:7001");
        transport.queue_reply(
            &first,
            "GET",
            MockReply::ServerError("MOVED 12182 127.0.0.1:7001".to_string()),
        );
        transport.reply(&second, "GET", Value::Int(5));
        let (mux, _) = connected(&transport, options(&["127.0.0.1:7000", "127.0.0.1:7001"])).await;

        let value = mux
            .database(0)
            .execute(cmd("GET").arg("foo").clone())
            .await
            .unwrap();
        assert_eq!(value, Value::Int(5));

        transport.queue_reply(
            &first,
            "GET",
            MockReply::ServerError("MOVED 12182 127.0.0.1:7001".to_string()),
        );
        let err = mux
            .database(0)
            .execute_with_flags(cmd("GET").arg("foo").clone(), CommandFlags::NO_REDIRECT)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("MOVED"));
        mux.dispose();
    }

    #[tokio::test]
    async fn partial_failure_is_not_fatal() {
        init_logging();
        let transport = transport();
        let down = endpoint("127.0.0.1:7001");
        transport.set_behavior(&down, Behavior::Refuse);
        let (tx, mut events) = unbounded_channel();
        let options =
            options(&["127.0.0.1:7000", "127.0.0.1:7001"]).set_event_sender(tx);
        let (mux, connected) = connected(&transport, options).await;
        assert_eq!(connected, 1);
        assert!(mux.is_connected());

        match next_event(&mut events).await {
            ConnectionEvent::Failed(event) => {
                assert_eq!(event.endpoint, down);
                assert_eq!(event.failure_type, ConnectionFailureType::UnableToConnect);
            }
            other => panic!("unexpected event {other:?}"),
        }
        mux.database(0).execute(cmd("PING")).await.unwrap();
        mux.dispose();
    }

    #[tokio::test]
    async fn nothing_reachable_fails_fast() {
        init_logging();
        let transport = transport();
        transport.set_behavior(&endpoint("127.0.0.1:6379"), Behavior::Refuse);
        let (mux, connected) = connected(&transport, options(&["127.0.0.1:6379"])).await;
        assert_eq!(connected, 0);
        assert_eq!(mux.destination().kind(), DestinationKind::Routed);

        let err = tokio::time::timeout(
            Duration::from_millis(500),
            mux.database(0).execute(cmd("GET").arg("foo").clone()),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoConnectionAvailable);
        assert_eq!(mux.retry_queue_len(), 0);
        mux.dispose();
    }

    #[tokio::test]
    async fn server_errors_reach_the_caller() {
        init_logging();
        let transport = transport();
        transport.reply(
            &endpoint("127.0.0.1:6379"),
            "INCR",
            MockReply::ServerError(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            ),
        );
        let (mux, _) = connected(&transport, options(&["127.0.0.1:6379"])).await;
        let err = mux
            .database(0)
            .execute(cmd("INCR").arg("foo").clone())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("WRONGTYPE"));
        assert_eq!(mux.retry_queue_len(), 0);
        mux.dispose();
    }

    #[tokio::test]
    async fn fire_and_forget_resolves_immediately() {
        init_logging();
        let transport = transport();
        let server = endpoint("127.0.0.1:6379");
        transport.reply(&server, "SET", MockReply::Hang);
        let (mux, _) = connected(&transport, options(&["127.0.0.1:6379"])).await;

        let value = mux
            .database_with_flags(0, CommandFlags::FIRE_AND_FORGET)
            .execute(cmd("SET").arg("a").arg(1).clone())
            .await
            .unwrap();
        assert_eq!(value, Value::Nil);
        eventually(|| transport.commands(&server) == vec!["SET".to_string()]).await;
        mux.dispose();
    }

    #[tokio::test]
    async fn database_views_carry_the_database() {
        init_logging();
        let transport = transport();
        let (mux, _) = connected(
            &transport,
            options(&["127.0.0.1:6379"]).set_default_database(4),
        )
        .await;
        assert_eq!(mux.default_context().database(), 4);
        assert_eq!(mux.database(2).database(), 2);
        assert_eq!(
            mux.database_with_flags(2, CommandFlags::DEMAND_REPLICA | CommandFlags::NO_RETRY)
                .context()
                .flags(),
            CommandFlags::DEMAND_REPLICA
        );
        mux.dispose();
    }

    #[tokio::test]
    async fn broken_direct_connection_is_routed_until_restored() {
        init_logging();
        let transport = transport();
        let server = endpoint("127.0.0.1:6379");
        let (tx, mut events) = unbounded_channel();
        let (mux, _) =
            connected(&transport, options(&["127.0.0.1:6379"]).set_event_sender(tx)).await;
        assert_eq!(mux.destination().kind(), DestinationKind::Direct);
        let cached = mux.context(0, CommandFlags::empty());

        transport.last_connection(&server).unwrap().reset();
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Failed(event) if event.failure_type == ConnectionFailureType::SocketFailure
        ));
        eventually(|| mux.destination().kind() == DestinationKind::Routed).await;
        assert!(!Arc::ptr_eq(
            cached.destination(),
            mux.context(0, CommandFlags::empty()).destination()
        ));

        mux.heartbeat().await;
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Restored(event) if event.connection_type == ConnectionType::Interactive
        ));
        assert_eq!(mux.destination().kind(), DestinationKind::Direct);
        assert_eq!(transport.opens_to(&server), 2);
        mux.dispose();
    }

    #[tokio::test]
    async fn heartbeat_reconnects_only_when_enabled() {
        init_logging();
        let transport = transport();
        let server = endpoint("127.0.0.1:6379");
        transport.set_behavior(&server, Behavior::Refuse);
        let (mux, _) = connected(
            &transport,
            options(&["127.0.0.1:6379"]).set_reconnect_on_heartbeat(false),
        )
        .await;
        transport.set_behavior(&server, Behavior::Accept);
        mux.heartbeat().await;
        assert!(!mux.is_connected());
        assert_eq!(transport.opens_to(&server), 1);
        mux.dispose();
    }

    #[tokio::test]
    async fn background_heartbeat_reconnects() {
        init_logging();
        let transport = transport();
        let server = endpoint("127.0.0.1:6379");
        transport.set_behavior(&server, Behavior::Refuse);
        let (mux, _) = connected(
            &transport,
            options(&["127.0.0.1:6379"]).set_heartbeat_interval(Duration::from_millis(20)),
        )
        .await;
        transport.set_behavior(&server, Behavior::Accept);
        eventually(|| mux.destination().kind() == DestinationKind::Direct).await;
        mux.dispose();
    }

    #[tokio::test]
    async fn subscriber_connects_the_subscription_slot() {
        init_logging();
        let transport = transport();
        let (mux, _) = connected(&transport, options(&["127.0.0.1:6379"])).await;
        assert!(mux.nodes()[0].subscription_if_created().is_none());

        let slot = mux.subscriber().await.unwrap();
        assert_eq!(slot.connection_type(), ConnectionType::Subscription);
        assert_eq!(slot.state(), ConnectionState::Connected);
        assert_eq!(transport.opens(), 2);
        mux.dispose();
    }

    #[tokio::test]
    async fn dispose_is_terminal() {
        init_logging();
        let transport = transport();
        let (tx, mut events) = unbounded_channel();
        let (mux, _) =
            connected(&transport, options(&["127.0.0.1:6379"]).set_event_sender(tx)).await;
        let database = mux.database(0);

        mux.dispose_async().await;
        mux.dispose();
        assert!(mux.is_disposed());
        assert_eq!(mux.destination().kind(), DestinationKind::Disposed);
        assert_eq!(mux.nodes()[0].interactive().state(), ConnectionState::Disposed);
        assert!(transport
            .last_connection(&endpoint("127.0.0.1:6379"))
            .unwrap()
            .is_closed());

        let err = database.execute(cmd("PING")).await.unwrap_err();
        assert_eq!(
            err.connection_failure(),
            Some(ConnectionFailureType::ConnectionDisposed)
        );
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Failed(event) if event.failure_type == ConnectionFailureType::ConnectionDisposed
        ));
    }

    #[tokio::test]
    async fn dispose_cancels_pending_connects() {
        init_logging();
        let transport = transport();
        transport.set_behavior(&endpoint("127.0.0.1:6379"), Behavior::Hang);
        let mux = multiplexer(&transport);
        let connecting = {
            let mux = mux.clone();
            let options = options(&["127.0.0.1:6379"]).set_connect_timeout(Duration::from_secs(30));
            tokio::spawn(async move { mux.connect(options).await })
        };
        eventually(|| transport.opens() == 1).await;
        mux.dispose();

        let connected = tokio::time::timeout(Duration::from_secs(1), connecting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(connected, 0);
        assert_eq!(mux.destination().kind(), DestinationKind::Disposed);
    }

    #[tokio::test]
    async fn connect_with_uses_the_configured_handshake_options() {
        init_logging();
        let transport = transport();
        let options = options(&["127.0.0.1:6379"])
            .set_client_name("billing")
            .set_password("hunter2");
        let mux = Multiplexer::connect_with(options, transport.clone() as Arc<dyn Transport>)
            .await
            .unwrap();
        let connection = transport
            .last_connection(&endpoint("127.0.0.1:6379"))
            .unwrap();
        // AUTH, CLIENT SETNAME and ROLE
        assert_eq!(connection.writes(), 3);
        assert!(connection.commands().is_empty());
        mux.dispose();
    }

    #[tokio::test]
    async fn log_sink_receives_connect_progress() {
        init_logging();
        let transport = transport();
        let buffer = SharedBuffer::default();
        let options: ConfigurationOptions = options(&["127.0.0.1:6379"])
            .set_log_sink(LogSink::new(buffer.clone()));
        let (mux, _) = connected(&transport, options).await;
        let output = buffer.contents();
        assert!(output.contains("127.0.0.1:6379/interactive: connected"), "{output}");
        assert!(output.contains("1 of 1 endpoint(s) connected"), "{output}");
        mux.dispose();
    }
}
