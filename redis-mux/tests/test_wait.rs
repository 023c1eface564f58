mod support;

#[cfg(test)]
mod wait {
    use std::sync::Arc;
    use std::time::Duration;

    use redis_mux::{cmd, ErrorKind, Multiplexer, RedisError, Value};
    use redis_mux_test::{MockReply, MockTransport};

    use crate::support::*;

    const SERVER: &str = "127.0.0.1:6379";

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn connect_blocking(
        runtime: &tokio::runtime::Runtime,
        transport: &Arc<MockTransport>,
        sync_timeout: Duration,
    ) -> Multiplexer {
        let options = options(&[SERVER]).set_sync_timeout(sync_timeout);
        runtime.block_on(async { connected(transport, options).await.0 })
    }

    #[test]
    fn wait_returns_the_outcome() {
        init_logging();
        let runtime = runtime();
        let transport = transport();
        transport.reply(&endpoint(SERVER), "GET", Value::Int(3));
        let mux = connect_blocking(&runtime, &transport, Duration::from_secs(2));

        let database = mux.database(0);
        let value = mux
            .wait(async move { database.execute(cmd("GET").arg("foo").clone()).await })
            .unwrap();
        assert_eq!(value, Value::Int(3));
        assert_eq!(
            mux.database(0).execute_blocking(cmd("GET").arg("foo").clone()).unwrap(),
            Value::Int(3)
        );
        mux.dispose();
    }

    #[test]
    fn wait_raises_the_original_error() {
        init_logging();
        let runtime = runtime();
        let transport = transport();
        transport.reply(
            &endpoint(SERVER),
            "GET",
            MockReply::ServerError("NOPERM this user has no permissions".to_string()),
        );
        let mux = connect_blocking(&runtime, &transport, Duration::from_secs(2));

        let err = mux
            .database(0)
            .execute_blocking(cmd("GET").arg("foo").clone())
            .unwrap_err();
        assert_eq!(err.code(), Some("NOPERM"));
        mux.dispose();
    }

    #[test]
    fn wait_times_out() {
        init_logging();
        let runtime = runtime();
        let transport = transport();
        transport.reply(&endpoint(SERVER), "BLPOP", MockReply::Hang);
        let mux = connect_blocking(&runtime, &transport, Duration::from_millis(100));

        let err = mux
            .database(0)
            .execute_blocking(cmd("BLPOP").arg("queue").arg(0).clone())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_timeout());
        mux.dispose();
    }

    #[test]
    fn try_wait_reports_success() {
        init_logging();
        let runtime = runtime();
        let transport = transport();
        transport.reply(&endpoint(SERVER), "BLPOP", MockReply::Hang);
        let mux = connect_blocking(&runtime, &transport, Duration::from_millis(100));

        let database = mux.database(0);
        assert!(mux.try_wait(async move { database.execute(cmd("PING")).await }));
        let database = mux.database(0);
        assert!(!mux.try_wait(async move {
            database
                .execute(cmd("BLPOP").arg("queue").arg(0).clone())
                .await
        }));
        mux.dispose();
    }

    #[test]
    fn wait_all_reports_completion() {
        init_logging();
        let runtime = runtime();
        let transport = transport();
        transport.reply(&endpoint(SERVER), "BLPOP", MockReply::Hang);
        transport.reply(
            &endpoint(SERVER),
            "INCR",
            MockReply::ServerError("ERR value is not an integer".to_string()),
        );
        let mux = connect_blocking(&runtime, &transport, Duration::from_millis(200));

        let commands = |names: &[&str]| {
            names
                .iter()
                .map(|name| {
                    let database = mux.database(0);
                    let command = cmd(name).arg("key").clone();
                    async move { database.execute(command).await }
                })
                .collect::<Vec<_>>()
        };

        assert!(mux.wait_all(commands(&["GET", "SET", "PING"])).unwrap());
        assert!(!mux.wait_all(commands(&["GET", "BLPOP"])).unwrap());
        let err = mux.wait_all(commands(&["GET", "INCR"])).unwrap_err();
        assert_eq!(err.code(), Some("ERR"));
        mux.dispose();
    }

    #[test]
    fn waiting_requires_a_connected_multiplexer() {
        init_logging();
        let mux = multiplexer(&transport());
        let err = mux
            .wait(async { Ok::<_, RedisError>(()) })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientError);
    }

    #[tokio::test]
    async fn waiting_inside_the_runtime_is_rejected() {
        init_logging();
        let transport = transport();
        let (mux, _) = connected(&transport, options(&[SERVER])).await;
        let err = mux
            .wait(async { Ok::<_, RedisError>(()) })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientError);
        mux.dispose();
    }
}
