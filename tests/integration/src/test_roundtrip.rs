//! Client/server round trips against a live endpoint.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use s3rpc::{
        Client, ClientOptions, HandlerContext, Handlers, Input, Output, RpcError, Server,
        ServerOptions,
    };

    use crate::Fixture;

    fn handlers(marker: &str) -> Handlers {
        let marker = marker.to_owned();
        let mut handlers = Handlers::new();
        handlers
            .register("dosomething", move |_ctx: HandlerContext, input: Input| {
                let marker = marker.clone();
                async move {
                    let mut content = tokio::fs::read_to_string(&input.filename).await?;
                    content.push_str("\n\n");
                    content.push_str(&marker);
                    let changed = input.filename.with_extension("changed");
                    tokio::fs::write(&changed, content).await?;
                    Ok::<_, anyhow::Error>(Output::new(changed).with_metadata("foo", "bar"))
                }
            })
            .expect("register");
        handlers
    }

    #[tokio::test]
    #[ignore = "requires running AWS-compatible endpoint"]
    async fn test_should_round_trip_over_s3_and_sqs() {
        let fixture = Fixture::provision("roundtrip").await.expect("provision");
        let marker = format!("___changed__{}", uuid::Uuid::new_v4());

        let server = Arc::new(
            Server::new(
                ServerOptions::builder()
                    .handlers(handlers(&marker))
                    .queue(fixture.server_queue.clone())
                    .poll_interval(Duration::from_millis(100))
                    .connection(fixture.connection())
                    .build(),
            )
            .expect("server"),
        );
        let client = Client::new(
            ClientOptions::builder()
                .queue(fixture.client_queue.clone())
                .timeout(Duration::from_secs(120))
                .connection(fixture.connection())
                .build(),
        )
        .expect("client");

        let serving = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.listen_and_serve().await }
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let request = dir.path().join("go.mod");
        std::fs::write(&request, "module example.com/s3rpc\n").expect("write request");

        let output = client
            .execute("dosomething", &request)
            .await
            .expect("execute");
        tracing::info!(filename = %output.filename.display(), "got response");

        let content = std::fs::read_to_string(&output.filename).expect("read response");
        assert!(content.contains(&marker), "expected {marker} in {content:?}");
        assert_eq!(output.metadata.get("foo").map(String::as_str), Some("bar"));

        server.close().await.expect("close server");
        serving.await.expect("join").expect("serve");
        client.close().expect("close client");
        assert!(fixture.keys().await.expect("list").is_empty());
        fixture.cleanup().await;
    }

    #[tokio::test]
    #[ignore = "requires running AWS-compatible endpoint"]
    async fn test_should_time_out_without_server() {
        let fixture = Fixture::provision("timeout").await.expect("provision");
        let client = Client::new(
            ClientOptions::builder()
                .queue(fixture.client_queue.clone())
                .timeout(Duration::from_secs(3))
                .connection(fixture.connection())
                .build(),
        )
        .expect("client");

        let dir = tempfile::tempdir().expect("tempdir");
        let request = dir.path().join("a.txt");
        std::fs::write(&request, "a").expect("write request");

        let err = client
            .execute("dosomething", &request)
            .await
            .expect_err("nobody answers");
        assert!(matches!(err, RpcError::Timeout { .. }), "{err}");

        client.close().expect("close client");
        fixture.cleanup().await;
    }
}
