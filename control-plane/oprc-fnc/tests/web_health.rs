use oprc_fnc::web::serve;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn health_endpoints_answer_until_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(listener, shutdown.clone()));

    let http = reqwest::Client::new();
    for p in ["/health", "/healthz"] {
        let resp = http
            .get(format!("http://{}{}", addr, p))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    shutdown.cancel();
    server.await.unwrap().expect("clean shutdown");
}
