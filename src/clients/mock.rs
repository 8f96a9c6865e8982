//! Local HTTP server standing in for the remote feeds in tests
use axum::Router;
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral loopback port; returns its base URL
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service()).await;
    });
    format!("http://{}", addr)
}
