//! Protocol round-trip: a real server on an ephemeral port, driven by
//! the blocking client.

use sawitdb::client::SawitClient;
use sawitdb::server::{SawitServer, ServerConfig};
use std::sync::Arc;
use tokio::net::TcpListener;

async fn start_server(dir: &tempfile::TempDir, auth: Option<(&str, &str)>) -> std::net::SocketAddr {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        data_dir: dir.path().to_path_buf(),
        max_connections: 10,
        auth: auth.map(|(user, pass)| [(user.to_string(), pass.to_string())].into()),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(SawitServer::new(config));
    tokio::spawn(server.run(listener));
    addr
}

#[tokio::test]
async fn query_round_trip_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_server(&dir, None).await;

    let rows = tokio::task::spawn_blocking(move || {
        let mut client =
            SawitClient::new(&format!("sawitdb://{}:{}/plantation", addr.ip(), addr.port()));
        client.connect()?;

        client.query("LAHAN sawit", None)?;
        client.query("TANAM KE sawit (id, jenis) BIBIT (1, 'Tenera')", None)?;
        client.query("TANAM KE sawit (id, jenis) BIBIT (2, 'Dura')", None)?;
        let rows = client.query("PANEN * DARI sawit DIMANA jenis = 'Tenera'", None)?;

        assert!(client.ping()? > 0);
        assert_eq!(client.list_databases()?, vec!["plantation".to_string()]);

        client.close();
        anyhow::Ok(rows)
    })
    .await
    .unwrap()
    .unwrap();

    let rows = rows.as_array().expect("rows are a JSON array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["jenis"], "Tenera");
    assert_eq!(rows[0]["id"], 1.0);
}

#[tokio::test]
async fn database_commands_are_intercepted() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_server(&dir, None).await;

    tokio::task::spawn_blocking(move || {
        let mut client = SawitClient::new(&format!("sawitdb://{}:{}", addr.ip(), addr.port()));
        client.connect()?;

        // No database entered yet: engine queries are refused.
        assert!(client.query("LAHAN sawit", None).is_err());

        let opened = client.query("BUKA WILAYAH blok_a", None)?;
        assert!(opened.as_str().unwrap().contains("berhasil dibuka"));

        let listing = client.query("LIHAT WILAYAH", None)?;
        assert!(listing.as_str().unwrap().contains("blok_a"));

        let entered = client.query("MASUK WILAYAH blok_a", None)?;
        assert!(entered.as_str().unwrap().contains("Selamat datang"));
        client.query("LAHAN sawit", None)?;

        // Entering a region that does not exist is an error.
        assert!(client.query("MASUK WILAYAH tidak_ada", None).is_err());

        let burned = client.query("BAKAR WILAYAH blok_a", None)?;
        assert!(burned.as_str().unwrap().contains("hangus"));
        assert!(client.list_databases()?.is_empty());

        anyhow::Ok(())
    })
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn auth_gates_requests_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_server(&dir, Some(("ana", "rahasia"))).await;

    tokio::task::spawn_blocking(move || {
        // Wrong password: the auth handshake during connect fails.
        let mut client = SawitClient::new(&format!(
            "sawitdb://ana:salah@{}:{}/kebun",
            addr.ip(),
            addr.port()
        ));
        assert!(client.connect().is_err());

        // No credentials: requests are rejected until auth.
        let mut client = SawitClient::new(&format!("sawitdb://{}:{}", addr.ip(), addr.port()));
        client.connect()?;
        assert!(client.query("LIHAT WILAYAH", None).is_err());

        // Correct credentials work end to end.
        let mut client = SawitClient::new(&format!(
            "sawitdb://ana:rahasia@{}:{}/kebun",
            addr.ip(),
            addr.port()
        ));
        client.connect()?;
        client.query("LAHAN sawit", None)?;

        anyhow::Ok(())
    })
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn errors_keep_the_connection_alive() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_server(&dir, None).await;

    tokio::task::spawn_blocking(move || {
        let mut client =
            SawitClient::new(&format!("sawitdb://{}:{}/kebun", addr.ip(), addr.port()));
        client.connect()?;

        assert!(client.query("PANEN * DARI hantu", None).is_err());
        assert!(client.query("kalimat ngawur", None).is_err());

        // The same connection still serves valid queries.
        client.query("LAHAN nyata", None)?;
        let rows = client.query("PANEN * DARI nyata", None)?;
        assert_eq!(rows.as_array().unwrap().len(), 0);

        anyhow::Ok(())
    })
    .await
    .unwrap()
    .unwrap();
}
