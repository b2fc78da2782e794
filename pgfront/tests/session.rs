use std::sync::Arc;

use bytes::Bytes;

use pgfront::{
    Config, ErrorKind, MemoryBackend, Session,
    postgres::{
        BackendMessage, PgMessage, ReadyForQuery, SqlState,
        backend::{CopyInResponse, ErrorResponse},
        frontend::{CopyData, CopyDone, CopyFail, Query, StartupPacket, Startup, Sync, Terminate},
    },
    stream::PgStream,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex},
    task::JoinHandle,
};

struct Client {
    stream: PgStream<DuplexStream>,
}

fn startup() -> StartupPacket {
    StartupPacket::Startup(Startup {
        major: 3,
        minor: 0,
        params: vec![("user".into(), "test".into()), ("database".into(), "test".into())],
    })
}

fn spawn(backend: MemoryBackend) -> (DuplexStream, JoinHandle<pgfront::Result<()>>) {
    let (client, server) = duplex(8 * 1024);
    let session = Session::new(server, backend, Arc::new(Config::default()));
    (client, tokio::spawn(session.run()))
}

impl Client {
    async fn connect(backend: MemoryBackend) -> (Client, JoinHandle<pgfront::Result<()>>) {
        let (io, task) = spawn(backend);
        let mut client = Client { stream: PgStream::new(io) };
        client.stream.send_startup(&startup());
        client.stream.flush().await.unwrap();

        let messages = client.until_ready().await;
        assert!(matches!(messages[0], BackendMessage::AuthenticationOk(_)));
        (client, task)
    }

    async fn send<M: PgMessage>(&mut self, msg: M) {
        self.stream.send(msg);
        self.stream.flush().await.unwrap();
    }

    async fn recv(&mut self) -> BackendMessage {
        let frame = self.stream.recv_frame().await.unwrap().expect("server closed the stream");
        BackendMessage::decode(frame.msgtype, frame.body).unwrap()
    }

    async fn until_ready(&mut self) -> Vec<BackendMessage> {
        let mut messages = vec![];
        loop {
            let msg = self.recv().await;
            let ready = matches!(msg, BackendMessage::ReadyForQuery(_));
            messages.push(msg);
            if ready {
                return messages;
            }
        }
    }

    async fn query(&mut self, sql: &'static str) -> Vec<BackendMessage> {
        self.send(Query { sql: sql.into() }).await;
        self.until_ready().await
    }

    async fn copy_in(&mut self, sql: &'static str) -> CopyInResponse {
        self.send(Query { sql: sql.into() }).await;
        match self.recv().await {
            BackendMessage::CopyInResponse(res) => res,
            other => panic!("expected CopyInResponse, found {other:?}"),
        }
    }
}

fn keyvalue() -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.create_table("keyvalue", ["key", "value"]);
    backend
}

fn tag(msg: &BackendMessage) -> &str {
    match msg {
        BackendMessage::CommandComplete(cmd) => cmd.tag.as_str(),
        other => panic!("expected CommandComplete, found {other:?}"),
    }
}

fn error(msg: &BackendMessage) -> &ErrorResponse {
    match msg {
        BackendMessage::ErrorResponse(err) => err,
        other => panic!("expected ErrorResponse, found {other:?}"),
    }
}

const IDLE: BackendMessage = BackendMessage::ReadyForQuery(ReadyForQuery::IDLE);

#[tokio::test]
async fn startup_parameters() {
    let (io, task) = spawn(MemoryBackend::new());
    let mut client = Client { stream: PgStream::new(io) };
    client.stream.send_startup(&startup());
    client.stream.flush().await.unwrap();

    let messages = client.until_ready().await;
    assert!(messages.iter().any(|msg| matches!(
        msg,
        BackendMessage::ParameterStatus(p) if p.name == "server_version" && p.value == "16.0"
    )));
    assert!(messages.iter().any(|msg| matches!(msg, BackendMessage::BackendKeyData(_))));
    assert_eq!(messages.last(), Some(&IDLE));

    client.send(Terminate).await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn simple_query() {
    let (mut client, _task) = Client::connect(MemoryBackend::new()).await;

    let messages = client.query("SELECT 1").await;
    assert_eq!(messages.len(), 4);
    let BackendMessage::RowDescription(desc) = &messages[0] else {
        panic!("expected RowDescription, found {:?}", messages[0]);
    };
    assert_eq!(desc.fields[0].type_oid, 23);
    let BackendMessage::DataRow(row) = &messages[1] else {
        panic!("expected DataRow, found {:?}", messages[1]);
    };
    assert_eq!(row.values, vec![Some(Bytes::from_static(b"1"))]);
    assert_eq!(tag(&messages[2]), "SELECT 1");
    assert_eq!(messages[3], IDLE);

    let messages = client.query("CREATE TABLE t (a int)").await;
    assert_eq!(tag(&messages[0]), "CREATE TABLE");

    let messages = client.query("UPDATE t SET a = 1").await;
    assert_eq!(error(&messages[0]).code, SqlState::FEATURE_NOT_SUPPORTED);
    assert_eq!(messages[1], IDLE);

    let messages = client.query(" ; ").await;
    assert!(matches!(messages[0], BackendMessage::EmptyQueryResponse(_)));
}

#[tokio::test]
async fn copy_from_stdin() {
    let backend = keyvalue();
    let (mut client, _task) = Client::connect(backend.clone()).await;

    let res = client.copy_in("COPY keyvalue FROM STDIN").await;
    assert_eq!(res, CopyInResponse::text(2));

    client.send(CopyData { data: "k1\tv1\nk2\t".into() }).await;
    client.send(Sync).await;
    client.send(CopyData { data: "v2\n".into() }).await;
    client.send(CopyDone).await;

    let messages = client.until_ready().await;
    assert_eq!(tag(&messages[0]), "COPY 2");
    assert_eq!(messages[1], IDLE);
    assert_eq!(backend.write_calls(), 2);
    assert_eq!(
        backend.rows("keyvalue").unwrap(),
        vec![
            vec![Some("k1".to_owned()), Some("v1".to_owned())],
            vec![Some("k2".to_owned()), Some("v2".to_owned())],
        ]
    );

    // the copy is no longer active
    client.send(CopyData { data: "k3\tv3\n".into() }).await;
    let messages = client.until_ready().await;
    assert_eq!(error(&messages[0]).code, SqlState::PROTOCOL_VIOLATION);
    assert_eq!(backend.rows("keyvalue").unwrap().len(), 2);
}

#[tokio::test]
async fn copy_fail() {
    let backend = keyvalue();
    let (mut client, _task) = Client::connect(backend.clone()).await;

    client.copy_in("copy keyvalue (key, value) from stdin").await;
    client.send(CopyData { data: "k1\tv1\n".into() }).await;
    client.send(CopyFail { message: "aborted by user".into() }).await;

    let messages = client.until_ready().await;
    let err = error(&messages[0]);
    assert_eq!(err.code, SqlState::QUERY_CANCELED);
    assert_eq!(err.message, "COPY from stdin failed: aborted by user");
    assert_eq!(messages[1], IDLE);

    // chunks before CopyFail stay written
    assert_eq!(backend.rows("keyvalue").unwrap().len(), 1);

    let messages = client.query("SELECT 1").await;
    assert_eq!(tag(&messages[2]), "SELECT 1");
}

#[tokio::test]
async fn copy_bad_record() {
    let backend = keyvalue();
    let (mut client, _task) = Client::connect(backend.clone()).await;

    client.copy_in("COPY keyvalue FROM STDIN").await;
    client.send(CopyData { data: "k1\n".into() }).await;
    client.send(CopyData { data: "k2\tv2\n".into() }).await;
    client.send(CopyDone).await;

    let messages = client.until_ready().await;
    let err = error(&messages[0]);
    assert_eq!(err.code, SqlState::BAD_COPY_FILE_FORMAT);
    assert_eq!(err.message, "missing data for column \"value\"");
    assert_eq!(err.detail.as_deref(), Some("COPY line 1"));
    assert_eq!(messages[1], IDLE);
    assert_eq!(backend.rows("keyvalue").unwrap().len(), 0);
}

#[tokio::test]
async fn copy_setup_errors() {
    let (mut client, _task) = Client::connect(keyvalue()).await;

    let messages = client.query("COPY missing FROM STDIN").await;
    assert_eq!(messages.len(), 2);
    assert_eq!(error(&messages[0]).code, SqlState::UNDEFINED_TABLE);

    let messages = client.query("COPY keyvalue FROM STDIN (FORMAT binary)").await;
    assert_eq!(error(&messages[0]).code, SqlState::FEATURE_NOT_SUPPORTED);

    let messages = client.query("COPY keyvalue (nope) FROM STDIN").await;
    assert_eq!(error(&messages[0]).code, SqlState::UNDEFINED_COLUMN);
}

#[tokio::test]
async fn query_during_copy() {
    let (mut client, _task) = Client::connect(keyvalue()).await;

    client.copy_in("COPY keyvalue FROM STDIN").await;
    let messages = client.query("SELECT 1").await;
    assert_eq!(messages.len(), 2);
    assert_eq!(error(&messages[0]).code, SqlState::PROTOCOL_VIOLATION);

    // the query is not executed, the next one is
    let messages = client.query("SELECT 1").await;
    assert_eq!(tag(&messages[2]), "SELECT 1");
}

#[tokio::test]
async fn unknown_message_type() {
    let (mut client, task) = Client::connect(MemoryBackend::new()).await;

    let io = client.stream.get_mut();
    io.write_all(&[b'P', 0, 0, 0, 4]).await.unwrap();
    let messages = client.until_ready().await;
    assert_eq!(error(&messages[0]).code, SqlState::PROTOCOL_VIOLATION);

    // the session survives
    client.query("SELECT 1").await;

    // invalid length closes the connection
    let io = client.stream.get_mut();
    io.write_all(&[b'Q', 0, 0, 0, 2]).await.unwrap();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Framing(_)));
}

#[tokio::test]
async fn ssl_request_denied() {
    let (mut io, _task) = spawn(MemoryBackend::new());

    io.write_all(&[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]).await.unwrap();
    let mut answer = [0u8; 1];
    io.read_exact(&mut answer).await.unwrap();
    assert_eq!(&answer, b"N");

    let mut client = Client { stream: PgStream::new(io) };
    client.stream.send_startup(&startup());
    client.stream.flush().await.unwrap();
    assert_eq!(client.until_ready().await.last(), Some(&IDLE));
}

#[tokio::test]
async fn unsupported_protocol_version() {
    let (io, task) = spawn(MemoryBackend::new());
    let mut client = Client { stream: PgStream::new(io) };
    client.stream.send_startup(&StartupPacket::Startup(Startup { major: 2, minor: 0, params: vec![] }));
    client.stream.flush().await.unwrap();

    let err = client.recv().await;
    assert_eq!(error(&err).code, SqlState::FEATURE_NOT_SUPPORTED);
    assert!(task.await.unwrap().is_err());
}
