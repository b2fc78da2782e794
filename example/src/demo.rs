//! Minimal client driving a COPY then reading the rows back.
use std::net::SocketAddr;

use pgfront::{
    Result,
    postgres::{
        BackendMessage,
        frontend::{CopyData, CopyDone, Query, Startup, StartupPacket, Terminate},
    },
    stream::PgStream,
};
use tokio::net::TcpStream;

pub async fn main(addr: SocketAddr) -> Result<()> {
    let mut stream = PgStream::new(TcpStream::connect(addr).await?);

    stream.send_startup(&StartupPacket::Startup(Startup {
        major: 3,
        minor: 0,
        params: vec![("user".into(), "demo".into())],
    }));
    stream.flush().await?;
    until_ready(&mut stream).await?;

    stream.send(Query { sql: "COPY keyvalue (key, value) FROM STDIN".into() });
    stream.flush().await?;
    recv(&mut stream).await?;

    for chunk in ["alpha\t1\nbeta\t", "2\ngamma\t\\N\n"] {
        stream.send(CopyData { data: chunk.into() });
    }
    stream.send(CopyDone);
    stream.flush().await?;
    until_ready(&mut stream).await?;

    stream.send(Query { sql: "SELECT * FROM keyvalue".into() });
    stream.flush().await?;
    until_ready(&mut stream).await?;

    stream.send(Terminate);
    stream.flush().await?;

    Ok(())
}

async fn recv(stream: &mut PgStream<TcpStream>) -> Result<BackendMessage> {
    let Some(frame) = stream.recv_frame().await? else {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    };
    let msg = BackendMessage::decode(frame.msgtype, frame.body)?;
    tracing::info!("{msg:?}");
    Ok(msg)
}

async fn until_ready(stream: &mut PgStream<TcpStream>) -> Result<()> {
    while !matches!(recv(stream).await?, BackendMessage::ReadyForQuery(_)) { }
    Ok(())
}
