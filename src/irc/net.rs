//! Connection plumbing: TCP/TLS setup, the writer task, and the session
//! loop that multiplexes inbound lines with the game clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig as TlsConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, trace, warn};

use crate::core::config::{Config, ConfigHandle};
use crate::core::error::{DallyError, Result};
use crate::irc::client::{BotEvents, IrcClient, Outbound};
use crate::irc::message;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

async fn writer_loop(mut writer: BoxedWriter, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(buf) = rx.recv().await {
        if let Err(e) = writer.write_all(&buf).await {
            warn!("write failed: {e}");
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!("flush failed: {e}");
            break;
        }
    }
}

/// Open the socket (TLS unless disabled) and start the writer task.
async fn connect(
    cfg: &Config,
    server: &str,
) -> Result<(BufReader<BoxedReader>, mpsc::UnboundedSender<Vec<u8>>, JoinHandle<()>)> {
    let (host, port) = server
        .rsplit_once(':')
        .ok_or_else(|| DallyError::Config(format!("server '{server}' is not host:port")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| DallyError::Config(format!("server '{server}' has a bad port")))?;

    info!("connecting to {host}:{port} (tls={})", cfg.ssl);
    let tcp = TcpStream::connect((host, port)).await?;

    let (reader, writer): (BoxedReader, BoxedWriter) = if cfg.ssl {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls = TlsConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let name = ServerName::try_from(host.to_string())
            .map_err(|e| DallyError::Tls(e.to_string()))?;
        let stream = TlsConnector::from(Arc::new(tls)).connect(name, tcp).await?;
        let (r, w) = tokio::io::split(stream);
        (Box::new(r), Box::new(w))
    } else {
        let (r, w) = tcp.into_split();
        (Box::new(r), Box::new(w))
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(writer_loop(writer, rx));
    Ok((BufReader::new(reader), tx, writer_task))
}

/// Run one connection to completion: register, pump lines into the client,
/// and pulse the engine clock. Returns when the server hangs up, the bot
/// quits deliberately, or the engine reports a fatal error.
pub async fn run_session(conf: &ConfigHandle, bot: &mut dyn BotEvents, server: &str) -> Result<()> {
    let cfg = conf.snapshot();
    let (mut reader, tx, writer_task) = connect(&cfg, server).await?;

    let mut client = IrcClient::new(conf.clone(), Outbound::new(conf.clone(), tx));
    client.handshake();
    bot.connected();

    let mut clock = tokio::time::interval(Duration::from_secs(cfg.self_clock.max(1) as u64));
    clock.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut buf = Vec::new();

    let result = loop {
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => {
                    info!("server closed the connection");
                    break Ok(());
                }
                Ok(n) => {
                    client.note_received(n);
                    let line = message::decode_line(&buf);
                    buf.clear();
                    if line.starts_with("PING") {
                        trace!("<- {line}");
                    } else {
                        debug!("<- {line}");
                    }
                    let now = chrono::Utc::now().timestamp();
                    if let Some(msg) = message::parse_message(&line, now) {
                        client.dispatch(&msg, bot);
                    }
                }
                Err(e) => break Err(DallyError::Io(e)),
            },
            _ = clock.tick() => {
                let now = chrono::Utc::now().timestamp();
                if let Err(e) = bot.think(&mut client, now) {
                    break Err(e);
                }
            }
        }
        if client.quitting {
            break Ok(());
        }
    };

    client.shutdown();
    // Dropping the client drops the last sender, letting the writer drain
    // anything pending (the QUIT line in particular) before exiting.
    drop(client);
    let _ = writer_task.await;
    bot.disconnected();
    result
}
