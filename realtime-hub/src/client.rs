use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{cli::ClientArgs, envelope::Envelope};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let url = format!("ws://{}/api/ws", args.server);
    let (mut socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    write_stdout(&format!("*** connected to {}", args.server)).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut socket, &mut stdin, &mut input).await?;
    shutdown_connection(&mut socket).await;

    Ok(())
}

async fn run_client_loop(
    socket: &mut Socket,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            server_message = socket.next() => {
                if !handle_server_message(server_message).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, socket).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(
    message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> Result<bool> {
    match message.transpose().context("connection to server failed")? {
        Some(Message::Text(text)) => {
            match Envelope::from_json(&text) {
                Ok(envelope) => write_stdout(&render(&envelope)).await?,
                Err(err) => debug!(?err, "ignoring undecodable message"),
            }
            Ok(true)
        }
        Some(Message::Close(_)) | None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
        Some(_) => Ok(true),
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    socket: &mut Socket,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    socket
        .send(Message::Text(text.to_string()))
        .await
        .context("failed to send message")?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(socket: &mut Socket) {
    if let Err(error) = socket.close(None).await {
        debug!(?error, "failed to close socket cleanly");
    }
}

/// One terminal line for an envelope: `<sender> content` for messages and
/// `*** notice` for system notices.
pub fn render(envelope: &Envelope) -> String {
    match envelope.sender() {
        Some(sender) => format!("<{sender}> {}", envelope.content()),
        None => format!(
            "*** {}",
            envelope
                .content()
                .strip_prefix('/')
                .unwrap_or(envelope.content())
        ),
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
