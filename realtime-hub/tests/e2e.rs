use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{anyhow, Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("realtime-hub");

    let (mut server_child, mut server_stdout) = spawn_server(&binary).await?;
    let addr = read_server_addr(&mut server_stdout).await?;

    // Drain additional server logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    // Alice's echo proves she is registered before Bob arrives.
    let mut alice = spawn_client(&binary, &addr).await?;
    alice.send_line("hello").await.context("alice send line")?;
    let alice_echo = read_line_expect(&mut alice.stdout, "waiting for alice echo").await?;
    let alice_tag = sender_tag(&alice_echo, "hello")?;

    let mut bob = spawn_client(&binary, &addr).await?;
    let alice_sees_bob =
        read_line_expect(&mut alice.stdout, "waiting for alice join notice").await?;
    assert_eq!(alice_sees_bob, "*** A new socket has connected");

    // Bob's message reaches both participants, including Bob's self-echo.
    bob.send_line("Hi Alice!").await.context("bob send line")?;
    let bob_echo = read_line_expect(&mut bob.stdout, "waiting for bob echo").await?;
    let bob_tag = sender_tag(&bob_echo, "Hi Alice!")?;
    assert_ne!(alice_tag, bob_tag);
    let alice_hears_bob =
        read_line_expect(&mut alice.stdout, "waiting for alice to hear bob").await?;
    assert_eq!(alice_hears_bob, bob_echo);

    // Bob quits; Alice receives the departure notice.
    bob.send_line("/quit").await.context("bob send quit")?;
    let bob_quit = read_line_expect(&mut bob.stdout, "waiting for bob quit confirmation").await?;
    assert_eq!(bob_quit, "*** leaving chat");
    let alice_sees_departure =
        read_line_expect(&mut alice.stdout, "waiting for alice to see bob leave").await?;
    assert_eq!(alice_sees_departure, "*** A socket has disconnected");

    alice.send_line("/quit").await.context("alice send quit")?;
    let alice_quit =
        read_line_expect(&mut alice.stdout, "waiting for alice quit confirmation").await?;
    assert_eq!(alice_quit, "*** leaving chat");

    ensure_success(&mut alice.child, "alice client").await?;
    ensure_success(&mut bob.child, "bob client").await?;

    // Server stays up after clients disconnect; terminate it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

/// Extracts `<sender>` from a rendered `<sender> text` line.
fn sender_tag(line: &str, text: &str) -> Result<String> {
    let tag = line
        .strip_suffix(text)
        .map(str::trim_end)
        .filter(|tag| tag.starts_with('<') && tag.ends_with('>'))
        .ok_or_else(|| anyhow!("expected '<sender> {text}', got '{line}'"))?;
    Ok(tag.to_string())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line(reader)
        .await?
        .context("server did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected server banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("server banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn spawn_client(binary: &Path, addr: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--server")
        .arg(addr)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn client")?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    let welcome = read_line_expect(&mut process.stdout, "waiting for welcome banner").await?;
    if welcome != format!("*** connected to {addr}") {
        return Err(anyhow!("expected connection banner, got '{welcome}'"));
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = child
        .wait()
        .await
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
