use anyhow::{Context, Result};
use tokio::{
    io::{
        self, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
        BufReader,
    },
    net::TcpStream,
    select,
};
use tracing::{info, warn};

use crate::{cli::ClientArgs, session::READ_BUFFER_SIZE};

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;
    info!("connected to {}:{}", args.host, args.port);

    let (reader, mut writer) = stream.into_split();
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    write_line(&mut stdout, "Connected to the server. You can start chatting!").await?;
    write_line(&mut stdout, "Type your message and press Enter to send.").await?;

    chat(reader, &mut writer, stdin, &mut stdout).await?;

    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
    Ok(())
}

/// Pumps lines from `input` to the relay and chunks from the relay to `output`.
///
/// Each non-empty line is sent as raw bytes without its terminator. Returns
/// when `input` ends or the relay closes the connection.
pub async fn chat<R, W, I, O>(
    mut server: R,
    writer: &mut W,
    input: I,
    output: &mut O,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    // `next_line` keeps a partially read line buffered when the relay wins the race.
    let mut lines = input.lines();

    loop {
        select! {
            received = server.read(&mut buffer) => {
                match received {
                    Ok(0) => {
                        write_line(output, "Server closed the connection.").await?;
                        break;
                    }
                    Ok(n) => {
                        write_line(output, &String::from_utf8_lossy(&buffer[..n])).await?;
                    }
                    Err(error) => {
                        warn!(?error, "failed to read from relay");
                        write_line(output, "Server closed the connection.").await?;
                        break;
                    }
                }
            }
            next = lines.next_line() => {
                let Some(line) = next? else {
                    break;
                };
                let text = line.trim_end_matches('\r');
                if text.is_empty() {
                    continue;
                }
                writer
                    .write_all(text.as_bytes())
                    .await
                    .context("failed to send message")?;
                writer.flush().await?;
            }
        }
    }

    Ok(())
}

async fn write_line<O>(output: &mut O, line: &str) -> io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
