//! Output capture for child processes spawned by tool nodes and codergen
//! providers.

use std::io;
use std::process::ExitStatus;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;

const CHUNK: usize = 8 * 1024;

/// What a child wrote before exiting. Each stream holds at most `limit`
/// bytes; `overflowed` is set when either stream went past it, in which case
/// the child was killed.
#[derive(Debug)]
pub(crate) struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub overflowed: bool,
}

async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut Option<R>, chunk: &mut [u8]) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(chunk).await,
        None => std::future::pending().await,
    }
}

/// Feed `input` to the child's stdin (when piped), drain stdout and stderr
/// concurrently, and wait for exit. Reading stops at `limit + 1` bytes per
/// stream.
pub(crate) async fn capture(mut child: Child, input: Option<String>, limit: usize) -> io::Result<CapturedOutput> {
    let writer = child.stdin.take().zip(input).map(|(mut stdin, text)| {
        tokio::spawn(async move {
            stdin.write_all(text.as_bytes()).await?;
            stdin.shutdown().await
        })
    });

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let (mut out_buf, mut err_buf) = (Vec::new(), Vec::new());
    let (mut out_chunk, mut err_chunk) = ([0u8; CHUNK], [0u8; CHUNK]);
    let mut overflowed = false;

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut out_chunk) => match read? {
                0 => stdout = None,
                n => out_buf.extend_from_slice(&out_chunk[..n]),
            },
            read = read_chunk(&mut stderr, &mut err_chunk) => match read? {
                0 => stderr = None,
                n => err_buf.extend_from_slice(&err_chunk[..n]),
            },
        }
        if out_buf.len() > limit || err_buf.len() > limit {
            overflowed = true;
            break;
        }
    }

    if overflowed {
        tracing::debug!(limit, "child output over limit, killing process");
        if let Err(e) = child.start_kill() {
            tracing::debug!(error = %e, "failed to kill child after output overflow");
        }
        out_buf.truncate(limit);
        err_buf.truncate(limit);
    }

    if let Some(writer) = writer {
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "child stdin closed before the full input was written"),
            Err(e) => tracing::debug!(error = %e, "stdin writer task failed"),
        }
    }

    let status = child.wait().await?;
    Ok(CapturedOutput {
        status,
        stdout: out_buf,
        stderr: err_buf,
        overflowed,
    })
}
