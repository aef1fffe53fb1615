use crate::cli::OutputLine;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Forward each non-empty line of `reader` to the output writer as `<prefix>: <line>`.
///
/// Lines are decoded lossily. After a read error, or once the writer is gone, the stream keeps
/// being drained to EOF so the process never sees a closed pipe.
pub(crate) fn spawn_line_relay<R>(
    reader: R,
    prefix: String,
    out_tx: mpsc::UnboundedSender<OutputLine>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => return,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if out_tx
                        .send(OutputLine::Stdout(format!("{prefix}: {line}")))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    warn!(%prefix, "error reading output: {e}");
                    break;
                }
            }
        }
        if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
            warn!(%prefix, "error draining output: {e}");
        }
    })
}
