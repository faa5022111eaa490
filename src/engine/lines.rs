use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// One unit of merged child output: a complete text line, or the read error
/// that ended one of the pipes.
#[derive(Debug)]
pub enum LineChunk {
    Line(String),
    Fault(std::io::Error),
}

/// Merge a child's stdout and stderr into one channel of complete lines.
///
/// Each pipe is drained by its own task so a stalled pipe never starves the
/// other. The channel closes once both pipes reach end-of-stream, which is
/// only after the child has exited and the OS pipe buffers are empty, so a
/// consumer that reads to channel close has seen every line.
pub fn merge_output<O, E>(stdout: Option<O>, stderr: Option<E>) -> UnboundedReceiver<LineChunk>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    if let Some(stream) = stdout {
        spawn_reader(stream, tx.clone());
    }
    if let Some(stream) = stderr {
        spawn_reader(stream, tx);
    }
    rx
}

fn spawn_reader<R>(stream: R, tx: UnboundedSender<LineChunk>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(LineChunk::Line(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(LineChunk::Fault(e));
                    break;
                }
            }
        }
    });
}
