use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::WriterError;
use crate::message::Message;
use crate::traits::Writer;

/// Writes one JSON document per line to any async sink
pub struct JsonLinesWriter<W> {
    out: W,
    line: Vec<u8>,
}

impl JsonLinesWriter<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            line: Vec::with_capacity(512),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Writer for JsonLinesWriter<W> {
    async fn write(&mut self, msg: &Message) -> Result<(), WriterError> {
        self.line.clear();
        serde_json::to_writer(&mut self.line, msg)?;
        self.line.push(b'\n');
        self.out.write_all(&self.line).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WriterError> {
        self.out.flush().await?;
        Ok(())
    }
}
