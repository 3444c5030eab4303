//! One WebSocket connection: outbound half owned by the gateway driver,
//! inbound half pumped by a reader task into the driver's frame queue.

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{Frame, FrameSource};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct WsLink {
    sink: WsSink,
    reader: JoinHandle<()>,
}

impl WsLink {
    /// Connect and start pumping text frames into `frames`.
    ///
    /// The reader task reports socket death with a single `Frame::Closed`;
    /// it never reconnects on its own.
    pub async fn open(
        url: &str,
        source: FrameSource,
        frames: mpsc::UnboundedSender<Frame>,
    ) -> Result<Self> {
        let (stream, response) = connect_async(url)
            .await
            .with_context(|| format!("ws connect {url}"))?;
        debug!(url, status = %response.status(), "🔌 ws connected");

        let (sink, mut read) = stream.split();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if frames.send(Frame::Text(source, text)).is_err() {
                            return;
                        }
                    }
                    // Pongs are queued by the protocol layer on read.
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!("closed by venue ({})", frame.code),
                            None => "closed by venue".to_string(),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };
            let _ = frames.send(Frame::Closed(source, reason));
        });

        Ok(Self { sink, reader })
    }

    /// Send a text frame; a failure here means the socket is dead.
    pub async fn emit(&mut self, msg: &str) -> Result<()> {
        self.sink
            .send(Message::Text(msg.to_string()))
            .await
            .context("ws send")
    }

    /// Emit a close frame and stop the reader.
    pub async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.flush().await;
        self.reader.abort();
    }
}
