//! Minimal FIX 4.2 order channel.
//!
//! Framing only: tag=value fields separated by SOH, BodyLength and CheckSum
//! maintained here, session fields (34/49/52/56) stamped on every outbound
//! message. Inbound messages are surfaced as JSON objects keyed by tag so
//! the venue adapter consumes FIX and WebSocket traffic the same way.

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Frame, FrameSource};

pub const SOH: u8 = 0x01;

const BEGIN_STRING: &str = "FIX.4.2";

/// FIX message types used by the session itself.
pub const MSG_LOGON: &str = "A";
pub const MSG_LOGOUT: &str = "5";

/// Outbound framing state: sequence numbers and comp ids.
#[derive(Debug)]
pub struct FixCodec {
    sender: String,
    target: String,
    seq: u32,
}

impl FixCodec {
    pub fn new(sender: &str, target: &str) -> Self {
        Self {
            sender: sender.to_string(),
            target: target.to_string(),
            seq: 0,
        }
    }

    /// Frame one message; `fields` carries everything beyond the header.
    pub fn frame(&mut self, msg_type: &str, sending_time: &str, fields: &[(u32, String)]) -> String {
        self.seq += 1;
        let mut body = format!(
            "35={}\u{1}49={}\u{1}56={}\u{1}34={}\u{1}52={}\u{1}",
            msg_type, self.sender, self.target, self.seq, sending_time
        );
        for (tag, value) in fields {
            body.push_str(&format!("{tag}={value}\u{1}"));
        }
        let mut msg = format!("8={}\u{1}9={}\u{1}{}", BEGIN_STRING, body.len(), body);
        let checksum = msg.bytes().map(u32::from).sum::<u32>() % 256;
        msg.push_str(&format!("10={checksum:03}\u{1}"));
        msg
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }
}

/// FIX UTC timestamp, millisecond resolution.
pub fn sending_time(now_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(now_ms)
        .unwrap_or_default()
        .format("%Y%m%d-%H:%M:%S%.3f")
        .to_string()
}

/// Decode one complete message into `{ "35": "A", ... }`.
pub fn parse(raw: &str) -> Option<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for field in raw.split('\u{1}').filter(|field| !field.is_empty()) {
        let (tag, value) = field.split_once('=')?;
        map.insert(
            tag.to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }
    if map.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(map))
    }
}

/// Verify the trailing CheckSum field.
pub fn checksum_ok(raw: &str) -> bool {
    let Some(at) = raw.rfind("10=") else {
        return false;
    };
    let expected: u32 = raw.as_bytes()[..at].iter().copied().map(u32::from).sum();
    raw[at + 3..]
        .trim_end_matches('\u{1}')
        .parse::<u32>()
        .map(|sum| sum == expected % 256)
        .unwrap_or(false)
}

/// Pull every complete message out of the byte buffer, leaving partials.
pub fn split_frames(buf: &mut Vec<u8>) -> Vec<String> {
    let mut frames = Vec::new();
    let mut msg_start = 0;
    let mut field_start = 0;
    for i in 0..buf.len() {
        if buf[i] == SOH {
            if buf[field_start..i].starts_with(b"10=") {
                if let Ok(raw) = std::str::from_utf8(&buf[msg_start..=i]) {
                    frames.push(raw.to_string());
                }
                msg_start = i + 1;
            }
            field_start = i + 1;
        }
    }
    buf.drain(..msg_start);
    frames
}

/// An authenticated FIX session next to the public WebSocket.
pub struct FixLink {
    writer: OwnedWriteHalf,
    codec: FixCodec,
    reader: JoinHandle<()>,
}

impl FixLink {
    /// Connect and log on. `logon` builds the venue's signed logon fields
    /// from the sequence number and sending time about to go on the wire.
    pub async fn open<F>(
        endpoint: &str,
        sender: &str,
        target: &str,
        now_ms: i64,
        logon: F,
        frames: mpsc::UnboundedSender<Frame>,
    ) -> Result<Self>
    where
        F: FnOnce(u32, &str) -> Vec<(u32, String)>,
    {
        let stream = TcpStream::connect(endpoint)
            .await
            .with_context(|| format!("fix connect {endpoint}"))?;
        let (read_half, writer) = stream.into_split();

        let mut link = Self {
            writer,
            codec: FixCodec::new(sender, target),
            reader: spawn_reader(read_half, frames),
        };

        let time = sending_time(now_ms);
        let fields = logon(link.codec.seq() + 1, &time);
        let msg = link.codec.frame(MSG_LOGON, &time, &fields);
        link.writer
            .write_all(msg.as_bytes())
            .await
            .context("fix logon send")?;
        debug!(endpoint, "fix logon sent");
        Ok(link)
    }

    /// Send one typed message; a failure here means the session is dead.
    pub async fn beam(
        &mut self,
        msg_type: &str,
        fields: &[(u32, String)],
        now_ms: i64,
    ) -> Result<()> {
        let msg = self
            .codec
            .frame(msg_type, &sending_time(now_ms), fields);
        self.writer
            .write_all(msg.as_bytes())
            .await
            .context("fix send")
    }

    /// Logout and tear the session down.
    pub async fn close(mut self, now_ms: i64) {
        let _ = self.beam(MSG_LOGOUT, &[], now_ms).await;
        self.reader.abort();
    }
}

fn spawn_reader(
    mut read_half: OwnedReadHalf,
    frames: mpsc::UnboundedSender<Frame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        let reason = loop {
            match read_half.read(&mut chunk).await {
                Ok(0) => break "fix stream ended".to_string(),
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    for raw in split_frames(&mut buf) {
                        let payload = match parse(&raw) {
                            Some(json) => json.to_string(),
                            // Let the driver log the drop.
                            None => raw,
                        };
                        if frames.send(Frame::Text(FrameSource::Private, payload)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => break e.to_string(),
            }
        };
        let _ = frames.send(Frame::Closed(FrameSource::Private, reason));
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framed_messages_carry_valid_checksum_and_length() {
        let mut codec = FixCodec::new("apikey", "Venue");
        let msg = codec.frame(
            "D",
            "20260801-10:00:00.000",
            &[(11, "oid-1".to_string()), (54, "1".to_string())],
        );
        assert!(msg.starts_with("8=FIX.4.2\u{1}9="));
        assert!(checksum_ok(&msg));

        // BodyLength covers everything between its own field and the trailer.
        let parsed = parse(&msg).unwrap();
        let body_len: usize = parsed["9"].as_str().unwrap().parse().unwrap();
        let head_end = msg.find("9=").unwrap() + format!("9={body_len}\u{1}").len();
        let trailer = msg.rfind("10=").unwrap();
        assert_eq!(body_len, trailer - head_end);
    }

    #[test]
    fn sequence_numbers_increment() {
        let mut codec = FixCodec::new("s", "t");
        let first = codec.frame("0", "20260801-10:00:00.000", &[]);
        let second = codec.frame("0", "20260801-10:00:01.000", &[]);
        assert_eq!(parse(&first).unwrap()["34"], "1");
        assert_eq!(parse(&second).unwrap()["34"], "2");
    }

    #[test]
    fn parse_presents_tags_as_json_keys() {
        let raw = "8=FIX.4.2\u{1}35=8\u{1}11=oid-9\u{1}39=0\u{1}10=000\u{1}";
        let json = parse(raw).unwrap();
        assert_eq!(json["35"], "8");
        assert_eq!(json["11"], "oid-9");
    }

    #[test]
    fn split_frames_keeps_partials() {
        let mut codec = FixCodec::new("s", "t");
        let full = codec.frame("0", "20260801-10:00:00.000", &[]);
        let (head, tail) = full.split_at(full.len() - 4);

        let mut buf = Vec::new();
        buf.extend_from_slice(full.as_bytes());
        buf.extend_from_slice(head.as_bytes());
        let frames = split_frames(&mut buf);
        assert_eq!(frames, vec![full.clone()]);
        assert_eq!(buf, head.as_bytes());

        buf.extend_from_slice(tail.as_bytes());
        let frames = split_frames(&mut buf);
        assert_eq!(frames, vec![full]);
        assert!(buf.is_empty());
    }

    #[test]
    fn sending_time_is_fix_utc() {
        assert_eq!(sending_time(0), "19700101-00:00:00.000");
    }
}
