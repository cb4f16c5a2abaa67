//! STOMP over WebSocket using tokio-tungstenite.

use std::time::Duration;

use async_trait::async_trait;
use bazaar_shared::{
    Command, Frame, HeartBeat, Negotiated, TransportError, HEADER_HEART_BEAT, HEADER_MESSAGE,
    HEARTBEAT_FRAME,
};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, tungstenite};

use super::{Link, LinkHandle, Transport};

/// Inbound silence tolerated before the link is declared dead, as a multiple
/// of the negotiated incoming heart-beat interval.
const HEARTBEAT_TOLERANCE: u32 = 2;

/// Broker transport speaking STOMP 1.2 over a WebSocket
#[derive(Debug, Clone)]
pub struct StompWsTransport {
    url: url::Url,
    heart_beat: HeartBeat,
}

impl StompWsTransport {
    pub fn new(broker_url: &str, heartbeat: Duration) -> Result<Self, url::ParseError> {
        let url = url::Url::parse(broker_url)?;
        let ms = heartbeat.as_millis() as u64;
        Ok(Self {
            url,
            heart_beat: HeartBeat::new(ms, ms),
        })
    }

    fn host(&self) -> String {
        match (self.url.host_str(), self.url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => "/".to_string(),
        }
    }
}

#[async_trait]
impl Transport for StompWsTransport {
    async fn open(&self, credential: &str) -> Result<Link, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|e| TransportError::Connect(format!("invalid credential header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let connect = Frame::connect(&self.host(), credential, self.heart_beat);
        write
            .send(Message::Text(connect.encode().into()))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let negotiated = await_connected(&mut read, self.heart_beat).await?;
        tracing::info!(
            "STOMP session established with {} (heart-beat out {:?}, in {:?})",
            self.url,
            negotiated.outgoing,
            negotiated.incoming
        );

        let (out_tx, out_rx) = unbounded::<Frame>();
        let (in_tx, in_rx) = unbounded::<Frame>();

        tokio::spawn(write_loop(write, out_rx, in_tx.clone(), negotiated.outgoing));
        tokio::spawn(read_loop(read, in_tx, negotiated.incoming));

        Ok(Link {
            handle: LinkHandle::new(out_tx),
            inbound: in_rx,
        })
    }
}

/// Wait for CONNECTED (or ERROR) after sending CONNECT
async fn await_connected<S>(read: &mut S, ours: HeartBeat) -> Result<Negotiated, TransportError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg = match read.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Err(TransportError::Handshake(e.to_string())),
            None => return Err(TransportError::Closed),
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => return Err(TransportError::Closed),
            _ => continue,
        };
        match Frame::decode(&text) {
            Ok(Some(frame)) if frame.command == Command::Connected => {
                let theirs = frame
                    .get(HEADER_HEART_BEAT)
                    .map(HeartBeat::parse)
                    .unwrap_or_default();
                return Ok(ours.negotiate(theirs));
            }
            Ok(Some(frame)) if frame.command == Command::Error => {
                let reason = frame.get(HEADER_MESSAGE).unwrap_or(frame.body.as_str()).to_string();
                return Err(TransportError::Rejected(reason));
            }
            Ok(Some(frame)) => {
                tracing::debug!("Ignoring {} before CONNECTED", frame.command);
            }
            Ok(None) => {}
            Err(e) => return Err(TransportError::Handshake(e.to_string())),
        }
    }
}

async fn write_loop<S>(
    mut write: S,
    mut outbound: UnboundedReceiver<Frame>,
    inbound: UnboundedSender<Frame>,
    heartbeat: Option<Duration>,
) where
    S: futures_util::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut ticker = heartbeat.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    loop {
        let next_tick = async {
            match ticker.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            frame = outbound.next() => {
                let Some(frame) = frame else {
                    tracing::debug!("All link handles dropped, closing socket");
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let is_disconnect = frame.command == Command::Disconnect;
                if let Err(e) = write.send(Message::Text(frame.encode().into())).await {
                    tracing::error!("Send failed: {}", e);
                    break;
                }
                if is_disconnect {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
            _ = next_tick => {
                if let Err(e) = write.send(Message::Text(HEARTBEAT_FRAME.to_string().into())).await {
                    tracing::error!("Heart-beat send failed: {}", e);
                    break;
                }
            }
        }
    }

    // Make sure the reader side observes the end of the link too.
    inbound.close_channel();
}

async fn read_loop<S>(mut read: S, inbound: UnboundedSender<Frame>, heartbeat: Option<Duration>)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let deadline = heartbeat.map(|period| period * HEARTBEAT_TOLERANCE);

    loop {
        let next = match deadline {
            Some(limit) => match tokio::time::timeout(limit, read.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!("No broker traffic for {:?}, treating link as closed", limit);
                    break;
                }
            },
            None => read.next().await,
        };

        match next {
            Some(Ok(Message::Text(text))) => match Frame::decode(&text) {
                Ok(Some(frame)) if frame.command == Command::Error => {
                    tracing::error!(
                        "Broker sent ERROR: {}",
                        frame.get(HEADER_MESSAGE).unwrap_or(frame.body.as_str())
                    );
                    break;
                }
                Ok(Some(frame)) => {
                    if inbound.unbounded_send(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => tracing::trace!("Received heart-beat"),
                Err(e) => tracing::error!("Dropping undecodable frame: {}", e),
            },
            Some(Ok(Message::Close(_))) => {
                tracing::info!("Broker sent close frame");
                break;
            }
            Some(Ok(_)) => {
                // Ping/pong are answered by tungstenite; binary is not used by the broker.
            }
            Some(Err(e)) => {
                tracing::error!("WebSocket read error: {}", e);
                break;
            }
            None => break,
        }
    }

    inbound.close_channel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_header_includes_explicit_port() {
        let t = StompWsTransport::new("ws://localhost:8080/ws", Duration::from_secs(4)).unwrap();
        assert_eq!(t.host(), "localhost:8080");
        assert_eq!(t.heart_beat, HeartBeat::new(4000, 4000));

        let t = StompWsTransport::new("wss://shop.example.com/ws", Duration::ZERO).unwrap();
        assert_eq!(t.host(), "shop.example.com");
        assert_eq!(t.heart_beat, HeartBeat::default());
    }

    #[test]
    fn rejects_invalid_urls() {
        assert!(StompWsTransport::new("not a url", Duration::from_secs(4)).is_err());
    }
}
