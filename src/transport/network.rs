use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, net::TcpStream};

use super::{FrameBuffer, Transport, TransportError};
use crate::{color::Color, models::Strip};

/// Strip reached through a TCP stream
pub struct NetworkTransport {
    stream: TcpStream,
    frame: FrameBuffer,
}

impl NetworkTransport {
    pub async fn connect(strip: &Strip) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((strip.ip.as_str(), strip.port))
            .await
            .map_err(|source| TransportError::ConnectionFailed {
                key: strip.key(),
                source,
            })?;

        // Frames are small and latency matters more than throughput
        stream.set_nodelay(true)?;

        info!(ip = %strip.ip, port = %strip.port, leds = %strip.leds, "connected to network strip");

        Ok(Self {
            stream,
            frame: FrameBuffer::new(strip.leds),
        })
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    fn led_count(&self) -> usize {
        self.frame.led_count()
    }

    async fn write(&mut self, index: usize, color: Color) -> Result<(), TransportError> {
        self.frame.set(index, color)
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.stream.write_all(self.frame.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn release(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::{io::AsyncReadExt, net::TcpListener};

    use super::*;
    use crate::models::StripKind;

    fn strip(port: u16, leds: usize) -> Strip {
        Strip {
            kind: StripKind::Network,
            ip: "127.0.0.1".to_owned(),
            port,
            com: String::new(),
            leds,
            segments: vec![],
            max_brightness: 765,
            reduction_r: 1.0,
            reduction_g: 1.0,
            reduction_b: 1.0,
        }
    }

    #[tokio::test]
    async fn streams_frames_and_blanks_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let strip = strip(port, 2);
        let (transport, accepted) = tokio::join!(
            NetworkTransport::connect(&strip),
            listener.accept()
        );
        let mut transport = transport.expect("failed to connect");
        let (mut peer, _) = accepted.unwrap();

        transport.write(0, Color::new(1, 2, 3)).await.unwrap();
        transport.write(1, Color::new(4, 5, 6)).await.unwrap();
        transport.flush().await.unwrap();

        let mut frame = [0u8; 6];
        peer.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [1, 2, 3, 4, 5, 6]);

        crate::transport::close(Box::new(transport)).await;

        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![0; 6]);
    }

    #[tokio::test]
    async fn rejects_out_of_range_index() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let strip = strip(port, 1);
        let (transport, _accepted) = tokio::join!(
            NetworkTransport::connect(&strip),
            listener.accept()
        );
        let mut transport = transport.unwrap();

        assert!(matches!(
            transport.write(1, Color::new(1, 1, 1)).await,
            Err(TransportError::IndexOutOfRange { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn connection_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        match NetworkTransport::connect(&strip(port, 1)).await {
            Err(TransportError::ConnectionFailed { key, .. }) => {
                assert_eq!(key.to_string(), format!("network:127.0.0.1:{}", port));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
