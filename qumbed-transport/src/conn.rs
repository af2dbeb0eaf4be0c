//! A single framed bidirectional stream on a QUIC session.

use qumbed_proto::{Frame, MAX_FRAME_SIZE};
use tokio::sync::Mutex;

use crate::error::TransportError;

/// One logical connection: a QUIC session and its bidirectional stream,
/// exchanging length-prefixed JSON frames.
///
/// `send_frame` and `recv_frame` may be called from different tasks; each
/// half of the stream is guarded separately so a blocked reader never stalls
/// writers.
pub struct Conn {
    connection: quinn::Connection,
    send: Mutex<quinn::SendStream>,
    recv: Mutex<quinn::RecvStream>,
    remote: String,
}

impl Conn {
    pub(crate) fn new(
        connection: quinn::Connection,
        send: quinn::SendStream,
        recv: quinn::RecvStream,
    ) -> Self {
        let remote = connection.remote_address().to_string();
        Self {
            connection,
            send: Mutex::new(send),
            recv: Mutex::new(recv),
            remote,
        }
    }

    /// The peer's `ip:port`, stable for the lifetime of the session.
    pub fn remote_addr(&self) -> &str {
        &self.remote
    }

    /// Encode and send one frame. Frames sent through one `Conn` arrive in
    /// send order.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let body = frame.to_bytes()?;
        let mut send = self.send.lock().await;
        send.write_all(&(body.len() as u32).to_be_bytes())
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))?;
        send.write_all(&body)
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))?;
        Ok(())
    }

    /// Receive one frame.
    ///
    /// Returns [`TransportError::Closed`] when the peer finishes its side of
    /// the stream. A short read mid-frame or an oversized length prefix is an
    /// error; the caller must close the connection, since the stream position
    /// is no longer trustworthy.
    pub async fn recv_frame(&self) -> Result<Frame, TransportError> {
        let mut recv = self.recv.lock().await;

        let mut len_buf = [0u8; 4];
        recv.read_exact(&mut len_buf).await.map_err(map_read_err)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: len,
                limit: MAX_FRAME_SIZE,
            });
        }

        let mut body = vec![0u8; len];
        recv.read_exact(&mut body).await.map_err(map_read_err)?;

        Ok(Frame::from_bytes(&body)?)
    }

    /// Close the session. Idempotent; pending operations on either side fail
    /// promptly.
    pub fn close(&self) {
        self.connection.close(0u32.into(), b"closing");
    }
}

fn map_read_err(err: quinn::ReadExactError) -> TransportError {
    match err {
        quinn::ReadExactError::FinishedEarly(_) => TransportError::Closed,
        quinn::ReadExactError::ReadError(e) => TransportError::Stream(e.to_string()),
    }
}
