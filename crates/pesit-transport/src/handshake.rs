//! EBCDIC pre-connection handshake (§3.1): a small number of mainframe
//! partners send a raw, unframed "PESIT..." preamble in EBCDIC before the
//! first CONNECT FPDU and expect a raw 4-byte ACK0 in reply. Everything
//! after this exchange (including the CONNECT FPDU itself) uses the normal
//! length-delimited framing.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use pesit_types::ebcdic::{ack0_bytes, is_pure_ebcdic_preamble};

use crate::error::TransportError;
use crate::stream::{BoxedStream, PrefixedStream};

pub const PREAMBLE_LEN: usize = 24;

/// Canonical ASCII form of the preamble; transmitted EBCDIC-encoded.
pub const PREAMBLE_ASCII: &[u8; PREAMBLE_LEN] = b"PESIT HORS SIT V1.0 OK  ";

/// Client side of the handshake: sends the EBCDIC preamble and waits for the
/// partner's ACK0. Used when a connection is explicitly configured for
/// EBCDIC (some mainframe partners require the initiator to go first).
pub async fn initiate(mut stream: BoxedStream) -> Result<PrefixedStream, TransportError> {
    let preamble = pesit_types::ebcdic::ascii_to_ebcdic(PREAMBLE_ASCII);
    stream.write_all(&preamble).await?;
    stream.flush().await?;

    let mut ack = [0u8; 4];
    stream.read_exact(&mut ack).await.map_err(|_| TransportError::HandshakeClosed)?;
    if ack != ack0_bytes(true) {
        return Err(TransportError::Handshake("peer did not acknowledge the EBCDIC preamble".into()));
    }
    Ok(PrefixedStream::without_prefix(stream))
}

/// Probes `stream` for the preamble. Returns whether it was found along with
/// a stream that replays any bytes read but not consumed by the preamble,
/// so a short or absent preamble never loses data.
pub async fn detect(mut stream: BoxedStream) -> Result<(bool, PrefixedStream), TransportError> {
    let mut buf = vec![0u8; PREAMBLE_LEN];
    let mut filled = 0;
    while filled < PREAMBLE_LEN {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            buf.truncate(filled);
            return Ok((false, PrefixedStream::new(buf, stream)));
        }
        filled += n;
    }

    if is_pure_ebcdic_preamble(&buf) {
        stream.write_all(&ack0_bytes(true)).await?;
        stream.flush().await?;
        log::debug!("EBCDIC pre-connection handshake detected, replied ACK0");
        Ok((true, PrefixedStream::without_prefix(stream)))
    } else {
        Ok((false, PrefixedStream::new(buf, stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn detects_preamble_and_replies_ack0() {
        let (mut client, server) = duplex(4096);
        let mut preamble = pesit_types::ebcdic::ascii_to_ebcdic(b"PESIT HORS SIT V1.0 OK  ");
        preamble.truncate(PREAMBLE_LEN);
        client.write_all(&preamble).await.unwrap();

        let (found, mut stream) = detect(Box::new(server)).await.unwrap();
        assert!(found);

        let mut ack = [0u8; 4];
        client.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack, ack0_bytes(true));

        client.write_all(b"ping").await.unwrap();
        let mut rest = [0u8; 4];
        stream.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"ping");
    }

    #[tokio::test]
    async fn initiate_and_detect_agree() {
        let (client, server) = duplex(4096);

        let client_task = tokio::spawn(async move { initiate(Box::new(client)).await.map(|_| ()) });
        let (found, _stream) = detect(Box::new(server)).await.unwrap();
        assert!(found);
        client_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn replays_bytes_when_not_ebcdic() {
        let (mut client, server) = duplex(4096);
        let frame = [0x80, 0x06, 1, 1, 0, 1];
        client.write_all(&frame).await.unwrap();
        drop(client);

        let (found, mut stream) = detect(Box::new(server)).await.unwrap();
        assert!(!found);

        let mut replayed = [0u8; 6];
        stream.read_exact(&mut replayed).await.unwrap();
        assert_eq!(replayed, frame);
    }
}
