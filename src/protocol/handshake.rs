use log::debug;

use super::{Connection, serializer::WireError, transport::Transport};

pub const HANDSHAKE_SIZE: usize = 8;

/// Magic, protocol major and minor version, two reserved bytes.
pub const HANDSHAKE: [u8; HANDSHAKE_SIZE] = *b"WEFT\x00\x01\x00\x00";

/// Sends the greeting and checks the server's answer.
pub async fn client_handshake<T: Transport>(conn: &mut Connection<T>) -> Result<(), WireError> {
    conn.put_raw(&HANDSHAKE);
    conn.flush().await?;

    let answer = conn.read_exact(HANDSHAKE_SIZE).await?;
    if answer != HANDSHAKE {
        return Err(WireError::Handshake);
    }
    debug!("handshake accepted by server");
    Ok(())
}

/// Checks the client's greeting and answers it.
pub async fn server_handshake<T: Transport>(conn: &mut Connection<T>) -> Result<(), WireError> {
    let greeting = conn.read_exact(HANDSHAKE_SIZE).await?;
    if greeting != HANDSHAKE {
        return Err(WireError::Handshake);
    }

    conn.put_raw(&HANDSHAKE);
    conn.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::protocol::transport::memory::{MemoryTransport, run};

    use super::*;

    #[test]
    fn server_answers_a_valid_greeting() {
        let mut conn = Connection::new(MemoryTransport::new([HANDSHAKE.to_vec()]));

        run(server_handshake(&mut conn)).unwrap();
        assert_eq!(conn.transport().written, HANDSHAKE);
    }

    #[test]
    fn server_rejects_a_foreign_greeting() {
        let mut conn = Connection::new(MemoryTransport::new([b"GET / HTTP/1.1\r\n".to_vec()]));

        let result = run(server_handshake(&mut conn));
        assert!(matches!(result, Err(WireError::Handshake)));
        assert!(conn.transport().written.is_empty());
    }

    #[test]
    fn client_sends_greeting_first() {
        let mut conn = Connection::new(MemoryTransport::new([HANDSHAKE.to_vec()]));

        run(client_handshake(&mut conn)).unwrap();
        assert_eq!(conn.transport().written, HANDSHAKE);
    }
}
