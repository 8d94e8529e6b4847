use crate::{Error, Packet, State, VarInt};

pub mod serverbound {
    use super::*;
    use crate::{AsyncReadPacket, ReadPacket};
    use crate::{AsyncWritePacket, WritePacket};
    use tokio::io::{AsyncRead, AsyncReadExt};
    use tokio::io::{AsyncWrite, AsyncWriteExt};

    /// The [`HandshakePacket`].
    ///
    /// This packet causes the server to switch into the target state. It should be sent right after
    /// opening the TCP connection to prevent the server from disconnecting.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Handshake)
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub struct HandshakePacket {
        /// The pretended protocol version.
        pub protocol_version: VarInt,
        /// The pretended server address.
        pub server_address: String,
        /// The pretended server port.
        pub server_port: u16,
        /// The protocol state to initiate.
        pub next_state: State,
    }

    impl Packet for HandshakePacket {
        const ID: VarInt = 0x00;
    }

    impl WritePacket for HandshakePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send,
        {
            buffer.write_varint(self.protocol_version).await?;
            buffer.write_string(&self.server_address).await?;
            buffer.write_u16(self.server_port).await?;
            buffer.write_varint(self.next_state.into()).await?;

            Ok(())
        }
    }

    impl ReadPacket for HandshakePacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send,
        {
            let protocol_version = buffer.read_varint().await?;
            let server_address = buffer.read_string().await?;
            let server_port = buffer.read_u16().await?;
            let next_state = buffer.read_varint().await?.try_into()?;

            Ok(Self {
                protocol_version,
                server_address,
                server_port,
                next_state,
            })
        }
    }

    /// The [`LoginStartPacket`].
    ///
    /// The body carries only the user name. The tunnel dialect never appends the profile id that
    /// vanilla clients send here.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Login_Start)
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub struct LoginStartPacket {
        pub user_name: String,
    }

    impl Packet for LoginStartPacket {
        const ID: VarInt = 0x00;
    }

    impl WritePacket for LoginStartPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send,
        {
            buffer.write_string(&self.user_name).await?;

            Ok(())
        }
    }

    impl ReadPacket for LoginStartPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send,
        {
            let user_name = buffer.read_string().await?;

            Ok(Self { user_name })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PROTOCOL_VERSION;
    use crate::tests::{assert_frame, assert_packet};

    #[tokio::test]
    async fn write_read_serverbound_handshake_packet() {
        assert_packet(serverbound::HandshakePacket {
            protocol_version: PROTOCOL_VERSION,
            server_address: "127.0.0.1".to_string(),
            server_port: 25565,
            next_state: State::Login,
        })
        .await;
    }

    #[tokio::test]
    async fn write_read_serverbound_login_start_packet() {
        assert_packet(serverbound::LoginStartPacket {
            user_name: "Playerf52fbd32".to_string(),
        })
        .await;
    }

    #[tokio::test]
    async fn handshake_packet_wire_bytes() {
        // VarInt len, id 0x00, VarInt 773, string "127.0.0.1", port 25565, next-state login
        let mut expected = vec![16, 0x00, 0x85, 0x06, 9];
        expected.extend_from_slice(b"127.0.0.1");
        expected.extend_from_slice(&[0x63, 0xDD, 0x02]);

        assert_frame(
            serverbound::HandshakePacket {
                protocol_version: PROTOCOL_VERSION,
                server_address: "127.0.0.1".to_string(),
                server_port: 25565,
                next_state: State::Login,
            },
            &expected,
        )
        .await;
    }
}
