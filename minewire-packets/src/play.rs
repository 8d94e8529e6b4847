use crate::{ChatMode, Error, MainHand, Packet, VarInt};

pub mod clientbound {
    use super::*;

    /// The id of the clientbound keep-alive packet. The body is a single big-endian `i64`.
    pub const KEEP_ALIVE_ID: VarInt = 0x24;

    /// The id of the clientbound chunk-data packet.
    ///
    /// The layout after the id is an 8-byte chunk position, one named heightmaps NBT value and a
    /// VarInt-prefixed data section. This layout is bound to [`crate::PROTOCOL_VERSION`]; a version
    /// bump shifts it.
    pub const CHUNK_DATA_ID: VarInt = 0x25;
}

pub mod serverbound {
    use super::*;
    use crate::{AsyncReadPacket, ReadPacket};
    use crate::{AsyncWritePacket, WritePacket};
    use tokio::io::{AsyncRead, AsyncReadExt};
    use tokio::io::{AsyncWrite, AsyncWriteExt};

    /// The [`ClientSettingsPacket`].
    ///
    /// Vanilla clients send this right after entering the play state; the masquerade mirrors that
    /// so the login sequence ends the way a real client ends it.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Client_Information)
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub struct ClientSettingsPacket {
        /// The announced client locale.
        pub locale: String,
        /// The render distance in chunks.
        pub view_distance: u8,
        /// The chat visibility of the client.
        pub chat_mode: ChatMode,
        /// Whether chat messages are colored.
        pub chat_colors: bool,
        /// The bit mask of displayed skin parts.
        pub displayed_skin_parts: u8,
        /// The dominant hand of the player.
        pub main_hand: MainHand,
        /// Whether the client filters chat text.
        pub text_filtering: bool,
        /// Whether the player may appear in server listings.
        pub server_listings: bool,
    }

    impl Packet for ClientSettingsPacket {
        const ID: VarInt = 0x08;
    }

    impl WritePacket for ClientSettingsPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send,
        {
            buffer.write_string(&self.locale).await?;
            buffer.write_u8(self.view_distance).await?;
            buffer.write_varint(self.chat_mode.into()).await?;
            buffer.write_bool(self.chat_colors).await?;
            buffer.write_u8(self.displayed_skin_parts).await?;
            buffer.write_varint(self.main_hand.into()).await?;
            buffer.write_bool(self.text_filtering).await?;
            buffer.write_bool(self.server_listings).await?;

            Ok(())
        }
    }

    impl ReadPacket for ClientSettingsPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send,
        {
            let locale = buffer.read_string().await?;
            let view_distance = buffer.read_u8().await?;
            let chat_mode = buffer.read_varint().await?.try_into()?;
            let chat_colors = buffer.read_bool().await?;
            let displayed_skin_parts = buffer.read_u8().await?;
            let main_hand = buffer.read_varint().await?.try_into()?;
            let text_filtering = buffer.read_bool().await?;
            let server_listings = buffer.read_bool().await?;

            Ok(Self {
                locale,
                view_distance,
                chat_mode,
                chat_colors,
                displayed_skin_parts,
                main_hand,
                text_filtering,
                server_listings,
            })
        }
    }

    /// The [`PluginMessagePacket`].
    ///
    /// Carries a channel identifier and a free-form payload. The payload is the raw remainder of
    /// the packet body, without a length prefix of its own.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Serverbound_Plugin_Message)
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub struct PluginMessagePacket {
        /// The channel the payload is addressed to.
        pub channel: String,
        /// The raw payload bytes.
        pub data: Vec<u8>,
    }

    impl Packet for PluginMessagePacket {
        const ID: VarInt = 0x0D;
    }

    impl WritePacket for PluginMessagePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send,
        {
            buffer.write_string(&self.channel).await?;
            buffer.write_all(&self.data).await?;

            Ok(())
        }
    }

    impl ReadPacket for PluginMessagePacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send,
        {
            let channel = buffer.read_string().await?;

            let mut data = Vec::new();
            buffer.read_to_end(&mut data).await?;

            Ok(Self { channel, data })
        }
    }

    /// The [`KeepAlivePacket`].
    ///
    /// Sent in response to the clientbound keep-alive with the identical id. The server drops the
    /// connection when the echo stays out for about thirty seconds.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Serverbound_Keep_Alive_(play))
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub struct KeepAlivePacket {
        /// The opaque id issued by the server.
        pub id: i64,
    }

    impl Packet for KeepAlivePacket {
        const ID: VarInt = 0x15;
    }

    impl WritePacket for KeepAlivePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send,
        {
            buffer.write_i64(self.id).await?;

            Ok(())
        }
    }

    impl ReadPacket for KeepAlivePacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send,
        {
            let id = buffer.read_i64().await?;

            Ok(Self { id })
        }
    }

    /// The [`PlayerPositionPacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Set_Player_Position)
    #[derive(Debug, Clone, PartialEq)]
    pub struct PlayerPositionPacket {
        pub x: f64,
        pub y: f64,
        pub z: f64,
        pub on_ground: bool,
    }

    impl Packet for PlayerPositionPacket {
        const ID: VarInt = 0x14;
    }

    impl WritePacket for PlayerPositionPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send,
        {
            buffer.write_f64(self.x).await?;
            buffer.write_f64(self.y).await?;
            buffer.write_f64(self.z).await?;
            buffer.write_bool(self.on_ground).await?;

            Ok(())
        }
    }

    impl ReadPacket for PlayerPositionPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send,
        {
            let x = buffer.read_f64().await?;
            let y = buffer.read_f64().await?;
            let z = buffer.read_f64().await?;
            let on_ground = buffer.read_bool().await?;

            Ok(Self {
                x,
                y,
                z,
                on_ground,
            })
        }
    }
}
