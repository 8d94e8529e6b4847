use crate::{AsyncWritePacket, Error, INITIAL_BUFFER_SIZE, VarInt, WritePacket};
use std::fmt::Debug;
use tokio::io::{AsyncWrite, AsyncWriteExt};

impl<W: AsyncWrite + Unpin + Send> AsyncWritePacket for W {
    async fn write_packet<T: WritePacket + Send + Debug>(&mut self, packet: T) -> Result<(), Error> {
        // create a new buffer (our packets are very small)
        let mut buffer = Vec::with_capacity(INITIAL_BUFFER_SIZE);

        // write the packet id and the respective packet content
        buffer.write_varint(T::ID).await?;
        packet.write_to_buffer(&mut buffer).await?;

        // prepare a final buffer (leaving max 3 bytes for the length prefix)
        let packet_len = buffer.len();
        let mut final_buffer = Vec::with_capacity(packet_len + 3);
        final_buffer.write_varint(packet_len as VarInt).await?;
        final_buffer.extend_from_slice(&buffer);

        // send the final buffer into the stream
        self.write_all(&final_buffer).await?;

        Ok(())
    }

    async fn write_varint(&mut self, value: VarInt) -> Result<(), Error> {
        let mut value = value;
        let mut buf = [0];
        loop {
            buf[0] = (value & 0b0111_1111) as u8;
            value = (value >> 7) & (i32::MAX >> 6);
            if value != 0 {
                buf[0] |= 0b1000_0000;
            }
            self.write_all(&buf).await?;

            if value == 0 {
                break;
            }
        }
        Ok(())
    }

    async fn write_string(&mut self, string: &str) -> Result<(), Error> {
        self.write_varint(string.len() as VarInt).await?;
        self.write_all(string.as_bytes()).await?;

        Ok(())
    }

    async fn write_bool(&mut self, bool: bool) -> Result<(), Error> {
        self.write_u8(bool as u8).await?;

        Ok(())
    }
}
