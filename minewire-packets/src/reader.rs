use crate::{AsyncReadPacket, Error, MAX_PACKET_LENGTH, MAX_STRING_LENGTH, ReadPacket, VarInt};
use tokio::io::{AsyncRead, AsyncReadExt};

impl<R: AsyncRead + Unpin + Send> AsyncReadPacket for R {
    async fn read_packet<T: ReadPacket + Send>(&mut self) -> Result<T, Error> {
        // extract the length of the packet and check for any following content
        let length = self.read_varint().await?;
        if length <= 0 || length > MAX_PACKET_LENGTH {
            return Err(Error::IllegalPacketLength);
        }

        // extract the encoded packet id and validate if it is expected
        let packet_id = self.read_varint().await?;
        let expected_packet_id = T::ID;
        if packet_id != expected_packet_id {
            return Err(Error::IllegalPacketId {
                expected: expected_packet_id,
                actual: packet_id,
            });
        }

        // split a separate reader from the stream
        let mut take = self.take(length as u64 - 1);

        // convert the received buffer into our expected packet
        T::read_from_buffer(&mut take).await
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, Error> {
        let length = self.read_varint().await?;
        if length <= 0 || length > MAX_PACKET_LENGTH {
            return Err(Error::IllegalPacketLength);
        }

        let mut frame = vec![0; length as usize];
        self.read_exact(&mut frame).await?;

        Ok(frame)
    }

    async fn read_varint(&mut self) -> Result<VarInt, Error> {
        let mut buf = [0];
        let mut ans = 0;
        for i in 0..5 {
            self.read_exact(&mut buf).await?;
            ans |= ((buf[0] & 0b0111_1111) as i32) << (7 * i);
            if buf[0] & 0b1000_0000 == 0 {
                return Ok(ans);
            }
        }
        Err(Error::VarIntTooLong)
    }

    async fn read_string(&mut self) -> Result<String, Error> {
        let length = self.read_varint().await? as usize;
        if length > MAX_STRING_LENGTH {
            return Err(Error::StringTooLong { length });
        }

        let mut buffer = vec![0; length];
        self.read_exact(&mut buffer).await?;

        String::from_utf8(buffer).map_err(|_| Error::InvalidEncoding)
    }

    async fn read_bool(&mut self) -> Result<bool, Error> {
        let bool = self.read_u8().await?;
        Ok(bool == 1u8)
    }
}
