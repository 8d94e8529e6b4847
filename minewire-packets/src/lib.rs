use std::fmt::Debug;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod handshake;
pub mod nbt;
pub mod play;
pub mod reader;
pub mod writer;

const INITIAL_BUFFER_SIZE: usize = 48;

/// The protocol version that the masquerade announces (Minecraft 1.21 family).
pub const PROTOCOL_VERSION: VarInt = 773;

/// The largest packet frame the masquerade ever accepts. Anything bigger tears the session down.
pub const MAX_PACKET_LENGTH: VarInt = 2_097_152;

/// The largest string the protocol permits on read.
pub const MAX_STRING_LENGTH: usize = 32_773;

pub type VarInt = i32;

/// The internal error type for all errors related to the protocol communication.
///
/// This includes errors with the expected packets, packet contents or encoding of the exchanged
/// fields. Errors of the underlying data layer (for byte exchange) are wrapped from the underlying
/// IO errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error occurred while reading or writing to the underlying byte stream.
    #[error("error reading or writing data: {0}")]
    Io(#[from] std::io::Error),

    /// The received packet is of an invalid length that we cannot process.
    #[error("illegal packet length")]
    IllegalPacketLength,

    /// A VarInt continued beyond its maximum width of five bytes.
    #[error("VarInt wider than five bytes")]
    VarIntTooLong,

    /// A string exceeded the protocol limit on read.
    #[error("string of {length} bytes exceeds the protocol limit")]
    StringTooLong {
        /// The length that was announced for the string.
        length: usize,
    },

    /// The received value index cannot be mapped to an existing enum.
    #[error("illegal enum value index for {kind}: {value}")]
    IllegalEnumValue {
        /// The enum kind which was parsed.
        kind: &'static str,
        /// The value that was received.
        value: VarInt,
    },

    /// The received packet ID is not mapped to an expected packet.
    #[error("illegal packet ID: {actual} (expected {expected})")]
    IllegalPacketId {
        /// The expected value that should be present.
        expected: VarInt,
        /// The actual value that was observed.
        actual: VarInt,
    },

    /// A string field was not valid UTF-8.
    #[error("invalid string body (invalid encoding)")]
    InvalidEncoding,

    /// An NBT value carried a tag type outside of the defined range.
    #[error("unknown NBT tag type: {tag}")]
    UnknownNbtTag {
        /// The tag type byte that was observed.
        tag: u8,
    },

    /// An NBT value ended before its payload was complete.
    #[error("truncated NBT value")]
    TruncatedNbt,

    /// An NBT value nested lists or compounds beyond the supported depth.
    #[error("NBT value nested too deeply")]
    NbtTooDeep,
}

impl Error {
    pub fn is_connection_closed(&self) -> bool {
        let Error::Io(err) = self else {
            return false;
        };
        err.kind() == ErrorKind::UnexpectedEof
            || err.kind() == ErrorKind::ConnectionReset
            || err.kind() == ErrorKind::ConnectionAborted
            || err.kind() == ErrorKind::BrokenPipe
    }
}

/// State is the desired state that the connection should be in after the initial handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Query the server information without connecting.
    Status,
    /// Log into the Minecraft server, establishing a connection.
    Login,
}

impl From<State> for VarInt {
    fn from(state: State) -> Self {
        match state {
            State::Status => 1,
            State::Login => 2,
        }
    }
}

impl TryFrom<VarInt> for State {
    type Error = Error;

    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(State::Status),
            2 => Ok(State::Login),
            _ => Err(Error::IllegalEnumValue {
                kind: "State",
                value,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatMode {
    Enabled,
    CommandsOnly,
    Hidden,
}

impl From<ChatMode> for VarInt {
    fn from(value: ChatMode) -> Self {
        match value {
            ChatMode::Enabled => 0,
            ChatMode::CommandsOnly => 1,
            ChatMode::Hidden => 2,
        }
    }
}

impl TryFrom<VarInt> for ChatMode {
    type Error = Error;

    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChatMode::Enabled),
            1 => Ok(ChatMode::CommandsOnly),
            2 => Ok(ChatMode::Hidden),
            _ => Err(Error::IllegalEnumValue {
                kind: "ChatMode",
                value,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MainHand {
    Left,
    Right,
}

impl From<MainHand> for VarInt {
    fn from(value: MainHand) -> Self {
        match value {
            MainHand::Left => 0,
            MainHand::Right => 1,
        }
    }
}

impl TryFrom<VarInt> for MainHand {
    type Error = Error;

    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MainHand::Left),
            1 => Ok(MainHand::Right),
            _ => Err(Error::IllegalEnumValue {
                kind: "MainHand",
                value,
            }),
        }
    }
}

/// Packets are network packets that are part of the protocol definition and identified by an ID.
pub trait Packet {
    /// Returns the defined ID of this network packet.
    const ID: VarInt;
}

/// `WritePacket`s are packets that can be written to a buffer.
pub trait WritePacket: Packet {
    /// Writes the data from this packet into the supplied [`S`].
    fn write_to_buffer<S>(&self, buffer: &mut S) -> impl Future<Output = Result<(), Error>>
    where
        S: AsyncWrite + Unpin + Send;
}

/// `ReadPacket`s are packets that can be read from a buffer.
pub trait ReadPacket: Packet + Sized {
    /// Creates a new instance of this packet with the data from the buffer.
    fn read_from_buffer<S>(buffer: &mut S) -> impl Future<Output = Result<Self, Error>>
    where
        S: AsyncRead + Unpin + Send;
}

/// `AsyncWritePacket` allows writing a specific [`WritePacket`] to an [`AsyncWrite`].
///
/// Only [`WritePacket`s](WritePacket) can be written as only those packets are sent. There are
/// additional methods to write the data that is encoded in a Minecraft-specific manner. Their
/// implementation is analogous to the [read implementation](AsyncReadPacket).
pub trait AsyncWritePacket {
    /// Writes a [`WritePacket`] onto this object as described in the official [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Java_Edition_protocol#Packet_format
    fn write_packet<T: WritePacket + Send + Debug>(
        &mut self,
        packet: T,
    ) -> impl Future<Output = Result<(), Error>>;

    /// Writes a [`VarInt`] onto this object as described in the official [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Java_Edition_protocol#VarInt_and_VarLong
    fn write_varint(&mut self, int: VarInt) -> impl Future<Output = Result<(), Error>>;

    /// Writes a `String` onto this object as described in the official [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Java_Edition_protocol#Type:String
    fn write_string(&mut self, string: &str) -> impl Future<Output = Result<(), Error>>;

    /// Writes a `bool` onto this object as described in the official [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Java_Edition_protocol#Type:Boolean
    fn write_bool(&mut self, bool: bool) -> impl Future<Output = Result<(), Error>>;
}

/// `AsyncReadPacket` allows reading a specific [`ReadPacket`] from an [`AsyncRead`].
///
/// Only [`ReadPacket`s](ReadPacket) can be read as only those packets are received. There are
/// additional methods to read the data that is encoded in a Minecraft-specific manner. Their
/// implementation is analogous to the [write implementation](AsyncWritePacket).
pub trait AsyncReadPacket {
    /// Reads the supplied [`ReadPacket`] type from this object as described in the official
    /// [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Java_Edition_protocol#Packet_format
    fn read_packet<T: ReadPacket + Send>(&mut self) -> impl Future<Output = Result<T, Error>>;

    /// Reads one whole packet frame (id and body, without the length prefix) from this object.
    ///
    /// The announced length is validated against [`MAX_PACKET_LENGTH`] before any allocation
    /// happens. The content is not interpreted.
    fn read_frame(&mut self) -> impl Future<Output = Result<Vec<u8>, Error>>;

    /// Reads a [`VarInt`] from this object as described in the official [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Java_Edition_protocol#VarInt_and_VarLong
    fn read_varint(&mut self) -> impl Future<Output = Result<VarInt, Error>>;

    /// Reads a `String` from this object as described in the official [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Java_Edition_protocol#Type:String
    fn read_string(&mut self) -> impl Future<Output = Result<String, Error>>;

    /// Reads a `bool` from this object as described in the official [protocol documentation][protocol-doc].
    ///
    /// [protocol-doc]: https://minecraft.wiki/w/Java_Edition_protocol#Type:Boolean
    fn read_bool(&mut self) -> impl Future<Output = Result<bool, Error>>;
}
