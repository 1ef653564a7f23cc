//! Wire-level size constants from §4.1.

/// Maximum size of a non-init datagram, including any reliable header.
pub const MAX_PACKET: usize = 520;

/// Maximum size of a connection-init datagram (slightly larger than
/// [`MAX_PACKET`] to make room for handshake payloads).
pub const MAX_CONN_INIT_PACKET: usize = 560;

/// Payload size of one sized-data (0x0A) chunk.
pub const CHUNK_SIZE: usize = 480;

/// Maximum length of a single item inside a grouped (0x0E) container.
pub const MAX_GROUPED_ITEM_LEN: usize = 255;

/// Maximum total length of a grouped (0x0E) container, header included.
pub const MAX_GROUPED_PACKET_LEN: usize = 512;

/// Byte length of the reliable header (`0x00 0x03` + 4-byte little-endian
/// sequence number).
pub const RELIABLE_HEADER_LEN: usize = 2 + 4;

/// Byte length of the sized-data header (`0x00 0x0A` + 4-byte little-endian
/// total length).
pub const SIZED_HEADER_LEN: usize = 2 + 4;

/// Byte length of the big-data subtype header (`0x00 0x08` or `0x00 0x09`).
pub const BIG_HEADER_LEN: usize = 2;

/// Recommended size of the per-worker receive buffer (§4.2 step 1).
pub const RECV_BUF_LEN: usize = 65527;

/// Core family leading byte.
pub const CORE_TYPE: u8 = 0x00;
