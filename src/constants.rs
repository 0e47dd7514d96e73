//! Protocol catalogue for the GPR-B1000 features service
//!
//! Every identifier, command byte and fixed size used on the wire lives here so
//! the Command Encoder, the Reassembler and the Upload Driver read from the same
//! table.

use uuid::{uuid, Uuid};

/// Casio features service
pub const FEATURES_SERVICE_UUID: Uuid = uuid!("26eb000d-b012-49a8-b1f8-394fb2032b0f");

/// "All features" characteristic (read/notify)
pub const ALL_FEATURES_UUID: Uuid = uuid!("26eb002d-b012-49a8-b1f8-394fb2032b0f");

/// "Read request for all features" characteristic (write)
pub const READ_REQUEST_FOR_ALL_FEATURES_UUID: Uuid =
    uuid!("26eb002c-b012-49a8-b1f8-394fb2032b0f");

/// Data request / SP characteristic, the control channel (write + notify)
pub const DATA_REQUEST_SP_UUID: Uuid = uuid!("26eb0023-b012-49a8-b1f8-394fb2032b0f");

/// Convoy characteristic, the bulk channel (write + notify)
pub const CONVOY_UUID: Uuid = uuid!("26eb0024-b012-49a8-b1f8-394fb2032b0f");

/// Client Characteristic Configuration descriptor
pub const CCC_DESCRIPTOR_UUID: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// Category identifiers negotiated on the control channel
pub mod category {
    /// Opened during download initialization
    pub const DOWNLOAD_SETUP: u8 = 0x0E;
    /// Log and point-memory headers
    pub const HEADER: u8 = 0x0F;
    /// A single log or the point memory
    pub const LOG: u8 = 0x10;
    /// Connection setup for uploads (18)
    pub const CONNECTION_SETUP: u8 = 0x12;
    /// Route header upload
    pub const ROUTE_HEADER: u8 = 0x15;
    /// Route data upload
    pub const ROUTE_DATA: u8 = 0x16;
}

/// First-byte opcodes seen on either channel
pub mod opcode {
    /// Category open / transfer announcement
    pub const OPEN: u8 = 0x00;
    /// Connection settings frame on the convoy channel
    pub const CONNECTION_SETTINGS: u8 = 0x01;
    /// Connection parameters from the watch
    pub const CONNECTION_PARAMETERS: u8 = 0x02;
    /// Abort the current category
    pub const END_TRANSMISSION: u8 = 0x03;
    /// Convoy parameters / finish
    pub const FINISH: u8 = 0x04;
    /// Convoy data frame
    pub const DATA: u8 = 0x05;
    /// Alternative connection parameters kind
    pub const CONNECTION_PARAMETERS_ALT: u8 = 0x06;
    /// Watch asks to continue / acknowledgement
    pub const CONTINUE: u8 = 0x07;
    /// Close category
    pub const CLOSE: u8 = 0x09;
    /// Read request for all features
    pub const READ_ALL_FEATURES: u8 = 0x11;
}

/// Size of one transfer sector and CRC checkpoint window
pub const SECTOR_SIZE: usize = 256;

/// Number of trailing CRC bytes in a received window
pub const CRC_LEN: usize = 2;

/// Maximum payload bytes per convoy write (type byte excluded)
pub const MAX_CONVOY_PAYLOAD: usize = 107;

/// Length of a standard command frame
pub const COMMAND_LEN: usize = 10;

/// Minimum length of a transfer announcement on the control channel
pub const MIN_ANNOUNCEMENT_LEN: usize = 9;

/// Header transmission: start address and length requested from the watch
pub const HEADER_ADDRESS: u32 = 0x1000;
pub const HEADER_LENGTH: u32 = 0x2000;

/// Memory layout of recorded logs
pub const ONE_LOG_DATA_SIZE: u32 = 118_784;
pub const FIRST_LOG_DATA_ADDRESS: u32 = 53_248;
pub const FIRST_POINT_MEMORY_DATA_ADDRESS: u32 = 2_428_928;

/// Header buffer offset of the point-memory count
pub const POINT_MEMORY_COUNT_OFFSET: usize = 4160;

/// Bytes per point-memory entry
pub const POINT_MEMORY_ENTRY_SIZE: u32 = 35;

/// Width of one header slot
pub const HEADER_SLOT_SIZE: usize = 64;

/// Highest header ordinal stored by the watch
pub const MAX_HEADER_ORDINAL: usize = 20;

/// Acceptor values carried by the upload connection settings frame
pub const SETTINGS_ACCEPTOR_1: u8 = 250;
pub const SETTINGS_ACCEPTOR_2: u8 = 245;
pub const SETTINGS_TIMEOUT_MINUTES: u8 = 0;

/// Convoy notification the watch sends once the upload channels are ready
pub const CONVOY_READY_SENTINEL: [u8; 3] = [0x00, 0x00, 0x00];

/// Default name prefix advertised by the watch
pub const DEVICE_NAME_PREFIX: &str = "CASIO GPR-B1000";
