//! PDH status codes and their classification.
//!
//! Every native call returns a `PDH_STATUS`. Most codes are plain failures, but
//! a handful mean "this instance has no rows right now" and must be absorbed by
//! the collector instead of failing the scrape.

use std::fmt;

/// A native PDH status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PdhStatus(pub u32);

impl PdhStatus {
    pub const CSTATUS_VALID_DATA: Self = Self(0x0000_0000);
    pub const CSTATUS_NEW_DATA: Self = Self(0x0000_0001);
    pub const CSTATUS_NO_MACHINE: Self = Self(0x8000_07D0);
    pub const CSTATUS_NO_INSTANCE: Self = Self(0x8000_07D1);
    pub const MORE_DATA: Self = Self(0x8000_07D2);
    pub const CSTATUS_ITEM_NOT_VALIDATED: Self = Self(0x8000_07D3);
    pub const RETRY: Self = Self(0x8000_07D4);
    pub const NO_DATA: Self = Self(0x8000_07D5);
    pub const CALC_NEGATIVE_DENOMINATOR: Self = Self(0x8000_07D6);
    pub const CALC_NEGATIVE_TIMEBASE: Self = Self(0x8000_07D7);
    pub const CALC_NEGATIVE_VALUE: Self = Self(0x8000_07D8);
    pub const DIALOG_CANCELLED: Self = Self(0x8000_07D9);
    pub const END_OF_LOG_FILE: Self = Self(0x8000_07DA);
    pub const ASYNC_QUERY_TIMEOUT: Self = Self(0x8000_07DB);
    pub const CANNOT_SET_DEFAULT_REALTIME_DATASOURCE: Self = Self(0x8000_07DC);
    pub const CSTATUS_NO_OBJECT: Self = Self(0xC000_0BB8);
    pub const CSTATUS_NO_COUNTER: Self = Self(0xC000_0BB9);
    pub const CSTATUS_INVALID_DATA: Self = Self(0xC000_0BBA);
    pub const MEMORY_ALLOCATION_FAILURE: Self = Self(0xC000_0BBB);
    pub const INVALID_HANDLE: Self = Self(0xC000_0BBC);
    pub const INVALID_ARGUMENT: Self = Self(0xC000_0BBD);
    pub const FUNCTION_NOT_FOUND: Self = Self(0xC000_0BBE);
    pub const CSTATUS_NO_COUNTERNAME: Self = Self(0xC000_0BBF);
    pub const CSTATUS_BAD_COUNTERNAME: Self = Self(0xC000_0BC0);
    pub const INVALID_BUFFER: Self = Self(0xC000_0BC1);
    pub const INSUFFICIENT_BUFFER: Self = Self(0xC000_0BC2);
    pub const CANNOT_CONNECT_MACHINE: Self = Self(0xC000_0BC3);
    pub const INVALID_PATH: Self = Self(0xC000_0BC4);
    pub const INVALID_INSTANCE: Self = Self(0xC000_0BC5);
    pub const INVALID_DATA: Self = Self(0xC000_0BC6);
    pub const NO_DIALOG_DATA: Self = Self(0xC000_0BC7);
    pub const CANNOT_READ_NAME_STRINGS: Self = Self(0xC000_0BC8);
    pub const CSTATUS_NO_COUNTER_FOR_MACHINE: Self = Self(0xC000_0BCB);

    /// Codes that mean "no current data for this instance". A raw-array fetch
    /// failing with one of these is skipped, not reported.
    pub const BENIGN_NO_DATA: [Self; 5] = [
        Self::CSTATUS_INVALID_DATA,
        Self::CALC_NEGATIVE_DENOMINATOR,
        Self::CALC_NEGATIVE_VALUE,
        Self::CSTATUS_NO_INSTANCE,
        Self::NO_DATA,
    ];

    pub fn code(self) -> u32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Self::CSTATUS_VALID_DATA
    }

    /// Whether a per-item counter status carries a usable value.
    pub fn is_valid_item(self) -> bool {
        self == Self::CSTATUS_VALID_DATA || self == Self::CSTATUS_NEW_DATA
    }

    pub fn is_more_data(self) -> bool {
        self == Self::MORE_DATA
    }

    pub fn is_benign_no_data(self) -> bool {
        Self::BENIGN_NO_DATA.contains(&self)
    }

    /// Symbolic name of a known status, without the `PDH_` prefix.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::CSTATUS_VALID_DATA => "CSTATUS_VALID_DATA",
            Self::CSTATUS_NEW_DATA => "CSTATUS_NEW_DATA",
            Self::CSTATUS_NO_MACHINE => "CSTATUS_NO_MACHINE",
            Self::CSTATUS_NO_INSTANCE => "CSTATUS_NO_INSTANCE",
            Self::MORE_DATA => "MORE_DATA",
            Self::CSTATUS_ITEM_NOT_VALIDATED => "CSTATUS_ITEM_NOT_VALIDATED",
            Self::RETRY => "RETRY",
            Self::NO_DATA => "NO_DATA",
            Self::CALC_NEGATIVE_DENOMINATOR => "CALC_NEGATIVE_DENOMINATOR",
            Self::CALC_NEGATIVE_TIMEBASE => "CALC_NEGATIVE_TIMEBASE",
            Self::CALC_NEGATIVE_VALUE => "CALC_NEGATIVE_VALUE",
            Self::DIALOG_CANCELLED => "DIALOG_CANCELLED",
            Self::END_OF_LOG_FILE => "END_OF_LOG_FILE",
            Self::ASYNC_QUERY_TIMEOUT => "ASYNC_QUERY_TIMEOUT",
            Self::CANNOT_SET_DEFAULT_REALTIME_DATASOURCE => {
                "CANNOT_SET_DEFAULT_REALTIME_DATASOURCE"
            }
            Self::CSTATUS_NO_OBJECT => "CSTATUS_NO_OBJECT",
            Self::CSTATUS_NO_COUNTER => "CSTATUS_NO_COUNTER",
            Self::CSTATUS_INVALID_DATA => "CSTATUS_INVALID_DATA",
            Self::MEMORY_ALLOCATION_FAILURE => "MEMORY_ALLOCATION_FAILURE",
            Self::INVALID_HANDLE => "INVALID_HANDLE",
            Self::INVALID_ARGUMENT => "INVALID_ARGUMENT",
            Self::FUNCTION_NOT_FOUND => "FUNCTION_NOT_FOUND",
            Self::CSTATUS_NO_COUNTERNAME => "CSTATUS_NO_COUNTERNAME",
            Self::CSTATUS_BAD_COUNTERNAME => "CSTATUS_BAD_COUNTERNAME",
            Self::INVALID_BUFFER => "INVALID_BUFFER",
            Self::INSUFFICIENT_BUFFER => "INSUFFICIENT_BUFFER",
            Self::CANNOT_CONNECT_MACHINE => "CANNOT_CONNECT_MACHINE",
            Self::INVALID_PATH => "INVALID_PATH",
            Self::INVALID_INSTANCE => "INVALID_INSTANCE",
            Self::INVALID_DATA => "INVALID_DATA",
            Self::NO_DIALOG_DATA => "NO_DIALOG_DATA",
            Self::CANNOT_READ_NAME_STRINGS => "CANNOT_READ_NAME_STRINGS",
            Self::CSTATUS_NO_COUNTER_FOR_MACHINE => "CSTATUS_NO_COUNTER_FOR_MACHINE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for PdhStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "PDH_{} (0x{:08X})", name, self.0),
            None => write!(f, "PDH status 0x{:08X}", self.0),
        }
    }
}

impl From<u32> for PdhStatus {
    fn from(code: u32) -> Self {
        Self(code)
    }
}
