//! Bounds-checked access to the fixed-layout records PDH writes into caller buffers.
//!
//! `PDH_COUNTER_INFO_W` and `PDH_RAW_COUNTER_ITEM_W` are read field by field at
//! their documented offsets instead of casting the buffer to a struct. String
//! fields are pointers into the same buffer; they are translated into offsets
//! and validated before any UTF-16 is read.
//!
//! The encoders are the exact inverse and are used by the in-memory backend, so
//! the decoding path exercised in tests is the one used against the real API.

use thiserror::Error;

use super::buffer::PdhBuffer;
use super::status::PdhStatus;

const PTR: usize = std::mem::size_of::<usize>();

const fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

// PDH_COUNTER_INFO_W
const INFO_LENGTH: usize = 0;
const INFO_TYPE: usize = 4;
const INFO_VERSION: usize = 8;
const INFO_STATUS: usize = 12;
const INFO_SCALE: usize = 16;
const INFO_DEFAULT_SCALE: usize = 20;
const INFO_FULL_PATH: usize = 24 + 2 * PTR;
const INFO_MACHINE_NAME: usize = 24 + 3 * PTR;
const INFO_OBJECT_NAME: usize = 24 + 4 * PTR;
const INFO_INSTANCE_NAME: usize = 24 + 5 * PTR;
const INFO_INSTANCE_INDEX: usize = 24 + 7 * PTR;
const INFO_COUNTER_NAME: usize = align_up(INFO_INSTANCE_INDEX + 4, PTR);
const INFO_EXPLAIN_TEXT: usize = INFO_COUNTER_NAME + PTR;
const INFO_DATA_BUFFER: usize = INFO_EXPLAIN_TEXT + PTR;

/// Size of `PDH_COUNTER_INFO_W` without its trailing strings.
pub const COUNTER_INFO_SIZE: usize = align_up(INFO_DATA_BUFFER + 4, if PTR == 8 { 8 } else { 4 });

// PDH_RAW_COUNTER_ITEM_W
const ITEM_NAME: usize = 0;
const ITEM_STATUS: usize = 8;
const ITEM_TIMESTAMP: usize = 12;
const ITEM_FIRST_VALUE: usize = 24;
const ITEM_SECOND_VALUE: usize = 32;
const ITEM_MULTI_COUNT: usize = 40;

/// Size of one `PDH_RAW_COUNTER_ITEM_W`.
pub const RAW_ITEM_SIZE: usize = 48;

/// Decoding failure of a native record buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("buffer truncated: need {needed} bytes at offset {offset}, have {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("string pointer 0x{address:x} points outside the buffer")]
    PointerOutOfBounds { address: usize },
    #[error("string at offset {offset} is not NUL-terminated")]
    Unterminated { offset: usize },
    #[error("string at offset {offset} is not valid UTF-16")]
    InvalidUtf16 { offset: usize },
}

/// Decoded `PDH_COUNTER_INFO_W`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CounterInfo {
    pub type_code: u32,
    pub version: u32,
    pub status: u32,
    pub scale: i32,
    pub default_scale: i32,
    pub full_path: String,
    pub machine_name: String,
    pub object_name: String,
    pub instance_name: String,
    pub counter_name: String,
    pub explain_text: String,
}

/// Decoded `PDH_RAW_COUNTER_ITEM_W`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub name: String,
    pub status: PdhStatus,
    /// FILETIME of the sample, in 100ns ticks since 1601.
    pub timestamp: u64,
    pub first_value: i64,
    pub second_value: i64,
    pub multi_count: u32,
}

struct Reader<'a> {
    bytes: &'a [u8],
    base: usize,
}

impl<'a> Reader<'a> {
    fn new(buffer: &'a PdhBuffer) -> Self {
        Self {
            bytes: buffer.as_bytes(),
            base: buffer.base_address(),
        }
    }

    fn slice<const N: usize>(&self, offset: usize) -> Result<[u8; N], LayoutError> {
        offset
            .checked_add(N)
            .and_then(|end| self.bytes.get(offset..end))
            .and_then(|s| s.try_into().ok())
            .ok_or(LayoutError::Truncated {
                offset,
                needed: N,
                len: self.bytes.len(),
            })
    }

    fn u32(&self, offset: usize) -> Result<u32, LayoutError> {
        Ok(u32::from_ne_bytes(self.slice(offset)?))
    }

    fn i32(&self, offset: usize) -> Result<i32, LayoutError> {
        Ok(i32::from_ne_bytes(self.slice(offset)?))
    }

    fn i64(&self, offset: usize) -> Result<i64, LayoutError> {
        Ok(i64::from_ne_bytes(self.slice(offset)?))
    }

    fn ptr(&self, offset: usize) -> Result<usize, LayoutError> {
        Ok(usize::from_ne_bytes(self.slice(offset)?))
    }

    /// Reads the NUL-terminated UTF-16 string a pointer field refers to.
    /// A null pointer reads as an empty string.
    fn string(&self, field_offset: usize) -> Result<String, LayoutError> {
        let address = self.ptr(field_offset)?;
        if address == 0 {
            return Ok(String::new());
        }

        let start = address
            .checked_sub(self.base)
            .filter(|offset| *offset < self.bytes.len())
            .ok_or(LayoutError::PointerOutOfBounds { address })?;

        let mut units = Vec::new();
        let mut pos = start;
        loop {
            let unit = self
                .bytes
                .get(pos..pos + 2)
                .map(|b| u16::from_ne_bytes([b[0], b[1]]))
                .ok_or(LayoutError::Unterminated { offset: start })?;
            if unit == 0 {
                break;
            }
            units.push(unit);
            pos += 2;
        }

        String::from_utf16(&units).map_err(|_| LayoutError::InvalidUtf16 { offset: start })
    }
}

/// Decodes a `PDH_COUNTER_INFO_W` filled by `PdhGetCounterInfoW`.
pub fn decode_counter_info(buffer: &PdhBuffer) -> Result<CounterInfo, LayoutError> {
    let r = Reader::new(buffer);
    let length = r.u32(INFO_LENGTH)? as usize;
    if length > buffer.len() {
        return Err(LayoutError::Truncated {
            offset: 0,
            needed: length,
            len: buffer.len(),
        });
    }

    Ok(CounterInfo {
        type_code: r.u32(INFO_TYPE)?,
        version: r.u32(INFO_VERSION)?,
        status: r.u32(INFO_STATUS)?,
        scale: r.i32(INFO_SCALE)?,
        default_scale: r.i32(INFO_DEFAULT_SCALE)?,
        full_path: r.string(INFO_FULL_PATH)?,
        machine_name: r.string(INFO_MACHINE_NAME)?,
        object_name: r.string(INFO_OBJECT_NAME)?,
        instance_name: r.string(INFO_INSTANCE_NAME)?,
        counter_name: r.string(INFO_COUNTER_NAME)?,
        explain_text: r.string(INFO_EXPLAIN_TEXT)?,
    })
}

/// Decodes `count` `PDH_RAW_COUNTER_ITEM_W` records filled by `PdhGetRawCounterArrayW`.
pub fn decode_raw_items(buffer: &PdhBuffer, count: u32) -> Result<Vec<RawItem>, LayoutError> {
    let count = count as usize;
    let needed = count.checked_mul(RAW_ITEM_SIZE).unwrap_or(usize::MAX);
    if needed > buffer.len() {
        return Err(LayoutError::Truncated {
            offset: 0,
            needed,
            len: buffer.len(),
        });
    }

    let r = Reader::new(buffer);
    let mut items = Vec::with_capacity(count);

    for index in 0..count {
        let at = index * RAW_ITEM_SIZE;
        let low = r.u32(at + ITEM_TIMESTAMP)? as u64;
        let high = r.u32(at + ITEM_TIMESTAMP + 4)? as u64;
        items.push(RawItem {
            name: r.string(at + ITEM_NAME)?,
            status: PdhStatus(r.u32(at + ITEM_STATUS)?),
            timestamp: (high << 32) | low,
            first_value: r.i64(at + ITEM_FIRST_VALUE)?,
            second_value: r.i64(at + ITEM_SECOND_VALUE)?,
            multi_count: r.u32(at + ITEM_MULTI_COUNT)?,
        });
    }

    Ok(items)
}

fn utf16_size(s: &str) -> usize {
    (s.encode_utf16().count() + 1) * 2
}

struct Writer<'a> {
    bytes: &'a mut [u8],
    base: usize,
    tail: usize,
}

impl<'a> Writer<'a> {
    fn new(buffer: &'a mut PdhBuffer, tail: usize) -> Self {
        let base = buffer.base_address();
        Self {
            bytes: buffer.as_bytes_mut(),
            base,
            tail,
        }
    }

    fn put(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Appends a NUL-terminated string after the fixed records and stores a
    /// pointer to it at `field_offset`.
    fn string(&mut self, field_offset: usize, s: &str) {
        let start = self.tail;
        let mut pos = start;
        for unit in s.encode_utf16().chain(std::iter::once(0)) {
            self.put(pos, &unit.to_ne_bytes());
            pos += 2;
        }
        self.tail = pos;
        self.put(field_offset, &(self.base + start).to_ne_bytes());
    }
}

/// Bytes needed to encode `info` including its strings.
pub fn counter_info_size(info: &CounterInfo) -> usize {
    COUNTER_INFO_SIZE
        + [
            &info.full_path,
            &info.machine_name,
            &info.object_name,
            &info.instance_name,
            &info.counter_name,
            &info.explain_text,
        ]
        .iter()
        .map(|s| utf16_size(s))
        .sum::<usize>()
}

/// Writes `info` the way `PdhGetCounterInfoW` lays it out.
///
/// The buffer must be at least [`counter_info_size`] bytes.
pub fn encode_counter_info(info: &CounterInfo, buffer: &mut PdhBuffer) {
    let size = counter_info_size(info);
    let mut w = Writer::new(buffer, COUNTER_INFO_SIZE);
    w.put(INFO_LENGTH, &(size as u32).to_ne_bytes());
    w.put(INFO_TYPE, &info.type_code.to_ne_bytes());
    w.put(INFO_VERSION, &info.version.to_ne_bytes());
    w.put(INFO_STATUS, &info.status.to_ne_bytes());
    w.put(INFO_SCALE, &info.scale.to_ne_bytes());
    w.put(INFO_DEFAULT_SCALE, &info.default_scale.to_ne_bytes());
    w.string(INFO_FULL_PATH, &info.full_path);
    w.string(INFO_MACHINE_NAME, &info.machine_name);
    w.string(INFO_OBJECT_NAME, &info.object_name);
    w.string(INFO_INSTANCE_NAME, &info.instance_name);
    w.string(INFO_COUNTER_NAME, &info.counter_name);
    w.string(INFO_EXPLAIN_TEXT, &info.explain_text);
}

/// Bytes needed to encode `items` including their names.
pub fn raw_items_size(items: &[RawItem]) -> usize {
    items.len() * RAW_ITEM_SIZE + items.iter().map(|i| utf16_size(&i.name)).sum::<usize>()
}

/// Writes `items` the way `PdhGetRawCounterArrayW` lays them out: all records
/// first, then the instance names.
pub fn encode_raw_items(items: &[RawItem], buffer: &mut PdhBuffer) {
    let mut w = Writer::new(buffer, items.len() * RAW_ITEM_SIZE);
    for (index, item) in items.iter().enumerate() {
        let at = index * RAW_ITEM_SIZE;
        w.string(at + ITEM_NAME, &item.name);
        w.put(at + ITEM_STATUS, &item.status.code().to_ne_bytes());
        w.put(at + ITEM_TIMESTAMP, &(item.timestamp as u32).to_ne_bytes());
        w.put(
            at + ITEM_TIMESTAMP + 4,
            &((item.timestamp >> 32) as u32).to_ne_bytes(),
        );
        w.put(at + ITEM_FIRST_VALUE, &item.first_value.to_ne_bytes());
        w.put(at + ITEM_SECOND_VALUE, &item.second_value.to_ne_bytes());
        w.put(at + ITEM_MULTI_COUNT, &item.multi_count.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, first: i64, second: i64) -> RawItem {
        RawItem {
            name: name.to_string(),
            status: PdhStatus::CSTATUS_VALID_DATA,
            timestamp: 0x01DA_0000_1234_5678,
            first_value: first,
            second_value: second,
            multi_count: 1,
        }
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(RAW_ITEM_SIZE, 48);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(COUNTER_INFO_SIZE, 112);
        #[cfg(target_pointer_width = "32")]
        assert_eq!(COUNTER_INFO_SIZE, 68);
    }

    #[test]
    fn test_counter_info_decode() {
        let info = CounterInfo {
            type_code: 0x2051_0500,
            version: 0x0501,
            full_path: "\\Processor Information(0,0)\\% User Time".to_string(),
            object_name: "Processor Information".to_string(),
            instance_name: "0,0".to_string(),
            counter_name: "% User Time".to_string(),
            explain_text: "Time spent in user mode.".to_string(),
            ..CounterInfo::default()
        };
        let mut buffer = PdhBuffer::with_len(counter_info_size(&info));
        encode_counter_info(&info, &mut buffer);

        assert_eq!(decode_counter_info(&buffer).unwrap(), info);
    }

    #[test]
    fn test_raw_items_decode_with_unicode_names() {
        let items = vec![item("Bürocomputer", 10, 20), item("", -5, 0)];
        let mut buffer = PdhBuffer::with_len(raw_items_size(&items));
        encode_raw_items(&items, &mut buffer);

        let decoded = decode_raw_items(&buffer, 2).unwrap();
        assert_eq!(decoded, items);
    }

    #[test]
    fn test_item_count_beyond_buffer_is_truncated() {
        let items = vec![item("a", 1, 0)];
        let mut buffer = PdhBuffer::with_len(raw_items_size(&items));
        encode_raw_items(&items, &mut buffer);

        let err = decode_raw_items(&buffer, 2).unwrap_err();
        assert!(matches!(err, LayoutError::Truncated { .. }));
    }

    #[test]
    fn test_huge_item_count_is_rejected_before_allocating() {
        let buffer = PdhBuffer::with_len(48);
        let err = decode_raw_items(&buffer, u32::MAX).unwrap_err();
        assert!(matches!(err, LayoutError::Truncated { len: 48, .. }));
    }

    #[test]
    fn test_pointer_outside_buffer_is_rejected() {
        let items = vec![item("a", 1, 0)];
        let mut buffer = PdhBuffer::with_len(raw_items_size(&items));
        encode_raw_items(&items, &mut buffer);
        let bogus = buffer.base_address() + buffer.len() + 64;
        buffer.as_bytes_mut()[..PTR].copy_from_slice(&bogus.to_ne_bytes());

        let err = decode_raw_items(&buffer, 1).unwrap_err();
        assert_eq!(err, LayoutError::PointerOutOfBounds { address: bogus });
    }

    #[test]
    fn test_unterminated_string_is_rejected() {
        let items = vec![item("abc", 1, 0)];
        let size = raw_items_size(&items);
        let mut buffer = PdhBuffer::with_len(size);
        encode_raw_items(&items, &mut buffer);
        // Overwrite the terminator of the only name.
        buffer.as_bytes_mut()[size - 2..].copy_from_slice(&0x41u16.to_ne_bytes());

        let err = decode_raw_items(&buffer, 1).unwrap_err();
        assert!(matches!(err, LayoutError::Unterminated { .. }));
    }

    #[test]
    fn test_declared_length_beyond_buffer() {
        let info = CounterInfo::default();
        let mut buffer = PdhBuffer::with_len(counter_info_size(&info));
        encode_counter_info(&info, &mut buffer);
        buffer.as_bytes_mut()[..4].copy_from_slice(&10_000u32.to_ne_bytes());

        assert!(matches!(
            decode_counter_info(&buffer),
            Err(LayoutError::Truncated { needed: 10_000, .. })
        ));
    }
}
