//! The "ask for size, then fetch" protocol shared by every variable-length PDH call.
//!
//! Counter metadata and raw counter arrays are both returned through a caller
//! supplied buffer. The caller first passes no buffer, the API answers
//! `PDH_MORE_DATA` together with the required size, and a second call fills a
//! buffer of exactly that size. When the data grows between the two calls the
//! fill reports `PDH_MORE_DATA` again and the buffer is grown and retried.

use super::status::PdhStatus;

/// Number of fill attempts before giving up on a buffer that keeps growing.
pub const MAX_FETCH_ATTEMPTS: usize = 8;

/// Byte buffer handed to the native API.
///
/// Backed by `u64` words so the start is aligned for the native record types
/// that begin with pointer and 64-bit fields.
#[derive(Debug, Clone, Default)]
pub struct PdhBuffer {
    words: Vec<u64>,
    len: usize,
}

impl PdhBuffer {
    /// Allocates a zeroed buffer of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the first byte. Pointers embedded in native records are
    /// translated back into offsets relative to this address.
    pub fn base_address(&self) -> usize {
        self.words.as_ptr() as usize
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast()
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the words vector owns at least `len` initialized bytes and any
        // bit pattern is a valid `u8`.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; the exclusive borrow of `self` guarantees uniqueness.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.len) }
    }
}

/// Outcome of one sized native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub status: PdhStatus,
    /// Required buffer size in bytes, as reported by the API.
    pub required: u32,
    /// Number of records written (raw counter arrays only).
    pub items: u32,
}

impl Probe {
    pub fn new(status: PdhStatus, required: u32, items: u32) -> Self {
        Self {
            status,
            required,
            items,
        }
    }
}

/// A filled buffer and the number of records it holds.
#[derive(Debug)]
pub struct Fetched {
    pub buffer: PdhBuffer,
    pub items: u32,
}

/// Why a sized fetch did not produce a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    /// The API returned a status other than success or `PDH_MORE_DATA`.
    Status(PdhStatus),
    /// The buffer kept growing past [`MAX_FETCH_ATTEMPTS`].
    Exhausted { last_required: u32 },
}

/// Runs the size-probe-then-fetch protocol.
///
/// `call` is invoked with `None` to probe and with `Some(buffer)` to fill. The
/// probe must answer `PDH_MORE_DATA`; any other status is returned as is so the
/// caller can classify it.
pub fn fetch_sized<F>(mut call: F) -> Result<Fetched, FetchFailure>
where
    F: FnMut(Option<&mut PdhBuffer>) -> Probe,
{
    let probe = call(None);
    if !probe.status.is_more_data() {
        return Err(FetchFailure::Status(probe.status));
    }

    let mut required = probe.required;
    for _ in 0..MAX_FETCH_ATTEMPTS {
        let mut buffer = PdhBuffer::with_len(required as usize);
        let fill = call(Some(&mut buffer));

        if fill.status.is_success() {
            return Ok(Fetched {
                buffer,
                items: fill.items,
            });
        }
        if !fill.status.is_more_data() {
            return Err(FetchFailure::Status(fill.status));
        }
        // Never shrink, and always make progress even if the API reports the
        // same size twice.
        required = fill.required.max(required.saturating_add(1));
    }

    Err(FetchFailure::Exhausted {
        last_required: required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_alignment_and_len() {
        let mut buffer = PdhBuffer::with_len(13);
        assert_eq!(buffer.len(), 13);
        assert_eq!(buffer.as_bytes().len(), 13);
        assert_eq!(buffer.base_address() % 8, 0);
        buffer.as_bytes_mut()[12] = 0xAB;
        assert_eq!(buffer.as_bytes()[12], 0xAB);
    }

    #[test]
    fn test_fetch_two_phase() {
        let mut calls = 0;
        let fetched = fetch_sized(|buffer| {
            calls += 1;
            match buffer {
                None => Probe::new(PdhStatus::MORE_DATA, 32, 0),
                Some(buf) => {
                    assert_eq!(buf.len(), 32);
                    buf.as_bytes_mut()[0] = 7;
                    Probe::new(PdhStatus::CSTATUS_VALID_DATA, 32, 2)
                }
            }
        })
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(fetched.items, 2);
        assert_eq!(fetched.buffer.as_bytes()[0], 7);
    }

    #[test]
    fn test_fetch_probe_status_is_returned() {
        let result = fetch_sized(|_| Probe::new(PdhStatus::NO_DATA, 0, 0));
        assert_eq!(
            result.unwrap_err(),
            FetchFailure::Status(PdhStatus::NO_DATA)
        );
    }

    #[test]
    fn test_fetch_grows_when_data_grows() {
        let mut sizes = Vec::new();
        let fetched = fetch_sized(|buffer| match buffer {
            None => Probe::new(PdhStatus::MORE_DATA, 16, 0),
            Some(buf) => {
                sizes.push(buf.len());
                if buf.len() < 48 {
                    Probe::new(PdhStatus::MORE_DATA, 48, 0)
                } else {
                    Probe::new(PdhStatus::CSTATUS_VALID_DATA, 48, 1)
                }
            }
        })
        .unwrap();

        assert_eq!(sizes, vec![16, 48]);
        assert_eq!(fetched.buffer.len(), 48);
    }

    #[test]
    fn test_fetch_gives_up() {
        let result = fetch_sized(|buffer| match buffer {
            None => Probe::new(PdhStatus::MORE_DATA, 8, 0),
            Some(buf) => Probe::new(PdhStatus::MORE_DATA, buf.len() as u32 * 2, 0),
        });
        assert!(matches!(result, Err(FetchFailure::Exhausted { .. })));
    }
}
