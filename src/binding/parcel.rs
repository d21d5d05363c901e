//! Positional wire container for crossing the process boundary
//!
//! Integers are appended little-endian to a byte payload; region handles travel
//! in a side table, the same way file descriptors ride beside a socket message.
//! The format is not self-describing: reader and writer must agree on order.

use crate::binding::shared_memory::SharedMemory;
use crate::error::{AAudioError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Index written in place of an absent handle
const NULL_HANDLE: i32 = -1;

#[derive(Debug, Default, Clone)]
pub struct Parcel {
    data: Vec<u8>,
    handles: Vec<SharedMemory>,
    read_pos: usize,
}

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload size in bytes
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Number of handles carried beside the payload
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Bytes not yet consumed by the reader
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Restart reading from the beginning
    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    pub fn write_i32(&mut self, value: i32) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_i32(&mut bytes, value);
        self.data.extend_from_slice(&bytes);
    }

    pub fn write_u32(&mut self, value: u32) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.data.extend_from_slice(&bytes);
    }

    pub fn write_i64(&mut self, value: i64) {
        let mut bytes = [0u8; 8];
        LittleEndian::write_i64(&mut bytes, value);
        self.data.extend_from_slice(&bytes);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_i32(value as i32);
    }

    /// Attach a handle; the payload records its index in the side table
    pub fn write_handle(&mut self, handle: Option<&SharedMemory>) {
        match handle {
            Some(memory) => {
                let index = self.handles.len() as i32;
                self.handles.push(memory.clone());
                self.write_i32(index);
            }
            None => self.write_i32(NULL_HANDLE),
        }
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(AAudioError::internal(format!(
                "parcel truncated: need {} bytes at {}, have {}",
                n,
                self.read_pos,
                self.remaining()
            )));
        }
        let start = self.read_pos;
        self.read_pos += n;
        Ok(&self.data[start..start + n])
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_i32()? != 0)
    }

    pub fn read_handle(&mut self) -> Result<Option<SharedMemory>> {
        let index = self.read_i32()?;
        if index == NULL_HANDLE {
            return Ok(None);
        }
        usize::try_from(index)
            .ok()
            .and_then(|i| self.handles.get(i))
            .cloned()
            .map(Some)
            .ok_or_else(|| AAudioError::internal(format!("parcel handle index {} invalid", index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_in_order() {
        let mut parcel = Parcel::new();
        parcel.write_i32(-7);
        parcel.write_i64(1 << 40);
        parcel.write_u32(9);
        parcel.write_bool(true);

        assert_eq!(parcel.read_i32().unwrap(), -7);
        assert_eq!(parcel.read_i64().unwrap(), 1 << 40);
        assert_eq!(parcel.read_u32().unwrap(), 9);
        assert!(parcel.read_bool().unwrap());
        assert_eq!(parcel.remaining(), 0);
    }

    #[test]
    fn test_truncated_read_is_internal() {
        let mut parcel = Parcel::new();
        parcel.write_i32(1);
        assert!(parcel.read_i64().is_err());
    }

    #[test]
    fn test_handles_travel_out_of_band() {
        let memory = SharedMemory::create("parcel", 64).unwrap();
        let mut parcel = Parcel::new();
        parcel.write_handle(Some(&memory));
        parcel.write_handle(None);
        assert_eq!(parcel.handle_count(), 1);
        assert_eq!(parcel.data_size(), 8);

        let received = parcel.read_handle().unwrap().unwrap();
        assert!(received.same_region(&memory));
        assert!(parcel.read_handle().unwrap().is_none());
    }

    #[test]
    fn test_bad_handle_index() {
        let mut parcel = Parcel::new();
        parcel.write_i32(3);
        assert!(matches!(
            parcel.read_handle(),
            Err(AAudioError::Internal(_))
        ));
    }
}
