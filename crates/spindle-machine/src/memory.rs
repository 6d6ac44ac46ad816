use crate::error::MemoryError;
use core::fmt;
use core::ops::Add;

/// Address in the machine's memory (cannot be dereferenced directly)
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address(usize);

impl Address {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn val(&self) -> usize {
        self.0
    }

    /// Distance in bytes from `base` to `self`, if `self` is not below it.
    pub fn offset_from(&self, base: Address) -> Option<usize> {
        self.0.checked_sub(base.0)
    }

    /// `self + len`, or `None` past the top of the address space.
    pub fn checked_add(&self, len: usize) -> Option<Address> {
        self.0.checked_add(len).map(Address)
    }
}

impl Add<usize> for Address {
    type Output = Address;

    fn add(self, rhs: usize) -> Address {
        Address(self.0 + rhs)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Flat byte-addressable RAM starting at `base`.
pub struct Memory {
    base: Address,
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new(base: Address, size: usize) -> Self {
        Self {
            base,
            bytes: vec![0; size],
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn range(&self, addr: Address, len: usize) -> Result<core::ops::Range<usize>, MemoryError> {
        let start = addr
            .offset_from(self.base)
            .ok_or_else(|| MemoryError::out_of_bounds(addr, len))?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| MemoryError::out_of_bounds(addr, len))?;
        Ok(start..end)
    }

    pub fn read(&self, addr: Address, buf: &mut [u8]) -> Result<(), MemoryError> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    pub fn write(&mut self, addr: Address, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn copy(&mut self, dst: Address, src: Address, len: usize) -> Result<(), MemoryError> {
        let from = self.range(src, len)?;
        let to = self.range(dst, len)?;
        self.bytes.copy_within(from, to.start);
        Ok(())
    }

    pub fn slice(&self, addr: Address, len: usize) -> Result<&[u8], MemoryError> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_access_past_end() {
        let mut memory = Memory::new(Address::new(0x1000), 16);
        assert!(memory.write(Address::new(0x1008), &[1; 8]).is_ok());
        assert!(memory.write(Address::new(0x1009), &[1; 8]).is_err());
        assert!(memory.read(Address::new(0xfff), &mut [0; 1]).is_err());
    }

    #[test]
    fn checked_add_stops_at_top_of_address_space() {
        assert_eq!(Address::new(0x10).checked_add(0x10), Some(Address::new(0x20)));
        assert_eq!(Address::new(usize::MAX - 1).checked_add(1), Some(Address::new(usize::MAX)));
        assert_eq!(Address::new(usize::MAX - 1).checked_add(2), None);
    }

    #[test]
    fn copy_handles_overlap() {
        let mut memory = Memory::new(Address::new(0), 8);
        memory.write(Address::new(0), &[1, 2, 3, 4]).unwrap();
        memory.copy(Address::new(2), Address::new(0), 4).unwrap();
        assert_eq!(memory.slice(Address::new(0), 6).unwrap(), &[1, 2, 1, 2, 3, 4]);
    }
}
