use core::fmt;
use std::ops::BitAnd;

/// Mask covering `width` bytes of a little-endian 32-bit word, starting at byte `alignment`
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ByteMask4 {
    mask: u32,
}

impl ByteMask4 {
    #[inline(always)]
    pub fn new<W, A>(width: W, alignment: A) -> Self
    where u32: From<W>, u32: From<A> {
        let width = u32::from(width);
        let alignment = u32::from(alignment);
        let mask = (((1u64 << (width * 8)) - 1) << (alignment * 8)) as u32;
        ByteMask4 { mask }
    }

    /// Mask for an access of `width` bytes at `address`, positioned within its aligned word
    #[inline(always)]
    pub fn for_access(width: u32, address: u32) -> Self {
        Self::new(width, address & 3 & !(width - 1))
    }

    #[inline(always)]
    pub fn apply(&self, data: u32) -> u32 {
        data & self.mask
    }

    #[inline(always)]
    pub fn masked_insert(&self, dest: &mut u32, value: u32) {
        *dest = (*dest & !self.mask) | (value & self.mask);
    }

    #[inline(always)]
    pub fn value(&self) -> u32 {
        self.mask
    }

    /// Bit offset of the lowest masked byte
    #[inline(always)]
    pub fn shift(&self) -> u32 {
        self.mask.trailing_zeros() & 31
    }

    pub fn size(&self) -> u32 {
        self.mask.count_ones()
    }
}

impl BitAnd for ByteMask4 {
    type Output = Self;

    #[inline(always)]
    fn bitand(self, rhs: Self) -> Self::Output {
        ByteMask4 {
            mask: self.mask & rhs.mask,
        }
    }
}

impl Default for ByteMask4 {
    #[inline(always)]
    fn default() -> Self {
        ByteMask4 { mask: !0 }
    }
}

impl fmt::Debug for ByteMask4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteMask4({:08x})", self.mask)
    }
}

/// Sign extends the low `bits` bits of `value`
#[inline(always)]
pub fn sign_extend(value: u32, bits: u8) -> u32 {
    let shift = 32 - bits as u32;
    (((value << shift) as i32) >> shift) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_masks() {
        assert_eq!(ByteMask4::new(4u8, 0u8).value(), 0xffff_ffff);
        assert_eq!(ByteMask4::new(2u8, 2u8).value(), 0xffff_0000);
        assert_eq!(ByteMask4::new(1u8, 1u8).value(), 0x0000_ff00);
        assert_eq!(ByteMask4::for_access(2, 0x1f80_1072).value(), 0xffff_0000);
        assert_eq!(ByteMask4::for_access(1, 0x1f80_1073).shift(), 24);
        assert_eq!(ByteMask4::default().size(), 32);
    }

    #[test]
    fn masked_insert_keeps_other_bytes() {
        let mut word = 0x1122_3344;
        ByteMask4::new(2u8, 0u8).masked_insert(&mut word, 0xaaaa_bbbb);
        assert_eq!(word, 0x1122_bbbb);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0xffff, 16), 0xffff_ffff);
        assert_eq!(sign_extend(0x7fff, 16), 0x7fff);
        assert_eq!(sign_extend(0x200_0000, 26), 0xfe00_0000);
        assert_eq!(sign_extend(0x80, 8), 0xffff_ff80);
    }
}
