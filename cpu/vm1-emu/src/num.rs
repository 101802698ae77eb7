pub(crate) trait GetBit: Copy {
    fn bit(self, i: u8) -> bool;
}

macro_rules! impl_get_bit {
    ($t:ty) => {
        impl GetBit for $t {
            #[inline]
            fn bit(self, i: u8) -> bool {
                debug_assert!(i < (<$t>::BITS as u8));
                self & (1 << i) != 0
            }
        }
    };
}

impl_get_bit!(u8);
impl_get_bit!(u16);
impl_get_bit!(u64);

pub(crate) trait WordExt {
    fn lsb(self) -> u8;

    fn msb(self) -> u8;

    fn with_lsb(self, value: u8) -> Self;

    fn with_msb(self, value: u8) -> Self;
}

impl WordExt for u16 {
    #[inline(always)]
    fn lsb(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    fn msb(self) -> u8 {
        (self >> 8) as u8
    }

    #[inline(always)]
    fn with_lsb(self, value: u8) -> Self {
        (self & 0xFF00) | u16::from(value)
    }

    #[inline(always)]
    fn with_msb(self, value: u8) -> Self {
        (self & 0x00FF) | (u16::from(value) << 8)
    }
}
