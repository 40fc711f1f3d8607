/// A fixed-width word of bits, used as the building block of bitmaps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitArray<T>(pub T);

macro_rules! impl_bitarray {
    ($($t: ty),*) => {
        $(
            impl BitArray<$t> {
                pub const BITS: usize = <$t>::BITS as usize;

                pub const fn get(&self, idx: usize) -> bool {
                    (self.0 >> idx & 1) != 0
                }

                pub const fn with(self, value: bool, idx: usize) -> Self {
                    let mask: $t = 1 << idx;
                    if value {
                        BitArray(self.0 | mask)
                    } else {
                        BitArray(self.0 & !mask)
                    }
                }

                /// Index of the lowest clear bit, if any.
                pub const fn first_zero(&self) -> Option<usize> {
                    let ones = self.0.trailing_ones() as usize;
                    if ones < Self::BITS {
                        Some(ones)
                    } else {
                        None
                    }
                }

                pub const fn load(self) -> $t { self.0 }
            }
        )*
    };
}

impl_bitarray!(u8, u16, u32, u64);
